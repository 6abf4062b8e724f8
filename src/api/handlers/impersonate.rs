//! Start, inspect and end impersonation windows.

use std::sync::Arc;

use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::api::error::{ApiError, ErrorBody};
use crate::impersonation::{ImpersonationStatus, PartyInfo};

use super::principal::require_auth;
use super::{bearer_token, AppState};

#[derive(Debug, Deserialize, ToSchema)]
pub struct StartImpersonationRequest {
    pub target_user_id: Uuid,
    pub reason: Option<String>,
    /// Window length in seconds, 15 minutes to 4 hours.
    pub duration_seconds: i64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct StartImpersonationResponse {
    pub access_token: String,
    pub token_type: String,
    pub impersonation_id: Uuid,
    pub target_user_id: Uuid,
    pub target_email: String,
    pub target_display_name: Option<String>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PartyView {
    pub user_id: Uuid,
    pub email: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ImpersonationStatusResponse {
    pub active: bool,
    pub admin: Option<PartyView>,
    pub target: Option<PartyView>,
}

fn party_view(party: Option<PartyInfo>) -> Option<PartyView> {
    party.map(|party| PartyView {
        user_id: party.user_id,
        email: party.email,
    })
}

impl From<ImpersonationStatus> for ImpersonationStatusResponse {
    fn from(status: ImpersonationStatus) -> Self {
        Self {
            active: status.active,
            admin: party_view(status.admin),
            target: party_view(status.target),
        }
    }
}

#[utoipa::path(
    post,
    path = "/v1/impersonation",
    request_body = StartImpersonationRequest,
    responses(
        (status = 200, description = "Scoped token issued", body = StartImpersonationResponse),
        (status = 400, description = "Duration outside the allowed window", body = ErrorBody),
        (status = 401, description = "Unauthenticated", body = ErrorBody),
        (status = 403, description = "Missing impersonation permission", body = ErrorBody),
        (status = 404, description = "Target user not found", body = ErrorBody),
        (status = 409, description = "Already impersonating", body = ErrorBody)
    ),
    security(("bearer" = [])),
    tag = "impersonation"
)]
pub async fn start(
    headers: HeaderMap,
    state: Extension<Arc<AppState>>,
    Json(request): Json<StartImpersonationRequest>,
) -> Result<Json<StartImpersonationResponse>, ApiError> {
    let claims = require_auth(&headers, &state)?;
    let started = state
        .impersonation
        .start(
            &state.sessions,
            &state.resolver,
            &claims,
            request.target_user_id,
            request.reason.as_deref(),
            request.duration_seconds,
        )
        .await?;

    Ok(Json(StartImpersonationResponse {
        access_token: started.token,
        token_type: "Bearer".to_string(),
        impersonation_id: started.impersonation_id,
        target_user_id: started.target_user_id,
        target_email: started.target_email,
        target_display_name: started.target_display_name,
        expires_at: started.expires_at,
    }))
}

#[utoipa::path(
    get,
    path = "/v1/impersonation",
    responses(
        (status = 200, description = "Whether the presented token is an active impersonation", body = ImpersonationStatusResponse)
    ),
    security(("bearer" = [])),
    tag = "impersonation"
)]
pub async fn status(
    headers: HeaderMap,
    state: Extension<Arc<AppState>>,
) -> Result<Json<ImpersonationStatusResponse>, ApiError> {
    // Absent or invalid artifacts are "not impersonating", never an error.
    let status = state.impersonation.status(bearer_token(&headers)).await?;
    Ok(Json(status.into()))
}

#[utoipa::path(
    delete,
    path = "/v1/impersonation",
    responses(
        (status = 204, description = "Ended, or nothing to end")
    ),
    security(("bearer" = [])),
    tag = "impersonation"
)]
pub async fn end(
    headers: HeaderMap,
    state: Extension<Arc<AppState>>,
) -> Result<StatusCode, ApiError> {
    state.impersonation.end(bearer_token(&headers)).await?;
    Ok(StatusCode::NO_CONTENT)
}
