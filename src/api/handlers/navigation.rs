//! Effective navigation/capability resolution for the caller.

use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::HeaderMap,
    response::Json,
};
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::api::error::{ApiError, ErrorBody};

use super::principal::{require_auth, require_tenant};
use super::AppState;

#[derive(Debug, Serialize, ToSchema)]
pub struct NavigationResponse {
    pub role: String,
    pub tenant_id: Option<Uuid>,
    /// Resolution order: role/tenant list first, user grants appended.
    pub items: Vec<String>,
}

#[utoipa::path(
    get,
    path = "/v1/navigation",
    responses(
        (status = 200, description = "Resolved items in the caller's own tenant context", body = NavigationResponse),
        (status = 401, description = "Unauthenticated", body = ErrorBody)
    ),
    security(("bearer" = [])),
    tag = "access"
)]
pub async fn navigation(
    headers: HeaderMap,
    state: Extension<Arc<AppState>>,
) -> Result<Json<NavigationResponse>, ApiError> {
    let claims = require_auth(&headers, &state)?;
    // Role and tenant come from current stored state, not the token snapshot,
    // so override edits and role changes show up without a re-login.
    let user = state
        .sessions
        .user_with_access(claims.sub)
        .await?
        .ok_or(ApiError::Unauthenticated)?;
    let items = state
        .resolver
        .resolve(user.user_id, &user.role, user.tenant_id)
        .await?;
    Ok(Json(NavigationResponse {
        role: user.role,
        tenant_id: user.tenant_id,
        items,
    }))
}

#[utoipa::path(
    get,
    path = "/v1/tenants/{tenant_id}/navigation",
    params(("tenant_id" = Uuid, Path, description = "Tenant context to resolve against")),
    responses(
        (status = 200, description = "Resolved items in the given tenant context", body = NavigationResponse),
        (status = 401, description = "Unauthenticated", body = ErrorBody),
        (status = 403, description = "Tenant outside the caller's scope", body = ErrorBody)
    ),
    security(("bearer" = [])),
    tag = "access"
)]
pub async fn tenant_navigation(
    headers: HeaderMap,
    state: Extension<Arc<AppState>>,
    Path(tenant_id): Path<Uuid>,
) -> Result<Json<NavigationResponse>, ApiError> {
    let claims = require_auth(&headers, &state)?;
    require_tenant(&claims, tenant_id)?;
    let user = state
        .sessions
        .user_with_access(claims.sub)
        .await?
        .ok_or(ApiError::Unauthenticated)?;
    let items = state
        .resolver
        .resolve(user.user_id, &user.role, Some(tenant_id))
        .await?;
    Ok(Json(NavigationResponse {
        role: user.role,
        tenant_id: Some(tenant_id),
        items,
    }))
}
