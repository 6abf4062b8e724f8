//! Login, refresh rotation, logout and session listing.
//!
//! Login and refresh are rate limited per client address and answer any
//! expected failure with the same 401, whatever the root cause.

use std::sync::Arc;

use argon2::{password_hash::PasswordHash, Argon2, PasswordVerifier};
use axum::{
    extract::Extension,
    http::{header::USER_AGENT, HeaderMap, StatusCode},
    response::{IntoResponse, Json},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tracing::{debug, info};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::api::error::{rate_limit_headers, ApiError, ErrorBody};
use crate::rate_limit::{SlidingWindowLimiter, Verdict};
use crate::session::{repo as session_repo, SessionMetadata, UserWithAccess};
use crate::token::{AccessTokenParams, ACCESS_TOKEN_TTL_SECONDS};

use super::principal::require_auth;
use super::{client_ip, normalize_email, valid_email, AppState};

#[derive(Debug, Deserialize, ToSchema)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
    /// Optional client-supplied device label, stored as session metadata.
    pub device: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct UserSummary {
    pub id: Uuid,
    pub email: String,
    pub display_name: Option<String>,
    pub tenant_id: Option<Uuid>,
    pub role: String,
    pub role_level: i32,
    pub permissions: Vec<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TokenPairResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    /// Access-token lifetime in seconds.
    pub expires_in: i64,
    pub user: UserSummary,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct LogoutAllRequest {
    /// Keep the session the request was made with.
    #[serde(default)]
    pub keep_current: bool,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct LogoutAllResponse {
    pub revoked: u64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SessionView {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub last_active_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
    pub revoked: bool,
    pub current: bool,
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
}

fn check(limiter: &SlidingWindowLimiter, key: &str) -> Result<Verdict, ApiError> {
    let verdict = limiter.check(key);
    if verdict.allowed {
        Ok(verdict)
    } else {
        Err(ApiError::RateLimited(verdict))
    }
}

fn verify_password(stored_hash: &str, password: &str) -> bool {
    PasswordHash::new(stored_hash)
        .and_then(|parsed| Argon2::default().verify_password(password.as_bytes(), &parsed))
        .is_ok()
}

fn access_params(user: &UserWithAccess, session_id: Uuid) -> AccessTokenParams {
    AccessTokenParams {
        user_id: user.user_id,
        session_id,
        email: user.email.clone(),
        tenant_id: user.tenant_id,
        role: user.role.clone(),
        role_level: user.role_level,
        permissions: user.permissions.clone(),
        impersonator: None,
    }
}

fn user_summary(user: &UserWithAccess) -> UserSummary {
    UserSummary {
        id: user.user_id,
        email: user.email.clone(),
        display_name: user.display_name.clone(),
        tenant_id: user.tenant_id,
        role: user.role.clone(),
        role_level: user.role_level,
        permissions: user.permissions.clone(),
    }
}

#[utoipa::path(
    post,
    path = "/v1/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Authenticated", body = TokenPairResponse),
        (status = 401, description = "Invalid credentials", body = ErrorBody),
        (status = 429, description = "Too many attempts", body = ErrorBody)
    ),
    tag = "auth"
)]
pub async fn login(
    headers: HeaderMap,
    state: Extension<Arc<AppState>>,
    pool: Extension<PgPool>,
    Json(request): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let ip = client_ip(&headers).unwrap_or_else(|| "unknown".to_string());
    let verdict = check(&state.limiters.login, &ip)?;

    let email = normalize_email(&request.email);
    if !valid_email(&email) {
        debug!("login rejected: malformed email");
        return Err(ApiError::Unauthenticated);
    }

    let Some(login_user) = session_repo::find_login_user(&pool, &email).await? else {
        debug!("login rejected: unknown account");
        return Err(ApiError::Unauthenticated);
    };
    if !verify_password(&login_user.password_hash, &request.password) {
        debug!("login rejected: credential mismatch");
        return Err(ApiError::Unauthenticated);
    }

    let Some(user) = state.sessions.user_with_access(login_user.id).await? else {
        debug!("login rejected: account has no usable role");
        return Err(ApiError::Unauthenticated);
    };

    let metadata = SessionMetadata {
        user_agent: headers
            .get(USER_AGENT)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string),
        ip_address: Some(ip),
        device: request.device,
    };
    let created = state.sessions.create_session(user.user_id, &metadata).await?;
    let access_token = state
        .tokens
        .issue_access(access_params(&user, created.session_id))?;

    info!(user = %user.user_id, session = %created.session_id, "login succeeded");

    Ok((
        rate_limit_headers(&verdict, false),
        Json(TokenPairResponse {
            access_token,
            refresh_token: created.refresh_token,
            token_type: "Bearer".to_string(),
            expires_in: ACCESS_TOKEN_TTL_SECONDS,
            user: user_summary(&user),
        }),
    ))
}

#[utoipa::path(
    post,
    path = "/v1/auth/refresh",
    request_body = RefreshRequest,
    responses(
        (status = 200, description = "Rotated token pair", body = TokenPairResponse),
        (status = 401, description = "Invalid refresh token", body = ErrorBody),
        (status = 429, description = "Too many attempts", body = ErrorBody)
    ),
    tag = "auth"
)]
pub async fn refresh(
    headers: HeaderMap,
    state: Extension<Arc<AppState>>,
    Json(request): Json<RefreshRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let ip = client_ip(&headers).unwrap_or_else(|| "unknown".to_string());
    let verdict = check(&state.limiters.refresh, &ip)?;

    // Redemption needs both a valid signature and a live session row whose
    // stored hash matches the token id.
    let claims = state
        .tokens
        .verify_refresh(&request.refresh_token)
        .ok_or(ApiError::Unauthenticated)?;
    let validated = state
        .sessions
        .validate_session(&claims.jti)
        .await?
        .ok_or(ApiError::Unauthenticated)?;
    if validated.session_id != claims.sid || validated.user_id != claims.sub {
        debug!("refresh rejected: claims do not match session row");
        return Err(ApiError::Unauthenticated);
    }

    // Rotation is guarded on the presented token's hash; when the same token
    // is replayed concurrently, only one request rotates and the rest 401.
    let rotated = state
        .sessions
        .rotate_refresh_token(validated.user_id, validated.session_id, &claims.jti)
        .await?
        .ok_or(ApiError::Unauthenticated)?;

    let user = state
        .sessions
        .user_with_access(validated.user_id)
        .await?
        .ok_or(ApiError::Unauthenticated)?;
    let access_token = state
        .tokens
        .issue_access(access_params(&user, validated.session_id))?;

    Ok((
        rate_limit_headers(&verdict, false),
        Json(TokenPairResponse {
            access_token,
            refresh_token: rotated.token,
            token_type: "Bearer".to_string(),
            expires_in: ACCESS_TOKEN_TTL_SECONDS,
            user: user_summary(&user),
        }),
    ))
}

#[utoipa::path(
    post,
    path = "/v1/auth/logout",
    responses(
        (status = 204, description = "Session revoked"),
        (status = 401, description = "Unauthenticated", body = ErrorBody)
    ),
    security(("bearer" = [])),
    tag = "auth"
)]
pub async fn logout(
    headers: HeaderMap,
    state: Extension<Arc<AppState>>,
) -> Result<StatusCode, ApiError> {
    let claims = require_auth(&headers, &state)?;
    if claims.is_impersonated() {
        return Err(ApiError::Forbidden(None));
    }
    state
        .sessions
        .revoke_session(claims.sid, Some("logout"))
        .await?;
    info!(user = %claims.sub, session = %claims.sid, "logout");
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/v1/auth/logout-all",
    request_body = LogoutAllRequest,
    responses(
        (status = 200, description = "Sessions revoked", body = LogoutAllResponse),
        (status = 401, description = "Unauthenticated", body = ErrorBody)
    ),
    security(("bearer" = [])),
    tag = "auth"
)]
pub async fn logout_all(
    headers: HeaderMap,
    state: Extension<Arc<AppState>>,
    request: Option<Json<LogoutAllRequest>>,
) -> Result<Json<LogoutAllResponse>, ApiError> {
    let claims = require_auth(&headers, &state)?;
    if claims.is_impersonated() {
        return Err(ApiError::Forbidden(None));
    }
    let keep_current = request.is_some_and(|body| body.keep_current);
    let except = keep_current.then_some(claims.sid);
    let revoked = state
        .sessions
        .revoke_all_user_sessions(claims.sub, except, Some("logout-all"))
        .await?;
    info!(user = %claims.sub, revoked, "logout-all");
    Ok(Json(LogoutAllResponse { revoked }))
}

#[utoipa::path(
    get,
    path = "/v1/auth/sessions",
    responses(
        (status = 200, description = "The caller's sessions, newest first", body = [SessionView]),
        (status = 401, description = "Unauthenticated", body = ErrorBody)
    ),
    security(("bearer" = [])),
    tag = "auth"
)]
pub async fn sessions(
    headers: HeaderMap,
    state: Extension<Arc<AppState>>,
) -> Result<Json<Vec<SessionView>>, ApiError> {
    let claims = require_auth(&headers, &state)?;
    if claims.is_impersonated() {
        return Err(ApiError::Forbidden(None));
    }
    let sessions = state.sessions.list_user_sessions(claims.sub).await?;
    let views = sessions
        .into_iter()
        .map(|session| SessionView {
            id: session.id,
            created_at: session.created_at,
            last_active_at: session.last_active_at,
            expires_at: session.expires_at,
            revoked: session.revoked_at.is_some(),
            current: session.id == claims.sid,
            user_agent: session.user_agent,
            ip_address: session.ip_address,
        })
        .collect();
    Ok(Json(views))
}

#[cfg(test)]
mod tests {
    use super::*;
    use argon2::password_hash::{rand_core::OsRng, PasswordHasher, SaltString};

    #[test]
    fn password_round_trip() -> anyhow::Result<()> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = Argon2::default()
            .hash_password(b"hunter2", &salt)
            .map_err(|err| anyhow::anyhow!(err))?
            .to_string();
        assert!(verify_password(&hash, "hunter2"));
        assert!(!verify_password(&hash, "hunter3"));
        Ok(())
    }

    #[test]
    fn garbage_hash_never_verifies() {
        assert!(!verify_password("not-a-phc-string", "hunter2"));
    }
}
