//! Override administration: tenant role overrides and per-user deltas.
//!
//! Gated by a minimum role level that is re-read from the store on every
//! call; a stale admin token does not keep its powers. Submitted item names
//! are filtered against the known universe, never stored verbatim.

use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::{HeaderMap, StatusCode},
    response::Json,
};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tracing::info;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::api::error::{ApiError, ErrorBody};
use crate::rbac::{find_role, repo as rbac_repo, sanitize_items};
use crate::session::repo as session_repo;
use crate::token::AccessClaims;

use super::principal::{require_auth, require_override_admin, require_tenant};
use super::AppState;

/// Both parties behind a privileged write: the acting user and, during an
/// impersonation window, the administrator driving it. The write must stay
/// attributable to each.
fn acting_parties(claims: &AccessClaims) -> (Uuid, Option<Uuid>) {
    (
        claims.sub,
        claims
            .impersonator
            .as_ref()
            .map(|admin| admin.admin_user_id),
    )
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RoleOverrideRequest {
    pub items: Vec<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RoleOverrideResponse {
    pub tenant_id: Uuid,
    pub role: String,
    /// What was actually stored after filtering unknown items.
    pub items: Vec<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UserOverrideRequest {
    #[serde(default)]
    pub granted: Vec<String>,
    #[serde(default)]
    pub revoked: Vec<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct UserOverrideResponse {
    pub tenant_id: Uuid,
    pub user_id: Uuid,
    pub granted: Vec<String>,
    pub revoked: Vec<String>,
}

#[utoipa::path(
    put,
    path = "/v1/tenants/{tenant_id}/roles/{slug}/navigation",
    params(
        ("tenant_id" = Uuid, Path, description = "Tenant the override applies to"),
        ("slug" = String, Path, description = "Role being overridden")
    ),
    request_body = RoleOverrideRequest,
    responses(
        (status = 200, description = "Override stored", body = RoleOverrideResponse),
        (status = 401, description = "Unauthenticated", body = ErrorBody),
        (status = 403, description = "Below the admin threshold", body = ErrorBody),
        (status = 404, description = "Unknown role", body = ErrorBody)
    ),
    security(("bearer" = [])),
    tag = "access"
)]
pub async fn put_role_override(
    headers: HeaderMap,
    state: Extension<Arc<AppState>>,
    pool: Extension<PgPool>,
    Path((tenant_id, slug)): Path<(Uuid, String)>,
    Json(request): Json<RoleOverrideRequest>,
) -> Result<Json<RoleOverrideResponse>, ApiError> {
    let claims = require_auth(&headers, &state)?;
    require_tenant(&claims, tenant_id)?;
    require_override_admin(&claims, &state).await?;

    let role = find_role(&slug).ok_or(ApiError::NotFound)?;
    let items = sanitize_items(&request.items);
    rbac_repo::upsert_tenant_role_override(&pool, tenant_id, role.slug, &items).await?;
    let (actor, impersonator) = acting_parties(&claims);
    info!(admin = %actor, impersonator = ?impersonator, tenant = %tenant_id, role = role.slug, "role override stored");

    Ok(Json(RoleOverrideResponse {
        tenant_id,
        role: role.slug.to_string(),
        items,
    }))
}

#[utoipa::path(
    delete,
    path = "/v1/tenants/{tenant_id}/roles/{slug}/navigation",
    params(
        ("tenant_id" = Uuid, Path, description = "Tenant the override applies to"),
        ("slug" = String, Path, description = "Role to reset to static defaults")
    ),
    responses(
        (status = 204, description = "Override removed"),
        (status = 401, description = "Unauthenticated", body = ErrorBody),
        (status = 403, description = "Below the admin threshold", body = ErrorBody),
        (status = 404, description = "Unknown role or no override stored", body = ErrorBody)
    ),
    security(("bearer" = [])),
    tag = "access"
)]
pub async fn delete_role_override(
    headers: HeaderMap,
    state: Extension<Arc<AppState>>,
    pool: Extension<PgPool>,
    Path((tenant_id, slug)): Path<(Uuid, String)>,
) -> Result<StatusCode, ApiError> {
    let claims = require_auth(&headers, &state)?;
    require_tenant(&claims, tenant_id)?;
    require_override_admin(&claims, &state).await?;

    let role = find_role(&slug).ok_or(ApiError::NotFound)?;
    if !rbac_repo::delete_tenant_role_override(&pool, tenant_id, role.slug).await? {
        return Err(ApiError::NotFound);
    }
    let (actor, impersonator) = acting_parties(&claims);
    info!(admin = %actor, impersonator = ?impersonator, tenant = %tenant_id, role = role.slug, "role override removed");
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    put,
    path = "/v1/tenants/{tenant_id}/users/{user_id}/overrides",
    params(
        ("tenant_id" = Uuid, Path, description = "Tenant the override applies to"),
        ("user_id" = Uuid, Path, description = "User receiving the delta")
    ),
    request_body = UserOverrideRequest,
    responses(
        (status = 200, description = "Override stored", body = UserOverrideResponse),
        (status = 401, description = "Unauthenticated", body = ErrorBody),
        (status = 403, description = "Below the admin threshold", body = ErrorBody),
        (status = 404, description = "Target user not found", body = ErrorBody)
    ),
    security(("bearer" = [])),
    tag = "access"
)]
pub async fn put_user_override(
    headers: HeaderMap,
    state: Extension<Arc<AppState>>,
    pool: Extension<PgPool>,
    Path((tenant_id, user_id)): Path<(Uuid, Uuid)>,
    Json(request): Json<UserOverrideRequest>,
) -> Result<Json<UserOverrideResponse>, ApiError> {
    let claims = require_auth(&headers, &state)?;
    require_tenant(&claims, tenant_id)?;
    require_override_admin(&claims, &state).await?;

    if !session_repo::user_exists(&pool, user_id).await? {
        return Err(ApiError::NotFound);
    }

    let granted = sanitize_items(&request.granted);
    let revoked = sanitize_items(&request.revoked);
    rbac_repo::upsert_user_override(&pool, tenant_id, user_id, &granted, &revoked).await?;
    let (actor, impersonator) = acting_parties(&claims);
    info!(admin = %actor, impersonator = ?impersonator, tenant = %tenant_id, user = %user_id, "user override stored");

    Ok(Json(UserOverrideResponse {
        tenant_id,
        user_id,
        granted,
        revoked,
    }))
}

#[utoipa::path(
    delete,
    path = "/v1/tenants/{tenant_id}/users/{user_id}/overrides",
    params(
        ("tenant_id" = Uuid, Path, description = "Tenant the override applies to"),
        ("user_id" = Uuid, Path, description = "User whose delta is cleared")
    ),
    responses(
        (status = 204, description = "Override cleared"),
        (status = 401, description = "Unauthenticated", body = ErrorBody),
        (status = 403, description = "Below the admin threshold", body = ErrorBody),
        (status = 404, description = "No override stored", body = ErrorBody)
    ),
    security(("bearer" = [])),
    tag = "access"
)]
pub async fn delete_user_override(
    headers: HeaderMap,
    state: Extension<Arc<AppState>>,
    pool: Extension<PgPool>,
    Path((tenant_id, user_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, ApiError> {
    let claims = require_auth(&headers, &state)?;
    require_tenant(&claims, tenant_id)?;
    require_override_admin(&claims, &state).await?;

    if !rbac_repo::delete_user_override(&pool, tenant_id, user_id).await? {
        return Err(ApiError::NotFound);
    }
    let (actor, impersonator) = acting_parties(&claims);
    info!(admin = %actor, impersonator = ?impersonator, tenant = %tenant_id, user = %user_id, "user override cleared");
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::{ImpersonatorRef, TokenKind};

    fn claims(impersonator: Option<ImpersonatorRef>) -> AccessClaims {
        AccessClaims {
            sub: Uuid::new_v4(),
            sid: Uuid::new_v4(),
            email: "admin@example.com".to_string(),
            tenant_id: None,
            role: "agency_admin".to_string(),
            role_level: 90,
            permissions: Vec::new(),
            token_type: TokenKind::Access,
            iat: 0,
            exp: 0,
            impersonator,
        }
    }

    #[test]
    fn direct_writes_attribute_the_actor_only() {
        let claims = claims(None);
        let (actor, impersonator) = acting_parties(&claims);
        assert_eq!(actor, claims.sub);
        assert_eq!(impersonator, None);
    }

    #[test]
    fn impersonated_writes_attribute_both_parties() {
        let admin_user_id = Uuid::new_v4();
        let claims = claims(Some(ImpersonatorRef {
            admin_user_id,
            admin_session_id: Uuid::new_v4(),
        }));
        let (actor, impersonator) = acting_parties(&claims);
        // The subject is the impersonation target; the driving administrator
        // must surface alongside it.
        assert_eq!(actor, claims.sub);
        assert_eq!(impersonator, Some(admin_user_id));
    }
}
