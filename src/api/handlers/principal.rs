//! Authenticated principal extraction and authorization guards.
//!
//! Every cause of an authentication failure collapses to the same 401 here;
//! the specific reason only ever reaches the logs.

use axum::http::HeaderMap;
use uuid::Uuid;

use crate::api::error::ApiError;
use crate::rbac::roles::find_role;
use crate::token::AccessClaims;

use super::{bearer_token, AppState};

/// Resolve the bearer access token into its verified claims.
///
/// # Errors
/// `Unauthenticated` for a missing, malformed, expired or forged token.
pub(crate) fn require_auth(headers: &HeaderMap, state: &AppState) -> Result<AccessClaims, ApiError> {
    bearer_token(headers)
        .and_then(|token| state.tokens.verify_access(token))
        .ok_or(ApiError::Unauthenticated)
}

/// Tenant-scoped routes: the path tenant must be the caller's own, unless the
/// caller's role carries agency scope (cross-tenant by definition).
///
/// # Errors
/// `Forbidden` on a mismatch without agency scope.
pub(crate) fn require_tenant(claims: &AccessClaims, tenant_id: Uuid) -> Result<(), ApiError> {
    let agency_scope = find_role(&claims.role).is_some_and(|role| role.agency_scope);
    if agency_scope || claims.tenant_id == Some(tenant_id) {
        Ok(())
    } else {
        Err(ApiError::Forbidden(None))
    }
}

/// Admin guard for the override endpoints: minimum role level, re-read from
/// the store rather than trusted from the token snapshot.
///
/// # Errors
/// `Forbidden` below the threshold or when the account no longer resolves.
pub(crate) async fn require_override_admin(
    claims: &AccessClaims,
    state: &AppState,
) -> Result<(), ApiError> {
    let current = state
        .sessions
        .user_with_access(claims.sub)
        .await?
        .ok_or(ApiError::Forbidden(None))?;
    if current.role_level >= crate::rbac::OVERRIDE_ADMIN_LEVEL {
        Ok(())
    } else {
        Err(ApiError::Forbidden(None))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::TokenKind;

    fn claims(role: &str, tenant_id: Option<Uuid>) -> AccessClaims {
        AccessClaims {
            sub: Uuid::new_v4(),
            sid: Uuid::new_v4(),
            email: "user@example.com".to_string(),
            tenant_id,
            role: role.to_string(),
            role_level: 0,
            permissions: Vec::new(),
            token_type: TokenKind::Access,
            iat: 0,
            exp: 0,
            impersonator: None,
        }
    }

    #[test]
    fn tenant_guard_matches_own_tenant() {
        let tenant = Uuid::new_v4();
        let claims = claims("mentor", Some(tenant));
        assert!(require_tenant(&claims, tenant).is_ok());
        assert!(require_tenant(&claims, Uuid::new_v4()).is_err());
    }

    #[test]
    fn agency_scope_crosses_tenants() {
        let claims = claims("super_admin", None);
        assert!(require_tenant(&claims, Uuid::new_v4()).is_ok());
    }

    #[test]
    fn unknown_role_never_crosses_tenants() {
        let claims = claims("plumber", None);
        assert!(require_tenant(&claims, Uuid::new_v4()).is_err());
    }
}
