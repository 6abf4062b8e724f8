//! Time-boxed delegated sessions: an administrator acting as another user.
//!
//! Every scoped token minted here embeds the administrator's identity next to
//! the target's, so privileged writes performed while impersonating can be
//! attributed to both parties in audit logs. The admin's own session is never
//! touched; the window ends on expiry or an explicit switch-back.

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::rbac::{PermissionResolver, IMPERSONATE_PERMISSION};
use crate::session::SessionManager;
use crate::token::{AccessClaims, AccessTokenParams, ImpersonatorRef, TokenService};

mod repo;

/// Operator-selectable window bounds.
pub const MIN_DURATION_SECONDS: i64 = 15 * 60;
pub const MAX_DURATION_SECONDS: i64 = 4 * 60 * 60;

#[derive(Debug, Error)]
pub enum ImpersonationError {
    #[error("missing permission: {IMPERSONATE_PERMISSION}")]
    NotPermitted,
    #[error("duration must be between {MIN_DURATION_SECONDS} and {MAX_DURATION_SECONDS} seconds")]
    InvalidDuration,
    #[error("target user not found")]
    TargetNotFound,
    #[error("cannot start impersonation from an impersonated session")]
    Nested,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

#[derive(Debug)]
pub struct StartedImpersonation {
    pub token: String,
    pub impersonation_id: Uuid,
    pub target_user_id: Uuid,
    pub target_email: String,
    pub target_display_name: Option<String>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartyInfo {
    pub user_id: Uuid,
    pub email: String,
}

/// Answer for the UI banner. `active == false` carries no identities.
#[derive(Debug, Default)]
pub struct ImpersonationStatus {
    pub active: bool,
    pub admin: Option<PartyInfo>,
    pub target: Option<PartyInfo>,
}

/// Reject durations outside the allowed window instead of clamping them, so
/// the audit row always matches what the operator asked for.
pub fn validate_duration(seconds: i64) -> Result<i64, ImpersonationError> {
    if (MIN_DURATION_SECONDS..=MAX_DURATION_SECONDS).contains(&seconds) {
        Ok(seconds)
    } else {
        Err(ImpersonationError::InvalidDuration)
    }
}

pub struct ImpersonationService {
    pool: PgPool,
    tokens: Arc<TokenService>,
}

impl ImpersonationService {
    #[must_use]
    pub fn new(pool: PgPool, tokens: Arc<TokenService>) -> Self {
        Self { pool, tokens }
    }

    /// `NotImpersonating -> Active`.
    ///
    /// The impersonation permission is re-checked against current stored
    /// state, never against the admin token's snapshot.
    ///
    /// # Errors
    /// Explicit for every failure; a start never silently degrades to
    /// "not impersonating".
    pub async fn start(
        &self,
        sessions: &SessionManager,
        resolver: &PermissionResolver,
        admin: &AccessClaims,
        target_user_id: Uuid,
        reason: Option<&str>,
        duration_seconds: i64,
    ) -> Result<StartedImpersonation, ImpersonationError> {
        if admin.is_impersonated() {
            return Err(ImpersonationError::Nested);
        }
        let duration = validate_duration(duration_seconds)?;

        let admin_access = sessions
            .user_with_access(admin.sub)
            .await?
            .ok_or(ImpersonationError::NotPermitted)?;
        let admin_permissions = resolver
            .resolve(
                admin_access.user_id,
                &admin_access.role,
                admin_access.tenant_id,
            )
            .await?;
        if !admin_permissions
            .iter()
            .any(|item| item == IMPERSONATE_PERMISSION)
        {
            return Err(ImpersonationError::NotPermitted);
        }

        let target = sessions
            .user_with_access(target_user_id)
            .await?
            .ok_or(ImpersonationError::TargetNotFound)?;
        let target_permissions = resolver
            .resolve(target.user_id, &target.role, target.tenant_id)
            .await?;

        let (impersonation_id, expires_at) = repo::insert(
            &self.pool,
            admin.sub,
            admin.sid,
            target.user_id,
            reason,
            duration,
        )
        .await?;

        // The scoped token's session id is the impersonation window itself,
        // so status/end can find the audit row from the artifact alone.
        let token = self
            .tokens
            .issue_access_with_ttl(
                AccessTokenParams {
                    user_id: target.user_id,
                    session_id: impersonation_id,
                    email: target.email.clone(),
                    tenant_id: target.tenant_id,
                    role: target.role.clone(),
                    role_level: target.role_level,
                    permissions: target_permissions,
                    impersonator: Some(ImpersonatorRef {
                        admin_user_id: admin.sub,
                        admin_session_id: admin.sid,
                    }),
                },
                duration,
            )
            .map_err(ImpersonationError::Internal)?;

        info!(
            admin = %admin.sub,
            target = %target.user_id,
            impersonation = %impersonation_id,
            "impersonation started"
        );

        Ok(StartedImpersonation {
            token,
            impersonation_id,
            target_user_id: target.user_id,
            target_email: target.email,
            target_display_name: target.display_name,
            expires_at,
        })
    }

    /// Report whether the presented artifact is an active impersonation.
    /// A missing or invalid artifact is simply "not impersonating".
    ///
    /// # Errors
    /// Returns an error only when the store is unreachable.
    pub async fn status(&self, artifact: Option<&str>) -> Result<ImpersonationStatus> {
        let Some(claims) = artifact.and_then(|token| self.tokens.verify_access(token)) else {
            return Ok(ImpersonationStatus::default());
        };
        if claims.impersonator.is_none() {
            return Ok(ImpersonationStatus::default());
        }

        let Some(row) = repo::find_status(&self.pool, claims.sid).await? else {
            return Ok(ImpersonationStatus::default());
        };
        if !row.active {
            return Ok(ImpersonationStatus::default());
        }

        Ok(ImpersonationStatus {
            active: true,
            admin: Some(PartyInfo {
                user_id: row.admin_user_id,
                email: row.admin_email,
            }),
            target: Some(PartyInfo {
                user_id: row.target_user_id,
                email: row.target_email,
            }),
        })
    }

    /// `Active -> Ended`. Idempotent: ending an ended or never-started
    /// impersonation is a no-op success.
    ///
    /// # Errors
    /// Returns an error only when the store is unreachable.
    pub async fn end(&self, artifact: Option<&str>) -> Result<()> {
        let Some(claims) = artifact.and_then(|token| self.tokens.verify_access(token)) else {
            return Ok(());
        };
        let Some(impersonator) = claims.impersonator else {
            return Ok(());
        };

        repo::end(&self.pool, claims.sid).await?;
        info!(
            admin = %impersonator.admin_user_id,
            target = %claims.sub,
            impersonation = %claims.sid,
            "impersonation ended"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_bounds_are_inclusive() {
        assert!(validate_duration(MIN_DURATION_SECONDS).is_ok());
        assert!(validate_duration(MAX_DURATION_SECONDS).is_ok());
        assert!(validate_duration(MIN_DURATION_SECONDS - 1).is_err());
        assert!(validate_duration(MAX_DURATION_SECONDS + 1).is_err());
        assert!(validate_duration(0).is_err());
        assert!(validate_duration(-900).is_err());
    }

    #[test]
    fn status_defaults_to_inactive() {
        let status = ImpersonationStatus::default();
        assert!(!status.active);
        assert!(status.admin.is_none());
        assert!(status.target.is_none());
    }
}
