//! Durable login sessions backing refresh-token validity and revocation.
//!
//! Each refresh JWT carries a random token id; only a one-way hash of that id
//! ever reaches the database. Redeeming a refresh token therefore requires
//! both a valid signature and a live session row. Sessions are never deleted,
//! only marked revoked, to preserve audit history.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use tracing::warn;
use uuid::Uuid;

use crate::rbac::roles::{find_role, RoleDefinition};
use crate::token::{IssuedRefresh, TokenService, REFRESH_TOKEN_TTL_SECONDS};

pub mod repo;

/// Informational client context captured at login. Not security-enforced.
#[derive(Debug, Clone, Default)]
pub struct SessionMetadata {
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
    pub device: Option<String>,
}

/// Returned once, at creation time. The raw refresh token is never available
/// again.
#[derive(Debug)]
pub struct CreatedSession {
    pub session_id: Uuid,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy)]
pub struct ValidatedSession {
    pub session_id: Uuid,
    pub user_id: Uuid,
}

/// A user together with the access-relevant outcome of their role
/// assignments: the single highest role and the permission union across all
/// of them.
#[derive(Debug, Clone)]
pub struct UserWithAccess {
    pub user_id: Uuid,
    pub email: String,
    pub display_name: Option<String>,
    pub tenant_id: Option<Uuid>,
    pub role: String,
    pub role_level: i32,
    pub permissions: Vec<String>,
}

/// Row shape for the session listing endpoint.
#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub last_active_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
}

/// Hash a refresh-token id so raw values never touch the database.
#[must_use]
pub fn hash_token_id(token_id: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(token_id.as_bytes());
    hasher.finalize().to_vec()
}

pub struct SessionManager {
    pool: PgPool,
    tokens: Arc<TokenService>,
}

impl SessionManager {
    #[must_use]
    pub fn new(pool: PgPool, tokens: Arc<TokenService>) -> Self {
        Self { pool, tokens }
    }

    /// Create a session for a fresh login and mint its refresh token.
    ///
    /// Retries on the (vanishingly unlikely) hash unique-violation so two
    /// sessions can never validate the same token.
    ///
    /// # Errors
    /// Returns an error when the store is unreachable or token generation
    /// keeps colliding.
    pub async fn create_session(
        &self,
        user_id: Uuid,
        metadata: &SessionMetadata,
    ) -> Result<CreatedSession> {
        for _ in 0..3 {
            let session_id = Uuid::now_v7();
            let issued = self.tokens.issue_refresh(user_id, session_id)?;
            let hash = hash_token_id(&issued.opaque);
            match repo::insert_session(
                &self.pool,
                session_id,
                user_id,
                &hash,
                REFRESH_TOKEN_TTL_SECONDS,
                metadata,
            )
            .await?
            {
                Some(expires_at) => {
                    return Ok(CreatedSession {
                        session_id,
                        refresh_token: issued.token,
                        expires_at,
                    })
                }
                None => continue,
            }
        }
        Err(anyhow!("failed to generate unique refresh token"))
    }

    /// The store-side gate for refresh-token redemption: the token id's hash
    /// must match a session row that is neither expired nor revoked. On a hit
    /// the last-active timestamp is updated best-effort.
    ///
    /// # Errors
    /// Returns an error only when the store is unreachable; a miss is
    /// `Ok(None)`.
    pub async fn validate_session(&self, token_id: &str) -> Result<Option<ValidatedSession>> {
        let hash = hash_token_id(token_id);
        let Some(validated) = repo::find_live_session(&self.pool, &hash).await? else {
            return Ok(None);
        };

        // Advisory telemetry only; losing this under concurrent refreshes of
        // the same session is acceptable.
        if let Err(err) = repo::touch_last_active(&self.pool, validated.session_id).await {
            warn!("failed to update session last_active_at: {err}");
        }

        Ok(Some(validated))
    }

    /// Mint a replacement refresh token and swap in its hash, invalidating
    /// the old one in the same single-row statement. The swap is guarded on
    /// the presented token id's hash, so when two redemptions of the same
    /// token race, exactly one rotates and the other gets `None`. `None` also
    /// covers a session revoked or expired in the meantime.
    ///
    /// # Errors
    /// Returns an error when the store is unreachable.
    pub async fn rotate_refresh_token(
        &self,
        user_id: Uuid,
        session_id: Uuid,
        presented_token_id: &str,
    ) -> Result<Option<IssuedRefresh>> {
        let current_hash = hash_token_id(presented_token_id);
        let issued = self.tokens.issue_refresh(user_id, session_id)?;
        let new_hash = hash_token_id(&issued.opaque);
        if repo::update_refresh_hash(&self.pool, session_id, &current_hash, &new_hash).await? {
            Ok(Some(issued))
        } else {
            Ok(None)
        }
    }

    /// Idempotent: revoking a revoked session keeps its original reason.
    ///
    /// # Errors
    /// Returns an error when the store is unreachable.
    pub async fn revoke_session(&self, session_id: Uuid, reason: Option<&str>) -> Result<()> {
        repo::revoke(&self.pool, session_id, reason).await
    }

    /// Revoke every non-revoked session of a user, except an optional
    /// survivor (the caller's current device). Returns how many were revoked.
    ///
    /// # Errors
    /// Returns an error when the store is unreachable.
    pub async fn revoke_all_user_sessions(
        &self,
        user_id: Uuid,
        except_session_id: Option<Uuid>,
        reason: Option<&str>,
    ) -> Result<u64> {
        repo::revoke_all_for_user(&self.pool, user_id, except_session_id, reason).await
    }

    /// # Errors
    /// Returns an error when the store is unreachable.
    pub async fn list_user_sessions(&self, user_id: Uuid) -> Result<Vec<SessionSummary>> {
        repo::sessions_for_user(&self.pool, user_id).await
    }

    /// Load a user plus their resolved highest role and permission union.
    /// Soft-deleted users and users without any role come back as `None`.
    ///
    /// # Errors
    /// Returns an error when the store is unreachable.
    pub async fn user_with_access(&self, user_id: Uuid) -> Result<Option<UserWithAccess>> {
        let Some(user) = repo::user_with_roles(&self.pool, user_id).await? else {
            return Ok(None);
        };
        let Some((role, permissions)) = highest_role_and_union(&user.role_slugs) else {
            return Ok(None);
        };
        Ok(Some(UserWithAccess {
            user_id: user.id,
            email: user.email,
            display_name: user.display_name,
            tenant_id: user.tenant_id,
            role: role.slug.to_string(),
            role_level: role.level,
            permissions,
        }))
    }
}

/// Pick the highest-level assigned role and union the static permission sets.
/// Levels are unique by construction; on an (unexpected) tie the first
/// assignment scanned wins.
fn highest_role_and_union(slugs: &[String]) -> Option<(&'static RoleDefinition, Vec<String>)> {
    let mut best: Option<&'static RoleDefinition> = None;
    let mut union: Vec<String> = Vec::new();
    for slug in slugs {
        let Some(role) = find_role(slug) else {
            warn!("ignoring unknown role assignment: {slug}");
            continue;
        };
        for item in role.items {
            if !union.iter().any(|existing| existing == item) {
                union.push((*item).to_string());
            }
        }
        if best.is_none_or(|current| role.level > current.level) {
            best = Some(role);
        }
    }
    best.map(|role| (role, union))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_stable_and_collision_free_for_distinct_ids() {
        let first = hash_token_id("token");
        let second = hash_token_id("token");
        let different = hash_token_id("other");
        assert_eq!(first, second);
        assert_ne!(first, different);
        assert_eq!(first.len(), 32);
    }

    #[test]
    fn highest_role_wins_and_permissions_union() {
        let slugs = vec!["mentor".to_string(), "coordinator".to_string()];
        let (role, union) = highest_role_and_union(&slugs).expect("resolved roles");
        assert_eq!(role.slug, "coordinator");
        assert_eq!(role.level, 50);
        // Union contains items from both roles.
        assert!(union.contains(&"mentoring".to_string()));
        assert!(union.contains(&"participants".to_string()));
    }

    #[test]
    fn unknown_assignments_are_skipped() {
        let slugs = vec!["plumber".to_string(), "mentor".to_string()];
        let (role, _) = highest_role_and_union(&slugs).expect("resolved roles");
        assert_eq!(role.slug, "mentor");
    }

    #[test]
    fn no_valid_roles_means_no_access() {
        assert!(highest_role_and_union(&[]).is_none());
        assert!(highest_role_and_union(&["plumber".to_string()]).is_none());
    }
}
