//! Effective permission resolution for a (user, role, tenant) triple.
//!
//! Resolution is a pure function of current stored state. There is no cache
//! in front of it: permission changes must take effect on the next request,
//! not after an access token's remaining lifetime.

use anyhow::{anyhow, Result};
use sqlx::PgPool;
use uuid::Uuid;

use super::repo;
use super::roles::{find_role, RoleDefinition};

/// Per-user grant/revoke delta layered on top of role defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserOverride {
    pub granted: Vec<String>,
    pub revoked: Vec<String>,
}

/// Apply the fixed three-tier override chain.
///
/// 1. Start from the role's static defaults.
/// 2. A tenant override replaces the list wholesale, it never merges.
/// 3. User grants are appended (de-duplicated), then user revocations are
///    removed. Revocation is applied last, so it wins over a grant of the
///    same item.
#[must_use]
pub fn effective_items(
    role: &RoleDefinition,
    tenant_override: Option<&[String]>,
    user_override: Option<&UserOverride>,
) -> Vec<String> {
    let mut items: Vec<String> = match tenant_override {
        Some(replacement) => replacement.to_vec(),
        None => role.items.iter().map(ToString::to_string).collect(),
    };

    if let Some(delta) = user_override {
        for grant in &delta.granted {
            if !items.contains(grant) {
                items.push(grant.clone());
            }
        }
        items.retain(|item| !delta.revoked.contains(item));
    }

    items
}

/// Store-backed resolver; one durable-store round trip per tier.
pub struct PermissionResolver {
    pool: PgPool,
}

impl PermissionResolver {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Resolve the ordered capability list for a user.
    ///
    /// Agency-level identities (no tenant) skip override lookups entirely and
    /// receive the static role defaults.
    ///
    /// # Errors
    /// Returns an error for unknown role slugs or when the store is
    /// unreachable; callers translate that into a fail-closed response.
    pub async fn resolve(
        &self,
        user_id: Uuid,
        role_slug: &str,
        tenant_id: Option<Uuid>,
    ) -> Result<Vec<String>> {
        let role = find_role(role_slug).ok_or_else(|| anyhow!("unknown role: {role_slug}"))?;

        let Some(tenant_id) = tenant_id else {
            return Ok(role.items.iter().map(ToString::to_string).collect());
        };

        let tenant_override =
            repo::tenant_role_override(&self.pool, tenant_id, role_slug).await?;
        let user_override = repo::user_override(&self.pool, tenant_id, user_id).await?;

        Ok(effective_items(
            role,
            tenant_override.as_deref(),
            user_override.as_ref(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rbac::roles::find_role;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn defaults_without_overrides() {
        let mentor = find_role("mentor").expect("mentor role");
        assert_eq!(
            effective_items(mentor, None, None),
            strings(&["dashboard", "mentoring", "goals", "assessments"])
        );
    }

    #[test]
    fn tenant_override_replaces_wholesale() {
        let mentor = find_role("mentor").expect("mentor role");
        let replacement = strings(&["dashboard", "mentoring"]);
        assert_eq!(
            effective_items(mentor, Some(&replacement), None),
            strings(&["dashboard", "mentoring"])
        );
    }

    #[test]
    fn user_grants_append_and_revocations_remove() {
        let mentor = find_role("mentor").expect("mentor role");
        let delta = UserOverride {
            granted: strings(&["analytics"]),
            revoked: strings(&["mentoring"]),
        };
        let resolved = effective_items(mentor, None, Some(&delta));
        assert!(resolved.contains(&"analytics".to_string()));
        assert!(!resolved.contains(&"mentoring".to_string()));
    }

    #[test]
    fn revocation_wins_over_grant_of_same_item() {
        let mentor = find_role("mentor").expect("mentor role");
        let delta = UserOverride {
            granted: strings(&["analytics"]),
            revoked: strings(&["analytics"]),
        };
        let resolved = effective_items(mentor, None, Some(&delta));
        assert!(!resolved.contains(&"analytics".to_string()));
    }

    #[test]
    fn grants_do_not_duplicate_existing_items() {
        let mentor = find_role("mentor").expect("mentor role");
        let delta = UserOverride {
            granted: strings(&["dashboard"]),
            revoked: vec![],
        };
        let resolved = effective_items(mentor, None, Some(&delta));
        let dashboards = resolved.iter().filter(|item| *item == "dashboard").count();
        assert_eq!(dashboards, 1);
    }

    #[test]
    fn user_override_applies_on_top_of_tenant_override() {
        let mentor = find_role("mentor").expect("mentor role");
        let replacement = strings(&["dashboard", "mentoring"]);
        let delta = UserOverride {
            granted: strings(&["certificates"]),
            revoked: strings(&["mentoring"]),
        };
        assert_eq!(
            effective_items(mentor, Some(&replacement), Some(&delta)),
            strings(&["dashboard", "certificates"])
        );
    }
}
