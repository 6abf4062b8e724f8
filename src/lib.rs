//! # Tessera (Identity, Session & Access Control)
//!
//! `tessera` is the authentication and authorization core for a multi-tenant
//! platform: it signs and verifies the two-token credential pair (short-lived
//! access token, long-lived rotating refresh token), tracks durable login
//! sessions with server-side revocation, and resolves each user's effective
//! capability set through a three-tier override chain.
//!
//! ## Token model
//!
//! Access and refresh tokens are HS256 JWTs signed with two independent
//! secrets, so one kind never verifies through the other's path. The refresh
//! token embeds a random token id whose hash is the only thing the session
//! store keeps; redeeming a refresh token requires both a valid signature and
//! a live session row.
//!
//! ## Permission resolution
//!
//! Static role defaults, then an optional tenant-level wholesale replacement,
//! then a per-user grant/revoke delta. Revocations always win, and resolution
//! happens per request against current stored state so an admin edit shows up
//! without a re-login.
//!
//! ## Impersonation
//!
//! Administrators holding the impersonation permission can mint a time-boxed
//! scoped token that acts as another user while carrying the administrator's
//! identity for audit. The admin's own session is never touched.

pub mod api;
pub mod cli;
pub mod impersonation;
pub mod rate_limit;
pub mod rbac;
pub mod session;
pub mod token;

#[cfg(test)]
mod tests {
    use anyhow::{ensure, Context, Result};
    use std::fs;
    use std::path::{Path, PathBuf};

    // Normalize SQL to avoid brittle formatting checks in schema tests.
    fn canonicalize_sql(sql: &str) -> String {
        sql.chars()
            .filter(|ch| !ch.is_whitespace())
            .map(|ch| ch.to_ascii_lowercase())
            .collect()
    }

    fn canonical_sql(path: &Path) -> Result<String> {
        let sql = fs::read_to_string(path)
            .with_context(|| format!("Failed to read SQL file at {}", path.display()))?;
        Ok(canonicalize_sql(&sql))
    }

    fn assert_contains(path: &Path, canonical: &str, needle: &str) -> Result<()> {
        ensure!(
            canonical.contains(needle),
            "Expected {needle} in {}",
            path.display()
        );
        Ok(())
    }

    #[test]
    fn schema_sql_integrity() -> Result<()> {
        let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("db/sql/01_schema.sql");
        let canonical = canonical_sql(&path)?;

        for table in [
            "createtableifnotexistsusers",
            "createtableifnotexistsuser_roles",
            "createtableifnotexistssessions",
            "createtableifnotexiststenant_role_overrides",
            "createtableifnotexistsuser_permission_overrides",
            "createtableifnotexistsimpersonation_sessions",
        ] {
            assert_contains(&path, &canonical, table)?;
        }

        // The refresh hash must be unique: the hash lookup is the sole
        // redemption gate on the store side.
        assert_contains(&path, &canonical, "refresh_token_hashbyteanotnullunique")?;
        // Users and sessions are soft-deleted/revoked, never dropped.
        assert_contains(&path, &canonical, "deleted_attimestamptz")?;
        assert_contains(&path, &canonical, "revoked_attimestamptz")
    }
}
