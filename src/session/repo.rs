//! Database helpers for session rows and user/role loading.

use anyhow::{Context, Result};
use sqlx::{PgPool, Row};
use tracing::Instrument;
use uuid::Uuid;

use super::{SessionMetadata, SessionSummary, ValidatedSession};

pub(super) struct UserRow {
    pub(super) id: Uuid,
    pub(super) email: String,
    pub(super) display_name: Option<String>,
    pub(super) tenant_id: Option<Uuid>,
    pub(super) role_slugs: Vec<String>,
}

/// Minimal fields needed to check a login credential.
pub struct LoginUser {
    pub id: Uuid,
    pub password_hash: String,
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}

/// Insert a session row. Returns `None` on a token-hash collision so the
/// caller can retry with fresh entropy.
pub(super) async fn insert_session(
    pool: &PgPool,
    session_id: Uuid,
    user_id: Uuid,
    token_hash: &[u8],
    ttl_seconds: i64,
    metadata: &SessionMetadata,
) -> Result<Option<chrono::DateTime<chrono::Utc>>> {
    let query = r"
        INSERT INTO sessions
            (id, user_id, refresh_token_hash, expires_at, user_agent, ip_address, device)
        VALUES ($1, $2, $3, NOW() + ($4 * INTERVAL '1 second'), $5, $6, $7)
        RETURNING expires_at
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(session_id)
        .bind(user_id)
        .bind(token_hash)
        .bind(ttl_seconds)
        .bind(metadata.user_agent.as_deref())
        .bind(metadata.ip_address.as_deref())
        .bind(metadata.device.as_deref())
        .fetch_one(pool)
        .instrument(span)
        .await;

    match result {
        Ok(row) => Ok(Some(row.get("expires_at"))),
        Err(err) if is_unique_violation(&err) => Ok(None),
        Err(err) => Err(err).context("failed to insert session"),
    }
}

/// Look up a session by token hash that is neither revoked nor expired, for
/// an active (not soft-deleted) user.
pub(super) async fn find_live_session(
    pool: &PgPool,
    token_hash: &[u8],
) -> Result<Option<ValidatedSession>> {
    let query = r"
        SELECT sessions.id, sessions.user_id
        FROM sessions
        JOIN users ON users.id = sessions.user_id
        WHERE sessions.refresh_token_hash = $1
          AND sessions.revoked_at IS NULL
          AND sessions.expires_at > NOW()
          AND users.deleted_at IS NULL
        LIMIT 1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(token_hash)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup session")?;

    Ok(row.map(|row| ValidatedSession {
        session_id: row.get("id"),
        user_id: row.get("user_id"),
    }))
}

pub(super) async fn touch_last_active(pool: &PgPool, session_id: Uuid) -> Result<()> {
    let query = "UPDATE sessions SET last_active_at = NOW() WHERE id = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(session_id)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to update session last_active_at")?;
    Ok(())
}

// Compare-and-swap: the stored hash must still be the one the caller just
// validated, so of two concurrent redemptions of the same token exactly one
// rotates and the other matches zero rows.
const ROTATE_REFRESH_HASH: &str = r"
    UPDATE sessions
    SET refresh_token_hash = $3, last_active_at = NOW()
    WHERE id = $1
      AND refresh_token_hash = $2
      AND revoked_at IS NULL
      AND expires_at > NOW()
";

/// Swap the stored hash in one atomic statement, guarded on the presented
/// token's hash. The `revoked_at IS NULL` guard makes a concurrent
/// revocation win over the rotation.
pub(super) async fn update_refresh_hash(
    pool: &PgPool,
    session_id: Uuid,
    current_hash: &[u8],
    new_hash: &[u8],
) -> Result<bool> {
    let query = ROTATE_REFRESH_HASH;
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(session_id)
        .bind(current_hash)
        .bind(new_hash)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to rotate refresh token")?;
    Ok(result.rows_affected() > 0)
}

pub(super) async fn revoke(pool: &PgPool, session_id: Uuid, reason: Option<&str>) -> Result<()> {
    // Rows are kept for audit; revoking twice leaves the first reason intact.
    let query = r"
        UPDATE sessions
        SET revoked_at = NOW(), revoked_reason = $2
        WHERE id = $1 AND revoked_at IS NULL
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(session_id)
        .bind(reason)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to revoke session")?;
    Ok(())
}

pub(super) async fn revoke_all_for_user(
    pool: &PgPool,
    user_id: Uuid,
    except_session_id: Option<Uuid>,
    reason: Option<&str>,
) -> Result<u64> {
    let query = r"
        UPDATE sessions
        SET revoked_at = NOW(), revoked_reason = $3
        WHERE user_id = $1
          AND revoked_at IS NULL
          AND ($2::uuid IS NULL OR id <> $2)
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(user_id)
        .bind(except_session_id)
        .bind(reason)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to revoke user sessions")?;
    Ok(result.rows_affected())
}

pub(super) async fn sessions_for_user(
    pool: &PgPool,
    user_id: Uuid,
) -> Result<Vec<SessionSummary>> {
    let query = r"
        SELECT id, created_at, last_active_at, expires_at, revoked_at, user_agent, ip_address
        FROM sessions
        WHERE user_id = $1
        ORDER BY created_at DESC
        LIMIT 50
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let rows = sqlx::query(query)
        .bind(user_id)
        .fetch_all(pool)
        .instrument(span)
        .await
        .context("failed to list user sessions")?;

    Ok(rows
        .into_iter()
        .map(|row| SessionSummary {
            id: row.get("id"),
            created_at: row.get("created_at"),
            last_active_at: row.get("last_active_at"),
            expires_at: row.get("expires_at"),
            revoked_at: row.get("revoked_at"),
            user_agent: row.get("user_agent"),
            ip_address: row.get("ip_address"),
        })
        .collect())
}

pub(super) async fn user_with_roles(pool: &PgPool, user_id: Uuid) -> Result<Option<UserRow>> {
    // Soft-deleted users are "not found", never an error.
    let query = r"
        SELECT users.id, users.email, users.display_name, users.tenant_id,
               COALESCE(
                   array_agg(user_roles.role_slug ORDER BY user_roles.assigned_at)
                       FILTER (WHERE user_roles.role_slug IS NOT NULL),
                   '{}'
               ) AS role_slugs
        FROM users
        LEFT JOIN user_roles ON user_roles.user_id = users.id
        WHERE users.id = $1 AND users.deleted_at IS NULL
        GROUP BY users.id, users.email, users.display_name, users.tenant_id
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(user_id)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to load user with roles")?;

    Ok(row.map(|row| UserRow {
        id: row.get("id"),
        email: row.get("email"),
        display_name: row.get("display_name"),
        tenant_id: row.get("tenant_id"),
        role_slugs: row.get("role_slugs"),
    }))
}

/// Existence check for routes that reference another user. Soft-deleted
/// users count as absent.
pub async fn user_exists(pool: &PgPool, user_id: Uuid) -> Result<bool> {
    let query = "SELECT 1 FROM users WHERE id = $1 AND deleted_at IS NULL";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(user_id)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to check user existence")?;
    Ok(row.is_some())
}

/// Credential lookup for the login boundary. Missing and soft-deleted users
/// both come back as `None` so login failures stay uniform.
pub async fn find_login_user(pool: &PgPool, email: &str) -> Result<Option<LoginUser>> {
    let query = r"
        SELECT id, password_hash
        FROM users
        WHERE email = $1 AND deleted_at IS NULL
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(email)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup login user")?;

    Ok(row.map(|row| LoginUser {
        id: row.get("id"),
        password_hash: row.get("password_hash"),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rotation_swaps_only_the_presented_hash() {
        // A rotation that did not guard on the presented hash would let two
        // concurrent redemptions of one token both succeed.
        assert!(ROTATE_REFRESH_HASH.contains("AND refresh_token_hash = $2"));
        assert!(ROTATE_REFRESH_HASH.contains("SET refresh_token_hash = $3"));
        assert!(ROTATE_REFRESH_HASH.contains("AND revoked_at IS NULL"));
        assert!(ROTATE_REFRESH_HASH.contains("AND expires_at > NOW()"));
    }
}
