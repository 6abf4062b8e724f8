//! Database helpers for the impersonation audit trail.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::Instrument;
use uuid::Uuid;

pub(super) struct StatusRow {
    pub(super) admin_user_id: Uuid,
    pub(super) admin_email: String,
    pub(super) target_user_id: Uuid,
    pub(super) target_email: String,
    pub(super) active: bool,
}

pub(super) async fn insert(
    pool: &PgPool,
    admin_user_id: Uuid,
    admin_session_id: Uuid,
    target_user_id: Uuid,
    reason: Option<&str>,
    duration_seconds: i64,
) -> Result<(Uuid, DateTime<Utc>)> {
    let query = r"
        INSERT INTO impersonation_sessions
            (admin_user_id, admin_session_id, target_user_id, reason, expires_at)
        VALUES ($1, $2, $3, $4, NOW() + ($5 * INTERVAL '1 second'))
        RETURNING id, expires_at
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(admin_user_id)
        .bind(admin_session_id)
        .bind(target_user_id)
        .bind(reason)
        .bind(duration_seconds)
        .fetch_one(pool)
        .instrument(span)
        .await
        .context("failed to insert impersonation session")?;

    Ok((row.get("id"), row.get("expires_at")))
}

pub(super) async fn find_status(pool: &PgPool, id: Uuid) -> Result<Option<StatusRow>> {
    let query = r"
        SELECT imp.admin_user_id,
               admins.email AS admin_email,
               imp.target_user_id,
               targets.email AS target_email,
               (imp.ended_at IS NULL AND imp.expires_at > NOW()) AS active
        FROM impersonation_sessions imp
        JOIN users admins ON admins.id = imp.admin_user_id
        JOIN users targets ON targets.id = imp.target_user_id
        WHERE imp.id = $1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(id)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup impersonation session")?;

    Ok(row.map(|row| StatusRow {
        admin_user_id: row.get("admin_user_id"),
        admin_email: row.get("admin_email"),
        target_user_id: row.get("target_user_id"),
        target_email: row.get("target_email"),
        active: row.get("active"),
    }))
}

/// Mark the window ended. Ending an already-ended window changes nothing.
pub(super) async fn end(pool: &PgPool, id: Uuid) -> Result<()> {
    let query = r"
        UPDATE impersonation_sessions
        SET ended_at = NOW()
        WHERE id = $1 AND ended_at IS NULL
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(id)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to end impersonation session")?;
    Ok(())
}
