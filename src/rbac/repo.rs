//! Database helpers for tenant and user override rows.

use anyhow::{Context, Result};
use sqlx::{PgPool, Row};
use tracing::Instrument;
use uuid::Uuid;

use super::resolver::UserOverride;

/// Fetch the replacement item list for (tenant, role slug), if any.
pub async fn tenant_role_override(
    pool: &PgPool,
    tenant_id: Uuid,
    role_slug: &str,
) -> Result<Option<Vec<String>>> {
    let query = r"
        SELECT items
        FROM tenant_role_overrides
        WHERE tenant_id = $1 AND role_slug = $2
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(tenant_id)
        .bind(role_slug)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup tenant role override")?;

    Ok(row.map(|row| row.get("items")))
}

/// Create or replace the override for (tenant, role slug). Items must already
/// be sanitized against the known universe.
pub async fn upsert_tenant_role_override(
    pool: &PgPool,
    tenant_id: Uuid,
    role_slug: &str,
    items: &[String],
) -> Result<()> {
    let query = r"
        INSERT INTO tenant_role_overrides (tenant_id, role_slug, items, updated_at)
        VALUES ($1, $2, $3, NOW())
        ON CONFLICT (tenant_id, role_slug)
        DO UPDATE SET items = EXCLUDED.items, updated_at = NOW()
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    sqlx::query(query)
        .bind(tenant_id)
        .bind(role_slug)
        .bind(items)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to upsert tenant role override")?;
    Ok(())
}

/// Remove the override so the role falls back to its static defaults.
/// Returns whether a row existed.
pub async fn delete_tenant_role_override(
    pool: &PgPool,
    tenant_id: Uuid,
    role_slug: &str,
) -> Result<bool> {
    let query = "DELETE FROM tenant_role_overrides WHERE tenant_id = $1 AND role_slug = $2";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(tenant_id)
        .bind(role_slug)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to delete tenant role override")?;
    Ok(result.rows_affected() > 0)
}

/// Fetch the grant/revoke delta for (tenant, user), if any.
pub async fn user_override(
    pool: &PgPool,
    tenant_id: Uuid,
    user_id: Uuid,
) -> Result<Option<UserOverride>> {
    let query = r"
        SELECT granted, revoked
        FROM user_permission_overrides
        WHERE tenant_id = $1 AND user_id = $2
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(tenant_id)
        .bind(user_id)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup user override")?;

    Ok(row.map(|row| UserOverride {
        granted: row.get("granted"),
        revoked: row.get("revoked"),
    }))
}

/// Create or replace the delta for (tenant, user). Both sets must already be
/// sanitized against the known universe.
pub async fn upsert_user_override(
    pool: &PgPool,
    tenant_id: Uuid,
    user_id: Uuid,
    granted: &[String],
    revoked: &[String],
) -> Result<()> {
    let query = r"
        INSERT INTO user_permission_overrides (tenant_id, user_id, granted, revoked, updated_at)
        VALUES ($1, $2, $3, $4, NOW())
        ON CONFLICT (tenant_id, user_id)
        DO UPDATE SET granted = EXCLUDED.granted, revoked = EXCLUDED.revoked, updated_at = NOW()
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    sqlx::query(query)
        .bind(tenant_id)
        .bind(user_id)
        .bind(granted)
        .bind(revoked)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to upsert user override")?;
    Ok(())
}

/// Clear the delta for (tenant, user). Returns whether a row existed.
pub async fn delete_user_override(pool: &PgPool, tenant_id: Uuid, user_id: Uuid) -> Result<bool> {
    let query = "DELETE FROM user_permission_overrides WHERE tenant_id = $1 AND user_id = $2";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(tenant_id)
        .bind(user_id)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to delete user override")?;
    Ok(result.rows_affected() > 0)
}
