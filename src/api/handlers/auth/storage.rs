//! Database helpers shared by the auth and admin handlers.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::Instrument;
use uuid::Uuid;

/// A banned source address.
#[derive(Debug, Clone, serde::Serialize, utoipa::ToSchema)]
pub struct BannedIp {
    pub ip: String,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Whether the user may use the admin surface.
///
/// # Errors
/// Returns an error if the query fails.
pub(crate) async fn operator_enabled(pool: &PgPool, user_id: Uuid) -> Result<bool> {
    let query = "SELECT operator FROM users WHERE id = $1";
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
        .context("failed to check operator flag")?;
    Ok(row.is_some_and(|row| row.get::<bool, _>("operator")))
}

/// Whether requests from this address are banned.
///
/// # Errors
/// Returns an error if the query fails.
pub(crate) async fn ip_banned(pool: &PgPool, ip: &str) -> Result<bool> {
    let query = "SELECT EXISTS(SELECT 1 FROM banned_ips WHERE ip = $1)";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    sqlx::query_scalar::<_, bool>(query)
        .bind(ip)
        .fetch_one(pool)
        .instrument(span)
        .await
        .context("failed to check ip ban")
}

/// # Errors
/// Returns an error if the insert fails.
pub(crate) async fn ban_ip(pool: &PgPool, ip: &str, reason: Option<&str>) -> Result<()> {
    let query = r"
        INSERT INTO banned_ips (ip, reason)
        VALUES ($1, $2)
        ON CONFLICT (ip) DO UPDATE SET reason = EXCLUDED.reason
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    sqlx::query(query)
        .bind(ip)
        .bind(reason)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to ban ip")?;
    Ok(())
}

/// Returns false when the address was not banned.
///
/// # Errors
/// Returns an error if the delete fails.
pub(crate) async fn unban_ip(pool: &PgPool, ip: &str) -> Result<bool> {
    let query = "DELETE FROM banned_ips WHERE ip = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(ip)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to unban ip")?;
    Ok(result.rows_affected() > 0)
}

/// # Errors
/// Returns an error if the query fails.
pub(crate) async fn list_bans(pool: &PgPool) -> Result<Vec<BannedIp>> {
    let query = "SELECT ip, reason, created_at FROM banned_ips ORDER BY created_at DESC";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let rows = sqlx::query(query)
        .fetch_all(pool)
        .instrument(span)
        .await
        .context("failed to list banned ips")?;
    Ok(rows
        .into_iter()
        .map(|row| BannedIp {
            ip: row.get("ip"),
            reason: row.get("reason"),
            created_at: row.get("created_at"),
        })
        .collect())
}

/// Current ban-list size, for quota enforcement.
///
/// # Errors
/// Returns an error if the query fails.
pub(crate) async fn count_bans(pool: &PgPool) -> Result<i64> {
    let query = "SELECT COUNT(*) FROM banned_ips";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    sqlx::query_scalar::<_, i64>(query)
        .fetch_one(pool)
        .instrument(span)
        .await
        .context("failed to count banned ips")
}

/// Load the raw settings bag, if one was persisted.
///
/// # Errors
/// Returns an error if the query fails.
pub async fn load_settings_value(pool: &PgPool) -> Result<Option<serde_json::Value>> {
    let query = "SELECT data FROM settings ORDER BY updated_at DESC LIMIT 1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to load settings")?;
    Ok(row.map(|row| row.get("data")))
}
