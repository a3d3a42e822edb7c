//! Database access for windowed counters.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{PgPool, Row};
use tracing::Instrument;
use utoipa::ToSchema;

/// Counter state after a request has been counted.
#[derive(Debug)]
pub struct WindowState {
    pub count: i64,
    pub window_start: DateTime<Utc>,
}

/// Per-category reporting row for the admin surface.
#[derive(Debug, Serialize, ToSchema)]
pub struct RateLimitStat {
    pub category: String,
    pub entries: i64,
    pub total_count: i64,
}

pub struct RateLimitRepo;

impl RateLimitRepo {
    /// Count a request in one atomic statement: reset the window if it has
    /// elapsed, increment otherwise. Safe under concurrent requests for the
    /// same key; every caller sees a consistent post-increment state.
    ///
    /// # Errors
    /// Returns an error if the upsert fails.
    pub async fn record(
        pool: &PgPool,
        category: &str,
        identifier: &str,
        window_seconds: i64,
    ) -> Result<WindowState> {
        let query = r"
            INSERT INTO rate_limits (category, identifier, count, window_start, last_request)
            VALUES ($1, $2, 1, NOW(), NOW())
            ON CONFLICT (category, identifier) DO UPDATE SET
                count = CASE
                    WHEN NOW() - rate_limits.window_start > ($3 * INTERVAL '1 second')
                    THEN 1
                    ELSE rate_limits.count + 1
                END,
                window_start = CASE
                    WHEN NOW() - rate_limits.window_start > ($3 * INTERVAL '1 second')
                    THEN NOW()
                    ELSE rate_limits.window_start
                END,
                last_request = NOW()
            RETURNING count, window_start
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(category)
            .bind(identifier)
            .bind(window_seconds)
            .fetch_one(pool)
            .instrument(span)
            .await
            .context("failed to record rate limit request")?;
        Ok(WindowState {
            count: row.get::<i64, _>("count"),
            window_start: row.get("window_start"),
        })
    }

    /// Drop counters whose window has fully elapsed.
    ///
    /// # Errors
    /// Returns an error if the delete fails.
    pub async fn cleanup_expired(pool: &PgPool, window_seconds: i64) -> Result<u64> {
        let query = r"
            DELETE FROM rate_limits
            WHERE NOW() - window_start > ($1 * INTERVAL '1 second')
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(window_seconds)
            .execute(pool)
            .instrument(span)
            .await
            .context("failed to cleanup rate limit entries")?;
        Ok(result.rows_affected())
    }

    /// Per-category counter totals for reporting.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn stats(pool: &PgPool) -> Result<Vec<RateLimitStat>> {
        let query = r"
            SELECT category,
                   COUNT(*) AS entries,
                   COALESCE(SUM(count), 0)::bigint AS total_count
            FROM rate_limits
            GROUP BY category
            ORDER BY category
        ";
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
            .context("failed to fetch rate limit stats")?;
        Ok(rows
            .into_iter()
            .map(|row| RateLimitStat {
                category: row.get("category"),
                entries: row.get("entries"),
                total_count: row.get("total_count"),
            })
            .collect())
    }

    /// Admin reset: clear every counter.
    ///
    /// # Errors
    /// Returns an error if the delete fails.
    pub async fn reset(pool: &PgPool) -> Result<u64> {
        let query = "DELETE FROM rate_limits";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .execute(pool)
            .instrument(span)
            .await
            .context("failed to reset rate limits")?;
        Ok(result.rows_affected())
    }
}
