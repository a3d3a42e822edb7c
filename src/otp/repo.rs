//! Database access for one-time codes.

use anyhow::{Context, Result};
use sqlx::PgPool;
use tracing::Instrument;
use uuid::Uuid;

use super::models::{OtpCode, OtpType};

pub struct OtpRepo;

impl OtpRepo {
    /// # Errors
    /// Returns an error if the insert fails.
    pub async fn insert(pool: &PgPool, code: &OtpCode) -> Result<()> {
        let query = r"
            INSERT INTO otp_codes
                (id, email, code_hash, otp_type, used, attempts, max_attempts,
                 expires_at, token_id, delivery)
            VALUES ($1, $2, $3, $4, FALSE, 0, $5, $6, $7, $8)
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        sqlx::query(query)
            .bind(code.id)
            .bind(&code.email)
            .bind(&code.code_hash)
            .bind(code.otp_type.as_str())
            .bind(code.max_attempts)
            .bind(code.expires_at)
            .bind(code.token_id)
            .bind(&code.delivery)
            .execute(pool)
            .instrument(span)
            .await
            .context("failed to insert one-time code")?;
        Ok(())
    }

    /// Most recent unused codes for the email + channel, bounded lookback.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn fetch_recent_unused(
        pool: &PgPool,
        email: &str,
        otp_type: OtpType,
        limit: i64,
    ) -> Result<Vec<OtpCode>> {
        let query = r"
            SELECT * FROM otp_codes
            WHERE email = $1
              AND otp_type = $2
              AND used = FALSE
            ORDER BY created_at DESC
            LIMIT $3
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        sqlx::query_as::<_, OtpCode>(query)
            .bind(email)
            .bind(otp_type.as_str())
            .bind(limit)
            .fetch_all(pool)
            .instrument(span)
            .await
            .context("failed to fetch one-time codes")
    }

    /// Terminal transition: mark a code used and count the verification
    /// attempt, in one atomic statement. Applied on success and on terminal
    /// failure alike; codes are single-use either way.
    ///
    /// # Errors
    /// Returns an error if the update fails.
    pub async fn mark_used(pool: &PgPool, id: Uuid) -> Result<()> {
        let query = r"
            UPDATE otp_codes
            SET used = TRUE,
                attempts = attempts + 1
            WHERE id = $1
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
            .context("failed to mark one-time code used")?;
        Ok(())
    }

    /// Periodic cleanup of codes past expiry.
    ///
    /// # Errors
    /// Returns an error if the delete fails.
    pub async fn purge_expired(pool: &PgPool) -> Result<u64> {
        let query = "DELETE FROM otp_codes WHERE expires_at < NOW()";
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
            .context("failed to purge expired one-time codes")?;
        Ok(result.rows_affected())
    }
}
