//! Database access for login tokens.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::PgPool;
use tracing::Instrument;
use uuid::Uuid;

use super::models::LoginToken;

pub struct TokenRepo;

impl TokenRepo {
    /// Persist a freshly issued token (hash + salt, never the secret).
    ///
    /// # Errors
    /// Returns an error if the insert fails.
    pub async fn insert(pool: &PgPool, token: &LoginToken) -> Result<()> {
        let query = r"
            INSERT INTO login_tokens
                (id, email, user_id, token_hash, salt, active, expires_at, ip, user_agent, context)
            VALUES ($1, $2, $3, $4, $5, TRUE, $6, $7, $8, $9)
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        sqlx::query(query)
            .bind(token.id)
            .bind(&token.email)
            .bind(token.user_id)
            .bind(&token.token_hash)
            .bind(&token.salt)
            .bind(token.expires_at)
            .bind(&token.ip)
            .bind(&token.user_agent)
            .bind(&token.context)
            .execute(pool)
            .instrument(span)
            .await
            .context("failed to insert login token")?;
        Ok(())
    }

    /// Fetch every active token for the validation scan. Expiry is evaluated
    /// by the caller so the stays-valid policy can apply.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn fetch_active_candidates(pool: &PgPool) -> Result<Vec<LoginToken>> {
        let query = r"
            SELECT * FROM login_tokens
            WHERE active = TRUE
            ORDER BY created_at DESC
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        sqlx::query_as::<_, LoginToken>(query)
            .fetch_all(pool)
            .instrument(span)
            .await
            .context("failed to fetch token candidates")
    }

    /// # Errors
    /// Returns an error if the query fails.
    pub async fn get(pool: &PgPool, id: Uuid) -> Result<Option<LoginToken>> {
        let query = "SELECT * FROM login_tokens WHERE id = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        sqlx::query_as::<_, LoginToken>(query)
            .bind(id)
            .fetch_optional(pool)
            .instrument(span)
            .await
            .context("failed to fetch login token")
    }

    /// Consume a token in a single atomic statement: deactivate unless the
    /// stays-valid policy applies, and record login info when configured.
    ///
    /// # Errors
    /// Returns an error if the update fails.
    pub async fn consume(
        pool: &PgPool,
        id: Uuid,
        deactivate: bool,
        login_info: Option<(Option<&str>, Option<&str>)>,
    ) -> Result<()> {
        let query = r"
            UPDATE login_tokens
            SET active = CASE WHEN $2 THEN FALSE ELSE active END,
                last_used_at = CASE WHEN $3 THEN NOW() ELSE last_used_at END,
                ip = CASE WHEN $3 THEN $4 ELSE ip END,
                user_agent = CASE WHEN $3 THEN $5 ELSE user_agent END
            WHERE id = $1
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        let (ip, user_agent) = login_info.unwrap_or((None, None));
        sqlx::query(query)
            .bind(id)
            .bind(deactivate)
            .bind(login_info.is_some())
            .bind(ip)
            .bind(user_agent)
            .execute(pool)
            .instrument(span)
            .await
            .context("failed to consume login token")?;
        Ok(())
    }

    /// Administrative activate/deactivate. Returns false when no such token.
    ///
    /// # Errors
    /// Returns an error if the update fails.
    pub async fn set_active(pool: &PgPool, id: Uuid, active: bool) -> Result<bool> {
        let query = "UPDATE login_tokens SET active = $2 WHERE id = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(id)
            .bind(active)
            .execute(pool)
            .instrument(span)
            .await
            .context("failed to update token active flag")?;
        Ok(result.rows_affected() > 0)
    }

    /// Extend expiry: `max(now, expires_at) + days`, computed in one
    /// statement so concurrent extends cannot interleave.
    ///
    /// # Errors
    /// Returns an error if the update fails.
    pub async fn extend(pool: &PgPool, id: Uuid, days: i64) -> Result<Option<DateTime<Utc>>> {
        let query = r"
            UPDATE login_tokens
            SET expires_at = GREATEST(NOW(), expires_at) + ($2 * INTERVAL '1 day')
            WHERE id = $1
            RETURNING expires_at
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        let row = sqlx::query_scalar::<_, DateTime<Utc>>(query)
            .bind(id)
            .bind(days)
            .fetch_optional(pool)
            .instrument(span)
            .await
            .context("failed to extend login token")?;
        Ok(row)
    }

    /// Merge challenge markers into the token context.
    ///
    /// # Errors
    /// Returns an error if the update fails.
    pub async fn merge_context(pool: &PgPool, id: Uuid, patch: &Value) -> Result<()> {
        let query = r"
            UPDATE login_tokens
            SET context = COALESCE(context, '{}'::jsonb) || $2::jsonb
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
            .bind(patch)
            .execute(pool)
            .instrument(span)
            .await
            .context("failed to update token context")?;
        Ok(())
    }

    /// # Errors
    /// Returns an error if the query fails.
    pub async fn list(pool: &PgPool, limit: i64, offset: i64) -> Result<Vec<LoginToken>> {
        let query = r"
            SELECT * FROM login_tokens
            ORDER BY created_at DESC
            LIMIT $1 OFFSET $2
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        sqlx::query_as::<_, LoginToken>(query)
            .bind(limit)
            .bind(offset)
            .fetch_all(pool)
            .instrument(span)
            .await
            .context("failed to list login tokens")
    }

    /// # Errors
    /// Returns an error if the delete fails.
    pub async fn delete(pool: &PgPool, id: Uuid) -> Result<bool> {
        let query = "DELETE FROM login_tokens WHERE id = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(id)
            .execute(pool)
            .instrument(span)
            .await
            .context("failed to delete login token")?;
        Ok(result.rows_affected() > 0)
    }

    /// Administrative cleanup: physically remove tokens past expiry.
    /// Normal validation never deletes; it only evaluates expiry lazily.
    ///
    /// # Errors
    /// Returns an error if the delete fails.
    pub async fn purge_expired(pool: &PgPool) -> Result<u64> {
        let query = "DELETE FROM login_tokens WHERE expires_at < NOW() AND active = FALSE";
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
            .context("failed to purge expired tokens")?;
        Ok(result.rows_affected())
    }

    /// Count active tokens for quota enforcement.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn count_active(pool: &PgPool) -> Result<i64> {
        let query = "SELECT COUNT(*) FROM login_tokens WHERE active = TRUE";
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
            .context("failed to count active tokens")
    }
}
