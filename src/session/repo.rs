//! Database access for the session registry.

use anyhow::{Context, Result};
use sqlx::PgPool;
use tracing::Instrument;

use super::models::{Session, SWEEP_REASON};

/// Outcome of a revoke-by-id, so the service can distinguish "absent" from
/// "already revoked" (the latter is an idempotent no-op).
#[derive(Debug, Eq, PartialEq)]
pub enum RevokeOutcome {
    Revoked,
    AlreadyRevoked,
    NotFound,
}

/// Outcome of an unrevoke attempt.
#[derive(Debug, Eq, PartialEq)]
pub enum UnrevokeOutcome {
    Restored,
    Expired,
    NotFound,
}

pub struct SessionRepo;

impl SessionRepo {
    /// # Errors
    /// Returns an error if the insert fails.
    pub async fn insert(pool: &PgPool, session: &Session) -> Result<()> {
        let query = r"
            INSERT INTO user_sessions
                (id, user_id, email, credential_prefix, source, expires_at, ip, user_agent)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        sqlx::query(query)
            .bind(&session.id)
            .bind(session.user_id)
            .bind(&session.email)
            .bind(&session.credential_prefix)
            .bind(session.source.as_str())
            .bind(session.expires_at)
            .bind(&session.ip)
            .bind(&session.user_agent)
            .execute(pool)
            .instrument(span)
            .await
            .context("failed to insert session")?;
        Ok(())
    }

    /// Revoke one session by id. Revoking an already-revoked session leaves
    /// its state (reason, timestamp) untouched.
    ///
    /// # Errors
    /// Returns an error if the update fails.
    pub async fn revoke(pool: &PgPool, id: &str, reason: &str) -> Result<RevokeOutcome> {
        let query = r"
            UPDATE user_sessions
            SET revoked = TRUE,
                revoked_reason = $2,
                revoked_at = NOW()
            WHERE id = $1
              AND revoked = FALSE
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(id)
            .bind(reason)
            .execute(pool)
            .instrument(span)
            .await
            .context("failed to revoke session")?;

        if result.rows_affected() > 0 {
            return Ok(RevokeOutcome::Revoked);
        }

        let query = "SELECT 1 FROM user_sessions WHERE id = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let exists = sqlx::query_scalar::<_, i32>(query)
            .bind(id)
            .fetch_optional(pool)
            .instrument(span)
            .await
            .context("failed to check session existence")?;
        Ok(if exists.is_some() {
            RevokeOutcome::AlreadyRevoked
        } else {
            RevokeOutcome::NotFound
        })
    }

    /// Legacy path: revoke every session whose stored prefix matches the
    /// presented credential. Returns how many were revoked.
    ///
    /// # Errors
    /// Returns an error if the update fails.
    pub async fn revoke_by_prefix(pool: &PgPool, prefix: &str, reason: &str) -> Result<u64> {
        let query = r"
            UPDATE user_sessions
            SET revoked = TRUE,
                revoked_reason = $2,
                revoked_at = NOW()
            WHERE credential_prefix = $1
              AND revoked = FALSE
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(prefix)
            .bind(reason)
            .execute(pool)
            .instrument(span)
            .await
            .context("failed to revoke sessions by credential")?;
        Ok(result.rows_affected())
    }

    /// Clear the revoked flag, but never for a naturally expired session.
    ///
    /// # Errors
    /// Returns an error if the update fails.
    pub async fn unrevoke(pool: &PgPool, id: &str) -> Result<UnrevokeOutcome> {
        let query = r"
            UPDATE user_sessions
            SET revoked = FALSE,
                revoked_reason = NULL,
                revoked_at = NULL
            WHERE id = $1
              AND expires_at > NOW()
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(id)
            .execute(pool)
            .instrument(span)
            .await
            .context("failed to unrevoke session")?;

        if result.rows_affected() > 0 {
            return Ok(UnrevokeOutcome::Restored);
        }

        let query = "SELECT 1 FROM user_sessions WHERE id = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let exists = sqlx::query_scalar::<_, i32>(query)
            .bind(id)
            .fetch_optional(pool)
            .instrument(span)
            .await
            .context("failed to check session existence")?;
        Ok(if exists.is_some() {
            UnrevokeOutcome::Expired
        } else {
            UnrevokeOutcome::NotFound
        })
    }

    /// Mark every past-expiry, not-yet-revoked session revoked. Returns the
    /// number of sessions affected; running it again is a no-op.
    ///
    /// # Errors
    /// Returns an error if the update fails.
    pub async fn sweep_expired(pool: &PgPool) -> Result<u64> {
        let query = r"
            UPDATE user_sessions
            SET revoked = TRUE,
                revoked_reason = $1,
                revoked_at = NOW()
            WHERE expires_at < NOW()
              AND revoked = FALSE
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(SWEEP_REASON)
            .execute(pool)
            .instrument(span)
            .await
            .context("failed to sweep expired sessions")?;
        Ok(result.rows_affected())
    }

    /// Whether any revoked session matches the credential prefix. Used by
    /// the authorization boundary: a revoked credential is rejected even if
    /// its own expiry is still in the future.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn is_blocked(pool: &PgPool, prefix: &str) -> Result<bool> {
        let query = r"
            SELECT EXISTS(
                SELECT 1 FROM user_sessions
                WHERE credential_prefix = $1
                  AND revoked = TRUE
            )
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        sqlx::query_scalar::<_, bool>(query)
            .bind(prefix)
            .fetch_one(pool)
            .instrument(span)
            .await
            .context("failed to check credential block status")
    }

    /// Resolve a live session by credential prefix and record activity
    /// without extending the TTL.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn lookup_active(pool: &PgPool, prefix: &str) -> Result<Option<Session>> {
        let query = r"
            SELECT * FROM user_sessions
            WHERE credential_prefix = $1
              AND revoked = FALSE
              AND expires_at > NOW()
            LIMIT 1
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let session = sqlx::query_as::<_, Session>(query)
            .bind(prefix)
            .fetch_optional(pool)
            .instrument(span)
            .await
            .context("failed to lookup session")?;

        if session.is_some() {
            let query = r"
                UPDATE user_sessions
                SET last_used_at = NOW()
                WHERE credential_prefix = $1
            ";
            let span = tracing::info_span!(
                "db.query",
                db.system = "postgresql",
                db.operation = "UPDATE",
                db.statement = query
            );
            sqlx::query(query)
                .bind(prefix)
                .execute(pool)
                .instrument(span)
                .await
                .context("failed to update session last_used_at")?;
        }

        Ok(session)
    }

    /// # Errors
    /// Returns an error if the query fails.
    pub async fn list(pool: &PgPool, limit: i64, offset: i64) -> Result<Vec<Session>> {
        let query = r"
            SELECT * FROM user_sessions
            ORDER BY created_at DESC
            LIMIT $1 OFFSET $2
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        sqlx::query_as::<_, Session>(query)
            .bind(limit)
            .bind(offset)
            .fetch_all(pool)
            .instrument(span)
            .await
            .context("failed to list sessions")
    }

    /// Count active (unrevoked, unexpired) sessions for quota enforcement.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn count_active(pool: &PgPool) -> Result<i64> {
        let query = r"
            SELECT COUNT(*) FROM user_sessions
            WHERE revoked = FALSE
              AND expires_at > NOW()
        ";
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
            .context("failed to count active sessions")
    }
}
