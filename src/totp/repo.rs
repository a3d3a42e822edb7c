//! Database access for TOTP credentials and backup codes.

use anyhow::{Context, Result};
use sqlx::PgPool;
use tracing::Instrument;
use uuid::Uuid;

use super::models::TotpCredential;

pub struct TotpRepo;

impl TotpRepo {
    /// Store a new (disabled) credential, replacing any previous enrollment
    /// for the user in the same transaction.
    ///
    /// # Errors
    /// Returns an error if the transaction fails.
    pub async fn replace_credential(pool: &PgPool, credential: &TotpCredential) -> Result<()> {
        let mut tx = pool.begin().await.context("begin totp setup")?;

        sqlx::query("DELETE FROM totp_credentials WHERE user_id = $1")
            .bind(credential.user_id)
            .execute(&mut *tx)
            .await
            .context("failed to clear previous totp credential")?;

        let query = r"
            INSERT INTO totp_credentials
                (credential_id, user_id, secret_ciphertext, enabled)
            VALUES ($1, $2, $3, FALSE)
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        sqlx::query(query)
            .bind(credential.credential_id)
            .bind(credential.user_id)
            .bind(&credential.secret_ciphertext)
            .execute(&mut *tx)
            .instrument(span)
            .await
            .context("failed to insert totp credential")?;

        tx.commit().await.context("commit totp setup")?;
        Ok(())
    }

    /// # Errors
    /// Returns an error if the query fails.
    pub async fn get(pool: &PgPool, user_id: Uuid) -> Result<Option<TotpCredential>> {
        let query = "SELECT * FROM totp_credentials WHERE user_id = $1 LIMIT 1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        sqlx::query_as::<_, TotpCredential>(query)
            .bind(user_id)
            .fetch_optional(pool)
            .instrument(span)
            .await
            .context("failed to fetch totp credential")
    }

    /// Record a successful verification; optionally flip `enabled` (first
    /// verification after setup).
    ///
    /// # Errors
    /// Returns an error if the update fails.
    pub async fn touch_verified(pool: &PgPool, credential_id: Uuid, enable: bool) -> Result<()> {
        let query = r"
            UPDATE totp_credentials
            SET last_used_at = NOW(),
                enabled = enabled OR $2
            WHERE credential_id = $1
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(credential_id)
            .bind(enable)
            .execute(pool)
            .instrument(span)
            .await
            .context("failed to update totp credential")?;
        Ok(())
    }

    /// Remove the credential and all backup codes for the user.
    ///
    /// # Errors
    /// Returns an error if the transaction fails.
    pub async fn delete_for_user(pool: &PgPool, user_id: Uuid) -> Result<bool> {
        let mut tx = pool.begin().await.context("begin totp disable")?;

        sqlx::query("DELETE FROM totp_backup_codes WHERE user_id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .await
            .context("failed to delete backup codes")?;

        let result = sqlx::query("DELETE FROM totp_credentials WHERE user_id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .await
            .context("failed to delete totp credential")?;

        tx.commit().await.context("commit totp disable")?;
        Ok(result.rows_affected() > 0)
    }

    /// Replace the user's backup-code batch with freshly hashed codes.
    ///
    /// # Errors
    /// Returns an error if the transaction fails.
    pub async fn replace_backup_codes(
        pool: &PgPool,
        user_id: Uuid,
        code_hashes: &[String],
    ) -> Result<()> {
        let mut tx = pool.begin().await.context("begin backup code refresh")?;

        sqlx::query("DELETE FROM totp_backup_codes WHERE user_id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .await
            .context("failed to clear backup codes")?;

        let query = r"
            INSERT INTO totp_backup_codes (id, user_id, code_hash, used)
            VALUES ($1, $2, $3, FALSE)
        ";
        for hash in code_hashes {
            sqlx::query(query)
                .bind(Uuid::new_v4())
                .bind(user_id)
                .bind(hash)
                .execute(&mut *tx)
                .await
                .context("failed to insert backup code")?;
        }

        tx.commit().await.context("commit backup code refresh")?;
        Ok(())
    }

    /// Unused backup-code hashes for verification.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn fetch_unused_backup_codes(
        pool: &PgPool,
        user_id: Uuid,
    ) -> Result<Vec<(Uuid, String)>> {
        let query = r"
            SELECT id, code_hash FROM totp_backup_codes
            WHERE user_id = $1 AND used = FALSE
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let rows = sqlx::query_as::<_, (Uuid, String)>(query)
            .bind(user_id)
            .fetch_all(pool)
            .instrument(span)
            .await
            .context("failed to fetch backup codes")?;
        Ok(rows)
    }

    /// Invalidate a single backup code after use.
    ///
    /// # Errors
    /// Returns an error if the update fails.
    pub async fn mark_backup_code_used(pool: &PgPool, id: Uuid) -> Result<()> {
        let query = "UPDATE totp_backup_codes SET used = TRUE, used_at = NOW() WHERE id = $1";
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
            .context("failed to mark backup code used")?;
        Ok(())
    }

    /// # Errors
    /// Returns an error if the query fails.
    pub async fn count_unused_backup_codes(pool: &PgPool, user_id: Uuid) -> Result<i64> {
        let query = r"
            SELECT COUNT(*) FROM totp_backup_codes
            WHERE user_id = $1 AND used = FALSE
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        sqlx::query_scalar::<_, i64>(query)
            .bind(user_id)
            .fetch_one(pool)
            .instrument(span)
            .await
            .context("failed to count backup codes")
    }
}
