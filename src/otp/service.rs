//! One-time code issuance and verification.

use chrono::{Duration, Utc};
use serde_json::Value;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::{
    crypto,
    error::{AuthError, Result},
    settings::Settings,
};

use super::{
    models::{OtpCode, OtpType},
    repo::OtpRepo,
};

/// How many recent unused codes a verification scans. The scan is O(N) per
/// verification; kept small and bounded on purpose.
const VERIFY_LOOKBACK: i64 = 5;

#[derive(Clone)]
pub struct OtpService {
    pool: PgPool,
    pepper: Arc<[u8]>,
    settings: Settings,
}

impl OtpService {
    #[must_use]
    pub fn new(pool: PgPool, pepper: Arc<[u8]>, settings: Settings) -> Self {
        Self {
            pool,
            pepper,
            settings,
        }
    }

    /// Create a code for delivery. The plaintext is returned exactly once;
    /// storage keeps only the peppered hash.
    ///
    /// # Errors
    /// Returns a storage error if persisting fails.
    pub async fn create(
        &self,
        email: &str,
        otp_type: OtpType,
        token_id: Option<Uuid>,
        delivery: Option<Value>,
    ) -> Result<(String, OtpCode)> {
        let code = crypto::generate_numeric_code(self.settings.otp_digits)?;
        let record = OtpCode {
            id: Uuid::new_v4(),
            email: email.to_string(),
            code_hash: crypto::hash_peppered(&code, &self.pepper),
            otp_type,
            used: false,
            attempts: 0,
            max_attempts: self.settings.otp_max_attempts,
            expires_at: Utc::now() + Duration::seconds(self.settings.otp_ttl_seconds),
            token_id,
            created_at: Utc::now(),
            delivery,
        };
        OtpRepo::insert(&self.pool, &record).await?;
        info!(email = %mask_email(email), otp_type = %otp_type, "one-time code issued");
        Ok((code, record))
    }

    /// Verify a submitted code.
    ///
    /// Scans the most recent unused codes for the email + channel and
    /// compares each candidate hash in constant time. A matched code is
    /// always marked used, on success and on terminal failure, so it can
    /// never be replayed. A miss mutates nothing; this keeps verification
    /// from acting as an oracle over many rows and is an accepted tradeoff.
    ///
    /// # Errors
    /// `OtpExpired` when the matched code is past expiry; `OtpMaxAttempts`
    /// when its attempt limit is exhausted; `OtpInvalid` when nothing
    /// matches.
    pub async fn verify(&self, email: &str, code: &str, otp_type: OtpType) -> Result<OtpCode> {
        let code = code.trim();
        if code.is_empty() {
            return Err(AuthError::OtpInvalid);
        }

        let candidate_hash = crypto::hash_peppered(code, &self.pepper);
        let candidates =
            OtpRepo::fetch_recent_unused(&self.pool, email, otp_type, VERIFY_LOOKBACK).await?;
        let now = Utc::now();

        for candidate in candidates {
            if !crypto::timing_safe_eq(&candidate_hash, &candidate.code_hash) {
                continue;
            }
            if candidate.expired(now) {
                OtpRepo::mark_used(&self.pool, candidate.id).await?;
                return Err(AuthError::OtpExpired);
            }
            if candidate.attempts_exhausted() {
                OtpRepo::mark_used(&self.pool, candidate.id).await?;
                return Err(AuthError::OtpMaxAttempts);
            }
            OtpRepo::mark_used(&self.pool, candidate.id).await?;
            info!(email = %mask_email(email), "one-time code verified");
            return Ok(candidate);
        }

        Err(AuthError::OtpInvalid)
    }

    /// Re-issue a code for the email, carrying over the magic-link token
    /// reference of the most recent outstanding challenge (if any).
    ///
    /// # Errors
    /// Returns a storage error if persisting fails.
    pub async fn resend(&self, email: &str, otp_type: OtpType) -> Result<(String, OtpCode)> {
        let token_id = OtpRepo::fetch_recent_unused(&self.pool, email, otp_type, 1)
            .await?
            .into_iter()
            .next()
            .and_then(|code| code.token_id);
        self.create(email, otp_type, token_id, None).await
    }

    /// Periodic purge of expired codes.
    ///
    /// # Errors
    /// Returns a storage error if the delete fails.
    pub async fn purge_expired(&self) -> Result<u64> {
        Ok(OtpRepo::purge_expired(&self.pool).await?)
    }
}

/// Mask an email for logs: `j***@example.com`.
fn mask_email(email: &str) -> String {
    match email.split_once('@') {
        Some((local, domain)) => {
            let first = local.chars().next().unwrap_or('*');
            format!("{first}***@{domain}")
        }
        None => "***".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result as AnyResult;
    use sqlx::postgres::PgPoolOptions;

    fn lazy_service() -> AnyResult<OtpService> {
        let pool = PgPoolOptions::new().connect_lazy("postgres://postgres@localhost/postgres")?;
        Ok(OtpService::new(
            pool,
            Arc::from(b"pepper".as_slice()),
            Settings::default(),
        ))
    }

    #[test]
    fn mask_email_keeps_first_char_and_domain() {
        assert_eq!(mask_email("alice@example.com"), "a***@example.com");
        assert_eq!(mask_email("not-an-email"), "***");
    }

    #[tokio::test]
    async fn verify_rejects_empty_code_without_touching_storage() -> AnyResult<()> {
        let service = lazy_service()?;
        let result = service
            .verify("alice@example.com", "  ", OtpType::Email)
            .await;
        assert!(matches!(result, Err(AuthError::OtpInvalid)));
        Ok(())
    }
}
