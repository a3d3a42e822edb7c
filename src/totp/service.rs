//! TOTP enrollment and verification on top of the repo.

use anyhow::anyhow;
use sqlx::PgPool;
use std::sync::Arc;
use totp_rs::{Algorithm, Secret, TOTP};
use tracing::info;
use uuid::Uuid;

use crate::{
    crypto,
    error::{AuthError, Result},
};

use super::{
    backup::{verify_backup_code, BackupCodeBatch},
    models::{TotpCredential, TotpSetup, TotpStatus},
    repo::TotpRepo,
};

const TOTP_DIGITS: usize = 6;
/// ±1 time step of tolerance for clock drift.
const TOTP_SKEW: u8 = 1;
const TOTP_STEP_SECONDS: u64 = 30;

#[derive(Clone)]
pub struct TotpService {
    pool: PgPool,
    encryption_key: Arc<[u8]>,
    backup_pepper: Arc<[u8]>,
    issuer: String,
}

impl TotpService {
    #[must_use]
    pub fn new(
        pool: PgPool,
        encryption_key: Arc<[u8]>,
        backup_pepper: Arc<[u8]>,
        issuer: String,
    ) -> Self {
        Self {
            pool,
            encryption_key,
            backup_pepper,
            issuer,
        }
    }

    /// Begin enrollment: generate a secret, encrypt it, store it disabled,
    /// and return the plaintext secret + QR exactly once.
    ///
    /// # Errors
    /// Returns a storage error if persisting fails.
    pub async fn setup(&self, user_id: Uuid, email: &str) -> Result<TotpSetup> {
        let secret = Secret::generate_secret();
        let secret_bytes = secret
            .to_bytes()
            .map_err(|e| AuthError::Storage(anyhow!("secret generation error: {e}")))?;

        let credential_id = Uuid::new_v4();
        let ciphertext = crypto::encrypt_secret(
            &self.encryption_key,
            &secret_bytes,
            &aad(user_id, credential_id),
        )?;

        TotpRepo::replace_credential(
            &self.pool,
            &TotpCredential {
                credential_id,
                user_id,
                secret_ciphertext: ciphertext,
                enabled: false,
                created_at: chrono::Utc::now(),
                last_used_at: None,
            },
        )
        .await?;

        let totp = build_totp(secret_bytes, &self.issuer, email)?;
        let qr = totp
            .get_qr_base64()
            .map_err(|e| AuthError::Storage(anyhow!("qr generation error: {e}")))?;

        info!(%user_id, "totp enrollment started");
        Ok(TotpSetup {
            credential_id,
            secret_base32: totp.get_secret_base32(),
            otpauth_url: totp.get_url(),
            qr_data_url: format!("data:image/png;base64,{qr}"),
        })
    }

    /// Verify a time-step code with ±1 step tolerance.
    ///
    /// With `enable_after_verify`, a successful check flips the credential
    /// enabled (the post-setup confirmation). Without it, the credential
    /// must already be enabled; a half-enrolled authenticator never
    /// satisfies a login challenge.
    ///
    /// # Errors
    /// `TotpNotConfigured` when no usable credential exists; `TotpInvalid`
    /// when the code does not match.
    pub async fn verify(&self, user_id: Uuid, code: &str, enable_after_verify: bool) -> Result<()> {
        let credential = TotpRepo::get(&self.pool, user_id)
            .await?
            .ok_or(AuthError::TotpNotConfigured)?;
        if !credential.enabled && !enable_after_verify {
            return Err(AuthError::TotpNotConfigured);
        }

        let secret_bytes = crypto::decrypt_secret(
            &self.encryption_key,
            &credential.secret_ciphertext,
            &aad(user_id, credential.credential_id),
        )?;
        let totp = build_totp(secret_bytes, &self.issuer, "account")?;

        let valid = totp.check_current(code.trim()).unwrap_or(false);
        if !valid {
            return Err(AuthError::TotpInvalid);
        }

        let enable = enable_after_verify && !credential.enabled;
        TotpRepo::touch_verified(&self.pool, credential.credential_id, enable).await?;
        if enable {
            info!(%user_id, "totp enabled after first verification");
        }
        Ok(())
    }

    /// # Errors
    /// `TotpNotConfigured` when there is nothing to disable.
    pub async fn disable(&self, user_id: Uuid) -> Result<()> {
        if TotpRepo::delete_for_user(&self.pool, user_id).await? {
            info!(%user_id, "totp disabled");
            Ok(())
        } else {
            Err(AuthError::TotpNotConfigured)
        }
    }

    /// # Errors
    /// Returns a storage error if the lookup fails.
    pub async fn status(&self, user_id: Uuid) -> Result<TotpStatus> {
        let credential = TotpRepo::get(&self.pool, user_id).await?;
        let backup_codes_remaining = match &credential {
            Some(_) => TotpRepo::count_unused_backup_codes(&self.pool, user_id).await?,
            None => 0,
        };
        Ok(TotpStatus {
            configured: credential.is_some(),
            enabled: credential.as_ref().is_some_and(|c| c.enabled),
            last_used_at: credential.and_then(|c| c.last_used_at),
            backup_codes_remaining,
        })
    }

    /// Whether the user has a fully enabled authenticator.
    ///
    /// # Errors
    /// Returns a storage error if the lookup fails.
    pub async fn is_enabled(&self, user_id: Uuid) -> Result<bool> {
        Ok(TotpRepo::get(&self.pool, user_id)
            .await?
            .is_some_and(|c| c.enabled))
    }

    /// Generate a fresh batch of ten single-use backup codes, replacing any
    /// previous batch. Only hashes are persisted; the plaintext batch is
    /// returned exactly once.
    ///
    /// # Errors
    /// `TotpNotConfigured` unless an enabled credential exists.
    pub async fn generate_backup_codes(&self, user_id: Uuid) -> Result<Vec<String>> {
        if !self.is_enabled(user_id).await? {
            return Err(AuthError::TotpNotConfigured);
        }
        let batch = BackupCodeBatch::generate(&self.backup_pepper)?;
        TotpRepo::replace_backup_codes(&self.pool, user_id, &batch.code_hashes).await?;
        info!(%user_id, "backup codes regenerated");
        Ok(batch.codes)
    }

    /// Verify and invalidate a single backup code.
    ///
    /// # Errors
    /// `TotpNotConfigured` without an enabled credential; `TotpInvalid` when
    /// no unused code matches.
    pub async fn consume_backup_code(&self, user_id: Uuid, code: &str) -> Result<()> {
        if !self.is_enabled(user_id).await? {
            return Err(AuthError::TotpNotConfigured);
        }
        let candidates = TotpRepo::fetch_unused_backup_codes(&self.pool, user_id).await?;
        for (id, stored_hash) in candidates {
            if verify_backup_code(code, &stored_hash, &self.backup_pepper)? {
                TotpRepo::mark_backup_code_used(&self.pool, id).await?;
                info!(%user_id, "backup code consumed");
                return Ok(());
            }
        }
        Err(AuthError::TotpInvalid)
    }
}

/// AAD binds a ciphertext to its owning user and credential, so rows cannot
/// be swapped between users.
fn aad(user_id: Uuid, credential_id: Uuid) -> Vec<u8> {
    format!("totp-secret:v1|{user_id}|{credential_id}").into_bytes()
}

fn build_totp(secret_bytes: Vec<u8>, issuer: &str, account: &str) -> Result<TOTP> {
    TOTP::new(
        Algorithm::SHA1,
        TOTP_DIGITS,
        TOTP_SKEW,
        TOTP_STEP_SECONDS,
        secret_bytes,
        Some(issuer.to_string()),
        account.to_string(),
    )
    .map_err(|e| AuthError::Storage(anyhow!("totp init error: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aad_is_stable_per_owner() {
        let user = Uuid::new_v4();
        let credential = Uuid::new_v4();
        assert_eq!(aad(user, credential), aad(user, credential));
        assert_ne!(aad(user, credential), aad(user, Uuid::new_v4()));
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn build_totp_generates_checkable_codes() {
        let secret = Secret::generate_secret().to_bytes().unwrap();
        let totp = build_totp(secret, "sesamo", "alice@example.com").unwrap();
        let code = totp.generate_current().unwrap();
        assert!(totp.check_current(&code).unwrap());
        assert!(!totp.check_current("000000").unwrap() || code == "000000");
        assert!(totp.get_url().starts_with("otpauth://totp/"));
    }
}
