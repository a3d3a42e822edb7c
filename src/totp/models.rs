//! TOTP credential records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{postgres::PgRow, FromRow, Row};
use utoipa::ToSchema;
use uuid::Uuid;

/// A user's TOTP enrollment. One credential per user; re-running setup
/// replaces any unconfirmed attempt.
#[derive(Debug, Clone)]
pub struct TotpCredential {
    pub credential_id: Uuid,
    pub user_id: Uuid,
    /// `nonce || ciphertext` of the base32 seed.
    pub secret_ciphertext: Vec<u8>,
    /// False until the first successful post-setup verification.
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}

impl<'r> FromRow<'r, PgRow> for TotpCredential {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            credential_id: row.try_get("credential_id")?,
            user_id: row.try_get("user_id")?,
            secret_ciphertext: row.try_get("secret_ciphertext")?,
            enabled: row.try_get("enabled")?,
            created_at: row.try_get("created_at")?,
            last_used_at: row.try_get("last_used_at")?,
        })
    }
}

/// Enrollment status exposed to the account surface.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TotpStatus {
    pub configured: bool,
    pub enabled: bool,
    pub last_used_at: Option<DateTime<Utc>>,
    pub backup_codes_remaining: i64,
}

/// The one-time enrollment payload. The secret is never persisted in this
/// form; callers must not log it.
#[derive(Debug)]
pub struct TotpSetup {
    pub credential_id: Uuid,
    pub secret_base32: String,
    pub otpauth_url: String,
    /// `data:image/png;base64,...` QR for enrollment apps.
    pub qr_data_url: String,
}
