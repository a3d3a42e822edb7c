//! One-time code records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{postgres::PgRow, FromRow, Row};
use uuid::Uuid;

/// Delivery channel the code was issued for. Verification only matches codes
/// of the same type, so an emailed code cannot satisfy an SMS challenge.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OtpType {
    Email,
    Sms,
}

impl OtpType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Sms => "sms",
        }
    }

    fn from_db(value: &str) -> Result<Self, sqlx::Error> {
        match value {
            "email" => Ok(Self::Email),
            "sms" => Ok(Self::Sms),
            _ => Err(sqlx::Error::Decode(Box::new(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("invalid otp_codes.otp_type value: {value}"),
            )))),
        }
    }
}

impl std::fmt::Display for OtpType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A one-time code at rest. Only the peppered hash is stored; the code is
/// irrecoverable once delivered.
#[derive(Debug, Clone)]
pub struct OtpCode {
    pub id: Uuid,
    pub email: String,
    pub code_hash: Vec<u8>,
    pub otp_type: OtpType,
    pub used: bool,
    pub attempts: i32,
    pub max_attempts: i32,
    pub expires_at: DateTime<Utc>,
    /// Magic-link token this challenge belongs to, when raised mid-login.
    pub token_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub delivery: Option<Value>,
}

impl<'r> FromRow<'r, PgRow> for OtpCode {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let otp_type: String = row.try_get("otp_type")?;
        Ok(Self {
            id: row.try_get("id")?,
            email: row.try_get("email")?,
            code_hash: row.try_get("code_hash")?,
            otp_type: OtpType::from_db(&otp_type)?,
            used: row.try_get("used")?,
            attempts: row.try_get("attempts")?,
            max_attempts: row.try_get("max_attempts")?,
            expires_at: row.try_get("expires_at")?,
            token_id: row.try_get("token_id")?,
            created_at: row.try_get("created_at")?,
            delivery: row.try_get("delivery")?,
        })
    }
}

impl OtpCode {
    #[must_use]
    pub fn expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    #[must_use]
    pub fn attempts_exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn otp_type_round_trips_through_db_text() {
        assert_eq!(OtpType::Email.as_str(), "email");
        assert_eq!(OtpType::Sms.to_string(), "sms");
    }

    #[test]
    fn expiry_and_attempt_checks() {
        let now = Utc::now();
        let code = OtpCode {
            id: Uuid::new_v4(),
            email: "alice@example.com".to_string(),
            code_hash: vec![0u8; 32],
            otp_type: OtpType::Email,
            used: false,
            attempts: 4,
            max_attempts: 5,
            expires_at: now + chrono::Duration::minutes(5),
            token_id: None,
            created_at: now,
            delivery: None,
        };
        assert!(!code.expired(now));
        assert!(code.expired(now + chrono::Duration::minutes(6)));
        assert!(!code.attempts_exhausted());

        let exhausted = OtpCode {
            attempts: 5,
            ..code
        };
        assert!(exhausted.attempts_exhausted());
    }
}
