//! Session records and helpers.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use sqlx::{postgres::PgRow, FromRow, Row};
use uuid::Uuid;

/// Stable prefix length of the bearer credential kept in the registry.
/// Long enough to cover the JWT header plus a distinguishing slice of the
/// payload; prefix collisions only ever widen revocation, never narrow it.
pub const CREDENTIAL_PREFIX_LEN: usize = 64;

/// Reason recorded by the periodic expiry sweep.
pub const SWEEP_REASON: &str = "automatically expired";

const SESSION_ID_SUFFIX_LEN: usize = 6;
const SESSION_ID_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

const DEFAULT_SESSION_DAYS: i64 = 30;

/// Which flow produced a session.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionSource {
    /// Magic link alone.
    MagicLink,
    /// Magic link + email/SMS one-time code.
    MagicLinkOtp,
    /// Magic link + TOTP.
    MagicLinkTotp,
    /// TOTP as the primary factor, no magic link.
    TotpPrimary,
}

impl SessionSource {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MagicLink => "magic-link",
            Self::MagicLinkOtp => "magic-link-otp",
            Self::MagicLinkTotp => "magic-link-totp",
            Self::TotpPrimary => "totp",
        }
    }

    fn from_db(value: &str) -> std::result::Result<Self, sqlx::Error> {
        match value {
            "magic-link" => Ok(Self::MagicLink),
            "magic-link-otp" => Ok(Self::MagicLinkOtp),
            "magic-link-totp" => Ok(Self::MagicLinkTotp),
            "totp" => Ok(Self::TotpPrimary),
            _ => Err(sqlx::Error::Decode(Box::new(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("invalid user_sessions.source value: {value}"),
            )))),
        }
    }
}

impl std::fmt::Display for SessionSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A recorded session. `credential_prefix` is the only credential material
/// kept; the full JWT never touches storage.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub user_id: Uuid,
    pub email: String,
    pub credential_prefix: String,
    pub source: SessionSource,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub revoked: bool,
    pub revoked_reason: Option<String>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub last_used_at: Option<DateTime<Utc>>,
}

impl<'r> FromRow<'r, PgRow> for Session {
    fn from_row(row: &'r PgRow) -> std::result::Result<Self, sqlx::Error> {
        let source: String = row.try_get("source")?;
        Ok(Self {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            email: row.try_get("email")?,
            credential_prefix: row.try_get("credential_prefix")?,
            source: SessionSource::from_db(&source)?,
            created_at: row.try_get("created_at")?,
            expires_at: row.try_get("expires_at")?,
            revoked: row.try_get("revoked")?,
            revoked_reason: row.try_get("revoked_reason")?,
            revoked_at: row.try_get("revoked_at")?,
            ip: row.try_get("ip")?,
            user_agent: row.try_get("user_agent")?,
            last_used_at: row.try_get("last_used_at")?,
        })
    }
}

/// New session id: microsecond timestamp plus a short random suffix, so ids
/// sort by creation time and never collide under rapid issuance.
///
/// # Errors
/// Returns an error if the system RNG fails.
pub fn new_session_id(now: DateTime<Utc>) -> Result<String> {
    let mut raw = [0u8; SESSION_ID_SUFFIX_LEN];
    OsRng
        .try_fill_bytes(&mut raw)
        .context("failed to generate session id suffix")?;
    let suffix: String = raw
        .iter()
        .map(|byte| {
            let idx = usize::from(*byte) % SESSION_ID_ALPHABET.len();
            SESSION_ID_ALPHABET[idx] as char
        })
        .collect();
    Ok(format!("{}-{}", now.timestamp_micros(), suffix))
}

/// Stable prefix of a bearer credential for registry matching.
#[must_use]
pub fn credential_prefix(credential: &str) -> String {
    credential.chars().take(CREDENTIAL_PREFIX_LEN).collect()
}

/// Parse a session duration string: `"<N>d"`, `"<N>h"`, or `"<N>m"`.
/// Anything unparsable falls back to 30 days.
#[must_use]
pub fn parse_duration(value: &str) -> Duration {
    let trimmed = value.trim();
    let fallback = Duration::days(DEFAULT_SESSION_DAYS);
    let Some(unit) = trimmed.chars().last() else {
        return fallback;
    };
    let Ok(amount) = trimmed[..trimmed.len() - unit.len_utf8()].parse::<i64>() else {
        return fallback;
    };
    if amount <= 0 {
        return fallback;
    }
    match unit {
        'd' => Duration::days(amount),
        'h' => Duration::hours(amount),
        'm' => Duration::minutes(amount),
        _ => fallback,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_source_db_round_trip() {
        for source in [
            SessionSource::MagicLink,
            SessionSource::MagicLinkOtp,
            SessionSource::MagicLinkTotp,
            SessionSource::TotpPrimary,
        ] {
            assert_eq!(SessionSource::from_db(source.as_str()).ok(), Some(source));
        }
        assert!(SessionSource::from_db("password").is_err());
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn session_ids_are_unique_under_rapid_issuance() {
        let now = Utc::now();
        let mut seen = std::collections::HashSet::new();
        for _ in 0..100 {
            assert!(seen.insert(new_session_id(now).unwrap()));
        }
    }

    #[test]
    fn credential_prefix_is_stable_and_bounded() {
        let credential = "x".repeat(500);
        let prefix = credential_prefix(&credential);
        assert_eq!(prefix.len(), CREDENTIAL_PREFIX_LEN);
        assert_eq!(prefix, credential_prefix(&credential));

        let short = "abc";
        assert_eq!(credential_prefix(short), "abc");
    }

    #[test]
    fn parse_duration_units_and_fallback() {
        assert_eq!(parse_duration("30d"), Duration::days(30));
        assert_eq!(parse_duration("12h"), Duration::hours(12));
        assert_eq!(parse_duration("45m"), Duration::minutes(45));
        assert_eq!(parse_duration("nonsense"), Duration::days(30));
        assert_eq!(parse_duration("0d"), Duration::days(30));
        assert_eq!(parse_duration("-3h"), Duration::days(30));
        assert_eq!(parse_duration(""), Duration::days(30));
        assert_eq!(parse_duration("10w"), Duration::days(30));
    }
}
