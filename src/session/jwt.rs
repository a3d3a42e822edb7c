//! Bearer credential issuance and verification.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::models::SessionSource;

/// Claims embedded in every issued credential. `ctx` only ever carries the
/// sanitized context subset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub email: String,
    /// Session registry id, so a presented credential maps back to its row.
    pub sid: String,
    pub src: SessionSource,
    #[serde(default)]
    pub ctx: Value,
    pub iat: i64,
    pub exp: i64,
}

/// HS256 signer/verifier around the deployment secret.
#[derive(Clone)]
pub struct JwtSigner {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl JwtSigner {
    #[must_use]
    pub fn new(secret: &[u8]) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
        }
    }

    /// Sign a credential for the session.
    ///
    /// # Errors
    /// Returns an error if encoding fails.
    pub fn issue(
        &self,
        user_id: Uuid,
        email: &str,
        session_id: &str,
        source: SessionSource,
        context: Value,
        issued_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<String> {
        let claims = Claims {
            sub: user_id,
            email: email.to_string(),
            sid: session_id.to_string(),
            src: source,
            ctx: context,
            iat: issued_at.timestamp(),
            exp: expires_at.timestamp(),
        };
        encode(&Header::default(), &claims, &self.encoding_key)
            .context("failed to sign session credential")
    }

    /// Verify signature and expiry; returns the claims on success.
    ///
    /// # Errors
    /// Returns an error for bad signatures, malformed tokens, or expiry.
    pub fn verify(&self, credential: &str) -> Result<Claims> {
        let data = decode::<Claims>(
            credential,
            &self.decoding_key,
            &Validation::new(jsonwebtoken::Algorithm::HS256),
        )
        .context("invalid session credential")?;
        Ok(data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn signer() -> JwtSigner {
        JwtSigner::new(b"test-secret-test-secret-test-sec")
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn issue_and_verify_round_trip() {
        let signer = signer();
        let now = Utc::now();
        let user_id = Uuid::new_v4();
        let credential = signer
            .issue(
                user_id,
                "alice@example.com",
                "1700000000000000-abcdef",
                SessionSource::MagicLink,
                json!({"locale": "eo"}),
                now,
                now + Duration::days(30),
            )
            .unwrap();

        let claims = signer.verify(&credential).unwrap();
        assert_eq!(claims.sub, user_id);
        assert_eq!(claims.email, "alice@example.com");
        assert_eq!(claims.sid, "1700000000000000-abcdef");
        assert_eq!(claims.src, SessionSource::MagicLink);
        assert_eq!(claims.ctx, json!({"locale": "eo"}));
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn verify_rejects_expired_credential() {
        let signer = signer();
        let now = Utc::now();
        let credential = signer
            .issue(
                Uuid::new_v4(),
                "alice@example.com",
                "sid",
                SessionSource::MagicLink,
                Value::Null,
                now - Duration::days(2),
                now - Duration::days(1),
            )
            .unwrap();
        assert!(signer.verify(&credential).is_err());
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn verify_rejects_wrong_key() {
        let credential = signer()
            .issue(
                Uuid::new_v4(),
                "alice@example.com",
                "sid",
                SessionSource::TotpPrimary,
                Value::Null,
                Utc::now(),
                Utc::now() + Duration::hours(1),
            )
            .unwrap();
        let other = JwtSigner::new(b"another-secret-another-secret-ab");
        assert!(other.verify(&credential).is_err());
    }
}
