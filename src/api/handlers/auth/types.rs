//! Request/response types for auth endpoints.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct SendLinkRequest {
    pub email: String,
    /// Free-form context echoed (filtered) onto the token; `ttl` (hours)
    /// overrides the configured token expiry.
    #[serde(default)]
    pub context: Option<Value>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct SendLinkResponse {
    pub sent: bool,
}

#[derive(ToSchema, Deserialize, Debug)]
pub struct LoginQuery {
    pub token: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct UserInfo {
    pub id: Uuid,
    pub email: String,
    pub username: String,
}

/// Successful login: the bearer credential plus its session metadata.
#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct LoginResponse {
    pub jwt: String,
    pub user: UserInfo,
    pub expires_at: DateTime<Utc>,
    pub context: Value,
}

/// Challenge response: a second factor is required before any session
/// exists.
#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ChallengeResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requires_otp: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requires_totp: Option<bool>,
    /// Reference to the pending login token.
    pub token_id: Uuid,
    pub email: String,
    /// Enrolled user for a TOTP challenge.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<Uuid>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct OtpSendRequest {
    pub email: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct OtpVerifyRequest {
    pub email: String,
    pub code: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct VerifyMfaTotpRequest {
    /// The magic-link secret the challenge was raised for.
    pub login_token: String,
    pub totp_code: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct LoginTotpRequest {
    pub email: String,
    pub totp_code: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct SessionResponse {
    pub user_id: Uuid,
    pub email: String,
    pub source: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct TotpSetupResponse {
    pub credential_id: Uuid,
    pub secret: String,
    pub otpauth_url: String,
    /// `data:image/png;base64,...`
    pub qr: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct TotpConfirmRequest {
    pub code: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct BackupCodesResponse {
    /// Shown exactly once; only hashes are stored.
    pub codes: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use serde_json::json;

    #[test]
    fn send_link_request_context_is_optional() -> Result<()> {
        let decoded: SendLinkRequest = serde_json::from_value(json!({
            "email": "alice@example.com"
        }))?;
        assert_eq!(decoded.email, "alice@example.com");
        assert!(decoded.context.is_none());

        let decoded: SendLinkRequest = serde_json::from_value(json!({
            "email": "alice@example.com",
            "context": {"ttl": 2, "redirect_to": "/app"}
        }))?;
        assert_eq!(
            decoded.context.and_then(|ctx| ctx.get("ttl").cloned()),
            Some(json!(2))
        );
        Ok(())
    }

    #[test]
    fn challenge_response_omits_absent_fields() -> Result<()> {
        let challenge = ChallengeResponse {
            requires_otp: Some(true),
            requires_totp: None,
            token_id: Uuid::nil(),
            email: "alice@example.com".to_string(),
            user_id: None,
        };
        let value = serde_json::to_value(&challenge)?;
        assert_eq!(value.get("requires_otp"), Some(&json!(true)));
        assert!(value.get("requires_totp").is_none());
        assert!(value.get("user_id").is_none());
        Ok(())
    }

    #[test]
    fn login_response_round_trips() -> Result<()> {
        let response = LoginResponse {
            jwt: "header.payload.signature".to_string(),
            user: UserInfo {
                id: Uuid::nil(),
                email: "alice@example.com".to_string(),
                username: "alice".to_string(),
            },
            expires_at: Utc::now(),
            context: json!({"locale": "eo"}),
        };
        let value = serde_json::to_value(&response)?;
        let decoded: LoginResponse = serde_json::from_value(value)?;
        assert_eq!(decoded.user.username, "alice");
        Ok(())
    }
}
