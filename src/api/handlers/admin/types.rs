//! Request/response types for the admin surface.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(ToSchema, Deserialize, Debug)]
pub struct PageQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    50
}

/// A token as listed on the admin surface. Hash and salt never leave
/// storage.
#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct TokenSummary {
    pub id: Uuid,
    pub email: String,
    pub user_id: Uuid,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub context: Value,
}

impl From<crate::token::LoginToken> for TokenSummary {
    fn from(token: crate::token::LoginToken) -> Self {
        Self {
            id: token.id,
            email: token.email,
            user_id: token.user_id,
            active: token.active,
            created_at: token.created_at,
            expires_at: token.expires_at,
            last_used_at: token.last_used_at,
            ip: token.ip,
            user_agent: token.user_agent,
            context: token.context,
        }
    }
}

/// A session as listed on the admin surface. The credential prefix stays in
/// storage.
#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct SessionSummary {
    pub id: String,
    pub user_id: Uuid,
    pub email: String,
    pub source: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub revoked: bool,
    pub revoked_reason: Option<String>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub last_used_at: Option<DateTime<Utc>>,
}

impl From<crate::session::Session> for SessionSummary {
    fn from(session: crate::session::Session) -> Self {
        Self {
            id: session.id,
            user_id: session.user_id,
            email: session.email,
            source: session.source.as_str().to_string(),
            created_at: session.created_at,
            expires_at: session.expires_at,
            revoked: session.revoked,
            revoked_reason: session.revoked_reason,
            revoked_at: session.revoked_at,
            ip: session.ip,
            user_agent: session.user_agent,
            last_used_at: session.last_used_at,
        }
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct AdminTokenCreateRequest {
    pub email: String,
    #[serde(default)]
    pub context: Option<Value>,
}

/// Admin-initiated token creation returns the link once.
#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct AdminTokenCreateResponse {
    pub id: Uuid,
    pub email: String,
    pub expires_at: DateTime<Utc>,
    pub link: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ExtendTokenRequest {
    pub days: i64,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ExtendTokenResponse {
    pub expires_at: DateTime<Utc>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug, Default)]
pub struct RevokeRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct RevokeCredentialRequest {
    pub credential: String,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Generic "N rows affected" response for cleanup/reset actions.
#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct AffectedResponse {
    pub affected: u64,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct BanRequest {
    pub ip: String,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct LicenseCreateRequest {
    pub tier: String,
    pub email: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct LicenseStatusResponse {
    /// Tier after expiry and grace checks; what gating actually uses.
    pub effective_tier: String,
    pub license_key: Option<String>,
    pub last_validated_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub active: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use serde_json::json;

    #[test]
    fn page_query_defaults() -> Result<()> {
        let query: PageQuery = serde_json::from_value(json!({}))?;
        assert_eq!(query.limit, 50);
        assert_eq!(query.offset, 0);
        Ok(())
    }

    #[test]
    fn revoke_request_reason_is_optional() -> Result<()> {
        let request: RevokeRequest = serde_json::from_value(json!({}))?;
        assert!(request.reason.is_none());
        Ok(())
    }
}
