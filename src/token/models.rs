//! Login token records and context filtering.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::{postgres::PgRow, FromRow, Row};
use uuid::Uuid;

/// Keys allowed to flow from a token's context into an issued session.
/// Everything else stays on the token record.
pub const SESSION_SAFE_KEYS: &[&str] = &["redirect_to", "locale", "source", "plan", "campaign"];

/// Longest string value echoed into a session context.
const MAX_SESSION_STRING_LEN: usize = 256;
/// Largest serialized nested value echoed into a session context.
const MAX_SESSION_VALUE_BYTES: usize = 2048;
/// Most context keys kept on a token record.
const MAX_CONTEXT_KEYS: usize = 24;
/// Largest serialized context kept on a token record.
const MAX_CONTEXT_BYTES: usize = 4096;

/// Context marker set while an OTP challenge is outstanding.
pub const CONTEXT_OTP_PENDING: &str = "otp_pending";
/// Context marker set while a TOTP challenge is outstanding.
pub const CONTEXT_TOTP_PENDING: &str = "totp_pending";
/// Context key holding the enrolled user id during a TOTP challenge.
pub const CONTEXT_TOTP_USER: &str = "totp_user_id";

/// A magic-link token at rest. The secret itself is never stored; only
/// `SHA-256(secret || salt)` and the salt are.
#[derive(Debug, Clone)]
pub struct LoginToken {
    pub id: Uuid,
    pub email: String,
    pub user_id: Uuid,
    pub token_hash: Vec<u8>,
    pub salt: Vec<u8>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub context: Value,
}

impl<'r> FromRow<'r, PgRow> for LoginToken {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            email: row.try_get("email")?,
            user_id: row.try_get("user_id")?,
            token_hash: row.try_get("token_hash")?,
            salt: row.try_get("salt")?,
            active: row.try_get("active")?,
            created_at: row.try_get("created_at")?,
            expires_at: row.try_get("expires_at")?,
            last_used_at: row.try_get("last_used_at")?,
            ip: row.try_get("ip")?,
            user_agent: row.try_get("user_agent")?,
            context: row
                .try_get::<Option<Value>, _>("context")?
                .unwrap_or(Value::Null),
        })
    }
}

impl LoginToken {
    /// A token is valid iff it is active and either unexpired or the
    /// deployment keeps tokens valid after expiry.
    #[must_use]
    pub fn is_valid(&self, now: DateTime<Utc>, stays_valid: bool) -> bool {
        self.active && (now < self.expires_at || stays_valid)
    }

    /// Read a context marker set during a pending challenge.
    #[must_use]
    pub fn context_flag(&self, key: &str) -> bool {
        self.context
            .get(key)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

/// A freshly issued token with its transient plaintext secret. The secret
/// exists only to be rendered into the login link; it is never persisted.
#[derive(Debug)]
pub struct IssuedToken {
    pub token: LoginToken,
    pub secret: String,
}

/// Extract the `ttl` override (hours) from a creation context, if present.
/// Accepts numbers and numeric strings; anything else is ignored.
#[must_use]
pub fn ttl_hours(context: &Value) -> Option<i64> {
    let value = context.get("ttl")?;
    let hours = match value {
        Value::Number(number) => number.as_i64()?,
        Value::String(text) => text.trim().parse().ok()?,
        _ => return None,
    };
    (hours > 0).then_some(hours)
}

/// Filter a creation context through the whitelist, then the blacklist, then
/// the size caps. The `ttl` key is consumed by expiry computation and never
/// stored.
#[must_use]
pub fn filter_context(context: &Value, whitelist: &[String], blacklist: &[String]) -> Value {
    let Some(map) = context.as_object() else {
        return Value::Object(Map::new());
    };

    let mut filtered = Map::new();
    let mut serialized_bytes = 0usize;
    for (key, value) in map {
        if key == "ttl" {
            continue;
        }
        if !whitelist.is_empty() && !whitelist.iter().any(|allowed| allowed == key) {
            continue;
        }
        if blacklist.iter().any(|denied| denied == key) {
            continue;
        }
        if filtered.len() >= MAX_CONTEXT_KEYS {
            break;
        }
        let value_bytes = value.to_string().len();
        if serialized_bytes + value_bytes > MAX_CONTEXT_BYTES {
            break;
        }
        serialized_bytes += value_bytes;
        filtered.insert(key.clone(), value.clone());
    }
    Value::Object(filtered)
}

/// Reduce a token context to the subset safe to echo into a session:
/// allow-listed keys only, strings length-capped, nested values size-capped
/// after a serialization round-trip.
#[must_use]
pub fn sanitize_session_context(context: &Value) -> Value {
    let Some(map) = context.as_object() else {
        return Value::Object(Map::new());
    };

    let mut sanitized = Map::new();
    for key in SESSION_SAFE_KEYS {
        let Some(value) = map.get(*key) else {
            continue;
        };
        match value {
            Value::String(text) => {
                let capped: String = text.chars().take(MAX_SESSION_STRING_LEN).collect();
                sanitized.insert((*key).to_string(), Value::String(capped));
            }
            Value::Bool(_) | Value::Number(_) => {
                sanitized.insert((*key).to_string(), value.clone());
            }
            Value::Object(_) | Value::Array(_) => {
                // Round-trip through serialization so the cap reflects what
                // would actually be embedded in the credential.
                let Ok(serialized) = serde_json::to_string(value) else {
                    continue;
                };
                if serialized.len() > MAX_SESSION_VALUE_BYTES {
                    continue;
                }
                if let Ok(round_tripped) = serde_json::from_str::<Value>(&serialized) {
                    sanitized.insert((*key).to_string(), round_tripped);
                }
            }
            Value::Null => {}
        }
    }
    Value::Object(sanitized)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn is_valid_requires_active_and_unexpired() {
        let now = Utc::now();
        let mut token = LoginToken {
            id: Uuid::new_v4(),
            email: "alice@example.com".to_string(),
            user_id: Uuid::new_v4(),
            token_hash: vec![0u8; 32],
            salt: vec![0u8; 16],
            active: true,
            created_at: now,
            expires_at: now + chrono::Duration::hours(1),
            last_used_at: None,
            ip: None,
            user_agent: None,
            context: Value::Null,
        };
        assert!(token.is_valid(now, false));

        token.expires_at = now - chrono::Duration::seconds(1);
        assert!(!token.is_valid(now, false));
        // The stays-valid policy overrides expiry but never the active flag.
        assert!(token.is_valid(now, true));

        token.active = false;
        assert!(!token.is_valid(now, true));
    }

    #[test]
    fn ttl_hours_accepts_numbers_and_strings() {
        assert_eq!(ttl_hours(&json!({"ttl": 3})), Some(3));
        assert_eq!(ttl_hours(&json!({"ttl": "12"})), Some(12));
        assert_eq!(ttl_hours(&json!({"ttl": 0})), None);
        assert_eq!(ttl_hours(&json!({"ttl": -4})), None);
        assert_eq!(ttl_hours(&json!({"ttl": [1]})), None);
        assert_eq!(ttl_hours(&json!({})), None);
    }

    #[test]
    fn filter_context_applies_whitelist_then_blacklist() {
        let context = json!({
            "redirect_to": "/app",
            "locale": "eo",
            "password": "hunter2",
            "ttl": 4,
        });
        let filtered = filter_context(
            &context,
            &strings(&["redirect_to", "locale", "password"]),
            &strings(&["password"]),
        );
        assert_eq!(filtered.get("redirect_to"), Some(&json!("/app")));
        assert_eq!(filtered.get("locale"), Some(&json!("eo")));
        assert_eq!(filtered.get("password"), None);
        assert_eq!(filtered.get("ttl"), None);
    }

    #[test]
    fn filter_context_empty_whitelist_allows_all_but_blacklist() {
        let context = json!({"a": 1, "b": 2});
        let filtered = filter_context(&context, &[], &strings(&["b"]));
        assert_eq!(filtered.get("a"), Some(&json!(1)));
        assert_eq!(filtered.get("b"), None);
    }

    #[test]
    fn filter_context_caps_size() {
        let mut map = Map::new();
        for idx in 0..100 {
            map.insert(format!("key{idx}"), json!("value"));
        }
        let filtered = filter_context(&Value::Object(map), &[], &[]);
        let kept = filtered.as_object().map(Map::len).unwrap_or(0);
        assert!(kept <= 24);
    }

    #[test]
    fn sanitize_session_context_drops_unknown_keys_and_caps_strings() {
        let context = json!({
            "redirect_to": "/dashboard",
            "password": "hunter2",
            "locale": "x".repeat(1000),
        });
        let sanitized = sanitize_session_context(&context);
        assert_eq!(sanitized.get("redirect_to"), Some(&json!("/dashboard")));
        assert_eq!(sanitized.get("password"), None);
        let locale = sanitized
            .get("locale")
            .and_then(Value::as_str)
            .unwrap_or_default();
        assert_eq!(locale.len(), 256);
    }

    #[test]
    fn sanitize_session_context_caps_nested_values() {
        let small = json!({"plan": {"name": "pro"}});
        let sanitized = sanitize_session_context(&small);
        assert_eq!(sanitized.get("plan"), Some(&json!({"name": "pro"})));

        let huge = json!({"plan": {"blob": "y".repeat(5000)}});
        let sanitized = sanitize_session_context(&huge);
        assert_eq!(sanitized.get("plan"), None);
    }
}
