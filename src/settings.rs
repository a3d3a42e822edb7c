//! Deployment settings and their normalization.
//!
//! Settings arrive as a JSON bag whose booleans may be stored as `true`,
//! `"true"`, or a wrapped `{"type": "boolean", "value": true}` object,
//! depending on which admin surface last wrote them. The ambiguity stops
//! here: [`Settings::from_value`] coerces everything into one strongly-typed
//! struct and nothing downstream ever sees the raw shape.

use serde_json::Value;

const DEFAULT_TOKEN_LENGTH: usize = 32;
const DEFAULT_TOKEN_EXPIRY_SECONDS: i64 = 15 * 60;
const DEFAULT_SESSION_DURATION: &str = "30d";
const DEFAULT_OTP_DIGITS: usize = 6;
const DEFAULT_OTP_TTL_SECONDS: i64 = 5 * 60;
const DEFAULT_OTP_MAX_ATTEMPTS: i32 = 5;
const DEFAULT_RATE_LIMIT_MAX_ATTEMPTS: i64 = 5;
const DEFAULT_RATE_LIMIT_WINDOW_SECONDS: i64 = 15 * 60;

/// Normalized deployment settings.
#[derive(Clone, Debug)]
pub struct Settings {
    /// Master switch; when false every login path fails with `LoginDisabled`.
    pub enabled: bool,
    /// Create unknown users on link request instead of failing.
    pub allow_user_creation: bool,
    /// Record IP/user-agent/last-used on token consumption.
    pub store_login_info: bool,
    /// Tokens survive use instead of being single-use.
    pub token_stays_valid: bool,
    pub token_length: usize,
    pub token_expiry_seconds: i64,
    /// Session lifetime as a duration string (`"30d"`, `"12h"`, `"45m"`).
    pub session_duration: String,
    pub otp_enabled: bool,
    pub otp_digits: usize,
    pub otp_ttl_seconds: i64,
    pub otp_max_attempts: i32,
    /// Require TOTP after the magic link for enrolled users.
    pub totp_required: bool,
    /// Allow `login-totp` (TOTP as the primary factor, no magic link).
    pub totp_primary_enabled: bool,
    pub rate_limit_enabled: bool,
    pub rate_limit_max_attempts: i64,
    pub rate_limit_window_seconds: i64,
    /// When non-empty, only these context keys survive token creation.
    pub context_whitelist: Vec<String>,
    /// Context keys stripped after the whitelist pass.
    pub context_blacklist: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            enabled: true,
            allow_user_creation: false,
            store_login_info: true,
            token_stays_valid: false,
            token_length: DEFAULT_TOKEN_LENGTH,
            token_expiry_seconds: DEFAULT_TOKEN_EXPIRY_SECONDS,
            session_duration: DEFAULT_SESSION_DURATION.to_string(),
            otp_enabled: false,
            otp_digits: DEFAULT_OTP_DIGITS,
            otp_ttl_seconds: DEFAULT_OTP_TTL_SECONDS,
            otp_max_attempts: DEFAULT_OTP_MAX_ATTEMPTS,
            totp_required: false,
            totp_primary_enabled: false,
            rate_limit_enabled: true,
            rate_limit_max_attempts: DEFAULT_RATE_LIMIT_MAX_ATTEMPTS,
            rate_limit_window_seconds: DEFAULT_RATE_LIMIT_WINDOW_SECONDS,
            context_whitelist: Vec::new(),
            context_blacklist: Vec::new(),
        }
    }
}

impl Settings {
    /// Build settings from a stored JSON bag, falling back to defaults for
    /// absent or malformed fields.
    #[must_use]
    pub fn from_value(value: &Value) -> Self {
        let defaults = Self::default();
        let Some(map) = value.as_object() else {
            return defaults;
        };

        Self {
            enabled: bool_field(map.get("enabled"), defaults.enabled),
            allow_user_creation: bool_field(
                map.get("allow_user_creation"),
                defaults.allow_user_creation,
            ),
            store_login_info: bool_field(map.get("store_login_info"), defaults.store_login_info),
            token_stays_valid: bool_field(map.get("token_stays_valid"), defaults.token_stays_valid),
            token_length: usize_field(map.get("token_length"), defaults.token_length),
            token_expiry_seconds: i64_field(
                map.get("token_expiry_seconds"),
                defaults.token_expiry_seconds,
            ),
            session_duration: string_field(map.get("session_duration"), &defaults.session_duration),
            otp_enabled: bool_field(map.get("otp_enabled"), defaults.otp_enabled),
            otp_digits: usize_field(map.get("otp_digits"), defaults.otp_digits),
            otp_ttl_seconds: i64_field(map.get("otp_ttl_seconds"), defaults.otp_ttl_seconds),
            otp_max_attempts: i64_field(
                map.get("otp_max_attempts"),
                i64::from(defaults.otp_max_attempts),
            )
            .try_into()
            .unwrap_or(defaults.otp_max_attempts),
            totp_required: bool_field(map.get("totp_required"), defaults.totp_required),
            totp_primary_enabled: bool_field(
                map.get("totp_primary_enabled"),
                defaults.totp_primary_enabled,
            ),
            rate_limit_enabled: bool_field(
                map.get("rate_limit_enabled"),
                defaults.rate_limit_enabled,
            ),
            rate_limit_max_attempts: i64_field(
                map.get("rate_limit_max_attempts"),
                defaults.rate_limit_max_attempts,
            ),
            rate_limit_window_seconds: i64_field(
                map.get("rate_limit_window_seconds"),
                defaults.rate_limit_window_seconds,
            ),
            context_whitelist: string_list_field(map.get("context_whitelist")),
            context_blacklist: string_list_field(map.get("context_blacklist")),
        }
    }
}

/// Coerce the mixed boolean representations into a plain bool.
///
/// Accepted shapes: `true`, `"true"`/`"false"` (case-insensitive, plus
/// `"1"`/`"0"`), and `{"type": ..., "value": <any accepted shape>}`.
#[must_use]
pub fn coerce_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(flag) => Some(*flag),
        Value::String(text) => match text.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Some(true),
            "false" | "0" | "no" | "off" => Some(false),
            _ => None,
        },
        Value::Number(number) => number.as_i64().map(|n| n != 0),
        Value::Object(map) => map.get("value").and_then(coerce_bool),
        _ => None,
    }
}

fn bool_field(value: Option<&Value>, default: bool) -> bool {
    value.and_then(coerce_bool).unwrap_or(default)
}

fn i64_field(value: Option<&Value>, default: i64) -> i64 {
    let coerced = match value {
        Some(Value::Number(number)) => number.as_i64(),
        Some(Value::String(text)) => text.trim().parse().ok(),
        Some(Value::Object(map)) => return i64_field(map.get("value"), default),
        _ => None,
    };
    coerced.unwrap_or(default)
}

fn usize_field(value: Option<&Value>, default: usize) -> usize {
    usize::try_from(i64_field(value, i64::try_from(default).unwrap_or(i64::MAX)))
        .unwrap_or(default)
}

fn string_field(value: Option<&Value>, default: &str) -> String {
    match value {
        Some(Value::String(text)) if !text.trim().is_empty() => text.trim().to_string(),
        Some(Value::Object(map)) => string_field(map.get("value"), default),
        _ => default.to_string(),
    }
}

fn string_list_field(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        // Comma-separated form written by older admin panels.
        Some(Value::String(text)) => text
            .split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn coerce_bool_accepts_all_shapes() {
        assert_eq!(coerce_bool(&json!(true)), Some(true));
        assert_eq!(coerce_bool(&json!("true")), Some(true));
        assert_eq!(coerce_bool(&json!("False")), Some(false));
        assert_eq!(coerce_bool(&json!("1")), Some(true));
        assert_eq!(
            coerce_bool(&json!({"type": "boolean", "value": true})),
            Some(true)
        );
        assert_eq!(
            coerce_bool(&json!({"type": "boolean", "value": "false"})),
            Some(false)
        );
        assert_eq!(coerce_bool(&json!("maybe")), None);
        assert_eq!(coerce_bool(&json!([true])), None);
    }

    #[test]
    fn from_value_normalizes_mixed_bag() {
        let bag = json!({
            "enabled": "true",
            "allow_user_creation": {"type": "boolean", "value": true},
            "token_stays_valid": false,
            "token_length": "48",
            "token_expiry_seconds": 3600,
            "session_duration": "7d",
            "otp_enabled": {"type": "boolean", "value": "true"},
            "context_whitelist": ["redirect_to", "locale"],
            "context_blacklist": "password, secret",
        });
        let settings = Settings::from_value(&bag);
        assert!(settings.enabled);
        assert!(settings.allow_user_creation);
        assert!(!settings.token_stays_valid);
        assert_eq!(settings.token_length, 48);
        assert_eq!(settings.token_expiry_seconds, 3600);
        assert_eq!(settings.session_duration, "7d");
        assert!(settings.otp_enabled);
        assert_eq!(settings.context_whitelist, vec!["redirect_to", "locale"]);
        assert_eq!(settings.context_blacklist, vec!["password", "secret"]);
    }

    #[test]
    fn from_value_falls_back_to_defaults() {
        let settings = Settings::from_value(&json!({"token_length": "not-a-number"}));
        let defaults = Settings::default();
        assert_eq!(settings.token_length, defaults.token_length);
        assert_eq!(settings.otp_max_attempts, defaults.otp_max_attempts);
        assert_eq!(settings.session_duration, defaults.session_duration);

        let settings = Settings::from_value(&json!(null));
        assert!(settings.enabled);
        assert!(!settings.otp_enabled);
    }
}
