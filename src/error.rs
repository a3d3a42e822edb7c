//! Flow-level error kinds and their HTTP mapping.
//!
//! Validation and authorization failures are returned as structured,
//! user-safe responses. Storage and network failures are logged with full
//! context and surfaced as a generic failure; internals never reach the
//! caller.

use axum::{
    http::{header::RETRY_AFTER, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tracing::error;

pub type Result<T> = std::result::Result<T, AuthError>;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Login is disabled")]
    LoginDisabled,

    #[error("Invalid or expired token")]
    TokenInvalid,

    #[error("User not found")]
    UserNotFound,

    #[error("User is blocked")]
    UserBlocked,

    #[error("Rate limited, retry in {retry_after_seconds}s")]
    RateLimited { retry_after_seconds: u64 },

    #[error("Invalid code")]
    OtpInvalid,

    #[error("Code expired")]
    OtpExpired,

    #[error("Too many attempts")]
    OtpMaxAttempts,

    #[error("Invalid authenticator code")]
    TotpInvalid,

    #[error("Authenticator is not configured")]
    TotpNotConfigured,

    #[error("Feature not available in the current license: {0}")]
    FeatureNotLicensed(String),

    #[error("Quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("Session not found")]
    SessionNotFound,

    #[error("Session expired")]
    SessionExpired,

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl AuthError {
    /// HTTP status for the error kind.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::LoginDisabled => StatusCode::SERVICE_UNAVAILABLE,
            Self::TokenInvalid
            | Self::OtpInvalid
            | Self::OtpExpired
            | Self::TotpInvalid
            | Self::SessionExpired => StatusCode::BAD_REQUEST,
            Self::UserNotFound | Self::SessionNotFound => StatusCode::NOT_FOUND,
            Self::UserBlocked => StatusCode::FORBIDDEN,
            Self::RateLimited { .. } | Self::OtpMaxAttempts => StatusCode::TOO_MANY_REQUESTS,
            Self::FeatureNotLicensed(_) | Self::QuotaExceeded(_) => StatusCode::PAYMENT_REQUIRED,
            Self::TotpNotConfigured => StatusCode::CONFLICT,
            Self::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Body text safe to return to callers.
    #[must_use]
    pub fn safe_message(&self) -> String {
        match self {
            // Storage details stay in the logs.
            Self::Storage(_) => "Internal error".to_string(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        if let Self::Storage(err) = &self {
            error!("storage failure: {err:#}");
        }
        let status = self.status();
        let mut response = (status, self.safe_message()).into_response();
        if let Self::RateLimited {
            retry_after_seconds,
        } = self
        {
            if let Ok(value) = HeaderValue::from_str(&retry_after_seconds.to_string()) {
                response.headers_mut().insert(RETRY_AFTER, value);
            }
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_match_error_kinds() {
        assert_eq!(
            AuthError::LoginDisabled.status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(AuthError::TokenInvalid.status(), StatusCode::BAD_REQUEST);
        assert_eq!(AuthError::UserNotFound.status(), StatusCode::NOT_FOUND);
        assert_eq!(AuthError::UserBlocked.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            AuthError::RateLimited {
                retry_after_seconds: 30
            }
            .status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            AuthError::FeatureNotLicensed("otp-email".to_string()).status(),
            StatusCode::PAYMENT_REQUIRED
        );
    }

    #[test]
    fn storage_message_is_generic() {
        let err = AuthError::Storage(anyhow::anyhow!("connection refused to 10.0.0.3:5432"));
        assert_eq!(err.safe_message(), "Internal error");
    }

    #[test]
    fn rate_limited_sets_retry_after_header() {
        let response = AuthError::RateLimited {
            retry_after_seconds: 42,
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|value| value.to_str().ok()),
            Some("42")
        );
    }
}
