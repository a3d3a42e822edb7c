//! Sliding-window rate limiting for auth flows.

pub mod repo;
pub mod service;

pub use service::{NoopRateLimiter, PgRateLimiter};

use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;

/// What the caller was trying to do; combined with an identifier (IP or
/// email) to key the windowed counter.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RateLimitCategory {
    SendLink,
    Login,
    OtpSend,
    OtpVerify,
    TotpVerify,
}

impl RateLimitCategory {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SendLink => "send_link",
            Self::Login => "login",
            Self::OtpSend => "otp_send",
            Self::OtpVerify => "otp_verify",
            Self::TotpVerify => "totp_verify",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed,
    /// Denied; `retry_after` is the remaining window time.
    Limited { retry_after: Duration },
}

#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Count this request against `category + identifier` and decide.
    async fn check(
        &self,
        identifier: &str,
        category: RateLimitCategory,
    ) -> Result<RateLimitDecision>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categories_have_stable_keys() {
        assert_eq!(RateLimitCategory::SendLink.as_str(), "send_link");
        assert_eq!(RateLimitCategory::OtpVerify.as_str(), "otp_verify");
    }

    #[tokio::test]
    async fn noop_rate_limiter_allows() -> Result<()> {
        let limiter = NoopRateLimiter;
        assert_eq!(
            limiter.check("1.2.3.4", RateLimitCategory::SendLink).await?,
            RateLimitDecision::Allowed
        );
        assert_eq!(
            limiter
                .check("user@example.com", RateLimitCategory::Login)
                .await?,
            RateLimitDecision::Allowed
        );
        Ok(())
    }
}
