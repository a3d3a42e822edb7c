//! Rate limiter implementations.

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;
use std::time::Duration;

use super::{
    repo::{RateLimitRepo, RateLimitStat},
    RateLimitCategory, RateLimitDecision, RateLimiter,
};

/// Always-allow limiter: used in tests and when the deployment disables
/// rate limiting entirely.
#[derive(Clone, Debug)]
pub struct NoopRateLimiter;

#[async_trait]
impl RateLimiter for NoopRateLimiter {
    async fn check(
        &self,
        _identifier: &str,
        _category: RateLimitCategory,
    ) -> Result<RateLimitDecision> {
        Ok(RateLimitDecision::Allowed)
    }
}

/// Store-backed sliding-window limiter. Each check is one atomic
/// reset-or-increment upsert, so concurrent requests against the same key
/// can never double-allow past the limit.
#[derive(Clone)]
pub struct PgRateLimiter {
    pool: PgPool,
    max_attempts: i64,
    window_seconds: i64,
}

impl PgRateLimiter {
    #[must_use]
    pub fn new(pool: PgPool, max_attempts: i64, window_seconds: i64) -> Self {
        Self {
            pool,
            max_attempts: max_attempts.max(1),
            window_seconds: window_seconds.max(1),
        }
    }

    /// # Errors
    /// Returns an error if the delete fails.
    pub async fn cleanup_expired(&self) -> Result<u64> {
        RateLimitRepo::cleanup_expired(&self.pool, self.window_seconds).await
    }

    /// # Errors
    /// Returns an error if the query fails.
    pub async fn stats(&self) -> Result<Vec<RateLimitStat>> {
        RateLimitRepo::stats(&self.pool).await
    }

    /// # Errors
    /// Returns an error if the delete fails.
    pub async fn reset(&self) -> Result<u64> {
        RateLimitRepo::reset(&self.pool).await
    }
}

#[async_trait]
impl RateLimiter for PgRateLimiter {
    async fn check(
        &self,
        identifier: &str,
        category: RateLimitCategory,
    ) -> Result<RateLimitDecision> {
        let state = RateLimitRepo::record(
            &self.pool,
            category.as_str(),
            identifier,
            self.window_seconds,
        )
        .await?;

        let elapsed = (Utc::now() - state.window_start).num_seconds();
        Ok(decide(
            state.count,
            self.max_attempts,
            self.window_seconds,
            elapsed,
        ))
    }
}

/// Decide from the post-increment counter state. Separate from the store
/// access so the window semantics stay testable.
fn decide(
    count: i64,
    max_attempts: i64,
    window_seconds: i64,
    elapsed_seconds: i64,
) -> RateLimitDecision {
    if count <= max_attempts {
        return RateLimitDecision::Allowed;
    }
    // Remaining time in the active window; at least one second so clients
    // always get a usable Retry-After.
    let remaining = (window_seconds - elapsed_seconds.max(0)).max(1);
    RateLimitDecision::Limited {
        retry_after: Duration::from_secs(remaining.unsigned_abs()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::postgres::PgPoolOptions;

    #[tokio::test]
    async fn constructor_clamps_degenerate_config() -> Result<()> {
        let pool = PgPoolOptions::new().connect_lazy("postgres://postgres@localhost/postgres")?;
        let limiter = PgRateLimiter::new(pool, 0, -5);
        assert_eq!(limiter.max_attempts, 1);
        assert_eq!(limiter.window_seconds, 1);
        Ok(())
    }

    #[test]
    fn sixth_request_in_window_is_denied() {
        let window = 15 * 60;
        // Requests 1..=5 pass.
        for count in 1..=5 {
            assert_eq!(decide(count, 5, window, 10), RateLimitDecision::Allowed);
        }
        // The 6th is denied with the remaining window as Retry-After.
        let denied = decide(6, 5, window, 60);
        match denied {
            RateLimitDecision::Limited { retry_after } => {
                assert_eq!(retry_after, Duration::from_secs((window - 60) as u64));
            }
            RateLimitDecision::Allowed => panic!("6th request must be limited"),
        }
    }

    #[test]
    fn window_reset_starts_a_fresh_count() {
        // After the window elapses the store resets count to 1, which the
        // decision sees as allowed again.
        assert_eq!(decide(1, 5, 900, 0), RateLimitDecision::Allowed);
    }

    #[test]
    fn retry_after_is_at_least_one_second() {
        let denied = decide(6, 5, 900, 5000);
        match denied {
            RateLimitDecision::Limited { retry_after } => {
                assert_eq!(retry_after, Duration::from_secs(1));
            }
            RateLimitDecision::Allowed => panic!("must be limited"),
        }
    }
}
