//! Admin rate-limit reporting and reset.

use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use std::sync::Arc;

use crate::{
    api::handlers::auth::state::AuthState, error::AuthError, ratelimit::repo::RateLimitStat,
};

use super::{require_operator, types::AffectedResponse};

/// Per-category counter totals.
#[utoipa::path(
    get,
    path = "/v1/admin/rate-limits",
    responses(
        (status = 200, description = "Counter stats", body = [RateLimitStat]),
        (status = 401, description = "No active session"),
        (status = 403, description = "Not an operator"),
        (status = 409, description = "Rate limiting disabled", body = String)
    ),
    tag = "admin"
)]
pub async fn rate_limit_stats(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
) -> impl IntoResponse {
    if let Err(status) = require_operator(&headers, &auth_state).await {
        return status.into_response();
    }
    let Some(limiter) = auth_state.admin_limiter() else {
        return (
            StatusCode::CONFLICT,
            "Rate limiting is disabled".to_string(),
        )
            .into_response();
    };
    match limiter.stats().await {
        Ok(stats) => Json(stats).into_response(),
        Err(err) => AuthError::Storage(err).into_response(),
    }
}

/// Clear every counter.
#[utoipa::path(
    post,
    path = "/v1/admin/rate-limits/reset",
    responses(
        (status = 200, description = "Counters cleared", body = AffectedResponse),
        (status = 409, description = "Rate limiting disabled", body = String)
    ),
    tag = "admin"
)]
pub async fn rate_limit_reset(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
) -> impl IntoResponse {
    if let Err(status) = require_operator(&headers, &auth_state).await {
        return status.into_response();
    }
    let Some(limiter) = auth_state.admin_limiter() else {
        return (
            StatusCode::CONFLICT,
            "Rate limiting is disabled".to_string(),
        )
            .into_response();
    };
    match limiter.reset().await {
        Ok(affected) => Json(AffectedResponse { affected }).into_response(),
        Err(err) => AuthError::Storage(err).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::handlers::auth::test_support::lazy_auth_state;
    use anyhow::Result;

    #[tokio::test]
    async fn stats_require_session() -> Result<()> {
        let state = lazy_auth_state()?;
        let response = rate_limit_stats(HeaderMap::new(), Extension(state))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        Ok(())
    }
}
