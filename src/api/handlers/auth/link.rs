//! Magic-link issuance endpoint.

use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use std::sync::Arc;
use tracing::warn;

use crate::{
    notify::{self, Channel, MessageKind, TemplateContext},
    ratelimit::RateLimitCategory,
    users::{normalize_email, valid_email},
};

use super::{
    check_rate, ensure_enabled, ensure_ip_allowed,
    state::AuthState,
    types::{SendLinkRequest, SendLinkResponse},
    utils::extract_client_ip,
};

/// Issue a magic-link token and queue its delivery.
#[utoipa::path(
    post,
    path = "/v1/auth/send-link",
    request_body = SendLinkRequest,
    responses(
        (status = 200, description = "Link issued (sent=false means delivery could not be queued)", body = SendLinkResponse),
        (status = 400, description = "Invalid email or payload", body = String),
        (status = 402, description = "Token quota exceeded", body = String),
        (status = 429, description = "Rate limited", body = String),
        (status = 503, description = "Login disabled", body = String)
    ),
    tag = "auth"
)]
pub async fn send_link(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<SendLinkRequest>>,
) -> impl IntoResponse {
    let request: SendLinkRequest = match payload {
        Some(Json(payload)) => payload,
        None => return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response(),
    };

    if let Err(err) = ensure_enabled(&auth_state) {
        return err.into_response();
    }

    let email = normalize_email(&request.email);
    if !valid_email(&email) {
        return (StatusCode::BAD_REQUEST, "Invalid email".to_string()).into_response();
    }

    let client_ip = extract_client_ip(&headers);
    if let Err(err) = ensure_ip_allowed(&auth_state, client_ip.as_deref()).await {
        return err.into_response();
    }
    // Rate limits are enforced before any token work to avoid amplification.
    if let Err(err) = check_rate(
        &auth_state,
        client_ip.as_deref(),
        RateLimitCategory::SendLink,
    )
    .await
    {
        return err.into_response();
    }
    if let Err(err) = check_rate(&auth_state, Some(&email), RateLimitCategory::SendLink).await {
        return err.into_response();
    }

    let context = request.context.unwrap_or(serde_json::Value::Null);
    let issued = match auth_state
        .tokens()
        .issue(&email, &context, auth_state.gate().max_tokens())
        .await
    {
        Ok(issued) => issued,
        // Blocked owners fail before any token is persisted.
        Err(err) => return err.into_response(),
    };

    let ttl_seconds = (issued.token.expires_at - Utc::now()).num_seconds().max(0);
    let message = auth_state.render(
        MessageKind::LoginLink,
        &TemplateContext {
            url: Some(auth_state.config().login_url(&issued.secret)),
            code: None,
            expiry_text: notify::expiry_text(ttl_seconds),
        },
    );

    // The token stays valid even when delivery cannot be queued; the caller
    // can retry via resend without invalidating anything.
    let sent =
        match notify::enqueue(auth_state.tokens().pool(), Channel::Email, &email, &message).await {
            Ok(()) => true,
            Err(err) => {
                warn!("login link delivery enqueue failed: {err:#}");
                false
            }
        };

    Json(SendLinkResponse { sent }).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::handlers::auth::test_support::lazy_auth_state;
    use anyhow::Result;

    #[tokio::test]
    async fn send_link_missing_payload() -> Result<()> {
        let state = lazy_auth_state()?;
        let response = send_link(HeaderMap::new(), Extension(state), None)
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        Ok(())
    }

    #[tokio::test]
    async fn send_link_invalid_email() -> Result<()> {
        let state = lazy_auth_state()?;
        let response = send_link(
            HeaderMap::new(),
            Extension(state),
            Some(Json(SendLinkRequest {
                email: "not-an-email".to_string(),
                context: None,
            })),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        Ok(())
    }

    #[tokio::test]
    async fn send_link_rejects_when_disabled() -> Result<()> {
        let state = crate::api::handlers::auth::test_support::lazy_auth_state_with(|settings| {
            settings.enabled = false;
        })?;
        let response = send_link(
            HeaderMap::new(),
            Extension(state),
            Some(Json(SendLinkRequest {
                email: "alice@example.com".to_string(),
                context: None,
            })),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        Ok(())
    }
}
