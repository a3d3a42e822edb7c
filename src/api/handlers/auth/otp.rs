//! One-time code endpoints: send, verify, resend.

use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde_json::json;
use std::sync::Arc;

use crate::{
    error::AuthError,
    otp::OtpType,
    ratelimit::RateLimitCategory,
    session::SessionSource,
    token::models::{sanitize_session_context, CONTEXT_OTP_PENDING},
    token::repo::TokenRepo,
    users::{normalize_email, valid_email},
};

use super::{
    check_rate, deliver_otp, ensure_enabled, ensure_ip_allowed, issue_login_response,
    state::AuthState,
    types::{OtpSendRequest, OtpVerifyRequest, SendLinkResponse},
    utils::{extract_client_ip, request_info},
};

/// Shared admission checks for the OTP surface.
async fn otp_gate(
    state: &AuthState,
    headers: &HeaderMap,
    email: &str,
    category: RateLimitCategory,
) -> Result<(), AuthError> {
    ensure_enabled(state)?;
    if !state.settings().otp_enabled {
        return Err(AuthError::LoginDisabled);
    }
    if !state.gate().has_feature("otp-email") {
        return Err(AuthError::FeatureNotLicensed("otp-email".to_string()));
    }
    let client_ip = extract_client_ip(headers);
    ensure_ip_allowed(state, client_ip.as_deref()).await?;
    check_rate(state, client_ip.as_deref(), category).await?;
    check_rate(state, Some(email), category).await?;
    Ok(())
}

/// Send a one-time code to an account's email.
#[utoipa::path(
    post,
    path = "/v1/auth/otp/send",
    request_body = OtpSendRequest,
    responses(
        (status = 200, description = "Code queued for delivery", body = SendLinkResponse),
        (status = 400, description = "Invalid email or payload", body = String),
        (status = 402, description = "OTP not licensed", body = String),
        (status = 404, description = "User not found", body = String),
        (status = 429, description = "Rate limited", body = String)
    ),
    tag = "otp"
)]
pub async fn otp_send(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<OtpSendRequest>>,
) -> impl IntoResponse {
    let request: OtpSendRequest = match payload {
        Some(Json(payload)) => payload,
        None => return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response(),
    };
    let email = normalize_email(&request.email);
    if !valid_email(&email) {
        return (StatusCode::BAD_REQUEST, "Invalid email".to_string()).into_response();
    }
    if let Err(err) = otp_gate(&auth_state, &headers, &email, RateLimitCategory::OtpSend).await {
        return err.into_response();
    }

    match send_code(&auth_state, &email, None).await {
        Ok(()) => Json(SendLinkResponse { sent: true }).into_response(),
        Err(err) => err.into_response(),
    }
}

/// Re-deliver a code, keeping the association with any pending magic-link
/// challenge.
#[utoipa::path(
    post,
    path = "/v1/auth/otp/resend",
    request_body = OtpSendRequest,
    responses(
        (status = 200, description = "Code queued for delivery", body = SendLinkResponse),
        (status = 400, description = "Invalid email or payload", body = String),
        (status = 429, description = "Rate limited", body = String)
    ),
    tag = "otp"
)]
pub async fn otp_resend(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<OtpSendRequest>>,
) -> impl IntoResponse {
    let request: OtpSendRequest = match payload {
        Some(Json(payload)) => payload,
        None => return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response(),
    };
    let email = normalize_email(&request.email);
    if !valid_email(&email) {
        return (StatusCode::BAD_REQUEST, "Invalid email".to_string()).into_response();
    }
    if let Err(err) = otp_gate(&auth_state, &headers, &email, RateLimitCategory::OtpSend).await {
        return err.into_response();
    }

    let resent = async {
        let user = auth_state
            .directory()
            .find_by_email(&email)
            .await?
            .ok_or(AuthError::UserNotFound)?;
        if user.blocked {
            return Err(AuthError::UserBlocked);
        }
        let (code, _record) = auth_state.otp().resend(&email, OtpType::Email).await?;
        deliver_otp(
            &auth_state,
            &email,
            &code,
            auth_state.settings().otp_ttl_seconds,
        )
        .await;
        Ok(())
    }
    .await;

    match resent {
        Ok(()) => Json(SendLinkResponse { sent: true }).into_response(),
        Err(err) => err.into_response(),
    }
}

/// Verify a one-time code and complete the login.
#[utoipa::path(
    post,
    path = "/v1/auth/otp/verify",
    request_body = OtpVerifyRequest,
    responses(
        (status = 200, description = "Session issued", body = super::types::LoginResponse),
        (status = 400, description = "Invalid or expired code", body = String),
        (status = 429, description = "Rate limited or too many attempts", body = String)
    ),
    tag = "otp"
)]
pub async fn otp_verify(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<OtpVerifyRequest>>,
) -> impl IntoResponse {
    let request: OtpVerifyRequest = match payload {
        Some(Json(payload)) => payload,
        None => return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response(),
    };
    let email = normalize_email(&request.email);
    if !valid_email(&email) {
        return (StatusCode::BAD_REQUEST, "Invalid email".to_string()).into_response();
    }
    if let Err(err) = otp_gate(&auth_state, &headers, &email, RateLimitCategory::OtpVerify).await {
        return err.into_response();
    }

    let verified = async {
        let record = auth_state
            .otp()
            .verify(&email, &request.code, OtpType::Email)
            .await?;

        // Complete the pending magic-link challenge when the code belongs
        // to one; a standalone code logs in with an empty context.
        let mut context = json!({});
        if let Some(token_id) = record.token_id {
            let token = TokenRepo::get(auth_state.tokens().pool(), token_id)
                .await
                .map_err(AuthError::Storage)?;
            if let Some(token) = token {
                let patch = json!({ CONTEXT_OTP_PENDING: false, "otp_verified": true });
                TokenRepo::merge_context(auth_state.tokens().pool(), token.id, &patch)
                    .await
                    .map_err(AuthError::Storage)?;
                auth_state
                    .tokens()
                    .consume(&token, &request_info(&headers))
                    .await?;
                context = sanitize_session_context(&token.context);
            }
        }

        let user = auth_state
            .directory()
            .find_by_email(&email)
            .await?
            .ok_or(AuthError::UserNotFound)?;
        issue_login_response(
            &auth_state,
            user,
            context,
            SessionSource::MagicLinkOtp,
            &request_info(&headers),
        )
        .await
    }
    .await;

    match verified {
        Ok(response) => Json(response).into_response(),
        Err(err) => err.into_response(),
    }
}

/// Issue and deliver a code for an existing, unblocked account.
async fn send_code(
    state: &AuthState,
    email: &str,
    token_id: Option<uuid::Uuid>,
) -> Result<(), AuthError> {
    let user = state
        .directory()
        .find_by_email(email)
        .await?
        .ok_or(AuthError::UserNotFound)?;
    if user.blocked {
        return Err(AuthError::UserBlocked);
    }
    let (code, _record) = state.otp().create(email, OtpType::Email, token_id, None).await?;
    deliver_otp(state, email, &code, state.settings().otp_ttl_seconds).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::handlers::auth::test_support::lazy_auth_state_with;
    use anyhow::Result;

    #[tokio::test]
    async fn otp_send_requires_enabled_setting() -> Result<()> {
        // Default settings leave OTP off.
        let state = lazy_auth_state_with(|_| {})?;
        let response = otp_send(
            HeaderMap::new(),
            Extension(state),
            Some(Json(OtpSendRequest {
                email: "alice@example.com".to_string(),
            })),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        Ok(())
    }

    #[tokio::test]
    async fn otp_send_requires_license() -> Result<()> {
        // Setting on, but the (absent) license resolves to the free tier,
        // which does not include otp-email.
        let state = lazy_auth_state_with(|settings| settings.otp_enabled = true)?;
        let response = otp_send(
            HeaderMap::new(),
            Extension(state),
            Some(Json(OtpSendRequest {
                email: "alice@example.com".to_string(),
            })),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
        Ok(())
    }

    #[tokio::test]
    async fn otp_verify_rejects_bad_payload() -> Result<()> {
        let state = lazy_auth_state_with(|settings| settings.otp_enabled = true)?;
        let response = otp_verify(HeaderMap::new(), Extension(state), None)
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        Ok(())
    }
}
