//! Magic-link validation and the challenge decision point.

use axum::{
    extract::{Extension, Query},
    http::HeaderMap,
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
    token::models::{CONTEXT_OTP_PENDING, CONTEXT_TOTP_PENDING, CONTEXT_TOTP_USER},
    token::repo::TokenRepo,
};

use super::{
    check_rate, complete_token_login, deliver_otp, ensure_enabled, ensure_ip_allowed,
    state::AuthState,
    types::{ChallengeResponse, LoginQuery, LoginResponse},
    utils::{extract_client_ip, request_info},
};

/// Present a magic-link token.
///
/// Issues a session directly, or returns an OTP/TOTP challenge when the
/// deployment requires a second factor for this user.
#[utoipa::path(
    get,
    path = "/v1/auth/login",
    params(("token" = String, Query, description = "Magic-link secret")),
    responses(
        (status = 200, description = "Session issued or challenge required", body = LoginResponse),
        (status = 400, description = "Invalid or expired token", body = String),
        (status = 429, description = "Rate limited", body = String),
        (status = 503, description = "Login disabled", body = String)
    ),
    tag = "auth"
)]
pub async fn login(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
    query: Query<LoginQuery>,
) -> impl IntoResponse {
    if let Err(err) = ensure_enabled(&auth_state) {
        return err.into_response();
    }

    let client_ip = extract_client_ip(&headers);
    if let Err(err) = ensure_ip_allowed(&auth_state, client_ip.as_deref()).await {
        return err.into_response();
    }
    if let Err(err) = check_rate(&auth_state, client_ip.as_deref(), RateLimitCategory::Login).await
    {
        return err.into_response();
    }

    let token = match auth_state.tokens().validate(&query.token).await {
        Ok(token) => token,
        Err(err) => return err.into_response(),
    };

    // Second-factor decision: OTP first (setting + license), then TOTP for
    // enrolled users when the deployment requires it.
    if auth_state.settings().otp_enabled && auth_state.gate().has_feature("otp-email") {
        let patch = json!({ CONTEXT_OTP_PENDING: true });
        if let Err(err) = TokenRepo::merge_context(auth_state.tokens().pool(), token.id, &patch)
            .await
        {
            return AuthError::Storage(err).into_response();
        }

        let (code, _record) = match auth_state
            .otp()
            .create(&token.email, OtpType::Email, Some(token.id), None)
            .await
        {
            Ok(created) => created,
            Err(err) => return err.into_response(),
        };
        deliver_otp(
            &auth_state,
            &token.email,
            &code,
            auth_state.settings().otp_ttl_seconds,
        )
        .await;

        return Json(ChallengeResponse {
            requires_otp: Some(true),
            requires_totp: None,
            token_id: token.id,
            email: token.email,
            user_id: None,
        })
        .into_response();
    }

    let totp_enabled = if auth_state.settings().totp_required {
        match auth_state.totp().is_enabled(token.user_id).await {
            Ok(enabled) => enabled,
            Err(err) => return err.into_response(),
        }
    } else {
        false
    };
    if totp_enabled {
        let patch = json!({
            CONTEXT_TOTP_PENDING: true,
            CONTEXT_TOTP_USER: token.user_id,
        });
        if let Err(err) = TokenRepo::merge_context(auth_state.tokens().pool(), token.id, &patch)
            .await
        {
            return AuthError::Storage(err).into_response();
        }

        return Json(ChallengeResponse {
            requires_otp: None,
            requires_totp: Some(true),
            token_id: token.id,
            email: token.email,
            user_id: Some(token.user_id),
        })
        .into_response();
    }

    let request = request_info(&headers);
    match complete_token_login(&auth_state, &token, SessionSource::MagicLink, &request).await {
        Ok(response) => Json(response).into_response(),
        Err(err) => err.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::handlers::auth::test_support::lazy_auth_state_with;
    use anyhow::Result;
    use axum::http::StatusCode;

    #[tokio::test]
    async fn login_rejects_when_disabled() -> Result<()> {
        let state = lazy_auth_state_with(|settings| settings.enabled = false)?;
        let response = login(
            HeaderMap::new(),
            Extension(state),
            Query(LoginQuery {
                token: "whatever".to_string(),
            }),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        Ok(())
    }
}
