//! TOTP login endpoints: challenge completion and primary-factor login.

use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    error::AuthError,
    ratelimit::RateLimitCategory,
    session::SessionSource,
    token::models::{
        sanitize_session_context, CONTEXT_TOTP_PENDING, CONTEXT_TOTP_USER,
    },
    token::repo::TokenRepo,
    users::{normalize_email, valid_email},
};

use super::{
    check_rate, ensure_enabled, ensure_ip_allowed, issue_login_response, state::AuthState,
    types::{LoginResponse, LoginTotpRequest, VerifyMfaTotpRequest},
    utils::{extract_client_ip, request_info},
    verify_totp_or_backup,
};

/// Complete a pending magic-link + TOTP challenge.
#[utoipa::path(
    post,
    path = "/v1/auth/verify-mfa-totp",
    request_body = VerifyMfaTotpRequest,
    responses(
        (status = 200, description = "Session issued", body = LoginResponse),
        (status = 400, description = "Invalid token or code", body = String),
        (status = 429, description = "Rate limited", body = String)
    ),
    tag = "mfa"
)]
pub async fn verify_mfa_totp(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<VerifyMfaTotpRequest>>,
) -> impl IntoResponse {
    let request: VerifyMfaTotpRequest = match payload {
        Some(Json(payload)) => payload,
        None => return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response(),
    };

    let verified = async {
        ensure_enabled(&auth_state)?;
        let client_ip = extract_client_ip(&headers);
        ensure_ip_allowed(&auth_state, client_ip.as_deref()).await?;
        check_rate(
            &auth_state,
            client_ip.as_deref(),
            RateLimitCategory::TotpVerify,
        )
        .await?;

        // The challenge re-presents the magic-link secret; it has not been
        // consumed yet.
        let token = auth_state.tokens().validate(&request.login_token).await?;
        if !token.context_flag(CONTEXT_TOTP_PENDING) {
            return Err(AuthError::TokenInvalid);
        }
        let user_id = token
            .context
            .get(CONTEXT_TOTP_USER)
            .and_then(|value| value.as_str())
            .and_then(|value| Uuid::parse_str(value).ok())
            .unwrap_or(token.user_id);

        verify_totp_or_backup(&auth_state, user_id, &request.totp_code).await?;

        let patch = json!({ CONTEXT_TOTP_PENDING: false, "totp_verified": true });
        TokenRepo::merge_context(auth_state.tokens().pool(), token.id, &patch)
            .await
            .map_err(AuthError::Storage)?;

        let info = request_info(&headers);
        auth_state.tokens().consume(&token, &info).await?;
        let user = auth_state
            .directory()
            .find_by_email(&token.email)
            .await?
            .ok_or(AuthError::UserNotFound)?;
        issue_login_response(
            &auth_state,
            user,
            sanitize_session_context(&token.context),
            SessionSource::MagicLinkTotp,
            &info,
        )
        .await
    }
    .await;

    match verified {
        Ok(response) => Json(response).into_response(),
        Err(err) => err.into_response(),
    }
}

/// TOTP as the primary factor: no magic link involved. Requires the
/// deployment flag and an advanced-or-higher license.
#[utoipa::path(
    post,
    path = "/v1/auth/login-totp",
    request_body = LoginTotpRequest,
    responses(
        (status = 200, description = "Session issued", body = LoginResponse),
        (status = 400, description = "Invalid code", body = String),
        (status = 402, description = "Feature not licensed", body = String),
        (status = 404, description = "User not found", body = String),
        (status = 409, description = "TOTP not configured", body = String),
        (status = 429, description = "Rate limited", body = String)
    ),
    tag = "mfa"
)]
pub async fn login_totp(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<LoginTotpRequest>>,
) -> impl IntoResponse {
    let request: LoginTotpRequest = match payload {
        Some(Json(payload)) => payload,
        None => return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response(),
    };
    let email = normalize_email(&request.email);
    if !valid_email(&email) {
        return (StatusCode::BAD_REQUEST, "Invalid email".to_string()).into_response();
    }

    let verified = async {
        ensure_enabled(&auth_state)?;
        if !auth_state.settings().totp_primary_enabled {
            return Err(AuthError::LoginDisabled);
        }
        if !auth_state.gate().has_feature("totp-primary") {
            return Err(AuthError::FeatureNotLicensed("totp-primary".to_string()));
        }

        let client_ip = extract_client_ip(&headers);
        ensure_ip_allowed(&auth_state, client_ip.as_deref()).await?;
        check_rate(
            &auth_state,
            client_ip.as_deref(),
            RateLimitCategory::TotpVerify,
        )
        .await?;
        check_rate(&auth_state, Some(&email), RateLimitCategory::TotpVerify).await?;

        let user = auth_state
            .directory()
            .find_by_email(&email)
            .await?
            .ok_or(AuthError::UserNotFound)?;
        if user.blocked {
            return Err(AuthError::UserBlocked);
        }
        if !auth_state.totp().is_enabled(user.id).await? {
            return Err(AuthError::TotpNotConfigured);
        }

        verify_totp_or_backup(&auth_state, user.id, &request.totp_code).await?;

        issue_login_response(
            &auth_state,
            user,
            json!({}),
            SessionSource::TotpPrimary,
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::handlers::auth::test_support::lazy_auth_state_with;
    use anyhow::Result;

    #[tokio::test]
    async fn login_totp_requires_primary_flag() -> Result<()> {
        let state = lazy_auth_state_with(|_| {})?;
        let response = login_totp(
            HeaderMap::new(),
            Extension(state),
            Some(Json(LoginTotpRequest {
                email: "alice@example.com".to_string(),
                totp_code: "123456".to_string(),
            })),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        Ok(())
    }

    #[tokio::test]
    async fn login_totp_requires_advanced_license() -> Result<()> {
        // Flag on, but the absent license resolves to free.
        let state = lazy_auth_state_with(|settings| settings.totp_primary_enabled = true)?;
        let response = login_totp(
            HeaderMap::new(),
            Extension(state),
            Some(Json(LoginTotpRequest {
                email: "alice@example.com".to_string(),
                totp_code: "123456".to_string(),
            })),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
        Ok(())
    }
}
