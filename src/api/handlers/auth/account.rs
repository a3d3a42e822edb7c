//! Session-authenticated TOTP self-service: setup, confirm, disable,
//! status, backup codes.

use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use std::sync::Arc;

use crate::{error::AuthError, session::Session, totp::TotpStatus};

use super::{
    session::authenticate_session,
    state::AuthState,
    types::{BackupCodesResponse, TotpConfirmRequest, TotpSetupResponse},
};

/// Resolve the caller's session or reject with 401.
async fn require_session(
    headers: &HeaderMap,
    auth_state: &AuthState,
) -> Result<Session, StatusCode> {
    match authenticate_session(headers, auth_state).await? {
        Some(session) => Ok(session),
        None => Err(StatusCode::UNAUTHORIZED),
    }
}

/// Begin TOTP enrollment. The secret and QR are returned exactly once.
#[utoipa::path(
    post,
    path = "/v1/auth/totp/setup",
    responses(
        (status = 200, description = "Enrollment payload", body = TotpSetupResponse),
        (status = 401, description = "No active session"),
        (status = 402, description = "TOTP not licensed", body = String)
    ),
    tag = "totp"
)]
pub async fn totp_setup(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
) -> impl IntoResponse {
    let session = match require_session(&headers, &auth_state).await {
        Ok(session) => session,
        Err(status) => return status.into_response(),
    };
    if !auth_state.gate().has_feature("totp") {
        return AuthError::FeatureNotLicensed("totp".to_string()).into_response();
    }

    match auth_state.totp().setup(session.user_id, &session.email).await {
        Ok(setup) => Json(TotpSetupResponse {
            credential_id: setup.credential_id,
            secret: setup.secret_base32,
            otpauth_url: setup.otpauth_url,
            qr: setup.qr_data_url,
        })
        .into_response(),
        Err(err) => err.into_response(),
    }
}

/// Confirm enrollment with the first code; this flips the credential
/// enabled.
#[utoipa::path(
    post,
    path = "/v1/auth/totp/confirm",
    request_body = TotpConfirmRequest,
    responses(
        (status = 204, description = "Authenticator enabled"),
        (status = 400, description = "Invalid code", body = String),
        (status = 401, description = "No active session")
    ),
    tag = "totp"
)]
pub async fn totp_confirm(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<TotpConfirmRequest>>,
) -> impl IntoResponse {
    let request: TotpConfirmRequest = match payload {
        Some(Json(payload)) => payload,
        None => return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response(),
    };
    let session = match require_session(&headers, &auth_state).await {
        Ok(session) => session,
        Err(status) => return status.into_response(),
    };

    match auth_state
        .totp()
        .verify(session.user_id, &request.code, true)
        .await
    {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => err.into_response(),
    }
}

/// Remove the authenticator and all backup codes.
#[utoipa::path(
    post,
    path = "/v1/auth/totp/disable",
    responses(
        (status = 204, description = "Authenticator removed"),
        (status = 401, description = "No active session"),
        (status = 409, description = "Nothing to disable", body = String)
    ),
    tag = "totp"
)]
pub async fn totp_disable(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
) -> impl IntoResponse {
    let session = match require_session(&headers, &auth_state).await {
        Ok(session) => session,
        Err(status) => return status.into_response(),
    };
    match auth_state.totp().disable(session.user_id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => err.into_response(),
    }
}

/// Enrollment status for the account surface.
#[utoipa::path(
    get,
    path = "/v1/auth/totp/status",
    responses(
        (status = 200, description = "Enrollment status", body = TotpStatus),
        (status = 401, description = "No active session")
    ),
    tag = "totp"
)]
pub async fn totp_status(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
) -> impl IntoResponse {
    let session = match require_session(&headers, &auth_state).await {
        Ok(session) => session,
        Err(status) => return status.into_response(),
    };
    match auth_state.totp().status(session.user_id).await {
        Ok(status) => Json(status).into_response(),
        Err(err) => err.into_response(),
    }
}

/// Regenerate the single-use backup-code batch. Top license tier only.
#[utoipa::path(
    post,
    path = "/v1/auth/totp/backup-codes",
    responses(
        (status = 200, description = "Fresh backup codes (shown once)", body = BackupCodesResponse),
        (status = 401, description = "No active session"),
        (status = 402, description = "Backup codes not licensed", body = String),
        (status = 409, description = "TOTP not configured", body = String)
    ),
    tag = "totp"
)]
pub async fn totp_backup_codes(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
) -> impl IntoResponse {
    let session = match require_session(&headers, &auth_state).await {
        Ok(session) => session,
        Err(status) => return status.into_response(),
    };
    if !auth_state.gate().has_feature("backup-codes") {
        return AuthError::FeatureNotLicensed("backup-codes".to_string()).into_response();
    }

    match auth_state.totp().generate_backup_codes(session.user_id).await {
        Ok(codes) => Json(BackupCodesResponse { codes }).into_response(),
        Err(err) => err.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::handlers::auth::test_support::lazy_auth_state;
    use anyhow::Result;

    #[tokio::test]
    async fn totp_setup_requires_session() -> Result<()> {
        let state = lazy_auth_state()?;
        let response = totp_setup(HeaderMap::new(), Extension(state))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        Ok(())
    }

    #[tokio::test]
    async fn totp_confirm_requires_payload() -> Result<()> {
        let state = lazy_auth_state()?;
        let response = totp_confirm(HeaderMap::new(), Extension(state), None)
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        Ok(())
    }
}
