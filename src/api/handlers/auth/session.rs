//! Session introspection and logout.

use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use std::sync::Arc;
use tracing::error;

use crate::session::Session;

use super::{
    state::AuthState,
    types::SessionResponse,
    utils::extract_bearer_token,
};

/// Resolve the bearer credential into a live session, if any.
///
/// Returns `Ok(None)` when the credential is missing, invalid, revoked, or
/// expired; the caller decides what that means for its endpoint.
pub(crate) async fn authenticate_session(
    headers: &HeaderMap,
    auth_state: &AuthState,
) -> Result<Option<Session>, StatusCode> {
    let Some(credential) = extract_bearer_token(headers) else {
        return Ok(None);
    };
    match auth_state.sessions().authorize(&credential).await {
        Ok(session) => Ok(session),
        Err(err) => {
            error!("failed to authorize session: {err:#}");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// Check the presented bearer credential.
#[utoipa::path(
    get,
    path = "/v1/auth/session",
    responses(
        (status = 200, description = "Session is active", body = SessionResponse),
        (status = 204, description = "No active session")
    ),
    tag = "auth"
)]
pub async fn session(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
) -> impl IntoResponse {
    match authenticate_session(&headers, &auth_state).await {
        Ok(Some(session)) => Json(SessionResponse {
            user_id: session.user_id,
            email: session.email,
            source: session.source.as_str().to_string(),
            expires_at: session.expires_at,
        })
        .into_response(),
        // Missing/invalid credentials are "no session", never an error, to
        // avoid leaking auth state.
        Ok(None) => StatusCode::NO_CONTENT.into_response(),
        Err(status) => status.into_response(),
    }
}

/// Revoke the presented credential.
#[utoipa::path(
    post,
    path = "/v1/auth/logout",
    responses(
        (status = 204, description = "Session revoked (idempotent)")
    ),
    tag = "auth"
)]
pub async fn logout(headers: HeaderMap, auth_state: Extension<Arc<AuthState>>) -> impl IntoResponse {
    if let Some(credential) = extract_bearer_token(&headers) {
        if let Err(err) = auth_state
            .sessions()
            .revoke_credential(&credential, "logout")
            .await
        {
            error!("failed to revoke session on logout: {err:#}");
        }
    }
    // Logout is idempotent; an unknown credential still gets 204.
    StatusCode::NO_CONTENT
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::handlers::auth::test_support::lazy_auth_state;
    use anyhow::Result;

    #[tokio::test]
    async fn session_without_credential_is_no_content() -> Result<()> {
        let state = lazy_auth_state()?;
        let response = session(HeaderMap::new(), Extension(state))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        Ok(())
    }

    #[tokio::test]
    async fn logout_without_credential_is_no_content() -> Result<()> {
        let state = lazy_auth_state()?;
        let response = logout(HeaderMap::new(), Extension(state))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        Ok(())
    }
}
