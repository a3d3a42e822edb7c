//! Admin session management.

use axum::{
    extract::{Extension, Path, Query},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use std::sync::Arc;

use crate::api::handlers::auth::state::AuthState;

use super::{
    require_operator,
    types::{AffectedResponse, PageQuery, RevokeCredentialRequest, RevokeRequest, SessionSummary},
};

const DEFAULT_REVOKE_REASON: &str = "revoked by administrator";

/// List sessions, newest first.
#[utoipa::path(
    get,
    path = "/v1/admin/sessions",
    params(
        ("limit" = i64, Query, description = "Page size"),
        ("offset" = i64, Query, description = "Page offset")
    ),
    responses(
        (status = 200, description = "Sessions", body = [SessionSummary]),
        (status = 401, description = "No active session"),
        (status = 403, description = "Not an operator")
    ),
    tag = "admin"
)]
pub async fn list_sessions(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
    query: Query<PageQuery>,
) -> impl IntoResponse {
    if let Err(status) = require_operator(&headers, &auth_state).await {
        return status.into_response();
    }
    match auth_state
        .sessions()
        .list(query.limit.clamp(1, 500), query.offset.max(0))
        .await
    {
        Ok(sessions) => Json(
            sessions
                .into_iter()
                .map(SessionSummary::from)
                .collect::<Vec<_>>(),
        )
        .into_response(),
        Err(err) => err.into_response(),
    }
}

/// Revoke one session by id (idempotent).
#[utoipa::path(
    post,
    path = "/v1/admin/sessions/{id}/revoke",
    params(("id" = String, Path, description = "Session id")),
    request_body = RevokeRequest,
    responses(
        (status = 204, description = "Session revoked"),
        (status = 404, description = "Unknown session", body = String)
    ),
    tag = "admin"
)]
pub async fn revoke_session(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
    Path(id): Path<String>,
    payload: Option<Json<RevokeRequest>>,
) -> impl IntoResponse {
    if let Err(status) = require_operator(&headers, &auth_state).await {
        return status.into_response();
    }
    let reason = payload
        .map(|Json(payload)| payload)
        .unwrap_or_default()
        .reason
        .unwrap_or_else(|| DEFAULT_REVOKE_REASON.to_string());

    match auth_state.sessions().revoke(&id, &reason).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => err.into_response(),
    }
}

/// Clear the revoked flag; refused once the session naturally expired.
#[utoipa::path(
    post,
    path = "/v1/admin/sessions/{id}/unrevoke",
    params(("id" = String, Path, description = "Session id")),
    responses(
        (status = 204, description = "Session restored"),
        (status = 400, description = "Session expired", body = String),
        (status = 404, description = "Unknown session", body = String)
    ),
    tag = "admin"
)]
pub async fn unrevoke_session(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    if let Err(status) = require_operator(&headers, &auth_state).await {
        return status.into_response();
    }
    match auth_state.sessions().unrevoke(&id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => err.into_response(),
    }
}

/// Legacy path: revoke every session matching a raw credential.
#[utoipa::path(
    post,
    path = "/v1/admin/sessions/revoke-credential",
    request_body = RevokeCredentialRequest,
    responses(
        (status = 200, description = "Sessions revoked", body = AffectedResponse)
    ),
    tag = "admin"
)]
pub async fn revoke_credential(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<RevokeCredentialRequest>>,
) -> impl IntoResponse {
    if let Err(status) = require_operator(&headers, &auth_state).await {
        return status.into_response();
    }
    let request: RevokeCredentialRequest = match payload {
        Some(Json(payload)) => payload,
        None => return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response(),
    };
    let reason = request
        .reason
        .unwrap_or_else(|| DEFAULT_REVOKE_REASON.to_string());

    match auth_state
        .sessions()
        .revoke_credential(&request.credential, &reason)
        .await
    {
        Ok(affected) => Json(AffectedResponse { affected }).into_response(),
        Err(err) => err.into_response(),
    }
}

/// Mark expired sessions revoked (the on-demand expiry sweep).
#[utoipa::path(
    post,
    path = "/v1/admin/sessions/cleanup",
    responses(
        (status = 200, description = "Sessions swept", body = AffectedResponse)
    ),
    tag = "admin"
)]
pub async fn cleanup_sessions(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
) -> impl IntoResponse {
    if let Err(status) = require_operator(&headers, &auth_state).await {
        return status.into_response();
    }
    match auth_state.sessions().sweep_expired().await {
        Ok(affected) => Json(AffectedResponse { affected }).into_response(),
        Err(err) => err.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::handlers::auth::test_support::lazy_auth_state;
    use anyhow::Result;

    #[tokio::test]
    async fn revoke_credential_requires_session() -> Result<()> {
        let state = lazy_auth_state()?;
        let response = revoke_credential(HeaderMap::new(), Extension(state), None)
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        Ok(())
    }
}
