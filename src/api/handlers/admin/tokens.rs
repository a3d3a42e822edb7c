//! Admin token management.

use axum::{
    extract::{Extension, Path, Query},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::{api::handlers::auth::state::AuthState, error::AuthError, token::repo::TokenRepo};

use super::{
    require_operator,
    types::{
        AdminTokenCreateRequest, AdminTokenCreateResponse, AffectedResponse, ExtendTokenRequest,
        ExtendTokenResponse, PageQuery, TokenSummary,
    },
};

/// List tokens, newest first.
#[utoipa::path(
    get,
    path = "/v1/admin/tokens",
    params(
        ("limit" = i64, Query, description = "Page size"),
        ("offset" = i64, Query, description = "Page offset")
    ),
    responses(
        (status = 200, description = "Tokens", body = [TokenSummary]),
        (status = 401, description = "No active session"),
        (status = 403, description = "Not an operator")
    ),
    tag = "admin"
)]
pub async fn list_tokens(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
    query: Query<PageQuery>,
) -> impl IntoResponse {
    if let Err(status) = require_operator(&headers, &auth_state).await {
        return status.into_response();
    }
    match TokenRepo::list(
        auth_state.tokens().pool(),
        query.limit.clamp(1, 500),
        query.offset.max(0),
    )
    .await
    {
        Ok(tokens) => Json(
            tokens
                .into_iter()
                .map(TokenSummary::from)
                .collect::<Vec<_>>(),
        )
        .into_response(),
        Err(err) => AuthError::Storage(err).into_response(),
    }
}

/// Create a token on a user's behalf; returns the login link once.
#[utoipa::path(
    post,
    path = "/v1/admin/tokens",
    request_body = AdminTokenCreateRequest,
    responses(
        (status = 200, description = "Token created", body = AdminTokenCreateResponse),
        (status = 401, description = "No active session"),
        (status = 403, description = "Not an operator")
    ),
    tag = "admin"
)]
pub async fn create_token(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<AdminTokenCreateRequest>>,
) -> impl IntoResponse {
    if let Err(status) = require_operator(&headers, &auth_state).await {
        return status.into_response();
    }
    let request: AdminTokenCreateRequest = match payload {
        Some(Json(payload)) => payload,
        None => return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response(),
    };

    let context = request.context.unwrap_or(serde_json::Value::Null);
    match auth_state
        .tokens()
        .issue(&request.email, &context, auth_state.gate().max_tokens())
        .await
    {
        Ok(issued) => Json(AdminTokenCreateResponse {
            id: issued.token.id,
            email: issued.token.email,
            expires_at: issued.token.expires_at,
            link: auth_state.config().login_url(&issued.secret),
        })
        .into_response(),
        Err(err) => err.into_response(),
    }
}

/// Deactivate a token.
#[utoipa::path(
    post,
    path = "/v1/admin/tokens/{id}/block",
    params(("id" = Uuid, Path, description = "Token id")),
    responses(
        (status = 204, description = "Token blocked"),
        (status = 400, description = "Unknown token", body = String)
    ),
    tag = "admin"
)]
pub async fn block_token(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    if let Err(status) = require_operator(&headers, &auth_state).await {
        return status.into_response();
    }
    match auth_state.tokens().block(id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => err.into_response(),
    }
}

/// Reactivate a blocked token.
#[utoipa::path(
    post,
    path = "/v1/admin/tokens/{id}/reactivate",
    params(("id" = Uuid, Path, description = "Token id")),
    responses(
        (status = 204, description = "Token reactivated"),
        (status = 400, description = "Unknown token", body = String)
    ),
    tag = "admin"
)]
pub async fn reactivate_token(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    if let Err(status) = require_operator(&headers, &auth_state).await {
        return status.into_response();
    }
    match auth_state.tokens().reactivate(id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => err.into_response(),
    }
}

/// Extend a token's expiry by N days from `max(now, expires_at)`.
#[utoipa::path(
    post,
    path = "/v1/admin/tokens/{id}/extend",
    params(("id" = Uuid, Path, description = "Token id")),
    request_body = ExtendTokenRequest,
    responses(
        (status = 200, description = "New expiry", body = ExtendTokenResponse),
        (status = 400, description = "Unknown token or bad payload", body = String)
    ),
    tag = "admin"
)]
pub async fn extend_token(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
    Path(id): Path<Uuid>,
    payload: Option<Json<ExtendTokenRequest>>,
) -> impl IntoResponse {
    if let Err(status) = require_operator(&headers, &auth_state).await {
        return status.into_response();
    }
    let request: ExtendTokenRequest = match payload {
        Some(Json(payload)) => payload,
        None => return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response(),
    };
    if request.days <= 0 {
        return (StatusCode::BAD_REQUEST, "days must be positive".to_string()).into_response();
    }

    match auth_state.tokens().extend(id, request.days).await {
        Ok(expires_at) => Json(ExtendTokenResponse { expires_at }).into_response(),
        Err(err) => err.into_response(),
    }
}

/// Delete a token record.
#[utoipa::path(
    delete,
    path = "/v1/admin/tokens/{id}",
    params(("id" = Uuid, Path, description = "Token id")),
    responses(
        (status = 204, description = "Token deleted"),
        (status = 400, description = "Unknown token", body = String)
    ),
    tag = "admin"
)]
pub async fn delete_token(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    if let Err(status) = require_operator(&headers, &auth_state).await {
        return status.into_response();
    }
    match TokenRepo::delete(auth_state.tokens().pool(), id).await {
        Ok(true) => StatusCode::NO_CONTENT.into_response(),
        Ok(false) => AuthError::TokenInvalid.into_response(),
        Err(err) => AuthError::Storage(err).into_response(),
    }
}

/// Physically remove expired, inactive tokens.
#[utoipa::path(
    post,
    path = "/v1/admin/tokens/cleanup",
    responses(
        (status = 200, description = "Rows removed", body = AffectedResponse)
    ),
    tag = "admin"
)]
pub async fn cleanup_tokens(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
) -> impl IntoResponse {
    if let Err(status) = require_operator(&headers, &auth_state).await {
        return status.into_response();
    }
    match TokenRepo::purge_expired(auth_state.tokens().pool()).await {
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
    async fn admin_endpoints_require_session() -> Result<()> {
        let state = lazy_auth_state()?;
        let response = cleanup_tokens(HeaderMap::new(), Extension(state))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        Ok(())
    }
}
