//! Admin IP ban management.

use axum::{
    extract::{Extension, Path},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use std::sync::Arc;

use crate::{
    api::handlers::auth::{
        state::AuthState,
        storage::{ban_ip, count_bans, list_bans, unban_ip, BannedIp},
    },
    error::AuthError,
};

use super::{require_operator, types::BanRequest};

/// List banned addresses.
#[utoipa::path(
    get,
    path = "/v1/admin/ip-bans",
    responses(
        (status = 200, description = "Banned addresses", body = [BannedIp]),
        (status = 401, description = "No active session"),
        (status = 403, description = "Not an operator")
    ),
    tag = "admin"
)]
pub async fn list_ip_bans(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
) -> impl IntoResponse {
    if let Err(status) = require_operator(&headers, &auth_state).await {
        return status.into_response();
    }
    match list_bans(auth_state.tokens().pool()).await {
        Ok(bans) => Json(bans).into_response(),
        Err(err) => AuthError::Storage(err).into_response(),
    }
}

/// Ban an address. The list size is capped by the licensed quota.
#[utoipa::path(
    post,
    path = "/v1/admin/ip-bans",
    request_body = BanRequest,
    responses(
        (status = 204, description = "Address banned"),
        (status = 400, description = "Bad payload", body = String),
        (status = 402, description = "Ban quota exceeded", body = String)
    ),
    tag = "admin"
)]
pub async fn add_ip_ban(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<BanRequest>>,
) -> impl IntoResponse {
    if let Err(status) = require_operator(&headers, &auth_state).await {
        return status.into_response();
    }
    let request: BanRequest = match payload {
        Some(Json(payload)) => payload,
        None => return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response(),
    };
    let ip = request.ip.trim();
    if ip.is_empty() {
        return (StatusCode::BAD_REQUEST, "Missing ip".to_string()).into_response();
    }

    let max_bans = auth_state.gate().max_ip_bans();
    if max_bans >= 0 {
        match count_bans(auth_state.tokens().pool()).await {
            Ok(current) if current >= max_bans => {
                return AuthError::QuotaExceeded("ip-bans".to_string()).into_response();
            }
            Ok(_) => {}
            Err(err) => return AuthError::Storage(err).into_response(),
        }
    }

    match ban_ip(auth_state.tokens().pool(), ip, request.reason.as_deref()).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => AuthError::Storage(err).into_response(),
    }
}

/// Lift a ban.
#[utoipa::path(
    delete,
    path = "/v1/admin/ip-bans/{ip}",
    params(("ip" = String, Path, description = "Banned address")),
    responses(
        (status = 204, description = "Ban lifted"),
        (status = 404, description = "Address was not banned", body = String)
    ),
    tag = "admin"
)]
pub async fn remove_ip_ban(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
    Path(ip): Path<String>,
) -> impl IntoResponse {
    if let Err(status) = require_operator(&headers, &auth_state).await {
        return status.into_response();
    }
    match unban_ip(auth_state.tokens().pool(), &ip).await {
        Ok(true) => StatusCode::NO_CONTENT.into_response(),
        Ok(false) => (StatusCode::NOT_FOUND, "Not banned".to_string()).into_response(),
        Err(err) => AuthError::Storage(err).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::handlers::auth::test_support::lazy_auth_state;
    use anyhow::Result;

    #[tokio::test]
    async fn ban_endpoints_require_session() -> Result<()> {
        let state = lazy_auth_state()?;
        let response = add_ip_ban(HeaderMap::new(), Extension(state), None)
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        Ok(())
    }
}
