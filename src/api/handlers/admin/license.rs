//! Admin license operations.

use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use std::sync::Arc;
use tracing::error;

use crate::{
    api::handlers::auth::state::AuthState,
    error::AuthError,
    license::{state::LicenseStateRepo, LicenseState, LicenseTier},
};

use super::{
    require_operator,
    types::{LicenseCreateRequest, LicenseStatusResponse},
};

/// Current license status: cached descriptor plus the effective tier.
#[utoipa::path(
    get,
    path = "/v1/admin/license",
    responses(
        (status = 200, description = "License status", body = LicenseStatusResponse),
        (status = 401, description = "No active session"),
        (status = 403, description = "Not an operator")
    ),
    tag = "admin"
)]
pub async fn license_status(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
) -> impl IntoResponse {
    if let Err(status) = require_operator(&headers, &auth_state).await {
        return status.into_response();
    }
    let snapshot = auth_state.gate().snapshot();
    Json(LicenseStatusResponse {
        effective_tier: auth_state.gate().effective_tier().to_string(),
        license_key: snapshot.as_ref().map(|state| state.license_key.clone()),
        last_validated_at: snapshot.as_ref().map(|state| state.last_validated_at),
        expires_at: snapshot.as_ref().and_then(|state| state.expires_at),
        active: snapshot.as_ref().is_some_and(|state| state.active),
    })
    .into_response()
}

/// Create a license on the license server and adopt it immediately.
#[utoipa::path(
    post,
    path = "/v1/admin/license/create",
    request_body = LicenseCreateRequest,
    responses(
        (status = 200, description = "License created and adopted", body = LicenseStatusResponse),
        (status = 503, description = "No license server configured", body = String)
    ),
    tag = "admin"
)]
pub async fn license_create(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<LicenseCreateRequest>>,
) -> impl IntoResponse {
    if let Err(status) = require_operator(&headers, &auth_state).await {
        return status.into_response();
    }
    let request: LicenseCreateRequest = match payload {
        Some(Json(payload)) => payload,
        None => return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response(),
    };
    let Some(client) = auth_state.license_client() else {
        return no_license_server();
    };

    let remote = match client.create(&request.tier, &request.email).await {
        Ok(remote) => remote,
        Err(err) => {
            error!("license create failed: {err:#}");
            return (
                StatusCode::BAD_GATEWAY,
                "License server unavailable".to_string(),
            )
                .into_response();
        }
    };

    let snapshot = auth_state.gate().snapshot();
    let device_id = snapshot
        .map(|state| state.device_id)
        .unwrap_or_else(|| "unbound".to_string());
    let state = LicenseState {
        license_key: remote.key,
        tier: LicenseTier::parse(&remote.tier),
        expires_at: remote.expires_at,
        device_id,
        last_validated_at: Utc::now(),
        active: remote.active,
    };
    if let Err(err) = LicenseStateRepo::save(auth_state.tokens().pool(), &state).await {
        return AuthError::Storage(err).into_response();
    }
    auth_state.gate().update(Some(state));

    status_body(&auth_state)
}

/// Force an immediate validation ping.
#[utoipa::path(
    post,
    path = "/v1/admin/license/ping",
    responses(
        (status = 200, description = "License re-validated", body = LicenseStatusResponse),
        (status = 502, description = "License server unreachable (grace policy applies)", body = String),
        (status = 503, description = "No license server configured", body = String)
    ),
    tag = "admin"
)]
pub async fn license_ping(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
) -> impl IntoResponse {
    if let Err(status) = require_operator(&headers, &auth_state).await {
        return status.into_response();
    }
    let Some(client) = auth_state.license_client() else {
        return no_license_server();
    };
    let Some(current) = auth_state.gate().snapshot() else {
        return (StatusCode::CONFLICT, "No license configured".to_string()).into_response();
    };

    match client.ping(&current.license_key, &current.device_id).await {
        Ok(remote) => {
            let state = LicenseState {
                license_key: current.license_key,
                tier: LicenseTier::parse(&remote.tier),
                expires_at: remote.expires_at,
                device_id: current.device_id,
                last_validated_at: Utc::now(),
                active: remote.active,
            };
            if let Err(err) = LicenseStateRepo::save(auth_state.tokens().pool(), &state).await {
                return AuthError::Storage(err).into_response();
            }
            auth_state.gate().update(Some(state));
            status_body(&auth_state)
        }
        Err(err) => {
            // Not fatal: the cached state stays trusted within grace.
            error!("manual license ping failed: {err:#}");
            (
                StatusCode::BAD_GATEWAY,
                "License server unavailable".to_string(),
            )
                .into_response()
        }
    }
}

/// Deactivate the license and drop to the free tier.
#[utoipa::path(
    post,
    path = "/v1/admin/license/deactivate",
    responses(
        (status = 204, description = "License deactivated"),
        (status = 503, description = "No license server configured", body = String)
    ),
    tag = "admin"
)]
pub async fn license_deactivate(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
) -> impl IntoResponse {
    if let Err(status) = require_operator(&headers, &auth_state).await {
        return status.into_response();
    }
    let Some(client) = auth_state.license_client() else {
        return no_license_server();
    };
    let Some(current) = auth_state.gate().snapshot() else {
        return (StatusCode::CONFLICT, "No license configured".to_string()).into_response();
    };

    // Best effort against the server; local state clears regardless, so a
    // dead license server cannot keep paid features alive.
    match client.get_by_key(&current.license_key).await {
        Ok(remote) => {
            if let Err(err) = client.deactivate(&remote.id).await {
                error!("remote license deactivation failed: {err:#}");
            }
        }
        Err(err) => error!("license lookup for deactivation failed: {err:#}"),
    }

    if let Err(err) = LicenseStateRepo::clear(auth_state.tokens().pool()).await {
        return AuthError::Storage(err).into_response();
    }
    auth_state.gate().update(None);
    StatusCode::NO_CONTENT.into_response()
}

fn status_body(auth_state: &AuthState) -> axum::response::Response {
    let snapshot = auth_state.gate().snapshot();
    Json(LicenseStatusResponse {
        effective_tier: auth_state.gate().effective_tier().to_string(),
        license_key: snapshot.as_ref().map(|state| state.license_key.clone()),
        last_validated_at: snapshot.as_ref().map(|state| state.last_validated_at),
        expires_at: snapshot.as_ref().and_then(|state| state.expires_at),
        active: snapshot.as_ref().is_some_and(|state| state.active),
    })
    .into_response()
}

fn no_license_server() -> axum::response::Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        "No license server configured".to_string(),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::handlers::auth::test_support::lazy_auth_state;
    use anyhow::Result;

    #[tokio::test]
    async fn license_status_requires_session() -> Result<()> {
        let state = lazy_auth_state()?;
        let response = license_status(HeaderMap::new(), Extension(state))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        Ok(())
    }
}
