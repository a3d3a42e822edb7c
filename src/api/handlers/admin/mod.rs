//! Operator-gated administrative endpoints.
//!
//! Admin requests authenticate with a bearer session whose user carries the
//! operator flag. Revoked credentials are rejected by the session registry
//! before any other check runs.

pub(crate) mod bans;
pub(crate) mod license;
pub(crate) mod rate_limits;
pub(crate) mod sessions;
pub(crate) mod tokens;
pub(crate) mod types;

use axum::http::{HeaderMap, StatusCode};
use tracing::error;

use crate::session::Session;

use super::auth::{session::authenticate_session, state::AuthState, storage::operator_enabled};

/// Resolve the caller's session and require the operator flag.
pub(crate) async fn require_operator(
    headers: &HeaderMap,
    auth_state: &AuthState,
) -> Result<Session, StatusCode> {
    let Some(session) = authenticate_session(headers, auth_state).await? else {
        return Err(StatusCode::UNAUTHORIZED);
    };
    match operator_enabled(auth_state.tokens().pool(), session.user_id).await {
        Ok(true) => Ok(session),
        Ok(false) => Err(StatusCode::FORBIDDEN),
        Err(err) => {
            error!("failed to check operator flag: {err:#}");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}
