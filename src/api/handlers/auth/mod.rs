//! Login orchestration endpoints.
//!
//! Flow Overview:
//! 1) `POST send-link` issues a magic-link token and queues delivery.
//! 2) `GET login` validates the presented token. Depending on settings and
//!    the license tier it either issues a session directly or returns an
//!    OTP/TOTP challenge (no session yet).
//! 3) `POST otp/verify` / `POST verify-mfa-totp` complete a pending
//!    challenge and issue the session.
//! 4) `POST login-totp` is a separate primary-factor entry point gated by
//!    configuration and an advanced-or-higher license.
//!
//! Security boundaries:
//! - No session exists until the last required factor verifies.
//! - Failures perform no partial mutation: token consumption and session
//!   creation are single atomic statements.
//! - Rate limits are enforced before any token or code work.

pub(crate) mod account;
pub(crate) mod link;
pub(crate) mod login;
pub(crate) mod mfa;
pub(crate) mod otp;
pub(crate) mod session;
pub(crate) mod state;
pub(crate) mod storage;
#[cfg(test)]
pub(crate) mod test_support;
pub(crate) mod types;
pub(crate) mod utils;

pub use state::{AuthConfig, AuthServices, AuthState};

use serde_json::Value;
use tracing::warn;

use crate::{
    error::{AuthError, Result},
    notify::{self, Channel, MessageKind, TemplateContext},
    ratelimit::{RateLimitCategory, RateLimitDecision},
    session::SessionSource,
    token::{models::sanitize_session_context, service::RequestInfo, LoginToken},
    users::DirectoryUser,
};

use types::{LoginResponse, UserInfo};

/// Count a request against the limiter and map a denial to `RateLimited`.
pub(crate) async fn check_rate(
    state: &AuthState,
    identifier: Option<&str>,
    category: RateLimitCategory,
) -> Result<()> {
    let Some(identifier) = identifier else {
        return Ok(());
    };
    match state
        .rate_limiter()
        .check(identifier, category)
        .await
        .map_err(AuthError::Storage)?
    {
        RateLimitDecision::Allowed => Ok(()),
        RateLimitDecision::Limited { retry_after } => Err(AuthError::RateLimited {
            retry_after_seconds: retry_after.as_secs(),
        }),
    }
}

/// Reject early when the master switch is off.
pub(crate) fn ensure_enabled(state: &AuthState) -> Result<()> {
    if state.settings().enabled {
        Ok(())
    } else {
        Err(AuthError::LoginDisabled)
    }
}

/// Reject requests from banned addresses.
pub(crate) async fn ensure_ip_allowed(state: &AuthState, ip: Option<&str>) -> Result<()> {
    let Some(ip) = ip else {
        return Ok(());
    };
    if storage::ip_banned(state.tokens().pool(), ip)
        .await
        .map_err(AuthError::Storage)?
    {
        return Err(AuthError::UserBlocked);
    }
    Ok(())
}

/// Final step of every successful flow: confirm the user when needed and
/// issue the bearer credential with its session record.
pub(crate) async fn issue_login_response(
    state: &AuthState,
    user: DirectoryUser,
    context: Value,
    source: SessionSource,
    request: &RequestInfo,
) -> Result<LoginResponse> {
    if user.blocked {
        return Err(AuthError::UserBlocked);
    }
    if !user.confirmed {
        // First successful login is proof of mailbox ownership.
        state.directory().set_confirmed(user.id).await?;
    }

    let issued = state
        .sessions()
        .issue(
            &user,
            context.clone(),
            source,
            request,
            state.gate().max_sessions(),
        )
        .await?;

    Ok(LoginResponse {
        jwt: issued.credential,
        user: UserInfo {
            id: user.id,
            email: user.email,
            username: user.username,
        },
        expires_at: issued.session.expires_at,
        context,
    })
}

/// Complete a magic-link flow: consume the token, resolve its owner, and
/// issue the session with the sanitized context subset.
pub(crate) async fn complete_token_login(
    state: &AuthState,
    token: &LoginToken,
    source: SessionSource,
    request: &RequestInfo,
) -> Result<LoginResponse> {
    state.tokens().consume(token, request).await?;
    let user = state
        .directory()
        .find_by_email(&token.email)
        .await?
        .ok_or(AuthError::UserNotFound)?;
    let context = sanitize_session_context(&token.context);
    issue_login_response(state, user, context, source, request).await
}

/// Verify a TOTP code, accepting a backup code as fallback when the license
/// includes them.
pub(crate) async fn verify_totp_or_backup(
    state: &AuthState,
    user_id: uuid::Uuid,
    code: &str,
) -> Result<()> {
    match state.totp().verify(user_id, code, false).await {
        Err(AuthError::TotpInvalid) if state.gate().has_feature("backup-codes") => {
            state.totp().consume_backup_code(user_id, code).await
        }
        other => other,
    }
}

/// Queue a one-time code for delivery. A failed enqueue leaves the code
/// valid for resend and is logged as a delivery warning.
pub(crate) async fn deliver_otp(state: &AuthState, email: &str, code: &str, ttl_seconds: i64) {
    let message = state.render(
        MessageKind::OtpCode,
        &TemplateContext {
            url: None,
            code: Some(code.to_string()),
            expiry_text: notify::expiry_text(ttl_seconds),
        },
    );
    if let Err(err) = notify::enqueue(state.tokens().pool(), Channel::Email, email, &message).await
    {
        warn!("one-time code delivery enqueue failed: {err:#}");
    }
}
