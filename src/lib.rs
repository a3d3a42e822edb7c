//! # Sesamo (Magic Link Authentication & Session Security Engine)
//!
//! `sesamo` issues and validates single-use magic-link login tokens,
//! escalates to secondary factors (email/SMS one-time codes, TOTP) when the
//! deployment requires them, and tracks every issued session credential so it
//! can be individually revoked.
//!
//! ## Token model
//!
//! Login tokens and one-time codes are never stored in plaintext. The
//! database keeps `SHA-256(secret || salt)` for magic-link tokens and a
//! peppered hash for OTP codes; TOTP secrets are encrypted at rest with
//! ChaCha20-Poly1305 and decrypted only at verification time. All secret
//! comparisons are constant-time.
//!
//! ## Login flow
//!
//! A client requests a link (`POST /v1/auth/send-link`), later presents the
//! token (`GET /v1/auth/login`). Depending on deployment settings and the
//! active license tier, the flow either issues a session directly or returns
//! an OTP/TOTP challenge that must be completed before a session exists.
//! Sessions are bearer JWTs; the registry records a stable prefix of each
//! credential so admins can revoke a single session (or a raw credential)
//! at any time, independent of its expiry.
//!
//! ## Licensing
//!
//! Feature availability (`otp-email`, `totp-primary`, `backup-codes`, ...)
//! and quotas are resolved from a cached license descriptor with tier order
//! `free < premium < advanced < enterprise`. A background monitor pings the
//! license server; transient verification outages degrade to a bounded grace
//! period instead of blocking logins.

pub mod api;
pub mod cli;
pub mod crypto;
pub mod error;
pub mod license;
pub mod notify;
pub mod otp;
pub mod ratelimit;
pub mod session;
pub mod settings;
pub mod token;
pub mod totp;
pub mod users;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_git_commit_hash_format() {
        if GIT_COMMIT_HASH == "unknown" {
            // Acceptable in non-git build environments
            return;
        }
        assert!(
            GIT_COMMIT_HASH.chars().all(|c| c.is_ascii_hexdigit()),
            "GIT_COMMIT_HASH should be a hex string, got: {GIT_COMMIT_HASH}"
        );
        assert!(
            GIT_COMMIT_HASH.len() >= 7,
            "GIT_COMMIT_HASH should be at least 7 characters long, got: {GIT_COMMIT_HASH}"
        );
    }

    #[test]
    fn test_app_user_agent_format() {
        assert!(APP_USER_AGENT.starts_with(env!("CARGO_PKG_NAME")));
        assert!(APP_USER_AGENT.contains(env!("CARGO_PKG_VERSION")));
    }
}
