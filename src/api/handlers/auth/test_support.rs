//! Shared fixtures for handler tests.
//!
//! These states use a lazy pool that never connects: tests exercise the
//! validation and gating paths that return before any query runs.

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    license::LicenseGate,
    otp::OtpService,
    ratelimit::NoopRateLimiter,
    session::{jwt::JwtSigner, SessionService},
    settings::Settings,
    token::TokenService,
    totp::TotpService,
    users::{DirectoryUser, UserDirectory},
};

use super::state::{AuthConfig, AuthServices, AuthState};

/// Directory stub with a fixed (possibly absent) user.
pub(crate) struct StubDirectory {
    user: Option<DirectoryUser>,
}

impl StubDirectory {
    pub(crate) fn empty() -> Self {
        Self { user: None }
    }

    pub(crate) fn with_user(email: &str, blocked: bool) -> Self {
        Self {
            user: Some(DirectoryUser {
                id: Uuid::new_v4(),
                email: email.to_string(),
                username: "stub".to_string(),
                confirmed: true,
                blocked,
                created_at: Utc::now(),
            }),
        }
    }
}

#[async_trait]
impl UserDirectory for StubDirectory {
    async fn find_by_email(&self, _email: &str) -> Result<Option<DirectoryUser>> {
        Ok(self.user.clone())
    }

    async fn create(&self, email: &str) -> Result<DirectoryUser> {
        Ok(DirectoryUser {
            id: Uuid::new_v4(),
            email: email.to_string(),
            username: "created".to_string(),
            confirmed: false,
            blocked: false,
            created_at: Utc::now(),
        })
    }

    async fn set_confirmed(&self, _id: Uuid) -> Result<()> {
        Ok(())
    }
}

pub(crate) fn lazy_auth_state() -> Result<Arc<AuthState>> {
    lazy_auth_state_with(|_| {})
}

pub(crate) fn lazy_auth_state_with(
    mutate: impl FnOnce(&mut Settings),
) -> Result<Arc<AuthState>> {
    lazy_auth_state_full(mutate, StubDirectory::empty())
}

pub(crate) fn lazy_auth_state_full(
    mutate: impl FnOnce(&mut Settings),
    directory: StubDirectory,
) -> Result<Arc<AuthState>> {
    let pool = PgPoolOptions::new().connect_lazy("postgres://postgres@localhost/postgres")?;
    let mut settings = Settings::default();
    mutate(&mut settings);

    let directory: Arc<dyn UserDirectory> = Arc::new(directory);
    let services = AuthServices {
        tokens: TokenService::new(pool.clone(), directory.clone(), settings.clone()),
        otp: OtpService::new(
            pool.clone(),
            Arc::from(b"test-pepper".as_slice()),
            settings.clone(),
        ),
        totp: TotpService::new(
            pool.clone(),
            Arc::from([7u8; 32].as_slice()),
            Arc::from(b"test-pepper".as_slice()),
            "sesamo-test".to_string(),
        ),
        sessions: SessionService::new(
            pool,
            JwtSigner::new(b"test-secret-test-secret-test-sec"),
            settings.clone(),
        ),
    };

    Ok(Arc::new(AuthState::new(
        AuthConfig::new("https://app.sesamo.test".to_string()),
        settings,
        services,
        directory,
        Arc::new(NoopRateLimiter),
        LicenseGate::new(None),
    )))
}
