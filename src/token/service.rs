//! Token lifecycle orchestration on top of the repo and the user directory.

use chrono::{Duration, Utc};
use serde_json::Value;
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    crypto,
    error::{AuthError, Result},
    settings::Settings,
    users::{normalize_email, valid_email, DirectoryUser, UserDirectory},
};

use super::{
    models::{filter_context, ttl_hours, IssuedToken, LoginToken},
    repo::TokenRepo,
};

/// Request metadata recorded on consumption when `store_login_info` is set.
#[derive(Clone, Debug, Default)]
pub struct RequestInfo {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Clone)]
pub struct TokenService {
    pool: PgPool,
    directory: Arc<dyn UserDirectory>,
    settings: Settings,
}

impl TokenService {
    #[must_use]
    pub fn new(pool: PgPool, directory: Arc<dyn UserDirectory>, settings: Settings) -> Self {
        Self {
            pool,
            directory,
            settings,
        }
    }

    /// Issue a token for `email`.
    ///
    /// Resolves (or creates, when allowed) the owning user, generates the
    /// secret, and persists hash + salt. The plaintext secret is returned
    /// only for delivery. `max_tokens` is the licensed quota (-1 =
    /// unlimited).
    ///
    /// # Errors
    /// `UserBlocked` before anything is persisted when the owner is blocked;
    /// `UserNotFound` when creation is disabled and the user is absent;
    /// `QuotaExceeded` when the active-token quota is reached.
    pub async fn issue(
        &self,
        email: &str,
        context: &Value,
        max_tokens: i64,
    ) -> Result<IssuedToken> {
        let email = normalize_email(email);
        if !valid_email(&email) {
            return Err(AuthError::TokenInvalid);
        }

        let user = self.resolve_user(&email).await?;
        if user.blocked {
            return Err(AuthError::UserBlocked);
        }

        if max_tokens >= 0 {
            let active = TokenRepo::count_active(&self.pool).await?;
            if active >= max_tokens {
                return Err(AuthError::QuotaExceeded("tokens".to_string()));
            }
        }

        let secret = crypto::generate_secret(self.settings.token_length)?;
        let salt = crypto::generate_salt()?;
        let token_hash = crypto::hash_with_salt(&secret, &salt);

        // The context ttl (hours) always wins over the settings-level expiry.
        let expires_at = match ttl_hours(context) {
            Some(hours) => Utc::now() + Duration::hours(hours),
            None => Utc::now() + Duration::seconds(self.settings.token_expiry_seconds),
        };

        let token = LoginToken {
            id: Uuid::new_v4(),
            email: email.clone(),
            user_id: user.id,
            token_hash,
            salt,
            active: true,
            created_at: Utc::now(),
            expires_at,
            last_used_at: None,
            ip: None,
            user_agent: None,
            context: filter_context(
                context,
                &self.settings.context_whitelist,
                &self.settings.context_blacklist,
            ),
        };
        TokenRepo::insert(&self.pool, &token).await?;

        Ok(IssuedToken { token, secret })
    }

    /// Validate a presented plaintext secret without mutating anything.
    ///
    /// Scans active candidates, recomputes each candidate's hash with its
    /// stored salt, and compares in constant time.
    ///
    /// # Errors
    /// `TokenInvalid` when no candidate matches or the match is expired
    /// (unless the stays-valid policy applies).
    pub async fn validate(&self, secret: &str) -> Result<LoginToken> {
        let secret = secret.trim();
        if secret.is_empty() {
            return Err(AuthError::TokenInvalid);
        }

        let candidates = TokenRepo::fetch_active_candidates(&self.pool).await?;
        let now = Utc::now();
        for candidate in candidates {
            let computed = crypto::hash_with_salt(secret, &candidate.salt);
            if crypto::timing_safe_eq(&computed, &candidate.token_hash) {
                if candidate.is_valid(now, self.settings.token_stays_valid) {
                    return Ok(candidate);
                }
                return Err(AuthError::TokenInvalid);
            }
        }
        Err(AuthError::TokenInvalid)
    }

    /// Consume a validated token: single-use tokens deactivate; login info
    /// is recorded only when the deployment opted in.
    ///
    /// # Errors
    /// Returns a storage error if the update fails.
    pub async fn consume(&self, token: &LoginToken, request: &RequestInfo) -> Result<()> {
        let deactivate = !self.settings.token_stays_valid;
        let login_info = self
            .settings
            .store_login_info
            .then_some((request.ip.as_deref(), request.user_agent.as_deref()));
        TokenRepo::consume(&self.pool, token.id, deactivate, login_info).await?;
        Ok(())
    }

    /// # Errors
    /// `TokenInvalid` when the token does not exist.
    pub async fn block(&self, id: Uuid) -> Result<()> {
        if TokenRepo::set_active(&self.pool, id, false).await? {
            Ok(())
        } else {
            Err(AuthError::TokenInvalid)
        }
    }

    /// # Errors
    /// `TokenInvalid` when the token does not exist.
    pub async fn reactivate(&self, id: Uuid) -> Result<()> {
        if TokenRepo::set_active(&self.pool, id, true).await? {
            Ok(())
        } else {
            Err(AuthError::TokenInvalid)
        }
    }

    /// # Errors
    /// `TokenInvalid` when the token does not exist.
    pub async fn extend(&self, id: Uuid, days: i64) -> Result<chrono::DateTime<Utc>> {
        TokenRepo::extend(&self.pool, id, days)
            .await?
            .ok_or(AuthError::TokenInvalid)
    }

    /// Resolve the owning user, creating it when the deployment allows.
    async fn resolve_user(&self, email: &str) -> Result<DirectoryUser> {
        if let Some(user) = self.directory.find_by_email(email).await? {
            return Ok(user);
        }
        if !self.settings.allow_user_creation {
            return Err(AuthError::UserNotFound);
        }
        Ok(self.directory.create(email).await?)
    }

    #[must_use]
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result as AnyResult;
    use async_trait::async_trait;
    use sqlx::postgres::PgPoolOptions;

    struct EmptyDirectory;

    #[async_trait]
    impl UserDirectory for EmptyDirectory {
        async fn find_by_email(&self, _email: &str) -> AnyResult<Option<DirectoryUser>> {
            Ok(None)
        }

        async fn create(&self, _email: &str) -> AnyResult<DirectoryUser> {
            unreachable!("creation disabled in these tests")
        }

        async fn set_confirmed(&self, _id: Uuid) -> AnyResult<()> {
            Ok(())
        }
    }

    struct BlockedDirectory;

    #[async_trait]
    impl UserDirectory for BlockedDirectory {
        async fn find_by_email(&self, email: &str) -> AnyResult<Option<DirectoryUser>> {
            Ok(Some(DirectoryUser {
                id: Uuid::new_v4(),
                email: email.to_string(),
                username: "blocked".to_string(),
                confirmed: true,
                blocked: true,
                created_at: Utc::now(),
            }))
        }

        async fn create(&self, _email: &str) -> AnyResult<DirectoryUser> {
            unreachable!()
        }

        async fn set_confirmed(&self, _id: Uuid) -> AnyResult<()> {
            Ok(())
        }
    }

    fn lazy_service(directory: Arc<dyn UserDirectory>) -> AnyResult<TokenService> {
        let pool = PgPoolOptions::new().connect_lazy("postgres://postgres@localhost/postgres")?;
        Ok(TokenService::new(pool, directory, Settings::default()))
    }

    #[tokio::test]
    async fn issue_rejects_invalid_email() -> AnyResult<()> {
        let service = lazy_service(Arc::new(EmptyDirectory))?;
        let result = service
            .issue("not-an-email", &serde_json::json!({}), -1)
            .await;
        assert!(matches!(result, Err(AuthError::TokenInvalid)));
        Ok(())
    }

    #[tokio::test]
    async fn issue_fails_when_creation_disabled_and_user_absent() -> AnyResult<()> {
        // Default settings disable user creation.
        let service = lazy_service(Arc::new(EmptyDirectory))?;
        let result = service
            .issue("ghost@example.com", &serde_json::json!({}), -1)
            .await;
        assert!(matches!(result, Err(AuthError::UserNotFound)));
        Ok(())
    }

    #[tokio::test]
    async fn issue_rejects_blocked_user_before_persisting() -> AnyResult<()> {
        // The lazy pool never connects; reaching the insert would error with
        // a storage failure instead of UserBlocked.
        let service = lazy_service(Arc::new(BlockedDirectory))?;
        let result = service
            .issue("blocked@example.com", &serde_json::json!({}), -1)
            .await;
        assert!(matches!(result, Err(AuthError::UserBlocked)));
        Ok(())
    }

    #[tokio::test]
    async fn validate_rejects_empty_secret() -> AnyResult<()> {
        let service = lazy_service(Arc::new(EmptyDirectory))?;
        let result = service.validate("   ").await;
        assert!(matches!(result, Err(AuthError::TokenInvalid)));
        Ok(())
    }
}
