//! Session issuance and registry operations.

use chrono::Utc;
use serde_json::Value;
use sqlx::PgPool;
use tracing::debug;

use crate::{
    error::{AuthError, Result},
    settings::Settings,
    token::service::RequestInfo,
    users::DirectoryUser,
};

use super::{
    jwt::JwtSigner,
    models::{credential_prefix, new_session_id, parse_duration, Session, SessionSource},
    repo::{RevokeOutcome, SessionRepo, UnrevokeOutcome},
};

/// A newly issued session with its bearer credential. The credential is
/// returned to the client once; the registry keeps only its prefix.
#[derive(Debug)]
pub struct IssuedSession {
    pub credential: String,
    pub session: Session,
}

#[derive(Clone)]
pub struct SessionService {
    pool: PgPool,
    signer: JwtSigner,
    settings: Settings,
}

impl SessionService {
    #[must_use]
    pub fn new(pool: PgPool, signer: JwtSigner, settings: Settings) -> Self {
        Self {
            pool,
            signer,
            settings,
        }
    }

    /// Issue a credential and record the session atomically with it.
    ///
    /// Expiry is computed once here from the configured duration string and
    /// never changes afterwards. `context` must already be sanitized.
    /// `max_sessions` is the licensed quota (-1 = unlimited).
    ///
    /// # Errors
    /// `QuotaExceeded` at the session quota; storage errors otherwise.
    pub async fn issue(
        &self,
        user: &DirectoryUser,
        context: Value,
        source: SessionSource,
        request: &RequestInfo,
        max_sessions: i64,
    ) -> Result<IssuedSession> {
        if max_sessions >= 0 {
            let active = SessionRepo::count_active(&self.pool).await?;
            if active >= max_sessions {
                return Err(AuthError::QuotaExceeded("sessions".to_string()));
            }
        }

        let now = Utc::now();
        let expires_at = now + parse_duration(&self.settings.session_duration);
        let id = new_session_id(now)?;
        let credential = self.signer.issue(
            user.id,
            &user.email,
            &id,
            source,
            context,
            now,
            expires_at,
        )?;

        let session = Session {
            id,
            user_id: user.id,
            email: user.email.clone(),
            credential_prefix: credential_prefix(&credential),
            source,
            created_at: now,
            expires_at,
            revoked: false,
            revoked_reason: None,
            revoked_at: None,
            ip: request.ip.clone(),
            user_agent: request.user_agent.clone(),
            last_used_at: None,
        };
        SessionRepo::insert(&self.pool, &session).await?;

        Ok(IssuedSession {
            credential,
            session,
        })
    }

    /// Resolve a presented credential into its live session.
    ///
    /// Revoked credentials are rejected before signature verification, so a
    /// revoked session fails immediately regardless of its own expiry.
    /// Returns `Ok(None)` for anything that is not a live session.
    ///
    /// # Errors
    /// Returns storage errors only.
    pub async fn authorize(&self, credential: &str) -> Result<Option<Session>> {
        let credential = credential.trim();
        if credential.is_empty() {
            return Ok(None);
        }
        let prefix = credential_prefix(credential);

        if SessionRepo::is_blocked(&self.pool, &prefix).await? {
            debug!("rejected revoked credential");
            return Ok(None);
        }

        if self.signer.verify(credential).is_err() {
            return Ok(None);
        }

        Ok(SessionRepo::lookup_active(&self.pool, &prefix).await?)
    }

    /// Revoke a session by registry id. Idempotent: revoking an already
    /// revoked session changes nothing and reports success.
    ///
    /// # Errors
    /// `SessionNotFound` when the id is unknown.
    pub async fn revoke(&self, id: &str, reason: &str) -> Result<()> {
        match SessionRepo::revoke(&self.pool, id, reason).await? {
            RevokeOutcome::Revoked | RevokeOutcome::AlreadyRevoked => Ok(()),
            RevokeOutcome::NotFound => Err(AuthError::SessionNotFound),
        }
    }

    /// Legacy path: revoke by raw credential, matching the stored prefix.
    /// Every match is revoked. Returns the number affected.
    ///
    /// # Errors
    /// Returns storage errors.
    pub async fn revoke_credential(&self, credential: &str, reason: &str) -> Result<u64> {
        let prefix = credential_prefix(credential.trim());
        Ok(SessionRepo::revoke_by_prefix(&self.pool, &prefix, reason).await?)
    }

    /// # Errors
    /// `SessionExpired` once past expiry; `SessionNotFound` for unknown ids.
    pub async fn unrevoke(&self, id: &str) -> Result<()> {
        match SessionRepo::unrevoke(&self.pool, id).await? {
            UnrevokeOutcome::Restored => Ok(()),
            UnrevokeOutcome::Expired => Err(AuthError::SessionExpired),
            UnrevokeOutcome::NotFound => Err(AuthError::SessionNotFound),
        }
    }

    /// Mark expired sessions revoked; returns the count affected.
    ///
    /// # Errors
    /// Returns storage errors.
    pub async fn sweep_expired(&self) -> Result<u64> {
        Ok(SessionRepo::sweep_expired(&self.pool).await?)
    }

    /// # Errors
    /// Returns storage errors.
    pub async fn list(&self, limit: i64, offset: i64) -> Result<Vec<Session>> {
        Ok(SessionRepo::list(&self.pool, limit, offset).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result as AnyResult;
    use sqlx::postgres::PgPoolOptions;

    fn lazy_service() -> AnyResult<SessionService> {
        let pool = PgPoolOptions::new().connect_lazy("postgres://postgres@localhost/postgres")?;
        Ok(SessionService::new(
            pool,
            JwtSigner::new(b"test-secret-test-secret-test-sec"),
            Settings::default(),
        ))
    }

    #[tokio::test]
    async fn authorize_rejects_empty_credential() -> AnyResult<()> {
        let service = lazy_service()?;
        assert!(service.authorize("  ").await?.is_none());
        Ok(())
    }
}
