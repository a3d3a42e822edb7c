//! User directory collaborator.
//!
//! The engine never owns user records; it asks the host's directory to look
//! up, create, and confirm accounts by email. The trait keeps the seam
//! mockable in tests and swappable when the host is not Postgres-backed.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::Instrument;
use uuid::Uuid;

/// A user as seen through the directory seam.
#[derive(Clone, Debug)]
pub struct DirectoryUser {
    pub id: Uuid,
    pub email: String,
    pub username: String,
    pub confirmed: bool,
    pub blocked: bool,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_by_email(&self, email: &str) -> Result<Option<DirectoryUser>>;

    /// Create a user for the given email. The username is derived from the
    /// email local part and uniquified on conflict.
    async fn create(&self, email: &str) -> Result<DirectoryUser>;

    /// Mark a user confirmed (used to auto-confirm on first login).
    async fn set_confirmed(&self, id: Uuid) -> Result<()>;
}

/// Directory backed by the host's `users` table.
#[derive(Clone)]
pub struct PgUserDirectory {
    pool: PgPool,
}

impl PgUserDirectory {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserDirectory for PgUserDirectory {
    async fn find_by_email(&self, email: &str) -> Result<Option<DirectoryUser>> {
        let query = r"
            SELECT id, email, username, confirmed, blocked, created_at
            FROM users
            WHERE email = $1
            LIMIT 1
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(email)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup user by email")?;
        Ok(row.map(|row| DirectoryUser {
            id: row.get("id"),
            email: row.get("email"),
            username: row.get("username"),
            confirmed: row.get("confirmed"),
            blocked: row.get("blocked"),
            created_at: row.get("created_at"),
        }))
    }

    async fn create(&self, email: &str) -> Result<DirectoryUser> {
        let username = username_from_email(email);
        let query = r"
            INSERT INTO users (id, email, username, confirmed, blocked)
            VALUES ($1, $2, $3, FALSE, FALSE)
            ON CONFLICT (username) DO NOTHING
            RETURNING id, email, username, confirmed, blocked, created_at
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(Uuid::new_v4())
            .bind(email)
            .bind(&username)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to create user")?;

        if let Some(row) = row {
            return Ok(DirectoryUser {
                id: row.get("id"),
                email: row.get("email"),
                username: row.get("username"),
                confirmed: row.get("confirmed"),
                blocked: row.get("blocked"),
                created_at: row.get("created_at"),
            });
        }

        // Username taken by another account; retry once with a random suffix.
        let suffixed = format!("{username}-{}", &Uuid::new_v4().simple().to_string()[..8]);
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(Uuid::new_v4())
            .bind(email)
            .bind(&suffixed)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to create user with suffixed username")?
            .context("user creation conflicted twice")?;

        Ok(DirectoryUser {
            id: row.get("id"),
            email: row.get("email"),
            username: row.get("username"),
            confirmed: row.get("confirmed"),
            blocked: row.get("blocked"),
            created_at: row.get("created_at"),
        })
    }

    async fn set_confirmed(&self, id: Uuid) -> Result<()> {
        let query = r"
            UPDATE users
            SET confirmed = TRUE,
                updated_at = NOW()
            WHERE id = $1
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(id)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to confirm user")?;
        Ok(())
    }
}

/// Normalize an email for lookup/uniqueness checks.
#[must_use]
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Basic email format check on already-normalized input.
#[must_use]
pub fn valid_email(email_normalized: &str) -> bool {
    regex::Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$")
        .is_ok_and(|regex| regex.is_match(email_normalized))
}

/// Derive a username from the email local part, normalized to `[a-z0-9-]`.
fn username_from_email(email: &str) -> String {
    let local = email.split('@').next().unwrap_or(email);
    let normalized: String = local
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() {
                ch.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect();
    let trimmed = normalized.trim_matches('-');
    if trimmed.is_empty() {
        "user".to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_email_trims_and_lowercases() {
        assert_eq!(normalize_email(" Alice@Example.COM "), "alice@example.com");
    }

    #[test]
    fn valid_email_accepts_basic_format() {
        assert!(valid_email("a@example.com"));
        assert!(valid_email("name.surname@example.co"));
    }

    #[test]
    fn valid_email_rejects_missing_parts() {
        assert!(!valid_email("not-an-email"));
        assert!(!valid_email("missing-at.example.com"));
        assert!(!valid_email("missing-domain@"));
    }

    #[test]
    fn username_from_email_normalizes() {
        assert_eq!(username_from_email("Alice.Smith@example.com"), "alice-smith");
        assert_eq!(username_from_email("bob@example.com"), "bob");
        assert_eq!(username_from_email("@example.com"), "user");
        assert_eq!(username_from_email("__@example.com"), "user");
    }
}
