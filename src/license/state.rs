//! Cached license descriptor and its persistence.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{postgres::PgRow, FromRow, PgPool, Row};
use tracing::Instrument;

use super::tiers::LicenseTier;

/// The locally cached license descriptor. Refreshed by the monitor's ping
/// loop; consulted by the gate on every feature/quota decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LicenseState {
    pub license_key: String,
    pub tier: LicenseTier,
    pub expires_at: Option<DateTime<Utc>>,
    /// Device binding reported to the license server.
    pub device_id: String,
    /// Last successful remote validation; drives the grace-period policy.
    pub last_validated_at: DateTime<Utc>,
    pub active: bool,
}

impl<'r> FromRow<'r, PgRow> for LicenseState {
    fn from_row(row: &'r PgRow) -> std::result::Result<Self, sqlx::Error> {
        let tier: String = row.try_get("tier")?;
        Ok(Self {
            license_key: row.try_get("license_key")?,
            tier: LicenseTier::parse(&tier),
            expires_at: row.try_get("expires_at")?,
            device_id: row.try_get("device_id")?,
            last_validated_at: row.try_get("last_validated_at")?,
            active: row.try_get("active")?,
        })
    }
}

pub struct LicenseStateRepo;

impl LicenseStateRepo {
    /// Load the cached descriptor, if one was ever persisted.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn load(pool: &PgPool) -> Result<Option<LicenseState>> {
        let query = "SELECT * FROM license_state ORDER BY last_validated_at DESC LIMIT 1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        sqlx::query_as::<_, LicenseState>(query)
            .fetch_optional(pool)
            .instrument(span)
            .await
            .context("failed to load license state")
    }

    /// Persist the cached descriptor (single-row upsert keyed by license).
    ///
    /// # Errors
    /// Returns an error if the upsert fails.
    pub async fn save(pool: &PgPool, state: &LicenseState) -> Result<()> {
        let query = r"
            INSERT INTO license_state
                (license_key, tier, expires_at, device_id, last_validated_at, active)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (license_key) DO UPDATE SET
                tier = EXCLUDED.tier,
                expires_at = EXCLUDED.expires_at,
                device_id = EXCLUDED.device_id,
                last_validated_at = EXCLUDED.last_validated_at,
                active = EXCLUDED.active
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        sqlx::query(query)
            .bind(&state.license_key)
            .bind(state.tier.as_str())
            .bind(state.expires_at)
            .bind(&state.device_id)
            .bind(state.last_validated_at)
            .bind(state.active)
            .execute(pool)
            .instrument(span)
            .await
            .context("failed to save license state")?;
        Ok(())
    }

    /// Remove the cached descriptor (deactivation).
    ///
    /// # Errors
    /// Returns an error if the delete fails.
    pub async fn clear(pool: &PgPool) -> Result<()> {
        let query = "DELETE FROM license_state";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        sqlx::query(query)
            .execute(pool)
            .instrument(span)
            .await
            .context("failed to clear license state")?;
        Ok(())
    }
}
