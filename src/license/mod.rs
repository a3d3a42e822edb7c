//! License verification, tier gating, and quota resolution.

pub mod client;
pub mod monitor;
pub mod state;
pub mod tiers;

pub use client::LicenseClient;
pub use monitor::{start_license_monitor, LicenseMonitorHandle};
pub use state::LicenseState;
pub use tiers::LicenseTier;

use chrono::{DateTime, Duration, Utc};
use std::sync::{Arc, RwLock};

/// Default grace window since the last successful validation.
const DEFAULT_GRACE_HOURS: i64 = 24;

/// Feature/quota gate over the cached license state.
///
/// Reads never touch the network: the monitor refreshes the cache in the
/// background and the gate degrades to the free tier once the grace period
/// since the last successful validation runs out.
#[derive(Clone)]
pub struct LicenseGate {
    cached: Arc<RwLock<Option<LicenseState>>>,
    grace: Duration,
}

impl LicenseGate {
    #[must_use]
    pub fn new(initial: Option<LicenseState>) -> Self {
        Self {
            cached: Arc::new(RwLock::new(initial)),
            grace: Duration::hours(DEFAULT_GRACE_HOURS),
        }
    }

    #[must_use]
    pub fn with_grace_hours(mut self, hours: i64) -> Self {
        self.grace = Duration::hours(hours.max(0));
        self
    }

    /// The tier decisions are made against, after expiry and grace checks.
    /// An absent, inactive, expired, or stale-beyond-grace license resolves
    /// to free, never higher than the last confirmed tier.
    #[must_use]
    pub fn effective_tier_at(&self, now: DateTime<Utc>) -> LicenseTier {
        let Ok(guard) = self.cached.read() else {
            return LicenseTier::Free;
        };
        let Some(state) = guard.as_ref() else {
            return LicenseTier::Free;
        };
        if !state.active {
            return LicenseTier::Free;
        }
        if state.expires_at.is_some_and(|expiry| expiry < now) {
            return LicenseTier::Free;
        }
        if now - state.last_validated_at > self.grace {
            return LicenseTier::Free;
        }
        state.tier
    }

    #[must_use]
    pub fn effective_tier(&self) -> LicenseTier {
        self.effective_tier_at(Utc::now())
    }

    #[must_use]
    pub fn has_feature(&self, feature: &str) -> bool {
        tiers::tier_has_feature(self.effective_tier(), feature)
    }

    #[must_use]
    pub fn max_tokens(&self) -> i64 {
        tiers::max_tokens(self.effective_tier())
    }

    #[must_use]
    pub fn max_sessions(&self) -> i64 {
        tiers::max_sessions(self.effective_tier())
    }

    #[must_use]
    pub fn max_ip_bans(&self) -> i64 {
        tiers::max_ip_bans(self.effective_tier())
    }

    /// Replace the cached state (monitor refresh or admin action).
    pub fn update(&self, state: Option<LicenseState>) {
        if let Ok(mut guard) = self.cached.write() {
            *guard = state;
        }
    }

    /// Snapshot for the admin status surface.
    #[must_use]
    pub fn snapshot(&self) -> Option<LicenseState> {
        self.cached.read().ok().and_then(|guard| guard.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(tier: LicenseTier, validated: DateTime<Utc>) -> LicenseState {
        LicenseState {
            license_key: "key".to_string(),
            tier,
            expires_at: None,
            device_id: "device".to_string(),
            last_validated_at: validated,
            active: true,
        }
    }

    #[test]
    fn absent_license_is_free() {
        let gate = LicenseGate::new(None);
        assert_eq!(gate.effective_tier(), LicenseTier::Free);
        assert!(!gate.has_feature("otp-email"));
        assert!(gate.has_feature("basic-magic-link"));
    }

    #[test]
    fn fresh_license_grants_its_tier() {
        let gate = LicenseGate::new(Some(state(LicenseTier::Enterprise, Utc::now())));
        assert_eq!(gate.effective_tier(), LicenseTier::Enterprise);
        assert!(gate.has_feature("basic-magic-link"));
        assert!(gate.has_feature("backup-codes"));
        assert_eq!(gate.max_tokens(), -1);
    }

    #[test]
    fn stale_validation_degrades_to_free_after_grace() {
        let validated = Utc::now() - Duration::hours(30);
        let gate = LicenseGate::new(Some(state(LicenseTier::Advanced, validated)));
        // Beyond the default 24h grace.
        assert_eq!(gate.effective_tier(), LicenseTier::Free);

        let generous = LicenseGate::new(Some(state(LicenseTier::Advanced, validated)))
            .with_grace_hours(48);
        assert_eq!(generous.effective_tier(), LicenseTier::Advanced);
    }

    #[test]
    fn expired_or_inactive_license_is_free() {
        let mut expired = state(LicenseTier::Premium, Utc::now());
        expired.expires_at = Some(Utc::now() - Duration::days(1));
        let gate = LicenseGate::new(Some(expired));
        assert_eq!(gate.effective_tier(), LicenseTier::Free);

        let mut inactive = state(LicenseTier::Premium, Utc::now());
        inactive.active = false;
        let gate = LicenseGate::new(Some(inactive));
        assert_eq!(gate.effective_tier(), LicenseTier::Free);
    }

    #[test]
    fn update_replaces_cached_state() {
        let gate = LicenseGate::new(None);
        gate.update(Some(state(LicenseTier::Premium, Utc::now())));
        assert_eq!(gate.effective_tier(), LicenseTier::Premium);
        gate.update(None);
        assert_eq!(gate.effective_tier(), LicenseTier::Free);
    }
}
