//! License tiers, feature lists, and quotas.
//!
//! Tiers are ordered `free < premium < advanced < enterprise`. Each tier's
//! feature set is additive over the tiers below it; quotas use `-1` to mean
//! unlimited.

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LicenseTier {
    Free,
    Premium,
    Advanced,
    Enterprise,
}

impl LicenseTier {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Premium => "premium",
            Self::Advanced => "advanced",
            Self::Enterprise => "enterprise",
        }
    }

    /// Parse a persisted/remote tier name; anything unknown is free.
    #[must_use]
    pub fn parse(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "premium" => Self::Premium,
            "advanced" => Self::Advanced,
            "enterprise" => Self::Enterprise,
            _ => Self::Free,
        }
    }

    /// Features introduced at exactly this tier (not inherited ones).
    #[must_use]
    pub fn own_features(self) -> &'static [&'static str] {
        match self {
            Self::Free => &["basic-magic-link"],
            Self::Premium => &["otp-email", "otp-sms", "ip-bans"],
            Self::Advanced => &["totp", "totp-primary", "whatsapp"],
            Self::Enterprise => &["backup-codes"],
        }
    }
}

impl std::fmt::Display for LicenseTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

const TIERS_DESCENDING: [LicenseTier; 4] = [
    LicenseTier::Enterprise,
    LicenseTier::Advanced,
    LicenseTier::Premium,
    LicenseTier::Free,
];

/// Whether `tier` grants `feature`. Checks from the highest tier downwards;
/// the first tier at or below `tier` that introduces the feature wins.
#[must_use]
pub fn tier_has_feature(tier: LicenseTier, feature: &str) -> bool {
    TIERS_DESCENDING
        .iter()
        .filter(|candidate| **candidate <= tier)
        .any(|candidate| candidate.own_features().contains(&feature))
}

/// Active-token quota per tier (-1 = unlimited).
#[must_use]
pub fn max_tokens(tier: LicenseTier) -> i64 {
    match tier {
        LicenseTier::Free => 100,
        LicenseTier::Premium => 1000,
        LicenseTier::Advanced => 10000,
        LicenseTier::Enterprise => -1,
    }
}

/// Active-session quota per tier (-1 = unlimited).
#[must_use]
pub fn max_sessions(tier: LicenseTier) -> i64 {
    match tier {
        LicenseTier::Free => 50,
        LicenseTier::Premium => 500,
        LicenseTier::Advanced => 5000,
        LicenseTier::Enterprise => -1,
    }
}

/// IP-ban list quota per tier (-1 = unlimited).
#[must_use]
pub fn max_ip_bans(tier: LicenseTier) -> i64 {
    match tier {
        LicenseTier::Free => 10,
        LicenseTier::Premium => 100,
        LicenseTier::Advanced => 1000,
        LicenseTier::Enterprise => -1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_order_is_strict() {
        assert!(LicenseTier::Free < LicenseTier::Premium);
        assert!(LicenseTier::Premium < LicenseTier::Advanced);
        assert!(LicenseTier::Advanced < LicenseTier::Enterprise);
    }

    #[test]
    fn features_are_inherited_upwards() {
        // Every tier keeps the free baseline.
        for tier in [
            LicenseTier::Free,
            LicenseTier::Premium,
            LicenseTier::Advanced,
            LicenseTier::Enterprise,
        ] {
            assert!(tier_has_feature(tier, "basic-magic-link"), "{tier}");
        }

        assert!(!tier_has_feature(LicenseTier::Free, "otp-email"));
        assert!(tier_has_feature(LicenseTier::Premium, "otp-email"));
        assert!(tier_has_feature(LicenseTier::Enterprise, "otp-email"));

        assert!(!tier_has_feature(LicenseTier::Premium, "totp-primary"));
        assert!(tier_has_feature(LicenseTier::Advanced, "totp-primary"));

        assert!(!tier_has_feature(LicenseTier::Advanced, "backup-codes"));
        assert!(tier_has_feature(LicenseTier::Enterprise, "backup-codes"));
    }

    #[test]
    fn unknown_feature_is_denied_everywhere() {
        assert!(!tier_has_feature(LicenseTier::Enterprise, "time-travel"));
    }

    #[test]
    fn parse_is_lenient() {
        assert_eq!(LicenseTier::parse("Enterprise"), LicenseTier::Enterprise);
        assert_eq!(LicenseTier::parse(" premium "), LicenseTier::Premium);
        assert_eq!(LicenseTier::parse("gibberish"), LicenseTier::Free);
    }

    #[test]
    fn quotas_grow_with_tier() {
        assert_eq!(max_tokens(LicenseTier::Free), 100);
        assert_eq!(max_tokens(LicenseTier::Enterprise), -1);
        assert_eq!(max_sessions(LicenseTier::Premium), 500);
        assert_eq!(max_ip_bans(LicenseTier::Advanced), 1000);
    }
}
