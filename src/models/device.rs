//! Trusted-device records, one per user x fingerprint pair.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Trust classification for a device.
///
/// Improvement is monotonic in normal operation: a device starts `Unknown`,
/// becomes `Recognized` on first successful login, is promoted to `Trusted`
/// after enough successful logins, and reaches `Verified` only through an
/// explicit verification step. `Suspicious` is the demotion path for devices
/// accumulating failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustLevel {
    Suspicious,
    Unknown,
    Recognized,
    Trusted,
    Verified,
}

/// Parsed device/browser attributes that survive fingerprint hashing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceAttributes {
    /// Browser family ("Chrome", "Firefox", "Unknown").
    pub browser_name: String,
    /// Browser major version string.
    pub browser_version: String,
    /// Operating system family ("Windows", "macOS", "Linux", "Android", "iOS").
    pub os_name: String,
    /// Device class ("desktop", "mobile", "tablet").
    pub device_type: String,
    /// Platform string as reported by the client.
    pub platform: String,
    /// Screen signature ("1920x1080x24").
    pub screen: Option<String>,
    /// Client-reported IANA timezone.
    pub timezone: Option<String>,
}

/// A prior fingerprint retained in the device's history, with the drift that
/// was observed when it was replaced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FingerprintHistoryEntry {
    /// The superseded fingerprint hash.
    pub fingerprint: String,
    /// Fields that differed from the replacement.
    pub changed_fields: Vec<String>,
    /// Drift severity at replacement time ("low", "medium", "high").
    pub severity: String,
    /// When the replacement happened.
    pub replaced_at: DateTime<Utc>,
}

/// One record per (user, fingerprint) pair, upserted on every login from
/// that device and never deleted except by dormancy cleanup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrustedDevice {
    /// Unique record ID.
    pub id: Uuid,
    /// Owning user.
    pub user_id: Uuid,
    /// The device identity key.
    pub fingerprint: String,
    /// Parsed attributes captured at last sighting.
    pub attributes: DeviceAttributes,
    /// Current trust classification.
    pub trust_level: TrustLevel,
    /// Independently recomputed 0-100 trust score.
    pub trust_score: u8,
    /// Administratively or automatically blocked.
    pub is_blocked: bool,
    /// Completed explicit verification.
    pub is_verified: bool,
    /// Consecutive failed attempts; reset on success, auto-blocks at a
    /// configured threshold.
    pub failed_attempts: u32,
    /// Total successful logins from this device.
    pub login_count: u32,
    /// Append-only log of superseded fingerprints.
    pub fingerprint_history: Vec<FingerprintHistoryEntry>,
    /// Remember-device grant expiry, when one was issued.
    pub remember_until: Option<DateTime<Utc>>,
    /// First time this device was seen.
    pub first_seen: DateTime<Utc>,
    /// Most recent sighting, success or failure.
    pub last_seen: DateTime<Utc>,
}

impl TrustedDevice {
    /// A fresh, unknown device record for the given user and fingerprint.
    pub fn new(user_id: Uuid, fingerprint: impl Into<String>, attributes: DeviceAttributes) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            fingerprint: fingerprint.into(),
            attributes,
            trust_level: TrustLevel::Unknown,
            trust_score: 0,
            is_blocked: false,
            is_verified: false,
            failed_attempts: 0,
            login_count: 0,
            fingerprint_history: Vec::new(),
            remember_until: None,
            first_seen: now,
            last_seen: now,
        }
    }

    /// Whole days since the device was first seen.
    pub fn days_known(&self, now: DateTime<Utc>) -> i64 {
        (now - self.first_seen).num_days().max(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trust_levels_order_from_suspicious_to_verified() {
        assert!(TrustLevel::Suspicious < TrustLevel::Unknown);
        assert!(TrustLevel::Unknown < TrustLevel::Recognized);
        assert!(TrustLevel::Recognized < TrustLevel::Trusted);
        assert!(TrustLevel::Trusted < TrustLevel::Verified);
    }

    #[test]
    fn new_device_starts_unknown_and_unblocked() {
        let device = TrustedDevice::new(Uuid::new_v4(), "fp_abc", DeviceAttributes::default());
        assert_eq!(device.trust_level, TrustLevel::Unknown);
        assert!(!device.is_blocked);
        assert_eq!(device.login_count, 0);
    }
}
