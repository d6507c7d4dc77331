//! Configuration for the login-risk engine.
//!
//! Every threshold the engine consults lives here and is injected into the
//! components, never read from the environment inside the hot path. This
//! keeps the engine testable under varied policies: a test can run the same
//! pipeline with a 2-attempt brute-force threshold or a 10-second
//! impossible-travel gap without touching process state.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Top-level configuration for the login-risk engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskEngineConfig {
    /// Attack-pattern detector thresholds.
    pub patterns: PatternConfig,

    /// Device trust scoring and lifecycle thresholds.
    pub device: DeviceTrustConfig,

    /// Session anomaly detector thresholds.
    pub session: SessionAnomalyConfig,

    /// Request-scoped deadline applied to every storage call.
    pub store_timeout: Duration,

    /// Rolling retention window for login attempts.
    pub attempt_retention: Duration,

    /// Dormancy cutoff for pruning unverified devices.
    pub device_dormancy: Duration,
}

/// Thresholds for the brute-force and credential-stuffing detectors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternConfig {
    /// Trailing window for counting failed attempts per email.
    pub brute_force_window: Duration,
    /// Failed attempts within the window that flag brute force.
    pub brute_force_threshold: u64,
    /// Trailing window for counting distinct targeted accounts.
    pub stuffing_window: Duration,
    /// Distinct emails within the window that flag credential stuffing.
    pub stuffing_threshold: u64,
}

impl Default for PatternConfig {
    fn default() -> Self {
        Self {
            brute_force_window: Duration::from_secs(15 * 60),
            brute_force_threshold: 5,
            stuffing_window: Duration::from_secs(60 * 60),
            stuffing_threshold: 10,
        }
    }
}

/// Device trust scoring and lifecycle thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceTrustConfig {
    /// Days of trusted history at which the longevity component maxes out.
    pub trusted_days_cap: u32,
    /// Login count at which the familiarity component maxes out.
    pub login_count_cap: u32,
    /// Consecutive failures at which a device is automatically blocked.
    pub auto_block_threshold: u32,
    /// Login count above which a `Recognized` device is promoted to `Trusted`.
    pub trust_promotion_logins: u32,
    /// Number of changed major fingerprint fields above which drift is High.
    pub drift_major_field_cutoff: usize,
    /// Lifetime of a remember-device grant.
    pub remember_device_lifetime: Duration,
}

impl Default for DeviceTrustConfig {
    fn default() -> Self {
        Self {
            trusted_days_cap: 30,
            login_count_cap: 20,
            auto_block_threshold: 5,
            trust_promotion_logins: 5,
            drift_major_field_cutoff: 2,
            remember_device_lifetime: Duration::from_secs(30 * 24 * 3600),
        }
    }
}

/// Session anomaly detector thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionAnomalyConfig {
    /// Distinct concurrent IPs above which the multiple-IP anomaly fires.
    pub max_distinct_ips: usize,
    /// Gap under which two sessions from different countries are
    /// impossible travel.
    pub impossible_travel_gap: Duration,
    /// Active session count above which the concurrency anomaly fires.
    pub max_concurrent_sessions: usize,
}

impl Default for SessionAnomalyConfig {
    fn default() -> Self {
        Self {
            max_distinct_ips: 3,
            impossible_travel_gap: Duration::from_secs(2 * 3600),
            max_concurrent_sessions: 5,
        }
    }
}

impl Default for RiskEngineConfig {
    fn default() -> Self {
        Self {
            patterns: PatternConfig::default(),
            device: DeviceTrustConfig::default(),
            session: SessionAnomalyConfig::default(),
            store_timeout: Duration::from_secs(5),
            attempt_retention: Duration::from_secs(90 * 24 * 3600),
            device_dormancy: Duration::from_secs(180 * 24 * 3600),
        }
    }
}
