//! Append-only login-attempt records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::device::DeviceAttributes;
use crate::models::location::GeoLocation;

/// One record per login try, successful or not.
///
/// Immutable after risk scoring, except for admin review annotations.
/// Subject to rolling retention via
/// [`AttemptStore::purge_older_than`](crate::storage::AttemptStore::purge_older_than).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginAttempt {
    /// Unique attempt ID.
    pub id: Uuid,
    /// Resolved user, if the email mapped to an account.
    pub user_id: Option<Uuid>,
    /// Email as submitted by the client.
    pub email: String,
    /// Device fingerprint hash, when one could be derived.
    pub fingerprint: Option<String>,
    /// Raw device attributes captured at attempt time.
    pub device: Option<DeviceAttributes>,
    /// Caller-supplied location.
    pub location: GeoLocation,
    /// Whether the attempt ultimately succeeded.
    pub success: bool,
    /// Why the attempt failed, when it did.
    pub failure_reason: Option<FailureReason>,
    /// Computed 0-100 risk score.
    pub risk_score: u8,
    /// Factors that contributed to `risk_score`.
    pub risk_factors: Vec<RiskFactor>,
    /// Flagged suspicious by upstream heuristics.
    pub suspicious: bool,
    /// Part of a detected attack pattern (brute force, stuffing).
    pub attack_pattern: bool,
    /// Wall-clock time the engine spent processing this attempt.
    pub processing_ms: u64,
    /// Optional admin review annotation.
    pub review: Option<ReviewAnnotation>,
    /// When the attempt happened.
    pub created_at: DateTime<Utc>,
}

impl LoginAttempt {
    /// A blank attempt record for the given email, stamped now.
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: None,
            email: email.into(),
            fingerprint: None,
            device: None,
            location: GeoLocation::default(),
            success: false,
            failure_reason: None,
            risk_score: 0,
            risk_factors: Vec::new(),
            suspicious: false,
            attack_pattern: false,
            processing_ms: 0,
            review: None,
            created_at: Utc::now(),
        }
    }
}

/// Enumerated reasons a login attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// Wrong email/password.
    InvalidCredentials,
    /// Account is locked or disabled.
    AccountLocked,
    /// A geo/time access rule denied the attempt.
    GeoRestriction,
    /// The device is blocked or otherwise untrusted.
    DeviceNotTrusted,
    /// Upstream heuristics flagged the attempt.
    SuspiciousActivity,
    /// Second factor missing or wrong.
    TwoFactorFailed,
    /// The engine itself failed and recorded a best-effort attempt.
    EngineFault,
}

impl FailureReason {
    /// Reasons that contribute the high-risk factor to attempt scoring.
    pub fn is_high_risk(self) -> bool {
        matches!(
            self,
            FailureReason::SuspiciousActivity
                | FailureReason::GeoRestriction
                | FailureReason::DeviceNotTrusted
        )
    }
}

/// A factor that contributed to an attempt's risk score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskFactor {
    FailedAttempt,
    FlaggedSuspicious,
    MissingFingerprint,
    HighRiskFailureReason,
    AttackPattern,
}

/// Admin review metadata attached to an attempt after the fact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewAnnotation {
    /// Reviewer identity.
    pub reviewed_by: Uuid,
    /// Free-form notes.
    pub notes: String,
    /// Whether the reviewer judged the attempt legitimate.
    pub legitimate: bool,
    /// When the review happened.
    pub reviewed_at: DateTime<Utc>,
}
