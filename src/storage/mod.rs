//! Storage boundary for the login-risk engine.
//!
//! The engine treats persistence as a generic document repository: find,
//! upsert, count, and atomic increment. No concrete database is mandated;
//! [`memory::InMemoryStore`] backs tests and single-instance deployments,
//! and production deployments implement these traits over their own store.
//!
//! Read-modify-write of counters is deliberately *not* part of the contract.
//! Operations like [`DeviceStore::record_device_failure`] and
//! [`RuleStore::increment_rule_stats`] must be atomic in the implementation,
//! because two concurrent logins from the same device or rule can race and
//! `is_blocked` / trust-level transitions must not lose updates.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::errors::Result;
use crate::models::{
    AccessRule, DeviceAttributes, FingerprintHistoryEntry, LoginAttempt, ReviewAnnotation,
    RevokeReason, Session, TrustedDevice,
};

/// Whether a rule match ended in a denial; drives which counter is bumped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
    Allowed,
    Denied,
}

/// Access-rule persistence.
#[async_trait]
pub trait RuleStore: Send + Sync {
    /// All active rules. Ordering is the evaluator's responsibility.
    async fn active_rules(&self) -> Result<Vec<AccessRule>>;

    /// Atomically bump the rule's trigger counters and last-triggered stamp.
    async fn increment_rule_stats(&self, rule_id: Uuid, outcome: TriggerOutcome) -> Result<()>;

    /// Fetch a single rule (admin surface, tests).
    async fn find_rule(&self, rule_id: Uuid) -> Result<Option<AccessRule>>;

    /// Insert or replace a rule (admin surface, tests).
    async fn put_rule(&self, rule: AccessRule) -> Result<()>;
}

/// Append-only login-attempt log.
#[async_trait]
pub trait AttemptStore: Send + Sync {
    /// Append one attempt record.
    async fn record_attempt(&self, attempt: &LoginAttempt) -> Result<()>;

    /// Failed attempts for `email` at or after `since`.
    async fn count_recent_failures(&self, email: &str, since: DateTime<Utc>) -> Result<u64>;

    /// Distinct emails among failed attempts sharing `ip` or `fingerprint`
    /// at or after `since`.
    async fn count_distinct_failed_emails(
        &self,
        ip: Option<&str>,
        fingerprint: Option<&str>,
        since: DateTime<Utc>,
    ) -> Result<u64>;

    /// Recent attempts for an email, newest first.
    async fn recent_attempts(&self, email: &str, limit: usize) -> Result<Vec<LoginAttempt>>;

    /// Attach an admin review annotation to an existing attempt.
    async fn annotate_attempt(&self, attempt_id: Uuid, review: ReviewAnnotation) -> Result<()>;

    /// Rolling retention: delete attempts older than `cutoff`. Returns the
    /// number removed. Driven by an external scheduled job, not the hot path.
    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64>;
}

/// Trusted-device persistence, keyed by (user, fingerprint).
#[async_trait]
pub trait DeviceStore: Send + Sync {
    /// Find the device record for this user and fingerprint.
    async fn find_device(&self, user_id: Uuid, fingerprint: &str)
        -> Result<Option<TrustedDevice>>;

    /// The user's most recently seen device, optionally excluding one
    /// fingerprint. Used for drift comparison when a new device appears.
    async fn most_recent_device(
        &self,
        user_id: Uuid,
        exclude_fingerprint: Option<&str>,
    ) -> Result<Option<TrustedDevice>>;

    /// Idempotent create-or-refresh for (user, fingerprint): creates the
    /// record on first sighting, otherwise updates attributes and last-seen.
    async fn upsert_device(
        &self,
        user_id: Uuid,
        fingerprint: &str,
        attributes: &DeviceAttributes,
    ) -> Result<TrustedDevice>;

    /// Atomic success path: increment login count, reset the failure
    /// counter, and promote `Unknown`→`Recognized` (first success) or
    /// `Recognized`→`Trusted` (once login count exceeds
    /// `promotion_threshold`). Returns the updated record.
    async fn record_device_success(
        &self,
        device_id: Uuid,
        promotion_threshold: u32,
    ) -> Result<TrustedDevice>;

    /// Atomic failure path: increment the failure counter and block the
    /// device once it reaches `auto_block_threshold`. Returns the updated
    /// record.
    async fn record_device_failure(
        &self,
        device_id: Uuid,
        auto_block_threshold: u32,
    ) -> Result<TrustedDevice>;

    /// Persist a freshly computed trust score.
    async fn set_trust_score(&self, device_id: Uuid, score: u8) -> Result<()>;

    /// Append a superseded fingerprint to the device history and install the
    /// replacement fingerprint/attributes.
    async fn append_fingerprint_history(
        &self,
        device_id: Uuid,
        entry: FingerprintHistoryEntry,
        new_fingerprint: &str,
        new_attributes: &DeviceAttributes,
    ) -> Result<()>;

    /// Block or unblock a device (admin surface).
    async fn set_blocked(&self, device_id: Uuid, blocked: bool) -> Result<()>;

    /// Install or clear a remember-device grant expiry.
    async fn set_remembered(&self, device_id: Uuid, until: Option<DateTime<Utc>>) -> Result<()>;

    /// Mark a device verified after an explicit verification step.
    async fn set_verified(&self, device_id: Uuid) -> Result<()>;

    /// Dormancy cleanup: delete unverified devices not seen since `cutoff`.
    /// Returns the number removed. External scheduled job, not the hot path.
    async fn purge_dormant(&self, cutoff: DateTime<Utc>) -> Result<u64>;
}

/// Session persistence.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Create a session record.
    async fn create_session(&self, session: &Session) -> Result<()>;

    /// Active, non-expired sessions for a user, newest first.
    async fn active_sessions(&self, user_id: Uuid) -> Result<Vec<Session>>;

    /// Refresh the activity timestamp.
    async fn touch_session(&self, session_id: Uuid, at: DateTime<Utc>) -> Result<()>;

    /// Revoke one session.
    async fn revoke_session(
        &self,
        session_id: Uuid,
        revoked_by: Option<Uuid>,
        reason: RevokeReason,
    ) -> Result<()>;

    /// Mark a session suspicious without revoking it.
    async fn flag_suspicious(&self, session_id: Uuid) -> Result<()>;

    /// Deactivate sessions past expiry. Returns the number affected.
    /// External scheduled job, not the hot path.
    async fn cleanup_expired(&self, now: DateTime<Utc>) -> Result<u64>;
}
