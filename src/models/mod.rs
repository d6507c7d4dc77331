//! Persisted data model for the login-risk engine.
//!
//! These types mirror what the engine stores through the
//! [`storage`](crate::storage) traits: admin-managed access rules, the
//! append-only login-attempt log, per-device trust records, and active
//! sessions. The engine treats the backing store as a generic document
//! repository, so everything here derives `Serialize`/`Deserialize`.

pub mod attempt;
pub mod device;
pub mod location;
pub mod rule;
pub mod session;

pub use attempt::{FailureReason, LoginAttempt, ReviewAnnotation, RiskFactor};
pub use device::{DeviceAttributes, FingerprintHistoryEntry, TrustLevel, TrustedDevice};
pub use location::GeoLocation;
pub use rule::{
    AccessRule, ChallengeType, DateRange, Geofence, RuleAction, RuleConditions, RuleScope,
    RuleStats, TimeOfDayRange, TimeWindow,
};
pub use session::{RevokeReason, Session};
