//! Admin-managed access rules.
//!
//! A rule couples a scope (who it applies to), a set of location conditions,
//! an optional time window, and an action. Rules are evaluated in descending
//! priority order by [`RuleEvaluator`](crate::rules::RuleEvaluator); a
//! matching `Deny` rule terminates evaluation, everything else accumulates.

use chrono::{DateTime, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::location::GeoLocation;

/// A persisted, admin-managed access rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessRule {
    /// Unique rule ID.
    pub id: Uuid,
    /// Human-readable rule name shown in admin tooling and audit output.
    pub name: String,
    /// What happens when the rule matches.
    pub action: RuleAction,
    /// Who the rule applies to.
    pub scope: RuleScope,
    /// Location conditions; matching any populated category is sufficient.
    pub conditions: RuleConditions,
    /// Optional time window; all configured categories must hold.
    pub time_window: Option<TimeWindow>,
    /// Evaluation priority; higher runs first. Ties break on `created_at`
    /// then `id` so ordering stays deterministic.
    pub priority: i32,
    /// Inactive rules are skipped entirely.
    pub active: bool,
    /// Cumulative trigger statistics, mutated only through atomic increments.
    pub stats: RuleStats,
    /// Creation timestamp; part of the deterministic tie-break.
    pub created_at: DateTime<Utc>,
}

impl AccessRule {
    /// Construct a rule with the given action, global scope, empty
    /// conditions, and priority 0. Intended for tests and builders; admin
    /// tooling constructs rules field-by-field.
    pub fn new(name: impl Into<String>, action: RuleAction) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            action,
            scope: RuleScope::Global,
            conditions: RuleConditions::default(),
            time_window: None,
            priority: 0,
            active: true,
            stats: RuleStats::default(),
            created_at: Utc::now(),
        }
    }
}

/// The effect of a matching rule, as a tagged variant with kind-specific
/// payload rather than a loosely-typed document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuleAction {
    /// Explicit allow annotation; informational, non-terminal.
    Allow,
    /// Terminal denial with an optional user-facing message.
    Deny { message: Option<String> },
    /// Require a verified second factor before the login completes.
    RequireTwoFactor,
    /// Emit an operator alert; non-terminal.
    Alert { notify: Vec<String> },
    /// Require an additional challenge of the given type; non-terminal.
    Challenge { challenge_type: ChallengeType },
}

/// Supported challenge mechanisms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChallengeType {
    Captcha,
    EmailCode,
    SmsCode,
    SecurityQuestions,
}

/// Who a rule applies to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum RuleScope {
    /// Applies to every user.
    Global,
    /// Applies to users holding any of these roles.
    Role { roles: Vec<String> },
    /// Applies to exactly these user IDs.
    Users { user_ids: Vec<Uuid> },
}

impl RuleScope {
    /// Whether the rule covers the given user/role pair.
    pub fn applies_to(&self, user_id: Uuid, role: &str) -> bool {
        match self {
            RuleScope::Global => true,
            RuleScope::Role { roles } => roles.iter().any(|r| r == role),
            RuleScope::Users { user_ids } => user_ids.contains(&user_id),
        }
    }
}

/// Location conditions for a rule.
///
/// Categories left empty are ignored; a location matches the conditions when
/// it matches *any one* populated category.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleConditions {
    /// ISO country codes.
    pub countries: Vec<String>,
    /// Region / subdivision names, compared case-insensitively.
    pub regions: Vec<String>,
    /// City names, compared case-insensitively.
    pub cities: Vec<String>,
    /// Circular geofences.
    pub geofences: Vec<Geofence>,
    /// Exact IP addresses.
    pub ip_addresses: Vec<String>,
    /// CIDR ranges ("203.0.113.0/24").
    pub ip_ranges: Vec<String>,
    /// IANA timezone names.
    pub timezones: Vec<String>,
}

impl RuleConditions {
    /// True when no category is populated. A rule with empty conditions
    /// matches every location.
    pub fn is_empty(&self) -> bool {
        self.countries.is_empty()
            && self.regions.is_empty()
            && self.cities.is_empty()
            && self.geofences.is_empty()
            && self.ip_addresses.is_empty()
            && self.ip_ranges.is_empty()
            && self.timezones.is_empty()
    }
}

/// A circular geofence: center coordinates plus a radius in kilometers.
/// A point exactly at the radius is inside the fence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Geofence {
    pub latitude: f64,
    pub longitude: f64,
    pub radius_km: f64,
}

/// Time restrictions for a rule.
///
/// Categories that are configured are AND'd together; multiple ranges inside
/// one category are OR'd.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeWindow {
    /// Days of the week on which the rule is active.
    pub days: Vec<Weekday>,
    /// Time-of-day ranges, interpreted in `timezone`.
    pub time_ranges: Vec<TimeOfDayRange>,
    /// IANA timezone in which `time_ranges` are evaluated; UTC when absent.
    pub timezone: Option<String>,
    /// Absolute date ranges.
    pub date_ranges: Vec<DateRange>,
}

/// An inclusive HH:MM range. Ranges that wrap midnight
/// (`start > end`, e.g. 22:00-06:00) are supported.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeOfDayRange {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl TimeOfDayRange {
    /// Whether `t` falls inside the range, honoring midnight wrap.
    pub fn contains(&self, t: NaiveTime) -> bool {
        if self.start <= self.end {
            self.start <= t && t <= self.end
        } else {
            t >= self.start || t <= self.end
        }
    }
}

/// An inclusive absolute date range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl DateRange {
    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        self.start <= t && t <= self.end
    }
}

/// Cumulative per-rule trigger counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleStats {
    /// Total times the rule matched.
    pub triggered: u64,
    /// Matches where the login ultimately succeeded.
    pub allowed: u64,
    /// Matches that produced a denial.
    pub denied: u64,
    /// Most recent match.
    pub last_triggered: Option<DateTime<Utc>>,
}

/// Compact "country/region/city" rendering for log fields.
pub fn location_summary(location: &GeoLocation) -> String {
    format!(
        "{}/{}/{}",
        location.country.as_deref().unwrap_or("?"),
        location.region.as_deref().unwrap_or("?"),
        location.city.as_deref().unwrap_or("?"),
    )
}
