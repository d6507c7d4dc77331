//! Priority-ordered evaluation of geographic and time access rules.
//!
//! Rules are scanned in descending priority (stable tie-break on creation
//! time, then id). A matching `Deny` rule is terminal: its counters are
//! persisted and evaluation stops, so lower-priority rules see no counter
//! update. Non-terminal effects accumulate; where two matches carry the same
//! effect category, the highest-priority match's message or challenge type
//! wins.

use chrono::{DateTime, Datelike, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::errors::Result;
use crate::models::rule::location_summary;
use crate::models::{AccessRule, ChallengeType, GeoLocation, RuleAction, TimeWindow};
use crate::storage::{RuleStore, TriggerOutcome};

/// Mean Earth radius, kilometers.
const EARTH_RADIUS_KM: f64 = 6371.0;

/// Great-circle distance between two (lat, lon) points via the haversine
/// formula. Symmetric, and zero for identical coordinates.
pub fn haversine_km(a: (f64, f64), b: (f64, f64)) -> f64 {
    let (lat1, lon1) = a;
    let (lat2, lon2) = b;
    let dlat = (lat2 - lat1).to_radians();
    let dlon = (lon2 - lon1).to_radians();
    let h = (dlat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().atan2((1.0 - h).sqrt())
}

/// A rule that matched during evaluation, recorded for audit output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchedRule {
    pub rule_id: Uuid,
    pub name: String,
    pub kind: String,
    pub priority: i32,
}

/// Folded result of evaluating every applicable rule against one login.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleOutcome {
    /// False exactly when a deny rule matched.
    pub allowed: bool,
    /// The denying rule, when one matched.
    pub denied_by: Option<Uuid>,
    /// User-facing message from the denying rule.
    pub deny_message: Option<String>,
    /// Every rule that matched, in evaluation order.
    pub matched_rules: Vec<MatchedRule>,
    /// A `RequireTwoFactor` rule matched.
    pub requires_2fa: bool,
    /// An `Alert` rule matched.
    pub should_alert: bool,
    /// Union of alert targets across matching alert rules.
    pub alert_targets: Vec<String>,
    /// A `Challenge` rule matched.
    pub should_challenge: bool,
    /// Challenge type from the highest-priority challenge rule.
    pub challenge_type: Option<ChallengeType>,
    /// An explicit `Allow` rule matched; informational.
    pub explicit_allow: bool,
}

impl RuleOutcome {
    fn allowed_default() -> Self {
        Self {
            allowed: true,
            denied_by: None,
            deny_message: None,
            matched_rules: Vec::new(),
            requires_2fa: false,
            should_alert: false,
            alert_targets: Vec::new(),
            should_challenge: false,
            challenge_type: None,
            explicit_allow: false,
        }
    }
}

/// Evaluates configured access rules against a user and location.
pub struct RuleEvaluator {
    store: Arc<dyn RuleStore>,
}

impl RuleEvaluator {
    pub fn new(store: Arc<dyn RuleStore>) -> Self {
        Self { store }
    }

    /// Evaluate all active rules for this user/role/location at `now`.
    ///
    /// Storage failure while loading rules propagates to the caller (the
    /// orchestrator fails open on it). A failed counter increment is logged
    /// and does not change the verdict: the counters are statistical, and a
    /// deny that was already decided must not silently become an allow
    /// because a stats write failed.
    pub async fn evaluate(
        &self,
        user_id: Uuid,
        role: &str,
        location: &GeoLocation,
        now: DateTime<Utc>,
    ) -> Result<RuleOutcome> {
        let mut rules = self.store.active_rules().await?;
        rules.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.created_at.cmp(&b.created_at))
                .then(a.id.cmp(&b.id))
        });

        let mut outcome = RuleOutcome::allowed_default();

        for rule in &rules {
            if !rule.scope.applies_to(user_id, role) {
                continue;
            }
            if !conditions_match(rule, location) {
                continue;
            }
            if let Some(window) = &rule.time_window {
                if !window_matches(window, now) {
                    continue;
                }
            }

            debug!(
                rule = %rule.name,
                priority = rule.priority,
                location = %location_summary(location),
                "access rule matched"
            );
            outcome.matched_rules.push(MatchedRule {
                rule_id: rule.id,
                name: rule.name.clone(),
                kind: kind_name(&rule.action).to_string(),
                priority: rule.priority,
            });

            let trigger = if matches!(rule.action, RuleAction::Deny { .. }) {
                TriggerOutcome::Denied
            } else {
                TriggerOutcome::Allowed
            };
            if let Err(err) = self.store.increment_rule_stats(rule.id, trigger).await {
                warn!(rule = %rule.name, error = %err, "failed to persist rule trigger counters");
            }

            match &rule.action {
                RuleAction::Deny { message } => {
                    outcome.allowed = false;
                    outcome.denied_by = Some(rule.id);
                    outcome.deny_message = message.clone();
                    // Deny is terminal: lower-priority rules are never
                    // evaluated and their counters stay untouched.
                    return Ok(outcome);
                }
                RuleAction::RequireTwoFactor => {
                    outcome.requires_2fa = true;
                }
                RuleAction::Alert { notify } => {
                    outcome.should_alert = true;
                    for target in notify {
                        if !outcome.alert_targets.contains(target) {
                            outcome.alert_targets.push(target.clone());
                        }
                    }
                }
                RuleAction::Challenge { challenge_type } => {
                    outcome.should_challenge = true;
                    // Highest-priority challenge rule wins; we scan in
                    // descending priority, so only the first write sticks.
                    if outcome.challenge_type.is_none() {
                        outcome.challenge_type = Some(*challenge_type);
                    }
                }
                RuleAction::Allow => {
                    outcome.explicit_allow = true;
                }
            }
        }

        Ok(outcome)
    }
}

fn kind_name(action: &RuleAction) -> &'static str {
    match action {
        RuleAction::Allow => "allow",
        RuleAction::Deny { .. } => "deny",
        RuleAction::RequireTwoFactor => "require_2fa",
        RuleAction::Alert { .. } => "alert",
        RuleAction::Challenge { .. } => "challenge",
    }
}

/// Whether the location matches the rule's conditions.
///
/// Matching any one populated condition category is sufficient; unpopulated
/// categories are ignored, and a rule with no conditions matches everywhere.
fn conditions_match(rule: &AccessRule, location: &GeoLocation) -> bool {
    let c = &rule.conditions;
    if c.is_empty() {
        return true;
    }

    if let Some(country) = &location.country {
        if c.countries.iter().any(|v| v.eq_ignore_ascii_case(country)) {
            return true;
        }
    }
    if let Some(region) = &location.region {
        if c.regions.iter().any(|v| v.eq_ignore_ascii_case(region)) {
            return true;
        }
    }
    if let Some(city) = &location.city {
        if c.cities.iter().any(|v| v.eq_ignore_ascii_case(city)) {
            return true;
        }
    }
    if let Some(point) = location.coordinates() {
        for fence in &c.geofences {
            // Boundary inclusive: a point exactly at the radius matches.
            if haversine_km(point, (fence.latitude, fence.longitude)) <= fence.radius_km {
                return true;
            }
        }
    }
    if let Some(ip) = &location.ip {
        if c.ip_addresses.iter().any(|v| v == ip) {
            return true;
        }
        if let Ok(addr) = IpAddr::from_str(ip) {
            for range in &c.ip_ranges {
                match ipnetwork::IpNetwork::from_str(range) {
                    Ok(network) if network.contains(addr) => return true,
                    Ok(_) => {}
                    Err(_) => {
                        warn!(rule = %rule.name, range = %range, "skipping malformed CIDR range");
                    }
                }
            }
        }
    }
    if let Some(tz) = &location.timezone {
        if c.timezones.iter().any(|v| v == tz) {
            return true;
        }
    }

    false
}

/// Whether `now` satisfies the rule's time window.
///
/// Configured categories (days, time-of-day ranges, date ranges) are AND'd;
/// multiple ranges inside one category are OR'd. Time-of-day and weekday are
/// taken in the window's timezone; an unparseable timezone falls back to UTC
/// with a warning.
fn window_matches(window: &TimeWindow, now: DateTime<Utc>) -> bool {
    let tz: Tz = match window.timezone.as_deref() {
        Some(name) => name.parse().unwrap_or_else(|_| {
            warn!(timezone = name, "unknown rule timezone, falling back to UTC");
            chrono_tz::UTC
        }),
        None => chrono_tz::UTC,
    };
    let local = now.with_timezone(&tz);

    if !window.days.is_empty() && !window.days.contains(&local.weekday()) {
        return false;
    }
    if !window.time_ranges.is_empty() {
        let time = local.time();
        if !window.time_ranges.iter().any(|r| r.contains(time)) {
            return false;
        }
    }
    if !window.date_ranges.is_empty() && !window.date_ranges.iter().any(|r| r.contains(now)) {
        return false;
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DateRange, Geofence, RuleScope, TimeOfDayRange};
    use crate::storage::memory::InMemoryStore;
    use chrono::{Duration, NaiveTime, TimeZone, Weekday};

    fn us_location() -> GeoLocation {
        GeoLocation {
            country: Some("US".into()),
            region: Some("New York".into()),
            city: Some("New York".into()),
            latitude: Some(40.7128),
            longitude: Some(-74.0060),
            timezone: Some("America/New_York".into()),
            ip: Some("203.0.113.10".into()),
        }
    }

    async fn evaluate_with(
        rules: Vec<AccessRule>,
        location: &GeoLocation,
    ) -> (RuleOutcome, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::new());
        for rule in rules {
            store.put_rule(rule).await.unwrap();
        }
        let evaluator = RuleEvaluator::new(store.clone());
        let outcome = evaluator
            .evaluate(Uuid::new_v4(), "rider", location, Utc::now())
            .await
            .unwrap();
        (outcome, store)
    }

    #[test]
    fn haversine_is_symmetric_and_zero_on_identity() {
        let nyc = (40.7128, -74.0060);
        let la = (34.0522, -118.2437);
        assert!((haversine_km(nyc, la) - haversine_km(la, nyc)).abs() < 1e-9);
        assert_eq!(haversine_km(nyc, nyc), 0.0);
        // NYC to LA is roughly 3940 km.
        assert!((haversine_km(nyc, la) - 3940.0).abs() < 50.0);
    }

    #[tokio::test]
    async fn geofence_boundary_is_inclusive() {
        let center = (40.0, -74.0);
        let point = (40.5, -74.0);
        let radius = haversine_km(center, point);

        let mut rule = AccessRule::new("fence", RuleAction::Deny { message: None });
        rule.conditions.geofences.push(Geofence {
            latitude: center.0,
            longitude: center.1,
            radius_km: radius,
        });
        let location = GeoLocation {
            latitude: Some(point.0),
            longitude: Some(point.1),
            ..Default::default()
        };

        let (outcome, _) = evaluate_with(vec![rule], &location).await;
        assert!(!outcome.allowed, "point exactly at radius must match");
    }

    #[tokio::test]
    async fn highest_priority_deny_wins_and_short_circuits() {
        let mut deny = AccessRule::new(
            "deny-us",
            RuleAction::Deny {
                message: Some("region blocked".into()),
            },
        );
        deny.priority = 100;
        deny.conditions.countries = vec!["US".into()];
        let deny_id = deny.id;

        let mut alert = AccessRule::new(
            "alert-us",
            RuleAction::Alert {
                notify: vec!["secops".into()],
            },
        );
        alert.priority = 10;
        alert.conditions.countries = vec!["US".into()];
        let alert_id = alert.id;

        let (outcome, store) = evaluate_with(vec![alert, deny], &us_location()).await;

        assert!(!outcome.allowed);
        assert_eq!(outcome.denied_by, Some(deny_id));
        assert_eq!(outcome.deny_message.as_deref(), Some("region blocked"));
        assert!(!outcome.should_alert, "evaluation must stop at the deny");

        let denied = store.find_rule(deny_id).await.unwrap().unwrap();
        assert_eq!(denied.stats.triggered, 1);
        assert_eq!(denied.stats.denied, 1);
        let skipped = store.find_rule(alert_id).await.unwrap().unwrap();
        assert_eq!(
            skipped.stats.triggered, 0,
            "lower-priority rule must see no counter update"
        );
    }

    #[tokio::test]
    async fn non_terminal_effects_accumulate() {
        let mut twofa = AccessRule::new("2fa-us", RuleAction::RequireTwoFactor);
        twofa.priority = 50;
        twofa.conditions.countries = vec!["US".into()];

        let mut alert = AccessRule::new(
            "alert-us",
            RuleAction::Alert {
                notify: vec!["secops".into()],
            },
        );
        alert.priority = 40;
        alert.conditions.countries = vec!["US".into()];

        let mut challenge = AccessRule::new(
            "challenge-us",
            RuleAction::Challenge {
                challenge_type: ChallengeType::Captcha,
            },
        );
        challenge.priority = 30;
        challenge.conditions.countries = vec!["US".into()];

        let (outcome, _) = evaluate_with(vec![twofa, alert, challenge], &us_location()).await;

        assert!(outcome.allowed);
        assert!(outcome.requires_2fa);
        assert!(outcome.should_alert);
        assert_eq!(outcome.alert_targets, vec!["secops".to_string()]);
        assert!(outcome.should_challenge);
        assert_eq!(outcome.challenge_type, Some(ChallengeType::Captcha));
        assert_eq!(outcome.matched_rules.len(), 3);
    }

    #[tokio::test]
    async fn highest_priority_challenge_type_wins() {
        let mut strong = AccessRule::new(
            "challenge-email",
            RuleAction::Challenge {
                challenge_type: ChallengeType::EmailCode,
            },
        );
        strong.priority = 90;
        strong.conditions.countries = vec!["US".into()];

        let mut weak = AccessRule::new(
            "challenge-captcha",
            RuleAction::Challenge {
                challenge_type: ChallengeType::Captcha,
            },
        );
        weak.priority = 10;
        weak.conditions.countries = vec!["US".into()];

        let (outcome, _) = evaluate_with(vec![weak, strong], &us_location()).await;
        assert_eq!(outcome.challenge_type, Some(ChallengeType::EmailCode));
    }

    #[tokio::test]
    async fn scope_filters_roles_and_users() {
        let store = Arc::new(InMemoryStore::new());
        let mut rule = AccessRule::new("driver-deny", RuleAction::Deny { message: None });
        rule.scope = RuleScope::Role {
            roles: vec!["driver".into()],
        };
        rule.conditions.countries = vec!["US".into()];
        store.put_rule(rule).await.unwrap();

        let evaluator = RuleEvaluator::new(store);
        let rider = evaluator
            .evaluate(Uuid::new_v4(), "rider", &us_location(), Utc::now())
            .await
            .unwrap();
        assert!(rider.allowed);

        let driver = evaluator
            .evaluate(Uuid::new_v4(), "driver", &us_location(), Utc::now())
            .await
            .unwrap();
        assert!(!driver.allowed);
    }

    #[tokio::test]
    async fn cidr_range_uses_real_containment() {
        let mut rule = AccessRule::new("block-subnet", RuleAction::Deny { message: None });
        rule.conditions.ip_ranges = vec!["203.0.113.0/24".into()];

        let inside = GeoLocation {
            ip: Some("203.0.113.200".into()),
            ..Default::default()
        };
        let (outcome, _) = evaluate_with(vec![rule.clone()], &inside).await;
        assert!(!outcome.allowed);

        // A string-prefix matcher would wrongly match 203.0.1131.x style
        // addresses; real containment must not.
        let outside = GeoLocation {
            ip: Some("203.0.114.1".into()),
            ..Default::default()
        };
        let (outcome, _) = evaluate_with(vec![rule], &outside).await;
        assert!(outcome.allowed);
    }

    #[tokio::test]
    async fn time_window_categories_are_anded() {
        let now = Utc.with_ymd_and_hms(2026, 8, 26, 15, 0, 0).unwrap(); // Wednesday 15:00 UTC
        let mut rule = AccessRule::new("window", RuleAction::Deny { message: None });
        rule.conditions.countries = vec!["US".into()];
        rule.time_window = Some(TimeWindow {
            days: vec![Weekday::Wed],
            time_ranges: vec![TimeOfDayRange {
                start: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
                end: NaiveTime::from_hms_opt(17, 0, 0).unwrap(),
            }],
            timezone: None,
            date_ranges: vec![DateRange {
                start: now - Duration::days(10),
                end: now + Duration::days(10),
            }],
        });

        let store = Arc::new(InMemoryStore::new());
        store.put_rule(rule).await.unwrap();
        let evaluator = RuleEvaluator::new(store);

        let hit = evaluator
            .evaluate(Uuid::new_v4(), "rider", &us_location(), now)
            .await
            .unwrap();
        assert!(!hit.allowed);

        // Same wall-clock pattern on a Thursday misses the day category.
        let thursday = now + Duration::days(1);
        let miss = evaluator
            .evaluate(Uuid::new_v4(), "rider", &us_location(), thursday)
            .await
            .unwrap();
        assert!(miss.allowed);
    }

    #[tokio::test]
    async fn time_window_respects_rule_timezone() {
        // 02:00 UTC is 21:00 the previous evening in New York.
        let now = Utc.with_ymd_and_hms(2026, 8, 27, 2, 0, 0).unwrap();
        let store = Arc::new(InMemoryStore::new());
        let mut rule = AccessRule::new("evening-curfew", RuleAction::Deny { message: None });
        rule.conditions.countries = vec!["US".into()];
        rule.time_window = Some(TimeWindow {
            days: Vec::new(),
            time_ranges: vec![TimeOfDayRange {
                start: NaiveTime::from_hms_opt(20, 0, 0).unwrap(),
                end: NaiveTime::from_hms_opt(23, 59, 0).unwrap(),
            }],
            timezone: Some("America/New_York".into()),
            date_ranges: Vec::new(),
        });
        store.put_rule(rule).await.unwrap();
        let evaluator = RuleEvaluator::new(store);
        let outcome = evaluator
            .evaluate(Uuid::new_v4(), "rider", &us_location(), now)
            .await
            .unwrap();
        assert!(!outcome.allowed, "21:00 New York falls inside the curfew");
    }

    #[tokio::test]
    async fn equal_priority_ties_break_on_creation_order() {
        let mut first = AccessRule::new(
            "first",
            RuleAction::Challenge {
                challenge_type: ChallengeType::SmsCode,
            },
        );
        first.conditions.countries = vec!["US".into()];
        let mut second = AccessRule::new(
            "second",
            RuleAction::Challenge {
                challenge_type: ChallengeType::Captcha,
            },
        );
        second.conditions.countries = vec!["US".into()];
        second.created_at = first.created_at + Duration::seconds(1);

        let (outcome, _) = evaluate_with(vec![second, first], &us_location()).await;
        assert_eq!(
            outcome.challenge_type,
            Some(ChallengeType::SmsCode),
            "earlier-created rule wins the tie"
        );
    }

    #[tokio::test]
    async fn inactive_rules_are_skipped() {
        let mut rule = AccessRule::new("disabled", RuleAction::Deny { message: None });
        rule.conditions.countries = vec!["US".into()];
        rule.active = false;
        let (outcome, _) = evaluate_with(vec![rule], &us_location()).await;
        assert!(outcome.allowed);
    }

    #[tokio::test]
    async fn empty_conditions_match_everywhere() {
        let rule = AccessRule::new("global-2fa", RuleAction::RequireTwoFactor);
        let (outcome, _) = evaluate_with(vec![rule], &GeoLocation::default()).await;
        assert!(outcome.requires_2fa);
    }
}
