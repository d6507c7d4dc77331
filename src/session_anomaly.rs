//! Read-only diagnostics over a user's concurrent active sessions.
//!
//! Nothing here blocks a session. The detector reports anomalies and the
//! caller decides whether to log, alert, or force re-authentication.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::SessionAnomalyConfig;
use crate::models::Session;
use crate::storage::SessionStore;

/// One detected anomaly across a user's active sessions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SessionAnomaly {
    /// More distinct IPs across active sessions than the configured limit.
    MultipleIps {
        distinct_ips: usize,
        /// (session id, ip) for every active session.
        sessions: Vec<(Uuid, String)>,
    },
    /// Two sessions from different countries created implausibly close
    /// together.
    ImpossibleTravel {
        earlier_session: Uuid,
        later_session: Uuid,
        earlier_country: String,
        later_country: String,
        gap_minutes: i64,
    },
    /// More concurrent active sessions than the configured limit.
    ExcessiveSessions { active_count: usize },
}

/// Inspects a user's active sessions for anomalies.
pub struct SessionAnomalyDetector {
    sessions: Arc<dyn SessionStore>,
    config: SessionAnomalyConfig,
}

impl SessionAnomalyDetector {
    pub fn new(sessions: Arc<dyn SessionStore>, config: SessionAnomalyConfig) -> Self {
        Self { sessions, config }
    }

    /// Run all checks over the user's currently active, non-expired
    /// sessions. Diagnostic only; a storage failure yields an empty report
    /// with a warning rather than an error.
    pub async fn detect_anomalies(&self, user_id: Uuid) -> Vec<SessionAnomaly> {
        let sessions = match self.sessions.active_sessions(user_id).await {
            Ok(sessions) => sessions,
            Err(err) => {
                warn!(%user_id, error = %err, "session anomaly scan degraded to empty");
                return Vec::new();
            }
        };

        let mut anomalies = Vec::new();
        self.check_multiple_ips(&sessions, &mut anomalies);
        self.check_impossible_travel(&sessions, &mut anomalies);
        self.check_concurrency(&sessions, &mut anomalies);

        if !anomalies.is_empty() {
            debug!(
                %user_id,
                count = anomalies.len(),
                "session anomalies detected"
            );
        }
        anomalies
    }

    fn check_multiple_ips(&self, sessions: &[Session], anomalies: &mut Vec<SessionAnomaly>) {
        let distinct: HashSet<&str> = sessions.iter().map(|s| s.ip.as_str()).collect();
        if distinct.len() > self.config.max_distinct_ips {
            anomalies.push(SessionAnomaly::MultipleIps {
                distinct_ips: distinct.len(),
                sessions: sessions.iter().map(|s| (s.id, s.ip.clone())).collect(),
            });
        }
    }

    /// For every adjacent pair (by creation time) whose countries differ,
    /// flag the pair when the gap is under the configured limit.
    fn check_impossible_travel(&self, sessions: &[Session], anomalies: &mut Vec<SessionAnomaly>) {
        let mut ordered: Vec<&Session> = sessions.iter().collect();
        ordered.sort_by_key(|s| s.created_at);

        let max_gap = chrono::Duration::from_std(self.config.impossible_travel_gap)
            .unwrap_or_else(|_| chrono::Duration::hours(2));

        for pair in ordered.windows(2) {
            let (earlier, later) = (pair[0], pair[1]);
            let (Some(from), Some(to)) = (
                earlier.location.country.as_deref(),
                later.location.country.as_deref(),
            ) else {
                continue;
            };
            if from == to {
                continue;
            }
            let gap = later.created_at - earlier.created_at;
            if gap < max_gap {
                anomalies.push(SessionAnomaly::ImpossibleTravel {
                    earlier_session: earlier.id,
                    later_session: later.id,
                    earlier_country: from.to_string(),
                    later_country: to.to_string(),
                    gap_minutes: gap.num_minutes(),
                });
            }
        }
    }

    fn check_concurrency(&self, sessions: &[Session], anomalies: &mut Vec<SessionAnomaly>) {
        if sessions.len() > self.config.max_concurrent_sessions {
            anomalies.push(SessionAnomaly::ExcessiveSessions {
                active_count: sessions.len(),
            });
        }
    }
}

/// Convenience used in tests and by callers building session snapshots.
pub fn session_snapshot(
    user_id: Uuid,
    ip: &str,
    country: Option<&str>,
    created_minutes_ago: i64,
) -> Session {
    let now = Utc::now();
    Session {
        id: Uuid::new_v4(),
        user_id,
        token_hash: "hashed".into(),
        ip: ip.to_string(),
        fingerprint: None,
        location: crate::models::GeoLocation {
            country: country.map(str::to_string),
            ..Default::default()
        },
        is_active: true,
        suspicious: false,
        last_activity: now,
        expires_at: now + chrono::Duration::hours(8),
        revoked_by: None,
        revoke_reason: None,
        created_at: now - chrono::Duration::minutes(created_minutes_ago),
    }
}
