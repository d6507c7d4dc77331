//! Per-attempt risk scoring and attack-pattern detection.
//!
//! Scoring is additive over independent factors and clamped to 100. The
//! pattern detectors are advisory signals consumed by the caller; they never
//! error. Any storage failure degrades to "not detected" with a warning,
//! because an advisory signal must not take the login path down with it.

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

use crate::config::PatternConfig;
use crate::models::{LoginAttempt, RiskFactor};
use crate::storage::AttemptStore;

/// Score plus the factors that produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskAssessment {
    /// 0-100.
    pub score: u8,
    pub factors: Vec<RiskFactor>,
}

/// Brute-force detector verdict.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BruteForceReport {
    pub detected: bool,
    /// Failed attempts observed inside the window.
    pub attempt_count: u64,
}

/// Credential-stuffing detector verdict.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CredentialStuffingReport {
    pub detected: bool,
    /// Distinct targeted accounts inside the window.
    pub unique_accounts: u64,
}

/// Compute the 0-100 risk score for a single attempt. Pure.
///
/// Each factor contributes only when its trigger condition holds: failed
/// attempt +20, flagged suspicious +30, no fingerprint +10, high-risk
/// failure reason +25, attack-pattern membership +30.
pub fn score_attempt(attempt: &LoginAttempt) -> RiskAssessment {
    let mut score: u32 = 0;
    let mut factors = Vec::new();

    if !attempt.success {
        score += 20;
        factors.push(RiskFactor::FailedAttempt);
    }
    if attempt.suspicious {
        score += 30;
        factors.push(RiskFactor::FlaggedSuspicious);
    }
    if attempt.fingerprint.is_none() {
        score += 10;
        factors.push(RiskFactor::MissingFingerprint);
    }
    if attempt
        .failure_reason
        .map(|r| r.is_high_risk())
        .unwrap_or(false)
    {
        score += 25;
        factors.push(RiskFactor::HighRiskFailureReason);
    }
    if attempt.attack_pattern {
        score += 30;
        factors.push(RiskFactor::AttackPattern);
    }

    RiskAssessment {
        score: score.min(100) as u8,
        factors,
    }
}

/// Advisory detectors over the recent attempt history.
pub struct PatternDetectors {
    attempts: Arc<dyn AttemptStore>,
    config: PatternConfig,
}

impl PatternDetectors {
    pub fn new(attempts: Arc<dyn AttemptStore>, config: PatternConfig) -> Self {
        Self { attempts, config }
    }

    /// Count failed attempts for `email` in the trailing window and flag
    /// brute force at the configured threshold. Never errors.
    pub async fn detect_brute_force(&self, email: &str) -> BruteForceReport {
        let since = Utc::now()
            - Duration::from_std(self.config.brute_force_window)
                .unwrap_or_else(|_| Duration::minutes(15));
        match self.attempts.count_recent_failures(email, since).await {
            Ok(count) => BruteForceReport {
                detected: count >= self.config.brute_force_threshold,
                attempt_count: count,
            },
            Err(err) => {
                warn!(error = %err, "brute-force detection degraded to not-detected");
                BruteForceReport {
                    detected: false,
                    attempt_count: 0,
                }
            }
        }
    }

    /// Count distinct emails among failed attempts sharing `ip` or
    /// `fingerprint` in the trailing window and flag credential stuffing at
    /// the configured threshold. Never errors.
    pub async fn detect_credential_stuffing(
        &self,
        ip: Option<&str>,
        fingerprint: Option<&str>,
    ) -> CredentialStuffingReport {
        let since = Utc::now()
            - Duration::from_std(self.config.stuffing_window)
                .unwrap_or_else(|_| Duration::hours(1));
        match self
            .attempts
            .count_distinct_failed_emails(ip, fingerprint, since)
            .await
        {
            Ok(unique) => CredentialStuffingReport {
                detected: unique >= self.config.stuffing_threshold,
                unique_accounts: unique,
            },
            Err(err) => {
                warn!(error = %err, "credential-stuffing detection degraded to not-detected");
                CredentialStuffingReport {
                    detected: false,
                    unique_accounts: 0,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{EngineError, Result};
    use crate::models::{FailureReason, GeoLocation, ReviewAnnotation};
    use crate::storage::memory::InMemoryStore;
    use async_trait::async_trait;
    use chrono::DateTime;
    use uuid::Uuid;

    #[test]
    fn successful_clean_attempt_scores_only_missing_fingerprint() {
        let mut attempt = LoginAttempt::new("a@example.com");
        attempt.success = true;
        let assessment = score_attempt(&attempt);
        assert_eq!(assessment.score, 10);
        assert_eq!(assessment.factors, vec![RiskFactor::MissingFingerprint]);
    }

    #[test]
    fn all_factors_clamp_at_100() {
        let mut attempt = LoginAttempt::new("a@example.com");
        attempt.success = false;
        attempt.suspicious = true;
        attempt.fingerprint = None;
        attempt.failure_reason = Some(FailureReason::SuspiciousActivity);
        attempt.attack_pattern = true;
        // 20 + 30 + 10 + 25 + 30 = 115, clamped.
        let assessment = score_attempt(&attempt);
        assert_eq!(assessment.score, 100);
        assert_eq!(assessment.factors.len(), 5);
    }

    #[test]
    fn invalid_credentials_is_not_high_risk() {
        let mut attempt = LoginAttempt::new("a@example.com");
        attempt.success = false;
        attempt.fingerprint = Some("fp".into());
        attempt.failure_reason = Some(FailureReason::InvalidCredentials);
        assert_eq!(score_attempt(&attempt).score, 20);
    }

    async fn seed_failures(store: &InMemoryStore, email: &str, count: usize) {
        for _ in 0..count {
            let mut attempt = LoginAttempt::new(email);
            attempt.location = GeoLocation {
                ip: Some("203.0.113.5".into()),
                ..Default::default()
            };
            store.record_attempt(&attempt).await.unwrap();
        }
    }

    #[tokio::test]
    async fn brute_force_flags_at_five_not_four() {
        let store = Arc::new(InMemoryStore::new());
        let detectors = PatternDetectors::new(store.clone(), PatternConfig::default());

        seed_failures(&store, "x@y.com", 4).await;
        let report = detectors.detect_brute_force("x@y.com").await;
        assert!(!report.detected);
        assert_eq!(report.attempt_count, 4);

        seed_failures(&store, "x@y.com", 1).await;
        let report = detectors.detect_brute_force("x@y.com").await;
        assert!(report.detected);
        assert_eq!(report.attempt_count, 5);
    }

    #[tokio::test]
    async fn brute_force_ignores_attempts_outside_window() {
        let store = Arc::new(InMemoryStore::new());
        let detectors = PatternDetectors::new(store.clone(), PatternConfig::default());

        for _ in 0..10 {
            let mut attempt = LoginAttempt::new("x@y.com");
            attempt.created_at = Utc::now() - Duration::minutes(20);
            store.record_attempt(&attempt).await.unwrap();
        }
        let report = detectors.detect_brute_force("x@y.com").await;
        assert!(!report.detected);
    }

    #[tokio::test]
    async fn stuffing_needs_distinct_emails() {
        let store = Arc::new(InMemoryStore::new());
        let detectors = PatternDetectors::new(store.clone(), PatternConfig::default());

        // One email hammered 20 times must not trigger.
        seed_failures(&store, "victim@example.com", 20).await;
        let report = detectors
            .detect_credential_stuffing(Some("203.0.113.5"), None)
            .await;
        assert!(!report.detected);
        assert_eq!(report.unique_accounts, 1);

        // Ten distinct emails from the same IP must.
        for i in 0..9 {
            seed_failures(&store, &format!("user{i}@example.com"), 1).await;
        }
        let report = detectors
            .detect_credential_stuffing(Some("203.0.113.5"), None)
            .await;
        assert!(report.detected);
        assert_eq!(report.unique_accounts, 10);
    }

    #[tokio::test]
    async fn stuffing_matches_on_fingerprint_too() {
        let store = Arc::new(InMemoryStore::new());
        let detectors = PatternDetectors::new(store.clone(), PatternConfig::default());

        for i in 0..10 {
            let mut attempt = LoginAttempt::new(format!("user{i}@example.com"));
            attempt.fingerprint = Some("fp_shared".into());
            store.record_attempt(&attempt).await.unwrap();
        }
        let report = detectors
            .detect_credential_stuffing(None, Some("fp_shared"))
            .await;
        assert!(report.detected);
    }

    /// A store whose reads always fail; detectors must degrade gracefully.
    struct BrokenStore;

    #[async_trait]
    impl AttemptStore for BrokenStore {
        async fn record_attempt(&self, _attempt: &LoginAttempt) -> Result<()> {
            Err(EngineError::storage("down"))
        }
        async fn count_recent_failures(
            &self,
            _email: &str,
            _since: DateTime<Utc>,
        ) -> Result<u64> {
            Err(EngineError::storage("down"))
        }
        async fn count_distinct_failed_emails(
            &self,
            _ip: Option<&str>,
            _fingerprint: Option<&str>,
            _since: DateTime<Utc>,
        ) -> Result<u64> {
            Err(EngineError::storage("down"))
        }
        async fn recent_attempts(&self, _email: &str, _limit: usize) -> Result<Vec<LoginAttempt>> {
            Err(EngineError::storage("down"))
        }
        async fn annotate_attempt(
            &self,
            _attempt_id: Uuid,
            _review: ReviewAnnotation,
        ) -> Result<()> {
            Err(EngineError::storage("down"))
        }
        async fn purge_older_than(&self, _cutoff: DateTime<Utc>) -> Result<u64> {
            Err(EngineError::storage("down"))
        }
    }

    #[tokio::test]
    async fn detectors_degrade_to_not_detected_on_store_failure() {
        let detectors = PatternDetectors::new(Arc::new(BrokenStore), PatternConfig::default());
        let brute = detectors.detect_brute_force("x@y.com").await;
        assert!(!brute.detected);
        let stuffing = detectors
            .detect_credential_stuffing(Some("203.0.113.5"), None)
            .await;
        assert!(!stuffing.detected);
    }
}
