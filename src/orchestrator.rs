//! Sequencing of fingerprinting, rule evaluation, device trust, and risk
//! scoring into a single per-login decision.
//!
//! The pipeline runs as a strict sequence of states; each state either
//! terminates with a decision or advances. Every storage call carries a
//! request-scoped timeout. Any `EngineError` escaping the pipeline is caught
//! at the top and converted into the fail-open fallback: security-check
//! infrastructure failures must never become an availability outage for
//! legitimate users. The fallback decision is flagged and a best-effort
//! failure record is written, so the trade-off stays auditable.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::RiskEngineConfig;
use crate::errors::{EngineError, Result};
use crate::fingerprint::{
    self, ClientAttributes, DeviceFingerprint, DriftSeverity, RequestContext,
};
use crate::models::{
    ChallengeType, FailureReason, FingerprintHistoryEntry, GeoLocation, LoginAttempt,
    TrustedDevice,
};
use crate::risk::{self, PatternDetectors};
use crate::rules::{RuleEvaluator, RuleOutcome};
use crate::session_anomaly::{SessionAnomaly, SessionAnomalyDetector};
use crate::storage::{AttemptStore, DeviceStore, RuleStore, SessionStore};

/// The resolved user attempting to log in, supplied by the HTTP handler
/// after credential verification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthenticatedUser {
    pub id: Uuid,
    pub email: String,
    pub role: String,
}

/// Everything the engine needs to evaluate one login.
#[derive(Debug, Clone)]
pub struct LoginRequest {
    pub user: AuthenticatedUser,
    /// Raw request metadata (headers, IP).
    pub request: RequestContext,
    /// Client-supplied device attributes.
    pub client: ClientAttributes,
    /// Caller-resolved location.
    pub location: GeoLocation,
    /// The caller already verified a second factor for this attempt.
    pub second_factor_verified: bool,
}

/// Why the decision came out the way it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionReason {
    Allowed,
    GeoRestriction,
    DeviceBlocked,
    DeviceChanged,
    TwoFactorRequired,
    ChallengeRequired,
    SecurityChecksFailed,
}

/// The structured result handed back to the login handler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginDecision {
    pub allowed: bool,
    pub reason: DecisionReason,
    /// User-facing message, when a deny rule supplied one.
    pub message: Option<String>,
    /// Caller must collect a second factor before finalizing.
    pub requires_2fa: bool,
    /// Caller must complete device re-verification before finalizing.
    pub requires_verification: bool,
    /// Caller must complete a challenge before finalizing.
    pub requires_challenge: bool,
    pub challenge_type: Option<ChallengeType>,
    /// The device record as persisted during this evaluation.
    pub device: Option<TrustedDevice>,
    pub trust_score: Option<u8>,
    pub location: GeoLocation,
    /// Full rule-evaluation payload for the caller's audit logging.
    pub rule_outcome: Option<RuleOutcome>,
    /// The engine hit an infrastructure failure and fell back to allow.
    pub security_checks_failed: bool,
    /// Set together with `security_checks_failed`; the decision was not
    /// produced by the full pipeline.
    pub fallback_mode: bool,
}

impl LoginDecision {
    fn base(location: GeoLocation) -> Self {
        Self {
            allowed: true,
            reason: DecisionReason::Allowed,
            message: None,
            requires_2fa: false,
            requires_verification: false,
            requires_challenge: false,
            challenge_type: None,
            device: None,
            trust_score: None,
            location,
            rule_outcome: None,
            security_checks_failed: false,
            fallback_mode: false,
        }
    }

    fn denied(reason: DecisionReason, message: Option<String>, location: GeoLocation) -> Self {
        Self {
            allowed: false,
            reason,
            message,
            ..Self::base(location)
        }
    }

    /// The designated fail-open fallback: allowed, but flagged so the
    /// caller and operators can see the checks did not run to completion.
    pub fn fail_open(location: GeoLocation) -> Self {
        Self {
            reason: DecisionReason::SecurityChecksFailed,
            security_checks_failed: true,
            fallback_mode: true,
            ..Self::base(location)
        }
    }
}

/// The login security orchestrator.
pub struct LoginSecurityEngine {
    config: RiskEngineConfig,
    rules: RuleEvaluator,
    detectors: PatternDetectors,
    anomalies: SessionAnomalyDetector,
    attempts: Arc<dyn AttemptStore>,
    devices: Arc<dyn DeviceStore>,
}

impl LoginSecurityEngine {
    pub fn new(
        config: RiskEngineConfig,
        rule_store: Arc<dyn RuleStore>,
        attempt_store: Arc<dyn AttemptStore>,
        device_store: Arc<dyn DeviceStore>,
        session_store: Arc<dyn SessionStore>,
    ) -> Self {
        Self {
            rules: RuleEvaluator::new(rule_store),
            detectors: PatternDetectors::new(attempt_store.clone(), config.patterns.clone()),
            anomalies: SessionAnomalyDetector::new(session_store, config.session.clone()),
            attempts: attempt_store,
            devices: device_store,
            config,
        }
    }

    /// Evaluate one login attempt end to end.
    ///
    /// Never returns an error: infrastructure faults are converted into the
    /// fail-open fallback decision after a best-effort failure record.
    pub async fn evaluate_login(&self, request: &LoginRequest) -> LoginDecision {
        let started = Instant::now();
        match self.run_pipeline(request, started).await {
            Ok(decision) => decision,
            Err(fault) => {
                error!(
                    user = %request.user.id,
                    error = %fault,
                    "security pipeline failed, falling back to allow"
                );
                self.record_fault_attempt(request, started).await;
                LoginDecision::fail_open(request.location.clone())
            }
        }
    }

    async fn run_pipeline(
        &self,
        request: &LoginRequest,
        started: Instant,
    ) -> Result<LoginDecision> {
        // State 1: fingerprint the request.
        let fingerprint = DeviceFingerprint::generate(&request.request, &request.client);
        debug!(user = %request.user.id, fingerprint = %fingerprint.hash, "request fingerprinted");

        // State 2: geographic/time rule evaluation.
        let outcome = self
            .with_timeout(
                "evaluate_rules",
                self.rules
                    .evaluate(request.user.id, &request.user.role, &request.location, Utc::now()),
            )
            .await??;

        if !outcome.allowed {
            self.record_denied_attempt(
                request,
                &fingerprint,
                FailureReason::GeoRestriction,
                started,
            )
            .await?;
            if let Some(device) = self
                .with_timeout(
                    "find_device",
                    self.devices.find_device(request.user.id, &fingerprint.hash),
                )
                .await??
            {
                self.with_timeout(
                    "record_device_failure",
                    self.devices
                        .record_device_failure(device.id, self.config.device.auto_block_threshold),
                )
                .await??;
            }
            info!(user = %request.user.id, "login denied by access rule");
            return Ok(LoginDecision {
                rule_outcome: Some(outcome.clone()),
                ..LoginDecision::denied(
                    DecisionReason::GeoRestriction,
                    outcome.deny_message,
                    request.location.clone(),
                )
            });
        }

        // State 3: resolve-or-create the trusted device.
        let known_device = self
            .with_timeout(
                "find_device",
                self.devices.find_device(request.user.id, &fingerprint.hash),
            )
            .await??;
        let is_new_device = known_device.is_none();
        let device = self
            .with_timeout(
                "upsert_device",
                self.devices
                    .upsert_device(request.user.id, &fingerprint.hash, &fingerprint.attributes),
            )
            .await??;

        // State 4: blocked devices terminate immediately.
        if device.is_blocked {
            self.record_denied_attempt(
                request,
                &fingerprint,
                FailureReason::DeviceNotTrusted,
                started,
            )
            .await?;
            self.with_timeout(
                "record_device_failure",
                self.devices
                    .record_device_failure(device.id, self.config.device.auto_block_threshold),
            )
            .await??;
            info!(user = %request.user.id, device = %device.id, "login denied: device blocked");
            return Ok(LoginDecision {
                device: Some(device),
                rule_outcome: Some(outcome),
                ..LoginDecision::denied(
                    DecisionReason::DeviceBlocked,
                    None,
                    request.location.clone(),
                )
            });
        }

        // State 5: fingerprint drift. A brand-new device is compared against
        // the user's most recent other device; high drift pauses the login
        // for explicit re-verification.
        if is_new_device {
            if let Some(previous) = self
                .with_timeout(
                    "most_recent_device",
                    self.devices
                        .most_recent_device(request.user.id, Some(fingerprint.hash.as_str())),
                )
                .await??
            {
                let drift = fingerprint::detect_drift(
                    &previous.attributes,
                    &fingerprint.attributes,
                    self.config.device.drift_major_field_cutoff,
                );
                if drift.severity == DriftSeverity::High {
                    self.with_timeout(
                        "append_fingerprint_history",
                        self.devices.append_fingerprint_history(
                            device.id,
                            FingerprintHistoryEntry {
                                fingerprint: previous.fingerprint.clone(),
                                changed_fields: drift.changes.clone(),
                                severity: drift.severity.as_str().to_string(),
                                replaced_at: Utc::now(),
                            },
                            &fingerprint.hash,
                            &fingerprint.attributes,
                        ),
                    )
                    .await??;
                    warn!(
                        user = %request.user.id,
                        changed = ?drift.changes,
                        "high fingerprint drift, requiring device re-verification"
                    );
                    return Ok(LoginDecision {
                        reason: DecisionReason::DeviceChanged,
                        requires_verification: true,
                        device: Some(device),
                        rule_outcome: Some(outcome),
                        ..LoginDecision::base(request.location.clone())
                    });
                }
            }
        }

        // State 6: a matched 2FA rule pauses the login unless the caller
        // already verified a second factor or the device holds a live
        // remember-device grant.
        let remembered = device
            .remember_until
            .map(|until| until > Utc::now())
            .unwrap_or(false);
        if outcome.requires_2fa && !request.second_factor_verified && !remembered {
            return Ok(LoginDecision {
                reason: DecisionReason::TwoFactorRequired,
                requires_2fa: true,
                device: Some(device),
                rule_outcome: Some(outcome),
                ..LoginDecision::base(request.location.clone())
            });
        }

        // State 7: a matched challenge rule pauses the login.
        if outcome.should_challenge {
            return Ok(LoginDecision {
                reason: DecisionReason::ChallengeRequired,
                requires_challenge: true,
                challenge_type: outcome.challenge_type,
                device: Some(device),
                rule_outcome: Some(outcome),
                ..LoginDecision::base(request.location.clone())
            });
        }

        // State 8: compute and persist the device trust score.
        let score =
            fingerprint::trust_score(&device, &fingerprint.hash, &self.config.device, Utc::now());
        self.with_timeout(
            "set_trust_score",
            self.devices.set_trust_score(device.id, score),
        )
        .await??;

        // State 9: record device success (login count, failure reset,
        // trust-level promotion).
        let device = self
            .with_timeout(
                "record_device_success",
                self.devices
                    .record_device_success(device.id, self.config.device.trust_promotion_logins),
            )
            .await??;

        // State 10: persist the successful attempt with full context.
        let mut attempt = LoginAttempt::new(request.user.email.clone());
        attempt.user_id = Some(request.user.id);
        attempt.fingerprint = Some(fingerprint.hash.clone());
        attempt.device = Some(fingerprint.attributes.clone());
        attempt.location = request.location.clone();
        attempt.success = true;
        attempt.processing_ms = started.elapsed().as_millis() as u64;
        let assessment = risk::score_attempt(&attempt);
        attempt.risk_score = assessment.score;
        attempt.risk_factors = assessment.factors;
        self.with_timeout("record_attempt", self.attempts.record_attempt(&attempt))
            .await??;

        // State 11: alerts are logged; delivery is the caller's collaborator.
        if outcome.should_alert {
            warn!(
                user = %request.user.id,
                targets = ?outcome.alert_targets,
                location = ?request.location.country,
                "access rule alert triggered for successful login"
            );
        }

        // State 12: allowed, with the full payload for audit logging.
        Ok(LoginDecision {
            device: Some(device),
            trust_score: Some(score),
            rule_outcome: Some(outcome),
            ..LoginDecision::base(request.location.clone())
        })
    }

    /// Record a failed credential check (wrong password, unknown account).
    ///
    /// This is the supplemental surface that feeds the pattern detectors:
    /// the attempt is scored, flagged when it falls inside a detected
    /// brute-force or credential-stuffing pattern, and the device failure
    /// counter is bumped (auto-blocking at the configured threshold). Never
    /// errors; a storage fault here is logged and swallowed, since the
    /// caller has already rejected the credentials.
    pub async fn record_failed_login(
        &self,
        user_id: Option<Uuid>,
        email: &str,
        reason: FailureReason,
        request: &RequestContext,
        client: &ClientAttributes,
        location: &GeoLocation,
    ) {
        let started = Instant::now();
        let fingerprint = DeviceFingerprint::generate(request, client);

        let brute = self.detectors.detect_brute_force(email).await;
        let stuffing = self
            .detectors
            .detect_credential_stuffing(location.ip.as_deref(), Some(&fingerprint.hash))
            .await;
        let in_pattern = brute.detected || stuffing.detected;
        if in_pattern {
            warn!(
                email,
                brute_force = brute.detected,
                attempts = brute.attempt_count,
                credential_stuffing = stuffing.detected,
                unique_accounts = stuffing.unique_accounts,
                "failed login falls inside a detected attack pattern"
            );
        }

        let mut attempt = LoginAttempt::new(email);
        attempt.user_id = user_id;
        attempt.fingerprint = Some(fingerprint.hash.clone());
        attempt.device = Some(fingerprint.attributes.clone());
        attempt.location = location.clone();
        attempt.success = false;
        attempt.failure_reason = Some(reason);
        attempt.suspicious = in_pattern;
        attempt.attack_pattern = in_pattern;
        attempt.processing_ms = started.elapsed().as_millis() as u64;
        let assessment = risk::score_attempt(&attempt);
        attempt.risk_score = assessment.score;
        attempt.risk_factors = assessment.factors;

        if let Err(err) = self.attempts.record_attempt(&attempt).await {
            warn!(email, error = %err, "failed to persist failed login attempt");
        }

        if let Some(user_id) = user_id {
            match self.devices.find_device(user_id, &fingerprint.hash).await {
                Ok(Some(device)) => {
                    if let Err(err) = self
                        .devices
                        .record_device_failure(device.id, self.config.device.auto_block_threshold)
                        .await
                    {
                        warn!(email, error = %err, "failed to bump device failure counter");
                    }
                }
                Ok(None) => {}
                Err(err) => {
                    warn!(email, error = %err, "device lookup failed during failure recording");
                }
            }
        }
    }

    /// Grant a remember-device exemption for the configured lifetime.
    ///
    /// Called after the user completes a second factor and opts in; logins
    /// from this device skip the 2FA gate until the grant expires.
    pub async fn remember_device(&self, user_id: Uuid, fingerprint: &str) -> Result<()> {
        let device = self
            .devices
            .find_device(user_id, fingerprint)
            .await?
            .ok_or_else(|| EngineError::invalid_input("unknown device for remember grant"))?;
        let lifetime = chrono::Duration::from_std(self.config.device.remember_device_lifetime)
            .map_err(|_| EngineError::invalid_input("remember-device lifetime out of range"))?;
        let until = Utc::now() + lifetime;
        self.devices.set_remembered(device.id, Some(until)).await?;
        info!(user = %user_id, device = %device.id, %until, "remember-device grant issued");
        Ok(())
    }

    /// Diagnostic pass over the user's active sessions; see
    /// [`SessionAnomalyDetector`].
    pub async fn session_anomalies(&self, user_id: Uuid) -> Vec<SessionAnomaly> {
        self.anomalies.detect_anomalies(user_id).await
    }

    /// Record a denied attempt with its risk score.
    async fn record_denied_attempt(
        &self,
        request: &LoginRequest,
        fingerprint: &DeviceFingerprint,
        reason: FailureReason,
        started: Instant,
    ) -> Result<()> {
        let mut attempt = LoginAttempt::new(request.user.email.clone());
        attempt.user_id = Some(request.user.id);
        attempt.fingerprint = Some(fingerprint.hash.clone());
        attempt.device = Some(fingerprint.attributes.clone());
        attempt.location = request.location.clone();
        attempt.success = false;
        attempt.failure_reason = Some(reason);
        attempt.processing_ms = started.elapsed().as_millis() as u64;
        let assessment = risk::score_attempt(&attempt);
        attempt.risk_score = assessment.score;
        attempt.risk_factors = assessment.factors;
        self.with_timeout("record_attempt", self.attempts.record_attempt(&attempt))
            .await?
    }

    /// Best-effort failure record when the pipeline itself faulted.
    async fn record_fault_attempt(&self, request: &LoginRequest, started: Instant) {
        let mut attempt = LoginAttempt::new(request.user.email.clone());
        attempt.user_id = Some(request.user.id);
        attempt.location = request.location.clone();
        attempt.success = false;
        attempt.failure_reason = Some(FailureReason::EngineFault);
        attempt.processing_ms = started.elapsed().as_millis() as u64;
        if let Err(err) = self.attempts.record_attempt(&attempt).await {
            warn!(
                user = %request.user.id,
                error = %err,
                "could not persist engine-fault attempt record"
            );
        }
    }

    /// Wrap a storage future in the request-scoped deadline. A timeout is
    /// an [`EngineError::Timeout`] and therefore fails open upstream.
    async fn with_timeout<F, T>(&self, operation: &str, future: F) -> Result<T>
    where
        F: Future<Output = T>,
    {
        tokio::time::timeout(self.config.store_timeout, future)
            .await
            .map_err(|_| EngineError::timeout(operation))
    }
}
