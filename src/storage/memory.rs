//! In-memory store backed by DashMap.
//!
//! Suitable for tests, development, and single-instance deployments.
//! Counter mutations happen inside DashMap entry guards, which gives the
//! atomicity the trait contract requires without a broader lock.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

use crate::errors::{EngineError, Result};
use crate::models::{
    AccessRule, DeviceAttributes, FingerprintHistoryEntry, LoginAttempt, ReviewAnnotation,
    RevokeReason, Session, TrustLevel, TrustedDevice,
};
use crate::storage::{AttemptStore, DeviceStore, RuleStore, SessionStore, TriggerOutcome};

/// DashMap-backed implementation of all four store traits.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    rules: Arc<DashMap<Uuid, AccessRule>>,
    attempts: Arc<DashMap<Uuid, LoginAttempt>>,
    devices: Arc<DashMap<Uuid, TrustedDevice>>,
    sessions: Arc<DashMap<Uuid, Session>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored attempts; test helper.
    pub fn attempt_count(&self) -> usize {
        self.attempts.len()
    }

    /// All stored attempts, newest first; test helper.
    pub fn all_attempts(&self) -> Vec<LoginAttempt> {
        let mut attempts: Vec<_> = self.attempts.iter().map(|e| e.value().clone()).collect();
        attempts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        attempts
    }
}

#[async_trait]
impl RuleStore for InMemoryStore {
    async fn active_rules(&self) -> Result<Vec<AccessRule>> {
        Ok(self
            .rules
            .iter()
            .filter(|e| e.value().active)
            .map(|e| e.value().clone())
            .collect())
    }

    async fn increment_rule_stats(&self, rule_id: Uuid, outcome: TriggerOutcome) -> Result<()> {
        let mut entry = self
            .rules
            .get_mut(&rule_id)
            .ok_or_else(|| EngineError::storage(format!("rule {rule_id} not found")))?;
        let stats = &mut entry.value_mut().stats;
        stats.triggered += 1;
        match outcome {
            TriggerOutcome::Allowed => stats.allowed += 1,
            TriggerOutcome::Denied => stats.denied += 1,
        }
        stats.last_triggered = Some(Utc::now());
        Ok(())
    }

    async fn find_rule(&self, rule_id: Uuid) -> Result<Option<AccessRule>> {
        Ok(self.rules.get(&rule_id).map(|e| e.value().clone()))
    }

    async fn put_rule(&self, rule: AccessRule) -> Result<()> {
        self.rules.insert(rule.id, rule);
        Ok(())
    }
}

#[async_trait]
impl AttemptStore for InMemoryStore {
    async fn record_attempt(&self, attempt: &LoginAttempt) -> Result<()> {
        self.attempts.insert(attempt.id, attempt.clone());
        Ok(())
    }

    async fn count_recent_failures(&self, email: &str, since: DateTime<Utc>) -> Result<u64> {
        Ok(self
            .attempts
            .iter()
            .filter(|e| {
                let a = e.value();
                !a.success && a.email == email && a.created_at >= since
            })
            .count() as u64)
    }

    async fn count_distinct_failed_emails(
        &self,
        ip: Option<&str>,
        fingerprint: Option<&str>,
        since: DateTime<Utc>,
    ) -> Result<u64> {
        let mut emails = HashSet::new();
        for entry in self.attempts.iter() {
            let a = entry.value();
            if a.success || a.created_at < since {
                continue;
            }
            let ip_match = match ip {
                Some(ip) => a.location.ip.as_deref() == Some(ip),
                None => false,
            };
            let fp_match = match fingerprint {
                Some(fp) => a.fingerprint.as_deref() == Some(fp),
                None => false,
            };
            if ip_match || fp_match {
                emails.insert(a.email.clone());
            }
        }
        Ok(emails.len() as u64)
    }

    async fn recent_attempts(&self, email: &str, limit: usize) -> Result<Vec<LoginAttempt>> {
        let mut attempts: Vec<_> = self
            .attempts
            .iter()
            .filter(|e| e.value().email == email)
            .map(|e| e.value().clone())
            .collect();
        attempts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        attempts.truncate(limit);
        Ok(attempts)
    }

    async fn annotate_attempt(&self, attempt_id: Uuid, review: ReviewAnnotation) -> Result<()> {
        let mut entry = self
            .attempts
            .get_mut(&attempt_id)
            .ok_or_else(|| EngineError::storage(format!("attempt {attempt_id} not found")))?;
        entry.value_mut().review = Some(review);
        Ok(())
    }

    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let before = self.attempts.len();
        self.attempts.retain(|_, a| a.created_at >= cutoff);
        Ok((before - self.attempts.len()) as u64)
    }
}

#[async_trait]
impl DeviceStore for InMemoryStore {
    async fn find_device(
        &self,
        user_id: Uuid,
        fingerprint: &str,
    ) -> Result<Option<TrustedDevice>> {
        Ok(self
            .devices
            .iter()
            .find(|e| {
                let d = e.value();
                d.user_id == user_id && d.fingerprint == fingerprint
            })
            .map(|e| e.value().clone()))
    }

    async fn most_recent_device(
        &self,
        user_id: Uuid,
        exclude_fingerprint: Option<&str>,
    ) -> Result<Option<TrustedDevice>> {
        Ok(self
            .devices
            .iter()
            .filter(|e| {
                let d = e.value();
                d.user_id == user_id && exclude_fingerprint != Some(d.fingerprint.as_str())
            })
            .max_by_key(|e| e.value().last_seen)
            .map(|e| e.value().clone()))
    }

    async fn upsert_device(
        &self,
        user_id: Uuid,
        fingerprint: &str,
        attributes: &DeviceAttributes,
    ) -> Result<TrustedDevice> {
        // Bind the lookup first so the iterator's shard guard is dropped
        // before get_mut; keeping it alive through the if-let deadlocks.
        let existing_id = self.devices.iter().find_map(|e| {
            let d = e.value();
            (d.user_id == user_id && d.fingerprint == fingerprint).then_some(d.id)
        });
        if let Some(existing_id) = existing_id {
            let mut entry = self
                .devices
                .get_mut(&existing_id)
                .ok_or_else(|| EngineError::storage("device vanished during upsert"))?;
            let device = entry.value_mut();
            device.attributes = attributes.clone();
            device.last_seen = Utc::now();
            return Ok(device.clone());
        }

        let device = TrustedDevice::new(user_id, fingerprint, attributes.clone());
        self.devices.insert(device.id, device.clone());
        Ok(device)
    }

    async fn record_device_success(
        &self,
        device_id: Uuid,
        promotion_threshold: u32,
    ) -> Result<TrustedDevice> {
        let mut entry = self
            .devices
            .get_mut(&device_id)
            .ok_or_else(|| EngineError::storage(format!("device {device_id} not found")))?;
        let device = entry.value_mut();
        device.login_count += 1;
        device.failed_attempts = 0;
        device.last_seen = Utc::now();
        match device.trust_level {
            TrustLevel::Unknown | TrustLevel::Suspicious => {
                device.trust_level = TrustLevel::Recognized;
            }
            TrustLevel::Recognized if device.login_count > promotion_threshold => {
                device.trust_level = TrustLevel::Trusted;
            }
            _ => {}
        }
        Ok(device.clone())
    }

    async fn record_device_failure(
        &self,
        device_id: Uuid,
        auto_block_threshold: u32,
    ) -> Result<TrustedDevice> {
        let mut entry = self
            .devices
            .get_mut(&device_id)
            .ok_or_else(|| EngineError::storage(format!("device {device_id} not found")))?;
        let device = entry.value_mut();
        device.failed_attempts += 1;
        device.last_seen = Utc::now();
        if device.failed_attempts >= auto_block_threshold {
            device.is_blocked = true;
            device.trust_level = TrustLevel::Suspicious;
        }
        Ok(device.clone())
    }

    async fn set_trust_score(&self, device_id: Uuid, score: u8) -> Result<()> {
        let mut entry = self
            .devices
            .get_mut(&device_id)
            .ok_or_else(|| EngineError::storage(format!("device {device_id} not found")))?;
        entry.value_mut().trust_score = score;
        Ok(())
    }

    async fn append_fingerprint_history(
        &self,
        device_id: Uuid,
        history_entry: FingerprintHistoryEntry,
        new_fingerprint: &str,
        new_attributes: &DeviceAttributes,
    ) -> Result<()> {
        let mut entry = self
            .devices
            .get_mut(&device_id)
            .ok_or_else(|| EngineError::storage(format!("device {device_id} not found")))?;
        let device = entry.value_mut();
        device.fingerprint_history.push(history_entry);
        device.fingerprint = new_fingerprint.to_string();
        device.attributes = new_attributes.clone();
        device.last_seen = Utc::now();
        Ok(())
    }

    async fn set_blocked(&self, device_id: Uuid, blocked: bool) -> Result<()> {
        let mut entry = self
            .devices
            .get_mut(&device_id)
            .ok_or_else(|| EngineError::storage(format!("device {device_id} not found")))?;
        let device = entry.value_mut();
        device.is_blocked = blocked;
        if !blocked {
            device.failed_attempts = 0;
        }
        Ok(())
    }

    async fn set_remembered(&self, device_id: Uuid, until: Option<DateTime<Utc>>) -> Result<()> {
        let mut entry = self
            .devices
            .get_mut(&device_id)
            .ok_or_else(|| EngineError::storage(format!("device {device_id} not found")))?;
        entry.value_mut().remember_until = until;
        Ok(())
    }

    async fn set_verified(&self, device_id: Uuid) -> Result<()> {
        let mut entry = self
            .devices
            .get_mut(&device_id)
            .ok_or_else(|| EngineError::storage(format!("device {device_id} not found")))?;
        let device = entry.value_mut();
        device.is_verified = true;
        device.trust_level = TrustLevel::Verified;
        Ok(())
    }

    async fn purge_dormant(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let before = self.devices.len();
        self.devices
            .retain(|_, d| d.is_verified || d.last_seen >= cutoff);
        Ok((before - self.devices.len()) as u64)
    }
}

#[async_trait]
impl SessionStore for InMemoryStore {
    async fn create_session(&self, session: &Session) -> Result<()> {
        self.sessions.insert(session.id, session.clone());
        Ok(())
    }

    async fn active_sessions(&self, user_id: Uuid) -> Result<Vec<Session>> {
        let now = Utc::now();
        let mut sessions: Vec<_> = self
            .sessions
            .iter()
            .filter(|e| {
                let s = e.value();
                s.user_id == user_id && s.is_live(now)
            })
            .map(|e| e.value().clone())
            .collect();
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(sessions)
    }

    async fn touch_session(&self, session_id: Uuid, at: DateTime<Utc>) -> Result<()> {
        let mut entry = self
            .sessions
            .get_mut(&session_id)
            .ok_or_else(|| EngineError::storage(format!("session {session_id} not found")))?;
        entry.value_mut().last_activity = at;
        Ok(())
    }

    async fn revoke_session(
        &self,
        session_id: Uuid,
        revoked_by: Option<Uuid>,
        reason: RevokeReason,
    ) -> Result<()> {
        let mut entry = self
            .sessions
            .get_mut(&session_id)
            .ok_or_else(|| EngineError::storage(format!("session {session_id} not found")))?;
        let session = entry.value_mut();
        session.is_active = false;
        session.revoked_by = revoked_by;
        session.revoke_reason = Some(reason);
        Ok(())
    }

    async fn flag_suspicious(&self, session_id: Uuid) -> Result<()> {
        let mut entry = self
            .sessions
            .get_mut(&session_id)
            .ok_or_else(|| EngineError::storage(format!("session {session_id} not found")))?;
        entry.value_mut().suspicious = true;
        Ok(())
    }

    async fn cleanup_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut affected = 0;
        for mut entry in self.sessions.iter_mut() {
            let session = entry.value_mut();
            if session.is_active && session.expires_at <= now {
                session.is_active = false;
                session.revoke_reason = Some(RevokeReason::Expired);
                affected += 1;
            }
        }
        Ok(affected)
    }
}
