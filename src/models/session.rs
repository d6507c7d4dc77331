//! Session records, one per issued credential.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::location::GeoLocation;

/// Why a session was revoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevokeReason {
    UserLogout,
    AdminRevoke,
    SecurityConcern,
    PasswordChanged,
    Expired,
}

/// One record per issued credential. Holds a hash of the credential, never
/// the credential itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Unique session ID.
    pub id: Uuid,
    /// Owning user.
    pub user_id: Uuid,
    /// Hash of the issued credential.
    pub token_hash: String,
    /// IP at issuance.
    pub ip: String,
    /// Device fingerprint at issuance.
    pub fingerprint: Option<String>,
    /// Location snapshot at issuance.
    pub location: GeoLocation,
    /// Live flag; cleared on revoke or expiry.
    pub is_active: bool,
    /// Flagged by anomaly detection or operator review.
    pub suspicious: bool,
    /// Updated on each authenticated request.
    pub last_activity: DateTime<Utc>,
    /// Hard expiry.
    pub expires_at: DateTime<Utc>,
    /// Who revoked the session, when revoked.
    pub revoked_by: Option<Uuid>,
    /// Why the session ended, when revoked.
    pub revoke_reason: Option<RevokeReason>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl Session {
    /// Active and not past expiry at `now`.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.expires_at > now
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn session(expires_in: Duration) -> Session {
        let now = Utc::now();
        Session {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            token_hash: "h".into(),
            ip: "203.0.113.9".into(),
            fingerprint: None,
            location: GeoLocation::default(),
            is_active: true,
            suspicious: false,
            last_activity: now,
            expires_at: now + expires_in,
            revoked_by: None,
            revoke_reason: None,
            created_at: now,
        }
    }

    #[test]
    fn expired_session_is_not_live() {
        let s = session(Duration::seconds(-10));
        assert!(!s.is_live(Utc::now()));
    }

    #[test]
    fn revoked_session_is_not_live() {
        let mut s = session(Duration::hours(1));
        s.is_active = false;
        assert!(!s.is_live(Utc::now()));
    }
}
