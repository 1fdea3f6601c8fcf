//! Step-up authorization records
//!
//! A challenge is a short-lived one-time code issued to an account. Verifying
//! it mints a single-use grant that a sensitive operation consumes atomically
//! with its ledger effects.

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Number of digits in a challenge code
pub const CODE_LENGTH: usize = 6;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    pub id: Uuid,
    pub account_id: Uuid,
    /// hex(sha256(challenge id || code)); the plaintext is never stored
    pub code_hash: String,
    pub failed_attempts: i32,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub consumed_at: Option<DateTime<Utc>>,
    pub invalidated_at: Option<DateTime<Utc>>,
}

impl Challenge {
    /// Create a challenge and return it alongside the plaintext code
    pub fn issue(account_id: Uuid, now: DateTime<Utc>, ttl: chrono::Duration) -> (Self, String) {
        let id = Uuid::new_v4();
        let code = generate_code();
        let challenge = Self {
            id,
            account_id,
            code_hash: hash_code(id, &code),
            failed_attempts: 0,
            issued_at: now,
            expires_at: now + ttl,
            consumed_at: None,
            invalidated_at: None,
        };
        (challenge, code)
    }

    /// Neither consumed nor invalidated. Expiry is checked separately so it
    /// can be reported as its own error.
    pub fn is_active(&self) -> bool {
        self.consumed_at.is_none() && self.invalidated_at.is_none()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn matches(&self, code: &str) -> bool {
        constant_time_eq(self.code_hash.as_bytes(), hash_code(self.id, code.trim()).as_bytes())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizationGrant {
    pub id: Uuid,
    pub account_id: Uuid,
    pub challenge_id: Uuid,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consumed_at: Option<DateTime<Utc>>,
}

impl AuthorizationGrant {
    pub fn for_challenge(challenge: &Challenge, now: DateTime<Utc>, ttl: chrono::Duration) -> Self {
        Self {
            id: Uuid::new_v4(),
            account_id: challenge.account_id,
            challenge_id: challenge.id,
            issued_at: now,
            expires_at: now + ttl,
            consumed_at: None,
        }
    }

    /// Unconsumed, unexpired and owned by `account_id`
    pub fn is_usable_by(&self, account_id: Uuid, now: DateTime<Utc>) -> bool {
        self.account_id == account_id && self.consumed_at.is_none() && now < self.expires_at
    }
}

fn generate_code() -> String {
    let n: u32 = rand::thread_rng().gen_range(0..1_000_000);
    format!("{n:0width$}", width = CODE_LENGTH)
}

pub fn hash_code(challenge_id: Uuid, code: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(challenge_id.as_bytes());
    hasher.update(code.as_bytes());
    hex::encode(hasher.finalize())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_issue_hashes_code() {
        let (challenge, code) = Challenge::issue(Uuid::new_v4(), Utc::now(), Duration::minutes(5));

        assert_eq!(code.len(), CODE_LENGTH);
        assert!(code.chars().all(|c| c.is_ascii_digit()));
        assert_ne!(challenge.code_hash, code);
        assert_eq!(challenge.code_hash.len(), 64);
        assert!(challenge.is_active());
        assert!(challenge.matches(&code));
        assert!(!challenge.matches("not-it"));
    }

    #[test]
    fn test_zero_ttl_is_immediately_expired() {
        let now = Utc::now();
        let (challenge, _) = Challenge::issue(Uuid::new_v4(), now, Duration::zero());
        assert!(challenge.is_expired(now));
    }

    #[test]
    fn test_grant_usability() {
        let now = Utc::now();
        let owner = Uuid::new_v4();
        let (challenge, _) = Challenge::issue(owner, now, Duration::minutes(5));
        let mut grant = AuthorizationGrant::for_challenge(&challenge, now, Duration::minutes(5));

        assert!(grant.is_usable_by(owner, now));
        assert!(!grant.is_usable_by(Uuid::new_v4(), now));
        assert!(!grant.is_usable_by(owner, now + Duration::minutes(6)));

        grant.consumed_at = Some(now);
        assert!(!grant.is_usable_by(owner, now));
    }
}
