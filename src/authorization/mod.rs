//! Step-Up Authorization Gate
//!
//! Issues one-time challenges and exchanges a correct code for a single-use
//! grant. The grant is consumed by the protected operation inside its own
//! atomic unit, so a failed operation leaves the grant usable.

mod delivery;

use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

use crate::config::Config;
use crate::domain::{AuthorizationGrant, Caller, Challenge, DomainError};
use crate::error::{AppError, AppResult};
use crate::store::LedgerStore;

pub use delivery::{ChallengeDelivery, DeliveryError, LogDelivery};

/// Acknowledgment of an issued challenge
#[derive(Debug, Clone)]
pub struct IssuedChallenge {
    pub challenge_id: Uuid,
    pub expires_at: DateTime<Utc>,
    /// Present only when development code exposure is enabled
    pub code: Option<String>,
}

#[derive(Clone)]
pub struct StepUpGate {
    store: Arc<dyn LedgerStore>,
    delivery: Arc<dyn ChallengeDelivery>,
    otp_ttl: chrono::Duration,
    grant_ttl: chrono::Duration,
    max_attempts: i32,
    expose_code: bool,
}

impl StepUpGate {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        delivery: Arc<dyn ChallengeDelivery>,
        config: &Config,
    ) -> Self {
        Self {
            store,
            delivery,
            otp_ttl: config.otp_ttl(),
            grant_ttl: config.grant_ttl(),
            max_attempts: config.otp_max_attempts,
            expose_code: config.otp_expose_code,
        }
    }

    /// Issue a fresh challenge, invalidating any prior one for the account
    pub async fn issue_challenge(&self, caller: &Caller) -> AppResult<IssuedChallenge> {
        let (challenge, code) = Challenge::issue(caller.account_id, Utc::now(), self.otp_ttl);
        self.store.replace_challenge(&challenge).await?;

        self.delivery
            .deliver(caller.account_id, challenge.id, &code, challenge.expires_at)
            .await
            .map_err(|e| AppError::Unavailable(e.to_string()))?;

        Ok(IssuedChallenge {
            challenge_id: challenge.id,
            expires_at: challenge.expires_at,
            code: self.expose_code.then_some(code),
        })
    }

    /// Check a code against the account's active challenge and mint a grant
    pub async fn verify(&self, caller: &Caller, code: &str) -> AppResult<AuthorizationGrant> {
        let challenge = self
            .store
            .active_challenge(caller.account_id)
            .await?
            .ok_or(DomainError::ChallengeNotFound)?;

        let now = Utc::now();
        if challenge.is_expired(now) {
            return Err(DomainError::ChallengeExpired.into());
        }

        if !challenge.matches(code) {
            let attempts = self
                .store
                .record_failed_attempt(challenge.id, self.max_attempts, now)
                .await?;
            tracing::warn!(
                account_id = %caller.account_id,
                attempts,
                max_attempts = self.max_attempts,
                "Step-up code mismatch"
            );
            return Err(DomainError::ChallengeMismatch.into());
        }

        let grant = AuthorizationGrant::for_challenge(&challenge, now, self.grant_ttl);
        if !self.store.redeem_challenge(challenge.id, &grant).await? {
            // A concurrent verify or reissue got there first
            return Err(DomainError::ChallengeNotFound.into());
        }

        tracing::info!(account_id = %caller.account_id, grant_id = %grant.id, "Step-up grant issued");
        Ok(grant)
    }

    /// Find a usable grant: the named one, or the caller's newest live grant
    pub async fn resolve_grant(
        &self,
        caller: &Caller,
        grant_id: Option<Uuid>,
    ) -> AppResult<AuthorizationGrant> {
        let now = Utc::now();
        let grant = match grant_id {
            Some(id) => self
                .store
                .grant(id)
                .await?
                .filter(|g| g.is_usable_by(caller.account_id, now)),
            None => self.store.latest_grant(caller.account_id, now).await?,
        };
        grant.ok_or_else(|| DomainError::AuthorizationRequired.into())
    }
}
