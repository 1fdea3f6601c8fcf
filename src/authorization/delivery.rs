//! Challenge delivery
//!
//! Hands a freshly issued code to whatever channel reaches the account
//! holder. Delivery transport (SMS, email) lives outside the ledger.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
#[error("Challenge delivery failed: {0}")]
pub struct DeliveryError(pub String);

#[async_trait]
pub trait ChallengeDelivery: Send + Sync {
    async fn deliver(
        &self,
        account_id: Uuid,
        challenge_id: Uuid,
        code: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), DeliveryError>;
}

/// Records that a code was dispatched. The code itself is never logged.
#[derive(Debug, Clone, Default)]
pub struct LogDelivery;

#[async_trait]
impl ChallengeDelivery for LogDelivery {
    async fn deliver(
        &self,
        account_id: Uuid,
        challenge_id: Uuid,
        _code: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), DeliveryError> {
        tracing::info!(
            %account_id,
            %challenge_id,
            %expires_at,
            "Step-up challenge dispatched"
        );
        Ok(())
    }
}
