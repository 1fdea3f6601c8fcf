//! Account Mutator
//!
//! The single path through which balances change. Validates a plan, hands it
//! to the store as one atomic unit and translates store outcomes into
//! domain errors. Serialization conflicts are retried with backoff.

mod plan;

use std::sync::Arc;
use std::time::Duration;

use crate::domain::{DomainError, Loan, LoanStatus, OperationContext};
use crate::store::{AppliedPlan, LedgerStore, StoreError};

pub use plan::{Leg, MutationPlan, PlanBuilder, PlanError, Transition};

const MAX_ATTEMPTS: u32 = 3;

/// Why a mutation failed
#[derive(Debug, thiserror::Error)]
pub enum MutationError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("Invalid mutation plan: {0}")]
    Plan(#[from] PlanError),

    /// Conflicts persisted past the retry budget, or the store faulted
    #[error("Ledger unavailable: {0}")]
    Unavailable(StoreError),
}

#[derive(Clone)]
pub struct AccountMutator {
    store: Arc<dyn LedgerStore>,
}

impl AccountMutator {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    /// Apply a plan atomically, retrying transient conflicts
    pub async fn apply_atomic(
        &self,
        plan: &MutationPlan,
        context: &OperationContext,
    ) -> Result<AppliedPlan, MutationError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.store.apply_plan(plan).await {
                Ok(applied) => {
                    tracing::debug!(
                        correlation_id = ?context.correlation_id,
                        client_ip = ?context.client_ip,
                        legs = plan.legs().len(),
                        transitions = plan.transitions().len(),
                        "Mutation committed"
                    );
                    return Ok(applied);
                }
                Err(e) if e.is_retryable() && attempt < MAX_ATTEMPTS => {
                    let delay = Duration::from_millis(50 * attempt as u64);
                    tracing::warn!(
                        "Serialization conflict, retrying (attempt {}/{})",
                        attempt,
                        MAX_ATTEMPTS
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(map_store_error(e)),
            }
        }
    }
}

fn map_store_error(err: StoreError) -> MutationError {
    match err {
        StoreError::InsufficientFunds {
            account_id,
            required,
            available,
        } => DomainError::insufficient_funds(account_id, required, available).into(),
        StoreError::AccountNotFound(id) => DomainError::AccountNotFound(id.to_string()).into(),
        StoreError::BalanceOverflow(_) => {
            DomainError::InvalidAmount("resulting balance exceeds the maximum".to_string()).into()
        }
        StoreError::GuardRejected(transition) => match transition {
            Transition::SettleBill { bill_id, .. } => DomainError::AlreadyPaid(bill_id).into(),
            Transition::AdvanceLoan { from, to, .. } => {
                DomainError::InvalidTransition { from, to }.into()
            }
            Transition::ConsumeGrant { .. } => DomainError::AuthorizationRequired.into(),
        },
        other => {
            tracing::error!(error = %other, "Mutation aborted by store fault");
            MutationError::Unavailable(other)
        }
    }
}

/// Plan for a loan state change that moves money
pub(crate) fn loan_transition(loan: &Loan, to: LoanStatus) -> Transition {
    Transition::AdvanceLoan {
        loan_id: loan.id,
        account_id: loan.account_id,
        from: loan.status,
        to,
    }
}
