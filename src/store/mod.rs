//! Ledger Store
//!
//! Port for durable ledger state: balances, the append-only entry log, loans,
//! bills and step-up authorization records. Two adapters ship with the crate:
//! [`PgLedgerStore`] for PostgreSQL and [`InMemoryLedgerStore`] for tests and
//! local runs.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::domain::{
    Account, AuthorizationGrant, Balance, Bill, CategoryTotal, Challenge, FeedEntry, LedgerEntry,
    LedgerStats, Loan, LoanWithBorrower, NewAccount,
};
use crate::mutator::{MutationPlan, Transition};

pub use memory::InMemoryLedgerStore;
pub use postgres::PgLedgerStore;

/// Errors raised by a store adapter
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Lost a serialization race or deadlock; the unit was rolled back
    #[error("Serialization conflict, retry the operation")]
    Conflict,

    /// A leg would leave the account below zero
    #[error("Insufficient funds on {account_id}: required {required}, available {available}")]
    InsufficientFunds {
        account_id: Uuid,
        required: Decimal,
        available: Decimal,
    },

    #[error("Account not found: {0}")]
    AccountNotFound(Uuid),

    /// A guarded transition found the record in an unexpected state
    #[error("Guard rejected: {0:?}")]
    GuardRejected(Transition),

    /// Resulting balance exceeds the representable maximum
    #[error("Balance overflow on {0}")]
    BalanceOverflow(Uuid),

    #[error("Account number already in use: {0}")]
    DuplicateAccountNumber(String),

    #[error("Corrupt record: {0}")]
    Corrupt(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Database error: {0}")]
    Database(sqlx::Error),
}

impl StoreError {
    /// Check if the operation may succeed when retried
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Conflict)
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db) = &err {
            match db.code().as_deref() {
                // serialization_failure, deadlock_detected
                Some("40001") | Some("40P01") => return StoreError::Conflict,
                _ => {}
            }
        }
        StoreError::Database(err)
    }
}

/// Result of a committed plan
#[derive(Debug, Clone)]
pub struct AppliedPlan {
    pub entries: Vec<LedgerEntry>,
    /// Post-commit balance of every account in the lock set
    pub balances: Vec<(Uuid, Balance)>,
}

impl AppliedPlan {
    pub fn balance_of(&self, account_id: Uuid) -> Option<Balance> {
        self.balances
            .iter()
            .find(|(id, _)| *id == account_id)
            .map(|(_, balance)| *balance)
    }
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    // ---- accounts ----

    /// Provisioning hook for the registration collaborator and seeding
    async fn open_account(&self, new: NewAccount) -> Result<Account, StoreError>;

    async fn account(&self, id: Uuid) -> Result<Option<Account>, StoreError>;

    async fn account_by_number(&self, number: &str) -> Result<Option<Account>, StoreError>;

    // ---- ledger ----

    /// Apply a validated plan as one atomic unit.
    ///
    /// Locks the plan's accounts in ascending id order, applies every
    /// transition guard, checks the resulting balances and appends the
    /// entries. Any failure leaves no trace.
    async fn apply_plan(&self, plan: &MutationPlan) -> Result<AppliedPlan, StoreError>;

    /// Entries for one account, newest first
    async fn history(&self, account_id: Uuid) -> Result<Vec<LedgerEntry>, StoreError>;

    /// Global entry feed, newest first
    async fn feed(&self, limit: i64, offset: i64) -> Result<Vec<FeedEntry>, StoreError>;

    async fn stats(&self) -> Result<LedgerStats, StoreError>;

    /// Debit totals grouped by category, largest first
    async fn spending_by_category(&self, account_id: Uuid)
        -> Result<Vec<CategoryTotal>, StoreError>;

    // ---- loans ----

    async fn insert_loan(&self, loan: &Loan) -> Result<(), StoreError>;

    async fn loan(&self, id: Uuid) -> Result<Option<Loan>, StoreError>;

    /// Loans of one borrower, newest first
    async fn loans_for(&self, account_id: Uuid) -> Result<Vec<Loan>, StoreError>;

    async fn all_loans(&self) -> Result<Vec<LoanWithBorrower>, StoreError>;

    /// `pending -> rejected` with no balance effect. Returns false when the
    /// loan was no longer pending.
    async fn reject_loan(&self, loan_id: Uuid, at: DateTime<Utc>) -> Result<bool, StoreError>;

    // ---- bills ----

    async fn insert_bill(&self, bill: &Bill) -> Result<(), StoreError>;

    async fn bill(&self, id: Uuid) -> Result<Option<Bill>, StoreError>;

    /// Bills of one account, due date ascending
    async fn bills_for(&self, account_id: Uuid) -> Result<Vec<Bill>, StoreError>;

    // ---- step-up authorization ----

    /// Store a new challenge, invalidating any active one for the account
    async fn replace_challenge(&self, challenge: &Challenge) -> Result<(), StoreError>;

    /// The account's single active challenge, expired or not
    async fn active_challenge(&self, account_id: Uuid) -> Result<Option<Challenge>, StoreError>;

    /// Count a mismatch; invalidates the challenge once `max_attempts` is
    /// reached. Returns the new attempt count.
    async fn record_failed_attempt(
        &self,
        challenge_id: Uuid,
        max_attempts: i32,
        at: DateTime<Utc>,
    ) -> Result<i32, StoreError>;

    /// Consume the challenge if still active and store the grant, atomically.
    /// Returns false when another verification got there first.
    async fn redeem_challenge(
        &self,
        challenge_id: Uuid,
        grant: &AuthorizationGrant,
    ) -> Result<bool, StoreError>;

    async fn grant(&self, id: Uuid) -> Result<Option<AuthorizationGrant>, StoreError>;

    /// Newest unconsumed, unexpired grant of the account
    async fn latest_grant(
        &self,
        account_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<AuthorizationGrant>, StoreError>;

    /// Delete spent or expired challenges and grants issued before `before`
    async fn purge_authorizations(&self, before: DateTime<Utc>) -> Result<u64, StoreError>;
}

/// Resolve each account's next balance, failing on the first violation.
/// Shared by both adapters so the rule is identical.
pub(crate) fn next_balances(
    plan: &MutationPlan,
    current: &[(Uuid, Balance)],
) -> Result<Vec<(Uuid, Balance)>, StoreError> {
    plan.net_deltas()
        .into_iter()
        .map(|(account_id, delta)| {
            let balance = current
                .iter()
                .find(|(id, _)| *id == account_id)
                .map(|(_, balance)| *balance)
                .ok_or(StoreError::AccountNotFound(account_id))?;

            let next = balance.value() + delta;
            if next < Decimal::ZERO {
                return Err(StoreError::InsufficientFunds {
                    account_id,
                    required: -delta,
                    available: balance.value(),
                });
            }

            balance
                .apply_delta(delta)
                .map(|next| (account_id, next))
                .map_err(|_| StoreError::BalanceOverflow(account_id))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Amount;
    use rust_decimal_macros::dec;

    #[test]
    fn test_next_balances_rejects_negative() {
        let sender = Uuid::from_u128(1);
        let recipient = Uuid::from_u128(2);
        let plan = MutationPlan::builder()
            .debit(sender, Amount::new(dec!(600)).unwrap(), "Transfer", "out")
            .credit(recipient, Amount::new(dec!(600)).unwrap(), "Transfer", "in")
            .build()
            .unwrap();

        let current = vec![
            (sender, Balance::new(dec!(500)).unwrap()),
            (recipient, Balance::zero()),
        ];

        match next_balances(&plan, &current) {
            Err(StoreError::InsufficientFunds {
                account_id,
                required,
                available,
            }) => {
                assert_eq!(account_id, sender);
                assert_eq!(required, dec!(600));
                assert_eq!(available, dec!(500));
            }
            other => panic!("expected insufficient funds, got {other:?}"),
        }
    }

    #[test]
    fn test_next_balances_allows_exact_drain() {
        let account = Uuid::new_v4();
        let plan = MutationPlan::builder()
            .debit(account, Amount::new(dec!(100)).unwrap(), "Utilities", "Bill Payment: Water")
            .build()
            .unwrap();

        let next = next_balances(&plan, &[(account, Balance::new(dec!(100)).unwrap())]).unwrap();
        assert_eq!(next, vec![(account, Balance::zero())]);
    }
}
