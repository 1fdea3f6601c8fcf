//! Loan Handler
//!
//! Drives loans through pending → approved → paid (or pending → rejected).
//! Disbursement and collection flip the status in the same atomic unit as
//! the balance change.

use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use uuid::Uuid;

use crate::config::Config;
use crate::domain::{
    category, Caller, DomainError, Loan, LoanStatus, LoanWithBorrower, OperationContext,
    Privileged,
};
use crate::error::AppResult;
use crate::mutator::{loan_transition, AccountMutator, MutationPlan};
use crate::store::LedgerStore;

use super::{parse_amount, LoanApplicationCommand, LoanRepaymentResult};

#[derive(Clone)]
pub struct LoanHandler {
    store: Arc<dyn LedgerStore>,
    mutator: AccountMutator,
    interest_rate: Decimal,
    min_credit_score: i32,
}

impl LoanHandler {
    pub fn new(store: Arc<dyn LedgerStore>, mutator: AccountMutator, config: &Config) -> Self {
        Self {
            store,
            mutator,
            interest_rate: config.loan_interest_rate,
            min_credit_score: config.min_credit_score,
        }
    }

    pub async fn apply(&self, caller: &Caller, command: LoanApplicationCommand) -> AppResult<Loan> {
        let amount = parse_amount(&command.amount)?;
        let loan = Loan::apply(
            caller.account_id,
            amount,
            command.reason.trim().to_string(),
            Utc::now(),
        );
        self.store.insert_loan(&loan).await?;

        tracing::info!(loan_id = %loan.id, account_id = %caller.account_id, amount = %amount, "Loan application received");
        Ok(loan)
    }

    /// The caller's loans, newest first
    pub async fn list_for(&self, caller: &Caller) -> AppResult<Vec<Loan>> {
        Ok(self.store.loans_for(caller.account_id).await?)
    }

    pub async fn list_all(&self, _admin: &Privileged) -> AppResult<Vec<LoanWithBorrower>> {
        Ok(self.store.all_loans().await?)
    }

    /// Approve a pending loan and disburse the principal
    pub async fn approve(
        &self,
        admin: &Privileged,
        loan_id: Uuid,
        context: &OperationContext,
    ) -> AppResult<Loan> {
        let loan = self.load(loan_id).await?;
        loan.ensure_transition(LoanStatus::Approved)?;

        let borrower = self
            .store
            .account(loan.account_id)
            .await?
            .ok_or_else(|| DomainError::AccountNotFound(loan.account_id.to_string()))?;

        if borrower.credit_score < self.min_credit_score {
            return Err(DomainError::CreditScoreTooLow {
                score: borrower.credit_score,
                minimum: self.min_credit_score,
            }
            .into());
        }
        if borrower.balance.value() < Decimal::ZERO {
            return Err(DomainError::NegativeBalance(borrower.balance.value()).into());
        }

        let plan = MutationPlan::builder()
            .credit(
                loan.account_id,
                loan.amount,
                category::LOAN,
                format!("Loan Disbursed (ID: {})", loan.id),
            )
            .transition(loan_transition(&loan, LoanStatus::Approved))
            .build()?;

        self.mutator.apply_atomic(&plan, context).await?;

        tracing::info!(
            loan_id = %loan.id,
            borrower = %loan.account_id,
            approved_by = %admin.account_id(),
            amount = %loan.amount,
            "Loan approved and disbursed"
        );

        self.load(loan_id).await
    }

    /// Collect principal plus interest from an approved loan's borrower
    pub async fn collect(
        &self,
        admin: &Privileged,
        loan_id: Uuid,
        context: &OperationContext,
    ) -> AppResult<LoanRepaymentResult> {
        let loan = self.load(loan_id).await?;
        loan.ensure_transition(LoanStatus::Paid)?;

        let total = loan.repayment_total(self.interest_rate)?;
        let plan = MutationPlan::builder()
            .debit(
                loan.account_id,
                total,
                category::LOAN_REPAYMENT,
                format!(
                    "Loan Repayment (ID: {}) + {}% Interest",
                    loan.id,
                    (self.interest_rate * Decimal::ONE_HUNDRED).normalize()
                ),
            )
            .transition(loan_transition(&loan, LoanStatus::Paid))
            .build()?;

        let applied = self.mutator.apply_atomic(&plan, context).await?;

        tracing::info!(
            loan_id = %loan.id,
            borrower = %loan.account_id,
            collected_by = %admin.account_id(),
            total = %total,
            "Loan collected"
        );

        Ok(LoanRepaymentResult {
            loan: self.load(loan_id).await?,
            total: total.value(),
            balance: applied
                .balance_of(loan.account_id)
                .map(|b| b.value())
                .unwrap_or_default(),
        })
    }

    /// Decline a pending application. No money moves.
    pub async fn reject(&self, admin: &Privileged, loan_id: Uuid) -> AppResult<Loan> {
        let loan = self.load(loan_id).await?;
        loan.ensure_transition(LoanStatus::Rejected)?;

        if !self.store.reject_loan(loan_id, Utc::now()).await? {
            // Moved on between the read and the guarded update
            let current = self.load(loan_id).await?;
            return Err(DomainError::InvalidTransition {
                from: current.status,
                to: LoanStatus::Rejected,
            }
            .into());
        }

        tracing::info!(loan_id = %loan_id, rejected_by = %admin.account_id(), "Loan rejected");
        self.load(loan_id).await
    }

    async fn load(&self, loan_id: Uuid) -> AppResult<Loan> {
        Ok(self
            .store
            .loan(loan_id)
            .await?
            .ok_or(DomainError::LoanNotFound(loan_id))?)
    }
}
