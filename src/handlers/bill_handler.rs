//! Bill Handler
//!
//! Settles payable obligations against the owner's balance.

use std::sync::Arc;
use uuid::Uuid;

use crate::domain::{Bill, Caller, DomainError, OperationContext};
use crate::error::{AppError, AppResult};
use crate::mutator::{AccountMutator, MutationPlan, Transition};
use crate::store::LedgerStore;

use super::{parse_amount, BillPaymentResult, CreateBillCommand};

#[derive(Clone)]
pub struct BillHandler {
    store: Arc<dyn LedgerStore>,
    mutator: AccountMutator,
}

impl BillHandler {
    pub fn new(store: Arc<dyn LedgerStore>, mutator: AccountMutator) -> Self {
        Self { store, mutator }
    }

    /// Pay one of the caller's unpaid bills in full
    pub async fn pay(
        &self,
        caller: &Caller,
        bill_id: Uuid,
        context: &OperationContext,
    ) -> AppResult<BillPaymentResult> {
        // Someone else's bill is indistinguishable from a missing one
        let bill = self
            .store
            .bill(bill_id)
            .await?
            .filter(|b| b.is_owned_by(caller.account_id))
            .ok_or(DomainError::BillNotFound(bill_id))?;

        if bill.is_paid() {
            return Err(DomainError::AlreadyPaid(bill_id).into());
        }

        let plan = MutationPlan::builder()
            .debit(
                caller.account_id,
                bill.amount,
                bill.category.clone(),
                format!("Bill Payment: {}", bill.biller_name),
            )
            .transition(Transition::SettleBill {
                bill_id,
                account_id: caller.account_id,
            })
            .build()?;

        let applied = self.mutator.apply_atomic(&plan, context).await?;

        tracing::info!(
            bill_id = %bill_id,
            account_id = %caller.account_id,
            amount = %bill.amount,
            "Bill paid"
        );

        Ok(BillPaymentResult {
            bill_id,
            amount: bill.amount.value(),
            balance: applied
                .balance_of(caller.account_id)
                .map(|b| b.value())
                .unwrap_or_default(),
        })
    }

    pub async fn create(&self, caller: &Caller, command: CreateBillCommand) -> AppResult<Bill> {
        let biller_name = command.biller_name.trim();
        if biller_name.is_empty() {
            return Err(AppError::InvalidRequest("billerName is required".to_string()));
        }
        let amount = parse_amount(&command.amount)?;

        let bill = Bill::new(
            caller.account_id,
            biller_name.to_string(),
            amount,
            command.due_date,
            command.category,
        );
        self.store.insert_bill(&bill).await?;

        tracing::debug!(bill_id = %bill.id, account_id = %caller.account_id, "Bill created");
        Ok(bill)
    }

    /// The caller's bills, earliest due first
    pub async fn list(&self, caller: &Caller) -> AppResult<Vec<Bill>> {
        Ok(self.store.bills_for(caller.account_id).await?)
    }
}
