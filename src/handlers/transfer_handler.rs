//! Transfer Handler
//!
//! Domestic transfers between ledger accounts and single-leg transfers to
//! an external foreign-currency destination. Both require a step-up grant.

use std::sync::Arc;
use uuid::Uuid;

use crate::authorization::StepUpGate;
use crate::domain::{category, Account, Caller, DomainError, OperationContext};
use crate::error::{AppError, AppResult};
use crate::mutator::{AccountMutator, MutationPlan};
use crate::rates::ExchangeRateSource;
use crate::store::LedgerStore;

use super::{
    parse_amount, InternationalTransferCommand, InternationalTransferResult, TransferCommand,
    TransferResult,
};

// =========================================================================
// TransferHandler
// =========================================================================

#[derive(Clone)]
pub struct TransferHandler {
    store: Arc<dyn LedgerStore>,
    mutator: AccountMutator,
    gate: StepUpGate,
    rates: Arc<dyn ExchangeRateSource>,
}

impl TransferHandler {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        mutator: AccountMutator,
        gate: StepUpGate,
        rates: Arc<dyn ExchangeRateSource>,
    ) -> Self {
        Self {
            store,
            mutator,
            gate,
            rates,
        }
    }

    /// Move money from the caller to another ledger account
    pub async fn transfer_domestic(
        &self,
        caller: &Caller,
        grant_id: Option<Uuid>,
        command: TransferCommand,
        context: &OperationContext,
    ) -> AppResult<TransferResult> {
        let amount = parse_amount(&command.amount)?;
        let grant = self.gate.resolve_grant(caller, grant_id).await?;

        let number = command.recipient_account.trim();
        let recipient = self
            .store
            .account_by_number(number)
            .await?
            .ok_or_else(|| DomainError::AccountNotFound(number.to_string()))?;

        if recipient.id == caller.account_id {
            return Err(DomainError::SelfTransferNotAllowed.into());
        }

        let sender = self
            .store
            .account(caller.account_id)
            .await?
            .ok_or_else(|| DomainError::AccountNotFound(caller.account_id.to_string()))?;

        let transfer_id = Uuid::new_v4();
        let description = command.description.as_deref().map(str::trim).filter(|d| !d.is_empty());

        let plan = MutationPlan::builder()
            .debit(
                sender.id,
                amount,
                category::TRANSFER,
                transfer_memo("Transfer to", &recipient, description),
            )
            .credit(
                recipient.id,
                amount,
                category::TRANSFER,
                transfer_memo("Transfer from", &sender, description),
            )
            .consume_grant(grant.id, caller.account_id)
            .correlated(transfer_id)
            .build()?;

        let applied = self.mutator.apply_atomic(&plan, context).await?;

        tracing::info!(
            transfer_id = %transfer_id,
            from = %sender.id,
            to = %recipient.id,
            amount = %amount,
            "Transfer completed"
        );

        Ok(TransferResult {
            transfer_id,
            recipient_account: recipient.account_number,
            amount: amount.value(),
            balance: applied
                .balance_of(sender.id)
                .map(|b| b.value())
                .unwrap_or_default(),
        })
    }

    /// Debit the caller by the domestic equivalent of a foreign amount
    pub async fn transfer_international(
        &self,
        caller: &Caller,
        grant_id: Option<Uuid>,
        command: InternationalTransferCommand,
        context: &OperationContext,
    ) -> AppResult<InternationalTransferResult> {
        let amount = parse_amount(&command.amount)?;
        let grant = self.gate.resolve_grant(caller, grant_id).await?;

        let recipient = command.recipient_account.trim();
        if recipient.is_empty() {
            return Err(AppError::InvalidRequest("recipientAccount is required".to_string()));
        }
        validate_swift_code(&command.swift_code)?;

        let currency = command.currency.trim().to_ascii_uppercase();
        let rate = self.rates.rate(&currency).await?;
        let debited = amount.scaled_by(rate).map_err(DomainError::from)?;

        let plan = MutationPlan::builder()
            .debit(
                caller.account_id,
                debited,
                category::INTERNATIONAL,
                format!("Intl Transfer to {} ({})", recipient, currency),
            )
            .consume_grant(grant.id, caller.account_id)
            .build()?;

        let applied = self.mutator.apply_atomic(&plan, context).await?;

        tracing::info!(
            account_id = %caller.account_id,
            currency = %currency,
            rate = %rate,
            debited = %debited,
            "International transfer completed"
        );

        Ok(InternationalTransferResult {
            currency,
            rate,
            debited: debited.value(),
            balance: applied
                .balance_of(caller.account_id)
                .map(|b| b.value())
                .unwrap_or_default(),
        })
    }
}

fn transfer_memo(prefix: &str, counterparty: &Account, description: Option<&str>) -> String {
    let memo = format!(
        "{} {} ({})",
        prefix, counterparty.holder_name, counterparty.account_number
    );
    match description {
        Some(d) => format!("{}: {}", memo, d),
        None => memo,
    }
}

/// SWIFT/BIC: 8 or 11 ASCII alphanumerics
fn validate_swift_code(code: &str) -> AppResult<()> {
    let code = code.trim();
    let well_formed =
        matches!(code.len(), 8 | 11) && code.chars().all(|c| c.is_ascii_alphanumeric());
    if well_formed {
        Ok(())
    } else {
        Err(AppError::InvalidRequest(format!("Invalid SWIFT code: {}", code)))
    }
}
