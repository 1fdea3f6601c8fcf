//! Command definitions
//!
//! Commands represent intentions to move money or change a record.
//! Amounts travel as strings so they are parsed straight into fixed-point.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{Amount, DomainError, Loan};

/// Parse a caller-supplied amount
pub fn parse_amount(raw: &str) -> Result<Amount, DomainError> {
    Ok(raw.parse::<Amount>()?)
}

// =========================================================================
// Transfers
// =========================================================================

/// Command to move money to another account by account number
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferCommand {
    pub recipient_account: String,
    /// Amount to transfer (as string for precise decimal)
    pub amount: String,
    pub description: Option<String>,
}

impl TransferCommand {
    pub fn new(recipient_account: impl Into<String>, amount: impl Into<String>) -> Self {
        Self {
            recipient_account: recipient_account.into(),
            amount: amount.into(),
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Command to send money abroad. The amount is in the foreign currency.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InternationalTransferCommand {
    pub recipient_account: String,
    pub amount: String,
    pub currency: String,
    pub swift_code: String,
}

impl InternationalTransferCommand {
    pub fn new(
        recipient_account: impl Into<String>,
        amount: impl Into<String>,
        currency: impl Into<String>,
        swift_code: impl Into<String>,
    ) -> Self {
        Self {
            recipient_account: recipient_account.into(),
            amount: amount.into(),
            currency: currency.into(),
            swift_code: swift_code.into(),
        }
    }
}

/// Result of a successful domestic transfer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferResult {
    pub transfer_id: Uuid,
    pub recipient_account: String,
    pub amount: Decimal,
    /// Sender balance after the transfer
    pub balance: Decimal,
}

/// Result of a successful international transfer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InternationalTransferResult {
    pub currency: String,
    pub rate: Decimal,
    /// Domestic amount taken from the sender
    pub debited: Decimal,
    pub balance: Decimal,
}

// =========================================================================
// Bills
// =========================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateBillCommand {
    pub biller_name: String,
    pub amount: String,
    pub due_date: NaiveDate,
    pub category: Option<String>,
}

impl CreateBillCommand {
    pub fn new(biller_name: impl Into<String>, amount: impl Into<String>, due_date: NaiveDate) -> Self {
        Self {
            biller_name: biller_name.into(),
            amount: amount.into(),
            due_date,
            category: None,
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillPaymentResult {
    pub bill_id: Uuid,
    pub amount: Decimal,
    pub balance: Decimal,
}

// =========================================================================
// Loans
// =========================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoanApplicationCommand {
    pub amount: String,
    pub reason: String,
}

impl LoanApplicationCommand {
    pub fn new(amount: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            amount: amount.into(),
            reason: reason.into(),
        }
    }
}

/// Outcome of collecting an approved loan
#[derive(Debug, Clone, Serialize)]
pub struct LoanRepaymentResult {
    pub loan: Loan,
    /// Principal plus interest
    pub total: Decimal,
    pub balance: Decimal,
}
