//! Domain Error Types
//!
//! Business-rule outcomes of ledger operations. These are expected results
//! returned to the caller, never process-fatal faults.

use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

use super::loan::LoanStatus;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum DomainError {
    /// Amount is zero, negative, malformed or out of range
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// A debit would drive the balance below zero
    #[error("Insufficient funds: required {required}, available {available}")]
    InsufficientFunds {
        account_id: Uuid,
        required: Decimal,
        available: Decimal,
    },

    #[error("Account not found: {0}")]
    AccountNotFound(String),

    #[error("Cannot transfer to the same account")]
    SelfTransferNotAllowed,

    #[error("Bill not found: {0}")]
    BillNotFound(Uuid),

    #[error("Bill {0} is already paid")]
    AlreadyPaid(Uuid),

    #[error("Loan not found: {0}")]
    LoanNotFound(Uuid),

    #[error("Invalid loan transition from {from} to {to}")]
    InvalidTransition { from: LoanStatus, to: LoanStatus },

    #[error("Credit score too low ({score}). Minimum {minimum} required")]
    CreditScoreTooLow { score: i32, minimum: i32 },

    #[error("Borrower has a negative balance ({0})")]
    NegativeBalance(Decimal),

    /// No valid step-up grant accompanies a protected operation
    #[error("Step-up authorization required")]
    AuthorizationRequired,

    #[error("No pending challenge")]
    ChallengeNotFound,

    #[error("Challenge has expired")]
    ChallengeExpired,

    #[error("Challenge code does not match")]
    ChallengeMismatch,

    #[error("Unsupported currency: {0}")]
    UnsupportedCurrency(String),
}

impl DomainError {
    /// Create an insufficient funds error
    pub fn insufficient_funds(account_id: Uuid, required: Decimal, available: Decimal) -> Self {
        Self::InsufficientFunds {
            account_id,
            required,
            available,
        }
    }

    /// Stable machine-readable code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidAmount(_) => "invalid_amount",
            Self::InsufficientFunds { .. } => "insufficient_funds",
            Self::AccountNotFound(_) => "account_not_found",
            Self::SelfTransferNotAllowed => "self_transfer_not_allowed",
            Self::BillNotFound(_) => "bill_not_found",
            Self::AlreadyPaid(_) => "already_paid",
            Self::LoanNotFound(_) => "loan_not_found",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::CreditScoreTooLow { .. } => "credit_score_too_low",
            Self::NegativeBalance(_) => "negative_balance",
            Self::AuthorizationRequired => "authorization_required",
            Self::ChallengeNotFound => "challenge_not_found",
            Self::ChallengeExpired => "challenge_expired",
            Self::ChallengeMismatch => "challenge_mismatch",
            Self::UnsupportedCurrency(_) => "unsupported_currency",
        }
    }

    /// Check if this is a state conflict (the target record moved on)
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::AlreadyPaid(_) | Self::InvalidTransition { .. })
    }
}

impl From<super::AmountError> for DomainError {
    fn from(err: super::AmountError) -> Self {
        DomainError::InvalidAmount(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_insufficient_funds_error() {
        let err = DomainError::insufficient_funds(Uuid::nil(), dec!(100), dec!(50));

        assert_eq!(err.code(), "insufficient_funds");
        assert!(err.to_string().contains("100"));
        assert!(err.to_string().contains("50"));
        assert!(!err.is_conflict());
    }

    #[test]
    fn test_invalid_transition_is_conflict() {
        let err = DomainError::InvalidTransition {
            from: LoanStatus::Pending,
            to: LoanStatus::Paid,
        };

        assert!(err.is_conflict());
        assert_eq!(err.to_string(), "Invalid loan transition from pending to paid");
    }

    #[test]
    fn test_amount_error_maps_to_invalid_amount() {
        let err: DomainError = crate::domain::AmountError::NotPositive(dec!(0)).into();
        assert_eq!(err.code(), "invalid_amount");
    }
}
