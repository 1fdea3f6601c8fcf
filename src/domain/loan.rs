//! Loan lifecycle
//!
//! `pending -> approved -> paid`, or `pending -> rejected`. Paid and
//! rejected are terminal. The principal is fixed at application time.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::{Amount, DomainError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoanStatus {
    Pending,
    Approved,
    Paid,
    Rejected,
}

impl LoanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoanStatus::Pending => "pending",
            LoanStatus::Approved => "approved",
            LoanStatus::Paid => "paid",
            LoanStatus::Rejected => "rejected",
        }
    }

    pub fn can_transition_to(&self, next: LoanStatus) -> bool {
        matches!(
            (self, next),
            (LoanStatus::Pending, LoanStatus::Approved)
                | (LoanStatus::Pending, LoanStatus::Rejected)
                | (LoanStatus::Approved, LoanStatus::Paid)
        )
    }

    /// Counted as outstanding on the admin dashboard
    pub fn is_active(&self) -> bool {
        matches!(self, LoanStatus::Pending | LoanStatus::Approved)
    }
}

impl fmt::Display for LoanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LoanStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(LoanStatus::Pending),
            "approved" => Ok(LoanStatus::Approved),
            "paid" => Ok(LoanStatus::Paid),
            "rejected" => Ok(LoanStatus::Rejected),
            other => Err(format!("unknown loan status: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Loan {
    pub id: Uuid,
    pub account_id: Uuid,
    pub amount: Amount,
    pub reason: String,
    pub status: LoanStatus,
    pub created_at: DateTime<Utc>,
    pub approved_at: Option<DateTime<Utc>>,
    pub collected_at: Option<DateTime<Utc>>,
    pub rejected_at: Option<DateTime<Utc>>,
}

impl Loan {
    /// A fresh application in `pending`
    pub fn apply(account_id: Uuid, amount: Amount, reason: String, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            account_id,
            amount,
            reason,
            status: LoanStatus::Pending,
            created_at: now,
            approved_at: None,
            collected_at: None,
            rejected_at: None,
        }
    }

    /// Check that `next` is reachable from the current status
    pub fn ensure_transition(&self, next: LoanStatus) -> Result<(), DomainError> {
        if self.status.can_transition_to(next) {
            Ok(())
        } else {
            Err(DomainError::InvalidTransition {
                from: self.status,
                to: next,
            })
        }
    }

    /// Move to `next`, stamping the matching timestamp
    pub fn transition(mut self, next: LoanStatus, at: DateTime<Utc>) -> Result<Self, DomainError> {
        self.ensure_transition(next)?;
        match next {
            LoanStatus::Approved => self.approved_at = Some(at),
            LoanStatus::Paid => self.collected_at = Some(at),
            LoanStatus::Rejected => self.rejected_at = Some(at),
            LoanStatus::Pending => {}
        }
        self.status = next;
        Ok(self)
    }

    /// Principal plus interest, rounded to the currency scale
    pub fn repayment_total(&self, interest_rate: Decimal) -> Result<Amount, DomainError> {
        Ok(self.amount.scaled_by(Decimal::ONE + interest_rate)?)
    }
}

/// Loan joined with borrower details for the admin view
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoanWithBorrower {
    #[serde(flatten)]
    pub loan: Loan,
    pub holder_name: String,
    pub credit_score: i32,
    pub borrower_balance: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn pending_loan() -> Loan {
        Loan::apply(
            Uuid::new_v4(),
            Amount::new(dec!(1000)).unwrap(),
            "Car repair".to_string(),
            Utc::now(),
        )
    }

    #[test]
    fn test_happy_path_is_monotonic() {
        let now = Utc::now();
        let loan = pending_loan();
        assert_eq!(loan.status, LoanStatus::Pending);

        let loan = loan.transition(LoanStatus::Approved, now).unwrap();
        assert_eq!(loan.approved_at, Some(now));

        let loan = loan.transition(LoanStatus::Paid, now).unwrap();
        assert_eq!(loan.status, LoanStatus::Paid);
        assert_eq!(loan.collected_at, Some(now));
        assert!(!loan.status.can_transition_to(LoanStatus::Rejected));
    }

    #[test]
    fn test_collect_on_pending_is_invalid() {
        let result = pending_loan().transition(LoanStatus::Paid, Utc::now());
        assert!(matches!(
            result,
            Err(DomainError::InvalidTransition {
                from: LoanStatus::Pending,
                to: LoanStatus::Paid
            })
        ));
    }

    #[test]
    fn test_terminal_states_do_not_move() {
        let rejected = pending_loan().transition(LoanStatus::Rejected, Utc::now()).unwrap();
        assert!(rejected.ensure_transition(LoanStatus::Approved).is_err());
        assert!(rejected.ensure_transition(LoanStatus::Pending).is_err());
        assert!(!LoanStatus::Paid.can_transition_to(LoanStatus::Approved));
    }

    #[test]
    fn test_repayment_total_with_interest() {
        let total = pending_loan().repayment_total(dec!(0.05)).unwrap();
        assert_eq!(total.value(), dec!(1050));
    }

    #[test]
    fn test_active_statuses() {
        assert!(LoanStatus::Pending.is_active());
        assert!(LoanStatus::Approved.is_active());
        assert!(!LoanStatus::Paid.is_active());
        assert!(!LoanStatus::Rejected.is_active());
    }
}
