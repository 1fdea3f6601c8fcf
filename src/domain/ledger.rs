//! Ledger entries
//!
//! Immutable facts recording one directional money movement against one
//! account. Entries are appended by the account mutator and never changed.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::Amount;

pub mod category {
    pub const TRANSFER: &str = "Transfer";
    pub const INTERNATIONAL: &str = "International";
    pub const LOAN: &str = "Loan";
    pub const LOAN_REPAYMENT: &str = "Loan Repayment";
    pub const UTILITIES: &str = "Utilities";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Credit,
    Debit,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Credit => "credit",
            Direction::Debit => "debit",
        }
    }

    /// Signed balance effect of moving `amount` in this direction
    pub fn signed(&self, amount: &Amount) -> Decimal {
        match self {
            Direction::Credit => amount.value(),
            Direction::Debit => -amount.value(),
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "credit" => Ok(Direction::Credit),
            "debit" => Ok(Direction::Debit),
            other => Err(format!("unknown direction: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntry {
    pub id: Uuid,
    /// Store-wide append order, breaks timestamp ties
    pub sequence: i64,
    pub account_id: Uuid,
    pub direction: Direction,
    pub amount: Amount,
    pub category: String,
    pub memo: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    pub fn signed_amount(&self) -> Decimal {
        self.direction.signed(&self.amount)
    }
}

/// Entry in the global admin feed, joined with the account holder
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedEntry {
    #[serde(flatten)]
    pub entry: LedgerEntry,
    pub holder_name: String,
}

/// Aggregate counters for the admin dashboard
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerStats {
    pub total_users: i64,
    pub total_deposits: Decimal,
    pub total_transactions: i64,
    pub active_loans: i64,
}

/// Debit total for one spending category
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryTotal {
    pub category: String,
    pub total: Decimal,
}

/// Newest first, ties broken by append order
pub fn sort_newest_first(entries: &mut [LedgerEntry]) {
    entries.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| b.sequence.cmp(&a.sequence))
    });
}
