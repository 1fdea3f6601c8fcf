//! Bills
//!
//! Scheduled payables owned by an account. A paid bill is immutable.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::ledger::category;
use super::Amount;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillStatus {
    Unpaid,
    Paid,
}

impl BillStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillStatus::Unpaid => "unpaid",
            BillStatus::Paid => "paid",
        }
    }
}

impl fmt::Display for BillStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BillStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unpaid" => Ok(BillStatus::Unpaid),
            "paid" => Ok(BillStatus::Paid),
            other => Err(format!("unknown bill status: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bill {
    pub id: Uuid,
    pub account_id: Uuid,
    pub biller_name: String,
    pub amount: Amount,
    pub due_date: NaiveDate,
    pub status: BillStatus,
    pub category: String,
    pub paid_at: Option<DateTime<Utc>>,
}

impl Bill {
    pub fn new(
        account_id: Uuid,
        biller_name: String,
        amount: Amount,
        due_date: NaiveDate,
        category: Option<String>,
    ) -> Self {
        let category = category
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| category::UTILITIES.to_string());

        Self {
            id: Uuid::new_v4(),
            account_id,
            biller_name,
            amount,
            due_date,
            status: BillStatus::Unpaid,
            category,
            paid_at: None,
        }
    }

    pub fn is_paid(&self) -> bool {
        self.status == BillStatus::Paid
    }

    pub fn is_owned_by(&self, account_id: Uuid) -> bool {
        self.account_id == account_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_new_bill_defaults_to_utilities() {
        let bill = Bill::new(
            Uuid::new_v4(),
            "City Power".to_string(),
            Amount::new(dec!(100)).unwrap(),
            NaiveDate::from_ymd_opt(2026, 11, 1).unwrap(),
            Some("  ".to_string()),
        );

        assert_eq!(bill.category, "Utilities");
        assert_eq!(bill.status, BillStatus::Unpaid);
        assert!(!bill.is_paid());
    }

    #[test]
    fn test_bill_ownership() {
        let owner = Uuid::new_v4();
        let bill = Bill::new(
            owner,
            "Telco".to_string(),
            Amount::new(dec!(45.99)).unwrap(),
            NaiveDate::from_ymd_opt(2026, 11, 15).unwrap(),
            Some("Phone".to_string()),
        );

        assert!(bill.is_owned_by(owner));
        assert!(!bill.is_owned_by(Uuid::new_v4()));
        assert_eq!(bill.category, "Phone");
    }
}
