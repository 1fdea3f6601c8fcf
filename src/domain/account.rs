//! Account record
//!
//! Identity-bound holder of a balance. Balances change only through the
//! account mutator; everything else about an account is read-only here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::Balance;

/// Default credit score for newly opened accounts
pub const DEFAULT_CREDIT_SCORE: i32 = 700;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    #[default]
    Customer,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Customer => "customer",
            Role::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "customer" => Ok(Role::Customer),
            "admin" => Ok(Role::Admin),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub id: Uuid,
    pub account_number: String,
    pub holder_name: String,
    pub balance: Balance,
    pub credit_score: i32,
    pub kyc_verified: bool,
    pub role: Role,
    /// Incremented on every balance mutation
    pub version: i64,
    pub created_at: DateTime<Utc>,
}

/// Provisioning request from the registration collaborator
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub account_number: String,
    pub holder_name: String,
    pub opening_balance: Balance,
    pub credit_score: i32,
    pub kyc_verified: bool,
    pub role: Role,
}

impl NewAccount {
    pub fn new(account_number: impl Into<String>, holder_name: impl Into<String>) -> Self {
        Self {
            account_number: account_number.into(),
            holder_name: holder_name.into(),
            opening_balance: Balance::zero(),
            credit_score: DEFAULT_CREDIT_SCORE,
            kyc_verified: false,
            role: Role::Customer,
        }
    }

    pub fn with_balance(mut self, balance: Balance) -> Self {
        self.opening_balance = balance;
        self
    }

    pub fn with_credit_score(mut self, credit_score: i32) -> Self {
        self.credit_score = credit_score;
        self
    }

    pub fn with_role(mut self, role: Role) -> Self {
        self.role = role;
        self
    }

    pub fn verified(mut self) -> Self {
        self.kyc_verified = true;
        self
    }

    /// Materialize the record with a fresh id
    pub fn into_account(self, created_at: DateTime<Utc>) -> Account {
        Account {
            id: Uuid::new_v4(),
            account_number: self.account_number,
            holder_name: self.holder_name,
            balance: self.opening_balance,
            credit_score: self.credit_score,
            kyc_verified: self.kyc_verified,
            role: self.role,
            version: 0,
            created_at,
        }
    }
}

/// Generate a customer-facing account number ("ACC" + 10 digits)
pub fn generate_account_number() -> String {
    use rand::Rng;
    let digits: u64 = rand::thread_rng().gen_range(1_000_000_000..10_000_000_000);
    format!("ACC{digits}")
}
