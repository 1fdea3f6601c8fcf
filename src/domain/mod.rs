//! Domain module
//!
//! Core domain types and business rules of the ledger.

pub mod account;
pub mod amount;
pub mod bill;
pub mod challenge;
pub mod context;
pub mod error;
pub mod ledger;
pub mod loan;

pub use account::{generate_account_number, Account, NewAccount, Role};
pub use amount::{Amount, AmountError, Balance};
pub use bill::{Bill, BillStatus};
pub use challenge::{AuthorizationGrant, Challenge};
pub use context::{Caller, OperationContext, Privileged};
pub use error::DomainError;
pub use ledger::{category, CategoryTotal, Direction, FeedEntry, LedgerEntry, LedgerStats};
pub use loan::{Loan, LoanStatus, LoanWithBorrower};
