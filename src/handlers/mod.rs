//! Command Handlers module
//!
//! Orchestrate ledger operations: validate the command, build a mutation
//! plan and hand it to the account mutator.

mod bill_handler;
mod commands;
mod loan_handler;
mod transfer_handler;


pub use bill_handler::BillHandler;
pub use commands::*;
pub use loan_handler::LoanHandler;
pub use transfer_handler::TransferHandler;
