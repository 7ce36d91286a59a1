//! Business workflows sitting between the HTTP layer and storage.

pub mod accounts;
pub mod loans;
pub mod validation;

pub use accounts::{AccountError, AccountService};
pub use loans::{LoanError, LoanWorkflow};
