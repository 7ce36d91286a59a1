//! Database models split into domain-specific modules.

pub mod audit;
pub mod loan;
pub mod user;

pub use audit::*;
pub use loan::*;
pub use user::*;
