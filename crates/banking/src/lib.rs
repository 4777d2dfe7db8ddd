//! Bank account sample domain for ad-hoc projections.
//!
//! Events, three projections of different shapes, and a small command side
//! that appends to the log and publishes on the live feed.

pub mod bank;
pub mod events;
pub mod projections;

pub use bank::{Bank, BankError};
pub use events::{
    BankAccountCreated, MoneyDeposited, MoneyWithdrawn, OwnerChanged, account_entity,
};
pub use projections::{CurrentBalance, CurrentOwner, DepositCount};
