//! Core types and traits for HomeServe storage backends.
//!
//! This crate provides the `StorageBackend` trait, the marketplace records,
//! the `Money` value type, the revenue-sharing `Policy` and the ledger
//! primitives, so storage implementations can live in separate crates.

pub mod ledger;
pub mod models;
pub mod money;
pub mod policy;
pub mod storage;

// Re-export key types at crate root for convenience
pub use ledger::{Account, AccountType};
pub use models::read::{AdminStats, JournalEntry, StatementLine, TrialBalance, TrialBalanceItem, VendorWallet};
pub use models::write::{CreateJournalCommand, LedgerEntryCommand};
pub use models::*;
pub use money::{Money, MoneyError};
pub use policy::{BookingSplit, CancellationSplit, Policy, PolicyError};
pub use storage::{BookingFilter, ListingFilter, StorageBackend, StorageError, TransactionId};
