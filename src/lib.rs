//! # Bank Ledger
//!
//! The money-transfer core of a banking service: accounts, an append-only
//! ledger of entries, and transfers that debit one balance and credit another
//! as a single atomic unit of work.
//!
//! ## Features
//!
//! - **Atomic transfers**: transfer row, both entries and both balance updates commit together or not at all
//! - **Deadlock-free locking**: account rows are always locked in ascending id order
//! - **Bounded retry**: store conflicts retry the whole unit with jittered backoff
//! - **Storage abstraction**: row-locking store trait with in-memory and PostgreSQL backends
//!
//! ## Quick Start
//!
//! ```rust
//! use bank_ledger::{Currency, Ledger, TransferRequest};
//! use bank_ledger::utils::MemoryStore;
//!
//! # tokio_test();
//! # fn tokio_test() {
//! # let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
//! # rt.block_on(async {
//! let ledger = Ledger::new(MemoryStore::new());
//! let alice = ledger.create_account("alice", Currency::Usd).await.unwrap();
//! let bob = ledger.create_account("bob", Currency::Usd).await.unwrap();
//! ledger.deposit(alice.id, 100).await.unwrap();
//!
//! let result = ledger
//!     .transfer(TransferRequest::new(alice.id, bob.id, 30, Currency::Usd))
//!     .await
//!     .unwrap();
//! assert_eq!(result.from_account.balance, 70);
//! assert_eq!(result.to_account.balance, 30);
//! # });
//! # }
//! ```

pub mod config;
pub mod ledger;
pub mod logging;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod traits;
pub mod types;
pub mod utils;

// Re-export commonly used types
pub use config::*;
pub use ledger::*;
pub use traits::*;
pub use types::*;
