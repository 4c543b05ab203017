//! Ledger module containing account management and the transfer core

pub mod account;
pub mod balance;
pub mod core;
pub mod lock_order;
pub mod retry;
pub mod transfer;

pub use account::*;
pub use balance::*;
pub use self::core::*;
pub use lock_order::*;
pub use retry::*;
pub use transfer::*;
