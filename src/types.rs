//! Core types and data structures for the banking ledger

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Currencies an account can be opened in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    /// US Dollar
    Usd,
    /// Euro
    Eur,
    /// Indonesian Rupiah
    Idr,
}

impl Currency {
    /// All supported currencies
    pub const ALL: [Currency; 3] = [Currency::Usd, Currency::Eur, Currency::Idr];

    /// ISO 4217 code of the currency
    pub fn code(&self) -> &'static str {
        match self {
            Currency::Usd => "USD",
            Currency::Eur => "EUR",
            Currency::Idr => "IDR",
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Currency {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "USD" => Ok(Currency::Usd),
            "EUR" => Ok(Currency::Eur),
            "IDR" => Ok(Currency::Idr),
            other => Err(LedgerError::Validation(format!(
                "Unsupported currency: {other}"
            ))),
        }
    }
}

impl TryFrom<String> for Currency {
    type Error = LedgerError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// A customer account holding a balance in minor currency units
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "postgres", derive(sqlx::FromRow))]
pub struct Account {
    /// Unique identifier, assigned by the store
    pub id: i64,
    /// Username of the account owner
    pub owner: String,
    /// Current balance in minor units
    pub balance: i64,
    /// Currency the balance is denominated in
    #[cfg_attr(feature = "postgres", sqlx(try_from = "String"))]
    pub currency: Currency,
    /// When the account was opened
    pub created_at: DateTime<Utc>,
}

/// One immutable ledger line: a signed amount applied to one account
///
/// Positive amounts are credits, negative amounts are debits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "postgres", derive(sqlx::FromRow))]
pub struct Entry {
    pub id: i64,
    pub account_id: i64,
    pub amount: i64,
    pub created_at: DateTime<Utc>,
}

/// Immutable record of funds moved between two accounts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "postgres", derive(sqlx::FromRow))]
pub struct Transfer {
    pub id: i64,
    pub from_account_id: i64,
    pub to_account_id: i64,
    /// Always positive
    pub amount: i64,
    pub created_at: DateTime<Utc>,
}

/// Input of the transfer core
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferTxParams {
    pub from_account_id: i64,
    pub to_account_id: i64,
    pub amount: i64,
}

impl TransferTxParams {
    pub fn new(from_account_id: i64, to_account_id: i64, amount: i64) -> Self {
        Self {
            from_account_id,
            to_account_id,
            amount,
        }
    }

    /// Whether source and destination are the same account
    pub fn is_self_transfer(&self) -> bool {
        self.from_account_id == self.to_account_id
    }
}

/// Everything a committed transfer produced
///
/// Accounts are always reported as (source, destination), whatever order
/// their rows were locked in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferTxResult {
    pub transfer: Transfer,
    pub from_entry: Entry,
    pub to_entry: Entry,
    pub from_account: Account,
    pub to_account: Account,
}

/// A transfer as requested by the API layer, before upstream checks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequest {
    pub from_account_id: i64,
    pub to_account_id: i64,
    pub amount: i64,
    /// Currency both accounts must be held in
    pub currency: Currency,
    /// Authenticated username; when set it must own the source account
    #[serde(default)]
    pub requested_by: Option<String>,
}

impl TransferRequest {
    pub fn new(from_account_id: i64, to_account_id: i64, amount: i64, currency: Currency) -> Self {
        Self {
            from_account_id,
            to_account_id,
            amount,
            currency,
            requested_by: None,
        }
    }

    /// Require the source account to belong to `owner`
    pub fn requested_by(mut self, owner: impl Into<String>) -> Self {
        self.requested_by = Some(owner.into());
        self
    }

    pub fn params(&self) -> TransferTxParams {
        TransferTxParams::new(self.from_account_id, self.to_account_id, self.amount)
    }
}

/// One page of a listing, numbered from 1
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub page_id: u32,
    pub page_size: u32,
}

impl Page {
    pub const MIN_SIZE: u32 = 5;
    pub const MAX_SIZE: u32 = 10;

    pub fn new(page_id: u32, page_size: u32) -> Self {
        Self { page_id, page_size }
    }

    pub fn limit(&self) -> usize {
        self.page_size as usize
    }

    pub fn offset(&self) -> usize {
        (self.page_id.saturating_sub(1) as usize) * self.page_size as usize
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new(1, Self::MAX_SIZE)
    }
}

/// Errors that can occur in the ledger system
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("Account not found: {0}")]
    AccountNotFound(i64),
    #[error("Insufficient funds in account {account_id} for amount {amount}")]
    InsufficientFunds { account_id: i64, amount: i64 },
    #[error("Transaction conflict after {attempts} attempt(s): {reason}")]
    TransactionConflict { attempts: u32, reason: String },
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Account {account_id} currency mismatch: {actual} vs {expected}")]
    CurrencyMismatch {
        account_id: i64,
        expected: Currency,
        actual: Currency,
    },
    #[error("Account {account_id} does not belong to the requesting user")]
    NotAccountOwner { account_id: i64 },
    #[error("Account already exists for owner '{owner}' in {currency}")]
    DuplicateAccount { owner: String, currency: Currency },
    #[error("Transfer not found: {0}")]
    TransferNotFound(i64),
    #[error("Entry not found: {0}")]
    EntryNotFound(i64),
    #[error("Storage error: {0}")]
    Storage(String),
}

impl LedgerError {
    /// Whether the whole unit of work may be retried with the same inputs
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::TransactionConflict { .. })
    }

    /// Stable error code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            LedgerError::AccountNotFound(_) => "ACCOUNT_NOT_FOUND",
            LedgerError::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            LedgerError::TransactionConflict { .. } => "TRANSACTION_CONFLICT",
            LedgerError::StorageUnavailable(_) => "STORAGE_UNAVAILABLE",
            LedgerError::Validation(_) => "VALIDATION_ERROR",
            LedgerError::CurrencyMismatch { .. } => "CURRENCY_MISMATCH",
            LedgerError::NotAccountOwner { .. } => "NOT_ACCOUNT_OWNER",
            LedgerError::DuplicateAccount { .. } => "DUPLICATE_ACCOUNT",
            LedgerError::TransferNotFound(_) => "TRANSFER_NOT_FOUND",
            LedgerError::EntryNotFound(_) => "ENTRY_NOT_FOUND",
            LedgerError::Storage(_) => "STORAGE_ERROR",
        }
    }
}

/// Result type for ledger operations
pub type LedgerResult<T> = Result<T, LedgerError>;

/// Failures reported by a [`LedgerStore`](crate::traits::LedgerStore)
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("account {0} does not exist")]
    AccountNotFound(i64),
    /// Serialization failure, detected deadlock or lock wait timeout
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("check constraint violated: {0}")]
    CheckViolation(String),
    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("{0}")]
    Other(String),
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

impl From<StoreError> for LedgerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::AccountNotFound(id) => LedgerError::AccountNotFound(id),
            StoreError::Conflict(reason) => LedgerError::TransactionConflict {
                attempts: 1,
                reason,
            },
            StoreError::Unavailable(msg) => LedgerError::StorageUnavailable(msg),
            StoreError::CheckViolation(msg)
            | StoreError::UniqueViolation(msg)
            | StoreError::Other(msg) => LedgerError::Storage(msg),
        }
    }
}
