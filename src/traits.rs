//! Traits for storage abstraction and extensibility

use async_trait::async_trait;

use crate::config::LedgerConfig;
use crate::types::*;

/// Storage abstraction for the ledger system
///
/// Plain reads run outside any unit of work. Everything that mutates a
/// balance goes through a [`StoreTransaction`] obtained from [`begin`].
///
/// [`begin`]: LedgerStore::begin
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Unit of work handed out by [`LedgerStore::begin`]
    type Tx: StoreTransaction;

    /// Apply the store-level settings of `config`, such as the row-lock
    /// wait bound
    fn configure(self, config: &LedgerConfig) -> Self
    where
        Self: Sized;

    /// Begin an atomic unit of work
    async fn begin(&self) -> StoreResult<Self::Tx>;

    /// Insert a new account with a zero balance
    async fn insert_account(&self, owner: &str, currency: Currency) -> StoreResult<Account>;

    /// Get an account by ID
    async fn get_account(&self, account_id: i64) -> StoreResult<Option<Account>>;

    /// List accounts ordered by ID
    async fn list_accounts(&self, page: Page) -> StoreResult<Vec<Account>>;

    /// Get a transfer by ID
    async fn get_transfer(&self, transfer_id: i64) -> StoreResult<Option<Transfer>>;

    /// List transfers touching `account_id` (as source or destination), or all
    /// transfers when no account is given
    async fn list_transfers(&self, account_id: Option<i64>, page: Page)
        -> StoreResult<Vec<Transfer>>;

    /// Get an entry by ID
    async fn get_entry(&self, entry_id: i64) -> StoreResult<Option<Entry>>;

    /// List the entries of one account ordered by ID
    async fn list_entries(&self, account_id: i64, page: Page) -> StoreResult<Vec<Entry>>;
}

/// One atomic unit of work against a [`LedgerStore`]
///
/// Writes are invisible to other units until [`commit`] returns. Dropping a
/// transaction without committing rolls it back.
///
/// [`commit`]: StoreTransaction::commit
#[async_trait]
pub trait StoreTransaction: Send {
    /// Take the exclusive row lock on an account and return its current state
    ///
    /// Locking a row this transaction already holds returns immediately.
    async fn lock_account(&mut self, account_id: i64) -> StoreResult<Account>;

    /// Insert a transfer row
    async fn insert_transfer(
        &mut self,
        from_account_id: i64,
        to_account_id: i64,
        amount: i64,
    ) -> StoreResult<Transfer>;

    /// Insert an entry row
    async fn insert_entry(&mut self, account_id: i64, amount: i64) -> StoreResult<Entry>;

    /// Add `delta` to the balance and return the updated account, as one
    /// statement. Takes the row lock if not already held.
    async fn add_account_balance(&mut self, account_id: i64, delta: i64) -> StoreResult<Account>;

    /// Make every write of this unit visible at once and release its locks
    async fn commit(self) -> StoreResult<()>;

    /// Discard every write of this unit and release its locks
    async fn rollback(self) -> StoreResult<()>;
}

/// Trait for implementing custom account validation rules
pub trait AccountValidator: Send + Sync {
    /// Validate a new account before it is inserted
    fn validate_new_account(&self, owner: &str, currency: Currency) -> LedgerResult<()>;
}

/// Trait for implementing custom transfer validation rules
pub trait TransferValidator: Send + Sync {
    /// Validate the request itself, before any account is read
    fn validate_request(&self, request: &TransferRequest) -> LedgerResult<()>;
}

/// Default account validator with basic rules
pub struct DefaultAccountValidator;

impl AccountValidator for DefaultAccountValidator {
    fn validate_new_account(&self, owner: &str, _currency: Currency) -> LedgerResult<()> {
        if owner.trim().is_empty() {
            return Err(LedgerError::Validation(
                "Account owner cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}

/// Default transfer validator with basic rules
pub struct DefaultTransferValidator;

impl TransferValidator for DefaultTransferValidator {
    fn validate_request(&self, request: &TransferRequest) -> LedgerResult<()> {
        if request.amount <= 0 {
            return Err(LedgerError::Validation(
                "Amount must be positive".to_string(),
            ));
        }

        if request.from_account_id < 1 || request.to_account_id < 1 {
            return Err(LedgerError::Validation(
                "Account IDs must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}
