//! In-memory storage implementation for testing and development
//!
//! Behaves like a row-locking relational store: every account row carries
//! its own async lock held until the owning transaction ends, writes are
//! staged per transaction and published together at commit, and waiting for
//! a row lock longer than the lock timeout fails with a conflict.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio::sync::{Mutex as RowLock, OwnedMutexGuard};
use tracing::{debug, trace};

use crate::config::LedgerConfig;
use crate::traits::*;
use crate::types::*;

const BALANCE_CONSTRAINT: &str = "accounts_balance_non_negative";
const OWNER_CURRENCY_KEY: &str = "accounts_owner_currency_key";

/// Operations a fault can be injected into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultPoint {
    Begin,
    LockAccount,
    InsertTransfer,
    InsertEntry,
    AddBalance,
    Commit,
}

#[derive(Debug)]
struct Fault {
    point: FaultPoint,
    error: StoreError,
    remaining: u32,
}

#[derive(Debug)]
struct AccountRow {
    account: Account,
    lock: Arc<RowLock<()>>,
}

#[derive(Debug, Default)]
struct Tables {
    accounts: BTreeMap<i64, AccountRow>,
    transfers: BTreeMap<i64, Transfer>,
    entries: BTreeMap<i64, Entry>,
}

#[derive(Debug)]
struct Inner {
    tables: RwLock<Tables>,
    account_seq: AtomicI64,
    transfer_seq: AtomicI64,
    entry_seq: AtomicI64,
    faults: Mutex<Vec<Fault>>,
}

impl Inner {
    fn read(&self) -> StoreResult<RwLockReadGuard<'_, Tables>> {
        self.tables
            .read()
            .map_err(|_| StoreError::Unavailable("memory tables poisoned".to_string()))
    }

    fn write(&self) -> StoreResult<RwLockWriteGuard<'_, Tables>> {
        self.tables
            .write()
            .map_err(|_| StoreError::Unavailable("memory tables poisoned".to_string()))
    }

    fn take_fault(&self, point: FaultPoint) -> StoreResult<()> {
        let mut faults = self
            .faults
            .lock()
            .map_err(|_| StoreError::Unavailable("fault table poisoned".to_string()))?;
        if let Some(fault) = faults
            .iter_mut()
            .find(|f| f.point == point && f.remaining > 0)
        {
            fault.remaining -= 1;
            debug!(?point, error = %fault.error, "injected fault");
            return Err(fault.error.clone());
        }
        Ok(())
    }

    fn next_id(seq: &AtomicI64) -> i64 {
        seq.fetch_add(1, Ordering::SeqCst)
    }
}

/// In-memory storage implementation for testing and development
#[derive(Debug, Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
    lock_timeout: Duration,
    enforce_non_negative: bool,
}

impl MemoryStore {
    /// Create a new memory store instance
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                tables: RwLock::new(Tables::default()),
                account_seq: AtomicI64::new(1),
                transfer_seq: AtomicI64::new(1),
                entry_seq: AtomicI64::new(1),
                faults: Mutex::new(Vec::new()),
            }),
            lock_timeout: Duration::from_secs(2),
            enforce_non_negative: true,
        }
    }

    /// Longest a transaction waits for a row lock before reporting a conflict
    pub fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }

    /// Drop the `balance >= 0` check constraint
    pub fn without_balance_constraint(mut self) -> Self {
        self.enforce_non_negative = false;
        self
    }

    /// Overwrite a committed balance directly, for loading fixtures
    ///
    /// Bypasses row locks and the ledger; never call it while transfers run.
    pub fn seed_balance(&self, account_id: i64, balance: i64) -> StoreResult<()> {
        let mut tables = self.inner.write()?;
        let row = tables
            .accounts
            .get_mut(&account_id)
            .ok_or(StoreError::AccountNotFound(account_id))?;
        row.account.balance = balance;
        Ok(())
    }

    /// Make the next `times` calls at `point` fail with `error`
    pub fn inject_fault(&self, point: FaultPoint, error: StoreError, times: u32) {
        if let Ok(mut faults) = self.inner.faults.lock() {
            faults.push(Fault {
                point,
                error,
                remaining: times,
            });
        }
    }

    /// Number of injected failures not yet triggered
    pub fn pending_faults(&self) -> u32 {
        self.inner
            .faults
            .lock()
            .map(|faults| faults.iter().map(|f| f.remaining).sum())
            .unwrap_or(0)
    }

    /// Sum of all committed balances
    pub fn total_balance(&self) -> StoreResult<i64> {
        let tables = self.inner.read()?;
        Ok(tables.accounts.values().map(|row| row.account.balance).sum())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn page_of<T: Clone>(rows: impl Iterator<Item = T>, page: Page) -> Vec<T> {
    rows.skip(page.offset()).take(page.limit()).collect()
}

#[async_trait]
impl LedgerStore for MemoryStore {
    type Tx = MemoryTransaction;

    fn configure(self, config: &LedgerConfig) -> Self {
        self.with_lock_timeout(config.lock_timeout())
    }

    async fn begin(&self) -> StoreResult<MemoryTransaction> {
        self.inner.take_fault(FaultPoint::Begin)?;
        Ok(MemoryTransaction {
            inner: Arc::clone(&self.inner),
            lock_timeout: self.lock_timeout,
            enforce_non_negative: self.enforce_non_negative,
            held: HashMap::new(),
            staged: HashMap::new(),
            transfers: Vec::new(),
            entries: Vec::new(),
        })
    }

    async fn insert_account(&self, owner: &str, currency: Currency) -> StoreResult<Account> {
        let mut tables = self.inner.write()?;
        if tables
            .accounts
            .values()
            .any(|row| row.account.owner == owner && row.account.currency == currency)
        {
            return Err(StoreError::UniqueViolation(OWNER_CURRENCY_KEY.to_string()));
        }

        let account = Account {
            id: Inner::next_id(&self.inner.account_seq),
            owner: owner.to_string(),
            balance: 0,
            currency,
            created_at: Utc::now(),
        };
        tables.accounts.insert(
            account.id,
            AccountRow {
                account: account.clone(),
                lock: Arc::new(RowLock::new(())),
            },
        );
        Ok(account)
    }

    async fn get_account(&self, account_id: i64) -> StoreResult<Option<Account>> {
        let tables = self.inner.read()?;
        Ok(tables.accounts.get(&account_id).map(|row| row.account.clone()))
    }

    async fn list_accounts(&self, page: Page) -> StoreResult<Vec<Account>> {
        let tables = self.inner.read()?;
        Ok(page_of(
            tables.accounts.values().map(|row| row.account.clone()),
            page,
        ))
    }

    async fn get_transfer(&self, transfer_id: i64) -> StoreResult<Option<Transfer>> {
        let tables = self.inner.read()?;
        Ok(tables.transfers.get(&transfer_id).cloned())
    }

    async fn list_transfers(
        &self,
        account_id: Option<i64>,
        page: Page,
    ) -> StoreResult<Vec<Transfer>> {
        let tables = self.inner.read()?;
        let rows = tables.transfers.values().filter(|t| {
            account_id.is_none_or(|id| t.from_account_id == id || t.to_account_id == id)
        });
        Ok(page_of(rows.cloned(), page))
    }

    async fn get_entry(&self, entry_id: i64) -> StoreResult<Option<Entry>> {
        let tables = self.inner.read()?;
        Ok(tables.entries.get(&entry_id).cloned())
    }

    async fn list_entries(&self, account_id: i64, page: Page) -> StoreResult<Vec<Entry>> {
        let tables = self.inner.read()?;
        let rows = tables
            .entries
            .values()
            .filter(|e| e.account_id == account_id);
        Ok(page_of(rows.cloned(), page))
    }
}

/// Unit of work over a [`MemoryStore`]
///
/// Dropping it without [`commit`](StoreTransaction::commit) discards the
/// staged writes and releases every row lock.
pub struct MemoryTransaction {
    inner: Arc<Inner>,
    lock_timeout: Duration,
    enforce_non_negative: bool,
    held: HashMap<i64, OwnedMutexGuard<()>>,
    staged: HashMap<i64, Account>,
    transfers: Vec<Transfer>,
    entries: Vec<Entry>,
}

impl MemoryTransaction {
    async fn lock_row(&mut self, account_id: i64) -> StoreResult<&mut Account> {
        if !self.held.contains_key(&account_id) {
            let lock = {
                let tables = self.inner.read()?;
                let row = tables
                    .accounts
                    .get(&account_id)
                    .ok_or(StoreError::AccountNotFound(account_id))?;
                Arc::clone(&row.lock)
            };

            let guard = tokio::time::timeout(self.lock_timeout, lock.lock_owned())
                .await
                .map_err(|_| {
                    debug!(account_id, "lock wait timed out");
                    StoreError::Conflict(format!("lock wait timeout on account {account_id}"))
                })?;
            trace!(account_id, "row lock acquired");

            // Re-read under the lock: another unit may have committed while we waited.
            let current = self
                .inner
                .read()?
                .accounts
                .get(&account_id)
                .map(|row| row.account.clone())
                .ok_or(StoreError::AccountNotFound(account_id))?;
            self.held.insert(account_id, guard);
            self.staged.insert(account_id, current);
        }

        self.staged
            .get_mut(&account_id)
            .ok_or(StoreError::AccountNotFound(account_id))
    }

    fn check_account_exists(&self, account_id: i64) -> StoreResult<()> {
        if self.staged.contains_key(&account_id)
            || self.inner.read()?.accounts.contains_key(&account_id)
        {
            Ok(())
        } else {
            Err(StoreError::AccountNotFound(account_id))
        }
    }
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn lock_account(&mut self, account_id: i64) -> StoreResult<Account> {
        self.inner.take_fault(FaultPoint::LockAccount)?;
        Ok(self.lock_row(account_id).await?.clone())
    }

    async fn insert_transfer(
        &mut self,
        from_account_id: i64,
        to_account_id: i64,
        amount: i64,
    ) -> StoreResult<Transfer> {
        self.inner.take_fault(FaultPoint::InsertTransfer)?;
        self.check_account_exists(from_account_id)?;
        self.check_account_exists(to_account_id)?;

        let transfer = Transfer {
            id: Inner::next_id(&self.inner.transfer_seq),
            from_account_id,
            to_account_id,
            amount,
            created_at: Utc::now(),
        };
        self.transfers.push(transfer.clone());
        Ok(transfer)
    }

    async fn insert_entry(&mut self, account_id: i64, amount: i64) -> StoreResult<Entry> {
        self.inner.take_fault(FaultPoint::InsertEntry)?;
        self.check_account_exists(account_id)?;

        let entry = Entry {
            id: Inner::next_id(&self.inner.entry_seq),
            account_id,
            amount,
            created_at: Utc::now(),
        };
        self.entries.push(entry.clone());
        Ok(entry)
    }

    async fn add_account_balance(&mut self, account_id: i64, delta: i64) -> StoreResult<Account> {
        self.inner.take_fault(FaultPoint::AddBalance)?;
        let enforce_non_negative = self.enforce_non_negative;
        let account = self.lock_row(account_id).await?;

        let balance = account.balance.checked_add(delta).ok_or_else(|| {
            StoreError::Other(format!("balance of account {account_id} out of range"))
        })?;
        if enforce_non_negative && balance < 0 {
            return Err(StoreError::CheckViolation(BALANCE_CONSTRAINT.to_string()));
        }
        account.balance = balance;
        Ok(account.clone())
    }

    async fn commit(self) -> StoreResult<()> {
        self.inner.take_fault(FaultPoint::Commit)?;
        {
            let mut tables = self.inner.write()?;
            for (id, account) in &self.staged {
                if let Some(row) = tables.accounts.get_mut(id) {
                    row.account.balance = account.balance;
                }
            }
            for transfer in &self.transfers {
                tables.transfers.insert(transfer.id, transfer.clone());
            }
            for entry in &self.entries {
                tables.entries.insert(entry.id, entry.clone());
            }
        }
        trace!(
            locks = self.held.len(),
            transfers = self.transfers.len(),
            entries = self.entries.len(),
            "memory transaction committed"
        );
        // Row locks are released when `self.held` drops here.
        Ok(())
    }

    async fn rollback(self) -> StoreResult<()> {
        trace!(locks = self.held.len(), "memory transaction rolled back");
        Ok(())
    }
}
