//! PostgreSQL-backed ledger store
//!
//! Row locks are `SELECT ... FOR UPDATE`; balance updates are a single
//! `UPDATE ... SET balance = balance + $1 ... RETURNING` statement.

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction};
use std::time::Duration;
use tracing::debug;

use crate::config::LedgerConfig;
use crate::traits::*;
use crate::types::*;

const ACCOUNT_COLUMNS: &str = "id, owner, balance, currency, created_at";
const TRANSFER_COLUMNS: &str = "id, from_account_id, to_account_id, amount, created_at";
const ENTRY_COLUMNS: &str = "id, account_id, amount, created_at";

/// Map a driver error onto the store taxonomy by SQLSTATE
fn classify(err: sqlx::Error) -> StoreError {
    match &err {
        sqlx::Error::Database(db) => match db.code().as_deref() {
            // serialization_failure, deadlock_detected, lock_not_available
            Some("40001") | Some("40P01") | Some("55P03") => {
                StoreError::Conflict(db.message().to_string())
            }
            Some("23514") => {
                StoreError::CheckViolation(db.constraint().unwrap_or("check").to_string())
            }
            Some("23505") => {
                StoreError::UniqueViolation(db.constraint().unwrap_or("unique").to_string())
            }
            _ => StoreError::Other(err.to_string()),
        },
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => StoreError::Unavailable(err.to_string()),
        _ => StoreError::Other(err.to_string()),
    }
}

/// Like [`classify`], reporting a foreign key violation as a missing account
fn classify_for_account(err: sqlx::Error, account_id: i64) -> StoreError {
    if let sqlx::Error::Database(db) = &err {
        if db.code().as_deref() == Some("23503") {
            return StoreError::AccountNotFound(account_id);
        }
    }
    classify(err)
}

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
    lock_timeout: Option<Duration>,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            lock_timeout: None,
        }
    }

    pub async fn connect(database_url: &str, max_connections: u32) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(classify)?;
        Ok(Self::new(pool))
    }

    /// Bound every row-lock wait with `SET LOCAL lock_timeout`
    pub fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = Some(lock_timeout);
        self
    }

    /// Apply the embedded schema migrations
    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Other(e.to_string()))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl LedgerStore for PgStore {
    type Tx = PgTransaction;

    fn configure(self, config: &LedgerConfig) -> Self {
        self.with_lock_timeout(config.lock_timeout())
    }

    async fn begin(&self) -> StoreResult<PgTransaction> {
        let mut tx = self.pool.begin().await.map_err(classify)?;
        if let Some(timeout) = self.lock_timeout {
            let statement = format!("SET LOCAL lock_timeout = '{}ms'", timeout.as_millis());
            sqlx::query(&statement)
                .execute(&mut *tx)
                .await
                .map_err(classify)?;
        }
        Ok(PgTransaction { tx })
    }

    async fn insert_account(&self, owner: &str, currency: Currency) -> StoreResult<Account> {
        sqlx::query_as::<_, Account>(&format!(
            "INSERT INTO accounts (owner, balance, currency) VALUES ($1, 0, $2) RETURNING {ACCOUNT_COLUMNS}"
        ))
        .bind(owner)
        .bind(currency.code())
        .fetch_one(&self.pool)
        .await
        .map_err(classify)
    }

    async fn get_account(&self, account_id: i64) -> StoreResult<Option<Account>> {
        sqlx::query_as::<_, Account>(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = $1"
        ))
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(classify)
    }

    async fn list_accounts(&self, page: Page) -> StoreResult<Vec<Account>> {
        sqlx::query_as::<_, Account>(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts ORDER BY id LIMIT $1 OFFSET $2"
        ))
        .bind(page.limit() as i64)
        .bind(page.offset() as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(classify)
    }

    async fn get_transfer(&self, transfer_id: i64) -> StoreResult<Option<Transfer>> {
        sqlx::query_as::<_, Transfer>(&format!(
            "SELECT {TRANSFER_COLUMNS} FROM transfers WHERE id = $1"
        ))
        .bind(transfer_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(classify)
    }

    async fn list_transfers(
        &self,
        account_id: Option<i64>,
        page: Page,
    ) -> StoreResult<Vec<Transfer>> {
        sqlx::query_as::<_, Transfer>(&format!(
            "SELECT {TRANSFER_COLUMNS} FROM transfers \
             WHERE $1::bigint IS NULL OR from_account_id = $1 OR to_account_id = $1 \
             ORDER BY id LIMIT $2 OFFSET $3"
        ))
        .bind(account_id)
        .bind(page.limit() as i64)
        .bind(page.offset() as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(classify)
    }

    async fn get_entry(&self, entry_id: i64) -> StoreResult<Option<Entry>> {
        sqlx::query_as::<_, Entry>(&format!("SELECT {ENTRY_COLUMNS} FROM entries WHERE id = $1"))
            .bind(entry_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(classify)
    }

    async fn list_entries(&self, account_id: i64, page: Page) -> StoreResult<Vec<Entry>> {
        sqlx::query_as::<_, Entry>(&format!(
            "SELECT {ENTRY_COLUMNS} FROM entries WHERE account_id = $1 ORDER BY id LIMIT $2 OFFSET $3"
        ))
        .bind(account_id)
        .bind(page.limit() as i64)
        .bind(page.offset() as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(classify)
    }
}

/// Unit of work over a [`PgStore`]; dropping it rolls back
pub struct PgTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTransaction for PgTransaction {
    async fn lock_account(&mut self, account_id: i64) -> StoreResult<Account> {
        sqlx::query_as::<_, Account>(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = $1 FOR UPDATE"
        ))
        .bind(account_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(classify)?
        .ok_or(StoreError::AccountNotFound(account_id))
    }

    async fn insert_transfer(
        &mut self,
        from_account_id: i64,
        to_account_id: i64,
        amount: i64,
    ) -> StoreResult<Transfer> {
        sqlx::query_as::<_, Transfer>(&format!(
            "INSERT INTO transfers (from_account_id, to_account_id, amount) VALUES ($1, $2, $3) \
             RETURNING {TRANSFER_COLUMNS}"
        ))
        .bind(from_account_id)
        .bind(to_account_id)
        .bind(amount)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(classify)
    }

    async fn insert_entry(&mut self, account_id: i64, amount: i64) -> StoreResult<Entry> {
        sqlx::query_as::<_, Entry>(&format!(
            "INSERT INTO entries (account_id, amount) VALUES ($1, $2) RETURNING {ENTRY_COLUMNS}"
        ))
        .bind(account_id)
        .bind(amount)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| classify_for_account(e, account_id))
    }

    async fn add_account_balance(&mut self, account_id: i64, delta: i64) -> StoreResult<Account> {
        debug!(account_id, delta, "UPDATE accounts SET balance = balance + delta");
        sqlx::query_as::<_, Account>(&format!(
            "UPDATE accounts SET balance = balance + $1 WHERE id = $2 RETURNING {ACCOUNT_COLUMNS}"
        ))
        .bind(delta)
        .bind(account_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(classify)?
        .ok_or(StoreError::AccountNotFound(account_id))
    }

    async fn commit(self) -> StoreResult<()> {
        self.tx.commit().await.map_err(classify)
    }

    async fn rollback(self) -> StoreResult<()> {
        self.tx.rollback().await.map_err(classify)
    }
}
