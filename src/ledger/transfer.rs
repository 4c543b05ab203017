//! The money-transfer transaction

use tracing::{debug, info, instrument, warn};

use crate::config::{FundsCheck, LedgerConfig, SelfTransferPolicy};
use crate::ledger::balance::BalanceUpdater;
use crate::ledger::lock_order::LockOrder;
use crate::ledger::retry::RetryPolicy;
use crate::traits::*;
use crate::types::*;

/// Executes transfers as single atomic units of work
///
/// Each call begins a store transaction, locks both account rows in
/// ascending id order, writes the transfer row, both entries and both
/// balance updates, and commits. On any failure the unit is rolled back
/// before the error is returned, so partial transfers are never visible.
/// Store conflicts retry the whole unit under the configured [`RetryPolicy`].
pub struct TransferExecutor<S: LedgerStore> {
    storage: S,
    balances: BalanceUpdater,
    retry: RetryPolicy,
    funds_check: FundsCheck,
    self_transfer: SelfTransferPolicy,
}

impl<S: LedgerStore> TransferExecutor<S> {
    /// Create an executor with the default configuration
    pub fn new(storage: S) -> Self {
        Self::with_config(storage, &LedgerConfig::default())
    }

    pub fn with_config(storage: S, config: &LedgerConfig) -> Self {
        Self {
            storage,
            balances: BalanceUpdater::new(),
            retry: RetryPolicy::from(&config.retry),
            funds_check: config.funds_check,
            self_transfer: config.self_transfer,
        }
    }

    /// Replace the retry policy
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Move `amount` from the source to the destination account
    #[instrument(
        skip(self),
        fields(from = params.from_account_id, to = params.to_account_id, amount = params.amount)
    )]
    pub async fn execute(&self, params: TransferTxParams) -> LedgerResult<TransferTxResult> {
        self.check_params(&params)?;

        let result = self
            .retry
            .run(|attempt| async move {
                debug!(attempt, "starting transfer unit of work");
                self.attempt(params).await
            })
            .await;

        match &result {
            Ok(r) => info!(
                transfer_id = r.transfer.id,
                from_balance = r.from_account.balance,
                to_balance = r.to_account.balance,
                "transfer committed"
            ),
            Err(e) => warn!(error = %e, code = e.code(), "transfer failed"),
        }
        result
    }

    fn check_params(&self, params: &TransferTxParams) -> LedgerResult<()> {
        if params.amount <= 0 {
            return Err(LedgerError::Validation(format!(
                "Transfer amount must be positive, got {}",
                params.amount
            )));
        }
        if params.from_account_id < 1 || params.to_account_id < 1 {
            return Err(LedgerError::Validation(
                "Account IDs must be at least 1".to_string(),
            ));
        }
        if params.is_self_transfer() && self.self_transfer == SelfTransferPolicy::Reject {
            return Err(LedgerError::Validation(
                "Source and destination account must differ".to_string(),
            ));
        }
        Ok(())
    }

    /// One attempt: begin, write everything, commit; roll back on any error
    async fn attempt(&self, params: TransferTxParams) -> LedgerResult<TransferTxResult> {
        let mut tx = self.storage.begin().await?;

        match self.write_transfer(&mut tx, params).await {
            Ok(result) => {
                tx.commit().await?;
                Ok(result)
            }
            Err(e) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(error = %rollback_err, "rollback failed, store discards the unit");
                }
                Err(e)
            }
        }
    }

    async fn write_transfer(
        &self,
        tx: &mut S::Tx,
        params: TransferTxParams,
    ) -> LedgerResult<TransferTxResult> {
        let TransferTxParams {
            from_account_id,
            to_account_id,
            amount,
        } = params;

        let order = LockOrder::for_pair(from_account_id, to_account_id);
        let locked = order.acquire(tx).await?;

        if self.funds_check == FundsCheck::Executor {
            let source = locked
                .get(from_account_id)
                .ok_or(LedgerError::AccountNotFound(from_account_id))?;
            if source.balance < amount {
                return Err(LedgerError::InsufficientFunds {
                    account_id: from_account_id,
                    amount,
                });
            }
        }

        let transfer = tx
            .insert_transfer(from_account_id, to_account_id, amount)
            .await?;
        let from_entry = tx.insert_entry(from_account_id, -amount).await?;
        let to_entry = tx.insert_entry(to_account_id, amount).await?;

        // Rows are already locked; apply in lock order all the same.
        let (from_account, to_account) = if from_account_id <= to_account_id {
            let from = self
                .balances
                .apply_delta(tx, from_account_id, -amount)
                .await?;
            let to = self.balances.apply_delta(tx, to_account_id, amount).await?;
            (from, to)
        } else {
            let to = self.balances.apply_delta(tx, to_account_id, amount).await?;
            let from = self
                .balances
                .apply_delta(tx, from_account_id, -amount)
                .await?;
            (from, to)
        };

        // A self-transfer reads back the same row twice; report the final state.
        let from_account = if params.is_self_transfer() {
            to_account.clone()
        } else {
            from_account
        };

        Ok(TransferTxResult {
            transfer,
            from_entry,
            to_entry,
            from_account,
            to_account,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::memory_storage::{FaultPoint, MemoryStore};
    use std::time::Duration;

    async fn funded_pair(store: &MemoryStore, a: i64, b: i64) -> (Account, Account) {
        let first = store.insert_account("alice", Currency::Usd).await.unwrap();
        let second = store.insert_account("bob", Currency::Usd).await.unwrap();
        store.seed_balance(first.id, a).unwrap();
        store.seed_balance(second.id, b).unwrap();
        (
            store.get_account(first.id).await.unwrap().unwrap(),
            store.get_account(second.id).await.unwrap().unwrap(),
        )
    }

    #[tokio::test]
    async fn test_transfer_writes_ledger_shape() {
        let store = MemoryStore::new();
        let (a, b) = funded_pair(&store, 100, 50).await;
        let executor = TransferExecutor::new(store.clone());

        let result = executor
            .execute(TransferTxParams::new(a.id, b.id, 30))
            .await
            .unwrap();

        assert_eq!(result.transfer.from_account_id, a.id);
        assert_eq!(result.transfer.to_account_id, b.id);
        assert_eq!(result.transfer.amount, 30);
        assert_eq!(result.from_entry.account_id, a.id);
        assert_eq!(result.from_entry.amount, -30);
        assert_eq!(result.to_entry.account_id, b.id);
        assert_eq!(result.to_entry.amount, 30);
        assert_eq!(result.from_account.balance, 70);
        assert_eq!(result.to_account.balance, 80);
    }

    #[tokio::test]
    async fn test_result_keeps_source_first_when_locked_second() {
        let store = MemoryStore::new();
        let (a, b) = funded_pair(&store, 10, 100).await;
        let executor = TransferExecutor::new(store.clone());

        let result = executor
            .execute(TransferTxParams::new(b.id, a.id, 40))
            .await
            .unwrap();

        assert_eq!(result.from_account.id, b.id);
        assert_eq!(result.from_account.balance, 60);
        assert_eq!(result.to_account.id, a.id);
        assert_eq!(result.to_account.balance, 50);
    }

    #[tokio::test]
    async fn test_rejects_non_positive_amount_without_touching_store() {
        let store = MemoryStore::new();
        let (a, b) = funded_pair(&store, 10, 10).await;
        store.inject_fault(FaultPoint::Begin, StoreError::Unavailable("down".into()), 1);
        let executor = TransferExecutor::new(store.clone());

        let err = executor
            .execute(TransferTxParams::new(a.id, b.id, 0))
            .await
            .unwrap_err();

        assert!(matches!(err, LedgerError::Validation(_)));
        assert_eq!(store.pending_faults(), 1);
    }

    #[tokio::test]
    async fn test_executor_funds_check() {
        let store = MemoryStore::new().without_balance_constraint();
        let (a, b) = funded_pair(&store, 20, 0).await;
        let executor = TransferExecutor::new(store.clone());

        let err = executor
            .execute(TransferTxParams::new(a.id, b.id, 21))
            .await
            .unwrap_err();

        assert_eq!(
            err,
            LedgerError::InsufficientFunds {
                account_id: a.id,
                amount: 21
            }
        );
        assert!(store.list_transfers(None, Page::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_store_constraint_funds_check() {
        let store = MemoryStore::new();
        let (a, b) = funded_pair(&store, 20, 0).await;
        let config = LedgerConfig {
            funds_check: FundsCheck::StoreConstraint,
            ..LedgerConfig::default()
        };
        let executor = TransferExecutor::with_config(store.clone(), &config);

        let err = executor
            .execute(TransferTxParams::new(a.id, b.id, 25))
            .await
            .unwrap_err();

        assert_eq!(
            err,
            LedgerError::InsufficientFunds {
                account_id: a.id,
                amount: 25
            }
        );
        assert!(store.list_transfers(None, Page::default()).await.unwrap().is_empty());
        assert!(store.list_entries(a.id, Page::default()).await.unwrap().is_empty());
        assert_eq!(store.get_account(a.id).await.unwrap().unwrap().balance, 20);
    }

    #[tokio::test]
    async fn test_self_transfer_policies() {
        let store = MemoryStore::new();
        let (a, _) = funded_pair(&store, 40, 0).await;

        let allowed = TransferExecutor::new(store.clone())
            .execute(TransferTxParams::new(a.id, a.id, 15))
            .await
            .unwrap();
        assert_eq!(allowed.from_account.balance, 40);
        assert_eq!(allowed.to_account.balance, 40);
        assert_eq!(allowed.from_entry.amount + allowed.to_entry.amount, 0);

        let config = LedgerConfig {
            self_transfer: SelfTransferPolicy::Reject,
            ..LedgerConfig::default()
        };
        let err = TransferExecutor::with_config(store.clone(), &config)
            .execute(TransferTxParams::new(a.id, a.id, 15))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));
    }

    #[tokio::test]
    async fn test_commit_conflict_is_retried() {
        let store = MemoryStore::new();
        let (a, b) = funded_pair(&store, 100, 0).await;
        store.inject_fault(
            FaultPoint::Commit,
            StoreError::Conflict("could not serialize access".into()),
            2,
        );
        let executor = TransferExecutor::new(store.clone()).with_retry_policy(RetryPolicy::new(
            3,
            Duration::from_millis(1),
            Duration::from_millis(2),
        ));

        let result = executor
            .execute(TransferTxParams::new(a.id, b.id, 10))
            .await
            .unwrap();

        assert_eq!(result.from_account.balance, 90);
        assert_eq!(store.list_transfers(None, Page::default()).await.unwrap().len(), 1);
        assert_eq!(store.list_entries(b.id, Page::default()).await.unwrap().len(), 1);
    }
}
