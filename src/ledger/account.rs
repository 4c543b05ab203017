//! Account management functionality

use tracing::{info, instrument, warn};

use crate::config::LedgerConfig;
use crate::ledger::balance::BalanceUpdater;
use crate::ledger::retry::RetryPolicy;
use crate::traits::*;
use crate::types::*;

/// Account manager for opening accounts and taking external deposits
pub struct AccountManager<S: LedgerStore> {
    pub(crate) storage: S,
    validator: Box<dyn AccountValidator>,
    balances: BalanceUpdater,
    retry: RetryPolicy,
}

impl<S: LedgerStore> AccountManager<S> {
    /// Create a new account manager
    pub fn new(storage: S) -> Self {
        Self::with_validator(storage, Box::new(DefaultAccountValidator))
    }

    /// Create a new account manager with custom validator
    pub fn with_validator(storage: S, validator: Box<dyn AccountValidator>) -> Self {
        Self {
            storage,
            validator,
            balances: BalanceUpdater::new(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_config(mut self, config: &LedgerConfig) -> Self {
        self.retry = RetryPolicy::from(&config.retry);
        self
    }

    /// Open a new account with a zero balance
    pub async fn create_account(&self, owner: &str, currency: Currency) -> LedgerResult<Account> {
        self.validator.validate_new_account(owner, currency)?;

        let account = self
            .storage
            .insert_account(owner, currency)
            .await
            .map_err(|e| match e {
                StoreError::UniqueViolation(_) => LedgerError::DuplicateAccount {
                    owner: owner.to_string(),
                    currency,
                },
                other => other.into(),
            })?;

        info!(account_id = account.id, owner, %currency, "account created");
        Ok(account)
    }

    /// Get an account by ID
    pub async fn get_account(&self, account_id: i64) -> LedgerResult<Option<Account>> {
        Ok(self.storage.get_account(account_id).await?)
    }

    /// Get an account by ID, returning an error if not found
    pub async fn get_account_required(&self, account_id: i64) -> LedgerResult<Account> {
        self.storage
            .get_account(account_id)
            .await?
            .ok_or(LedgerError::AccountNotFound(account_id))
    }

    /// List one page of accounts
    pub async fn list_accounts(&self, page: Page) -> LedgerResult<Vec<Account>> {
        Ok(self.storage.list_accounts(page).await?)
    }

    /// Credit money arriving from outside the ledger
    ///
    /// Writes one entry and one balance update in their own unit of work.
    #[instrument(skip(self))]
    pub async fn deposit(&self, account_id: i64, amount: i64) -> LedgerResult<(Entry, Account)> {
        if amount <= 0 {
            return Err(LedgerError::Validation(
                "Deposit amount must be positive".to_string(),
            ));
        }

        let result = self
            .retry
            .run(|_| async move {
                let mut tx = self.storage.begin().await?;
                let written = async {
                    let entry = tx.insert_entry(account_id, amount).await?;
                    let account = self.balances.apply_delta(&mut tx, account_id, amount).await?;
                    Ok::<_, LedgerError>((entry, account))
                }
                .await;

                match written {
                    Ok(written) => {
                        tx.commit().await?;
                        Ok(written)
                    }
                    Err(e) => {
                        if let Err(rollback_err) = tx.rollback().await {
                            warn!(error = %rollback_err, "deposit rollback failed");
                        }
                        Err(e)
                    }
                }
            })
            .await?;

        info!(balance = result.1.balance, "deposit committed");
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::memory_storage::MemoryStore;

    #[tokio::test]
    async fn test_create_and_fetch_account() {
        let manager = AccountManager::new(MemoryStore::new());

        let account = manager.create_account("alice", Currency::Usd).await.unwrap();
        assert_eq!(account.balance, 0);
        assert_eq!(account.currency, Currency::Usd);

        let fetched = manager.get_account_required(account.id).await.unwrap();
        assert_eq!(fetched, account);
        assert_eq!(
            manager.get_account_required(999).await.unwrap_err(),
            LedgerError::AccountNotFound(999)
        );
    }

    #[tokio::test]
    async fn test_duplicate_account_is_rejected() {
        let manager = AccountManager::new(MemoryStore::new());
        manager.create_account("alice", Currency::Eur).await.unwrap();

        let err = manager
            .create_account("alice", Currency::Eur)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            LedgerError::DuplicateAccount {
                owner: "alice".to_string(),
                currency: Currency::Eur
            }
        );
    }

    #[tokio::test]
    async fn test_deposit_writes_entry_and_balance() {
        let store = MemoryStore::new();
        let manager = AccountManager::new(store.clone());
        let account = manager.create_account("alice", Currency::Usd).await.unwrap();

        let (entry, updated) = manager.deposit(account.id, 250).await.unwrap();
        assert_eq!(entry.amount, 250);
        assert_eq!(updated.balance, 250);
        assert_eq!(
            store.list_entries(account.id, Page::default()).await.unwrap(),
            vec![entry]
        );
    }

    #[tokio::test]
    async fn test_deposit_to_missing_account() {
        let manager = AccountManager::new(MemoryStore::new());
        assert_eq!(
            manager.deposit(42, 10).await.unwrap_err(),
            LedgerError::AccountNotFound(42)
        );
        assert!(matches!(
            manager.deposit(42, 0).await,
            Err(LedgerError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_failed_deposit_rolls_back_entry() {
        use crate::utils::memory_storage::FaultPoint;

        let store = MemoryStore::new();
        let manager = AccountManager::new(store.clone());
        let account = manager.create_account("alice", Currency::Usd).await.unwrap();
        store.inject_fault(
            FaultPoint::AddBalance,
            StoreError::Unavailable("disk gone".to_string()),
            1,
        );

        assert!(matches!(
            manager.deposit(account.id, 40).await,
            Err(LedgerError::StorageUnavailable(_))
        ));
        assert!(store
            .list_entries(account.id, Page::default())
            .await
            .unwrap()
            .is_empty());
        assert_eq!(manager.deposit(account.id, 40).await.unwrap().1.balance, 40);
    }

    #[tokio::test]
    async fn test_list_accounts_pages() {
        let manager = AccountManager::new(MemoryStore::new());
        for owner in ["a_one", "a_two", "a_three", "a_four", "a_five", "a_six", "a_seven"] {
            manager.create_account(owner, Currency::Idr).await.unwrap();
        }

        let first = manager.list_accounts(Page::new(1, 5)).await.unwrap();
        let second = manager.list_accounts(Page::new(2, 5)).await.unwrap();
        assert_eq!(first.len(), 5);
        assert_eq!(second.len(), 2);
        assert!(first.iter().all(|a| second.iter().all(|b| a.id < b.id)));
    }
}
