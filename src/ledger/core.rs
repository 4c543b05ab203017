//! Main ledger orchestrator that coordinates accounts and transfers

use tracing::debug;

use crate::config::LedgerConfig;
use crate::ledger::{AccountManager, TransferExecutor};
use crate::traits::*;
use crate::types::*;
use crate::utils::validation::validate_page;

/// Main ledger system that orchestrates all banking operations
///
/// Methods take `&self`; share one ledger between tasks behind an `Arc`.
/// All coordination between concurrent transfers happens in the store.
pub struct Ledger<S: LedgerStore> {
    account_manager: AccountManager<S>,
    executor: TransferExecutor<S>,
    transfer_validator: Box<dyn TransferValidator>,
    config: LedgerConfig,
}

impl<S: LedgerStore + Clone> Ledger<S> {
    /// Create a new ledger with the given storage backend
    pub fn new(storage: S) -> Self {
        Self::with_config(storage, LedgerConfig::default())
    }

    pub fn with_config(storage: S, config: LedgerConfig) -> Self {
        Self::with_validators(
            storage,
            config,
            Box::new(DefaultAccountValidator),
            Box::new(DefaultTransferValidator),
        )
    }

    /// Create a new ledger with custom validators
    ///
    /// The store is reconfigured from `config`, so its lock timeout always
    /// matches `config.lock_timeout_ms`.
    pub fn with_validators(
        storage: S,
        config: LedgerConfig,
        account_validator: Box<dyn AccountValidator>,
        transfer_validator: Box<dyn TransferValidator>,
    ) -> Self {
        let storage = storage.configure(&config);
        Self {
            account_manager: AccountManager::with_validator(storage.clone(), account_validator)
                .with_config(&config),
            executor: TransferExecutor::with_config(storage, &config),
            transfer_validator,
            config,
        }
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    // Account operations
    /// Open a new account with a zero balance
    pub async fn create_account(&self, owner: &str, currency: Currency) -> LedgerResult<Account> {
        self.account_manager.create_account(owner, currency).await
    }

    /// Get an account by ID
    pub async fn get_account(&self, account_id: i64) -> LedgerResult<Account> {
        self.account_manager.get_account_required(account_id).await
    }

    /// List one page of accounts
    pub async fn list_accounts(&self, page: Page) -> LedgerResult<Vec<Account>> {
        validate_page(&page)?;
        self.account_manager.list_accounts(page).await
    }

    /// Credit an external deposit to an account
    pub async fn deposit(&self, account_id: i64, amount: i64) -> LedgerResult<Account> {
        let (_, account) = self.account_manager.deposit(account_id, amount).await?;
        Ok(account)
    }

    // Transfer operations
    /// Check a transfer request the way the API layer does, then execute it
    ///
    /// Both accounts must exist and be held in the requested currency, and
    /// when the request names a user, that user must own the source account.
    pub async fn transfer(&self, request: TransferRequest) -> LedgerResult<TransferTxResult> {
        self.transfer_validator.validate_request(&request)?;

        let from = self
            .valid_account(request.from_account_id, request.currency)
            .await?;
        self.valid_account(request.to_account_id, request.currency)
            .await?;

        if let Some(owner) = &request.requested_by {
            if &from.owner != owner {
                return Err(LedgerError::NotAccountOwner {
                    account_id: from.id,
                });
            }
        }

        self.execute_transfer(request.params()).await
    }

    /// Run the transfer core directly, skipping the request checks
    pub async fn execute_transfer(&self, params: TransferTxParams) -> LedgerResult<TransferTxResult> {
        self.executor.execute(params).await
    }

    async fn valid_account(&self, account_id: i64, currency: Currency) -> LedgerResult<Account> {
        let account = self.account_manager.get_account_required(account_id).await?;
        if account.currency != currency {
            debug!(account_id, expected = %currency, actual = %account.currency, "currency mismatch");
            return Err(LedgerError::CurrencyMismatch {
                account_id,
                expected: currency,
                actual: account.currency,
            });
        }
        Ok(account)
    }

    /// Get a transfer by ID
    pub async fn get_transfer(&self, transfer_id: i64) -> LedgerResult<Transfer> {
        self.account_manager
            .storage
            .get_transfer(transfer_id)
            .await?
            .ok_or(LedgerError::TransferNotFound(transfer_id))
    }

    /// List transfers, optionally only those touching one account
    pub async fn list_transfers(
        &self,
        account_id: Option<i64>,
        page: Page,
    ) -> LedgerResult<Vec<Transfer>> {
        validate_page(&page)?;
        if let Some(id) = account_id {
            self.account_manager.get_account_required(id).await?;
        }
        Ok(self
            .account_manager
            .storage
            .list_transfers(account_id, page)
            .await?)
    }

    /// Get an entry by ID
    pub async fn get_entry(&self, entry_id: i64) -> LedgerResult<Entry> {
        self.account_manager
            .storage
            .get_entry(entry_id)
            .await?
            .ok_or(LedgerError::EntryNotFound(entry_id))
    }

    /// List the entries of one account
    pub async fn list_entries(&self, account_id: i64, page: Page) -> LedgerResult<Vec<Entry>> {
        validate_page(&page)?;
        self.account_manager.get_account_required(account_id).await?;
        Ok(self
            .account_manager
            .storage
            .list_entries(account_id, page)
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::memory_storage::MemoryStore;

    #[tokio::test]
    async fn test_ledger_basic_operations() {
        let ledger = Ledger::new(MemoryStore::new());

        let alice = ledger.create_account("alice", Currency::Usd).await.unwrap();
        let bob = ledger.create_account("bob", Currency::Usd).await.unwrap();
        ledger.deposit(alice.id, 1000).await.unwrap();

        let result = ledger
            .transfer(TransferRequest::new(alice.id, bob.id, 400, Currency::Usd).requested_by("alice"))
            .await
            .unwrap();

        assert_eq!(ledger.get_account(alice.id).await.unwrap().balance, 600);
        assert_eq!(ledger.get_account(bob.id).await.unwrap().balance, 400);
        assert_eq!(ledger.get_transfer(result.transfer.id).await.unwrap(), result.transfer);
        assert_eq!(ledger.get_entry(result.to_entry.id).await.unwrap(), result.to_entry);
    }

    #[tokio::test]
    async fn test_upstream_checks() {
        let ledger = Ledger::new(MemoryStore::new());
        let alice = ledger.create_account("alice", Currency::Usd).await.unwrap();
        let bob_eur = ledger.create_account("bob", Currency::Eur).await.unwrap();
        let bob_usd = ledger.create_account("bob", Currency::Usd).await.unwrap();
        ledger.deposit(alice.id, 100).await.unwrap();

        let mismatch = ledger
            .transfer(TransferRequest::new(alice.id, bob_eur.id, 10, Currency::Usd))
            .await
            .unwrap_err();
        assert_eq!(
            mismatch,
            LedgerError::CurrencyMismatch {
                account_id: bob_eur.id,
                expected: Currency::Usd,
                actual: Currency::Eur
            }
        );

        let not_owner = ledger
            .transfer(TransferRequest::new(alice.id, bob_usd.id, 10, Currency::Usd).requested_by("bob"))
            .await
            .unwrap_err();
        assert_eq!(not_owner, LedgerError::NotAccountOwner { account_id: alice.id });

        let bad_amount = ledger
            .transfer(TransferRequest::new(alice.id, bob_usd.id, 0, Currency::Usd))
            .await
            .unwrap_err();
        assert!(matches!(bad_amount, LedgerError::Validation(_)));

        assert_eq!(ledger.get_account(alice.id).await.unwrap().balance, 100);
    }

    #[tokio::test]
    async fn test_lookups_of_missing_rows() {
        let ledger = Ledger::new(MemoryStore::new());
        assert_eq!(ledger.get_transfer(7).await.unwrap_err(), LedgerError::TransferNotFound(7));
        assert_eq!(ledger.get_entry(8).await.unwrap_err(), LedgerError::EntryNotFound(8));
        assert_eq!(
            ledger.list_entries(9, Page::default()).await.unwrap_err(),
            LedgerError::AccountNotFound(9)
        );
        assert!(matches!(
            ledger.list_accounts(Page::new(1, 50)).await,
            Err(LedgerError::Validation(_))
        ));
    }
}
