//! Balance updates applied inside an enclosing unit of work

use tracing::debug;

use crate::traits::StoreTransaction;
use crate::types::*;

/// Applies signed deltas to account balances
///
/// Never opens its own transaction: the delta lands in whatever unit of work
/// the caller passes in and becomes visible only when that unit commits.
#[derive(Debug, Clone, Copy, Default)]
pub struct BalanceUpdater;

impl BalanceUpdater {
    pub fn new() -> Self {
        Self
    }

    /// Add `delta` to the account balance and return the updated account
    ///
    /// The store performs the increment as a single statement, so no other
    /// unit can interleave between reading and writing the balance. A store
    /// check-constraint rejection surfaces as [`LedgerError::InsufficientFunds`].
    pub async fn apply_delta<T: StoreTransaction>(
        &self,
        tx: &mut T,
        account_id: i64,
        delta: i64,
    ) -> LedgerResult<Account> {
        match tx.add_account_balance(account_id, delta).await {
            Ok(account) => {
                debug!(account_id, delta, balance = account.balance, "balance updated");
                Ok(account)
            }
            Err(StoreError::CheckViolation(constraint)) => {
                debug!(account_id, delta, %constraint, "balance constraint rejected update");
                Err(LedgerError::InsufficientFunds {
                    account_id,
                    amount: delta.saturating_neg(),
                })
            }
            Err(e) => Err(e.into()),
        }
    }
}
