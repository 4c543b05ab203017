//! Deadlock-free acquisition of the account rows a transfer touches
//!
//! Two units of work that both need rows `a` and `b` always take them in
//! ascending id order, so neither can hold one row while waiting for a row
//! the other holds. The order depends only on the ids, never on which
//! account is the source and which the destination.

use tracing::trace;

use crate::traits::StoreTransaction;
use crate::types::*;

/// The ascending sequence in which a pair of account rows is locked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockOrder {
    first: i64,
    second: Option<i64>,
}

impl LockOrder {
    /// Order for two accounts; the same id twice yields a single lock
    pub fn for_pair(a: i64, b: i64) -> Self {
        match a.cmp(&b) {
            std::cmp::Ordering::Less => Self {
                first: a,
                second: Some(b),
            },
            std::cmp::Ordering::Greater => Self {
                first: b,
                second: Some(a),
            },
            std::cmp::Ordering::Equal => Self {
                first: a,
                second: None,
            },
        }
    }

    /// Ids in acquisition order
    pub fn ids(&self) -> impl Iterator<Item = i64> {
        std::iter::once(self.first).chain(self.second)
    }

    /// Lock every row in order and return the locked snapshots
    pub async fn acquire<T: StoreTransaction>(&self, tx: &mut T) -> StoreResult<LockedAccounts> {
        let mut locked = Vec::with_capacity(2);
        for id in self.ids() {
            trace!(account_id = id, "locking account row");
            locked.push(tx.lock_account(id).await?);
        }
        Ok(LockedAccounts(locked))
    }
}

/// Account snapshots taken under the row locks of one unit of work
#[derive(Debug, Clone)]
pub struct LockedAccounts(Vec<Account>);

impl LockedAccounts {
    /// Snapshot of a locked account by id
    pub fn get(&self, account_id: i64) -> Option<&Account> {
        self.0.iter().find(|a| a.id == account_id)
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.0.len()
    }
}
