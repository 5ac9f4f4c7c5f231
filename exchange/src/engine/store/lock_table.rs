use std::collections::HashMap;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use super::{RowKey, StoreError};

/// Row-level exclusive locks keyed by `RowKey`.
///
/// A lock is held by a transaction id from acquisition until release.
/// Waiting is bounded: acquisition past the deadline fails with
/// `LockTimeout` and the caller rolls back.
#[derive(Debug, Default)]
pub struct LockTable {
    holders: Mutex<HashMap<RowKey, u64>>,
    released: Condvar,
}

impl LockTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires the lock for `txn_id`, waiting up to `wait`.
    ///
    /// Returns `Ok(true)` when newly acquired and `Ok(false)` when the
    /// transaction already holds it.
    pub fn acquire(&self, key: &RowKey, txn_id: u64, wait: Duration) -> Result<bool, StoreError> {
        let deadline = Instant::now() + wait;
        let mut holders = self.holders.lock().unwrap();
        loop {
            match holders.get(key).copied() {
                None => {
                    holders.insert(key.clone(), txn_id);
                    return Ok(true);
                }
                Some(holder) if holder == txn_id => return Ok(false),
                Some(_) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(StoreError::LockTimeout(key.clone()));
                    }
                    let (guard, _timeout) = self
                        .released
                        .wait_timeout(holders, deadline - now)
                        .unwrap();
                    holders = guard;
                }
            }
        }
    }

    pub fn release(&self, key: &RowKey, txn_id: u64) {
        let mut holders = self.holders.lock().unwrap();
        if holders.get(key).copied() == Some(txn_id) {
            holders.remove(key);
        }
        drop(holders);
        self.released.notify_all();
    }
}
