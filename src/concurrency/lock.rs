//! Keyed exclusive sections with bounded waits.
//!
//! Every key maps to its own async mutex. Multi-key acquisitions always take
//! the keys in sorted order, so two callers locking overlapping sets can
//! never deadlock. Guards are released when the returned [`LockSet`] is
//! dropped, on every exit path.

use dashmap::DashMap;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::errors::ServiceError;

/// Resource a lock is taken on. Orders sort before products.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum LockKey {
    PurchaseOrder(Uuid),
    Product(Uuid),
}

impl fmt::Display for LockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockKey::PurchaseOrder(id) => write!(f, "purchase_order:{}", id),
            LockKey::Product(id) => write!(f, "product:{}", id),
        }
    }
}

type LockTable = DashMap<LockKey, Arc<AsyncMutex<()>>>;

/// Held locks. Dropping this releases all of them and forgets any mutex
/// nobody else is holding or waiting on.
#[derive(Debug)]
pub struct LockSet {
    keys: Vec<LockKey>,
    guards: Vec<OwnedMutexGuard<()>>,
    table: Arc<LockTable>,
}

impl LockSet {
    pub fn keys(&self) -> &[LockKey] {
        &self.keys
    }
}

impl Drop for LockSet {
    fn drop(&mut self) {
        // Guards keep their mutex alive, so they go first.
        self.guards.clear();
        for key in &self.keys {
            forget_idle(&self.table, key);
        }
    }
}

/// Removes the mutex for `key` when the table holds the only reference.
/// Waiters hold a clone, so a contended lock is never removed under them.
fn forget_idle(table: &LockTable, key: &LockKey) {
    table.remove_if(key, |_, lock| Arc::strong_count(lock) == 1);
}

#[derive(Debug, Default)]
pub struct LockManager {
    locks: Arc<LockTable>,
}

impl LockManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, key: LockKey) -> Arc<AsyncMutex<()>> {
        self.locks
            .entry(key)
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .value()
            .clone()
    }

    pub async fn acquire(&self, key: LockKey, timeout: Duration) -> Result<LockSet, ServiceError> {
        self.acquire_all([key], timeout).await
    }

    /// Acquires every key in canonical order, waiting at most `timeout` in
    /// total. On timeout the locks taken so far are released.
    pub async fn acquire_all<I>(&self, keys: I, timeout: Duration) -> Result<LockSet, ServiceError>
    where
        I: IntoIterator<Item = LockKey>,
    {
        let mut keys: Vec<LockKey> = keys.into_iter().collect();
        keys.sort_unstable();
        keys.dedup();

        let deadline = Instant::now() + timeout;
        let mut set = LockSet {
            keys: Vec::with_capacity(keys.len()),
            guards: Vec::with_capacity(keys.len()),
            table: Arc::clone(&self.locks),
        };
        for key in keys {
            let mutex = self.lock_for(key);
            match tokio::time::timeout_at(deadline, mutex.lock_owned()).await {
                Ok(guard) => {
                    set.keys.push(key);
                    set.guards.push(guard);
                }
                Err(_) => {
                    warn!(resource = %key, timeout_ms = timeout.as_millis() as u64, "Lock acquisition timed out");
                    forget_idle(&self.locks, &key);
                    // `set` drops here and releases what was taken so far.
                    return Err(ServiceError::LockTimeout {
                        resource: key.to_string(),
                        timeout,
                    });
                }
            }
        }

        debug!(count = set.keys.len(), "Locks acquired");
        Ok(set)
    }

    /// Number of keys currently tracked.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
