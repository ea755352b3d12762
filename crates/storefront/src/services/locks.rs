//! Per-order mutual exclusion.
//!
//! Every mutation of a single order runs while holding that order's lock.
//! Different orders never contend. Entries are weak, so a lock disappears
//! from the table once no task holds or waits on it.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use koi_core::OrderId;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Pruning runs when the table grows past this many entries.
const PRUNE_THRESHOLD: usize = 1024;

/// Table of async mutexes keyed by order id. Cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct OrderLocks {
    table: Arc<Mutex<HashMap<OrderId, Weak<Mutex<()>>>>>,
}

impl OrderLocks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `order_id`. Released when the guard drops.
    pub async fn lock(&self, order_id: OrderId) -> OwnedMutexGuard<()> {
        let mutex = {
            let mut table = self.table.lock().await;
            if let Some(existing) = table.get(&order_id).and_then(Weak::upgrade) {
                existing
            } else {
                if table.len() >= PRUNE_THRESHOLD {
                    table.retain(|_, entry| entry.strong_count() > 0);
                }
                let fresh = Arc::new(Mutex::new(()));
                table.insert(order_id, Arc::downgrade(&fresh));
                fresh
            }
        };
        mutex.lock_owned().await
    }

    /// Number of orders currently locked or awaited.
    #[cfg(test)]
    pub async fn active(&self) -> usize {
        self.table
            .lock()
            .await
            .values()
            .filter(|entry| entry.strong_count() > 0)
            .count()
    }
}
