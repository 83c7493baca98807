use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Entries beyond this count trigger a prune of idle locks.
const PRUNE_THRESHOLD: usize = 1024;

/// Per-payment mutual exclusion.
///
/// Operations on one payment are serialized; different payments never contend
/// beyond the brief registry lookup.
#[derive(Default, Clone)]
pub struct PaymentLocks {
    locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl PaymentLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, payment_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            if locks.len() > PRUNE_THRESHOLD {
                // only the registry holds idle locks
                locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            }
            locks
                .entry(payment_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}
