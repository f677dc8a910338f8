use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

const PRUNE_THRESHOLD: usize = 1024;

/// One async lock per key, created on first use
#[derive(Debug, Default)]
pub struct KeyedLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`
    pub async fn lock(&self, key: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock();
            if locks.len() > PRUNE_THRESHOLD {
                // Unheld locks are referenced only by the map
                locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            }
            locks.entry(key.to_string()).or_default().clone()
        };
        lock.lock_owned().await
    }

    /// Number of keys currently tracked
    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_key_is_exclusive() {
        let locks = Arc::new(KeyedLocks::new());
        let guard = locks.lock("cert-1").await;

        let contender = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.lock("cert-1").await;
            })
        };

        // Other keys are not blocked
        let _other = locks.lock("cert-2").await;

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(guard);
        contender.await.unwrap();
        assert_eq!(locks.len(), 2);
    }

    #[test]
    fn test_released_locks_are_pruned() {
        tokio_test::block_on(async {
            let locks = KeyedLocks::new();
            for i in 0..=PRUNE_THRESHOLD {
                drop(locks.lock(&format!("cert-{}", i)).await);
            }
            assert_eq!(locks.len(), PRUNE_THRESHOLD + 1);

            let _held = locks.lock("fresh").await;
            assert_eq!(locks.len(), 1);
        });
    }
}
