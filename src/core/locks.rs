use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Async mutexes handed out per key, e.g. one per portfolio owner.
///
/// Idle keys are pruned lazily once the table grows past a threshold.
#[derive(Default)]
pub struct KeyedLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

const PRUNE_THRESHOLD: usize = 1024;

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, key: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            if locks.len() > PRUNE_THRESHOLD {
                locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            }
            Arc::clone(locks.entry(key.to_string()).or_default())
        };
        lock.lock_owned().await
    }

    /// Locks two keys in a stable order so that opposite-direction callers
    /// cannot deadlock. Locking the same key twice yields a single guard.
    pub async fn lock_pair(&self, a: &str, b: &str) -> Vec<OwnedMutexGuard<()>> {
        if a == b {
            return vec![self.lock(a).await];
        }
        let (first, second) = if a < b { (a, b) } else { (b, a) };
        let first = self.lock(first).await;
        let second = self.lock(second).await;
        vec![first, second]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_key_is_exclusive() {
        let locks = Arc::new(KeyedLocks::new());
        let guard = locks.lock("alice").await;

        let contender = {
            let locks = Arc::clone(&locks);
            tokio::spawn(async move {
                let _guard = locks.lock("alice").await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(guard);
        contender.await.unwrap();
    }

    #[tokio::test]
    async fn test_different_keys_do_not_block() {
        let locks = KeyedLocks::new();
        let _alice = locks.lock("alice").await;
        let bob = tokio::time::timeout(Duration::from_millis(50), locks.lock("bob")).await;
        assert!(bob.is_ok());
    }

    #[tokio::test]
    async fn test_lock_pair_in_both_directions() {
        let locks = Arc::new(KeyedLocks::new());
        let forward = {
            let locks = Arc::clone(&locks);
            tokio::spawn(async move {
                for _ in 0..50 {
                    let _guards = locks.lock_pair("alice", "bob").await;
                }
            })
        };
        let backward = {
            let locks = Arc::clone(&locks);
            tokio::spawn(async move {
                for _ in 0..50 {
                    let _guards = locks.lock_pair("bob", "alice").await;
                }
            })
        };
        let both = tokio::time::timeout(Duration::from_secs(5), async {
            forward.await.unwrap();
            backward.await.unwrap();
        })
        .await;
        assert!(both.is_ok());
        assert_eq!(locks.lock_pair("carol", "carol").await.len(), 1);
    }
}
