//! Per-key async lock with automatic cleanup using weak references.
//!
//! Serializes read-modify-write cycles against one ledger record while
//! letting operations on different records proceed in parallel.

use std::hash::Hash;
use std::sync::Arc;
use std::sync::Weak;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::sync::OwnedMutexGuard;

/// Guard returned by [`KeyedAsyncLock::lock`].
///
/// On drop, if this was the last holder of the underlying mutex, the
/// entry is removed from the map so the table never grows unbounded.
pub struct KeyedLockGuard<K>
where K: Hash + Eq + Clone
{
    guard: Option<OwnedMutexGuard<()>>,
    arc: Arc<Mutex<()>>,
    key: K,
    locks: Arc<DashMap<K, Weak<Mutex<()>>>>,
}

impl<K> Drop for KeyedLockGuard<K>
where K: Hash + Eq + Clone
{
    fn drop(&mut self) {
        drop(self.guard.take());
        // Only self.arc remains once every guard and waiter is gone.
        if Arc::strong_count(&self.arc) == 1 {
            self.locks.remove(&self.key);
        }
    }
}

/// A per-key async lock manager.
pub struct KeyedAsyncLock<K>
where K: Hash + Eq + Clone
{
    locks: Arc<DashMap<K, Weak<Mutex<()>>>>,
}

impl<K> KeyedAsyncLock<K>
where K: Hash + Eq + Clone
{
    pub fn new() -> Self {
        Self {
            locks: Arc::new(DashMap::new()),
        }
    }

    /// Acquire the lock for `key`, waiting behind other holders of the
    /// same key. Different keys never contend.
    pub async fn lock(&self, key: &K) -> KeyedLockGuard<K> {
        let arc = self.get_or_create(key);
        let arc_clone = Arc::clone(&arc);
        let guard = arc.lock_owned().await;

        KeyedLockGuard {
            guard: Some(guard),
            arc: arc_clone,
            key: key.clone(),
            locks: Arc::clone(&self.locks),
        }
    }

    fn get_or_create(&self, key: &K) -> Arc<Mutex<()>> {
        loop {
            match self.locks.entry(key.clone()) {
                dashmap::mapref::entry::Entry::Occupied(occupied) => {
                    if let Some(strong) = occupied.get().upgrade() {
                        return strong;
                    }
                    // Dead weak reference, drop it and retry.
                    occupied.remove();
                }
                dashmap::mapref::entry::Entry::Vacant(vacant) => {
                    let strong = Arc::new(Mutex::new(()));
                    vacant.insert(Arc::downgrade(&strong));
                    return strong;
                }
            }
        }
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

impl<K> Default for KeyedAsyncLock<K>
where K: Hash + Eq + Clone
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    use tokio::time::sleep;

    use super::*;

    #[tokio::test]
    async fn same_key_serializes() {
        let locks = Arc::new(KeyedAsyncLock::<String>::new());
        let counter = Arc::new(AtomicUsize::new(0));
        let mut handles = vec![];

        for _ in 0..10 {
            let locks = Arc::clone(&locks);
            let counter = Arc::clone(&counter);
            handles.push(tokio::spawn(async move {
                let _guard = locks.lock(&"SERVER_S1".to_string()).await;
                let val = counter.load(Ordering::SeqCst);
                sleep(Duration::from_millis(1)).await;
                counter.store(val + 1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        // Lost updates would show here if the lock did not serialize.
        assert_eq!(counter.load(Ordering::SeqCst), 10);
    }

    #[tokio::test]
    async fn different_keys_run_concurrently() {
        let locks = Arc::new(KeyedAsyncLock::<String>::new());
        let start = std::time::Instant::now();

        let mut handles = vec![];
        for i in 0..5 {
            let locks = Arc::clone(&locks);
            let key = format!("SERVER_S{i}");
            handles.push(tokio::spawn(async move {
                let _guard = locks.lock(&key).await;
                sleep(Duration::from_millis(50)).await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert!(
            start.elapsed() < Duration::from_millis(150),
            "independent keys should not serialize"
        );
    }

    #[tokio::test]
    async fn dropped_guards_clean_up_entries() {
        let locks = KeyedAsyncLock::<String>::new();

        {
            let _guard = locks.lock(&"SERVER_S1".to_string()).await;
        }

        assert!(locks.is_empty(), "entry should be removed on last drop");
    }
}
