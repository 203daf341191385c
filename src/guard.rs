//! Per-key mutual exclusion with lazy eviction.
//!
//! Used to serialize channel provisioning per joining user: two
//! near-simultaneous hub joins by the same user must not race into creating
//! two channels.  Entries are evicted a while after release so the table
//! stays bounded by recently-active keys rather than every user ever seen.

use std::{
    collections::HashMap,
    hash::Hash,
    sync::{Arc, Mutex as StdMutex},
    time::Duration,
};
use tokio::sync::{Mutex, OwnedMutexGuard};

pub struct GuardTable<K> {
    entries: Arc<StdMutex<HashMap<K, Arc<Mutex<()>>>>>,
}

impl<K> GuardTable<K>
where
    K: Eq + Hash + Clone + Send + 'static,
{
    pub fn new() -> Self {
        Self {
            entries: Arc::new(StdMutex::new(HashMap::new())),
        }
    }

    /// Waits until the caller holds the exclusive section for `key`.
    pub async fn acquire(&self, key: K) -> OwnedMutexGuard<()> {
        let entry = {
            let mut entries = self.entries.lock().unwrap();
            entries.entry(key).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
        };

        entry.lock_owned().await
    }

    /// Schedules removal of `key` once `ttl` has elapsed, unless the guard is
    /// held at that moment.  A held guard is left in place; its next release
    /// schedules eviction again.
    pub fn evict_after(&self, key: K, ttl: Duration) {
        let entries = Arc::clone(&self.entries);
        tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            let mut entries = entries.lock().unwrap();
            let in_use = match entries.get(&key) {
                Some(entry) => entry.try_lock().is_err(),
                None => return,
            };
            if !in_use {
                entries.remove(&key);
            }
        });
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acquire_is_mutually_exclusive_per_key() {
        let table = Arc::new(GuardTable::new());
        let order = Arc::new(StdMutex::new(Vec::new()));

        let first = table.acquire(1u64).await;

        let table2 = Arc::clone(&table);
        let order2 = Arc::clone(&order);
        let contender = tokio::spawn(async move {
            let _guard = table2.acquire(1u64).await;
            order2.lock().unwrap().push("second");
        });

        tokio::task::yield_now().await;
        order.lock().unwrap().push("first");
        drop(first);

        contender.await.unwrap();
        assert_eq!(*order.lock().unwrap(), vec!["first", "second"]);
    }

    #[tokio::test]
    async fn distinct_keys_do_not_contend() {
        let table = GuardTable::new();
        let a = table.acquire(1u64).await;
        let b = table.acquire(2u64).await;
        drop(a);
        drop(b);
        assert_eq!(table.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn released_entries_are_evicted_after_ttl() {
        let table = GuardTable::new();
        let guard = table.acquire(1u64).await;
        drop(guard);

        table.evict_after(1u64, Duration::from_secs(60));
        tokio::time::sleep(Duration::from_secs(61)).await;
        tokio::task::yield_now().await;

        assert_eq!(table.len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn held_entries_survive_eviction() {
        let table = GuardTable::new();
        let guard = table.acquire(1u64).await;

        table.evict_after(1u64, Duration::from_secs(60));
        tokio::time::sleep(Duration::from_secs(61)).await;
        tokio::task::yield_now().await;

        assert_eq!(table.len(), 1);
        drop(guard);
    }
}
