use std::hash::Hash;
use rustc_hash::FxHashMap;
use tokio::sync::{Notify, RwLock};
use tokio::time::{self, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckWait {
    Acked,
    TimedOut,
    /// at least one of the awaited keys was removed, e.g. by a reset or a cleaner
    Vanished,
}

/// Tracks pending acknowledgements (WED, WUD, SED, RSTED) as `key -> received` and wakes up
///  waiters whenever an acknowledgement arrives.
pub struct AckTracker<K> {
    acks: RwLock<FxHashMap<K, bool>>,
    changed: Notify,
}

impl<K> Default for AckTracker<K> {
    fn default() -> Self {
        AckTracker {
            acks: RwLock::new(FxHashMap::default()),
            changed: Notify::new(),
        }
    }
}

impl<K: Eq + Hash + Clone + Send + Sync> AckTracker<K> {
    pub fn new() -> AckTracker<K> {
        Default::default()
    }

    /// (re-)registers the keys as pending
    pub async fn expect(&self, keys: impl IntoIterator<Item = K>) {
        let mut acks = self.acks.write().await;
        for key in keys {
            acks.insert(key, false);
        }
    }

    /// registers the key as pending unless it is tracked already. Returns `true` if it was added.
    pub async fn expect_new(&self, key: K) -> bool {
        let mut acks = self.acks.write().await;
        if acks.contains_key(&key) {
            return false;
        }
        acks.insert(key, false);
        true
    }

    /// marks the key as acknowledged, returning `false` if nobody waits for it
    pub async fn ack(&self, key: &K) -> bool {
        let found = match self.acks.write().await.get_mut(key) {
            Some(received) => {
                *received = true;
                true
            }
            None => false,
        };
        if found {
            self.changed.notify_waiters();
        }
        found
    }

    pub async fn is_acked(&self, key: &K) -> Option<bool> {
        self.acks.read().await.get(key).copied()
    }

    pub async fn contains(&self, key: &K) -> bool {
        self.acks.read().await.contains_key(key)
    }

    /// the subset of `keys` that is tracked and not acknowledged yet
    pub async fn outstanding(&self, keys: &[K]) -> Vec<K> {
        let acks = self.acks.read().await;
        keys.iter()
            .filter(|k| acks.get(*k) == Some(&false))
            .cloned()
            .collect()
    }

    pub async fn all_acked(&self) -> bool {
        self.acks.read().await.values().all(|received| *received)
    }

    pub async fn remove(&self, keys: &[K]) {
        let mut acks = self.acks.write().await;
        for key in keys {
            acks.remove(key);
        }
        drop(acks);
        self.changed.notify_waiters();
    }

    pub async fn retain(&self, mut f: impl FnMut(&K) -> bool) {
        self.acks.write().await.retain(|k, _| f(k));
        self.changed.notify_waiters();
    }

    pub async fn len(&self) -> usize {
        self.acks.read().await.len()
    }

    fn status(acks: &FxHashMap<K, bool>, keys: &[K]) -> Option<AckWait> {
        let mut all_acked = true;
        for key in keys {
            match acks.get(key) {
                None => return Some(AckWait::Vanished),
                Some(false) => all_acked = false,
                Some(true) => {}
            }
        }
        if all_acked { Some(AckWait::Acked) } else { None }
    }

    /// waits until every key is acknowledged, one of them disappears or the deadline passes
    pub async fn wait_for_all(&self, keys: &[K], deadline: Instant) -> AckWait {
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(result) = Self::status(&*self.acks.read().await, keys) {
                return result;
            }

            if time::timeout_at(deadline, notified).await.is_err() {
                return Self::status(&*self.acks.read().await, keys)
                    .unwrap_or(AckWait::TimedOut);
            }
        }
    }
}
