use std::sync::{Mutex, MutexGuard};
use rustc_hash::FxHashSet;
use tokio::sync::Notify;
use tracing::trace;
use crate::types::StreamKey;

/// Session activity flags: a key is present while a publish is in flight for it. At most one
///  publish per key is active at any time.
#[derive(Default)]
pub struct ActivityFlags {
    active: Mutex<FxHashSet<StreamKey>>,
    changed: Notify,
}

/// Marks a key as active for as long as it lives. Dropping it (including when the owning future
///  is cancelled) clears the flag and wakes up waiters.
#[must_use]
pub struct ActiveGuard<'a> {
    flags: &'a ActivityFlags,
    key: StreamKey,
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        if self.flags.lock().remove(&self.key) {
            trace!("publish on {:?} is not active anymore", self.key);
            self.flags.changed.notify_waiters();
        }
    }
}

impl ActivityFlags {
    pub fn new() -> ActivityFlags {
        Default::default()
    }

    fn lock(&self) -> MutexGuard<'_, FxHashSet<StreamKey>> {
        self.active.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// waits until no other publish is active for the key, then marks it as active
    pub async fn acquire(&self, key: &StreamKey) -> ActiveGuard<'_> {
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let inserted = self.lock().insert(key.clone());
            if inserted {
                return ActiveGuard { flags: self, key: key.clone() };
            }

            trace!("waiting for active publish on {:?} to finish", key);
            notified.await;
        }
    }

    pub fn is_active(&self, key: &StreamKey) -> bool {
        self.lock().contains(key)
    }

    /// waits until no publish is active for the key, without acquiring it
    pub async fn wait_idle(&self, key: &StreamKey) {
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if !self.is_active(key) {
                return;
            }
            notified.await;
        }
    }
}
