use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use rustc_hash::FxHashMap;
use tokio::sync::RwLock;
use crate::types::ContentId;

/// Counters for monitoring the transport. Only the last RTT per CID is kept.
#[derive(Default)]
pub struct Statistics {
    rtt_per_cid: RwLock<FxHashMap<ContentId, Duration>>,
    rtt_samples: AtomicU64,
    fragments_published: AtomicU64,
    fragments_retransmitted: AtomicU64,
    retransmit_buffer_bytes: AtomicUsize,
    proxy_buffer_bytes: AtomicUsize,
    reassembly_buffer_bytes: AtomicUsize,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StatisticsSnapshot {
    pub rtt_per_cid: FxHashMap<ContentId, Duration>,
    pub rtt_samples: u64,
    /// first transmissions only, resent fragments are in `fragments_retransmitted`
    pub fragments_published: u64,
    pub fragments_retransmitted: u64,
    pub retransmit_buffer_bytes: usize,
    pub proxy_buffer_bytes: usize,
    pub reassembly_buffer_bytes: usize,
}

impl Statistics {
    pub fn new() -> Statistics {
        Default::default()
    }

    pub async fn round_trip_time(&self, cid: &ContentId, rtt: Duration) {
        self.rtt_per_cid.write().await.insert(cid.clone(), rtt);
        self.rtt_samples.fetch_add(1, Ordering::Relaxed);
    }

    pub fn fragment_published(&self) {
        self.fragments_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn fragments_retransmitted(&self, num: usize) {
        self.fragments_retransmitted.fetch_add(num as u64, Ordering::Relaxed);
    }

    pub fn buffer_sizes(&self, retransmit: usize, proxy: usize, reassembly: usize) {
        self.retransmit_buffer_bytes.store(retransmit, Ordering::Relaxed);
        self.proxy_buffer_bytes.store(proxy, Ordering::Relaxed);
        self.reassembly_buffer_bytes.store(reassembly, Ordering::Relaxed);
    }

    pub async fn snapshot(&self) -> StatisticsSnapshot {
        StatisticsSnapshot {
            rtt_per_cid: self.rtt_per_cid.read().await.clone(),
            rtt_samples: self.rtt_samples.load(Ordering::Relaxed),
            fragments_published: self.fragments_published.load(Ordering::Relaxed),
            fragments_retransmitted: self.fragments_retransmitted.load(Ordering::Relaxed),
            retransmit_buffer_bytes: self.retransmit_buffer_bytes.load(Ordering::Relaxed),
            proxy_buffer_bytes: self.proxy_buffer_bytes.load(Ordering::Relaxed),
            reassembly_buffer_bytes: self.reassembly_buffer_bytes.load(Ordering::Relaxed),
        }
    }
}
