use std::collections::BTreeMap;
use bytes::Bytes;
use rustc_hash::FxHashMap;
use tokio::sync::RwLock;
use tokio::time::Instant;
use crate::fragmenter::reassemble;
use crate::types::{PeerStreamKey, SeqNo, StreamKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// same sequence number and length as a buffered fragment
    Duplicate,
    /// same sequence number but a different length - the newer fragment replaced the old one
    Replaced,
}

/// The receiving side's state for a single fragment stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowStatus {
    /// nothing is buffered for the stream
    Unknown,
    Complete,
    /// the envelope `[first, last]` of all missing sequence numbers
    Missing { first: SeqNo, last: SeqNo },
}

struct Entry {
    fragments: BTreeMap<SeqNo, Bytes>,
    last_update: Instant,
}

/// Fragments received per peer and stream, waiting to be reassembled
#[derive(Default)]
pub struct ReassemblyBuffer {
    entries: RwLock<FxHashMap<PeerStreamKey, Entry>>,
}

impl ReassemblyBuffer {
    pub fn new() -> ReassemblyBuffer {
        Default::default()
    }

    pub async fn insert(&self, key: &PeerStreamKey, seq: SeqNo, payload: Bytes) -> InsertOutcome {
        let mut entries = self.entries.write().await;
        let entry = entries.entry(key.clone())
            .or_insert_with(|| Entry {
                fragments: BTreeMap::new(),
                last_update: Instant::now(),
            });
        entry.last_update = Instant::now();

        match entry.fragments.get(&seq) {
            Some(existing) if existing.len() == payload.len() => InsertOutcome::Duplicate,
            Some(_) => {
                entry.fragments.insert(seq, payload);
                InsertOutcome::Replaced
            }
            None => {
                entry.fragments.insert(seq, payload);
                InsertOutcome::Inserted
            }
        }
    }

    /// Checks the buffered sequence numbers against a window ending with `last_seq`. All gaps
    ///  (including a missing start and a missing tail) are merged into a single envelope.
    pub async fn window_status(&self, key: &PeerStreamKey, last_seq: SeqNo) -> WindowStatus {
        let entries = self.entries.read().await;
        let Some(entry) = entries.get(key) else {
            return WindowStatus::Unknown;
        };
        missing_envelope(entry.fragments.keys().copied(), last_seq)
            .map(|(first, last)| WindowStatus::Missing { first, last })
            .unwrap_or(WindowStatus::Complete)
    }

    /// removes the stream's fragments, returning them concatenated in sequence order
    pub async fn take(&self, key: &PeerStreamKey) -> Option<Bytes> {
        let entry = self.entries.write().await.remove(key)?;
        Some(reassemble(entry.fragments.values()))
    }

    pub async fn contains(&self, key: &PeerStreamKey) -> bool {
        self.entries.read().await.contains_key(key)
    }

    /// drops the stream's fragments for every peer
    pub async fn remove_stream(&self, stream: &StreamKey) {
        self.entries.write().await
            .retain(|k, _| !(k.rcid == stream.rcid && k.nonce == stream.nonce && k.sk == stream.sk));
    }

    pub async fn remove_idle(&self, threshold: Instant) -> Vec<PeerStreamKey> {
        let mut entries = self.entries.write().await;
        let idle = entries.iter()
            .filter(|(_, e)| e.last_update < threshold)
            .map(|(k, _)| k.clone())
            .collect::<Vec<_>>();
        for key in &idle {
            entries.remove(key);
        }
        idle
    }

    pub async fn buffered_bytes(&self) -> usize {
        self.entries.read().await
            .values()
            .flat_map(|e| e.fragments.values())
            .map(|f| f.len())
            .sum()
    }
}

fn missing_envelope(buffered: impl Iterator<Item = SeqNo>, last_seq: SeqNo) -> Option<(SeqNo, SeqNo)> {
    let mut first_missing = None;
    let mut last_missing = None;
    let mut highest: SeqNo = 0;

    for seq in buffered {
        if seq > highest + 1 {
            first_missing.get_or_insert(highest + 1);
            last_missing = Some(seq - 1);
        }
        highest = seq;
    }

    if highest < last_seq {
        first_missing.get_or_insert(highest + 1);
        last_missing = Some(last_seq);
    }

    first_missing.zip(last_missing)
}
