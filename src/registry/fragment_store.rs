use std::collections::BTreeMap;
use bytes::Bytes;
use rustc_hash::FxHashMap;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::debug;
use crate::types::{SeqNo, StreamKey};

struct StoredFragment {
    frame: Bytes,
    stored_at: Instant,
}

/// Serialized DATA frames kept by the sending side for retransmission, keyed by stream and
///  sequence number. The sNAP keeps its responses here, the cNAP its requests (the 'proxy
///  buffer').
#[derive(Default)]
pub struct FragmentStore {
    streams: RwLock<FxHashMap<StreamKey, BTreeMap<SeqNo, StoredFragment>>>,
}

impl FragmentStore {
    pub fn new() -> FragmentStore {
        Default::default()
    }

    pub async fn insert(&self, key: &StreamKey, seq: SeqNo, frame: Bytes) {
        let mut streams = self.streams.write().await;
        streams.entry(key.clone())
            .or_default()
            .insert(seq, StoredFragment {
                frame,
                stored_at: Instant::now(),
            });
    }

    pub async fn get(&self, key: &StreamKey, seq: SeqNo) -> Option<Bytes> {
        self.streams.read().await
            .get(key)?
            .get(&seq)
            .map(|f| f.frame.clone())
    }

    /// Returns the frames for `start..=end` in ascending order, stopping at the first sequence
    ///  number that is not buffered.
    pub async fn range(&self, key: &StreamKey, start: SeqNo, end: SeqNo) -> Vec<(SeqNo, Bytes)> {
        let streams = self.streams.read().await;
        let Some(fragments) = streams.get(key) else {
            debug!("no buffered fragments for {:?}", key);
            return vec![];
        };

        let mut result = Vec::new();
        for seq in start..=end {
            match fragments.get(&seq) {
                Some(f) => result.push((seq, f.frame.clone())),
                None => {
                    debug!("fragment {} for {:?} is not buffered (anymore) - stopping retransmission", seq, key);
                    break;
                }
            }
        }
        result
    }

    pub async fn contains(&self, key: &StreamKey) -> bool {
        self.streams.read().await.contains_key(key)
    }

    pub async fn num_fragments(&self, key: &StreamKey) -> usize {
        self.streams.read().await
            .get(key)
            .map(|f| f.len())
            .unwrap_or(0)
    }

    pub async fn remove(&self, key: &StreamKey) -> bool {
        self.streams.write().await.remove(key).is_some()
    }

    /// removes every stream whose most recent fragment was stored before `threshold`, returning
    ///  the removed keys
    pub async fn remove_idle(&self, threshold: Instant) -> Vec<StreamKey> {
        let mut streams = self.streams.write().await;
        let idle = streams.iter()
            .filter(|(_, fragments)| fragments.values().all(|f| f.stored_at < threshold))
            .map(|(k, _)| k.clone())
            .collect::<Vec<_>>();
        for key in &idle {
            streams.remove(key);
        }
        idle
    }

    pub async fn buffered_bytes(&self) -> usize {
        self.streams.read().await
            .values()
            .flat_map(|fragments| fragments.values())
            .map(|f| f.frame.len())
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use rstest::rstest;
    use tokio::runtime::Builder;
    use crate::types::ContentId;

    fn key(sk: u16) -> StreamKey {
        StreamKey::new(&ContentId::new("/http/example.com"), 23, sk)
    }

    #[rstest]
    #[case::all(vec![1,2,3,4], 1, 4, vec![1,2,3,4])]
    #[case::middle(vec![1,2,3,4], 2, 3, vec![2,3])]
    #[case::single(vec![1,2,3,4], 3, 3, vec![3])]
    #[case::stop_at_gap(vec![1,2,4,5], 1, 5, vec![1,2])]
    #[case::starts_missing(vec![2,3], 1, 3, vec![])]
    #[case::beyond_end(vec![1,2], 2, 5, vec![2])]
    #[case::empty(vec![], 1, 2, vec![])]
    fn test_range(#[case] buffered: Vec<SeqNo>, #[case] start: SeqNo, #[case] end: SeqNo, #[case] expected: Vec<SeqNo>) {
        let rt = Builder::new_current_thread()
            .enable_all()
            .start_paused(true)
            .build().unwrap();
        rt.block_on(async move {
            let store = FragmentStore::new();
            for seq in buffered {
                store.insert(&key(1), seq, Bytes::from(vec![seq as u8])).await;
            }

            let actual = store.range(&key(1), start, end).await;
            assert_eq!(actual.iter().map(|(seq, _)| *seq).collect::<Vec<_>>(), expected);
            for (seq, frame) in actual {
                assert_eq!(frame.as_ref(), &[seq as u8]);
            }
        });
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_idle() {
        let store = FragmentStore::new();
        store.insert(&key(1), 1, Bytes::from_static(b"old")).await;
        tokio::time::advance(Duration::from_secs(10)).await;
        store.insert(&key(2), 1, Bytes::from_static(b"new")).await;
        store.insert(&key(1), 2, Bytes::from_static(b"refreshed")).await;
        store.insert(&key(3), 1, Bytes::from_static(b"stale")).await;
        tokio::time::advance(Duration::from_secs(10)).await;
        store.insert(&key(2), 2, Bytes::from_static(b"x")).await;

        let removed = store.remove_idle(Instant::now() - Duration::from_secs(5)).await;
        let mut removed = removed.into_iter().map(|k| k.sk).collect::<Vec<_>>();
        removed.sort();
        assert_eq!(removed, vec![1, 3]);
        assert!(store.contains(&key(2)).await);
        assert_eq!(store.buffered_bytes().await, 4);
    }
}
