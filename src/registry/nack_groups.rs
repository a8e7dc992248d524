use rustc_hash::FxHashMap;
use tokio::sync::RwLock;
use crate::types::{NodeId, SeqNo, StreamKey};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NackGroup {
    pub start: SeqNo,
    pub end: SeqNo,
    pub nids: Vec<NodeId>,
}

/// Collects the NACKs of all members of a multicast group so that missing fragments are resent
///  once per group rather than once per subscriber
#[derive(Default)]
pub struct NackGroups {
    groups: RwLock<FxHashMap<StreamKey, NackGroup>>,
}

impl NackGroups {
    pub fn new() -> NackGroups {
        Default::default()
    }

    /// merges the reported range and node into the stream's group, returning the merged group
    pub async fn merge(&self, key: &StreamKey, nid: NodeId, start: SeqNo, end: SeqNo) -> NackGroup {
        let mut groups = self.groups.write().await;
        let group = groups.entry(key.clone())
            .or_insert_with(|| NackGroup {
                start,
                end,
                nids: vec![],
            });

        if !group.nids.contains(&nid) {
            group.nids.push(nid);
        }
        group.start = group.start.min(start);
        group.end = group.end.max(end);
        group.clone()
    }

    pub async fn remove(&self, key: &StreamKey) -> Option<NackGroup> {
        self.groups.write().await.remove(key)
    }

    pub async fn get(&self, key: &StreamKey) -> Option<NackGroup> {
        self.groups.read().await.get(key).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ContentId;

    #[tokio::test]
    async fn test_merge() {
        let groups = NackGroups::new();
        let key = StreamKey::new(&ContentId::new("r"), 1, 2);

        assert_eq!(groups.merge(&key, NodeId(1), 4, 6).await, NackGroup { start: 4, end: 6, nids: vec![NodeId(1)] });
        assert_eq!(groups.merge(&key, NodeId(2), 2, 5).await, NackGroup { start: 2, end: 6, nids: vec![NodeId(1), NodeId(2)] });
        assert_eq!(groups.merge(&key, NodeId(1), 5, 9).await, NackGroup { start: 2, end: 9, nids: vec![NodeId(1), NodeId(2)] });

        assert!(groups.remove(&key).await.is_some());
        assert_eq!(groups.get(&key).await, None);
    }
}
