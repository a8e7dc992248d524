//! Co-incidental multicast (CMC) groups.
//!
//! When several cNAPs request the same content at roughly the same time, the sNAP answers all of
//!  them with a single multicast response. Requesting nodes are collected in a *potential* group
//!  as their request fragments arrive; when the response is published, the potential group is
//!  *locked* and the response's acknowledgements are required from every locked member.
//!
//! This state is owned by the HTTP layer, which reads it to decide on request suppression and
//!  seeds the per-node forwarding state. LTP accesses it through the [`SharedCmcGroups`] handle
//!  passed to [`crate::lightweight::Lightweight::initialise`].

use std::collections::hash_map::Entry;
use std::sync::Arc;
use rustc_hash::FxHashMap;
use tokio::sync::Mutex;
use tracing::{debug, trace};
use crate::types::{ContentId, NodeId, Nonce, SessionKey, StreamKey};

pub type SharedCmcGroups = Arc<Mutex<CmcGroups>>;

#[derive(Default, Debug)]
pub struct CmcGroups {
    /// (rCID, nonce) -> NID -> ready for response (WE received)
    potential: FxHashMap<(ContentId, Nonce), FxHashMap<NodeId, bool>>,
    locked: FxHashMap<StreamKey, Vec<NodeId>>,
    /// NID -> forwarding enabled
    known_nids: FxHashMap<NodeId, bool>,
}

impl CmcGroups {
    pub fn new() -> CmcGroups {
        Default::default()
    }

    pub fn new_shared() -> SharedCmcGroups {
        Arc::new(Mutex::new(CmcGroups::new()))
    }

    pub fn observe_fragment(&mut self, rcid: &ContentId, nonce: Nonce, nid: NodeId) {
        let group = self.potential.entry((rcid.clone(), nonce)).or_default();
        if let Entry::Vacant(e) = group.entry(nid) {
            trace!("adding {:?} to potential CMC group {} > {}", nid, rcid, nonce);
            e.insert(false);
        }
    }

    pub fn observe_window_end(&mut self, rcid: &ContentId, nonce: Nonce, nid: NodeId) {
        match self.potential.get_mut(&(rcid.clone(), nonce)).and_then(|g| g.get_mut(&nid)) {
            Some(ready) => *ready = true,
            None => debug!("{:?} is not in potential CMC group {} > {}", nid, rcid, nonce),
        }
    }

    /// number of nodes in the potential group that have sent their complete request
    pub fn enabled_count(&self, rcid: &ContentId, nonce: Nonce) -> usize {
        self.potential.get(&(rcid.clone(), nonce))
            .map(|g| g.values().filter(|ready| **ready).count())
            .unwrap_or(0)
    }

    pub fn potential_group(&self, rcid: &ContentId, nonce: Nonce) -> Vec<NodeId> {
        let mut nids = self.potential.get(&(rcid.clone(), nonce))
            .map(|g| g.keys().copied().collect::<Vec<_>>())
            .unwrap_or_default();
        nids.sort();
        nids
    }

    /// Turns the potential group for (rCID, nonce) into the locked group for the session.
    ///  Requests arriving after this start a new potential group.
    pub fn lock(&mut self, rcid: &ContentId, nonce: Nonce, sk: SessionKey) -> Vec<NodeId> {
        let mut nids = self.potential.remove(&(rcid.clone(), nonce))
            .map(|g| g.into_keys().collect::<Vec<_>>())
            .unwrap_or_default();
        nids.sort();

        debug!("locking CMC group {} > {} > {}: {:?}", rcid, nonce, sk, nids);
        self.locked.insert(StreamKey::new(rcid, nonce, sk), nids.clone());
        nids
    }

    pub fn locked_group(&self, key: &StreamKey) -> Option<Vec<NodeId>> {
        self.locked.get(key).cloned()
    }

    pub fn is_locked_group_empty(&self, key: &StreamKey) -> bool {
        self.locked.get(key)
            .map(|g| g.is_empty())
            .unwrap_or(true)
    }

    pub fn unlock(&mut self, key: &StreamKey) -> Option<Vec<NodeId>> {
        self.locked.remove(key)
    }

    /// Removes the node from every potential and locked group for the rCID, dropping groups that
    ///  become empty. Returns the keys of the locked groups the node was removed from.
    pub fn remove(&mut self, rcid: &ContentId, nid: NodeId) -> Vec<StreamKey> {
        self.potential.retain(|(r, _), group| {
            if r == rcid {
                group.remove(&nid);
                !group.is_empty()
            }
            else {
                true
            }
        });

        let mut affected = Vec::new();
        self.locked.retain(|key, group| {
            if &key.rcid != rcid {
                return true;
            }
            if let Some(pos) = group.iter().position(|n| *n == nid) {
                group.remove(pos);
                affected.push(key.clone());
            }
            !group.is_empty()
        });
        affected
    }

    /// evicts nodes from a locked group, e.g. because they stopped responding
    pub fn remove_nids(&mut self, key: &StreamKey, nids: &[NodeId]) {
        if let Some(group) = self.locked.get_mut(key) {
            group.retain(|n| !nids.contains(n));
        }
    }

    /// registers a node as known, initially without forwarding
    pub fn add_node(&mut self, nid: NodeId) {
        self.known_nids.entry(nid).or_insert(false);
    }

    pub fn set_forwarding(&mut self, nid: NodeId, state: bool) {
        self.known_nids.insert(nid, state);
    }

    pub fn forwarding_enabled(&self, nid: NodeId) -> bool {
        self.known_nids.get(&nid).copied().unwrap_or(false)
    }
}
