use rustc_hash::FxHashMap;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, trace};
use crate::types::ContentId;

#[derive(Clone, Debug)]
pub struct ReverseEntry {
    pub cid: ContentId,
    /// whether the substrate currently has a forwarding path for the CID
    pub forwarding: bool,
    /// a new FID was requested through an unpublish / publish cycle and has not arrived yet
    pub fid_requested: bool,
    pub last_accessed: Instant,
}

/// `rCID -> CID` for requests published by this node
#[derive(Default)]
pub struct ReverseLookup {
    entries: RwLock<FxHashMap<ContentId, ReverseEntry>>,
}

impl ReverseLookup {
    pub fn new() -> ReverseLookup {
        Default::default()
    }

    pub async fn add(&self, cid: &ContentId, rcid: &ContentId) {
        let mut entries = self.entries.write().await;
        match entries.get_mut(rcid) {
            Some(entry) => {
                entry.cid = cid.clone();
                entry.last_accessed = Instant::now();
            }
            None => {
                trace!("adding reverse lookup {} -> {}", rcid, cid);
                entries.insert(rcid.clone(), ReverseEntry {
                    cid: cid.clone(),
                    forwarding: true,
                    fid_requested: false,
                    last_accessed: Instant::now(),
                });
            }
        }
    }

    /// the CID for an rCID; refreshes the entry's access time
    pub async fn lookup(&self, rcid: &ContentId) -> Option<ContentId> {
        let mut entries = self.entries.write().await;
        let entry = entries.get_mut(rcid)?;
        entry.last_accessed = Instant::now();
        Some(entry.cid.clone())
    }

    pub async fn get(&self, rcid: &ContentId) -> Option<ReverseEntry> {
        self.entries.read().await.get(rcid).cloned()
    }

    /// sets the forwarding state for every rCID belonging to the CID; enabling forwarding ends a
    ///  pending FID request
    pub async fn set_forwarding(&self, cid: &ContentId, state: bool) {
        let mut entries = self.entries.write().await;
        for entry in entries.values_mut().filter(|e| &e.cid == cid) {
            entry.forwarding = state;
            if state {
                entry.fid_requested = false;
            }
        }
        debug!("forwarding state for CID {} set to {}", cid, state);
    }

    /// Marks a FID request as pending for the rCID's CID if it has no forwarding path and no
    ///  request is in flight yet. Returns the CID if the caller must trigger the request.
    pub async fn request_fid(&self, rcid: &ContentId) -> Option<ContentId> {
        let mut entries = self.entries.write().await;
        let Some(entry) = entries.get_mut(rcid) else {
            debug!("rCID {} is unknown - no FID request", rcid);
            return None;
        };

        if entry.fid_requested {
            trace!("FID for CID {} was requested already", entry.cid);
            return None;
        }
        if entry.forwarding {
            trace!("forwarding for CID {} is enabled - no FID required", entry.cid);
            return None;
        }

        entry.fid_requested = true;
        Some(entry.cid.clone())
    }

    pub async fn remove_idle(&self, threshold: Instant) -> Vec<ContentId> {
        let mut entries = self.entries.write().await;
        let idle = entries.iter()
            .filter(|(_, e)| e.last_accessed < threshold)
            .map(|(rcid, _)| rcid.clone())
            .collect::<Vec<_>>();
        for rcid in &idle {
            entries.remove(rcid);
        }
        idle
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}
