use std::sync::Arc;
use bytes::Bytes;
use tokio::time::Instant;
use tracing::trace;
use crate::cmc::SharedCmcGroups;
use crate::config::LtpConfig;
use crate::frame::ControlFrame;
use crate::registry::ack_tracker::AckTracker;
use crate::registry::activity::ActivityFlags;
use crate::registry::fragment_store::FragmentStore;
use crate::registry::nack_groups::NackGroups;
use crate::registry::reassembly::ReassemblyBuffer;
use crate::registry::reverse_lookup::ReverseLookup;
use crate::rtt::RttEstimator;
use crate::statistics::Statistics;
use crate::substrate::IcnSubstrate;
use crate::types::{ContentId, NodeId, PeerStreamKey, StreamKey};

/// Everything the protocol's parts share: configuration, the substrate, the CMC handle and all
///  session registries
pub struct LtpContext {
    pub config: Arc<LtpConfig>,
    pub substrate: Arc<dyn IcnSubstrate>,
    pub cmc: SharedCmcGroups,
    pub rtt: RttEstimator,
    pub statistics: Statistics,

    /// fragments received, per peer
    pub reassembly: ReassemblyBuffer,
    /// responses published by this node (sNAP)
    pub retransmit_buffer: FragmentStore,
    /// requests published by this node (cNAP)
    pub proxy_buffer: FragmentStore,
    pub activity: ActivityFlags,
    pub nack_groups: NackGroups,
    pub reverse_lookup: ReverseLookup,

    /// WED for responses, per locked group member
    pub window_ended_responses: AckTracker<PeerStreamKey>,
    /// WED for requests, from the sNAP
    pub window_ended_requests: AckTracker<StreamKey>,
    pub window_updated: AckTracker<PeerStreamKey>,
    pub session_ended_responses: AckTracker<PeerStreamKey>,
    pub session_ended_requests: AckTracker<StreamKey>,
    /// rCIDs with an RST in flight; `true` once the RSTED arrived
    pub resetted: AckTracker<ContentId>,
}

impl LtpContext {
    pub fn new(config: Arc<LtpConfig>, substrate: Arc<dyn IcnSubstrate>, cmc: SharedCmcGroups) -> LtpContext {
        let rtt = RttEstimator::new(config.rtt_list_size, config.initial_rtt, config.rtt_multiplier);
        LtpContext {
            config,
            substrate,
            cmc,
            rtt,
            statistics: Statistics::new(),
            reassembly: ReassemblyBuffer::new(),
            retransmit_buffer: FragmentStore::new(),
            proxy_buffer: FragmentStore::new(),
            activity: ActivityFlags::new(),
            nack_groups: NackGroups::new(),
            reverse_lookup: ReverseLookup::new(),
            window_ended_responses: AckTracker::new(),
            window_ended_requests: AckTracker::new(),
            window_updated: AckTracker::new(),
            session_ended_responses: AckTracker::new(),
            session_ended_requests: AckTracker::new(),
            resetted: AckTracker::new(),
        }
    }

    /// deadline for the current attempt of a control message handshake
    pub fn attempt_deadline(&self) -> Instant {
        Instant::now() + self.rtt.timeout()
    }

    pub async fn publish_control(&self, rcid: &ContentId, nids: &[NodeId], frame: ControlFrame) {
        trace!("publishing {:?} under {} to {:?}", frame, rcid, nids);
        self.substrate.publish(rcid, nids, frame.to_bytes()).await;
    }

    pub async fn publish_control_reverse(&self, cid: &ContentId, rcid: &ContentId, frame: ControlFrame) {
        trace!("publishing {:?} under {} (reply to {})", frame, cid, rcid);
        self.substrate.publish_reverse(cid, rcid, frame.to_bytes()).await;
    }

    pub async fn publish_data(&self, rcid: &ContentId, nids: &[NodeId], frame: Bytes) {
        self.substrate.publish(rcid, nids, frame).await;
        self.statistics.fragment_published();
    }

    pub async fn publish_data_reverse(&self, cid: &ContentId, rcid: &ContentId, frame: Bytes) {
        self.substrate.publish_reverse(cid, rcid, frame).await;
        self.statistics.fragment_published();
    }

    /// resends a buffered fragment, which does not count as published again
    pub async fn republish_data(&self, rcid: &ContentId, nids: &[NodeId], frame: Bytes) {
        self.substrate.publish(rcid, nids, frame).await;
    }

    pub async fn republish_data_reverse(&self, cid: &ContentId, rcid: &ContentId, frame: Bytes) {
        self.substrate.publish_reverse(cid, rcid, frame).await;
    }

    /// purges all buffered state of a session once no publish is active for it anymore
    pub async fn clean_up_buffers(&self, key: &StreamKey) {
        trace!("cleaning up buffers for {:?}", key);
        self.activity.wait_idle(key).await;

        self.retransmit_buffer.remove(key).await;
        self.reassembly.remove_stream(key).await;
        self.proxy_buffer.remove(key).await;
        self.nack_groups.remove(key).await;
    }
}
