use std::sync::Arc;
use tracing::{debug, trace};
use crate::context::LtpContext;
use crate::types::{ContentId, NodeId, Nonce, SeqNo, SessionKey, StreamKey};

/// Answers NACKs by resending buffered fragments
pub struct Retransmitter {
    ctx: Arc<LtpContext>,
}

impl Retransmitter {
    pub fn new(ctx: Arc<LtpContext>) -> Retransmitter {
        Retransmitter { ctx }
    }

    /// NACK from the sNAP for one of our requests: the fragments are resent from the proxy buffer
    pub async fn on_request_nack(&self, rcid: &ContentId, nonce: Nonce, sk: SessionKey, start: SeqNo, end: SeqNo) {
        let key = StreamKey::new(rcid, nonce, sk);
        let Some(cid) = self.ctx.reverse_lookup.lookup(rcid).await else {
            debug!("received NACK for unknown rCID {} - ignoring", rcid);
            return;
        };

        let frames = self.ctx.proxy_buffer.range(&key, start, end).await;
        debug!("resending {} fragments ({}..={}) for {:?}", frames.len(), start, end, key);
        for (_, frame) in &frames {
            self.ctx.republish_data_reverse(&cid, rcid, frame.clone()).await;
        }
        self.ctx.statistics.fragments_retransmitted(frames.len());
    }

    /// NACK from a member of a multicast group. NACKs are collected until every member of the
    ///  locked group has either confirmed the window or reported missing fragments; the merged
    ///  range is then resent once to the reporting members.
    pub async fn on_response_nack(&self, rcid: &ContentId, nid: NodeId, nonce: Nonce, sk: SessionKey, start: SeqNo, end: SeqNo) {
        let key = StreamKey::new(rcid, nonce, sk);
        let Some(locked) = self.ctx.cmc.lock().await.locked_group(&key) else {
            debug!("NACK from {:?} for {:?} without locked CMC group - ignoring", nid, key);
            self.ctx.nack_groups.remove(&key).await;
            return;
        };
        if !locked.contains(&nid) {
            debug!("NACK from {:?} for {:?}, which is not in the locked CMC group - ignoring", nid, key);
            return;
        }

        // members may have left the group (WU eviction, RST) since they reported
        let group = self.ctx.nack_groups.merge(&key, nid, start, end).await;
        let reporting = group.nids.iter()
            .filter(|n| locked.contains(n))
            .copied()
            .collect::<Vec<_>>();

        let peer_keys = locked.iter().map(|n| key.for_peer(*n)).collect::<Vec<_>>();
        let unconfirmed = self.ctx.window_ended_responses.outstanding(&peer_keys).await.len();
        let confirmed = locked.len() - unconfirmed;

        if locked.len() > confirmed + reporting.len() {
            trace!("NACK group for {:?} has {} of {} members - waiting for more reports", key, reporting.len(), locked.len() - confirmed);
            return;
        }

        let frames = self.ctx.retransmit_buffer.range(&key, group.start, group.end).await;
        debug!("resending {} fragments ({}..={}) for {:?} to {:?}", frames.len(), group.start, group.end, key, reporting);
        for (_, frame) in &frames {
            self.ctx.republish_data(rcid, &reporting, frame.clone()).await;
        }
        self.ctx.statistics.fragments_retransmitted(frames.len());
        self.ctx.nack_groups.remove(&key).await;
    }
}
