use std::sync::Arc;
use bytes::Bytes;
use tracing::{debug, trace, warn};
use crate::context::LtpContext;
use crate::frame::{ControlFrame, DataFrame};
use crate::registry::reassembly::{InsertOutcome, WindowStatus};
use crate::types::{ContentId, NodeId, Nonce, PeerStreamKey, SeqNo, SessionKey};

/// Where an inbound fragment stream comes from, which determines how replies are routed
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Origin {
    /// a cNAP sending a request; the reply goes to that node under the rCID
    Node(NodeId),
    /// the sNAP sending a response; the reply goes under the CID registered for the rCID
    Publisher,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WindowOutcome {
    Complete(Bytes),
    /// a NACK was sent for the missing fragments
    Incomplete,
    NothingBuffered,
}

pub struct Receiver {
    ctx: Arc<LtpContext>,
}

impl Receiver {
    pub fn new(ctx: Arc<LtpContext>) -> Receiver {
        Receiver { ctx }
    }

    fn peer_key(&self, rcid: &ContentId, origin: Origin, nonce: Nonce, sk: SessionKey) -> PeerStreamKey {
        let nid = match origin {
            Origin::Node(nid) => nid,
            Origin::Publisher => self.ctx.config.local_node_id,
        };
        PeerStreamKey { rcid: rcid.clone(), nonce, nid, sk }
    }

    pub async fn on_data(&self, rcid: &ContentId, origin: Origin, frame: DataFrame) {
        let key = self.peer_key(rcid, origin, frame.nonce, frame.sk);
        match self.ctx.reassembly.insert(&key, frame.seq, frame.payload).await {
            InsertOutcome::Inserted => trace!("buffered fragment {} for {:?}", frame.seq, key),
            InsertOutcome::Duplicate => trace!("duplicate fragment {} for {:?}", frame.seq, key),
            InsertOutcome::Replaced => warn!("fragment {} for {:?} was received with a different length - replacing it", frame.seq, key),
        }

        if let Origin::Node(nid) = origin {
            self.ctx.cmc.lock().await
                .observe_fragment(rcid, frame.nonce, nid);
        }
    }

    /// Checks the stream against the window end. A complete stream is reassembled and removed
    ///  from the buffer, and confirmed with a WED; gaps are reported in a single NACK.
    pub async fn on_window_end(&self, rcid: &ContentId, origin: Origin, nonce: Nonce, sk: SessionKey, last_seq: SeqNo) -> WindowOutcome {
        if let Origin::Node(nid) = origin {
            self.ctx.cmc.lock().await
                .observe_window_end(rcid, nonce, nid);
        }

        let key = self.peer_key(rcid, origin, nonce, sk);
        match self.ctx.reassembly.window_status(&key, last_seq).await {
            WindowStatus::Complete => {
                let Some(payload) = self.ctx.reassembly.take(&key).await else {
                    // removed concurrently, e.g. by a cleaner
                    self.reply(rcid, origin, ControlFrame::WindowEnded { nonce, sk }).await;
                    return WindowOutcome::NothingBuffered;
                };
                debug!("all {} fragments received for {:?}: {} bytes", last_seq, key, payload.len());
                self.reply(rcid, origin, ControlFrame::WindowEnded { nonce, sk }).await;
                WindowOutcome::Complete(payload)
            }
            WindowStatus::Missing { first, last } => {
                debug!("fragments {}..={} missing for {:?}", first, last, key);
                self.reply(rcid, origin, ControlFrame::Nack { nonce, sk, start: first, end: last }).await;
                WindowOutcome::Incomplete
            }
            WindowStatus::Unknown => {
                trace!("WE for {:?} without buffered fragments", key);
                self.reply(rcid, origin, ControlFrame::WindowEnded { nonce, sk }).await;
                WindowOutcome::NothingBuffered
            }
        }
    }

    /// takes a completely buffered packet out of the reassembly buffer
    pub async fn retrieve(&self, rcid: &ContentId, origin: Origin, nonce: Nonce, sk: SessionKey) -> Option<Bytes> {
        self.ctx.reassembly.take(&self.peer_key(rcid, origin, nonce, sk)).await
    }

    async fn reply(&self, rcid: &ContentId, origin: Origin, frame: ControlFrame) {
        match origin {
            Origin::Node(nid) => self.ctx.publish_control(rcid, &[nid], frame).await,
            Origin::Publisher => match self.ctx.reverse_lookup.lookup(rcid).await {
                Some(cid) => self.ctx.publish_control_reverse(&cid, rcid, frame).await,
                None => debug!("no CID known for rCID {} - dropping {:?}", rcid, frame),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::*;

    fn data(seq: SeqNo, payload: &[u8]) -> DataFrame {
        DataFrame { nonce: 1, sk: 7, seq, payload: Bytes::copy_from_slice(payload) }
    }

    #[tokio::test]
    async fn test_complete_window() {
        let (ctx, substrate, _) = test_context(test_config());
        let receiver = Receiver::new(ctx.clone());
        let origin = Origin::Node(NodeId(5));

        receiver.on_data(&rcid(), origin, data(2, b"world")).await;
        receiver.on_data(&rcid(), origin, data(1, b"hello ")).await;
        receiver.on_data(&rcid(), origin, data(1, b"hello ")).await;

        let outcome = receiver.on_window_end(&rcid(), origin, 1, 7, 2).await;
        assert_eq!(outcome, WindowOutcome::Complete(Bytes::from_static(b"hello world")));

        let published = substrate.published().await;
        assert_eq!(published, vec![Published::ToNodes {
            id: rcid(),
            nids: vec![NodeId(5)],
            frame: crate::frame::Frame::Control(ControlFrame::WindowEnded { nonce: 1, sk: 7 }),
        }]);
        assert!(receiver.retrieve(&rcid(), origin, 1, 7).await.is_none());

        let cmc = ctx.cmc.lock().await;
        assert_eq!(cmc.potential_group(&rcid(), 1), vec![NodeId(5)]);
        assert_eq!(cmc.enabled_count(&rcid(), 1), 1);
    }

    #[tokio::test]
    async fn test_gaps_are_nacked_as_one_envelope() {
        let (ctx, substrate, _) = test_context(test_config());
        let receiver = Receiver::new(ctx.clone());
        let origin = Origin::Node(NodeId(5));

        for seq in [1, 3, 5] {
            receiver.on_data(&rcid(), origin, data(seq, b"x")).await;
        }
        assert_eq!(receiver.on_window_end(&rcid(), origin, 1, 7, 6).await, WindowOutcome::Incomplete);
        assert_eq!(substrate.published_control().await, vec![ControlFrame::Nack { nonce: 1, sk: 7, start: 2, end: 6 }]);

        for seq in [2, 4, 6] {
            receiver.on_data(&rcid(), origin, data(seq, b"y")).await;
        }
        assert_eq!(receiver.on_window_end(&rcid(), origin, 1, 7, 6).await, WindowOutcome::Complete(Bytes::from_static(b"xyxyxy")));
    }

    #[tokio::test]
    async fn test_window_end_without_fragments() {
        let (ctx, substrate, _) = test_context(test_config());
        let receiver = Receiver::new(ctx.clone());

        assert_eq!(receiver.on_window_end(&rcid(), Origin::Node(NodeId(5)), 1, 7, 3).await, WindowOutcome::NothingBuffered);
        assert_eq!(substrate.published_control().await, vec![ControlFrame::WindowEnded { nonce: 1, sk: 7 }]);
    }

    #[tokio::test]
    async fn test_response_replies_go_to_cid() {
        let (ctx, substrate, _) = test_context(test_config());
        let receiver = Receiver::new(ctx.clone());
        ctx.reverse_lookup.add(&cid(), &rcid()).await;

        receiver.on_data(&rcid(), Origin::Publisher, data(2, b"b")).await;
        assert_eq!(receiver.on_window_end(&rcid(), Origin::Publisher, 1, 7, 2).await, WindowOutcome::Incomplete);

        let published = substrate.published().await;
        assert_eq!(published, vec![Published::Reverse {
            id: cid(),
            reverse_id: rcid(),
            frame: crate::frame::Frame::Control(ControlFrame::Nack { nonce: 1, sk: 7, start: 1, end: 1 }),
        }]);

        // responses are buffered under our own node id and do not touch CMC groups
        let local = PeerStreamKey { rcid: rcid(), nonce: 1, nid: NodeId(100), sk: 7 };
        assert!(ctx.reassembly.contains(&local).await);
        assert!(ctx.cmc.lock().await.potential_group(&rcid(), 1).is_empty());
    }

    #[tokio::test]
    async fn test_retrieve() {
        let (ctx, _, _) = test_context(test_config());
        let receiver = Receiver::new(ctx.clone());
        let origin = Origin::Node(NodeId(5));

        receiver.on_data(&rcid(), origin, data(1, b"ab")).await;
        receiver.on_data(&rcid(), origin, data(2, b"cd")).await;
        assert_eq!(receiver.retrieve(&rcid(), origin, 1, 7).await, Some(Bytes::from_static(b"abcd")));
        assert_eq!(receiver.retrieve(&rcid(), origin, 1, 7).await, None);
    }
}
