use std::sync::Arc;
use bytes::Bytes;
use tracing::{debug, info, span, trace, warn, Instrument, Level};
use crate::cleaner::spawn_cleaners;
use crate::cmc::SharedCmcGroups;
use crate::config::LtpConfig;
use crate::context::LtpContext;
use crate::frame::{ControlFrame, Frame};
use crate::receiver::{Origin, Receiver, WindowOutcome};
use crate::retransmit::Retransmitter;
use crate::sender::Sender;
use crate::session::Sessions;
use crate::statistics::StatisticsSnapshot;
use crate::substrate::IcnSubstrate;
use crate::timeout::{await_request_window_ended, spawn_request_window_ended};
use crate::types::{ContentId, NodeId, Nonce, SessionKey, StreamKey, TransportState};

/// The transport's entry point for the HTTP layer: outbound publishing on one side, inbound
///  frame dispatch on the other. A single instance serves both roles of a NAP, i.e. requests
///  it forwards as cNAP and responses it publishes as sNAP.
pub struct Lightweight {
    ctx: Arc<LtpContext>,
    sender: Sender,
    receiver: Receiver,
    retransmitter: Retransmitter,
    sessions: Sessions,
}

impl Lightweight {
    pub fn initialise(config: LtpConfig, substrate: Arc<dyn IcnSubstrate>, cmc: SharedCmcGroups) -> anyhow::Result<Arc<Lightweight>> {
        config.validate()?;
        info!("initialising LTP for node {:?}", config.local_node_id);

        let ctx = Arc::new(LtpContext::new(Arc::new(config), substrate, cmc));
        spawn_cleaners(&ctx);

        Ok(Arc::new(Lightweight {
            sender: Sender::new(ctx.clone()),
            receiver: Receiver::new(ctx.clone()),
            retransmitter: Retransmitter::new(ctx.clone()),
            sessions: Sessions::new(ctx.clone()),
            ctx,
        }))
    }

    /// Publishes a response to the members of a locked CMC group and returns once they all have
    ///  confirmed it or the retries are exhausted
    pub async fn send(&self, rcid: &ContentId, nonce: Nonce, sk: SessionKey, targets: &[NodeId], payload: Bytes) {
        self.sender.send(rcid, nonce, sk, targets, payload).await
    }

    /// Publishes a request and waits for the sNAP's confirmation
    pub async fn publish(&self, cid: &ContentId, rcid: &ContentId, nonce: Nonce, sk: SessionKey, payload: Bytes) {
        let Some(last_seq) = self.sender.publish_request(cid, rcid, nonce, sk, &payload).await else {
            return;
        };
        await_request_window_ended(&self.ctx, cid, &StreamKey::new(rcid, nonce, sk), last_seq).await;
    }

    /// Publishes a request, leaving the confirmation handshake to a background task
    pub async fn publish_from_buffer(&self, cid: &ContentId, rcid: &ContentId, nonce: Nonce, sk: SessionKey, payload: Bytes) {
        let Some(last_seq) = self.sender.publish_request(cid, rcid, nonce, sk, &payload).await else {
            return;
        };
        spawn_request_window_ended(self.ctx.clone(), cid.clone(), StreamKey::new(rcid, nonce, sk), last_seq);
    }

    /// sNAP: ends a multicast session with its locked group
    pub async fn publish_end_of_session(&self, rcid: &ContentId, nonce: Nonce, sk: SessionKey) {
        self.sessions.end_session(rcid, nonce, sk).await
    }

    /// cNAP: ends a session towards the sNAP behind `cid`
    pub async fn publish_end_of_session_unicast(&self, cid: &ContentId, rcid: &ContentId, sk: SessionKey) {
        self.sessions.end_session_unicast(cid, rcid, sk).await
    }

    pub async fn publish_reset(&self, cid: &ContentId, rcid: &ContentId) {
        self.sessions.reset(cid, rcid).await
    }

    /// cNAP: a frame published by an sNAP under `rcid`
    pub async fn handle(&self, rcid: &ContentId, mut packet: Bytes) -> TransportState {
        let span = span!(Level::TRACE, "ltp_frame", rcid = %rcid);
        let frame = match Frame::deser(&mut packet) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("received unparseable frame under {}: {}", rcid, e);
                return TransportState::NoActionRequired;
            }
        };
        self.dispatch_from_publisher(rcid, frame).instrument(span).await
    }

    async fn dispatch_from_publisher(&self, rcid: &ContentId, frame: Frame) -> TransportState {
        let frame = match frame {
            Frame::Data(data) => {
                trace!("received fragment {} for {} > {} > {}", data.seq, rcid, data.nonce, data.sk);
                self.receiver.on_data(rcid, Origin::Publisher, data).await;
                return TransportState::FragmentsOutstanding;
            }
            Frame::Control(control) => control,
        };

        trace!("received {:?}", frame);
        match frame {
            ControlFrame::WindowEnd { nonce, sk, seq } => {
                let outcome = self.receiver.on_window_end(rcid, Origin::Publisher, nonce, sk, seq).await;
                window_outcome_to_state(outcome, nonce, sk)
            }
            ControlFrame::Nack { nonce, sk, start, end } => {
                self.retransmitter.on_request_nack(rcid, nonce, sk, start, end).await;
                TransportState::NoActionRequired
            }
            ControlFrame::WindowEnded { nonce, sk } => {
                self.sender.on_request_window_ended(rcid, nonce, sk).await;
                TransportState::NoActionRequired
            }
            ControlFrame::WindowUpdate { nonce, sk } => {
                match self.ctx.reverse_lookup.lookup(rcid).await {
                    Some(cid) => self.ctx.publish_control_reverse(&cid, rcid, ControlFrame::WindowUpdated { nonce, sk }).await,
                    None => debug!("no CID known for rCID {} - not confirming WU", rcid),
                }
                TransportState::NoActionRequired
            }
            ControlFrame::SessionEnd { nonce, sk } => {
                self.sessions.on_session_end_from_publisher(rcid, nonce, sk).await;
                TransportState::SessionEnded { nonce, session_key: sk }
            }
            ControlFrame::SessionEnded { nonce, sk } => {
                self.sessions.on_session_ended_from_publisher(rcid, nonce, sk).await;
                TransportState::NoActionRequired
            }
            ControlFrame::Resetted => {
                self.sessions.on_resetted(rcid).await;
                TransportState::NoActionRequired
            }
            ControlFrame::WindowUpdated { .. } | ControlFrame::Reset => {
                debug!("{:?} is not expected from a publisher - ignoring", frame);
                TransportState::NoActionRequired
            }
        }
    }

    /// sNAP: a frame published by the cNAP with node id `nid` under `cid`, with `rcid` as the
    ///  implicit subscription for replies
    #[tracing::instrument(level = "trace", name = "ltp_frame", skip(self, packet))]
    pub async fn handle_from_node(&self, cid: &ContentId, rcid: &ContentId, nid: NodeId, mut packet: Bytes) -> TransportState {
        self.ctx.cmc.lock().await
            .add_node(nid);

        let frame = match Frame::deser(&mut packet) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("received unparseable frame from {:?} under {}: {}", nid, cid, e);
                return TransportState::NoActionRequired;
            }
        };

        let frame = match frame {
            Frame::Data(data) => {
                trace!("received fragment {} for {} > {} > {}", data.seq, rcid, data.nonce, data.sk);
                self.receiver.on_data(rcid, Origin::Node(nid), data).await;
                return TransportState::FragmentsOutstanding;
            }
            Frame::Control(control) => control,
        };

        trace!("received {:?}", frame);
        match frame {
            ControlFrame::WindowEnd { nonce, sk, seq } => {
                let outcome = self.receiver.on_window_end(rcid, Origin::Node(nid), nonce, sk, seq).await;
                window_outcome_to_state(outcome, nonce, sk)
            }
            ControlFrame::Nack { nonce, sk, start, end } => {
                self.retransmitter.on_response_nack(rcid, nid, nonce, sk, start, end).await;
                TransportState::NoActionRequired
            }
            ControlFrame::WindowEnded { nonce, sk } => {
                self.sender.on_window_ended(rcid, nid, nonce, sk).await;
                TransportState::NoActionRequired
            }
            ControlFrame::WindowUpdated { nonce, sk } => {
                if !self.ctx.window_updated.ack(&StreamKey::new(rcid, nonce, sk).for_peer(nid)).await {
                    trace!("WUD from {:?} is not awaited", nid);
                }
                TransportState::NoActionRequired
            }
            ControlFrame::SessionEnd { nonce, sk } => {
                self.sessions.on_session_end_from_node(rcid, nid, nonce, sk).await;
                TransportState::SessionEnded { nonce, session_key: sk }
            }
            ControlFrame::SessionEnded { nonce, sk } => {
                self.sessions.on_session_ended_from_node(rcid, nid, nonce, sk).await;
                TransportState::NoActionRequired
            }
            ControlFrame::Reset => {
                self.sessions.on_reset(rcid, nid).await;
                TransportState::NoActionRequired
            }
            ControlFrame::WindowUpdate { .. } | ControlFrame::Resetted => {
                debug!("{:?} is not expected from a subscriber - ignoring", frame);
                TransportState::NoActionRequired
            }
        }
    }

    /// Takes whatever is buffered for a stream out of the reassembly buffer. Responses received
    ///  by this node are buffered under its own node id.
    pub async fn retrieve_icn_packet(&self, rcid: &ContentId, nonce: Nonce, nid: NodeId, sk: SessionKey) -> Option<Bytes> {
        let origin = if nid == self.ctx.config.local_node_id { Origin::Publisher } else { Origin::Node(nid) };
        self.receiver.retrieve(rcid, origin, nonce, sk).await
    }

    pub async fn cid_lookup(&self, rcid: &ContentId) -> Option<ContentId> {
        self.ctx.reverse_lookup.lookup(rcid).await
    }

    pub async fn forwarding(&self, cid: &ContentId, state: bool) {
        self.ctx.reverse_lookup.set_forwarding(cid, state).await
    }

    pub async fn clean_up_buffers(&self, rcid: &ContentId, nonce: Nonce, sk: SessionKey) {
        self.ctx.clean_up_buffers(&StreamKey::new(rcid, nonce, sk)).await
    }

    pub async fn statistics(&self) -> StatisticsSnapshot {
        self.ctx.statistics.snapshot().await
    }
}

fn window_outcome_to_state(outcome: WindowOutcome, nonce: Nonce, sk: SessionKey) -> TransportState {
    match outcome {
        WindowOutcome::Complete(payload) => TransportState::AllFragmentsReceived { nonce, session_key: sk, payload },
        WindowOutcome::Incomplete => TransportState::FragmentsOutstanding,
        WindowOutcome::NothingBuffered => TransportState::NoActionRequired,
    }
}
