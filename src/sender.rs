use std::sync::Arc;
use bytes::Bytes;
use tokio::time::{self, Instant};
use tracing::{debug, error, trace, warn};
use crate::context::LtpContext;
use crate::fragmenter::fragment;
use crate::frame::{ControlFrame, DataFrame};
use crate::registry::ack_tracker::AckWait;
use crate::types::{ContentId, NodeId, Nonce, PeerStreamKey, SeqNo, SessionKey, StreamKey};

/// Publishes fragmented payloads: responses to a locked CMC group under credit-based flow
///  control, and requests to the sNAP behind a CID.
pub struct Sender {
    ctx: Arc<LtpContext>,
}

impl Sender {
    pub fn new(ctx: Arc<LtpContext>) -> Sender {
        Sender { ctx }
    }

    /// Publishes a response to `targets` and waits until every target has confirmed the window
    ///  or the retries are exhausted. Only one `send` per session key is active at a time;
    ///  concurrent calls for the same key wait for their turn.
    ///
    /// NB: This function does not return Result because all retry / recovery handling is
    ///      expected to be done here. Fragments stay buffered for late NACKs until the WED
    ///      handshake completes or the buffer cleaner reclaims them. Dropping the future
    ///      before it completes releases the session for the next `send`.
    pub async fn send(&self, rcid: &ContentId, nonce: Nonce, sk: SessionKey, targets: &[NodeId], payload: Bytes) {
        let key = StreamKey::new(rcid, nonce, sk);
        let frames = match fragment(&payload, self.ctx.config.max_fragment_payload(rcid.len()), nonce, sk) {
            Ok(frames) => frames,
            Err(e) => {
                error!("not sending {} bytes for {:?} (rCID length {}): {}", payload.len(), key, rcid.len(), e);
                return;
            }
        };
        if targets.is_empty() {
            debug!("no subscribers for {:?} - nothing to send", key);
            return;
        }

        let _active = self.ctx.activity.acquire(&key).await;
        debug!("sending {} bytes in {} fragments for {:?} to {:?}", payload.len(), frames.len(), key, targets);

        let mut targets = targets.to_vec();
        let mut credit = self.ctx.config.initial_credit;
        for frame in &frames {
            if credit == 0 {
                targets = self.window_update(&key, &targets).await;
                credit = self.ctx.config.initial_credit;

                if targets.is_empty() {
                    warn!("all subscribers of {:?} stopped responding - aborting after fragment {}", key, frame.seq - 1);
                    return;
                }
            }

            let buf = frame.to_bytes();
            self.ctx.retransmit_buffer.insert(&key, frame.seq, buf.clone()).await;
            self.ctx.publish_data(rcid, &targets, buf).await;
            credit -= 1;
        }

        let last_seq = frames.last().map(|f| f.seq).unwrap_or(0);
        self.window_end(&key, &targets, last_seq).await;
    }

    /// Runs a WU / WUD exchange with all targets, returning the targets that confirmed. Targets
    ///  that never confirm are evicted from the locked CMC group.
    async fn window_update(&self, key: &StreamKey, targets: &[NodeId]) -> Vec<NodeId> {
        let peer_keys = targets.iter().map(|nid| key.for_peer(*nid)).collect::<Vec<_>>();
        self.ctx.window_updated.expect(peer_keys.clone()).await;

        let frame = ControlFrame::WindowUpdate { nonce: key.nonce, sk: key.sk };
        for attempt in 1..=self.ctx.config.max_retries {
            let outstanding = to_nids(self.ctx.window_updated.outstanding(&peer_keys).await);
            trace!("WU attempt {} for {:?} to {:?}", attempt, key, outstanding);
            self.ctx.publish_control(&key.rcid, &outstanding, frame.clone()).await;

            match self.ctx.window_updated.wait_for_all(&peer_keys, self.ctx.attempt_deadline()).await {
                AckWait::Acked | AckWait::Vanished => break,
                AckWait::TimedOut => {}
            }
        }

        let unresponsive = to_nids(self.ctx.window_updated.outstanding(&peer_keys).await);
        self.ctx.window_updated.remove(&peer_keys).await;

        if !unresponsive.is_empty() {
            warn!("{:?} did not confirm WU for {:?} after {} attempts - removing from CMC group", unresponsive, key, self.ctx.config.max_retries);
            self.ctx.cmc.lock().await
                .remove_nids(key, &unresponsive);
        }

        targets.iter()
            .filter(|nid| !unresponsive.contains(nid))
            .copied()
            .collect()
    }

    async fn window_end(&self, key: &StreamKey, targets: &[NodeId], last_seq: SeqNo) {
        let peer_keys = targets.iter().map(|nid| key.for_peer(*nid)).collect::<Vec<_>>();
        self.ctx.window_ended_responses.expect(peer_keys.clone()).await;

        let frame = ControlFrame::WindowEnd { nonce: key.nonce, sk: key.sk, seq: last_seq };
        let start = Instant::now();
        for attempt in 1..=self.ctx.config.max_retries {
            let outstanding = to_nids(self.ctx.window_ended_responses.outstanding(&peer_keys).await);
            trace!("WE attempt {} for {:?} to {:?}", attempt, key, outstanding);
            self.ctx.publish_control(&key.rcid, &outstanding, frame.clone()).await;

            match self.ctx.window_ended_responses.wait_for_all(&peer_keys, self.ctx.attempt_deadline()).await {
                AckWait::Acked => {
                    let rtt = start.elapsed();
                    trace!("WED received for {:?} from all subscribers after {:?}", key, rtt);
                    self.ctx.rtt.record(rtt);
                    self.ctx.statistics.round_trip_time(&key.rcid, rtt).await;
                    self.ctx.window_ended_responses.remove(&peer_keys).await;

                    debug!("all subscribers of {:?} confirmed WE - deleting buffered fragments", key);
                    self.ctx.retransmit_buffer.remove(key).await;
                    self.ctx.nack_groups.remove(key).await;
                    return;
                }
                AckWait::Vanished => {
                    debug!("WED tracking for {:?} was removed - stopping", key);
                    return;
                }
                AckWait::TimedOut => {}
            }
        }

        debug!("subscribers of {:?} did not confirm WE after {} attempts - stopping here", key, self.ctx.config.max_retries);
        self.ctx.window_ended_responses.remove(&peer_keys).await;
    }

    /// WED from a locked group member. The waiting `send` purges the buffered fragments once
    ///  every target has confirmed.
    pub async fn on_window_ended(&self, rcid: &ContentId, nid: NodeId, nonce: Nonce, sk: SessionKey) {
        let peer_key = StreamKey::new(rcid, nonce, sk).for_peer(nid);

        match self.ctx.window_ended_responses.is_acked(&peer_key).await {
            None => trace!("WED for {:?} is not awaited", peer_key),
            Some(true) => trace!("duplicate WED for {:?}", peer_key),
            Some(false) => {
                self.ctx.window_ended_responses.ack(&peer_key).await;
            }
        }
    }

    /// Publishes a request under `cid` with `rcid` as implicit subscription for the response.
    ///  Returns the last sequence number, i.e. the one carried in the WE that was published
    ///  at the end.
    ///
    /// The request side has no WU / WUD exchange: when the credit is used up, it pauses for an
    ///  RTT before continuing.
    pub async fn publish_request(&self, cid: &ContentId, rcid: &ContentId, nonce: Nonce, sk: SessionKey, payload: &Bytes) -> Option<SeqNo> {
        self.ctx.reverse_lookup.add(cid, rcid).await;

        let key = StreamKey::new(rcid, nonce, sk);
        let frames: Vec<DataFrame> = match fragment(payload, self.ctx.config.max_fragment_payload(cid.len() + rcid.len()), nonce, sk) {
            Ok(frames) => frames,
            Err(e) => {
                error!("not publishing request of {} bytes under {} (combined id length {}): {}", payload.len(), cid, cid.len() + rcid.len(), e);
                return None;
            }
        };

        debug!("publishing request of {} bytes in {} fragments under {} for {:?}", payload.len(), frames.len(), cid, key);
        self.ctx.proxy_buffer.remove(&key).await;

        let mut credit = self.ctx.config.initial_credit;
        for frame in &frames {
            if credit == 0 {
                let pause = self.ctx.rtt.current_rtt();
                trace!("credit for {:?} used up - pausing for {:?}", key, pause);
                time::sleep(pause).await;
                credit = self.ctx.config.initial_credit;
            }

            let buf = frame.to_bytes();
            self.ctx.proxy_buffer.insert(&key, frame.seq, buf.clone()).await;
            self.ctx.publish_data_reverse(cid, rcid, buf).await;
            credit -= 1;
        }

        let last_seq = frames.last().map(|f| f.seq).unwrap_or(0);
        self.ctx.window_ended_requests.expect([key]).await;
        self.ctx.publish_control_reverse(cid, rcid, ControlFrame::WindowEnd { nonce, sk, seq: last_seq }).await;
        Some(last_seq)
    }

    /// WED from the sNAP for one of our requests
    pub async fn on_request_window_ended(&self, rcid: &ContentId, nonce: Nonce, sk: SessionKey) {
        let key = StreamKey::new(rcid, nonce, sk);
        if !self.ctx.window_ended_requests.ack(&key).await {
            trace!("WED for {:?} is not awaited", key);
        }
    }
}

fn to_nids(peer_keys: Vec<PeerStreamKey>) -> Vec<NodeId> {
    peer_keys.into_iter().map(|k| k.nid).collect()
}
