use std::sync::Arc;
use tracing::{debug, trace, warn};
use crate::context::LtpContext;
use crate::frame::ControlFrame;
use crate::registry::ack_tracker::AckWait;
use crate::timeout::spawn_reset;
use crate::types::{ContentId, NodeId, Nonce, SessionKey, StreamKey, DEFAULT_NONCE};

/// Session end (SE / SED) and reset (RST / RSTED) handshakes
pub struct Sessions {
    ctx: Arc<LtpContext>,
}

impl Sessions {
    pub fn new(ctx: Arc<LtpContext>) -> Sessions {
        Sessions { ctx }
    }

    /// Ends a multicast session with every member of its locked group, then releases all of the
    ///  session's buffers and the locked group itself.
    pub async fn end_session(&self, rcid: &ContentId, nonce: Nonce, sk: SessionKey) {
        let key = StreamKey::new(rcid, nonce, sk);
        let group = self.ctx.cmc.lock().await
            .locked_group(&key)
            .unwrap_or_default();

        let peer_keys = group.iter().map(|nid| key.for_peer(*nid)).collect::<Vec<_>>();
        self.ctx.session_ended_responses.expect(peer_keys.clone()).await;

        let frame = ControlFrame::SessionEnd { nonce, sk };
        for attempt in 1..=self.ctx.config.max_retries {
            let outstanding = self.ctx.session_ended_responses.outstanding(&peer_keys).await
                .into_iter()
                .map(|k| k.nid)
                .collect::<Vec<_>>();
            if outstanding.is_empty() {
                break;
            }
            trace!("SE attempt {} for {:?} to {:?}", attempt, key, outstanding);
            self.ctx.publish_control(rcid, &outstanding, frame.clone()).await;

            match self.ctx.session_ended_responses.wait_for_all(&peer_keys, self.ctx.attempt_deadline()).await {
                AckWait::Acked | AckWait::Vanished => break,
                AckWait::TimedOut if attempt == self.ctx.config.max_retries => {
                    debug!("SE for {:?} was not confirmed by all members after {} attempts", key, attempt);
                }
                AckWait::TimedOut => {}
            }
        }
        self.ctx.session_ended_responses.remove(&peer_keys).await;

        self.ctx.clean_up_buffers(&key).await;
        self.ctx.cmc.lock().await
            .unlock(&key);
        debug!("session {:?} ended", key);
    }

    /// Ends a session towards the sNAP behind `cid`
    pub async fn end_session_unicast(&self, cid: &ContentId, rcid: &ContentId, sk: SessionKey) {
        let key = StreamKey::new(rcid, DEFAULT_NONCE, sk);
        let keys = [key.clone()];
        self.ctx.session_ended_requests.expect([key.clone()]).await;

        let frame = ControlFrame::SessionEnd { nonce: DEFAULT_NONCE, sk };
        for attempt in 1..=self.ctx.config.max_retries {
            trace!("SE attempt {} for {:?} under {}", attempt, key, cid);
            self.ctx.publish_control_reverse(cid, rcid, frame.clone()).await;

            match self.ctx.session_ended_requests.wait_for_all(&keys, self.ctx.attempt_deadline()).await {
                AckWait::Acked | AckWait::Vanished => break,
                AckWait::TimedOut if attempt == self.ctx.config.max_retries => {
                    debug!("SE for {:?} was not confirmed after {} attempts", key, attempt);
                }
                AckWait::TimedOut => {}
            }
        }
        self.ctx.session_ended_requests.remove(&keys).await;
    }

    /// SE from the sNAP, confirmed under the CID registered for the rCID
    pub async fn on_session_end_from_publisher(&self, rcid: &ContentId, nonce: Nonce, sk: SessionKey) {
        match self.ctx.reverse_lookup.lookup(rcid).await {
            Some(cid) => self.ctx.publish_control_reverse(&cid, rcid, ControlFrame::SessionEnded { nonce, sk }).await,
            None => debug!("no CID known for rCID {} - not confirming SE", rcid),
        }
    }

    pub async fn on_session_end_from_node(&self, rcid: &ContentId, nid: NodeId, nonce: Nonce, sk: SessionKey) {
        self.ctx.publish_control(rcid, &[nid], ControlFrame::SessionEnded { nonce, sk }).await;
    }

    /// SED from a locked group member
    pub async fn on_session_ended_from_node(&self, rcid: &ContentId, nid: NodeId, nonce: Nonce, sk: SessionKey) {
        let key = StreamKey::new(rcid, nonce, sk).for_peer(nid);
        if !self.ctx.session_ended_responses.ack(&key).await {
            trace!("SED for {:?} is not awaited", key);
        }
    }

    /// SED from the sNAP: the session's buffers are not needed anymore
    pub async fn on_session_ended_from_publisher(&self, rcid: &ContentId, nonce: Nonce, sk: SessionKey) {
        let key = StreamKey::new(rcid, nonce, sk);
        if !self.ctx.session_ended_requests.ack(&key).await {
            trace!("SED for {:?} is not awaited", key);
        }
        self.ctx.clean_up_buffers(&key).await;
    }

    /// Tells the sNAP behind `cid` that this node does not want responses for the rCID anymore.
    ///  A reset that is in flight already is not repeated.
    pub async fn reset(&self, cid: &ContentId, rcid: &ContentId) {
        if !self.ctx.resetted.expect_new(rcid.clone()).await {
            trace!("RST for {} is in flight already", rcid);
            return;
        }

        debug!("resetting rCID {}", rcid);
        self.ctx.publish_control_reverse(cid, rcid, ControlFrame::Reset).await;
        spawn_reset(self.ctx.clone(), cid.clone(), rcid.clone());
    }

    /// RST from a cNAP: the node is dropped from all CMC groups for the rCID, and responses
    ///  nobody waits for anymore are discarded
    pub async fn on_reset(&self, rcid: &ContentId, nid: NodeId) {
        let affected = self.ctx.cmc.lock().await
            .remove(rcid, nid);
        debug!("RST from {:?} for rCID {} - affected sessions: {:?}", nid, rcid, affected);

        self.ctx.publish_control(rcid, &[nid], ControlFrame::Resetted).await;

        for key in affected {
            let is_empty = self.ctx.cmc.lock().await.is_locked_group_empty(&key);
            if is_empty {
                trace!("no remaining members for {:?} - dropping buffered response", key);
                self.ctx.retransmit_buffer.remove(&key).await;
                self.ctx.nack_groups.remove(&key).await;
            }
        }
    }

    /// RSTED from the sNAP. Once no reset is outstanding anymore, a missing forwarding path is
    ///  requested by re-announcing the CID.
    pub async fn on_resetted(&self, rcid: &ContentId) {
        if !self.ctx.resetted.ack(rcid).await {
            trace!("RSTED for {} is not awaited", rcid);
            return;
        }
        if !self.ctx.resetted.all_acked().await {
            return;
        }

        if let Some(cid) = self.ctx.reverse_lookup.request_fid(rcid).await {
            warn!("no forwarding path for CID {} - re-announcing it", cid);
            self.ctx.substrate.unpublish_info(&cid).await;
            self.ctx.substrate.publish_info(&cid).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use bytes::Bytes;
    use tokio::time;
    use crate::frame::Frame;
    use crate::test_util::*;
    use crate::types::PeerStreamKey;

    async fn lock_group(ctx: &LtpContext, nids: &[u32]) -> StreamKey {
        let mut cmc = ctx.cmc.lock().await;
        for nid in nids {
            cmc.observe_fragment(&rcid(), 1, NodeId(*nid));
        }
        cmc.lock(&rcid(), 1, 7);
        StreamKey::new(&rcid(), 1, 7)
    }

    #[tokio::test(start_paused = true)]
    async fn test_end_session() {
        let (ctx, substrate, _) = test_context(test_config());
        let sessions = Arc::new(Sessions::new(ctx.clone()));
        let key = lock_group(&ctx, &[1, 2]).await;
        ctx.retransmit_buffer.insert(&key, 1, Bytes::from_static(b"x")).await;

        let sessions2 = sessions.clone();
        let end = tokio::spawn(async move {
            sessions2.end_session(&rcid(), 1, 7).await;
        });

        time::sleep(Duration::from_millis(10)).await;
        let published = substrate.published().await;
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].nids(), vec![NodeId(1), NodeId(2)]);
        assert_eq!(published[0].control(), Some(&ControlFrame::SessionEnd { nonce: 1, sk: 7 }));

        sessions.on_session_ended_from_node(&rcid(), NodeId(2), 1, 7).await;
        time::sleep(Duration::from_millis(400)).await;
        let published = substrate.published().await;
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].nids(), vec![NodeId(1)]);

        sessions.on_session_ended_from_node(&rcid(), NodeId(1), 1, 7).await;
        end.await.unwrap();

        assert!(!ctx.retransmit_buffer.contains(&key).await);
        assert_eq!(ctx.cmc.lock().await.locked_group(&key), None);
        assert_eq!(ctx.session_ended_responses.len().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_end_session_gives_up() {
        let (ctx, substrate, _) = test_context(test_config());
        let sessions = Sessions::new(ctx.clone());
        let key = lock_group(&ctx, &[1, 2]).await;
        ctx.retransmit_buffer.insert(&key, 1, Bytes::from_static(b"x")).await;
        ctx.nack_groups.merge(&key, NodeId(1), 1, 1).await;

        let start = time::Instant::now();
        sessions.end_session(&rcid(), 1, 7).await;
        assert_eq!(start.elapsed(), Duration::from_millis(1200));

        let published = substrate.published().await;
        assert_eq!(published.len(), 3);
        for p in &published {
            assert_eq!(p.nids(), vec![NodeId(1), NodeId(2)]);
            assert_eq!(p.control(), Some(&ControlFrame::SessionEnd { nonce: 1, sk: 7 }));
        }

        assert!(!ctx.retransmit_buffer.contains(&key).await);
        assert!(ctx.nack_groups.get(&key).await.is_none());
        assert_eq!(ctx.cmc.lock().await.locked_group(&key), None);
        assert_eq!(ctx.session_ended_responses.len().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_end_session_waits_for_active_publish() {
        let (ctx, _substrate, _) = test_context(test_config());
        let sessions = Arc::new(Sessions::new(ctx.clone()));
        let key = lock_group(&ctx, &[]).await;
        ctx.retransmit_buffer.insert(&key, 1, Bytes::from_static(b"x")).await;
        let active = ctx.activity.acquire(&key).await;

        let sessions2 = sessions.clone();
        let end = tokio::spawn(async move {
            sessions2.end_session(&rcid(), 1, 7).await;
        });
        time::sleep(Duration::from_secs(10)).await;
        assert!(!end.is_finished());
        assert!(ctx.retransmit_buffer.contains(&key).await);

        drop(active);
        end.await.unwrap();
        assert!(!ctx.retransmit_buffer.contains(&key).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_end_session_unicast() {
        let (ctx, substrate, _) = test_context(test_config());
        let sessions = Arc::new(Sessions::new(ctx.clone()));

        let sessions2 = sessions.clone();
        let end = tokio::spawn(async move {
            sessions2.end_session_unicast(&cid(), &rcid(), 9).await;
        });
        time::sleep(Duration::from_millis(10)).await;
        assert_eq!(substrate.published().await, vec![Published::Reverse {
            id: cid(),
            reverse_id: rcid(),
            frame: Frame::Control(ControlFrame::SessionEnd { nonce: DEFAULT_NONCE, sk: 9 }),
        }]);

        sessions.on_session_ended_from_publisher(&rcid(), DEFAULT_NONCE, 9).await;
        end.await.unwrap();
        assert_eq!(ctx.session_ended_requests.len().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_end_session_unicast_gives_up() {
        let (ctx, substrate, _) = test_context(test_config());
        let sessions = Sessions::new(ctx.clone());

        sessions.end_session_unicast(&cid(), &rcid(), 9).await;
        assert_eq!(substrate.published_control().await.len(), 3);
        assert_eq!(ctx.session_ended_requests.len().await, 0);
    }

    #[tokio::test]
    async fn test_session_end_replies() {
        let (ctx, substrate, _) = test_context(test_config());
        let sessions = Sessions::new(ctx.clone());
        ctx.reverse_lookup.add(&cid(), &rcid()).await;

        sessions.on_session_end_from_publisher(&rcid(), 1, 7).await;
        sessions.on_session_end_from_publisher(&ContentId::new("unknown"), 1, 7).await;
        sessions.on_session_end_from_node(&rcid(), NodeId(4), 1, 7).await;

        assert_eq!(substrate.published().await, vec![
            Published::Reverse {
                id: cid(),
                reverse_id: rcid(),
                frame: Frame::Control(ControlFrame::SessionEnded { nonce: 1, sk: 7 }),
            },
            Published::ToNodes {
                id: rcid(),
                nids: vec![NodeId(4)],
                frame: Frame::Control(ControlFrame::SessionEnded { nonce: 1, sk: 7 }),
            },
        ]);
    }

    #[tokio::test]
    async fn test_session_ended_cleans_up() {
        let (ctx, _, _) = test_context(test_config());
        let sessions = Sessions::new(ctx.clone());
        let key = StreamKey::new(&rcid(), 1, 7);
        ctx.proxy_buffer.insert(&key, 1, Bytes::from_static(b"x")).await;
        let received = PeerStreamKey { rcid: rcid(), nonce: 1, nid: NodeId(100), sk: 7 };
        ctx.reassembly.insert(&received, 1, Bytes::from_static(b"y")).await;

        sessions.on_session_ended_from_publisher(&rcid(), 1, 7).await;
        assert!(!ctx.proxy_buffer.contains(&key).await);
        assert!(!ctx.reassembly.contains(&received).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_is_not_repeated_while_in_flight() {
        let (ctx, substrate, _) = test_context(test_config());
        let sessions = Sessions::new(ctx.clone());

        sessions.reset(&cid(), &rcid()).await;
        sessions.reset(&cid(), &rcid()).await;
        assert_eq!(substrate.published_control().await, vec![ControlFrame::Reset]);
        assert!(ctx.resetted.contains(&rcid()).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_gives_up() {
        let (ctx, substrate, _) = test_context(test_config());
        let sessions = Sessions::new(ctx.clone());

        sessions.reset(&cid(), &rcid()).await;
        time::sleep(Duration::from_millis(1300)).await;

        let published = substrate.published().await;
        assert_eq!(published.len(), 3);
        for p in &published {
            assert_eq!(p, &Published::Reverse { id: cid(), reverse_id: rcid(), frame: Frame::Control(ControlFrame::Reset) });
        }
        assert!(!ctx.resetted.contains(&rcid()).await);

        // a new reset is possible once the previous one gave up
        sessions.reset(&cid(), &rcid()).await;
        assert_eq!(substrate.published_control().await, vec![ControlFrame::Reset]);
    }

    #[tokio::test]
    async fn test_on_reset() {
        let (ctx, substrate, _) = test_context(test_config());
        let sessions = Sessions::new(ctx.clone());

        let shared = lock_group(&ctx, &[1, 2]).await;
        ctx.retransmit_buffer.insert(&shared, 1, Bytes::from_static(b"x")).await;
        let alone = {
            let mut cmc = ctx.cmc.lock().await;
            cmc.observe_fragment(&rcid(), 1, NodeId(1));
            cmc.lock(&rcid(), 1, 8);
            StreamKey::new(&rcid(), 1, 8)
        };
        ctx.retransmit_buffer.insert(&alone, 1, Bytes::from_static(b"x")).await;

        sessions.on_reset(&rcid(), NodeId(1)).await;

        assert_eq!(substrate.published().await, vec![Published::ToNodes {
            id: rcid(),
            nids: vec![NodeId(1)],
            frame: Frame::Control(ControlFrame::Resetted),
        }]);
        assert_eq!(ctx.cmc.lock().await.locked_group(&shared), Some(vec![NodeId(2)]));
        assert!(ctx.retransmit_buffer.contains(&shared).await);
        assert!(!ctx.retransmit_buffer.contains(&alone).await);
    }

    #[tokio::test]
    async fn test_resetted_triggers_reannouncement() {
        let (ctx, substrate, _) = test_context(test_config());
        let sessions = Sessions::new(ctx.clone());
        ctx.reverse_lookup.add(&cid(), &rcid()).await;
        ctx.reverse_lookup.set_forwarding(&cid(), false).await;
        ctx.resetted.expect([rcid()]).await;

        sessions.on_resetted(&rcid()).await;
        assert_eq!(substrate.published().await, vec![Published::UnpublishInfo(cid()), Published::PublishInfo(cid())]);

        // the FID request is pending until forwarding is enabled again
        ctx.resetted.expect([rcid()]).await;
        sessions.on_resetted(&rcid()).await;
        assert!(substrate.published().await.is_empty());
    }

    #[tokio::test]
    async fn test_resetted_with_forwarding() {
        let (ctx, substrate, _) = test_context(test_config());
        let sessions = Sessions::new(ctx.clone());
        ctx.reverse_lookup.add(&cid(), &rcid()).await;
        ctx.resetted.expect([rcid()]).await;

        sessions.on_resetted(&rcid()).await;
        assert!(substrate.published().await.is_empty());
    }
}
