//! Retry loops for handshakes whose initiator does not wait for completion: the WE of a
//!  request and the RST of an rCID. Both republish their control message once per timeout
//!  until it is confirmed, the tracking entry disappears, or the retries are used up.

use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, trace};
use crate::context::LtpContext;
use crate::frame::ControlFrame;
use crate::registry::ack_tracker::AckWait;
use crate::types::{ContentId, SeqNo, StreamKey};

/// Waits for the WED of a request, republishing the WE after every timeout. The first WE is
///  expected to have been published by the caller.
pub async fn await_request_window_ended(ctx: &LtpContext, cid: &ContentId, key: &StreamKey, last_seq: SeqNo) {
    let keys = [key.clone()];
    let frame = ControlFrame::WindowEnd { nonce: key.nonce, sk: key.sk, seq: last_seq };
    let start = Instant::now();

    for attempt in 1..=ctx.config.max_retries {
        match ctx.window_ended_requests.wait_for_all(&keys, ctx.attempt_deadline()).await {
            AckWait::Acked => {
                let rtt = start.elapsed();
                trace!("WED for {:?} received after {:?}", key, rtt);
                ctx.rtt.record(rtt);
                ctx.statistics.round_trip_time(cid, rtt).await;
                break;
            }
            AckWait::Vanished => {
                debug!("WED tracking for {:?} was removed - stopping", key);
                return;
            }
            AckWait::TimedOut if attempt < ctx.config.max_retries => {
                trace!("no WED for {:?} after attempt {} - resending WE", key, attempt);
                ctx.publish_control_reverse(cid, &key.rcid, frame.clone()).await;
            }
            AckWait::TimedOut => {
                debug!("no WED for {:?} after {} attempts - giving up", key, attempt);
            }
        }
    }
    ctx.window_ended_requests.remove(&keys).await;
}

pub fn spawn_request_window_ended(ctx: Arc<LtpContext>, cid: ContentId, key: StreamKey, last_seq: SeqNo) {
    tokio::spawn(async move {
        await_request_window_ended(&ctx, &cid, &key, last_seq).await;
    });
}

/// Waits for the RSTED for an rCID, republishing the RST after every timeout
pub fn spawn_reset(ctx: Arc<LtpContext>, cid: ContentId, rcid: ContentId) {
    tokio::spawn(async move {
        let keys = [rcid.clone()];
        for attempt in 1..=ctx.config.max_retries {
            match ctx.resetted.wait_for_all(&keys, ctx.attempt_deadline()).await {
                AckWait::Acked => {
                    trace!("RSTED received for {}", rcid);
                    break;
                }
                AckWait::Vanished => return,
                AckWait::TimedOut if attempt < ctx.config.max_retries => {
                    trace!("no RSTED for {} after attempt {} - resending RST", rcid, attempt);
                    ctx.publish_control_reverse(&cid, &rcid, ControlFrame::Reset).await;
                }
                AckWait::TimedOut => {
                    debug!("no RSTED for {} after {} attempts - giving up", rcid, attempt);
                }
            }
        }
        ctx.resetted.remove(&keys).await;
    });
}
