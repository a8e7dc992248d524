use std::sync::{Arc, Weak};
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, trace};
use crate::context::LtpContext;

/// Reclaims buffered state that has been idle for longer than the configured timeout. This is
///  what eventually frees sessions whose handshakes ran out of retries.
pub async fn clean_buffers(ctx: &LtpContext) {
    if let Some(threshold) = Instant::now().checked_sub(ctx.config.timeout) {
        remove_idle_buffers(ctx, threshold).await;
    }

    ctx.statistics.buffer_sizes(
        ctx.retransmit_buffer.buffered_bytes().await,
        ctx.proxy_buffer.buffered_bytes().await,
        ctx.reassembly.buffered_bytes().await,
    );
}

async fn remove_idle_buffers(ctx: &LtpContext, threshold: Instant) {
    for key in ctx.retransmit_buffer.remove_idle(threshold).await {
        debug!("reclaiming idle response buffer for {:?}", key);
        ctx.nack_groups.remove(&key).await;
        ctx.window_ended_responses.retain(|k| k.stream() != key).await;
    }

    let idle_requests = ctx.proxy_buffer.remove_idle(threshold).await;
    if !idle_requests.is_empty() {
        debug!("reclaiming idle request buffers for {:?}", idle_requests);
        ctx.window_ended_requests.remove(&idle_requests).await;
    }

    for key in ctx.reassembly.remove_idle(threshold).await {
        debug!("discarding incomplete fragments for {:?}", key);
    }
}

pub async fn clean_reverse_lookup(ctx: &LtpContext) {
    let Some(threshold) = Instant::now().checked_sub(ctx.config.timeout) else {
        return;
    };
    let removed = ctx.reverse_lookup.remove_idle(threshold).await;
    if !removed.is_empty() {
        debug!("removed idle reverse lookup entries {:?}", removed);
    }
}

/// Starts both cleaners. They hold the context weakly and end when it is dropped.
pub fn spawn_cleaners(ctx: &Arc<LtpContext>) {
    spawn_periodic(Arc::downgrade(ctx), "buffer cleaner", |ctx| async move { clean_buffers(&ctx).await });
    spawn_periodic(Arc::downgrade(ctx), "reverse lookup cleaner", |ctx| async move { clean_reverse_lookup(&ctx).await });
}

fn spawn_periodic<F, Fut>(ctx: Weak<LtpContext>, name: &'static str, f: F)
where
    F: Fn(Arc<LtpContext>) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send,
{
    tokio::spawn(async move {
        let period = match ctx.upgrade() {
            Some(ctx) => ctx.config.buffer_cleaner_interval,
            None => return,
        };
        let mut interval = time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval.tick().await;

        loop {
            interval.tick().await;
            let Some(ctx) = ctx.upgrade() else {
                debug!("{} shutting down", name);
                return;
            };
            trace!("running {}", name);
            f(ctx).await;
        }
    });
}
