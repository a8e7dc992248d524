use async_trait::async_trait;
use bytes::Bytes;
#[cfg(test)] use mockall::automock;
use crate::types::{ContentId, NodeId};

/// The unreliable one-to-many pub/sub primitive LTP runs on. Every call is fire-and-forget:
///  implementations log delivery problems themselves, and LTP's retry logic compensates for
///  anything that is lost.
///
/// This is an abstraction for the substrate's API, introduced to facilitate mocking it away for
///  testing.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait IcnSubstrate: Send + Sync + 'static {
    /// publishes a frame under `id` to an explicit list of subscribers
    async fn publish(&self, id: &ContentId, nids: &[NodeId], payload: Bytes);

    /// publishes a frame under `id`, establishing an implicit subscription to `reverse_id` for
    ///  the reply
    async fn publish_reverse(&self, id: &ContentId, reverse_id: &ContentId, payload: Bytes);

    async fn unpublish_info(&self, id: &ContentId);

    async fn publish_info(&self, id: &ContentId);
}
