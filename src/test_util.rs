use std::sync::Arc;
use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::RwLock;
use crate::cmc::{CmcGroups, SharedCmcGroups};
use crate::config::LtpConfig;
use crate::context::LtpContext;
use crate::frame::{ControlFrame, DataFrame, Frame};
use crate::substrate::IcnSubstrate;
use crate::types::{ContentId, NodeId};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Published {
    ToNodes { id: ContentId, nids: Vec<NodeId>, frame: Frame },
    Reverse { id: ContentId, reverse_id: ContentId, frame: Frame },
    UnpublishInfo(ContentId),
    PublishInfo(ContentId),
}

impl Published {
    pub fn frame(&self) -> Option<&Frame> {
        match self {
            Published::ToNodes { frame, .. } => Some(frame),
            Published::Reverse { frame, .. } => Some(frame),
            _ => None,
        }
    }

    pub fn data(&self) -> Option<&DataFrame> {
        match self.frame() {
            Some(Frame::Data(d)) => Some(d),
            _ => None,
        }
    }

    pub fn control(&self) -> Option<&ControlFrame> {
        match self.frame() {
            Some(Frame::Control(c)) => Some(c),
            _ => None,
        }
    }

    pub fn nids(&self) -> Vec<NodeId> {
        match self {
            Published::ToNodes { nids, .. } => nids.clone(),
            _ => vec![],
        }
    }
}

/// Records everything that is published
#[derive(Default)]
pub struct TrackingSubstrate {
    tracker: Arc<RwLock<Vec<Published>>>,
}

impl TrackingSubstrate {
    pub fn new() -> TrackingSubstrate {
        Default::default()
    }

    async fn track(&self, published: Published) {
        self.tracker.write().await.push(published);
    }

    /// returns and clears everything published so far
    pub async fn published(&self) -> Vec<Published> {
        std::mem::take(&mut *self.tracker.write().await)
    }

    pub async fn published_data(&self) -> Vec<DataFrame> {
        self.published().await
            .iter()
            .filter_map(|p| p.data().cloned())
            .collect()
    }

    pub async fn published_control(&self) -> Vec<ControlFrame> {
        self.published().await
            .iter()
            .filter_map(|p| p.control().cloned())
            .collect()
    }
}

fn parse(payload: &Bytes) -> Frame {
    let mut buf: &[u8] = payload;
    Frame::deser(&mut buf).expect("published frame should be parseable")
}

#[async_trait]
impl IcnSubstrate for TrackingSubstrate {
    async fn publish(&self, id: &ContentId, nids: &[NodeId], payload: Bytes) {
        self.track(Published::ToNodes { id: id.clone(), nids: nids.to_vec(), frame: parse(&payload) }).await;
    }

    async fn publish_reverse(&self, id: &ContentId, reverse_id: &ContentId, payload: Bytes) {
        self.track(Published::Reverse { id: id.clone(), reverse_id: reverse_id.clone(), frame: parse(&payload) }).await;
    }

    async fn unpublish_info(&self, id: &ContentId) {
        self.track(Published::UnpublishInfo(id.clone())).await;
    }

    async fn publish_info(&self, id: &ContentId) {
        self.track(Published::PublishInfo(id.clone())).await;
    }
}

pub fn test_config() -> LtpConfig {
    let mut config = LtpConfig::default_nap(NodeId(100));
    config.max_retries = 3;
    config
}

pub fn test_context(config: LtpConfig) -> (Arc<LtpContext>, Arc<TrackingSubstrate>, SharedCmcGroups) {
    let substrate = Arc::new(TrackingSubstrate::new());
    let cmc = CmcGroups::new_shared();
    let ctx = Arc::new(LtpContext::new(Arc::new(config), substrate.clone(), cmc.clone()));
    (ctx, substrate, cmc)
}

pub fn cid() -> ContentId {
    ContentId::new("/http/example.com")
}

pub fn rcid() -> ContentId {
    ContentId::new("/http/example.com/r")
}

pub fn payload(len: usize) -> Bytes {
    Bytes::from((0..len).map(|i| (i % 251) as u8).collect::<Vec<_>>())
}

/// serializes a recorded frame again, e.g. to feed it to another node
pub fn frame_bytes(frame: &Frame) -> Bytes {
    match frame {
        Frame::Data(d) => d.to_bytes(),
        Frame::Control(c) => c.to_bytes(),
    }
}
