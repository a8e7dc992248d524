use std::fmt::{Debug, Display, Formatter};
use std::sync::Arc;

/// Session nonce. Distinguishes concurrent logical sessions that share an rCID.
pub type Nonce = u32;
/// Local session handle, typically the proxy's socket descriptor
pub type SessionKey = u16;
pub type SeqNo = u16;

/// Nonce used when a session is unicast and no disambiguation is needed
pub const DEFAULT_NONCE: Nonce = 23;

/// Name of a piece of content in the pub/sub substrate. The same type is used for the
///  reverse (response channel) id of a request.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentId(Arc<str>);

impl ContentId {
    pub fn new(id: &str) -> ContentId {
        ContentId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// length of the id as it appears in the substrate's header
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for ContentId {
    fn from(value: &str) -> Self {
        ContentId::new(value)
    }
}

impl Debug for ContentId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Display for ContentId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

impl Debug for NodeId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "NID{}", self.0)
    }
}

impl Display for NodeId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Sender side key: one outgoing fragment stream
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct StreamKey {
    pub rcid: ContentId,
    pub nonce: Nonce,
    pub sk: SessionKey,
}

impl StreamKey {
    pub fn new(rcid: &ContentId, nonce: Nonce, sk: SessionKey) -> StreamKey {
        StreamKey {
            rcid: rcid.clone(),
            nonce,
            sk,
        }
    }

    pub fn for_peer(&self, nid: NodeId) -> PeerStreamKey {
        PeerStreamKey {
            rcid: self.rcid.clone(),
            nonce: self.nonce,
            nid,
            sk: self.sk,
        }
    }
}

/// A fragment stream as seen from (or towards) one particular peer
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct PeerStreamKey {
    pub rcid: ContentId,
    pub nonce: Nonce,
    pub nid: NodeId,
    pub sk: SessionKey,
}

impl PeerStreamKey {
    pub fn stream(&self) -> StreamKey {
        StreamKey {
            rcid: self.rcid.clone(),
            nonce: self.nonce,
            sk: self.sk,
        }
    }
}

/// Result of handing an inbound frame to the transport
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportState {
    FragmentsOutstanding,
    AllFragmentsReceived {
        nonce: Nonce,
        session_key: SessionKey,
        payload: bytes::Bytes,
    },
    SessionEnded {
        nonce: Nonce,
        session_key: SessionKey,
    },
    NoActionRequired,
}
