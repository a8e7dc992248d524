//! LTP: a lightweight transport for carrying HTTP request and response payloads over an
//!  ICN pub/sub substrate.
//!
//! The substrate delivers frames unreliably to an explicit list of subscribers. LTP splits
//!  payloads into fragments and repairs losses through NACKs, with credit based flow control on
//!  top. Responses to co-incidental requests for the same content are published once to the
//!  whole group of requesting nodes (CMC groups).
//!
//! The HTTP layer talks to [`lightweight::Lightweight`]: it publishes through it and hands
//!  every inbound frame to `handle` / `handle_from_node`, acting on the returned
//!  [`types::TransportState`].

pub mod cleaner;
pub mod cmc;
pub mod config;
pub mod context;
pub mod error;
pub mod fragmenter;
pub mod frame;
pub mod lightweight;
pub mod receiver;
pub mod registry;
pub mod retransmit;
pub mod rtt;
pub mod sender;
pub mod session;
pub mod statistics;
pub mod substrate;
pub mod timeout;
pub mod types;

#[cfg(test)] pub mod test_util;
