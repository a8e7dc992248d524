//! Session registries: the concurrently accessed state of all LTP sessions.
//!
//! Every registry is a flat map over a composite key (see [`crate::types::StreamKey`] and
//!  [`crate::types::PeerStreamKey`]) behind its own lock. No code path holds two registry locks
//!  at the same time.

pub mod ack_tracker;
pub mod activity;
pub mod fragment_store;
pub mod nack_groups;
pub mod reassembly;
pub mod reverse_lookup;
