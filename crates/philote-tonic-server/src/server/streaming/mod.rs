//! Chunk stream plumbing shared by the evaluation RPCs.
//!
//! - [`inbound`] - consumes a client chunk stream into dense buffers.
//! - [`outbound`] - re-chunks results and feeds them to the response stream.

pub mod inbound;
pub mod outbound;
