//! Native messaging peer channel.
//!
//! The browser launches the gateway with its stdin/stdout wired to the
//! extension. Both directions carry length-prefixed JSON frames.
//!
//! - `codec`: [`PeerCodec`](codec::PeerCodec) frame framing.
//! - `reader`: inbound task feeding decoded frames to the correlator.
//! - `writer`: the single owner of the outbound stream and its
//!   [`PeerSender`](writer::PeerSender) handle.

pub mod codec;
pub mod reader;
pub mod writer;
