//! RESP2 protocol implementation
//!
//! Parsing and encoding of the Redis Serialization Protocol. Clients, peer
//! links and the append-only file all speak it, so this module depends on
//! nothing else in the crate.

mod types;
mod resp;

pub use types::{Payload, Reply, RespError};
pub use resp::{parse_stream, PayloadReader, RespCodec, RespEncoder, RespParser};
