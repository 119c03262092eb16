//! DNS Server Module
//!
//! Authoritative DNS for the beacon zones. Registered nodes and rooms are
//! published as TXT records.
//!
//! ## DNS Records
//!
//! - SOA, NS, A, AAAA: static records for the zones
//! - TXT `<room>.room.<zone>`: node ids registered in a room
//! - TXT `<node>.node.<zone>`: addresses registered by a node
//! - TXT `*.auth.<zone>`: fixed liveness probe
//!
//! TXT answers are only served over TCP; UDP TXT queries get a truncated
//! reply so that resolvers retry over TCP.

mod handler;
mod records;
mod server;
mod zone;

pub use handler::{QueryRouter, Transport};
pub use server::{run_dns_server, DnsServer};
pub use zone::{TxtTarget, ZoneSet};

use hickory_proto::error::ProtoError;

/// DNS errors
#[derive(Debug, thiserror::Error)]
pub enum DnsError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("DNS protocol error: {0}")]
    Proto(#[from] ProtoError),

    #[error("invalid name {name}: {source}")]
    InvalidName {
        name: String,
        #[source]
        source: ProtoError,
    },

    #[error("DNS message too large for TCP framing: {0} bytes")]
    MessageTooLarge(usize),
}
