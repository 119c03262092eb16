//! Core types for beacon registration and lookup
//!
//! These types define the protocol between registering nodes and the beacon:
//! the JSON registration body, the validated addresses derived from it and the
//! identifiers (rooms and nodes) used as keys in the name store.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;

// =============================================================================
// IDENTIFIERS
// =============================================================================

/// Length of a hex-encoded 224-bit digest (room and node identifiers)
pub const SHA224_HEX_LEN: usize = 56;

/// Maximum number of addresses a node may register in one request
pub const MAX_ADDRESSES_PER_REGISTRATION: usize = 50;

/// Key prefix for room entries (value: list of node ids)
pub const ROOM_PREFIX: &str = "room:";

/// Key prefix for node entries (value: list of address strings)
pub const NODE_PREFIX: &str = "node:";

/// Returns true if `name` is syntactically a lowercase hex SHA-224 digest
pub fn is_sha224_hex(name: &str) -> bool {
    name.len() == SHA224_HEX_LEN
        && name
            .bytes()
            .all(|c| c.is_ascii_digit() || (b'a'..=b'f').contains(&c))
}

/// Store key for a room
pub fn room_key(room: &str) -> String {
    format!("{ROOM_PREFIX}{room}")
}

/// Store key for a node
pub fn node_key(node_id: &str) -> String {
    format!("{NODE_PREFIX}{node_id}")
}

// =============================================================================
// ADDRESSES
// =============================================================================

/// Transport protocol a registered address accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
}

impl Protocol {
    /// Parse the wire name of a protocol (exact, lowercase)
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "tcp" => Some(Protocol::Tcp),
            "udp" => Some(Protocol::Udp),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
        }
    }
}

/// A validated, reachable address of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeAddress {
    pub protocol: Protocol,
    pub ip: IpAddr,
    pub port: u16,
}

impl fmt::Display for NodeAddress {
    /// `<protocol>://<ip>:<port>`; IPv6 is written without brackets to stay
    /// compatible with clients of the existing service.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.protocol.as_str(), self.ip, self.port)
    }
}

// =============================================================================
// REGISTRATION PAYLOAD
// =============================================================================

/// Address as it arrives on the wire, before validation
///
/// Port is kept wide so that out-of-range values reach validation instead of
/// failing deserialization with an opaque message.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawAddress {
    #[serde(default)]
    pub protocol: String,
    #[serde(default)]
    pub ip: String,
    #[serde(default)]
    pub port: i64,
}

/// Body of `POST /register`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationRequest {
    /// Claimed room (hex SHA-224 of the public key PEM)
    #[serde(default)]
    pub room: String,

    /// Base64 RSA PKCS#1 v1.5 signature over SHA-512(room)
    #[serde(default)]
    pub room_signature: String,

    /// Base64 of the PKCS#1 PEM public key
    #[serde(default)]
    pub public_key: String,

    #[serde(default)]
    pub addresses: Vec<RawAddress>,
}

/// A registration request that passed syntactic validation
#[derive(Debug, Clone)]
pub struct ValidatedRegistration {
    pub room: String,
    pub room_signature: String,
    pub public_key: String,
    pub addresses: Vec<NodeAddress>,
}

// =============================================================================
// STATISTICS
// =============================================================================

/// Aggregate counts over the name store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    /// Number of `room:` entries
    pub rooms: u64,

    /// Number of `node:` entries
    pub nodes: u64,

    /// Sum of address list lengths over all node entries
    pub addresses: u64,

    /// Cache hits since the last statistics reset
    pub hit_count: u64,
}
