//! Pathfinder Beacon
//!
//! DNS rendezvous for peer-to-peer nodes. Nodes prove ownership of a room
//! with an RSA key, register their reachable addresses over HTTP and find
//! each other through TXT records.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    PATHFINDER BEACON                        │
//! ├─────────────────────────────────────────────────────────────┤
//! │  HTTP API (80)        ←── POST /register, status, metrics   │
//! │  Registrar            ←── validates, verifies room keys     │
//! │  Name Store (moka)    ←── room → nodes, node → addresses    │
//! │  DNS Server (53)      ←── UDP + TCP, TXT answers over TCP   │
//! │  Rate Limiter         ←── per client and global buckets     │
//! │  Maintenance          ←── daily stats reset, cleanup        │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod api;
pub mod config;
pub mod crypto;
pub mod dns;
pub mod maintenance;
pub mod rate_limiter;
pub mod registration;
pub mod registry;
pub mod types;

pub use config::BeaconConfig;
pub use registry::NameStore;
