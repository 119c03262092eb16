//! Beacon Configuration
//!
//! Configurable parameters for the beacon service.
//! Defaults reproduce the public deployment: the served zones, the static
//! records and the rate limiting policy.

use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, Ipv6Addr};
use std::path::Path;

/// Development ports, used unless production mode is enabled
pub const DEV_DNS_PORT: u16 = 8053;
pub const DEV_HTTP_PORT: u16 = 8088;

/// Production ports
pub const PROD_DNS_PORT: u16 = 53;
pub const PROD_HTTP_PORT: u16 = 80;

/// One token bucket: `tokens` available per `interval_ms`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketConfig {
    pub tokens: u32,
    pub interval_ms: u64,
}

impl BucketConfig {
    pub fn per_minute(tokens: u32) -> Self {
        Self {
            tokens,
            interval_ms: 60_000,
        }
    }
}

/// Rate limiting policy, one independent bucket per concern
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Per client IP, UDP queries
    pub client_udp: BucketConfig,

    /// Per client IP, TCP queries
    pub client_tcp: BucketConfig,

    /// All UDP queries together
    pub global_udp: BucketConfig,

    /// Per client IP, registrations
    pub registration: BucketConfig,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            client_udp: BucketConfig::per_minute(20),
            client_tcp: BucketConfig {
                tokens: 500,
                interval_ms: 5 * 60_000,
            },
            global_udp: BucketConfig::per_minute(300),
            registration: BucketConfig::per_minute(30),
        }
    }
}

/// Main configuration for the beacon service
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BeaconConfig {
    // === Network ===

    /// Port for the DNS listeners (UDP and TCP)
    pub dns_port: u16,

    /// Port for the HTTP API (registration and status)
    pub http_port: u16,

    /// Largest UDP reply we send; bigger replies are truncated
    pub max_udp_payload: u16,

    /// Idle timeout for DNS-over-TCP connections (seconds)
    pub tcp_idle_timeout_secs: u64,

    // === Zone ===

    /// Apex zone, served for exact and subdomain matches
    pub apex_zone: String,

    /// Additional zones served for subdomain matches only
    pub legacy_zones: Vec<String>,

    /// Authoritative nameserver published in SOA and NS records
    pub nameserver: String,

    /// Responsible mailbox published in SOA records
    pub hostmaster: String,

    /// Address answered for A queries
    pub service_ipv4: Ipv4Addr,

    /// Address answered for AAAA queries
    pub service_ipv6: Ipv6Addr,

    /// TTL of static records (SOA, NS, A, AAAA, auth TXT)
    pub static_ttl_secs: u32,

    pub soa_refresh_secs: i32,
    pub soa_retry_secs: i32,
    pub soa_expire_secs: i32,
    pub soa_minimum_secs: u32,

    /// Placeholder value answered for `*.auth.<zone>` TXT queries
    pub auth_probe_value: String,

    // === Lookups ===

    /// TTL of TXT answers for room lookups
    pub room_answer_ttl_secs: u32,

    /// TTL of TXT answers for node lookups
    pub node_answer_ttl_secs: u32,

    // === Registration ===

    /// Store TTL of registered entries (seconds)
    pub registration_ttl_secs: u64,

    /// Room whose entries never expire (public demo)
    pub demo_room: Option<String>,

    /// Reject registrations whose room is not derived from the supplied key
    pub require_room_key_binding: bool,

    /// Take the client IP from X-Real-IP / X-Forwarded-For when the direct
    /// peer is loopback or private (reverse proxy deployments only)
    pub trust_proxy_headers: bool,

    // === Storage ===

    /// Capacity of the name store in bytes
    pub store_capacity_bytes: u64,

    // === Maintenance ===

    /// Interval for rate limiter cleanup (seconds)
    pub maintenance_interval_secs: u64,

    // === Security ===

    pub rate_limits: RateLimitConfig,
}

impl Default for BeaconConfig {
    fn default() -> Self {
        Self {
            // Network
            dns_port: DEV_DNS_PORT,
            http_port: DEV_HTTP_PORT,
            max_udp_payload: 1232,
            tcp_idle_timeout_secs: 30,

            // Zone
            apex_zone: "pathfinderbeacon.net.".to_string(),
            legacy_zones: vec!["heidenstedt.org.".to_string()],
            nameserver: "pathfinderbeacon-ns1.heidenstedt.org.".to_string(),
            hostmaster: "hostmaster-pathfinderbeacon-net.heidenstedt.org.".to_string(),
            service_ipv4: Ipv4Addr::new(128, 140, 37, 196),
            service_ipv6: Ipv6Addr::new(0x2a01, 0x4f8, 0x1c0c, 0x68c1, 0, 0, 0, 1),
            static_ttl_secs: 300,
            soa_refresh_secs: 7200,
            soa_retry_secs: 3600,
            soa_expire_secs: 1_209_600, // 14 days
            soa_minimum_secs: 300,
            auth_probe_value: "pathfinder-beacon-auth".to_string(),

            // Lookups - nodes move less often than room membership changes
            room_answer_ttl_secs: 300,
            node_answer_ttl_secs: 3600,

            // Registration
            registration_ttl_secs: 3600,
            demo_room: None,
            require_room_key_binding: true,
            trust_proxy_headers: false,

            // Storage
            store_capacity_bytes: 1000 * 1024 * 1024,

            // Maintenance
            maintenance_interval_secs: 300,

            // Security
            rate_limits: RateLimitConfig::default(),
        }
    }
}

impl BeaconConfig {
    /// Load configuration from TOML file
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    // Builder-style methods for CLI / environment overrides

    /// Switch to the production ports unless explicit ports follow
    pub fn with_production(mut self, production: bool) -> Self {
        if production {
            self.dns_port = PROD_DNS_PORT;
            self.http_port = PROD_HTTP_PORT;
        }
        self
    }

    pub fn with_dns_port(mut self, port: Option<u16>) -> Self {
        if let Some(port) = port {
            self.dns_port = port;
        }
        self
    }

    pub fn with_http_port(mut self, port: Option<u16>) -> Self {
        if let Some(port) = port {
            self.http_port = port;
        }
        self
    }

    pub fn with_demo_room(mut self, room: Option<String>) -> Self {
        if let Some(room) = room.filter(|r| !r.is_empty()) {
            self.demo_room = Some(room.to_lowercase());
        }
        self
    }

    pub fn with_store_capacity(mut self, bytes: Option<u64>) -> Self {
        if let Some(bytes) = bytes {
            self.store_capacity_bytes = bytes;
        }
        self
    }

    /// Validate configuration values
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.apex_zone.trim_matches('.').is_empty() {
            anyhow::bail!("apex_zone must not be empty");
        }

        if self.legacy_zones.iter().any(|z| z.trim_matches('.').is_empty()) {
            anyhow::bail!("legacy_zones must not contain empty zones");
        }

        if self.max_udp_payload < 512 {
            anyhow::bail!(
                "max_udp_payload ({}) must be at least 512 bytes",
                self.max_udp_payload
            );
        }

        if self.store_capacity_bytes < 1024 * 1024 {
            anyhow::bail!(
                "store_capacity_bytes ({}) must be at least 1 MiB",
                self.store_capacity_bytes
            );
        }

        for (name, bucket) in [
            ("client_udp", &self.rate_limits.client_udp),
            ("client_tcp", &self.rate_limits.client_tcp),
            ("global_udp", &self.rate_limits.global_udp),
            ("registration", &self.rate_limits.registration),
        ] {
            if bucket.tokens == 0 || bucket.interval_ms == 0 {
                anyhow::bail!("rate limit bucket {} needs tokens and an interval", name);
            }
        }

        if let Some(room) = &self.demo_room {
            if !crate::types::is_sha224_hex(room) {
                tracing::warn!(
                    "demo_room {:?} is not a room id, no registration will match it",
                    room
                );
            }
        }

        Ok(())
    }
}
