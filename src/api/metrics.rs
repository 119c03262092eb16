//! Metrics Collection
//!
//! Collects and exposes counters for monitoring the beacon.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crate::rate_limiter::Bucket;
use crate::types::StoreStats;

/// Metrics collector for the beacon
#[derive(Default)]
pub struct Metrics {
    /// Start time for uptime calculation
    start_time: Option<Instant>,

    /// DNS queries received over UDP
    pub udp_queries: AtomicU64,

    /// DNS queries received over TCP
    pub tcp_queries: AtomicU64,

    /// UDP replies sent with the TC bit
    pub truncated: AtomicU64,

    /// Replies with NXDOMAIN
    pub nxdomain: AtomicU64,

    /// Replies with NOTIMP
    pub notimp: AtomicU64,

    /// Queries dropped by the per-client UDP bucket
    pub rate_limited_client_udp: AtomicU64,

    /// Queries dropped by the per-client TCP bucket
    pub rate_limited_client_tcp: AtomicU64,

    /// Queries dropped by the global UDP bucket
    pub rate_limited_global_udp: AtomicU64,

    /// Registrations rejected with 429
    pub rate_limited_registration: AtomicU64,

    /// Accepted registrations
    pub registrations_accepted: AtomicU64,

    /// Rejected registrations (validation, auth or store errors)
    pub registrations_rejected: AtomicU64,

    /// Room entries at the last stats scan
    pub rooms: AtomicU64,

    /// Node entries at the last stats scan
    pub nodes: AtomicU64,

    /// Addresses at the last stats scan
    pub addresses: AtomicU64,

    /// Store hits since the last daily reset
    pub store_hits: AtomicU64,
}

impl Metrics {
    /// Create new metrics collector
    pub fn new() -> Self {
        Self {
            start_time: Some(Instant::now()),
            ..Default::default()
        }
    }

    /// Get uptime in seconds
    pub fn uptime_secs(&self) -> u64 {
        self.start_time
            .map(|t| t.elapsed().as_secs())
            .unwrap_or(0)
    }

    pub fn inc_udp_queries(&self) {
        self.udp_queries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_tcp_queries(&self) {
        self.tcp_queries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_truncated(&self) {
        self.truncated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_nxdomain(&self) {
        self.nxdomain.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_notimp(&self) {
        self.notimp.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a denied token for `bucket`
    pub fn inc_rate_limited(&self, bucket: Bucket) {
        let counter = match bucket {
            Bucket::ClientUdp => &self.rate_limited_client_udp,
            Bucket::ClientTcp => &self.rate_limited_client_tcp,
            Bucket::GlobalUdp => &self.rate_limited_global_udp,
            Bucket::Registration => &self.rate_limited_registration,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_registrations_accepted(&self) {
        self.registrations_accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_registrations_rejected(&self) {
        self.registrations_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Update store gauges from a stats scan
    pub fn set_store_stats(&self, stats: &StoreStats) {
        self.rooms.store(stats.rooms, Ordering::Relaxed);
        self.nodes.store(stats.nodes, Ordering::Relaxed);
        self.addresses.store(stats.addresses, Ordering::Relaxed);
        self.store_hits.store(stats.hit_count, Ordering::Relaxed);
    }

    /// Export metrics in Prometheus format
    pub fn to_prometheus(&self) -> String {
        let mut output = String::new();

        // Uptime
        output.push_str(&format!(
            "# HELP pathfinder_beacon_uptime_seconds Beacon uptime in seconds\n\
             # TYPE pathfinder_beacon_uptime_seconds gauge\n\
             pathfinder_beacon_uptime_seconds {}\n\n",
            self.uptime_secs()
        ));

        // DNS
        output.push_str(&format!(
            "# HELP pathfinder_beacon_dns_queries_total DNS queries received\n\
             # TYPE pathfinder_beacon_dns_queries_total counter\n\
             pathfinder_beacon_dns_queries_total{{transport=\"udp\"}} {}\n\
             pathfinder_beacon_dns_queries_total{{transport=\"tcp\"}} {}\n\n",
            self.udp_queries.load(Ordering::Relaxed),
            self.tcp_queries.load(Ordering::Relaxed)
        ));

        output.push_str(&format!(
            "# HELP pathfinder_beacon_dns_truncated_total UDP replies sent truncated\n\
             # TYPE pathfinder_beacon_dns_truncated_total counter\n\
             pathfinder_beacon_dns_truncated_total {}\n\n",
            self.truncated.load(Ordering::Relaxed)
        ));

        output.push_str(&format!(
            "# HELP pathfinder_beacon_dns_nxdomain_total NXDOMAIN replies\n\
             # TYPE pathfinder_beacon_dns_nxdomain_total counter\n\
             pathfinder_beacon_dns_nxdomain_total {}\n\n",
            self.nxdomain.load(Ordering::Relaxed)
        ));

        output.push_str(&format!(
            "# HELP pathfinder_beacon_dns_notimp_total NOTIMP replies\n\
             # TYPE pathfinder_beacon_dns_notimp_total counter\n\
             pathfinder_beacon_dns_notimp_total {}\n\n",
            self.notimp.load(Ordering::Relaxed)
        ));

        // Rate limiting
        output.push_str(
            "# HELP pathfinder_beacon_rate_limited_total Requests denied by a rate limit bucket\n\
             # TYPE pathfinder_beacon_rate_limited_total counter\n",
        );
        for (bucket, counter) in [
            (Bucket::ClientUdp, &self.rate_limited_client_udp),
            (Bucket::ClientTcp, &self.rate_limited_client_tcp),
            (Bucket::GlobalUdp, &self.rate_limited_global_udp),
            (Bucket::Registration, &self.rate_limited_registration),
        ] {
            output.push_str(&format!(
                "pathfinder_beacon_rate_limited_total{{bucket=\"{}\"}} {}\n",
                bucket.as_str(),
                counter.load(Ordering::Relaxed)
            ));
        }
        output.push('\n');

        // Registrations
        output.push_str(&format!(
            "# HELP pathfinder_beacon_registrations_total Registrations by outcome\n\
             # TYPE pathfinder_beacon_registrations_total counter\n\
             pathfinder_beacon_registrations_total{{outcome=\"accepted\"}} {}\n\
             pathfinder_beacon_registrations_total{{outcome=\"rejected\"}} {}\n\n",
            self.registrations_accepted.load(Ordering::Relaxed),
            self.registrations_rejected.load(Ordering::Relaxed)
        ));

        // Store
        output.push_str(&format!(
            "# HELP pathfinder_beacon_rooms Room entries in the store\n\
             # TYPE pathfinder_beacon_rooms gauge\n\
             pathfinder_beacon_rooms {}\n\n",
            self.rooms.load(Ordering::Relaxed)
        ));

        output.push_str(&format!(
            "# HELP pathfinder_beacon_nodes Node entries in the store\n\
             # TYPE pathfinder_beacon_nodes gauge\n\
             pathfinder_beacon_nodes {}\n\n",
            self.nodes.load(Ordering::Relaxed)
        ));

        output.push_str(&format!(
            "# HELP pathfinder_beacon_addresses Registered addresses in the store\n\
             # TYPE pathfinder_beacon_addresses gauge\n\
             pathfinder_beacon_addresses {}\n\n",
            self.addresses.load(Ordering::Relaxed)
        ));

        output.push_str(&format!(
            "# HELP pathfinder_beacon_store_hits Store hits since the last daily reset\n\
             # TYPE pathfinder_beacon_store_hits gauge\n\
             pathfinder_beacon_store_hits {}\n\n",
            self.store_hits.load(Ordering::Relaxed)
        ));

        output
    }

    /// Export metrics as JSON
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "uptime_secs": self.uptime_secs(),
            "dns": {
                "udp_queries": self.udp_queries.load(Ordering::Relaxed),
                "tcp_queries": self.tcp_queries.load(Ordering::Relaxed),
                "truncated": self.truncated.load(Ordering::Relaxed),
                "nxdomain": self.nxdomain.load(Ordering::Relaxed),
                "notimp": self.notimp.load(Ordering::Relaxed),
            },
            "rate_limited": {
                "client_udp": self.rate_limited_client_udp.load(Ordering::Relaxed),
                "client_tcp": self.rate_limited_client_tcp.load(Ordering::Relaxed),
                "global_udp": self.rate_limited_global_udp.load(Ordering::Relaxed),
                "registration": self.rate_limited_registration.load(Ordering::Relaxed),
            },
            "registrations": {
                "accepted": self.registrations_accepted.load(Ordering::Relaxed),
                "rejected": self.registrations_rejected.load(Ordering::Relaxed),
            },
            "store": {
                "rooms": self.rooms.load(Ordering::Relaxed),
                "nodes": self.nodes.load(Ordering::Relaxed),
                "addresses": self.addresses.load(Ordering::Relaxed),
                "hit_count": self.store_hits.load(Ordering::Relaxed),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_increment() {
        let metrics = Metrics::new();

        metrics.inc_udp_queries();
        metrics.inc_udp_queries();
        metrics.inc_tcp_queries();
        metrics.inc_rate_limited(Bucket::GlobalUdp);

        assert_eq!(metrics.udp_queries.load(Ordering::Relaxed), 2);
        assert_eq!(metrics.tcp_queries.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.rate_limited_global_udp.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.rate_limited_client_udp.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_prometheus_format() {
        let metrics = Metrics::new();
        metrics.inc_rate_limited(Bucket::Registration);
        metrics.set_store_stats(&StoreStats {
            rooms: 3,
            nodes: 5,
            addresses: 12,
            hit_count: 40,
        });

        let output = metrics.to_prometheus();

        assert!(output.contains("pathfinder_beacon_rooms 3"));
        assert!(output.contains("pathfinder_beacon_addresses 12"));
        assert!(output.contains("pathfinder_beacon_rate_limited_total{bucket=\"registration\"} 1"));
        assert!(output.contains("pathfinder_beacon_dns_queries_total{transport=\"udp\"} 0"));
    }

    #[test]
    fn test_json_format() {
        let metrics = Metrics::new();
        metrics.inc_registrations_accepted();
        metrics.inc_truncated();

        let json = metrics.to_json();

        assert_eq!(json["registrations"]["accepted"], 1);
        assert_eq!(json["dns"]["truncated"], 1);
    }
}
