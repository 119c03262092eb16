//! Served zones and query name classification
//!
//! Everything works on wire labels, so a label holding an escaped dot never
//! splits into two.

use hickory_proto::rr::Name;

use super::records::parse_name;
use super::DnsError;
use crate::types::is_sha224_hex;

/// What a TXT query asks for, decided by its second label
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxtTarget {
    /// Node ids registered in a room
    Room(String),
    /// Addresses registered by a node
    Node(String),
    /// Fixed liveness probe
    Auth,
    /// A room or node lookup with a malformed id or zone
    Invalid,
    /// Nothing we publish
    Other,
}

/// The apex zone plus legacy zones the beacon answers for
#[derive(Debug, Clone)]
pub struct ZoneSet {
    apex: Name,
    zones: Vec<Name>,
}

impl ZoneSet {
    pub fn new(apex: &str, legacy: &[String]) -> Result<Self, DnsError> {
        let apex = fqdn(apex)?;
        let mut zones = vec![apex.clone()];
        for zone in legacy {
            let zone = fqdn(zone)?;
            if !zones.contains(&zone) {
                zones.push(zone);
            }
        }

        Ok(Self { apex, zones })
    }

    /// Whether queries for `name` are answered at all
    ///
    /// The apex itself and any name below a served zone qualify. Legacy
    /// zone apexes do not.
    pub fn serves(&self, name: &Name) -> bool {
        *name == self.apex
            || self
                .zones
                .iter()
                .any(|zone| name.num_labels() > zone.num_labels() && zone.zone_of(name))
    }

    /// Whether `name` is exactly one of the served zones
    fn is_zone(&self, name: &Name) -> bool {
        self.zones.iter().any(|zone| zone == name)
    }

    /// Classify a TXT query name
    pub fn classify_txt(&self, name: &Name) -> TxtTarget {
        let labels: Vec<&[u8]> = name.iter().collect();
        if labels.len() < 2 {
            return TxtTarget::Other;
        }

        match labels[1].to_ascii_lowercase().as_slice() {
            kind @ (b"room" | b"node") => {
                if labels.len() < 3 || !self.is_zone(&name.trim_to(labels.len() - 2)) {
                    return TxtTarget::Invalid;
                }

                let id = String::from_utf8_lossy(labels[0]).to_ascii_lowercase();
                if !is_sha224_hex(&id) {
                    return TxtTarget::Invalid;
                }

                if kind == b"room" {
                    TxtTarget::Room(id)
                } else {
                    TxtTarget::Node(id)
                }
            }
            b"auth" => TxtTarget::Auth,
            _ => TxtTarget::Other,
        }
    }
}

fn fqdn(zone: &str) -> Result<Name, DnsError> {
    let mut name = parse_name(zone)?.to_lowercase();
    name.set_fqdn(true);
    Ok(name)
}
