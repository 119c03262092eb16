//! Record synthesis
//!
//! Static records (SOA, NS, A, AAAA, auth TXT) come from configuration,
//! TXT answers for rooms and nodes are built from stored values.

use hickory_proto::rr::rdata::{A, AAAA, NS, SOA, TXT};
use hickory_proto::rr::{Name, RData, Record};
use std::net::{Ipv4Addr, Ipv6Addr};

use super::DnsError;
use crate::config::BeaconConfig;

/// Static zone data, parsed once from configuration
#[derive(Debug, Clone)]
pub struct StaticRecords {
    nameserver: Name,
    hostmaster: Name,
    ipv4: Ipv4Addr,
    ipv6: Ipv6Addr,
    ttl: u32,
    refresh: i32,
    retry: i32,
    expire: i32,
    minimum: u32,
    auth_probe: String,
}

impl StaticRecords {
    pub fn from_config(config: &BeaconConfig) -> Result<Self, DnsError> {
        Ok(Self {
            nameserver: parse_name(&config.nameserver)?,
            hostmaster: parse_name(&config.hostmaster)?,
            ipv4: config.service_ipv4,
            ipv6: config.service_ipv6,
            ttl: config.static_ttl_secs,
            refresh: config.soa_refresh_secs,
            retry: config.soa_retry_secs,
            expire: config.soa_expire_secs,
            minimum: config.soa_minimum_secs,
            auth_probe: config.auth_probe_value.clone(),
        })
    }

    /// SOA for `name`; the serial is the current Unix time
    pub fn soa(&self, name: &Name) -> Record {
        let serial = chrono::Utc::now().timestamp() as u32;
        let soa = SOA::new(
            self.nameserver.clone(),
            self.hostmaster.clone(),
            serial,
            self.refresh,
            self.retry,
            self.expire,
            self.minimum,
        );
        Record::from_rdata(name.clone(), self.ttl, RData::SOA(soa))
    }

    pub fn ns(&self, name: &Name) -> Record {
        Record::from_rdata(name.clone(), self.ttl, RData::NS(NS(self.nameserver.clone())))
    }

    pub fn a(&self, name: &Name) -> Record {
        Record::from_rdata(name.clone(), self.ttl, RData::A(A(self.ipv4)))
    }

    pub fn aaaa(&self, name: &Name) -> Record {
        Record::from_rdata(name.clone(), self.ttl, RData::AAAA(AAAA(self.ipv6)))
    }

    pub fn auth_probe(&self, name: &Name) -> Record {
        txt(name, &self.auth_probe, self.ttl)
    }
}

/// One TXT record holding `value`
pub fn txt(name: &Name, value: &str, ttl: u32) -> Record {
    Record::from_rdata(
        name.clone(),
        ttl,
        RData::TXT(TXT::new(vec![value.to_string()])),
    )
}

pub(super) fn parse_name(name: &str) -> Result<Name, DnsError> {
    Name::from_ascii(name).map_err(|source| DnsError::InvalidName {
        name: name.to_string(),
        source,
    })
}
