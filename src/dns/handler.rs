//! DNS Request Handler
//!
//! Routes queries for the served zones: rate limits, validates names and
//! answers from static records or the name store.

use hickory_proto::op::{Header, Message, MessageType, OpCode, ResponseCode};
use hickory_proto::rr::{Name, Record, RecordType};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, trace, warn};

use super::records::{self, StaticRecords};
use super::zone::{TxtTarget, ZoneSet};
use super::DnsError;
use crate::api::Metrics;
use crate::config::BeaconConfig;
use crate::rate_limiter::{Bucket, RateLimiter};
use crate::registry::{NameStore, StoreError};
use crate::types::{node_key, room_key};

/// Smallest UDP payload every client accepts
const MIN_UDP_PAYLOAD: u16 = 512;

/// Largest message a 2-byte TCP length prefix can frame
const MAX_TCP_MESSAGE: usize = u16::MAX as usize;

/// Wire bytes of a TXT record besides its text: compressed owner name,
/// type, class, TTL, RDLENGTH and the string length octet
const TXT_RECORD_OVERHEAD: usize = 2 + 2 + 2 + 4 + 2 + 1;

/// Transport a query arrived on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Udp,
    Tcp,
}

impl Transport {
    fn client_bucket(self) -> Bucket {
        match self {
            Transport::Udp => Bucket::ClientUdp,
            Transport::Tcp => Bucket::ClientTcp,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Transport::Udp => "udp",
            Transport::Tcp => "tcp",
        }
    }
}

/// Record types we answer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QueryKind {
    Soa,
    Ns,
    A,
    Aaaa,
    Txt,
    Unsupported,
}

impl From<RecordType> for QueryKind {
    fn from(record_type: RecordType) -> Self {
        match record_type {
            RecordType::SOA => QueryKind::Soa,
            RecordType::NS => QueryKind::Ns,
            RecordType::A => QueryKind::A,
            RecordType::AAAA => QueryKind::Aaaa,
            RecordType::TXT => QueryKind::Txt,
            _ => QueryKind::Unsupported,
        }
    }
}

/// Query router shared by the UDP and TCP listeners
pub struct QueryRouter {
    zones: ZoneSet,
    records: StaticRecords,
    store: Arc<NameStore>,
    limiter: Arc<RateLimiter>,
    metrics: Arc<Metrics>,
    room_ttl: u32,
    node_ttl: u32,
    max_udp_payload: u16,
}

impl QueryRouter {
    pub fn new(
        config: &BeaconConfig,
        store: Arc<NameStore>,
        limiter: Arc<RateLimiter>,
        metrics: Arc<Metrics>,
    ) -> Result<Self, DnsError> {
        Ok(Self {
            zones: ZoneSet::new(&config.apex_zone, &config.legacy_zones)?,
            records: StaticRecords::from_config(config)?,
            store,
            limiter,
            metrics,
            room_ttl: config.room_answer_ttl_secs,
            node_ttl: config.node_answer_ttl_secs,
            max_udp_payload: config.max_udp_payload,
        })
    }

    /// Answer one request
    ///
    /// `None` means the request is dropped without a reply.
    pub fn handle(
        &self,
        transport: Transport,
        client: SocketAddr,
        request: &Message,
    ) -> Option<Message> {
        let start = Instant::now();
        let client_ip = client.ip().to_canonical();

        match transport {
            Transport::Udp => self.metrics.inc_udp_queries(),
            Transport::Tcp => self.metrics.inc_tcp_queries(),
        }

        // Responses are never answered
        if request.message_type() == MessageType::Response {
            trace!("Ignored response message from {}", client);
            return None;
        }

        if transport == Transport::Udp && !self.take(Bucket::GlobalUdp, client) {
            return None;
        }

        let mut header = Header::response_from_request(request.header());
        header.set_authoritative(true);

        let mut response = Message::new();
        response.set_header(header);
        response.add_queries(request.queries().iter().cloned());

        let bucket = transport.client_bucket();

        if request.op_code() != OpCode::Query {
            if !self.take(bucket, client) {
                return None;
            }
            response.set_response_code(ResponseCode::NotImp);
            self.metrics.inc_notimp();
            return Some(response);
        }

        let mut remaining = 0;

        for query in request.queries() {
            let take = self.limiter.take(bucket, client_ip);
            if !take.allowed {
                self.metrics.inc_rate_limited(bucket);
                debug!(
                    "Dropped query from {} over {}: {} bucket empty",
                    client,
                    transport.as_str(),
                    bucket.as_str()
                );
                return None;
            }
            remaining = take.remaining;

            let name = query.name().to_lowercase();

            if !self.zones.serves(&name) {
                response.set_response_code(ResponseCode::NXDomain);
                break;
            }

            match QueryKind::from(query.query_type()) {
                QueryKind::Soa => {
                    response.add_answer(self.records.soa(&name));
                }
                QueryKind::Ns => {
                    response.add_answer(self.records.ns(&name));
                }
                QueryKind::A => {
                    response.add_answer(self.records.a(&name));
                }
                QueryKind::Aaaa => {
                    response.add_answer(self.records.aaaa(&name));
                }
                QueryKind::Txt if transport == Transport::Udp => {
                    // TXT answers only go out over TCP
                    response.take_answers();
                    response.set_response_code(ResponseCode::NoError);
                    response.set_truncated(true);
                    break;
                }
                QueryKind::Txt => self.answer_txt(&mut response, &name),
                QueryKind::Unsupported => {
                    response.set_response_code(ResponseCode::NotImp);
                }
            }
        }

        match response.response_code() {
            ResponseCode::NXDomain => self.metrics.inc_nxdomain(),
            ResponseCode::NotImp => self.metrics.inc_notimp(),
            _ => {}
        }
        if response.truncated() {
            self.metrics.inc_truncated();
        }

        debug!(
            "Query from {} over {}: {} question(s), {} answer(s), {}{} in {:?}, {} token(s) left",
            client,
            transport.as_str(),
            request.queries().len(),
            response.answers().len(),
            response.response_code(),
            if response.truncated() { " (truncated)" } else { "" },
            start.elapsed(),
            remaining
        );

        Some(response)
    }

    /// Encode a reply for UDP, truncating it when it exceeds what the
    /// client accepts
    pub fn encode_udp(&self, request: &Message, mut response: Message) -> Result<Vec<u8>, DnsError> {
        let limit = usize::from(
            request
                .max_payload()
                .max(MIN_UDP_PAYLOAD)
                .min(self.max_udp_payload),
        );

        let bytes = response.to_vec()?;
        if bytes.len() <= limit {
            return Ok(bytes);
        }

        response.take_answers();
        response.take_name_servers();
        response.take_additionals();
        response.set_truncated(true);
        self.metrics.inc_truncated();

        Ok(response.to_vec()?)
    }

    fn take(&self, bucket: Bucket, client: SocketAddr) -> bool {
        let take = self.limiter.take(bucket, client.ip().to_canonical());
        if !take.allowed {
            self.metrics.inc_rate_limited(bucket);
            debug!("Dropped query from {}: {} bucket empty", client, bucket.as_str());
        }
        take.allowed
    }

    fn answer_txt(&self, response: &mut Message, name: &Name) {
        let (key, ttl) = match self.zones.classify_txt(name) {
            TxtTarget::Room(room) => (room_key(&room), self.room_ttl),
            TxtTarget::Node(node) => (node_key(&node), self.node_ttl),
            TxtTarget::Auth => {
                response.add_answer(self.records.auth_probe(name));
                return;
            }
            TxtTarget::Invalid => {
                response.set_response_code(ResponseCode::NXDomain);
                return;
            }
            TxtTarget::Other => return,
        };

        let values = match self.store.get(&key) {
            Ok(values) => values,
            Err(StoreError::NotFound) => return,
            Err(e) => {
                warn!("Failed to read {}: {}", key, e);
                return;
            }
        };

        // Reply must fit one TCP frame; owner name counted once uncompressed
        let mut size = response
            .to_vec()
            .map(|bytes| bytes.len())
            .unwrap_or(MAX_TCP_MESSAGE)
            + wire_len(name);

        let mut answers: Vec<Record> = Vec::with_capacity(values.len());
        for value in &values {
            size += TXT_RECORD_OVERHEAD + value.len();
            if size > MAX_TCP_MESSAGE {
                break;
            }
            answers.push(records::txt(name, value, ttl));
        }

        if answers.len() < values.len() {
            warn!(
                "Answer for {} capped at {} of {} values",
                key,
                answers.len(),
                values.len()
            );
        }

        response.add_answers(answers);
    }
}

/// Uncompressed wire length of a name
fn wire_len(name: &Name) -> usize {
    name.iter().map(|label| label.len() + 1).sum::<usize>() + 1
}
