//! Registration Module
//!
//! Accepts node registrations for a room and writes them to the name store.
//!
//! ## Protocol
//!
//! 1. Node sends a JSON registration (room, signature, public key, addresses)
//! 2. Beacon validates the payload
//! 3. Beacon verifies the room signature (and that the key owns the room)
//! 4. Beacon derives the node id from the observed source IP
//! 5. Beacon appends the node to `room:<room>` and the addresses to
//!    `node:<node>`
//!
//! ## Security
//!
//! - Only holders of the room's private key can add nodes to it
//! - Node ids come from the observed IP, never from the payload
//! - Rate limiting happens in front of this module (HTTP API)

use std::net::IpAddr;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::BeaconConfig;
use crate::crypto::{self, AuthError};
use crate::registry::{EntryTtl, NameStore, StoreError};
use crate::types::{
    is_sha224_hex, node_key, room_key, NodeAddress, Protocol, RegistrationRequest,
    ValidatedRegistration, MAX_ADDRESSES_PER_REGISTRATION,
};

/// Payload validation failures, checked in declaration order
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("body is empty")]
    EmptyBody,

    #[error("body is not a valid registration: {0}")]
    Malformed(String),

    #[error("room is empty")]
    EmptyRoom,

    #[error("addresses are empty")]
    NoAddresses,

    #[error("too many addresses: {0}")]
    TooManyAddresses(usize),

    #[error("room is not a valid sha224 hash")]
    InvalidRoom,

    #[error("ip is not valid: {0}")]
    InvalidIp(String),

    #[error("port is not valid: {0}")]
    InvalidPort(i64),

    #[error("protocol is not valid: {0}")]
    InvalidProtocol(String),
}

/// Registration failures
#[derive(Debug, thiserror::Error)]
pub enum RegistrationError {
    #[error("invalid registration: {0}")]
    Validation(#[from] ValidationError),

    #[error("room authentication failed: {0}")]
    Auth(#[from] AuthError),

    #[error("failed to store registration: {0}")]
    Store(#[from] StoreError),
}

impl RegistrationError {
    /// HTTP status for this failure
    pub fn status_code(&self) -> u16 {
        match self {
            RegistrationError::Validation(_) => 400,
            RegistrationError::Auth(e) if e.is_decode_failure() => 400,
            RegistrationError::Auth(_) => 401,
            RegistrationError::Store(_) => 500,
        }
    }
}

/// Validate a raw registration body
pub fn validate_registration(body: &str) -> Result<ValidatedRegistration, ValidationError> {
    if body.trim().is_empty() {
        return Err(ValidationError::EmptyBody);
    }

    let request: RegistrationRequest =
        serde_json::from_str(body).map_err(|e| ValidationError::Malformed(e.to_string()))?;

    if request.room.is_empty() {
        return Err(ValidationError::EmptyRoom);
    }

    if request.addresses.is_empty() {
        return Err(ValidationError::NoAddresses);
    }

    if request.addresses.len() > MAX_ADDRESSES_PER_REGISTRATION {
        return Err(ValidationError::TooManyAddresses(request.addresses.len()));
    }

    if !is_sha224_hex(&request.room) {
        return Err(ValidationError::InvalidRoom);
    }

    let ips = request
        .addresses
        .iter()
        .map(|addr| {
            addr.ip
                .parse::<IpAddr>()
                .map_err(|_| ValidationError::InvalidIp(addr.ip.clone()))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let ports = request
        .addresses
        .iter()
        .map(|addr| {
            u16::try_from(addr.port)
                .ok()
                .filter(|port| *port != 0)
                .ok_or(ValidationError::InvalidPort(addr.port))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let protocols = request
        .addresses
        .iter()
        .map(|addr| {
            Protocol::parse(&addr.protocol)
                .ok_or_else(|| ValidationError::InvalidProtocol(addr.protocol.clone()))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let addresses = protocols
        .into_iter()
        .zip(ips)
        .zip(ports)
        .map(|((protocol, ip), port)| NodeAddress { protocol, ip, port })
        .collect();

    Ok(ValidatedRegistration {
        room: request.room,
        room_signature: request.room_signature,
        public_key: request.public_key,
        addresses,
    })
}

/// Outcome of a successful registration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registered {
    pub room: String,
    pub node_id: String,
    pub addresses: usize,
}

/// Registration handler
pub struct Registrar {
    store: Arc<NameStore>,
    registration_ttl: EntryTtl,
    demo_room: Option<String>,
    require_room_key_binding: bool,
}

impl Registrar {
    pub fn new(config: &BeaconConfig, store: Arc<NameStore>) -> Self {
        Self {
            store,
            registration_ttl: EntryTtl::from_secs(config.registration_ttl_secs),
            demo_room: config.demo_room.clone(),
            require_room_key_binding: config.require_room_key_binding,
        }
    }

    /// Validate, authenticate and store a registration from `observed_ip`
    pub fn register(&self, body: &str, observed_ip: IpAddr) -> Result<Registered, RegistrationError> {
        let registration = validate_registration(body)?;

        let key = crypto::verify_room_signature(
            &registration.room,
            &registration.room_signature,
            &registration.public_key,
        )?;
        if self.require_room_key_binding {
            key.ensure_owns(&registration.room)?;
        }

        let node_id = crypto::node_id(observed_ip);
        let ttl = self.ttl_for(&registration.room);

        self.store
            .append(&room_key(&registration.room), &node_id, ttl)?;

        let addresses: Vec<String> = registration
            .addresses
            .iter()
            .map(ToString::to_string)
            .collect();

        if let Err(e) = self
            .store
            .append_all(&node_key(&node_id), addresses.iter().map(String::as_str), ttl)
        {
            warn!(
                "Partial registration: node {} added to room {} without addresses: {}",
                node_id, registration.room, e
            );
            return Err(e.into());
        }

        debug!("Addresses for node {}: {:?}", node_id, addresses);
        info!(
            "📝 Node {} registered in room {} from {}",
            &node_id[..16],
            &registration.room[..16],
            observed_ip
        );

        Ok(Registered {
            room: registration.room,
            node_id,
            addresses: addresses.len(),
        })
    }

    fn ttl_for(&self, room: &str) -> EntryTtl {
        if self.demo_room.as_deref() == Some(room) {
            EntryTtl::Never
        } else {
            self.registration_ttl
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::test_support::{other_room_key, room_key as test_room_key};
    use crate::crypto::RoomKey;
    use serde_json::json;

    const MIB: u64 = 1024 * 1024;

    fn registrar_with(config: BeaconConfig) -> (Registrar, Arc<NameStore>) {
        let store = Arc::new(NameStore::in_memory(MIB));
        (Registrar::new(&config, store.clone()), store)
    }

    fn registrar() -> (Registrar, Arc<NameStore>) {
        registrar_with(BeaconConfig::default())
    }

    fn body_for(key: &RoomKey, room: &str, addresses: serde_json::Value) -> String {
        json!({
            "room": room,
            "roomSignature": key.sign_room(room).unwrap(),
            "publicKey": key.public_key_base64().unwrap(),
            "addresses": addresses,
        })
        .to_string()
    }

    fn valid_body(addresses: serde_json::Value) -> String {
        let key = test_room_key();
        body_for(key, &key.room_name().unwrap(), addresses)
    }

    fn room() -> String {
        "ab".repeat(28)
    }

    fn body_with(addresses: serde_json::Value) -> String {
        json!({"room": room(), "addresses": addresses}).to_string()
    }

    #[test]
    fn test_validation_order() {
        assert_eq!(validate_registration("").unwrap_err(), ValidationError::EmptyBody);
        assert!(matches!(
            validate_registration("{not json").unwrap_err(),
            ValidationError::Malformed(_)
        ));
        assert_eq!(
            validate_registration(r#"{"addresses": []}"#).unwrap_err(),
            ValidationError::EmptyRoom
        );
        assert_eq!(
            validate_registration(&body_with(json!([]))).unwrap_err(),
            ValidationError::NoAddresses
        );

        let too_many: Vec<_> = (0..51)
            .map(|i| json!({"protocol": "tcp", "ip": "1.2.3.4", "port": 1000 + i}))
            .collect();
        assert_eq!(
            validate_registration(&body_with(json!(too_many))).unwrap_err(),
            ValidationError::TooManyAddresses(51)
        );

        let bad_room = json!({
            "room": "xyz",
            "addresses": [{"protocol": "bogus", "ip": "nope", "port": 0}]
        });
        assert_eq!(
            validate_registration(&bad_room.to_string()).unwrap_err(),
            ValidationError::InvalidRoom
        );
    }

    #[test]
    fn test_all_ips_checked_before_ports() {
        let body = body_with(json!([
            {"protocol": "tcp", "ip": "1.2.3.4", "port": 0},
            {"protocol": "tcp", "ip": "999.1.1.1", "port": 80}
        ]));
        assert_eq!(
            validate_registration(&body).unwrap_err(),
            ValidationError::InvalidIp("999.1.1.1".to_string())
        );
    }

    #[test]
    fn test_all_ports_checked_before_protocols() {
        let body = body_with(json!([
            {"protocol": "sctp", "ip": "1.2.3.4", "port": 80},
            {"protocol": "tcp", "ip": "1.2.3.4", "port": 65536}
        ]));
        assert_eq!(
            validate_registration(&body).unwrap_err(),
            ValidationError::InvalidPort(65536)
        );

        let body = body_with(json!([{"protocol": "TCP", "ip": "1.2.3.4", "port": 80}]));
        assert_eq!(
            validate_registration(&body).unwrap_err(),
            ValidationError::InvalidProtocol("TCP".to_string())
        );
    }

    #[test]
    fn test_valid_registration_parses() {
        let body = body_with(json!([
            {"protocol": "tcp", "ip": "1.2.3.4", "port": 9000},
            {"protocol": "udp", "ip": "2001:db8::1", "port": 65535}
        ]));
        let registration = validate_registration(&body).unwrap();

        assert_eq!(registration.room, room());
        assert_eq!(registration.addresses[0].to_string(), "tcp://1.2.3.4:9000");
        assert_eq!(registration.addresses[1].to_string(), "udp://2001:db8::1:65535");
    }

    #[test]
    fn test_register_writes_room_and_node() {
        let (registrar, store) = registrar();
        let ip: IpAddr = "203.0.113.5".parse().unwrap();
        let body = valid_body(json!([
            {"protocol": "tcp", "ip": "1.2.3.4", "port": 9000},
            {"protocol": "tcp", "ip": "1.2.3.4", "port": 9000}
        ]));

        let registered = registrar.register(&body, ip).unwrap();
        let node_id = crypto::node_id(ip);

        assert_eq!(registered.node_id, node_id);
        assert_eq!(
            store.get(&room_key(&registered.room)).unwrap(),
            vec![node_id.clone()]
        );
        assert_eq!(
            store.get(&node_key(&node_id)).unwrap(),
            vec!["tcp://1.2.3.4:9000"]
        );
    }

    #[test]
    fn test_reregistration_dedups() {
        let (registrar, store) = registrar();
        let ip: IpAddr = "203.0.113.5".parse().unwrap();
        let body = valid_body(json!([{"protocol": "udp", "ip": "1.2.3.4", "port": 9000}]));

        registrar.register(&body, ip).unwrap();
        let registered = registrar.register(&body, ip).unwrap();

        assert_eq!(store.get(&room_key(&registered.room)).unwrap().len(), 1);
        assert_eq!(store.get(&node_key(&registered.node_id)).unwrap().len(), 1);
    }

    #[test]
    fn test_signature_for_other_room_rejected() {
        let (registrar, store) = registrar();
        let key = test_room_key();
        let own_room = key.room_name().unwrap();
        let other_room = other_room_key().room_name().unwrap();

        // Signed over the key's own room but claims another
        let body = json!({
            "room": other_room,
            "roomSignature": key.sign_room(&own_room).unwrap(),
            "publicKey": key.public_key_base64().unwrap(),
            "addresses": [{"protocol": "tcp", "ip": "1.2.3.4", "port": 1}],
        })
        .to_string();

        let err = registrar
            .register(&body, "10.0.0.1".parse().unwrap())
            .unwrap_err();
        assert!(matches!(err, RegistrationError::Auth(AuthError::InvalidSignature)));
        assert_eq!(err.status_code(), 401);
        assert!(matches!(store.get(&room_key(&other_room)), Err(StoreError::NotFound)));
    }

    #[test]
    fn test_room_key_binding() {
        let key = test_room_key();
        let foreign_room = other_room_key().room_name().unwrap();
        let body = body_for(
            key,
            &foreign_room,
            json!([{"protocol": "tcp", "ip": "1.2.3.4", "port": 1}]),
        );
        let ip: IpAddr = "10.0.0.1".parse().unwrap();

        let (registrar, _) = registrar();
        let err = registrar.register(&body, ip).unwrap_err();
        assert!(matches!(
            err,
            RegistrationError::Auth(AuthError::RoomKeyMismatch { .. })
        ));
        assert_eq!(err.status_code(), 401);

        let (legacy, store) = registrar_with(BeaconConfig {
            require_room_key_binding: false,
            ..BeaconConfig::default()
        });
        legacy.register(&body, ip).unwrap();
        assert!(store.get(&room_key(&foreign_room)).is_ok());
    }

    #[test]
    fn test_decode_failure_is_bad_request() {
        let (registrar, _) = registrar();
        let body = json!({
            "room": room(),
            "roomSignature": "%%%",
            "publicKey": "%%%",
            "addresses": [{"protocol": "tcp", "ip": "1.2.3.4", "port": 1}],
        })
        .to_string();

        let err = registrar
            .register(&body, "10.0.0.1".parse().unwrap())
            .unwrap_err();
        assert_eq!(err.status_code(), 400);
    }

    #[test]
    fn test_validation_failure_is_bad_request() {
        let (registrar, _) = registrar();
        let err = registrar
            .register("", "10.0.0.1".parse().unwrap())
            .unwrap_err();
        assert!(matches!(err, RegistrationError::Validation(ValidationError::EmptyBody)));
        assert_eq!(err.status_code(), 400);
    }

    #[test]
    fn test_demo_room_never_expires() {
        let room = test_room_key().room_name().unwrap();
        let (registrar, _) = registrar_with(BeaconConfig {
            demo_room: Some(room.clone()),
            ..BeaconConfig::default()
        });

        assert_eq!(registrar.ttl_for(&room), EntryTtl::Never);
        assert_eq!(
            registrar.ttl_for(&"cd".repeat(28)),
            EntryTtl::from_secs(3600)
        );
    }

    #[test]
    fn test_store_failure_is_server_error() {
        let store = Arc::new(NameStore::in_memory(MIB));
        let registrar = Registrar::new(&BeaconConfig::default(), store);

        // 1 KiB per entry: 50 long IPv6 addresses do not fit one node entry
        let addresses: Vec<_> = (0..50)
            .map(|i| json!({"protocol": "tcp", "ip": format!("2001:db8:aaaa:bbbb:cccc:dddd:eeee:{:x}", i), "port": 65000}))
            .collect();
        let body = valid_body(json!(addresses));

        let err = registrar
            .register(&body, "10.0.0.1".parse().unwrap())
            .unwrap_err();
        assert!(matches!(
            err,
            RegistrationError::Store(StoreError::EntryTooLarge { .. })
        ));
        assert_eq!(err.status_code(), 500);
    }
}
