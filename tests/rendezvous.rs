//! End-to-end rendezvous: register over HTTP, resolve over DNS sockets

use axum::body::Body;
use axum::extract::connect_info::MockConnectInfo;
use axum::http::{Request, StatusCode};
use hickory_proto::op::{Message, MessageType, OpCode, Query};
use hickory_proto::rr::{Name, RData, RecordType};
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::watch;
use tower::ServiceExt;

use pathfinder_beacon::api::{self, ApiState, Metrics};
use pathfinder_beacon::crypto::{self, RoomKey};
use pathfinder_beacon::dns::{DnsServer, QueryRouter};
use pathfinder_beacon::rate_limiter::RateLimiter;
use pathfinder_beacon::registration::Registrar;
use pathfinder_beacon::{BeaconConfig, NameStore};

const MIB: u64 = 1024 * 1024;

fn room_key() -> &'static RoomKey {
    static KEY: OnceLock<RoomKey> = OnceLock::new();
    KEY.get_or_init(|| RoomKey::generate(1024).unwrap())
}

struct Beacon {
    state: Arc<ApiState>,
    udp: SocketAddr,
    tcp: SocketAddr,
    // Dropping the sender stops the listeners
    _shutdown: watch::Sender<bool>,
}

async fn start_beacon() -> Beacon {
    let config = Arc::new(BeaconConfig::default());
    let store = Arc::new(NameStore::in_memory(MIB));
    let limiter = Arc::new(RateLimiter::new(&config.rate_limits).unwrap());
    let metrics = Arc::new(Metrics::new());

    let router = Arc::new(
        QueryRouter::new(&config, store.clone(), limiter.clone(), metrics.clone()).unwrap(),
    );
    let server = DnsServer::bind(
        SocketAddr::from(([127, 0, 0, 1], 0)),
        router,
        Duration::from_secs(5),
    )
    .await
    .unwrap();
    let udp = server.udp_addr().unwrap();
    let tcp = server.tcp_addr().unwrap();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(server.run(shutdown_rx));

    let state = Arc::new(ApiState {
        registrar: Arc::new(Registrar::new(&config, store.clone())),
        limiter,
        metrics,
        store,
        config,
    });

    Beacon {
        state,
        udp,
        tcp,
        _shutdown: shutdown_tx,
    }
}

async fn register_from(beacon: &Beacon, peer: IpAddr, ip: &str, port: u16) -> StatusCode {
    let key = room_key();
    let room = key.room_name().unwrap();
    let body = serde_json::json!({
        "room": room,
        "roomSignature": key.sign_room(&room).unwrap(),
        "publicKey": key.public_key_base64().unwrap(),
        "addresses": [{"protocol": "tcp", "ip": ip, "port": port}],
    })
    .to_string();

    let app = api::router(beacon.state.clone()).layer(MockConnectInfo(SocketAddr::new(peer, 40000)));
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/register")
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();

    response.status()
}

fn txt_query(name: &str) -> Message {
    let mut message = Message::new();
    message.set_id(7);
    message.set_message_type(MessageType::Query);
    message.set_op_code(OpCode::Query);
    message.add_query(Query::query(Name::from_ascii(name).unwrap(), RecordType::TXT));
    message
}

async fn query_tcp(addr: SocketAddr, request: &Message) -> Message {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let bytes = request.to_vec().unwrap();

    stream.write_u16(bytes.len() as u16).await.unwrap();
    stream.write_all(&bytes).await.unwrap();

    let len = stream.read_u16().await.unwrap();
    let mut reply = vec![0u8; usize::from(len)];
    stream.read_exact(&mut reply).await.unwrap();

    Message::from_vec(&reply).unwrap()
}

fn txt_values(response: &Message) -> Vec<(String, u32)> {
    response
        .answers()
        .iter()
        .filter_map(|record| match record.data() {
            Some(RData::TXT(txt)) => Some((
                txt.txt_data()
                    .iter()
                    .map(|part| String::from_utf8_lossy(part).into_owned())
                    .collect::<String>(),
                record.ttl(),
            )),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_register_then_resolve_over_tcp() {
    let beacon = start_beacon().await;
    let peer: IpAddr = "203.0.113.10".parse().unwrap();

    assert_eq!(register_from(&beacon, peer, "1.2.3.4", 9000).await, StatusCode::OK);

    let room = room_key().room_name().unwrap();
    let rooms = query_tcp(
        beacon.tcp,
        &txt_query(&format!("{room}.room.pathfinderbeacon.net.")),
    )
    .await;
    let node = crypto::node_id(peer);
    assert_eq!(txt_values(&rooms), vec![(node.clone(), 300)]);
    assert!(rooms.authoritative());

    let nodes = query_tcp(
        beacon.tcp,
        &txt_query(&format!("{node}.node.pathfinderbeacon.net.")),
    )
    .await;
    assert_eq!(
        txt_values(&nodes),
        vec![("tcp://1.2.3.4:9000".to_string(), 3600)]
    );
}

#[tokio::test]
async fn test_txt_over_udp_is_truncated() {
    let beacon = start_beacon().await;
    let peer: IpAddr = "203.0.113.11".parse().unwrap();
    assert_eq!(register_from(&beacon, peer, "1.2.3.4", 9000).await, StatusCode::OK);

    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let room = room_key().room_name().unwrap();
    let request = txt_query(&format!("{room}.room.pathfinderbeacon.net."));
    socket
        .send_to(&request.to_vec().unwrap(), beacon.udp)
        .await
        .unwrap();

    let mut buf = [0u8; 4096];
    let (len, _) = tokio::time::timeout(Duration::from_secs(2), socket.recv_from(&mut buf))
        .await
        .unwrap()
        .unwrap();
    let response = Message::from_vec(&buf[..len]).unwrap();

    assert_eq!(response.id(), 7);
    assert!(response.truncated());
    assert!(response.answers().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_registrations_share_room() {
    let beacon = Arc::new(start_beacon().await);

    let peers: Vec<IpAddr> = (1..=8)
        .map(|i| format!("198.51.100.{i}").parse().unwrap())
        .collect();

    let tasks: Vec<_> = peers
        .iter()
        .map(|peer| {
            let beacon = beacon.clone();
            let peer = *peer;
            tokio::spawn(async move { register_from(&beacon, peer, "10.0.0.1", 4000).await })
        })
        .collect();
    for task in tasks {
        assert_eq!(task.await.unwrap(), StatusCode::OK);
    }

    // Re-registration does not duplicate the node
    assert_eq!(
        register_from(&beacon, peers[0], "10.0.0.1", 4000).await,
        StatusCode::OK
    );

    let room = room_key().room_name().unwrap();
    let response = query_tcp(
        beacon.tcp,
        &txt_query(&format!("{room}.room.pathfinderbeacon.net.")),
    )
    .await;

    let mut found: Vec<String> = txt_values(&response).into_iter().map(|(v, _)| v).collect();
    let mut expected: Vec<String> = peers.iter().map(|peer| crypto::node_id(*peer)).collect();
    found.sort();
    expected.sort();
    assert_eq!(found, expected);
}

#[tokio::test]
async fn test_unknown_room_has_no_answers() {
    let beacon = start_beacon().await;
    let room = "ab".repeat(28);

    let response = query_tcp(
        beacon.tcp,
        &txt_query(&format!("{room}.room.pathfinderbeacon.net.")),
    )
    .await;

    assert_eq!(response.response_code(), hickory_proto::op::ResponseCode::NoError);
    assert!(response.answers().is_empty());
}
