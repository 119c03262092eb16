//! DNS Listeners
//!
//! UDP datagram loop and DNS-over-TCP loop (2-byte length prefix), both
//! feeding the shared query router.

use hickory_proto::op::Message;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::watch;
use tracing::{debug, error, info, trace};

use super::handler::{QueryRouter, Transport};
use super::DnsError;
use crate::config::BeaconConfig;

/// Receive buffer for UDP queries
const UDP_RECV_BUFFER: usize = 4096;

/// Bound UDP and TCP listeners
pub struct DnsServer {
    udp: Arc<UdpSocket>,
    tcp: TcpListener,
    router: Arc<QueryRouter>,
    idle_timeout: Duration,
}

impl DnsServer {
    /// Bind both listeners on `addr`
    pub async fn bind(
        addr: SocketAddr,
        router: Arc<QueryRouter>,
        idle_timeout: Duration,
    ) -> Result<Self, DnsError> {
        let udp = UdpSocket::bind(addr).await?;
        let tcp = TcpListener::bind(addr).await?;

        Ok(Self {
            udp: Arc::new(udp),
            tcp,
            router,
            idle_timeout,
        })
    }

    pub fn udp_addr(&self) -> Result<SocketAddr, DnsError> {
        Ok(self.udp.local_addr()?)
    }

    pub fn tcp_addr(&self) -> Result<SocketAddr, DnsError> {
        Ok(self.tcp.local_addr()?)
    }

    /// Serve until `shutdown` flips
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> Result<(), DnsError> {
        let udp = serve_udp(self.udp, self.router.clone(), shutdown.clone());
        let tcp = serve_tcp(self.tcp, self.router, self.idle_timeout, shutdown);

        tokio::join!(udp, tcp);
        Ok(())
    }
}

/// Run the DNS listeners from configuration
pub async fn run_dns_server(
    config: Arc<BeaconConfig>,
    router: Arc<QueryRouter>,
    shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], config.dns_port));
    let idle_timeout = Duration::from_secs(config.tcp_idle_timeout_secs);

    let server = DnsServer::bind(addr, router, idle_timeout).await?;
    info!("🌐 DNS server listening on {} (udp+tcp)", addr);

    server.run(shutdown).await?;
    info!("DNS server stopped");
    Ok(())
}

async fn serve_udp(
    socket: Arc<UdpSocket>,
    router: Arc<QueryRouter>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut buf = vec![0u8; UDP_RECV_BUFFER];

    loop {
        let (len, src) = tokio::select! {
            _ = shutdown.changed() => break,
            received = socket.recv_from(&mut buf) => match received {
                Ok(received) => received,
                Err(e) => {
                    // ICMP errors from earlier sends surface here
                    debug!("DNS UDP receive error: {}", e);
                    continue;
                }
            },
        };

        let request = buf[..len].to_vec();
        let router = router.clone();
        let socket = socket.clone();

        tokio::spawn(async move {
            if let Err(e) = handle_udp_query(&socket, src, &request, &router).await {
                debug!("DNS query error from {}: {}", src, e);
            }
        });
    }
}

async fn handle_udp_query(
    socket: &UdpSocket,
    src: SocketAddr,
    request: &[u8],
    router: &QueryRouter,
) -> Result<(), DnsError> {
    let request = Message::from_vec(request)?;

    let Some(response) = router.handle(Transport::Udp, src, &request) else {
        return Ok(());
    };

    let bytes = router.encode_udp(&request, response)?;
    socket.send_to(&bytes, src).await?;
    Ok(())
}

async fn serve_tcp(
    listener: TcpListener,
    router: Arc<QueryRouter>,
    idle_timeout: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let (stream, peer) = tokio::select! {
            _ = shutdown.changed() => break,
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    error!("Failed to accept DNS TCP connection: {}", e);
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    continue;
                }
            },
        };

        trace!("DNS TCP accepted client {}", peer);

        let router = router.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_tcp_client(stream, peer, &router, idle_timeout, shutdown).await {
                debug!("DNS TCP client {} error: {}", peer, e);
            }
        });
    }
}

async fn handle_tcp_client(
    mut stream: TcpStream,
    peer: SocketAddr,
    router: &QueryRouter,
    idle_timeout: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), DnsError> {
    let mut length_buf = [0u8; 2];

    loop {
        let read = tokio::select! {
            _ = shutdown.changed() => break,
            read = tokio::time::timeout(idle_timeout, stream.read_exact(&mut length_buf)) => read,
        };

        match read {
            Ok(Ok(_)) => {}
            Ok(Err(e)) if e.kind() == ErrorKind::UnexpectedEof => break,
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => {
                trace!("DNS TCP client {} idle, closing", peer);
                break;
            }
        }

        let length = usize::from(u16::from_be_bytes(length_buf));
        if length == 0 {
            continue;
        }

        let mut message = vec![0u8; length];
        tokio::time::timeout(idle_timeout, stream.read_exact(&mut message))
            .await
            .map_err(|_| DnsError::Io(ErrorKind::TimedOut.into()))??;

        let request = Message::from_vec(&message)?;

        // Rate limited: close the connection without a reply
        let Some(response) = router.handle(Transport::Tcp, peer, &request) else {
            break;
        };

        let bytes = response.to_vec()?;
        let length = u16::try_from(bytes.len()).map_err(|_| DnsError::MessageTooLarge(bytes.len()))?;

        let mut frame = Vec::with_capacity(2 + bytes.len());
        frame.extend_from_slice(&length.to_be_bytes());
        frame.extend_from_slice(&bytes);
        stream.write_all(&frame).await?;
    }

    Ok(())
}
