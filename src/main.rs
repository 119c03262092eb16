//! Pathfinder Beacon Service
//!
//! Runs the DNS listeners, the HTTP API and the maintenance task around one
//! shared name store and rate limiter.

use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

use pathfinder_beacon::api::{self, ApiState, Metrics};
use pathfinder_beacon::config::BeaconConfig;
use pathfinder_beacon::crypto::{self, RoomKey};
use pathfinder_beacon::dns::{self, QueryRouter};
use pathfinder_beacon::maintenance;
use pathfinder_beacon::rate_limiter::RateLimiter;
use pathfinder_beacon::registration::Registrar;
use pathfinder_beacon::registry::NameStore;

/// Pathfinder Beacon - DNS rendezvous for peer-to-peer nodes
#[derive(Parser, Debug)]
#[command(name = "pathfinder-beacon")]
#[command(version)]
#[command(about = "DNS rendezvous service for peer-to-peer nodes", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "beacon.toml")]
    config: PathBuf,

    /// Production mode: DNS on port 53, HTTP on port 80
    #[arg(long, env = "PROD_MODE")]
    prod: bool,

    /// Room whose registrations never expire
    #[arg(long, env = "DEMO_ROOM_NAME")]
    demo_room: Option<String>,

    /// Name store capacity in bytes
    #[arg(long, env = "BEACON_STORE_CAPACITY")]
    store_capacity: Option<u64>,

    /// DNS port (UDP and TCP), overrides the mode default
    #[arg(long, env = "BEACON_DNS_PORT")]
    dns_port: Option<u16>,

    /// HTTP API port, overrides the mode default
    #[arg(long, env = "BEACON_HTTP_PORT")]
    http_port: Option<u16>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Generate a room key, print its registration values and exit
    #[arg(long)]
    generate_room_key: bool,

    /// Where to write the generated room key
    #[arg(long, default_value = "room.pem")]
    key_file: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| args.log_level.clone().into()),
        )
        .init();

    info!("🧭 Pathfinder Beacon v{}", env!("CARGO_PKG_VERSION"));

    // Handle key generation
    if args.generate_room_key {
        return generate_room_key(&args.key_file).await;
    }

    // Load configuration
    let config = if args.config.exists() {
        BeaconConfig::load(&args.config)?
    } else {
        warn!("Config file not found, using defaults");
        BeaconConfig::default()
    };

    // Override config with CLI args / environment
    let config = config
        .with_production(args.prod)
        .with_dns_port(args.dns_port)
        .with_http_port(args.http_port)
        .with_demo_room(args.demo_room)
        .with_store_capacity(args.store_capacity);

    config.validate()?;

    info!("⚙️  Configuration:");
    info!("   Mode: {}", if args.prod { "production" } else { "development" });
    info!("   DNS port: {}", config.dns_port);
    info!("   HTTP port: {}", config.http_port);
    info!("   Zones: {} + {:?}", config.apex_zone, config.legacy_zones);
    info!("   Store capacity: {} bytes", config.store_capacity_bytes);
    if let Some(room) = &config.demo_room {
        info!("   Demo room: {}", room);
    }

    let shared_config = Arc::new(config);

    // Shared state
    let store = Arc::new(NameStore::in_memory(shared_config.store_capacity_bytes));
    let limiter = Arc::new(RateLimiter::new(&shared_config.rate_limits)?);
    let metrics = Arc::new(Metrics::new());
    let registrar = Arc::new(Registrar::new(&shared_config, store.clone()));
    let router = Arc::new(QueryRouter::new(
        &shared_config,
        store.clone(),
        limiter.clone(),
        metrics.clone(),
    )?);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Start all services concurrently
    let mut dns_handle = tokio::spawn(dns::run_dns_server(
        shared_config.clone(),
        router,
        shutdown_rx.clone(),
    ));

    let mut api_handle = tokio::spawn(api::run_api_server(
        Arc::new(ApiState {
            config: shared_config.clone(),
            store: store.clone(),
            registrar,
            limiter: limiter.clone(),
            metrics: metrics.clone(),
        }),
        shutdown_rx.clone(),
    ));

    let maintenance_handle = tokio::spawn(maintenance::run_maintenance(
        store,
        limiter,
        metrics,
        Duration::from_secs(shared_config.maintenance_interval_secs),
        shutdown_rx,
    ));

    info!("✅ All services started");
    info!("   Press Ctrl+C to shutdown gracefully");

    // Wait for shutdown signal
    let (dns_exited, api_exited) = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("🛑 Shutdown signal received");
            (false, false)
        }
        result = &mut dns_handle => {
            error!("DNS server exited: {:?}", result);
            (true, false)
        }
        result = &mut api_handle => {
            error!("HTTP API exited: {:?}", result);
            (false, true)
        }
    };

    // Graceful shutdown: stop listeners and maintenance
    let _ = shutdown_tx.send(true);
    let drained = tokio::time::timeout(Duration::from_secs(5), async {
        if !dns_exited {
            let _ = dns_handle.await;
        }
        if !api_exited {
            let _ = api_handle.await;
        }
        let _ = maintenance_handle.await;
    })
    .await;

    if drained.is_err() {
        warn!("Services did not stop within 5s");
    }

    info!("👋 Pathfinder Beacon shutting down");
    Ok(())
}

/// Generate a room key and print what a node needs to register
async fn generate_room_key(key_file: &Path) -> anyhow::Result<()> {
    let key = RoomKey::generate(crypto::DEFAULT_KEY_BITS)?;
    crypto::save_room_key(&key, key_file).await?;

    info!("🔑 New room key generated");
    info!("   Key saved to: {:?}", key_file);
    info!("   Room: {}", key.room_name()?);
    info!("   Room signature: {}", key.room_signature()?);
    info!("   Public key: {}", key.public_key_base64()?);

    Ok(())
}
