//! API Routes
//!
//! Registration endpoint plus status, health and metrics endpoints.

use axum::{
    extract::{ConnectInfo, State},
    http::{header, HeaderMap, StatusCode},
    response::{Html, IntoResponse},
    routing::{get, post},
    Json, Router,
};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::api::Metrics;
use crate::config::BeaconConfig;
use crate::rate_limiter::{Bucket, RateLimiter};
use crate::registration::Registrar;
use crate::registry::NameStore;

/// Shared API state
pub struct ApiState {
    pub config: Arc<BeaconConfig>,
    pub store: Arc<NameStore>,
    pub registrar: Arc<Registrar>,
    pub limiter: Arc<RateLimiter>,
    pub metrics: Arc<Metrics>,
}

/// Build the API router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        // Landing page & health
        .route("/", get(landing_page))
        .route("/health", get(health_check))
        .route("/stats", get(get_stats))

        // Registration
        .route("/register", post(register))

        // Metrics
        .route("/metrics", get(get_metrics_prometheus))
        .route("/metrics/json", get(get_metrics_json))

        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Run the HTTP API server until `shutdown` flips
pub async fn run_api_server(
    state: Arc<ApiState>,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], state.config.http_port));
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("📊 HTTP API server listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        let _ = shutdown.changed().await;
    })
    .await?;

    info!("HTTP API server stopped");
    Ok(())
}

/// GET /health - Simple health check
async fn health_check() -> impl IntoResponse {
    "OK"
}

/// GET / - Status page
async fn landing_page(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    let stats = state.store.stats();
    state.metrics.set_store_stats(&stats);

    Html(format!(
        r#"<!DOCTYPE html>
<html>
<head><title>Pathfinder Beacon</title></head>
<body>
<h1>Pathfinder Beacon</h1>
<p>DNS rendezvous for peer-to-peer nodes. Register over HTTP, resolve over DNS.</p>
<table>
<tr><td>Rooms</td><td>{}</td></tr>
<tr><td>Nodes</td><td>{}</td></tr>
<tr><td>Addresses</td><td>{}</td></tr>
<tr><td>Hits today</td><td>{}</td></tr>
</table>
<p>Zone: {}</p>
</body>
</html>
"#,
        stats.rooms, stats.nodes, stats.addresses, stats.hit_count, state.config.apex_zone
    ))
}

/// GET /stats - Store statistics
async fn get_stats(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    let stats = state.store.stats();
    state.metrics.set_store_stats(&stats);
    Json(stats)
}

/// POST /register - Register a node in a room
async fn register(
    State(state): State<Arc<ApiState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: String,
) -> impl IntoResponse {
    let client_ip = resolve_client_ip(peer.ip(), &headers, state.config.trust_proxy_headers);

    if !state.limiter.take(Bucket::Registration, client_ip).allowed {
        state.metrics.inc_rate_limited(Bucket::Registration);
        return (StatusCode::TOO_MANY_REQUESTS, "Rate limited".to_string());
    }

    match state.registrar.register(&body, client_ip) {
        Ok(_) => {
            state.metrics.inc_registrations_accepted();
            (StatusCode::OK, String::new())
        }
        Err(e) => {
            state.metrics.inc_registrations_rejected();
            warn!("Rejected registration from {}: {}", client_ip, e);

            let status = StatusCode::from_u16(e.status_code())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            (status, e.to_string())
        }
    }
}

/// GET /metrics - Prometheus format metrics
async fn get_metrics_prometheus(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    state.metrics.set_store_stats(&state.store.stats());

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        state.metrics.to_prometheus(),
    )
}

/// GET /metrics/json - JSON format metrics
async fn get_metrics_json(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    state.metrics.set_store_stats(&state.store.stats());
    Json(state.metrics.to_json())
}

/// Client IP for a registration
///
/// With `trust_proxy` set and a loopback or private direct peer, `X-Real-IP`
/// and then the first `X-Forwarded-For` entry replace the peer address.
fn resolve_client_ip(peer: IpAddr, headers: &HeaderMap, trust_proxy: bool) -> IpAddr {
    let peer = peer.to_canonical();
    if !trust_proxy || !is_local(peer) {
        return peer;
    }

    let real_ip = headers
        .get("x-real-ip")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<IpAddr>().ok());

    let forwarded_for = || {
        headers
            .get("x-forwarded-for")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(',').next())
            .and_then(|value| value.trim().parse::<IpAddr>().ok())
    };

    real_ip
        .or_else(forwarded_for)
        .map(|ip| ip.to_canonical())
        .unwrap_or(peer)
}

fn is_local(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_loopback() || v4.is_private(),
        // fc00::/7 unique local
        IpAddr::V6(v6) => v6.is_loopback() || (v6.segments()[0] & 0xfe00) == 0xfc00,
    }
}
