//! Periodic maintenance
//!
//! - Daily reset of the store hit counter at UTC midnight
//! - Periodic cleanup of idle rate limiter state, with a status line

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::api::Metrics;
use crate::rate_limiter::RateLimiter;
use crate::registry::NameStore;

/// Time left until the next UTC midnight after `now`
pub fn duration_until_next_utc_midnight(now: DateTime<Utc>) -> Duration {
    let next_midnight = (now.date_naive() + ChronoDuration::days(1))
        .and_hms_opt(0, 0, 0)
        .map(|midnight| midnight.and_utc());

    next_midnight
        .and_then(|midnight| (midnight - now).to_std().ok())
        .unwrap_or(Duration::from_secs(24 * 60 * 60))
}

/// Run maintenance until `shutdown` flips
pub async fn run_maintenance(
    store: Arc<NameStore>,
    limiter: Arc<RateLimiter>,
    metrics: Arc<Metrics>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut cleanup = tokio::time::interval(interval);
    // First tick fires immediately
    cleanup.tick().await;

    loop {
        let until_midnight = duration_until_next_utc_midnight(Utc::now());

        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tokio::time::sleep(until_midnight) => {
                store.reset_statistics();
                info!("🕛 Daily statistics reset");
            }
            _ = cleanup.tick() => {
                let tracked = limiter.cleanup();
                debug!("Rate limiter cleanup: {} keys tracked", tracked);

                let stats = store.stats();
                metrics.set_store_stats(&stats);
                info!(
                    "📊 Status: {} rooms, {} nodes, {} addresses, {} hits today",
                    stats.rooms, stats.nodes, stats.addresses, stats.hit_count
                );
            }
        }
    }

    debug!("Maintenance stopped");
}
