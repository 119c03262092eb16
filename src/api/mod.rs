//! HTTP API Module
//!
//! Node registration plus status, health and metrics endpoints.

mod routes;
mod metrics;

pub use routes::{router, run_api_server, ApiState};
pub use metrics::Metrics;
