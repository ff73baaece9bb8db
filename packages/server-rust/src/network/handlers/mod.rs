//! HTTP handlers for the gateway front.
//!
//! `AppState` is the shared state carried through axum extractors.

pub mod health;
pub mod proxy;

pub use health::{health_handler, liveness_handler, readiness_handler};
pub use proxy::{proxy_handler, proxy_root_handler};

use std::sync::Arc;
use std::time::Instant;

use crate::bridge::GatewayClient;

use super::ShutdownController;

/// Shared state for all handlers. Cloning is cheap.
#[derive(Clone)]
pub struct AppState {
    /// Issues bridge calls on behalf of HTTP requests.
    pub gateway: Arc<GatewayClient>,
    pub shutdown: Arc<ShutdownController>,
    /// Process start time, for uptime.
    pub start_time: Instant,
}
