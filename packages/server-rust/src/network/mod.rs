//! HTTP front: configuration, middleware, handlers, lifecycle.

pub mod config;
pub mod handlers;
pub mod middleware;
pub mod module;
pub mod shutdown;

pub use config::GatewayConfig;
pub use handlers::AppState;
pub use module::GatewayServer;
pub use shutdown::{HealthState, InFlightGuard, ShutdownController};
