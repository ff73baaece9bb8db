//! HTTP front with deferred startup.
//!
//! `new()` allocates shared state, `start()` binds the listener, and
//! `serve()` accepts requests until shutdown. Workers can be started between
//! `start()` and `serve()` so the port is known before traffic arrives.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use axum::routing::{any, get};
use axum::Router;
use tokio::net::TcpListener;
use tracing::{info, warn};

use super::config::GatewayConfig;
use super::handlers::{
    health_handler, liveness_handler, proxy_handler, proxy_root_handler, readiness_handler,
    AppState,
};
use super::middleware::build_http_layers;
use super::shutdown::ShutdownController;
use crate::bridge::GatewayClient;

/// Owns the HTTP listener and its lifecycle.
pub struct GatewayServer {
    config: GatewayConfig,
    gateway: Arc<GatewayClient>,
    listener: Option<TcpListener>,
    shutdown: Arc<ShutdownController>,
    start_time: Instant,
}

impl GatewayServer {
    #[must_use]
    pub fn new(config: GatewayConfig, gateway: Arc<GatewayClient>) -> Self {
        Self {
            config,
            gateway,
            listener: None,
            shutdown: Arc::new(ShutdownController::new()),
            start_time: Instant::now(),
        }
    }

    /// Shared shutdown controller, for signal handlers and the binary.
    #[must_use]
    pub fn shutdown_controller(&self) -> Arc<ShutdownController> {
        Arc::clone(&self.shutdown)
    }

    /// Assembles the router.
    ///
    /// Routes:
    /// - `GET /health`, `/health/live`, `/health/ready`
    /// - any verb on `/api/{service}`, `/api/{service}/`, `/api/{service}/{*path}`
    pub fn build_router(&self) -> Router {
        let state = AppState {
            gateway: Arc::clone(&self.gateway),
            shutdown: Arc::clone(&self.shutdown),
            start_time: self.start_time,
        };

        Router::new()
            .route("/health", get(health_handler))
            .route("/health/live", get(liveness_handler))
            .route("/health/ready", get(readiness_handler))
            .route("/api/{service}", any(proxy_root_handler))
            .route("/api/{service}/", any(proxy_root_handler))
            .route("/api/{service}/{*path}", any(proxy_handler))
            .layer(build_http_layers(&self.config))
            .with_state(state)
    }

    /// Binds the listener and returns the bound port (useful with port 0).
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound.
    pub async fn start(&mut self) -> anyhow::Result<u16> {
        let listener = TcpListener::bind(self.config.bind_address()).await?;
        let port = listener.local_addr()?.port();
        info!(host = %self.config.host, port, "HTTP listener bound");
        self.listener = Some(listener);
        Ok(port)
    }

    /// Serves until `shutdown` resolves, then drains in-flight calls.
    ///
    /// # Errors
    ///
    /// Returns an error if `start()` was not called or the server hits a
    /// fatal I/O error.
    pub async fn serve(
        mut self,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> anyhow::Result<()> {
        let listener = self
            .listener
            .take()
            .ok_or_else(|| anyhow::anyhow!("start() must be called before serve()"))?;
        let router = self.build_router();
        let controller = Arc::clone(&self.shutdown);
        let signal_controller = Arc::clone(&self.shutdown);

        controller.set_ready();
        info!("gateway ready");

        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                shutdown.await;
                // Refuse new calls while axum finishes the open ones.
                signal_controller.trigger_shutdown();
            })
            .await?;

        controller.trigger_shutdown();
        if controller.wait_for_drain(self.config.drain_timeout).await {
            info!("gateway drained");
        } else {
            warn!(
                in_flight = controller.in_flight_count(),
                "drain timeout expired with calls still in flight"
            );
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
