//! HTTP front configuration.

use std::time::Duration;

/// Settings for the HTTP listener in front of the gateway client.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Bind address.
    pub host: String,
    /// Port to listen on. 0 means OS-assigned.
    pub port: u16,
    /// Allowed CORS origins. `"*"` allows any origin.
    pub cors_origins: Vec<String>,
    /// Upper bound on a whole HTTP request. Kept above the bridge call
    /// timeout so the bridge reports its own timeout first.
    pub request_timeout: Duration,
    /// Largest accepted request body in bytes.
    pub max_body_bytes: usize,
    /// How long shutdown waits for in-flight calls.
    pub drain_timeout: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 0,
            cors_origins: vec!["*".to_string()],
            request_timeout: Duration::from_secs(35),
            max_body_bytes: 1_048_576, // 1 MiB
            drain_timeout: Duration::from_secs(30),
        }
    }
}

impl GatewayConfig {
    /// `host:port` for binding.
    #[must_use]
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
