//! The request/response bridge: provisioning, worker runtime, gateway client.

pub mod config;
pub mod error;
pub mod gateway;
pub mod pending;
pub mod provision;
pub mod worker;

pub use config::{BridgeConfig, ReplyMode};
pub use error::CallError;
pub use gateway::GatewayClient;
pub use pending::{PendingCall, PendingCalls, PendingStats};
pub use provision::{
    provision_once, provision_with_retry, spawn_provisioning, ProvisionOutcome, ProvisionReport,
    RetryPolicy,
};
pub use worker::{WorkerError, WorkerRuntime, WorkerStats};
