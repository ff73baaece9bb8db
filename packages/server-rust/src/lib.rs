//! `topicrpc` Server: the broker port, worker runtime, gateway client and HTTP front.
//!
//! Workers consume a service's request topic and publish replies; the gateway
//! client turns a publish plus a correlated reply into a blocking call; the
//! HTTP front forwards `/api/{service}/...` through the gateway client.

pub mod bridge;
pub mod broker;
pub mod network;
pub mod records;
pub mod traits;

pub use bridge::{BridgeConfig, CallError, GatewayClient, ReplyMode, WorkerRuntime};
pub use broker::MemoryBroker;
pub use network::{GatewayConfig, GatewayServer, ShutdownController};
pub use traits::{Broker, BrokerError, Consumer, Producer, TopicAdmin};
