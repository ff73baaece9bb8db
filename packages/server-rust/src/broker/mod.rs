//! Broker adapters and address resolution.

#[cfg(feature = "kafka")]
pub mod kafka;
pub mod memory;

use std::sync::Arc;

#[cfg(feature = "kafka")]
pub use kafka::KafkaBroker;
pub use memory::MemoryBroker;

use crate::traits::{Broker, BrokerError};

/// Address scheme of the in-process broker.
pub const MEMORY_SCHEME: &str = "memory://";

/// Address scheme of a Kafka cluster.
pub const KAFKA_SCHEME: &str = "kafka://";

/// Opens the broker named by `address`.
///
/// - `memory://<label>`: in-process broker; the label names it in logs
/// - `kafka://host:port[,host:port...]`: Kafka cluster, when built with the
///   `kafka` feature
///
/// # Errors
///
/// Returns `BrokerError::UnsupportedAddress` for any other scheme, and for
/// `kafka://` addresses in builds without the `kafka` feature.
pub fn connect(address: &str) -> Result<Arc<dyn Broker>, BrokerError> {
    if address.starts_with(MEMORY_SCHEME) {
        Ok(Arc::new(MemoryBroker::with_address(address)))
    } else if address.starts_with(KAFKA_SCHEME) {
        connect_kafka(address)
    } else {
        Err(BrokerError::UnsupportedAddress(address.to_string()))
    }
}

#[cfg(feature = "kafka")]
fn connect_kafka(address: &str) -> Result<Arc<dyn Broker>, BrokerError> {
    Ok(Arc::new(KafkaBroker::connect(address)?))
}

#[cfg(not(feature = "kafka"))]
fn connect_kafka(address: &str) -> Result<Arc<dyn Broker>, BrokerError> {
    Err(BrokerError::UnsupportedAddress(format!(
        "{address} (rebuild with --features kafka)"
    )))
}
