//! Bridge configuration shared by the worker runtime and the gateway client.

use std::time::Duration;

use topicrpc_core::topology::{DEFAULT_PARTITIONS, DEFAULT_REPLICATION_FACTOR};
use topicrpc_core::TopicSpec;

/// Environment variable that overrides the broker address.
pub const BROKER_ADDRESS_ENV: &str = "TOPICRPC_BROKER";

/// Broker address used when the environment does not name one.
pub const DEFAULT_BROKER_ADDRESS: &str = "memory://local";

/// How the gateway client waits for replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReplyMode {
    /// One long-lived response reader per service; replies are handed to
    /// waiting callers through an in-process correlation map.
    #[default]
    Multiplexed,
    /// Every call opens its own response consumer and scans every reply
    /// published while it waits.
    PerCall,
}

/// Settings for both sides of the bridge.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Address of the broker, e.g. `memory://local`.
    pub broker_address: String,
    /// Deadline for a single gateway call.
    pub call_timeout: Duration,
    /// Connect-list-create attempts before provisioning gives up.
    pub provision_attempts: u32,
    /// Delay between provisioning attempts. Also used between attempts to
    /// open a worker's consumer and producer.
    pub provision_interval: Duration,
    /// Partition count for topics created by provisioning.
    pub partitions: u32,
    /// Replication factor for topics created by provisioning.
    pub replication_factor: u16,
    pub reply_mode: ReplyMode,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            broker_address: DEFAULT_BROKER_ADDRESS.to_string(),
            call_timeout: Duration::from_secs(30),
            provision_attempts: 10,
            provision_interval: Duration::from_secs(5),
            partitions: DEFAULT_PARTITIONS,
            replication_factor: DEFAULT_REPLICATION_FACTOR,
            reply_mode: ReplyMode::default(),
        }
    }
}

impl BridgeConfig {
    /// Defaults, with the broker address taken from `TOPICRPC_BROKER` when set.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(address) = lookup(BROKER_ADDRESS_ENV).filter(|a| !a.trim().is_empty()) {
            config.broker_address = address;
        }
        config
    }

    /// Shape for a topic created by provisioning.
    #[must_use]
    pub fn topic_spec(&self, name: &str) -> TopicSpec {
        TopicSpec {
            name: name.to_string(),
            partitions: self.partitions,
            replication_factor: self.replication_factor,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bridge_config_defaults() {
        let config = BridgeConfig::default();
        assert_eq!(config.broker_address, "memory://local");
        assert_eq!(config.call_timeout, Duration::from_secs(30));
        assert_eq!(config.provision_attempts, 10);
        assert_eq!(config.provision_interval, Duration::from_secs(5));
        assert_eq!(config.partitions, 1);
        assert_eq!(config.replication_factor, 1);
        assert_eq!(config.reply_mode, ReplyMode::Multiplexed);
    }

    #[test]
    fn broker_address_comes_from_environment() {
        let config = BridgeConfig::from_lookup(|key| {
            (key == BROKER_ADDRESS_ENV).then(|| "memory://staging".to_string())
        });
        assert_eq!(config.broker_address, "memory://staging");
        assert_eq!(config.call_timeout, Duration::from_secs(30));
    }

    #[test]
    fn blank_environment_value_keeps_default() {
        let config = BridgeConfig::from_lookup(|_| Some("  ".to_string()));
        assert_eq!(config.broker_address, DEFAULT_BROKER_ADDRESS);
    }

    #[test]
    fn topic_spec_uses_configured_shape() {
        let config = BridgeConfig {
            partitions: 3,
            ..BridgeConfig::default()
        };
        let spec = config.topic_spec("a-requests");
        assert_eq!(spec.name, "a-requests");
        assert_eq!(spec.partitions, 3);
        assert_eq!(spec.replication_factor, 1);
    }
}
