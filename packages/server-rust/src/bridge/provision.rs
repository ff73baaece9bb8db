//! Topic provisioning.
//!
//! Connects to the broker, lists existing topics, and creates the missing
//! ones. A topic that already exists (including one created concurrently by
//! another process between list and create) counts as provisioned. Any other
//! failure restarts the whole connect-list-create sequence after a fixed
//! delay, up to a bounded number of attempts.
//!
//! Provisioning is advisory: exhaustion is logged and reported, never
//! returned as an error, and [`spawn_provisioning`] runs it off the caller's
//! task so a slow broker never delays startup.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use topicrpc_core::TopicSpec;
use tracing::{error, info, warn};

use super::config::BridgeConfig;
use crate::traits::{Broker, BrokerError};

/// Attempt budget for [`provision_with_retry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Zero is treated as one.
    pub attempts: u32,
    /// Delay between consecutive attempts.
    pub interval: Duration,
}

impl From<&BridgeConfig> for RetryPolicy {
    fn from(config: &BridgeConfig) -> Self {
        Self {
            attempts: config.provision_attempts,
            interval: config.provision_interval,
        }
    }
}

/// What a successful provisioning pass found and did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProvisionReport {
    /// Topics created by this pass.
    pub created: Vec<String>,
    /// Topics that were already present.
    pub existing: Vec<String>,
}

/// Result of [`provision_with_retry`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisionOutcome {
    Provisioned(ProvisionReport),
    /// Every attempt failed.
    Exhausted { attempts: u32 },
}

impl ProvisionOutcome {
    #[must_use]
    pub fn is_provisioned(&self) -> bool {
        matches!(self, Self::Provisioned(_))
    }
}

/// Runs one connect-list-create pass.
///
/// # Errors
///
/// Returns the first broker error other than "already exists".
pub async fn provision_once(
    broker: &dyn Broker,
    topics: &[TopicSpec],
) -> Result<ProvisionReport, BrokerError> {
    let admin = broker.admin().await?;
    let present: HashSet<String> = admin.list_topics().await?.into_iter().collect();

    let mut report = ProvisionReport::default();
    for spec in topics {
        if present.contains(&spec.name) {
            report.existing.push(spec.name.clone());
            continue;
        }
        match admin.create_topic(spec).await {
            Ok(()) => {
                info!(topic = %spec.name, partitions = spec.partitions, "created topic");
                report.created.push(spec.name.clone());
            }
            Err(BrokerError::TopicAlreadyExists(_)) => report.existing.push(spec.name.clone()),
            Err(e) => return Err(e),
        }
    }
    Ok(report)
}

/// Runs [`provision_once`] until it succeeds or the policy is exhausted.
pub async fn provision_with_retry(
    broker: &dyn Broker,
    topics: &[TopicSpec],
    policy: RetryPolicy,
) -> ProvisionOutcome {
    let attempts = policy.attempts.max(1);
    for attempt in 1..=attempts {
        match provision_once(broker, topics).await {
            Ok(report) => {
                info!(
                    broker = broker.address(),
                    attempt,
                    created = report.created.len(),
                    existing = report.existing.len(),
                    "topics provisioned"
                );
                return ProvisionOutcome::Provisioned(report);
            }
            Err(e) => {
                warn!(broker = broker.address(), attempt, attempts, error = %e, "topic provisioning failed");
                if attempt < attempts {
                    tokio::time::sleep(policy.interval).await;
                }
            }
        }
    }
    error!(
        broker = broker.address(),
        attempts, "giving up on topic provisioning; continuing without it"
    );
    ProvisionOutcome::Exhausted { attempts }
}

/// Runs [`provision_with_retry`] on its own task.
#[must_use]
pub fn spawn_provisioning(
    broker: Arc<dyn Broker>,
    topics: Vec<TopicSpec>,
    policy: RetryPolicy,
) -> JoinHandle<ProvisionOutcome> {
    tokio::spawn(async move { provision_with_retry(broker.as_ref(), &topics, policy).await })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use topicrpc_core::Topology;

    use super::*;
    use crate::broker::MemoryBroker;

    fn standard_specs() -> Vec<TopicSpec> {
        Topology::standard()
            .required_topics()
            .into_iter()
            .map(TopicSpec::new)
            .collect()
    }

    fn policy(attempts: u32) -> RetryPolicy {
        RetryPolicy {
            attempts,
            interval: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn creates_every_missing_topic() {
        let broker = MemoryBroker::without_auto_create();
        let report = provision_once(&broker, &standard_specs()).await.unwrap();

        assert_eq!(report.created.len(), 10);
        assert!(report.existing.is_empty());
        assert!(broker.topic_names().contains(&"patients-requests".to_string()));
        assert!(broker.topic_names().contains(&"samples-responses".to_string()));
    }

    #[tokio::test]
    async fn second_run_creates_nothing() {
        let broker = MemoryBroker::without_auto_create();
        provision_once(&broker, &standard_specs()).await.unwrap();
        let calls_after_first = broker.stats().create_topic_calls;

        let report = provision_once(&broker, &standard_specs()).await.unwrap();
        assert!(report.created.is_empty());
        assert_eq!(report.existing.len(), 10);
        assert_eq!(broker.stats().create_topic_calls, calls_after_first);
    }

    #[tokio::test]
    async fn partially_provisioned_broker_only_gets_the_gap() {
        let broker = MemoryBroker::without_auto_create();
        let specs = standard_specs();
        provision_once(&broker, &specs[..4]).await.unwrap();

        let report = provision_once(&broker, &specs).await.unwrap();
        assert_eq!(report.created.len(), 6);
        assert_eq!(report.existing.len(), 4);
    }

    #[tokio::test]
    async fn invalid_topic_is_an_attempt_failure() {
        let broker = MemoryBroker::without_auto_create();
        let mut spec = TopicSpec::new("bad");
        spec.replication_factor = 3;
        assert!(matches!(
            provision_once(&broker, &[spec]).await,
            Err(BrokerError::InvalidTopic { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn retries_until_broker_answers() {
        let broker = MemoryBroker::without_auto_create();
        broker.fail_next_admin_sessions(3);
        let started = tokio::time::Instant::now();

        let outcome = provision_with_retry(&broker, &standard_specs(), policy(10)).await;

        assert!(outcome.is_provisioned());
        assert_eq!(started.elapsed(), Duration::from_secs(15));
        assert_eq!(broker.topic_names().len(), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_is_reported_not_raised() {
        let broker = MemoryBroker::new();
        broker.set_reachable(false);
        let started = tokio::time::Instant::now();

        let outcome = provision_with_retry(&broker, &standard_specs(), policy(3)).await;

        assert_eq!(outcome, ProvisionOutcome::Exhausted { attempts: 3 });
        // No sleep after the final attempt.
        assert_eq!(started.elapsed(), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn zero_attempts_still_tries_once() {
        let broker = MemoryBroker::without_auto_create();
        let outcome = provision_with_retry(&broker, &standard_specs(), policy(0)).await;
        assert!(outcome.is_provisioned());
    }

    #[tokio::test]
    async fn spawned_provisioning_does_not_block_caller() {
        let broker = MemoryBroker::without_auto_create();
        broker.set_reachable(false);
        let shared: Arc<dyn Broker> = Arc::new(broker.clone());

        let handle = spawn_provisioning(
            shared,
            standard_specs(),
            RetryPolicy {
                attempts: 50,
                interval: Duration::from_millis(5),
            },
        );
        // Caller keeps running while provisioning retries in the background.
        assert!(!handle.is_finished());
        broker.set_reachable(true);

        assert!(handle.await.unwrap().is_provisioned());
    }

    #[test]
    fn policy_follows_config() {
        let policy = RetryPolicy::from(&BridgeConfig::default());
        assert_eq!(policy.attempts, 10);
        assert_eq!(policy.interval, Duration::from_secs(5));
    }
}
