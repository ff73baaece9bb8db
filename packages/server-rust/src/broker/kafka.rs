//! Kafka broker adapter, built with the `kafka` feature.
//!
//! `kafka://host:port[,host:port...]` names the bootstrap servers. Grouped
//! consumers subscribe through Kafka's own group coordinator; standalone
//! consumers assign every partition directly under a private group id, so
//! they never join or disturb a shared group.
//!
//! librdkafka's metadata and watermark calls block, so they run on the
//! blocking pool.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer as _, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::types::RDKafkaErrorCode;
use rdkafka::util::Timeout;
use rdkafka::{Message, Offset, TopicPartitionList};
use topicrpc_core::TopicSpec;
use tracing::debug;

use super::KAFKA_SCHEME;
use crate::traits::{
    Broker, BrokerError, BrokerRecord, Consumer, ConsumerOptions, Producer, RecordMetadata,
    StartOffset, TopicAdmin,
};

const METADATA_TIMEOUT: Duration = Duration::from_secs(10);
const SEND_QUEUE_TIMEOUT: Duration = Duration::from_secs(5);

static STANDALONE_IDS: AtomicU64 = AtomicU64::new(0);

/// Broker reached over the Kafka protocol.
#[derive(Debug, Clone)]
pub struct KafkaBroker {
    address: String,
    bootstrap: String,
}

impl KafkaBroker {
    /// Parses a `kafka://` address. No connection is made until a handle is
    /// opened.
    ///
    /// # Errors
    ///
    /// Returns `BrokerError::UnsupportedAddress` when the scheme is wrong or
    /// no bootstrap server is named.
    pub fn connect(address: &str) -> Result<Self, BrokerError> {
        let bootstrap = bootstrap_servers(address)
            .ok_or_else(|| BrokerError::UnsupportedAddress(address.to_string()))?;
        Ok(Self {
            address: address.to_string(),
            bootstrap,
        })
    }

    fn config(&self) -> ClientConfig {
        let mut config = ClientConfig::new();
        config.set("bootstrap.servers", &self.bootstrap);
        config
    }

    fn unreachable(&self, err: &KafkaError) -> BrokerError {
        BrokerError::Unreachable {
            address: self.address.clone(),
            reason: err.to_string(),
        }
    }
}

/// `kafka://a:9092,b:9092` to `a:9092,b:9092`, dropping empty entries.
fn bootstrap_servers(address: &str) -> Option<String> {
    let rest = address.strip_prefix(KAFKA_SCHEME)?;
    let servers: Vec<&str> = rest
        .trim_end_matches('/')
        .split(',')
        .map(str::trim)
        .filter(|server| !server.is_empty())
        .collect();
    if servers.is_empty() {
        None
    } else {
        Some(servers.join(","))
    }
}

fn auto_offset_reset(start: StartOffset) -> &'static str {
    match start {
        StartOffset::Earliest => "earliest",
        StartOffset::Latest => "latest",
    }
}

/// Group id for a consumer that reads alone.
fn standalone_group(topic: &str) -> String {
    format!(
        "topicrpc-{topic}-{}-{}",
        std::process::id(),
        STANDALONE_IDS.fetch_add(1, Ordering::Relaxed)
    )
}

#[async_trait]
impl Broker for KafkaBroker {
    fn address(&self) -> &str {
        &self.address
    }

    async fn admin(&self) -> Result<Box<dyn TopicAdmin>, BrokerError> {
        let client: AdminClient<DefaultClientContext> =
            self.config().create().map_err(|e| self.unreachable(&e))?;
        let client = Arc::new(client);
        // Fail here rather than on the first call when nothing answers.
        let session = Arc::clone(&client);
        tokio::task::spawn_blocking(move || {
            session
                .inner()
                .fetch_metadata(None, METADATA_TIMEOUT)
                .map(|_| ())
        })
        .await
        .map_err(|_| BrokerError::Closed)?
        .map_err(|e| self.unreachable(&e))?;
        Ok(Box::new(KafkaAdmin {
            broker: self.clone(),
            client,
        }))
    }

    async fn producer(&self, topic: &str) -> Result<Box<dyn Producer>, BrokerError> {
        let producer: FutureProducer = self
            .config()
            .set("message.timeout.ms", "30000")
            .create()
            .map_err(|e| self.unreachable(&e))?;
        Ok(Box::new(KafkaProducer {
            broker: self.clone(),
            topic: topic.to_string(),
            producer,
        }))
    }

    async fn consumer(
        &self,
        topic: &str,
        options: ConsumerOptions,
    ) -> Result<Box<dyn Consumer>, BrokerError> {
        let mut config = self.config();
        config.set("auto.offset.reset", auto_offset_reset(options.start));
        let consumer = match options.group {
            Some(group) => {
                let consumer: StreamConsumer = config
                    .set("group.id", &group)
                    .set("enable.auto.commit", "true")
                    .create()
                    .map_err(|e| self.unreachable(&e))?;
                consumer
                    .subscribe(&[topic])
                    .map_err(|e| self.unreachable(&e))?;
                debug!(topic, group, "kafka consumer subscribed");
                consumer
            }
            None => {
                let consumer: StreamConsumer = config
                    .set("group.id", standalone_group(topic))
                    .set("enable.auto.commit", "false")
                    .create()
                    .map_err(|e| self.unreachable(&e))?;
                let consumer = Arc::new(consumer);
                let assigner = Arc::clone(&consumer);
                let name = topic.to_string();
                let start = options.start;
                tokio::task::spawn_blocking(move || assign_all(&assigner, &name, start))
                    .await
                    .map_err(|_| BrokerError::Closed)??;
                debug!(topic, "kafka consumer assigned");
                Arc::try_unwrap(consumer).map_err(|_| BrokerError::Closed)?
            }
        };
        Ok(Box::new(KafkaConsumer {
            broker: self.clone(),
            consumer,
        }))
    }
}

/// Assigns every partition of `topic`. `Latest` pins each partition at its
/// current high watermark so records appended after this call are seen.
fn assign_all(
    consumer: &StreamConsumer,
    topic: &str,
    start: StartOffset,
) -> Result<(), BrokerError> {
    let unreachable = |e: KafkaError| BrokerError::Unreachable {
        address: topic.to_string(),
        reason: e.to_string(),
    };
    let metadata = consumer
        .fetch_metadata(Some(topic), METADATA_TIMEOUT)
        .map_err(unreachable)?;
    let partitions: Vec<i32> = metadata
        .topics()
        .iter()
        .filter(|t| t.name() == topic && t.error().is_none())
        .flat_map(|t| t.partitions().iter().map(|p| p.id()))
        .collect();
    if partitions.is_empty() {
        return Err(BrokerError::UnknownTopic(topic.to_string()));
    }

    let mut assignment = TopicPartitionList::new();
    for partition in partitions {
        let offset = match start {
            StartOffset::Earliest => Offset::Beginning,
            StartOffset::Latest => {
                let (_, high) = consumer
                    .fetch_watermarks(topic, partition, METADATA_TIMEOUT)
                    .map_err(unreachable)?;
                Offset::Offset(high)
            }
        };
        assignment
            .add_partition_offset(topic, partition, offset)
            .map_err(unreachable)?;
    }
    consumer.assign(&assignment).map_err(unreachable)
}

struct KafkaAdmin {
    broker: KafkaBroker,
    client: Arc<AdminClient<DefaultClientContext>>,
}

#[async_trait]
impl TopicAdmin for KafkaAdmin {
    async fn list_topics(&self) -> Result<Vec<String>, BrokerError> {
        let client = Arc::clone(&self.client);
        let metadata = tokio::task::spawn_blocking(move || {
            client.inner().fetch_metadata(None, METADATA_TIMEOUT)
        })
        .await
        .map_err(|_| BrokerError::Closed)?
        .map_err(|e| self.broker.unreachable(&e))?;
        let mut names: Vec<String> = metadata
            .topics()
            .iter()
            .map(|topic| topic.name().to_string())
            .collect();
        names.sort();
        Ok(names)
    }

    async fn create_topic(&self, spec: &TopicSpec) -> Result<(), BrokerError> {
        let invalid = |reason: String| BrokerError::InvalidTopic {
            topic: spec.name.clone(),
            reason,
        };
        let partitions = i32::try_from(spec.partitions)
            .map_err(|_| invalid(format!("{} partitions", spec.partitions)))?;
        let topic = NewTopic::new(
            &spec.name,
            partitions,
            TopicReplication::Fixed(i32::from(spec.replication_factor)),
        );
        let options = AdminOptions::new().operation_timeout(Some(METADATA_TIMEOUT));
        let results = self
            .client
            .create_topics([&topic], &options)
            .await
            .map_err(|e| self.broker.unreachable(&e))?;
        for result in results {
            match result {
                Ok(_) => {}
                Err((name, RDKafkaErrorCode::TopicAlreadyExists)) => {
                    return Err(BrokerError::TopicAlreadyExists(name));
                }
                Err((_, code)) => return Err(invalid(code.to_string())),
            }
        }
        Ok(())
    }
}

struct KafkaProducer {
    broker: KafkaBroker,
    topic: String,
    producer: FutureProducer,
}

#[async_trait]
impl Producer for KafkaProducer {
    async fn send(&self, key: Option<&[u8]>, payload: Bytes) -> Result<RecordMetadata, BrokerError> {
        let mut record = FutureRecord::<[u8], [u8]>::to(&self.topic).payload(&payload[..]);
        if let Some(key) = key {
            record = record.key(key);
        }
        match self
            .producer
            .send(record, Timeout::After(SEND_QUEUE_TIMEOUT))
            .await
        {
            Ok((partition, offset)) => Ok(RecordMetadata {
                partition: u32::try_from(partition).unwrap_or_default(),
                offset: u64::try_from(offset).unwrap_or_default(),
            }),
            Err((KafkaError::MessageProduction(RDKafkaErrorCode::UnknownTopicOrPartition), _)) => {
                Err(BrokerError::UnknownTopic(self.topic.clone()))
            }
            Err((e, _)) => Err(self.broker.unreachable(&e)),
        }
    }
}

struct KafkaConsumer {
    broker: KafkaBroker,
    consumer: StreamConsumer,
}

#[async_trait]
impl Consumer for KafkaConsumer {
    async fn recv(&mut self) -> Result<BrokerRecord, BrokerError> {
        let message = self
            .consumer
            .recv()
            .await
            .map_err(|e| self.broker.unreachable(&e))?;
        Ok(BrokerRecord {
            topic: message.topic().to_string(),
            partition: u32::try_from(message.partition()).unwrap_or_default(),
            offset: u64::try_from(message.offset()).unwrap_or_default(),
            key: message.key().map(Bytes::copy_from_slice),
            payload: message
                .payload()
                .map(Bytes::copy_from_slice)
                .unwrap_or_default(),
        })
    }
}
