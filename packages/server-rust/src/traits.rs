use async_trait::async_trait;
use bytes::Bytes;
use topicrpc_core::TopicSpec;

/// Failures reported by a broker adapter.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BrokerError {
    #[error("broker at {address} is unreachable: {reason}")]
    Unreachable { address: String, reason: String },
    #[error("topic {0} already exists")]
    TopicAlreadyExists(String),
    #[error("unknown topic {0}")]
    UnknownTopic(String),
    #[error("invalid topic {topic}: {reason}")]
    InvalidTopic { topic: String, reason: String },
    #[error("unsupported broker address {0}")]
    UnsupportedAddress(String),
    #[error("broker connection closed")]
    Closed,
}

/// A record as delivered to a consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerRecord {
    pub topic: String,
    pub partition: u32,
    pub offset: u64,
    pub key: Option<Bytes>,
    pub payload: Bytes,
}

/// Where a consumer without committed offsets starts reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StartOffset {
    /// From the first retained record.
    Earliest,
    /// Only records appended after the consumer was opened.
    #[default]
    Latest,
}

/// How a consumer attaches to its topic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsumerOptions {
    /// Consumer group. Members of one group share the topic's partitions and
    /// each record is delivered to exactly one of them. `None` reads every
    /// partition independently.
    pub group: Option<String>,
    pub start: StartOffset,
}

impl ConsumerOptions {
    #[must_use]
    pub fn grouped(group: impl Into<String>, start: StartOffset) -> Self {
        Self {
            group: Some(group.into()),
            start,
        }
    }

    #[must_use]
    pub fn standalone(start: StartOffset) -> Self {
        Self { group: None, start }
    }
}

/// Where an appended record landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordMetadata {
    pub partition: u32,
    pub offset: u64,
}

/// Topic-based publish/subscribe broker with per-partition ordering and
/// at-least-once delivery. Adapters: in-memory (`broker::memory`) and
/// Kafka (`broker::kafka`, `kafka` feature).
///
/// Every handle returned here owns broker-side resources that are released
/// when the handle is dropped.
#[async_trait]
pub trait Broker: Send + Sync + 'static {
    /// Human-readable address, used in logs.
    fn address(&self) -> &str;

    /// Opens an administrative session for listing and creating topics.
    async fn admin(&self) -> Result<Box<dyn TopicAdmin>, BrokerError>;

    /// Opens a producer bound to `topic`.
    async fn producer(&self, topic: &str) -> Result<Box<dyn Producer>, BrokerError>;

    /// Opens a consumer on `topic`.
    async fn consumer(
        &self,
        topic: &str,
        options: ConsumerOptions,
    ) -> Result<Box<dyn Consumer>, BrokerError>;
}

/// Administrative session on a broker.
#[async_trait]
pub trait TopicAdmin: Send + Sync {
    /// Names of all existing topics.
    async fn list_topics(&self) -> Result<Vec<String>, BrokerError>;

    /// Creates a topic. Fails with `BrokerError::TopicAlreadyExists` if it exists.
    async fn create_topic(&self, spec: &TopicSpec) -> Result<(), BrokerError>;
}

/// Appends records to one topic.
#[async_trait]
pub trait Producer: Send + Sync {
    /// Appends a record and waits for the broker's acknowledgement.
    /// The key selects the partition; it carries no other meaning.
    async fn send(&self, key: Option<&[u8]>, payload: Bytes) -> Result<RecordMetadata, BrokerError>;
}

/// Reads records from one topic.
#[async_trait]
pub trait Consumer: Send {
    /// Waits for the next record. Reading a record commits it for the group.
    async fn recv(&mut self) -> Result<BrokerRecord, BrokerError>;
}
