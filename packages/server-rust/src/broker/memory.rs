//! In-process broker adapter.
//!
//! Models the parts of a partitioned log broker the bridge relies on:
//!
//! - topics are append-only logs split into partitions; keys pick the partition
//! - records within a partition are delivered in append order
//! - a consumer group spreads partitions over its members (partition `p` goes
//!   to member `p % members`), so each record reaches exactly one member
//! - reading a record commits it for the group
//!
//! Topics are created on first use unless auto-creation is disabled, the same
//! default a stock broker ships with. Fault injection (`set_reachable`,
//! `fail_next_admin_sessions`) and counters (`stats`) make the adapter usable
//! as a test double for provisioning and resource-release checks.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use topicrpc_core::partition::partition_for_key;
use topicrpc_core::TopicSpec;
use tracing::debug;

use crate::traits::{
    Broker, BrokerError, BrokerRecord, Consumer, ConsumerOptions, Producer, RecordMetadata,
    StartOffset, TopicAdmin,
};

/// Number of broker nodes the in-process broker pretends to have.
const NODE_COUNT: u16 = 1;

// ---------------------------------------------------------------------------
// Stats
// ---------------------------------------------------------------------------

/// Point-in-time counters for a [`MemoryBroker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BrokerStats {
    /// Admin sessions successfully opened.
    pub admin_sessions: u64,
    /// `create_topic` calls, including ones that failed.
    pub create_topic_calls: u64,
    /// Records appended across all topics.
    pub records_published: u64,
    /// Producers currently open.
    pub open_producers: usize,
    /// Consumers currently open.
    pub open_consumers: usize,
}

#[derive(Debug, Default)]
struct Counters {
    admin_sessions: AtomicU64,
    create_topic_calls: AtomicU64,
    records_published: AtomicU64,
    open_producers: AtomicUsize,
    open_consumers: AtomicUsize,
}

// ---------------------------------------------------------------------------
// TopicLog
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct StoredRecord {
    key: Option<Bytes>,
    payload: Bytes,
}

/// One topic: a log per partition plus a change signal for waiting consumers.
#[derive(Debug)]
struct TopicLog {
    name: String,
    partitions: RwLock<Vec<Vec<StoredRecord>>>,
    partition_count: u32,
    changes: watch::Sender<u64>,
    deleted: AtomicBool,
}

impl TopicLog {
    fn new(spec: &TopicSpec) -> Self {
        let partition_count = spec.partitions.max(1);
        let (changes, _) = watch::channel(0);
        Self {
            name: spec.name.clone(),
            partitions: RwLock::new(vec![Vec::new(); partition_count as usize]),
            partition_count,
            changes,
            deleted: AtomicBool::new(false),
        }
    }

    fn append(&self, key: Option<Bytes>, payload: Bytes) -> RecordMetadata {
        let partition = partition_for_key(key.as_deref(), self.partition_count);
        let offset = {
            let mut partitions = self.partitions.write();
            let log = &mut partitions[partition as usize];
            log.push(StoredRecord { key, payload });
            (log.len() - 1) as u64
        };
        self.wake();
        RecordMetadata { partition, offset }
    }

    fn record(&self, partition: u32, offset: u64) -> Option<BrokerRecord> {
        let partitions = self.partitions.read();
        let stored = partitions
            .get(partition as usize)?
            .get(usize::try_from(offset).ok()?)?;
        Some(BrokerRecord {
            topic: self.name.clone(),
            partition,
            offset,
            key: stored.key.clone(),
            payload: stored.payload.clone(),
        })
    }

    fn end_offsets(&self) -> Vec<u64> {
        self.partitions
            .read()
            .iter()
            .map(|log| log.len() as u64)
            .collect()
    }

    fn start_offsets(&self, start: StartOffset) -> Vec<u64> {
        match start {
            StartOffset::Earliest => vec![0; self.partition_count as usize],
            StartOffset::Latest => self.end_offsets(),
        }
    }

    fn ensure_live(&self) -> Result<(), BrokerError> {
        if self.deleted.load(Ordering::SeqCst) {
            Err(BrokerError::UnknownTopic(self.name.clone()))
        } else {
            Ok(())
        }
    }

    /// Wakes every consumer waiting on this topic.
    fn wake(&self) {
        self.changes.send_modify(|version| *version = version.wrapping_add(1));
    }
}

// ---------------------------------------------------------------------------
// MemoryBroker
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct GroupState {
    committed: Vec<u64>,
    members: Vec<u64>,
}

#[derive(Debug)]
struct Inner {
    address: String,
    topics: RwLock<HashMap<String, Arc<TopicLog>>>,
    /// Keyed by `(topic, group)`.
    groups: Mutex<HashMap<(String, String), GroupState>>,
    auto_create_topics: bool,
    reachable: AtomicBool,
    failing_admin_sessions: AtomicU32,
    next_member_id: AtomicU64,
    counters: Counters,
}

impl Inner {
    fn ensure_reachable(&self) -> Result<(), BrokerError> {
        if self.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(self.unreachable("broker is down"))
        }
    }

    fn unreachable(&self, reason: &str) -> BrokerError {
        BrokerError::Unreachable {
            address: self.address.clone(),
            reason: reason.to_string(),
        }
    }

    /// Returns the topic, creating it on first use when auto-creation is on.
    fn topic(&self, name: &str) -> Result<Arc<TopicLog>, BrokerError> {
        if let Some(log) = self.topics.read().get(name) {
            return Ok(Arc::clone(log));
        }
        if !self.auto_create_topics {
            return Err(BrokerError::UnknownTopic(name.to_string()));
        }
        let mut topics = self.topics.write();
        let log = topics.entry(name.to_string()).or_insert_with(|| {
            debug!(topic = name, "auto-creating topic");
            Arc::new(TopicLog::new(&TopicSpec::new(name)))
        });
        Ok(Arc::clone(log))
    }
}

/// Broker living entirely inside the current process.
///
/// Cloning yields another handle to the same broker.
#[derive(Debug, Clone)]
pub struct MemoryBroker {
    inner: Arc<Inner>,
}

impl MemoryBroker {
    /// Creates an empty broker with topic auto-creation enabled.
    #[must_use]
    pub fn new() -> Self {
        Self::with_address("memory://local")
    }

    /// Creates an empty broker that reports `address` in logs and errors.
    #[must_use]
    pub fn with_address(address: &str) -> Self {
        Self::build(address, true)
    }

    /// Creates an empty broker on which producing or consuming requires the
    /// topic to have been created first.
    #[must_use]
    pub fn without_auto_create() -> Self {
        Self::build("memory://local", false)
    }

    fn build(address: &str, auto_create_topics: bool) -> Self {
        Self {
            inner: Arc::new(Inner {
                address: address.to_string(),
                topics: RwLock::new(HashMap::new()),
                groups: Mutex::new(HashMap::new()),
                auto_create_topics,
                reachable: AtomicBool::new(true),
                failing_admin_sessions: AtomicU32::new(0),
                next_member_id: AtomicU64::new(1),
                counters: Counters::default(),
            }),
        }
    }

    /// Makes every new session, producer send and consumer open fail (or succeed again).
    pub fn set_reachable(&self, reachable: bool) {
        self.inner.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Makes the next `count` admin sessions fail as unreachable.
    pub fn fail_next_admin_sessions(&self, count: u32) {
        self.inner.failing_admin_sessions.store(count, Ordering::SeqCst);
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> BrokerStats {
        let c = &self.inner.counters;
        BrokerStats {
            admin_sessions: c.admin_sessions.load(Ordering::SeqCst),
            create_topic_calls: c.create_topic_calls.load(Ordering::SeqCst),
            records_published: c.records_published.load(Ordering::SeqCst),
            open_producers: c.open_producers.load(Ordering::SeqCst),
            open_consumers: c.open_consumers.load(Ordering::SeqCst),
        }
    }

    /// Deletes `topic`. Open producers and consumers on it fail from then on;
    /// with auto-creation on, the next open starts a fresh, empty topic.
    ///
    /// Returns `false` if the topic did not exist.
    pub fn delete_topic(&self, topic: &str) -> bool {
        let Some(log) = self.inner.topics.write().remove(topic) else {
            return false;
        };
        // Committed offsets point into the old log.
        self.inner.groups.lock().retain(|(name, _), _| name != topic);
        log.deleted.store(true, Ordering::SeqCst);
        log.wake();
        true
    }

    /// Names of existing topics, sorted.
    #[must_use]
    pub fn topic_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.topics.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Every record of `topic`, partition by partition, in append order.
    #[must_use]
    pub fn records(&self, topic: &str) -> Vec<BrokerRecord> {
        let Some(log) = self.inner.topics.read().get(topic).cloned() else {
            return Vec::new();
        };
        let ends = log.end_offsets();
        (0..log.partition_count)
            .flat_map(|p| {
                let end = ends.get(p as usize).copied().unwrap_or(0);
                (0..end).filter_map({
                    let log = Arc::clone(&log);
                    move |offset| log.record(p, offset)
                })
            })
            .collect()
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    fn address(&self) -> &str {
        &self.inner.address
    }

    async fn admin(&self) -> Result<Box<dyn TopicAdmin>, BrokerError> {
        self.inner.ensure_reachable()?;
        let failing = self.inner.failing_admin_sessions.fetch_update(
            Ordering::SeqCst,
            Ordering::SeqCst,
            |n| n.checked_sub(1),
        );
        if failing.is_ok() {
            return Err(self.inner.unreachable("connection refused"));
        }
        self.inner
            .counters
            .admin_sessions
            .fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryAdmin {
            inner: Arc::clone(&self.inner),
        }))
    }

    async fn producer(&self, topic: &str) -> Result<Box<dyn Producer>, BrokerError> {
        self.inner.ensure_reachable()?;
        let log = self.inner.topic(topic)?;
        self.inner
            .counters
            .open_producers
            .fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryProducer {
            inner: Arc::clone(&self.inner),
            log,
        }))
    }

    async fn consumer(
        &self,
        topic: &str,
        options: ConsumerOptions,
    ) -> Result<Box<dyn Consumer>, BrokerError> {
        self.inner.ensure_reachable()?;
        let log = self.inner.topic(topic)?;
        // Subscribe before computing start offsets so no append can slip between.
        let changes = log.changes.subscribe();

        let mode = match options.group {
            None => ReadMode::Standalone {
                positions: log.start_offsets(options.start),
            },
            Some(group) => {
                let member = self.inner.next_member_id.fetch_add(1, Ordering::SeqCst);
                let mut groups = self.inner.groups.lock();
                let state = groups
                    .entry((topic.to_string(), group.clone()))
                    .or_insert_with(|| GroupState {
                        committed: log.start_offsets(options.start),
                        members: Vec::new(),
                    });
                state.members.push(member);
                ReadMode::Grouped { group, member }
            }
        };

        self.inner
            .counters
            .open_consumers
            .fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryConsumer {
            inner: Arc::clone(&self.inner),
            log,
            changes,
            mode,
        }))
    }
}

// ---------------------------------------------------------------------------
// Admin
// ---------------------------------------------------------------------------

struct MemoryAdmin {
    inner: Arc<Inner>,
}

#[async_trait]
impl TopicAdmin for MemoryAdmin {
    async fn list_topics(&self) -> Result<Vec<String>, BrokerError> {
        self.inner.ensure_reachable()?;
        let mut names: Vec<String> = self.inner.topics.read().keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn create_topic(&self, spec: &TopicSpec) -> Result<(), BrokerError> {
        self.inner
            .counters
            .create_topic_calls
            .fetch_add(1, Ordering::SeqCst);
        self.inner.ensure_reachable()?;

        if spec.partitions == 0 {
            return Err(BrokerError::InvalidTopic {
                topic: spec.name.clone(),
                reason: "partition count must be at least 1".to_string(),
            });
        }
        if spec.replication_factor == 0 || spec.replication_factor > NODE_COUNT {
            return Err(BrokerError::InvalidTopic {
                topic: spec.name.clone(),
                reason: format!(
                    "replication factor {} not in 1..={NODE_COUNT}",
                    spec.replication_factor
                ),
            });
        }

        let mut topics = self.inner.topics.write();
        if topics.contains_key(&spec.name) {
            return Err(BrokerError::TopicAlreadyExists(spec.name.clone()));
        }
        topics.insert(spec.name.clone(), Arc::new(TopicLog::new(spec)));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Producer
// ---------------------------------------------------------------------------

struct MemoryProducer {
    inner: Arc<Inner>,
    log: Arc<TopicLog>,
}

#[async_trait]
impl Producer for MemoryProducer {
    async fn send(&self, key: Option<&[u8]>, payload: Bytes) -> Result<RecordMetadata, BrokerError> {
        self.inner.ensure_reachable()?;
        self.log.ensure_live()?;
        let metadata = self.log.append(key.map(Bytes::copy_from_slice), payload);
        self.inner
            .counters
            .records_published
            .fetch_add(1, Ordering::SeqCst);
        Ok(metadata)
    }
}

impl Drop for MemoryProducer {
    fn drop(&mut self) {
        self.inner
            .counters
            .open_producers
            .fetch_sub(1, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// Consumer
// ---------------------------------------------------------------------------

enum ReadMode {
    Standalone { positions: Vec<u64> },
    Grouped { group: String, member: u64 },
}

struct MemoryConsumer {
    inner: Arc<Inner>,
    log: Arc<TopicLog>,
    changes: watch::Receiver<u64>,
    mode: ReadMode,
}

impl MemoryConsumer {
    fn try_next(&mut self) -> Option<BrokerRecord> {
        match &mut self.mode {
            ReadMode::Standalone { positions } => {
                for (partition, position) in (0u32..).zip(positions.iter_mut()) {
                    if let Some(record) = self.log.record(partition, *position) {
                        *position += 1;
                        return Some(record);
                    }
                }
                None
            }
            ReadMode::Grouped { group, member } => {
                let mut groups = self.inner.groups.lock();
                let state = groups.get_mut(&(self.log.name.clone(), group.clone()))?;
                let index = state.members.iter().position(|m| *m == *member)?;
                let members = state.members.len();
                for (partition, committed) in (0u32..).zip(state.committed.iter_mut()) {
                    if partition as usize % members != index {
                        continue;
                    }
                    if let Some(record) = self.log.record(partition, *committed) {
                        *committed += 1;
                        return Some(record);
                    }
                }
                None
            }
        }
    }
}

#[async_trait]
impl Consumer for MemoryConsumer {
    async fn recv(&mut self) -> Result<BrokerRecord, BrokerError> {
        loop {
            self.changes.borrow_and_update();
            self.log.ensure_live()?;
            if let Some(record) = self.try_next() {
                return Ok(record);
            }
            self.changes
                .changed()
                .await
                .map_err(|_| BrokerError::Closed)?;
        }
    }
}

impl Drop for MemoryConsumer {
    fn drop(&mut self) {
        if let ReadMode::Grouped { group, member } = &self.mode {
            let mut groups = self.inner.groups.lock();
            if let Some(state) = groups.get_mut(&(self.log.name.clone(), group.clone())) {
                state.members.retain(|m| m != member);
            }
            drop(groups);
            // Remaining members pick up the partitions this one owned.
            self.log.wake();
        }
        self.inner
            .counters
            .open_consumers
            .fetch_sub(1, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    async fn recv_within(consumer: &mut Box<dyn Consumer>, ms: u64) -> Option<BrokerRecord> {
        tokio::time::timeout(Duration::from_millis(ms), consumer.recv())
            .await
            .ok()
            .and_then(Result::ok)
    }

    #[tokio::test]
    async fn create_list_and_already_exists() {
        let broker = MemoryBroker::new();
        let admin = broker.admin().await.unwrap();

        admin.create_topic(&TopicSpec::new("a-requests")).await.unwrap();
        let err = admin
            .create_topic(&TopicSpec::new("a-requests"))
            .await
            .unwrap_err();
        assert_eq!(err, BrokerError::TopicAlreadyExists("a-requests".into()));

        assert_eq!(admin.list_topics().await.unwrap(), vec!["a-requests"]);
        assert_eq!(broker.stats().create_topic_calls, 2);
    }

    #[tokio::test]
    async fn invalid_topic_shapes_are_rejected() {
        let broker = MemoryBroker::new();
        let admin = broker.admin().await.unwrap();

        let mut zero_partitions = TopicSpec::new("t");
        zero_partitions.partitions = 0;
        assert!(matches!(
            admin.create_topic(&zero_partitions).await,
            Err(BrokerError::InvalidTopic { .. })
        ));

        let mut replicated = TopicSpec::new("t");
        replicated.replication_factor = 3;
        assert!(matches!(
            admin.create_topic(&replicated).await,
            Err(BrokerError::InvalidTopic { .. })
        ));
    }

    #[tokio::test]
    async fn unreachable_broker_fails_sessions() {
        let broker = MemoryBroker::new();
        broker.set_reachable(false);
        assert!(matches!(
            broker.admin().await.err(),
            Some(BrokerError::Unreachable { .. })
        ));
        assert!(broker.producer("t").await.is_err());

        broker.set_reachable(true);
        assert!(broker.admin().await.is_ok());
    }

    #[tokio::test]
    async fn injected_admin_failures_are_counted_down() {
        let broker = MemoryBroker::new();
        broker.fail_next_admin_sessions(2);
        assert!(broker.admin().await.is_err());
        assert!(broker.admin().await.is_err());
        assert!(broker.admin().await.is_ok());
        assert_eq!(broker.stats().admin_sessions, 1);
    }

    #[tokio::test]
    async fn strict_broker_requires_topics() {
        let broker = MemoryBroker::without_auto_create();
        assert_eq!(
            broker.producer("missing").await.err(),
            Some(BrokerError::UnknownTopic("missing".into()))
        );
        assert!(broker
            .consumer("missing", ConsumerOptions::default())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn latest_consumer_sees_only_new_records() {
        let broker = MemoryBroker::new();
        let producer = broker.producer("t").await.unwrap();
        producer.send(None, Bytes::from_static(b"old")).await.unwrap();

        let mut latest = broker
            .consumer("t", ConsumerOptions::standalone(StartOffset::Latest))
            .await
            .unwrap();
        let mut earliest = broker
            .consumer("t", ConsumerOptions::standalone(StartOffset::Earliest))
            .await
            .unwrap();

        producer.send(None, Bytes::from_static(b"new")).await.unwrap();

        assert_eq!(recv_within(&mut latest, 100).await.unwrap().payload, "new");
        assert_eq!(recv_within(&mut earliest, 100).await.unwrap().payload, "old");
        assert_eq!(recv_within(&mut earliest, 100).await.unwrap().payload, "new");
        assert!(recv_within(&mut latest, 20).await.is_none());
    }

    #[tokio::test]
    async fn waiting_consumer_is_woken_by_append() {
        let broker = MemoryBroker::new();
        let mut consumer = broker
            .consumer("t", ConsumerOptions::standalone(StartOffset::Latest))
            .await
            .unwrap();
        let producer = broker.producer("t").await.unwrap();

        let reader = tokio::spawn(async move { consumer.recv().await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        producer
            .send(Some(b"k"), Bytes::from_static(b"hello"))
            .await
            .unwrap();

        let record = reader.await.unwrap().unwrap();
        assert_eq!(record.payload, "hello");
        assert_eq!(record.key.as_deref(), Some(&b"k"[..]));
        assert_eq!(record.offset, 0);
    }

    #[tokio::test]
    async fn group_members_never_share_a_record() {
        let broker = MemoryBroker::new();
        let admin = broker.admin().await.unwrap();
        let mut spec = TopicSpec::new("jobs");
        spec.partitions = 4;
        admin.create_topic(&spec).await.unwrap();

        let mut a = broker
            .consumer("jobs", ConsumerOptions::grouped("g", StartOffset::Earliest))
            .await
            .unwrap();
        let mut b = broker
            .consumer("jobs", ConsumerOptions::grouped("g", StartOffset::Earliest))
            .await
            .unwrap();

        let producer = broker.producer("jobs").await.unwrap();
        for i in 0..40 {
            let key = format!("key-{i}");
            producer
                .send(Some(key.as_bytes()), Bytes::from(key.clone()))
                .await
                .unwrap();
        }

        let mut seen = Vec::new();
        while let Some(r) = recv_within(&mut a, 20).await {
            seen.push(r.payload);
        }
        let from_a = seen.len();
        while let Some(r) = recv_within(&mut b, 20).await {
            seen.push(r.payload);
        }
        assert!(from_a > 0 && from_a < 40);
        seen.sort();
        seen.dedup();
        assert_eq!(seen.len(), 40);
    }

    #[tokio::test]
    async fn group_offsets_survive_member_replacement() {
        let broker = MemoryBroker::new();
        let producer = broker.producer("t").await.unwrap();
        for payload in ["one", "two", "three"] {
            producer.send(None, Bytes::from(payload)).await.unwrap();
        }

        let mut first = broker
            .consumer("t", ConsumerOptions::grouped("g", StartOffset::Earliest))
            .await
            .unwrap();
        assert_eq!(recv_within(&mut first, 50).await.unwrap().payload, "one");
        drop(first);

        let mut second = broker
            .consumer("t", ConsumerOptions::grouped("g", StartOffset::Earliest))
            .await
            .unwrap();
        assert_eq!(recv_within(&mut second, 50).await.unwrap().payload, "two");
        assert_eq!(recv_within(&mut second, 50).await.unwrap().payload, "three");
    }

    #[tokio::test]
    async fn dropping_handles_releases_them() {
        let broker = MemoryBroker::new();
        let producer = broker.producer("t").await.unwrap();
        let consumer = broker
            .consumer("t", ConsumerOptions::grouped("g", StartOffset::Latest))
            .await
            .unwrap();
        let stats = broker.stats();
        assert_eq!((stats.open_producers, stats.open_consumers), (1, 1));

        drop(producer);
        drop(consumer);
        let stats = broker.stats();
        assert_eq!((stats.open_producers, stats.open_consumers), (0, 0));
    }

    #[tokio::test]
    async fn deleting_a_topic_fails_its_handles() {
        let broker = MemoryBroker::new();
        let producer = broker.producer("t").await.unwrap();
        let mut consumer = broker
            .consumer("t", ConsumerOptions::standalone(StartOffset::Latest))
            .await
            .unwrap();
        let reader = tokio::spawn(async move { consumer.recv().await });
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(broker.delete_topic("t"));
        assert!(!broker.delete_topic("t"));

        assert_eq!(
            reader.await.unwrap(),
            Err(BrokerError::UnknownTopic("t".into()))
        );
        assert!(producer.send(None, Bytes::from_static(b"x")).await.is_err());
        assert!(broker.topic_names().is_empty());
    }

    #[tokio::test]
    async fn recreated_topic_starts_groups_from_scratch() {
        let broker = MemoryBroker::new();
        let producer = broker.producer("t").await.unwrap();
        producer.send(None, Bytes::from_static(b"a")).await.unwrap();
        producer.send(None, Bytes::from_static(b"b")).await.unwrap();
        let mut first = broker
            .consumer("t", ConsumerOptions::grouped("g", StartOffset::Earliest))
            .await
            .unwrap();
        first.recv().await.unwrap();
        first.recv().await.unwrap();

        broker.delete_topic("t");
        drop(first);
        let producer = broker.producer("t").await.unwrap();
        producer.send(None, Bytes::from_static(b"c")).await.unwrap();

        let mut second = broker
            .consumer("t", ConsumerOptions::grouped("g", StartOffset::Earliest))
            .await
            .unwrap();
        let record = recv_within(&mut second, 200).await.unwrap();
        assert_eq!(record.payload, Bytes::from_static(b"c"));
        assert_eq!(record.offset, 0);
    }

    #[tokio::test]
    async fn records_lists_topic_contents() {
        let broker = MemoryBroker::new();
        let producer = broker.producer("t").await.unwrap();
        producer.send(None, Bytes::from_static(b"a")).await.unwrap();
        producer.send(None, Bytes::from_static(b"b")).await.unwrap();

        let payloads: Vec<_> = broker.records("t").into_iter().map(|r| r.payload).collect();
        assert_eq!(payloads, vec!["a", "b"]);
        assert!(broker.records("missing").is_empty());
        assert_eq!(broker.stats().records_published, 2);
        assert_eq!(broker.topic_names(), vec!["t"]);
    }
}
