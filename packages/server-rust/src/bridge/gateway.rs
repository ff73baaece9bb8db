//! Gateway client: turns a publish on a request topic into a blocking call.
//!
//! Each call registers interest in its correlation id, publishes the request
//! keyed by that id, and waits for the matching reply on the service's
//! response topic. Replies for other callers, duplicates and undecodable
//! records are discarded. The whole call, publish included, is bounded by the
//! call timeout; every broker handle and correlation entry a call owns is
//! released when it returns, whichever way it returns.
//!
//! In [`ReplyMode::Multiplexed`] one reader per service is shared by all
//! calls. It is started on the first call and replaced on the next call after
//! it dies; waiters it leaves behind are failed with a transport error.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use dashmap::DashMap;
use tokio::task::JoinHandle;
use topicrpc_core::{Headers, Request, Response, ServiceRegistration, Topology};
use tracing::{debug, error, info, info_span, warn, Instrument};

use super::config::{BridgeConfig, ReplyMode};
use super::error::CallError;
use super::pending::{PendingCall, PendingCalls};
use crate::traits::{Broker, BrokerError, Consumer, ConsumerOptions, StartOffset};

// ---------------------------------------------------------------------------
// ReplyReader
// ---------------------------------------------------------------------------

/// Long-lived reader of one service's response topic.
struct ReplyReader {
    pending: Arc<PendingCalls>,
    alive: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl ReplyReader {
    fn spawn(service: &str, consumer: Box<dyn Consumer>) -> Self {
        let pending = Arc::new(PendingCalls::new());
        let alive = Arc::new(AtomicBool::new(true));
        let span = info_span!("reply_reader", service = %service);
        let task = tokio::spawn(
            read_replies(consumer, Arc::clone(&pending), Arc::clone(&alive)).instrument(span),
        );
        Self {
            pending,
            alive,
            task,
        }
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }
}

impl Drop for ReplyReader {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn read_replies(
    mut consumer: Box<dyn Consumer>,
    pending: Arc<PendingCalls>,
    alive: Arc<AtomicBool>,
) {
    loop {
        match consumer.recv().await {
            Ok(record) => match Response::decode(&record.payload) {
                Ok(response) => {
                    pending.complete(response);
                }
                Err(e) => warn!(offset = record.offset, error = %e, "discarding malformed reply"),
            },
            Err(e) => {
                // Mark dead before draining so late registrations notice.
                alive.store(false, Ordering::SeqCst);
                let failed = pending.fail_all(&e);
                error!(error = %e, failed, "reply reader stopped");
                return;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// GatewayClient
// ---------------------------------------------------------------------------

/// Issues calls to the services of a [`Topology`].
pub struct GatewayClient {
    broker: Arc<dyn Broker>,
    topology: Arc<Topology>,
    call_timeout: Duration,
    reply_mode: ReplyMode,
    readers: DashMap<String, Arc<ReplyReader>>,
    /// Serializes reader start-up so one service never gets two readers.
    reader_start: tokio::sync::Mutex<()>,
}

impl GatewayClient {
    #[must_use]
    pub fn new(broker: Arc<dyn Broker>, topology: Arc<Topology>, config: &BridgeConfig) -> Self {
        Self {
            broker,
            topology,
            call_timeout: config.call_timeout,
            reply_mode: config.reply_mode,
            readers: DashMap::new(),
            reader_start: tokio::sync::Mutex::new(()),
        }
    }

    #[must_use]
    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    #[must_use]
    pub fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    /// Calls currently waiting on `service`'s shared reader.
    #[must_use]
    pub fn pending_calls(&self, service: &str) -> usize {
        self.readers
            .get(service)
            .map_or(0, |reader| reader.pending.len())
    }

    /// Builds a request for `service` and calls it with the default timeout.
    ///
    /// The request gets a fresh correlation id and `servicePath` set to
    /// `/<service><path>`.
    ///
    /// # Errors
    ///
    /// See [`GatewayClient::call`].
    pub async fn request(
        &self,
        service: &str,
        verb: &str,
        path: &str,
        headers: Headers,
        body: Vec<u8>,
    ) -> Result<Response, CallError> {
        let request = Request::builder(verb, path)
            .headers(headers)
            .body(body)
            .service_path(format!("/{service}{path}"))
            .build();
        self.call(service, request, self.call_timeout).await
    }

    /// Publishes `request` to `service` and waits up to `timeout` for its reply.
    ///
    /// # Errors
    ///
    /// - `CallError::UnknownService` before any broker I/O if `service` is not registered.
    /// - `CallError::Timeout` if no matching reply arrives in time.
    /// - `CallError::Transport` if a broker handle cannot be opened, the
    ///   publish fails, or the reply reader dies while waiting.
    /// - `CallError::MalformedMessage` if the request cannot be encoded.
    pub async fn call(
        &self,
        service: &str,
        request: Request,
        timeout: Duration,
    ) -> Result<Response, CallError> {
        let Some(registration) = self.topology.registration(service) else {
            count_call(service, "unknown_service");
            return Err(CallError::UnknownService(service.to_string()));
        };

        let span = info_span!(
            "gateway_call",
            service = %service,
            correlation_id = %request.correlation_id(),
            duration_ms = tracing::field::Empty,
            outcome = tracing::field::Empty,
        );

        async move {
            let started = Instant::now();
            let exchange = async {
                match self.reply_mode {
                    ReplyMode::Multiplexed => self.exchange_multiplexed(registration, &request).await,
                    ReplyMode::PerCall => self.exchange_per_call(registration, &request).await,
                }
            };
            let result = match tokio::time::timeout(timeout, exchange).await {
                Ok(result) => result,
                Err(_) => Err(CallError::Timeout {
                    service: service.to_string(),
                    timeout,
                }),
            };

            let elapsed = started.elapsed();
            let outcome = result.as_ref().map_or_else(CallError::outcome, |_| "ok");
            #[allow(clippy::cast_possible_truncation)]
            let duration_ms = elapsed.as_millis() as u64;
            let span = tracing::Span::current();
            span.record("duration_ms", duration_ms);
            span.record("outcome", outcome);
            count_call(service, outcome);
            metrics::histogram!(
                "topicrpc_gateway_call_duration_seconds",
                "service" => service.to_string()
            )
            .record(elapsed.as_secs_f64());
            debug!(duration_ms, outcome, "call finished");
            result
        }
        .instrument(span)
        .await
    }

    /// Shared-reader exchange: register, publish, wait on the correlation map.
    async fn exchange_multiplexed(
        &self,
        registration: &ServiceRegistration,
        request: &Request,
    ) -> Result<Response, CallError> {
        let reader = self.reader_for(registration).await?;
        let mut waiter: PendingCall = reader.pending.register(request.correlation_id().clone());
        if !reader.is_alive() {
            return Err(BrokerError::Closed.into());
        }
        self.publish(registration, request).await?;
        Ok(waiter.wait().await?)
    }

    /// Per-call exchange: open a consumer at the topic end, publish, scan replies.
    async fn exchange_per_call(
        &self,
        registration: &ServiceRegistration,
        request: &Request,
    ) -> Result<Response, CallError> {
        // Positioned before publishing so the reply cannot be missed.
        let mut consumer = self
            .broker
            .consumer(
                registration.response_topic(),
                ConsumerOptions::standalone(StartOffset::Latest),
            )
            .await?;
        self.publish(registration, request).await?;

        loop {
            let record = consumer.recv().await?;
            match Response::decode(&record.payload) {
                Ok(response) if response.correlation_id() == request.correlation_id() => {
                    return Ok(response);
                }
                Ok(other) => {
                    debug!(other = %other.correlation_id(), "skipping reply for another call");
                }
                Err(e) => warn!(offset = record.offset, error = %e, "discarding malformed reply"),
            }
        }
    }

    async fn publish(
        &self,
        registration: &ServiceRegistration,
        request: &Request,
    ) -> Result<(), CallError> {
        let payload = Bytes::from(request.encode()?);
        let producer = self.broker.producer(registration.request_topic()).await?;
        producer
            .send(Some(request.correlation_id().as_bytes()), payload)
            .await?;
        Ok(())
    }

    /// Returns the live shared reader for the service, starting one if needed.
    async fn reader_for(
        &self,
        registration: &ServiceRegistration,
    ) -> Result<Arc<ReplyReader>, BrokerError> {
        if let Some(reader) = self.live_reader(registration.name()) {
            return Ok(reader);
        }

        let _starting = self.reader_start.lock().await;
        if let Some(reader) = self.live_reader(registration.name()) {
            return Ok(reader);
        }

        let consumer = self
            .broker
            .consumer(
                registration.response_topic(),
                ConsumerOptions::standalone(StartOffset::Latest),
            )
            .await?;
        let reader = Arc::new(ReplyReader::spawn(registration.name(), consumer));
        let replaced = self
            .readers
            .insert(registration.name().to_string(), Arc::clone(&reader));
        if replaced.is_some() {
            info!(service = registration.name(), "restarted reply reader");
        }
        Ok(reader)
    }

    fn live_reader(&self, service: &str) -> Option<Arc<ReplyReader>> {
        self.readers
            .get(service)
            .filter(|reader| reader.is_alive())
            .map(|reader| Arc::clone(&reader))
    }
}

fn count_call(service: &str, outcome: &'static str) {
    metrics::counter!(
        "topicrpc_gateway_calls_total",
        "service" => service.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use futures_util::future::join_all;
    use topicrpc_core::status;

    use super::*;
    use crate::bridge::worker::WorkerRuntime;
    use crate::broker::MemoryBroker;

    const BOTH_MODES: [ReplyMode; 2] = [ReplyMode::Multiplexed, ReplyMode::PerCall];

    fn config(mode: ReplyMode) -> BridgeConfig {
        BridgeConfig {
            reply_mode: mode,
            call_timeout: Duration::from_secs(2),
            provision_interval: Duration::from_millis(10),
            ..BridgeConfig::default()
        }
    }

    fn topology() -> Arc<Topology> {
        Arc::new(Topology::from_names(["patients", "samples"]).unwrap())
    }

    fn gateway(broker: &MemoryBroker, mode: ReplyMode) -> GatewayClient {
        GatewayClient::new(Arc::new(broker.clone()), topology(), &config(mode))
    }

    /// Worker that echoes the request path as the body.
    fn echo_worker(broker: &MemoryBroker, service: &str) -> WorkerRuntime {
        WorkerRuntime::start(
            Arc::new(broker.clone()),
            &topology(),
            service,
            |req: &Request| Response::reply(req, status::OK).with_body(req.path().as_bytes().to_vec()),
            &config(ReplyMode::Multiplexed),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn concurrent_calls_get_their_own_replies() {
        for mode in BOTH_MODES {
            let broker = MemoryBroker::new();
            let mut worker = echo_worker(&broker, "patients");
            let gateway = gateway(&broker, mode);

            let requests: Vec<Request> = (0..20)
                .map(|i| Request::builder("GET", format!("/{i}")).build())
                .collect();
            let calls = requests.iter().map(|req| {
                gateway.call("patients", req.clone(), Duration::from_secs(2))
            });
            let replies = join_all(calls).await;

            for (request, reply) in requests.iter().zip(replies) {
                let reply = reply.unwrap();
                assert_eq!(reply.correlation_id(), request.correlation_id(), "{mode:?}");
                assert_eq!(reply.body(), request.path().as_bytes());
            }
            worker.stop().await;
        }
    }

    #[tokio::test]
    async fn request_builds_service_path() {
        let broker = MemoryBroker::new();
        let mut worker = WorkerRuntime::start(
            Arc::new(broker.clone()),
            &topology(),
            "samples",
            |req: &Request| Response::reply(req, status::OK).with_body(req.service_path().as_bytes().to_vec()),
            &config(ReplyMode::Multiplexed),
        )
        .unwrap();
        let gateway = gateway(&broker, ReplyMode::Multiplexed);

        let reply = gateway
            .request("samples", "GET", "/examination/7", Headers::new(), Vec::new())
            .await
            .unwrap();
        assert_eq!(reply.body(), b"/samples/examination/7");
        worker.stop().await;
    }

    #[tokio::test]
    async fn unknown_service_fails_without_broker_io() {
        for mode in BOTH_MODES {
            let broker = MemoryBroker::new();
            let gateway = gateway(&broker, mode);

            let err = gateway
                .request("billing", "GET", "/", Headers::new(), Vec::new())
                .await
                .unwrap_err();

            assert!(matches!(err, CallError::UnknownService(ref s) if s == "billing"));
            let stats = broker.stats();
            assert_eq!(stats.records_published, 0);
            assert_eq!(stats.open_consumers, 0);
            assert!(broker.topic_names().is_empty());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn silent_service_times_out_on_deadline() {
        for mode in BOTH_MODES {
            let broker = MemoryBroker::new();
            let gateway = gateway(&broker, mode);
            let deadline = Duration::from_secs(2);
            let started = tokio::time::Instant::now();

            let err = gateway
                .call("patients", Request::builder("GET", "/").build(), deadline)
                .await
                .unwrap_err();

            let elapsed = started.elapsed();
            assert!(matches!(err, CallError::Timeout { .. }), "{mode:?}");
            assert!(elapsed >= deadline);
            assert!(elapsed < deadline + Duration::from_millis(50));

            let stats = broker.stats();
            assert_eq!(stats.open_producers, 0);
            assert_eq!(gateway.pending_calls("patients"), 0);
            let expected_consumers = usize::from(mode == ReplyMode::Multiplexed);
            assert_eq!(stats.open_consumers, expected_consumers, "{mode:?}");
        }
    }

    #[tokio::test]
    async fn stray_and_duplicate_replies_are_ignored() {
        for mode in BOTH_MODES {
            let broker = MemoryBroker::new();
            let gateway = Arc::new(gateway(&broker, mode));

            // Hand-rolled worker: answers a stranger, then twice for real.
            let fake = broker.clone();
            let responder = tokio::spawn(async move {
                let mut requests = fake
                    .consumer("patients-requests", ConsumerOptions::grouped("patients", StartOffset::Earliest))
                    .await
                    .unwrap();
                let replies = fake.producer("patients-responses").await.unwrap();
                let record = requests.recv().await.unwrap();
                let request = Request::decode(&record.payload).unwrap();

                let stranger = Request::builder("GET", "/").build();
                for response in [
                    Response::reply(&stranger, status::OK),
                    Response::reply(&request, status::CREATED),
                    Response::reply(&request, status::OK),
                ] {
                    replies
                        .send(None, Bytes::from(response.encode().unwrap()))
                        .await
                        .unwrap();
                }
                replies
                    .send(None, Bytes::from_static(b"garbage"))
                    .await
                    .unwrap();
            });

            let reply = gateway
                .request("patients", "POST", "/", Headers::new(), b"{}".to_vec())
                .await
                .unwrap();
            assert_eq!(reply.status_code(), status::CREATED, "{mode:?}");
            responder.await.unwrap();
        }
    }

    #[tokio::test]
    async fn reader_loss_fails_waiters_and_is_replaced() {
        let broker = MemoryBroker::new();
        let gateway = Arc::new(gateway(&broker, ReplyMode::Multiplexed));

        let caller = Arc::clone(&gateway);
        let pending = tokio::spawn(async move {
            caller
                .call("patients", Request::builder("GET", "/").build(), Duration::from_secs(5))
                .await
        });
        while gateway.pending_calls("patients") == 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        assert!(broker.delete_topic("patients-responses"));
        let err = pending.await.unwrap().unwrap_err();
        assert!(matches!(err, CallError::Transport(_)));

        // The next call gets a fresh reader and a normal reply.
        let mut worker = echo_worker(&broker, "patients");
        let reply = gateway
            .call("patients", Request::builder("GET", "/1").build(), Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(reply.body(), b"/1");
        worker.stop().await;
    }

    #[tokio::test]
    async fn multiplexed_mode_keeps_one_reader_per_service() {
        let broker = MemoryBroker::new();
        let mut patients = echo_worker(&broker, "patients");
        let mut samples = echo_worker(&broker, "samples");
        let gateway = gateway(&broker, ReplyMode::Multiplexed);

        for i in 0..5 {
            let path = format!("/{i}");
            gateway
                .request("patients", "GET", &path, Headers::new(), Vec::new())
                .await
                .unwrap();
            gateway
                .request("samples", "GET", &path, Headers::new(), Vec::new())
                .await
                .unwrap();
        }

        // Two worker consumers plus one shared reader per service; only the
        // workers' reply producers stay open.
        assert_eq!(broker.stats().open_consumers, 4);
        assert_eq!(broker.stats().open_producers, 2);
        patients.stop().await;
        samples.stop().await;
    }

    #[tokio::test]
    async fn unreachable_broker_is_a_transport_error() {
        for mode in BOTH_MODES {
            let broker = MemoryBroker::new();
            broker.set_reachable(false);
            let gateway = gateway(&broker, mode);

            let err = gateway
                .request("patients", "GET", "/", Headers::new(), Vec::new())
                .await
                .unwrap_err();
            assert!(matches!(err, CallError::Transport(BrokerError::Unreachable { .. })));
        }
    }
}
