//! Worker runtime: consume requests, run the handler, publish replies.
//!
//! One task per service. The loop is strictly sequential: the next request is
//! not read until the previous reply has been published, so replies leave in
//! the order requests arrived. A stop request is only observed between
//! messages; a request that has been read is always answered.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use topicrpc_core::{status, Request, RequestHandler, Response, ServiceRegistration, Topology};
use tracing::{debug, error, info, info_span, warn, Instrument};

use super::config::BridgeConfig;
use super::provision::{spawn_provisioning, RetryPolicy};
use crate::traits::{Broker, BrokerError, BrokerRecord, Consumer, ConsumerOptions, Producer, StartOffset};

/// Why a worker could not be started.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("service {0} is not in the topology")]
    UnknownService(String),
}

// ---------------------------------------------------------------------------
// WorkerStats
// ---------------------------------------------------------------------------

/// Message counters for one worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WorkerStats {
    /// Requests answered and published.
    pub answered: u64,
    /// Records skipped because they did not decode as a request.
    pub malformed: u64,
    /// Replies that could not be encoded or published.
    pub publish_failures: u64,
    /// Handler invocations that panicked.
    pub handler_panics: u64,
}

#[derive(Debug, Default)]
struct Counters {
    answered: AtomicU64,
    malformed: AtomicU64,
    publish_failures: AtomicU64,
    handler_panics: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> WorkerStats {
        WorkerStats {
            answered: self.answered.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            publish_failures: self.publish_failures.load(Ordering::Relaxed),
            handler_panics: self.handler_panics.load(Ordering::Relaxed),
        }
    }
}

fn count_message(service: &str, outcome: &'static str) {
    metrics::counter!(
        "topicrpc_worker_messages_total",
        "service" => service.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

// ---------------------------------------------------------------------------
// WorkerRuntime
// ---------------------------------------------------------------------------

/// Handle to a running worker loop.
pub struct WorkerRuntime {
    service: String,
    shutdown_tx: Option<watch::Sender<bool>>,
    handle: Option<JoinHandle<()>>,
    counters: Arc<Counters>,
}

impl WorkerRuntime {
    /// Starts the worker for `service`.
    ///
    /// Provisioning of the service's two topics is spawned in the background
    /// and never delays the loop. Opening the consumer and producer is
    /// retried on the provisioning interval until it succeeds or the worker
    /// is stopped.
    ///
    /// # Errors
    ///
    /// Returns `WorkerError::UnknownService` if `service` is not registered.
    pub fn start<H: RequestHandler>(
        broker: Arc<dyn Broker>,
        topology: &Topology,
        service: &str,
        handler: H,
        config: &BridgeConfig,
    ) -> Result<Self, WorkerError> {
        let registration = topology
            .registration(service)
            .cloned()
            .ok_or_else(|| WorkerError::UnknownService(service.to_string()))?;

        let topics = vec![
            config.topic_spec(registration.request_topic()),
            config.topic_spec(registration.response_topic()),
        ];
        // Detached: the outcome is logged by the provisioning task itself.
        drop(spawn_provisioning(
            Arc::clone(&broker),
            topics,
            RetryPolicy::from(config),
        ));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let counters = Arc::new(Counters::default());
        let worker = WorkerLoop {
            broker,
            registration,
            handler,
            retry_interval: config.provision_interval,
            counters: Arc::clone(&counters),
            shutdown: shutdown_rx,
        };
        let span = info_span!("worker", service = %service);
        let handle = tokio::spawn(worker.run().instrument(span));

        Ok(Self {
            service: service.to_string(),
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
            counters,
        })
    }

    #[must_use]
    pub fn service(&self) -> &str {
        &self.service
    }

    #[must_use]
    pub fn stats(&self) -> WorkerStats {
        self.counters.snapshot()
    }

    /// Returns `true` while the loop task is alive.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stops the loop after the message in progress, if any, and waits for it.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(true);
        }
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                error!(service = %self.service, error = %e, "worker task failed");
            }
        }
    }
}

impl Drop for WorkerRuntime {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(true);
        }
    }
}

// ---------------------------------------------------------------------------
// WorkerLoop
// ---------------------------------------------------------------------------

struct WorkerLoop<H> {
    broker: Arc<dyn Broker>,
    registration: ServiceRegistration,
    handler: H,
    retry_interval: Duration,
    counters: Arc<Counters>,
    shutdown: watch::Receiver<bool>,
}

impl<H: RequestHandler> WorkerLoop<H> {
    async fn run(mut self) {
        let Some((mut consumer, mut producer)) = self.open().await else {
            return;
        };
        info!(
            request_topic = self.registration.request_topic(),
            response_topic = self.registration.response_topic(),
            "worker started"
        );

        loop {
            let record = tokio::select! {
                biased;
                _ = self.shutdown.changed() => break,
                record = consumer.recv() => record,
            };
            match record {
                Ok(record) => self.process(&record, producer.as_ref()).await,
                Err(e) => {
                    warn!(error = %e, "request consumer failed; reopening");
                    drop(consumer);
                    match self.open().await {
                        Some((reopened, reproducer)) => {
                            consumer = reopened;
                            producer = reproducer;
                            info!("worker topics reopened");
                        }
                        None => break,
                    }
                }
            }
        }
        info!("worker stopped");
    }

    /// Opens the consumer and producer, retrying until both succeed.
    /// Returns `None` if the worker is stopped first.
    async fn open(&mut self) -> Option<(Box<dyn Consumer>, Box<dyn Producer>)> {
        loop {
            match self.try_open().await {
                Ok(handles) => return Some(handles),
                Err(e) => {
                    warn!(error = %e, retry_in = ?self.retry_interval, "cannot open worker topics");
                }
            }
            tokio::select! {
                biased;
                _ = self.shutdown.changed() => return None,
                () = tokio::time::sleep(self.retry_interval) => {}
            }
        }
    }

    async fn try_open(&self) -> Result<(Box<dyn Consumer>, Box<dyn Producer>), BrokerError> {
        let consumer = self
            .broker
            .consumer(
                self.registration.request_topic(),
                ConsumerOptions::grouped(self.registration.consumer_group(), StartOffset::Earliest),
            )
            .await?;
        let producer = self
            .broker
            .producer(self.registration.response_topic())
            .await?;
        Ok((consumer, producer))
    }

    async fn process(&self, record: &BrokerRecord, producer: &dyn Producer) {
        let request = match Request::decode(&record.payload) {
            Ok(request) => request,
            Err(e) => {
                warn!(
                    partition = record.partition,
                    offset = record.offset,
                    error = %e,
                    "skipping malformed request"
                );
                self.counters.malformed.fetch_add(1, Ordering::Relaxed);
                count_message(self.registration.name(), "malformed");
                return;
            }
        };

        let response = self.answer(&request);
        debug!(
            correlation_id = %request.correlation_id(),
            verb = request.verb(),
            path = request.path(),
            status = response.status_code(),
            "handled request"
        );

        let payload = match response.encode() {
            Ok(payload) => Bytes::from(payload),
            Err(e) => {
                error!(correlation_id = %request.correlation_id(), error = %e, "cannot encode reply");
                self.counters.publish_failures.fetch_add(1, Ordering::Relaxed);
                count_message(self.registration.name(), "publish_failed");
                return;
            }
        };
        match producer
            .send(Some(request.correlation_id().as_bytes()), payload)
            .await
        {
            Ok(_) => {
                self.counters.answered.fetch_add(1, Ordering::Relaxed);
                count_message(self.registration.name(), "answered");
            }
            Err(e) => {
                error!(correlation_id = %request.correlation_id(), error = %e, "cannot publish reply");
                self.counters.publish_failures.fetch_add(1, Ordering::Relaxed);
                count_message(self.registration.name(), "publish_failed");
            }
        }
    }

    /// Runs the handler, turning panics into a 500 and pinning the reply to
    /// the request's correlation id.
    fn answer(&self, request: &Request) -> Response {
        let outcome = run_blocking(|| catch_unwind(AssertUnwindSafe(|| self.handler.handle(request))));
        let response = match outcome {
            Ok(response) => response,
            Err(_) => {
                error!(correlation_id = %request.correlation_id(), "handler panicked");
                self.counters.handler_panics.fetch_add(1, Ordering::Relaxed);
                return Response::error(
                    request,
                    status::INTERNAL_SERVER_ERROR,
                    "Internal server error",
                );
            }
        };
        if response.correlation_id() != request.correlation_id() {
            warn!(
                expected = %request.correlation_id(),
                returned = %response.correlation_id(),
                "handler replied with a foreign correlation id; rewriting"
            );
            return response.answering(request);
        }
        response
    }
}

/// Runs a synchronous handler without pinning a runtime worker thread.
///
/// On the multi-threaded runtime the thread hands its other tasks to a
/// replacement first; the current-thread runtime has nowhere to hand them.
fn run_blocking<T>(f: impl FnOnce() -> T) -> T {
    match Handle::try_current().map(|handle| handle.runtime_flavor()) {
        Ok(RuntimeFlavor::MultiThread) => tokio::task::block_in_place(f),
        _ => f(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
