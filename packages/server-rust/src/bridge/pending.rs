//! Correlation map for the multiplexed reply reader.
//!
//! Flow:
//! 1. The gateway registers the call's correlation id and gets a [`PendingCall`].
//! 2. It publishes the request.
//! 3. The service's reply reader calls [`PendingCalls::complete`] for every reply.
//! 4. The gateway awaits the [`PendingCall`] or gives up at its deadline.
//!
//! Dropping a [`PendingCall`] removes its entry, so timed-out and failed
//! calls never leave anything behind.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use topicrpc_core::{CorrelationId, Response};
use tracing::{debug, warn};

use crate::traits::BrokerError;

type Reply = Result<Response, BrokerError>;

/// Counters for a [`PendingCalls`] map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PendingStats {
    pub registered: u64,
    /// Replies handed to a waiting caller.
    pub completed: u64,
    /// Replies with no waiting caller (late, duplicate, or someone else's).
    pub unmatched: u64,
    /// Waiters failed because the reply reader stopped.
    pub failed: u64,
}

#[derive(Debug, Default)]
struct Counters {
    registered: AtomicU64,
    completed: AtomicU64,
    unmatched: AtomicU64,
    failed: AtomicU64,
}

/// Waiting callers of one service, keyed by correlation id.
#[derive(Debug, Default)]
pub struct PendingCalls {
    waiters: Mutex<HashMap<CorrelationId, Waiter>>,
    next_token: AtomicU64,
    counters: Counters,
}

#[derive(Debug)]
struct Waiter {
    token: u64,
    tx: oneshot::Sender<Reply>,
}

impl PendingCalls {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a waiter for `id`.
    #[must_use]
    pub fn register(self: &Arc<Self>, id: CorrelationId) -> PendingCall {
        let (tx, rx) = oneshot::channel();
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        if self.waiters.lock().insert(id.clone(), Waiter { token, tx }).is_some() {
            warn!(correlation_id = %id, "correlation id registered twice; earlier waiter dropped");
        }
        self.counters.registered.fetch_add(1, Ordering::Relaxed);
        PendingCall {
            id,
            token,
            calls: Arc::clone(self),
            receiver: rx,
        }
    }

    /// Hands `response` to the caller waiting for its correlation id.
    ///
    /// Returns `false` when nobody is waiting; the reply is discarded.
    pub fn complete(&self, response: Response) -> bool {
        let waiter = self.waiters.lock().remove(response.correlation_id());
        match waiter {
            Some(waiter) => {
                let id = response.correlation_id().clone();
                if waiter.tx.send(Ok(response)).is_ok() {
                    self.counters.completed.fetch_add(1, Ordering::Relaxed);
                    true
                } else {
                    debug!(correlation_id = %id, "caller left before its reply arrived");
                    self.counters.unmatched.fetch_add(1, Ordering::Relaxed);
                    false
                }
            }
            None => {
                debug!(correlation_id = %response.correlation_id(), "discarding unmatched reply");
                self.counters.unmatched.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Fails every current waiter with `error`. Returns how many were failed.
    pub fn fail_all(&self, error: &BrokerError) -> usize {
        let drained: Vec<_> = self.waiters.lock().drain().collect();
        let count = drained.len();
        for (_, waiter) in drained {
            let _ = waiter.tx.send(Err(error.clone()));
        }
        self.counters
            .failed
            .fetch_add(count as u64, Ordering::Relaxed);
        count
    }

    /// Number of callers currently waiting.
    #[must_use]
    pub fn len(&self) -> usize {
        self.waiters.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn stats(&self) -> PendingStats {
        PendingStats {
            registered: self.counters.registered.load(Ordering::Relaxed),
            completed: self.counters.completed.load(Ordering::Relaxed),
            unmatched: self.counters.unmatched.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }
}

/// A registered waiter. Dropping it deregisters the correlation id.
#[derive(Debug)]
pub struct PendingCall {
    id: CorrelationId,
    token: u64,
    calls: Arc<PendingCalls>,
    receiver: oneshot::Receiver<Reply>,
}

impl PendingCall {
    #[must_use]
    pub fn correlation_id(&self) -> &CorrelationId {
        &self.id
    }

    /// Waits for the reply.
    ///
    /// # Errors
    ///
    /// Returns the reader's error if the reply reader stopped, or
    /// `BrokerError::Closed` if the entry was replaced or dropped without an answer.
    pub async fn wait(&mut self) -> Result<Response, BrokerError> {
        match (&mut self.receiver).await {
            Ok(reply) => reply,
            Err(_) => Err(BrokerError::Closed),
        }
    }
}

impl Drop for PendingCall {
    fn drop(&mut self) {
        let mut waiters = self.calls.waiters.lock();
        // Only remove our own entry; a re-registration under the same id owns it now.
        if waiters
            .get(&self.id)
            .is_some_and(|waiter| waiter.token == self.token)
        {
            waiters.remove(&self.id);
        }
    }
}
