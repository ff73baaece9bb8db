//! Lifecycle state and graceful shutdown for the gateway process.
//!
//! Health state lives in an `ArcSwap` so health checks read it without locking.
//! Gateway calls hold an [`InFlightGuard`] for their whole duration; draining
//! waits until the last guard is dropped.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio::sync::{watch, Notify};

/// Process health, advanced by [`ShutdownController`].
///
/// State machine: Starting -> Ready -> Draining -> Stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    /// Workers and the HTTP listener are still coming up.
    Starting,
    /// Accepting calls.
    Ready,
    /// Shutdown requested; in-flight calls finish, new ones are refused.
    Draining,
    /// Every in-flight call has finished.
    Stopped,
}

impl HealthState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Ready => "ready",
            Self::Draining => "draining",
            Self::Stopped => "stopped",
        }
    }
}

#[derive(Debug, Default)]
struct InFlight {
    count: AtomicU64,
    idle: Notify,
}

/// Coordinates shutdown between the HTTP front, the workers, and health checks.
///
/// 1. Health checks read [`health_state`](Self::health_state).
/// 2. The proxy handler refuses calls unless [`is_accepting`](Self::is_accepting).
/// 3. [`trigger_shutdown`](Self::trigger_shutdown) moves to Draining and wakes
///    every [`shutdown_receiver`](Self::shutdown_receiver).
/// 4. [`wait_for_drain`](Self::wait_for_drain) waits for in-flight calls.
#[derive(Debug)]
pub struct ShutdownController {
    shutdown_signal: watch::Sender<bool>,
    in_flight: Arc<InFlight>,
    health_state: Arc<ArcSwap<HealthState>>,
}

impl ShutdownController {
    /// Creates a controller in the `Starting` state.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            shutdown_signal: tx,
            in_flight: Arc::new(InFlight::default()),
            health_state: Arc::new(ArcSwap::from_pointee(HealthState::Starting)),
        }
    }

    /// Moves to `Ready`. Ignored once shutdown has begun.
    pub fn set_ready(&self) {
        if self.health_state() == HealthState::Starting {
            self.health_state.store(Arc::new(HealthState::Ready));
        }
    }

    #[must_use]
    pub fn shutdown_receiver(&self) -> watch::Receiver<bool> {
        self.shutdown_signal.subscribe()
    }

    /// Resolves once shutdown has been triggered.
    pub async fn shutdown_requested(&self) {
        let mut rx = self.shutdown_signal.subscribe();
        // Sender is owned by self, so this only ends by observing `true`.
        let _ = rx.wait_for(|triggered| *triggered).await;
    }

    /// Moves to `Draining` and signals every shutdown receiver.
    pub fn trigger_shutdown(&self) {
        self.health_state.store(Arc::new(HealthState::Draining));
        self.shutdown_signal.send_replace(true);
    }

    #[must_use]
    pub fn health_state(&self) -> HealthState {
        **self.health_state.load()
    }

    /// Whether new calls should be admitted.
    #[must_use]
    pub fn is_accepting(&self) -> bool {
        self.health_state() == HealthState::Ready
    }

    /// Tracks one in-flight call until the guard is dropped.
    #[must_use]
    pub fn in_flight_guard(&self) -> InFlightGuard {
        self.in_flight.count.fetch_add(1, Ordering::SeqCst);
        InFlightGuard {
            in_flight: Arc::clone(&self.in_flight),
        }
    }

    #[must_use]
    pub fn in_flight_count(&self) -> u64 {
        self.in_flight.count.load(Ordering::SeqCst)
    }

    /// Waits up to `timeout` for in-flight calls to finish.
    ///
    /// Returns `true` and moves to `Stopped` when they did; returns `false`
    /// and stays in `Draining` when the timeout expired first.
    pub async fn wait_for_drain(&self, timeout: Duration) -> bool {
        let drained = tokio::time::timeout(timeout, async {
            loop {
                // Register interest before checking to avoid a lost wakeup.
                let idle = self.in_flight.idle.notified();
                if self.in_flight_count() == 0 {
                    return;
                }
                idle.await;
            }
        })
        .await
        .is_ok();

        if drained {
            self.health_state.store(Arc::new(HealthState::Stopped));
        }
        drained
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}

/// Decrements the in-flight count on drop, including during unwinding.
#[derive(Debug)]
pub struct InFlightGuard {
    in_flight: Arc<InFlight>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.in_flight.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.in_flight.idle.notify_waiters();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_runs_starting_ready_draining() {
        let controller = ShutdownController::new();
        assert_eq!(controller.health_state(), HealthState::Starting);
        assert!(!controller.is_accepting());

        controller.set_ready();
        assert_eq!(controller.health_state(), HealthState::Ready);
        assert!(controller.is_accepting());

        controller.trigger_shutdown();
        assert_eq!(controller.health_state(), HealthState::Draining);
        assert!(!controller.is_accepting());
    }

    #[test]
    fn set_ready_after_shutdown_is_ignored() {
        let controller = ShutdownController::new();
        controller.trigger_shutdown();
        controller.set_ready();
        assert_eq!(controller.health_state(), HealthState::Draining);
    }

    #[test]
    fn guards_track_in_flight_calls() {
        let controller = ShutdownController::new();
        let a = controller.in_flight_guard();
        let b = controller.in_flight_guard();
        assert_eq!(controller.in_flight_count(), 2);
        drop(a);
        assert_eq!(controller.in_flight_count(), 1);
        drop(b);
        assert_eq!(controller.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn receivers_and_waiters_see_shutdown() {
        let controller = Arc::new(ShutdownController::new());
        let mut rx = controller.shutdown_receiver();
        assert!(!*rx.borrow());

        let waiter = {
            let controller = Arc::clone(&controller);
            tokio::spawn(async move { controller.shutdown_requested().await })
        };
        controller.trigger_shutdown();

        rx.changed().await.unwrap();
        assert!(*rx.borrow());
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_requested_returns_if_already_triggered() {
        let controller = ShutdownController::new();
        controller.trigger_shutdown();
        controller.shutdown_requested().await;
    }

    #[tokio::test]
    async fn drain_with_nothing_in_flight_stops_immediately() {
        let controller = ShutdownController::new();
        controller.set_ready();
        controller.trigger_shutdown();

        assert!(controller.wait_for_drain(Duration::from_secs(1)).await);
        assert_eq!(controller.health_state(), HealthState::Stopped);
    }

    #[tokio::test]
    async fn drain_waits_for_last_guard() {
        let controller = ShutdownController::new();
        controller.set_ready();
        let guard = controller.in_flight_guard();
        controller.trigger_shutdown();

        let release = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            drop(guard);
        });

        assert!(controller.wait_for_drain(Duration::from_secs(2)).await);
        assert_eq!(controller.health_state(), HealthState::Stopped);
        release.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn drain_timeout_leaves_state_draining() {
        let controller = ShutdownController::new();
        controller.set_ready();
        let _guard = controller.in_flight_guard();
        controller.trigger_shutdown();

        assert!(!controller.wait_for_drain(Duration::from_secs(30)).await);
        assert_eq!(controller.health_state(), HealthState::Draining);
    }
}
