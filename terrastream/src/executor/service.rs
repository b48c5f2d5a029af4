//! Task services that execute requests.
//!
//! A [`TaskService`] accepts requests, orders them by priority, drops work
//! that was canceled or abandoned while queued, and runs the rest. The
//! terrain keeps one service per imagery layer, one for elevation and one for
//! geometry regeneration so a slow imagery source cannot starve the others.
//!
//! # Implementations
//!
//! - [`WorkerPoolService`] - tokio dispatcher feeding blocking workers
//! - [`ManualTaskService`] - runs queued requests on the caller's thread when
//!   pumped, for deterministic stepping
//!
//! # Architecture
//!
//! ```text
//! submit ──► RequestQueue ──► dispatcher ──► Semaphore permit ──► spawn_blocking
//!            (priority)       (tokio task)   (worker count)       (request.execute)
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::{Notify, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use super::queue::{Dropped, RequestQueue};
use super::request::{RequestId, Schedulable};
use super::stamp::StampClock;

// =============================================================================
// Service Trait
// =============================================================================

/// A queue of background work with its own execution resources.
pub trait TaskService: Send + Sync {
    /// Service name, for diagnostics.
    fn name(&self) -> &str;

    /// Queues a request. Returns false if the request was not idle (already
    /// queued or executing) or the service is shut down.
    fn submit(&self, request: Arc<dyn Schedulable>) -> bool;

    /// Removes a queued request without running it. Returns true if the
    /// request was still queued; it is then back in the idle state.
    fn withdraw(&self, id: RequestId) -> bool;

    /// The service's current frame stamp.
    fn stamp(&self) -> i64;

    /// Number of requests waiting to run.
    fn pending(&self) -> usize;

    /// Point-in-time counters.
    fn stats(&self) -> ServiceStatsSnapshot;

    /// Stops accepting work and completes every queued request as canceled.
    fn shutdown(&self);
}

// =============================================================================
// Statistics
// =============================================================================

/// Lock-free counters shared by the service implementations.
#[derive(Debug, Default)]
pub struct ServiceStats {
    submitted: AtomicU64,
    executed: AtomicU64,
    canceled: AtomicU64,
    stale: AtomicU64,
    withdrawn: AtomicU64,
}

impl ServiceStats {
    fn record_submitted(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    fn record_executed(&self) {
        self.executed.fetch_add(1, Ordering::Relaxed);
    }

    fn record_withdrawn(&self) {
        self.withdrawn.fetch_add(1, Ordering::Relaxed);
    }

    fn record_dropped(&self, dropped: Dropped) {
        self.canceled
            .fetch_add(dropped.canceled as u64, Ordering::Relaxed);
        self.stale.fetch_add(dropped.stale as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ServiceStatsSnapshot {
        ServiceStatsSnapshot {
            submitted: self.submitted.load(Ordering::Relaxed),
            executed: self.executed.load(Ordering::Relaxed),
            canceled: self.canceled.load(Ordering::Relaxed),
            stale: self.stale.load(Ordering::Relaxed),
            withdrawn: self.withdrawn.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`ServiceStats`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ServiceStatsSnapshot {
    pub submitted: u64,
    pub executed: u64,
    pub canceled: u64,
    pub stale: u64,
    pub withdrawn: u64,
}

// =============================================================================
// Shared Queue State
// =============================================================================

struct Shared {
    name: String,
    clock: StampClock,
    queue: Mutex<RequestQueue>,
    stats: ServiceStats,
}

impl Shared {
    fn new(name: String, clock: StampClock) -> Self {
        Self {
            name,
            clock,
            queue: Mutex::new(RequestQueue::new()),
            stats: ServiceStats::default(),
        }
    }

    fn enqueue(&self, request: Arc<dyn Schedulable>) -> bool {
        if !request.try_begin() {
            return false;
        }
        trace!(service = %self.name, request = request.name(), "Request queued");
        self.queue.lock().push(request);
        self.stats.record_submitted();
        true
    }

    fn withdraw(&self, id: RequestId) -> bool {
        let mut queue = self.queue.lock();
        let mut withdrawn = None;
        for request in queue.drain() {
            if request.id() == id {
                withdrawn = Some(request);
            } else {
                queue.push(request);
            }
        }
        match withdrawn {
            Some(request) => {
                request.abandon();
                self.stats.record_withdrawn();
                true
            }
            None => false,
        }
    }

    fn next_runnable(&self) -> Option<Arc<dyn Schedulable>> {
        let (next, dropped) = self.queue.lock().pop_runnable(&self.clock);
        if dropped != Dropped::default() {
            debug!(
                service = %self.name,
                canceled = dropped.canceled,
                stale = dropped.stale,
                "Dropped queued requests"
            );
            self.stats.record_dropped(dropped);
        }
        next
    }

    fn run(&self, request: &dyn Schedulable) {
        request.execute(&self.clock);
        self.stats.record_executed();
    }

    /// Completes every queued request as canceled.
    fn cancel_pending(&self) -> usize {
        let drained = self.queue.lock().drain();
        let count = drained.len();
        for request in drained {
            request.complete_canceled();
        }
        self.stats.record_dropped(Dropped {
            canceled: count,
            stale: 0,
        });
        count
    }
}

// =============================================================================
// Worker Pool Service
// =============================================================================

/// Task service backed by a tokio dispatcher and blocking worker threads.
///
/// At most `workers` requests execute concurrently. Request bodies run on
/// tokio's blocking pool, so they are free to block on I/O or decoding.
pub struct WorkerPoolService {
    shared: Arc<Shared>,
    notify: Arc<Notify>,
    shutdown: CancellationToken,
    workers: usize,
}

impl WorkerPoolService {
    /// Creates the service and spawns its dispatcher on `handle`.
    ///
    /// # Arguments
    ///
    /// * `name` - Service name for logging
    /// * `clock` - Frame clock used for staleness checks
    /// * `workers` - Maximum concurrently executing requests (at least 1)
    /// * `handle` - Runtime the dispatcher and workers run on
    pub fn spawn(
        name: impl Into<String>,
        clock: StampClock,
        workers: usize,
        handle: &Handle,
    ) -> Arc<Self> {
        let workers = workers.max(1);
        let service = Arc::new(Self {
            shared: Arc::new(Shared::new(name.into(), clock)),
            notify: Arc::new(Notify::new()),
            shutdown: CancellationToken::new(),
            workers,
        });

        info!(service = %service.shared.name, workers, "Task service starting");

        let shared = Arc::clone(&service.shared);
        let notify = Arc::clone(&service.notify);
        let shutdown = service.shutdown.clone();
        let semaphore = Arc::new(Semaphore::new(workers));
        handle.spawn(dispatch(shared, notify, semaphore, shutdown));

        service
    }

    pub fn workers(&self) -> usize {
        self.workers
    }
}

async fn dispatch(
    shared: Arc<Shared>,
    notify: Arc<Notify>,
    semaphore: Arc<Semaphore>,
    shutdown: CancellationToken,
) {
    loop {
        let permit = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        let request = loop {
            if let Some(request) = shared.next_runnable() {
                break Some(request);
            }
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break None,
                _ = notify.notified() => {}
            }
        };
        let Some(request) = request else { break };

        let worker_shared = Arc::clone(&shared);
        tokio::task::spawn_blocking(move || {
            worker_shared.run(request.as_ref());
            drop(permit);
        });
    }
    debug!(service = %shared.name, "Dispatcher stopped");
}

impl TaskService for WorkerPoolService {
    fn name(&self) -> &str {
        &self.shared.name
    }

    fn submit(&self, request: Arc<dyn Schedulable>) -> bool {
        if self.shutdown.is_cancelled() {
            return false;
        }
        let queued = self.shared.enqueue(request);
        if queued {
            self.notify.notify_one();
        }
        queued
    }

    fn withdraw(&self, id: RequestId) -> bool {
        self.shared.withdraw(id)
    }

    fn stamp(&self) -> i64 {
        self.shared.clock.current()
    }

    fn pending(&self) -> usize {
        self.shared.queue.lock().len()
    }

    fn stats(&self) -> ServiceStatsSnapshot {
        self.shared.stats.snapshot()
    }

    /// Stops dispatching. Requests already executing run to completion.
    fn shutdown(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        self.shutdown.cancel();
        let canceled = self.shared.cancel_pending();
        info!(service = %self.shared.name, canceled, "Task service shut down");
    }
}

impl Drop for WorkerPoolService {
    fn drop(&mut self) {
        TaskService::shutdown(self);
    }
}

// =============================================================================
// Manual Service
// =============================================================================

/// Task service that executes nothing until pumped.
///
/// [`run_pending`](Self::run_pending) drains the queue in priority order on
/// the calling thread, applying the same cancel and staleness rules as the
/// worker pool. Useful for deterministic frame stepping.
pub struct ManualTaskService {
    shared: Shared,
}

impl ManualTaskService {
    pub fn new(name: impl Into<String>, clock: StampClock) -> Self {
        Self {
            shared: Shared::new(name.into(), clock),
        }
    }

    /// Runs the single highest-priority runnable request. Returns false if
    /// nothing was runnable.
    pub fn run_one(&self) -> bool {
        match self.shared.next_runnable() {
            Some(request) => {
                self.shared.run(request.as_ref());
                true
            }
            None => false,
        }
    }

    /// Runs queued requests until the queue is empty. Returns the number
    /// executed.
    pub fn run_pending(&self) -> usize {
        let mut executed = 0;
        while self.run_one() {
            executed += 1;
        }
        executed
    }

    /// Completes every queued request as canceled.
    pub fn cancel_pending(&self) -> usize {
        self.shared.cancel_pending()
    }
}

impl TaskService for ManualTaskService {
    fn name(&self) -> &str {
        &self.shared.name
    }

    fn submit(&self, request: Arc<dyn Schedulable>) -> bool {
        self.shared.enqueue(request)
    }

    fn withdraw(&self, id: RequestId) -> bool {
        self.shared.withdraw(id)
    }

    fn stamp(&self) -> i64 {
        self.shared.clock.current()
    }

    fn pending(&self) -> usize {
        self.shared.queue.lock().len()
    }

    fn stats(&self) -> ServiceStatsSnapshot {
        self.shared.stats.snapshot()
    }

    fn shutdown(&self) {
        self.cancel_pending();
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::progress::ProgressCallback;
    use crate::executor::request::TaskRequest;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn counting_request(name: &str, counter: Arc<AtomicUsize>) -> Arc<TaskRequest<usize>> {
        Arc::new(TaskRequest::new(name, move |_p: &dyn ProgressCallback| {
            Some(counter.fetch_add(1, Ordering::SeqCst))
        }))
    }

    #[test]
    fn test_manual_runs_in_priority_order() {
        let clock = StampClock::new();
        let service = ManualTaskService::new("manual", clock);
        let counter = Arc::new(AtomicUsize::new(0));

        let low = counting_request("low", counter.clone());
        low.set_priority(1.0);
        let high = counting_request("high", counter.clone());
        high.set_priority(5.0);

        assert!(service.submit(low.clone()));
        assert!(service.submit(high.clone()));
        assert_eq!(service.pending(), 2);
        assert_eq!(service.run_pending(), 2);

        assert_eq!(high.take_result(), Some(0));
        assert_eq!(low.take_result(), Some(1));
    }

    #[test]
    fn test_submit_twice_is_noop() {
        let service = ManualTaskService::new("manual", StampClock::new());
        let request = counting_request("once", Arc::new(AtomicUsize::new(0)));
        assert!(service.submit(request.clone()));
        assert!(!service.submit(request.clone()));
        assert_eq!(service.pending(), 1);
    }

    #[test]
    fn test_withdraw_returns_request_to_idle() {
        let service = ManualTaskService::new("manual", StampClock::new());
        let request = counting_request("withdrawn", Arc::new(AtomicUsize::new(0)));
        service.submit(request.clone());

        assert!(service.withdraw(request.id()));
        assert!(request.is_idle());
        assert_eq!(service.pending(), 0);
        assert_eq!(service.stats().withdrawn, 1);
        assert!(!service.withdraw(request.id()));
    }

    #[test]
    fn test_manual_drops_stale_and_canceled() {
        let clock = StampClock::new();
        let service = ManualTaskService::new("manual", clock.clone());
        let counter = Arc::new(AtomicUsize::new(0));

        let stale = counting_request("stale", counter.clone());
        let canceled = counting_request("canceled", counter.clone());
        service.submit(stale.clone());
        service.submit(canceled.clone());
        canceled.cancel();
        for _ in 0..3 {
            clock.advance();
        }

        assert_eq!(service.run_pending(), 0);
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert!(stale.is_idle());
        assert!(canceled.is_completed() && canceled.was_canceled());

        let stats = service.stats();
        assert_eq!(stats.stale, 1);
        assert_eq!(stats.canceled, 1);
    }

    #[test]
    fn test_manual_cancel_pending() {
        let service = ManualTaskService::new("manual", StampClock::new());
        let request = counting_request("pending", Arc::new(AtomicUsize::new(0)));
        service.submit(request.clone());

        assert_eq!(service.cancel_pending(), 1);
        assert!(request.is_completed());
        assert!(request.was_canceled());
    }

    async fn wait_for<F: Fn() -> bool>(condition: F) -> bool {
        for _ in 0..200 {
            if condition() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        condition()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_worker_pool_executes_requests() {
        let service = WorkerPoolService::spawn("pool", StampClock::new(), 2, &Handle::current());
        let counter = Arc::new(AtomicUsize::new(0));
        let requests: Vec<_> = (0..8)
            .map(|i| counting_request(&format!("r{}", i), counter.clone()))
            .collect();
        for request in &requests {
            assert!(service.submit(request.clone()));
        }

        assert!(wait_for(|| requests.iter().all(|r| r.is_completed())).await);
        assert_eq!(counter.load(Ordering::SeqCst), 8);
        assert_eq!(service.stats().executed, 8);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_worker_pool_cancel_is_observed() {
        let service = WorkerPoolService::spawn("pool", StampClock::new(), 1, &Handle::current());
        let started = Arc::new(AtomicUsize::new(0));
        let started_in_body = started.clone();
        let request = Arc::new(TaskRequest::new("spin", move |p: &dyn ProgressCallback| {
            started_in_body.store(1, Ordering::SeqCst);
            while !p.report_progress(0.0, 1.0) {
                std::thread::sleep(Duration::from_millis(1));
            }
            None::<u32>
        }));
        service.submit(request.clone());

        assert!(wait_for(|| started.load(Ordering::SeqCst) == 1).await);
        request.cancel();
        assert!(wait_for(|| request.is_completed()).await);
        assert!(request.was_canceled());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_worker_pool_shutdown_cancels_queued() {
        let service = WorkerPoolService::spawn("pool", StampClock::new(), 1, &Handle::current());
        service.shutdown();
        let request = counting_request("late", Arc::new(AtomicUsize::new(0)));
        assert!(!service.submit(request.clone()));
        assert!(request.is_idle());
    }
}
