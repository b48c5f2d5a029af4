//! Task requests: cancellable, prioritized, stamped units of background work.
//!
//! A [`TaskRequest`] is owned by the tile that created it and shared with the
//! task service that executes it. Every field the two sides touch
//! concurrently is an atomic (state, stamp, priority, attempts) or a short
//! critical section (result slot, cancellation token), so the draining update
//! pass never contends with a worker for longer than a pointer swap.
//!
//! # Lifecycle
//!
//! ```text
//!            submit               execute
//!   Idle ─────────────► Running ─────────────► Completed
//!    ▲                     │                       │
//!    │   stale at dequeue  │                       │
//!    └─────────────────────┘                       │
//!    └─────────────────────────────────────────────┘
//!                        reset
//! ```
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use terrastream::executor::{ManualTaskService, ProgressCallback, StampClock, TaskRequest, TaskService};
//!
//! let clock = StampClock::new();
//! let service = ManualTaskService::new("example", clock.clone());
//!
//! let request = Arc::new(TaskRequest::new("answer", |_p: &dyn ProgressCallback| Some(42u32)));
//! service.submit(request.clone());
//! service.run_pending();
//!
//! assert!(request.is_completed());
//! assert_eq!(request.take_result(), Some(42));
//! ```

use std::fmt;
use std::sync::atomic::{AtomicI64, AtomicU32, AtomicU64, AtomicU8, Ordering};

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use super::progress::{ProgressCallback, ProgressMode, StampedProgress, TokenProgress};
use super::stamp::StampClock;

/// Unique identity of a request, used to withdraw it from a queue.
pub type RequestId = u64;

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

fn next_request_id() -> RequestId {
    NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed)
}

/// Observable lifecycle state of a request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum RequestState {
    /// Not queued; may be submitted.
    Idle = 0,
    /// Queued or executing.
    Running = 1,
    /// Finished executing, successfully or not.
    Completed = 2,
}

impl RequestState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Idle,
            1 => Self::Running,
            _ => Self::Completed,
        }
    }
}

/// The work a request performs.
///
/// Bodies run on worker threads and may block. They should poll
/// `progress.is_canceled()` (or `report_progress`) at yield points and return
/// `None` when canceled or when no data could be produced.
pub trait RequestBody<T>: Send + Sync + 'static {
    fn run(&self, progress: &dyn ProgressCallback) -> Option<T>;
}

impl<T, F> RequestBody<T> for F
where
    F: Fn(&dyn ProgressCallback) -> Option<T> + Send + Sync + 'static,
{
    fn run(&self, progress: &dyn ProgressCallback) -> Option<T> {
        self(progress)
    }
}

/// Type-erased view of a request, as seen by a task service.
pub trait Schedulable: Send + Sync {
    /// Unique request identity.
    fn id(&self) -> RequestId;

    /// Human-readable name for diagnostics.
    fn name(&self) -> &str;

    /// Scheduling priority (higher first).
    fn priority(&self) -> f32;

    /// Frame at which the owner last touched this request.
    fn stamp(&self) -> i64;

    /// Returns true if the request has been canceled.
    fn is_canceled(&self) -> bool;

    /// Transitions idle → running. Returns false if the request was not idle.
    fn try_begin(&self) -> bool;

    /// Runs the body on the calling thread and marks the request completed.
    fn execute(&self, clock: &StampClock);

    /// Marks a queued request completed without running its body.
    fn complete_canceled(&self);

    /// Returns a queued request to idle without running it.
    fn abandon(&self);
}

/// A cancellable, prioritized, stamped unit of background work producing `T`.
pub struct TaskRequest<T> {
    id: RequestId,
    name: String,
    priority: AtomicU32,
    state: AtomicU8,
    stamp: AtomicI64,
    attempts: AtomicU32,
    progress_mode: ProgressMode,
    token: Mutex<CancellationToken>,
    result: Mutex<Option<T>>,
    body: Box<dyn RequestBody<T>>,
}

impl<T: Send + 'static> TaskRequest<T> {
    /// Creates an idle request with priority 0.
    pub fn new(name: impl Into<String>, body: impl RequestBody<T>) -> Self {
        Self {
            id: next_request_id(),
            name: name.into(),
            priority: AtomicU32::new(0f32.to_bits()),
            state: AtomicU8::new(RequestState::Idle as u8),
            stamp: AtomicI64::new(0),
            attempts: AtomicU32::new(0),
            progress_mode: ProgressMode::Plain,
            token: Mutex::new(CancellationToken::new()),
            result: Mutex::new(None),
            body: Box::new(body),
        }
    }

    /// Sets the initial priority.
    pub fn with_priority(self, priority: f32) -> Self {
        self.set_priority(priority);
        self
    }

    /// Sets how the progress callback decides cancellation.
    pub fn with_progress_mode(mut self, mode: ProgressMode) -> Self {
        self.progress_mode = mode;
        self
    }

    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn priority(&self) -> f32 {
        f32::from_bits(self.priority.load(Ordering::Relaxed))
    }

    pub fn set_priority(&self, priority: f32) {
        self.priority.store(priority.to_bits(), Ordering::Relaxed);
    }

    pub fn stamp(&self) -> i64 {
        self.stamp.load(Ordering::Relaxed)
    }

    /// Marks the request as still wanted at `stamp`.
    pub fn set_stamp(&self, stamp: i64) {
        self.stamp.store(stamp, Ordering::Relaxed);
    }

    pub fn state(&self) -> RequestState {
        RequestState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_idle(&self) -> bool {
        self.state() == RequestState::Idle
    }

    pub fn is_running(&self) -> bool {
        self.state() == RequestState::Running
    }

    pub fn is_completed(&self) -> bool {
        self.state() == RequestState::Completed
    }

    /// Number of non-canceled executions so far.
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::Relaxed)
    }

    pub fn progress_mode(&self) -> ProgressMode {
        self.progress_mode
    }

    /// Requests cancellation. Idempotent and callable from any thread.
    pub fn cancel(&self) {
        self.token.lock().cancel();
    }

    /// Returns true if the request was canceled (explicitly or as stale).
    pub fn was_canceled(&self) -> bool {
        self.token.lock().is_cancelled()
    }

    /// Takes the result of a completed, non-canceled request.
    pub fn take_result(&self) -> Option<T> {
        if !self.is_completed() || self.was_canceled() {
            return None;
        }
        self.result.lock().take()
    }

    /// Returns a completed request to idle so it can be resubmitted.
    ///
    /// Clears any result and replaces the cancellation token. The attempt
    /// counter is preserved. Returns false (and does nothing) if the request
    /// is still running.
    pub fn reset(&self) -> bool {
        if self.is_running() {
            return false;
        }
        *self.result.lock() = None;
        *self.token.lock() = CancellationToken::new();
        self.state
            .store(RequestState::Idle as u8, Ordering::Release);
        true
    }

    fn finish(&self) {
        self.state
            .store(RequestState::Completed as u8, Ordering::Release);
    }
}

impl<T: Send + 'static> Schedulable for TaskRequest<T> {
    fn id(&self) -> RequestId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> f32 {
        TaskRequest::priority(self)
    }

    fn stamp(&self) -> i64 {
        TaskRequest::stamp(self)
    }

    fn is_canceled(&self) -> bool {
        self.was_canceled()
    }

    fn try_begin(&self) -> bool {
        self.state
            .compare_exchange(
                RequestState::Idle as u8,
                RequestState::Running as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    fn execute(&self, clock: &StampClock) {
        let token = self.token.lock().clone();
        let output = match self.progress_mode {
            ProgressMode::Plain => {
                let progress = TokenProgress::new(token.clone());
                run_body(self.body.as_ref(), &progress)
            }
            ProgressMode::Stamped => {
                let progress = StampedProgress::new(token.clone(), &self.stamp, clock);
                run_body(self.body.as_ref(), &progress)
            }
        };

        if token.is_cancelled() {
            *self.result.lock() = None;
        } else {
            self.attempts.fetch_add(1, Ordering::Relaxed);
            *self.result.lock() = output;
        }
        self.finish();
    }

    fn complete_canceled(&self) {
        self.token.lock().cancel();
        *self.result.lock() = None;
        self.finish();
    }

    fn abandon(&self) {
        self.state
            .store(RequestState::Idle as u8, Ordering::Release);
    }
}

fn run_body<T: 'static>(body: &dyn RequestBody<T>, progress: &dyn ProgressCallback) -> Option<T> {
    if progress.report_progress(0.0, 1.0) {
        return None;
    }
    body.run(progress)
}

impl<T> fmt::Debug for TaskRequest<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskRequest")
            .field("id", &self.id)
            .field("name", &self.name)
            .field(
                "state",
                &RequestState::from_u8(self.state.load(Ordering::Relaxed)),
            )
            .field("stamp", &self.stamp.load(Ordering::Relaxed))
            .field("attempts", &self.attempts.load(Ordering::Relaxed))
            .finish()
    }
}
