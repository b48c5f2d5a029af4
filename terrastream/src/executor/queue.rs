//! Priority queue for request scheduling.
//!
//! Requests are ordered by priority (higher values first), then by enqueue
//! order (FIFO within the same priority). Priority is sampled when the request
//! is queued.
//!
//! The queue is not thread-safe; services wrap it in a mutex.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;

use super::request::{RequestId, Schedulable};
use super::stamp::StampClock;

// =============================================================================
// Sequence Number Generator
// =============================================================================

/// Global sequence counter for FIFO ordering within priority levels.
static SEQUENCE_COUNTER: AtomicU64 = AtomicU64::new(0);

fn next_sequence() -> u64 {
    SEQUENCE_COUNTER.fetch_add(1, AtomicOrdering::Relaxed)
}

// =============================================================================
// Queued Request
// =============================================================================

/// A request waiting to be executed.
pub struct QueuedRequest {
    /// The request to execute.
    pub request: Arc<dyn Schedulable>,

    /// Priority sampled at enqueue time.
    pub priority: f32,

    sequence: u64,
}

impl QueuedRequest {
    pub fn new(request: Arc<dyn Schedulable>) -> Self {
        let priority = request.priority();
        Self {
            request,
            priority,
            sequence: next_sequence(),
        }
    }

    pub fn name(&self) -> &str {
        self.request.name()
    }
}

impl std::fmt::Debug for QueuedRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueuedRequest")
            .field("name", &self.request.name())
            .field("id", &self.request.id())
            .field("priority", &self.priority)
            .field("sequence", &self.sequence)
            .finish()
    }
}

// Ordering for BinaryHeap: higher priority first, then lower sequence (older) first
impl PartialEq for QueuedRequest {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for QueuedRequest {}

impl PartialOrd for QueuedRequest {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedRequest {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.priority.total_cmp(&other.priority) {
            Ordering::Equal => other.sequence.cmp(&self.sequence),
            other_ordering => other_ordering,
        }
    }
}

// =============================================================================
// Dequeue Outcome
// =============================================================================

/// Counts of requests dropped while looking for runnable work.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Dropped {
    /// Requests completed as canceled without running.
    pub canceled: usize,
    /// Requests returned to idle because their owner stopped refreshing them.
    pub stale: usize,
}

// =============================================================================
// Request Queue
// =============================================================================

/// Priority queue of pending requests.
#[derive(Default)]
pub struct RequestQueue {
    heap: BinaryHeap<QueuedRequest>,
}

impl RequestQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, request: Arc<dyn Schedulable>) {
        self.heap.push(QueuedRequest::new(request));
    }

    /// Removes and returns the highest-priority request.
    pub fn pop(&mut self) -> Option<QueuedRequest> {
        self.heap.pop()
    }

    pub fn peek(&self) -> Option<&QueuedRequest> {
        self.heap.peek()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Removes a request by identity. Returns true if it was queued.
    pub fn remove(&mut self, id: RequestId) -> bool {
        let before = self.heap.len();
        self.heap.retain(|queued| queued.request.id() != id);
        self.heap.len() != before
    }

    /// Drains every queued request, in arbitrary order.
    pub fn drain(&mut self) -> Vec<Arc<dyn Schedulable>> {
        self.heap.drain().map(|queued| queued.request).collect()
    }

    /// Pops the highest-priority request that is still worth running.
    ///
    /// Canceled requests are completed as canceled and stale requests are
    /// returned to idle; both are skipped.
    pub fn pop_runnable(&mut self, clock: &StampClock) -> (Option<Arc<dyn Schedulable>>, Dropped) {
        let mut dropped = Dropped::default();
        while let Some(queued) = self.heap.pop() {
            let request = queued.request;
            if request.is_canceled() {
                request.complete_canceled();
                dropped.canceled += 1;
            } else if clock.is_stale(request.stamp()) {
                request.abandon();
                dropped.stale += 1;
            } else {
                return (Some(request), dropped);
            }
        }
        (None, dropped)
    }
}

impl std::fmt::Debug for RequestQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestQueue")
            .field("len", &self.heap.len())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
