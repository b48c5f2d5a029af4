//! Progress callbacks for cooperative cancellation.
//!
//! Long-running request bodies poll a [`ProgressCallback`] at well-defined
//! yield points. There is no forced preemption: a body that never polls runs
//! to completion and its result is discarded if the request was canceled in
//! the meantime.

use std::sync::atomic::{AtomicI64, Ordering};

use tokio_util::sync::CancellationToken;

use super::stamp::StampClock;

/// Polling interface for detecting cancellation inside a running request.
pub trait ProgressCallback: Send + Sync {
    /// Reports progress and returns `true` if the work should stop.
    fn report_progress(&self, current: f64, total: f64) -> bool;

    /// Returns `true` once the request has been canceled.
    fn is_canceled(&self) -> bool;
}

/// How a request's progress callback decides cancellation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ProgressMode {
    /// Canceled only by an explicit `cancel()`.
    #[default]
    Plain,
    /// Also self-cancels when the request's stamp falls too far behind the
    /// servicing queue's stamp.
    Stamped,
}

/// Progress callback driven solely by a cancellation token.
pub struct TokenProgress {
    token: CancellationToken,
}

impl TokenProgress {
    pub fn new(token: CancellationToken) -> Self {
        Self { token }
    }
}

impl ProgressCallback for TokenProgress {
    fn report_progress(&self, _current: f64, _total: f64) -> bool {
        self.token.is_cancelled()
    }

    fn is_canceled(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Progress callback that cancels abandoned requests.
///
/// A request is abandoned once the service's stamp has moved more than the
/// clock's threshold past the request's own stamp, i.e. the tile that owns the
/// request stopped refreshing it. Once tripped, the request's token is
/// canceled so the owner observes the cancellation when it drains.
pub struct StampedProgress<'a> {
    token: CancellationToken,
    request_stamp: &'a AtomicI64,
    clock: &'a StampClock,
}

impl<'a> StampedProgress<'a> {
    pub fn new(token: CancellationToken, request_stamp: &'a AtomicI64, clock: &'a StampClock) -> Self {
        Self {
            token,
            request_stamp,
            clock,
        }
    }
}

impl ProgressCallback for StampedProgress<'_> {
    fn report_progress(&self, _current: f64, _total: f64) -> bool {
        if self.token.is_cancelled() {
            return true;
        }
        if self.clock.is_stale(self.request_stamp.load(Ordering::Relaxed)) {
            self.token.cancel();
            return true;
        }
        false
    }

    fn is_canceled(&self) -> bool {
        self.token.is_cancelled()
    }
}
