//! Background task execution for tile loading.
//!
//! This module provides the request primitive tiles use to load data off the
//! update thread, and the services that run those requests.
//!
//! # Components
//!
//! - [`TaskRequest`]: cancellable, prioritized, stamped unit of work
//! - [`ProgressCallback`]: cooperative cancellation polling, with a
//!   [`StampedProgress`] variant that self-cancels abandoned work
//! - [`StampClock`]: the frame counter shared by the registry and services
//! - [`RequestQueue`]: priority + FIFO ordering of queued requests
//! - [`TaskService`]: the service interface, implemented by
//!   [`WorkerPoolService`] and [`ManualTaskService`]
//! - [`LoadingMode`] / [`RetryPolicy`]: scheduling and retry policy

mod policy;
mod progress;
mod queue;
mod request;
mod service;
mod stamp;

pub use policy::{
    elevation_priority, imagery_priority, LoadingMode, RetryPolicy, DEFAULT_MAX_ATTEMPTS,
    PRIORITY_IMAGE_OFFSET,
};
pub use progress::{ProgressCallback, ProgressMode, StampedProgress, TokenProgress};
pub use queue::{Dropped, QueuedRequest, RequestQueue};
pub use request::{RequestBody, RequestId, RequestState, Schedulable, TaskRequest};
pub use service::{
    ManualTaskService, ServiceStats, ServiceStatsSnapshot, TaskService, WorkerPoolService,
};
pub use stamp::{StampClock, DEFAULT_STALE_THRESHOLD};
