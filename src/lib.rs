//! Execution lanes and the synchronization primitives built around them.
//!
//! This library contains the following pieces:
//!
//! * [`ExecutionLane`], a named pool of worker threads that starts submitted work in FIFO order,
//!   either one item at a time ([`LaneMode::Serial`]) or with overlap
//!   ([`LaneMode::Concurrent`]). Concurrent lanes also accept *barrier* submissions, which run
//!   alone between everything submitted before and after them.
//! * [`CompletionCoordinator`], a counter that lets one or more threads wait until every task
//!   entered into it has left.
//! * [`GuardedStore`], a sequence whose reads run concurrently and whose writes run as barriers
//!   on the store's own lane.
//! * [`TaskHandle`], the explicit result handle returned by [`ExecutionLane::spawn`].
//!
//! Everything here is in-process and blocking. There is no cancellation and no timeout: a task
//! that never finishes, or a coordinator entry that is never left, blocks its waiters forever.
//!
//! [`ExecutionLane`]: struct.ExecutionLane.html
//! [`LaneMode::Serial`]: enum.LaneMode.html#variant.Serial
//! [`LaneMode::Concurrent`]: enum.LaneMode.html#variant.Concurrent
//! [`CompletionCoordinator`]: struct.CompletionCoordinator.html
//! [`GuardedStore`]: struct.GuardedStore.html
//! [`TaskHandle`]: struct.TaskHandle.html
//! [`ExecutionLane::spawn`]: struct.ExecutionLane.html#method.spawn
//!
//! # Logging
//!
//! Lanes and coordinators emit [`tracing`] events: lane start and shutdown at `debug`, barriers
//! and coordinator releases at `trace`, and panicking work items at `error`. The crate never
//! installs a subscriber.
//!
//! [`tracing`]: https://docs.rs/tracing

#![deny(missing_docs)]

mod coordinator;
mod error;
mod handle;
mod lane;
mod store;
mod util;

pub use crate::coordinator::{CompletionCoordinator, CompletionGuard};
pub use crate::error::{CompletionError, LaneError};
pub use crate::handle::TaskHandle;
pub use crate::lane::{ExecutionLane, LaneBuilder, LaneMode};
pub use crate::store::GuardedStore;
