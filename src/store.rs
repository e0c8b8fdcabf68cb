//! Support module for `GuardedStore`.
//!
//! See the documentation of the [`GuardedStore`] struct for more information.
//!
//! [`GuardedStore`]: struct.GuardedStore.html

use std::fmt;
use std::sync::{Arc, RwLock};

use crate::error::LaneError;
use crate::lane::{ExecutionLane, LaneMode};
use crate::util;

/// A sequence that allows concurrent reads and exclusive, ordered, asynchronous writes.
///
/// Every access goes through a concurrent [`ExecutionLane`] owned by the store:
///
/// * Reads are ordinary submissions, so any number of them run side by side. The caller blocks
///   until its read has run and gets the value back directly.
/// * Writes are barrier submissions. [`write`] returns as soon as the write is queued; the lane
///   runs it only after every earlier access has finished, with nothing else running alongside
///   it, and holds back every later access until it is done.
///
/// Because the lane starts work in submission order, writes from one thread are applied in the
/// order they were made, and a read submitted after a write sees that write. The sequence itself
/// sits behind an `RwLock`, which the barrier keeps uncontended.
///
/// [`ExecutionLane`]: struct.ExecutionLane.html
/// [`write`]: #method.write
///
/// # Example
///
/// ```
/// use dispatchlane::GuardedStore;
///
/// let messages = GuardedStore::new("messages").unwrap();
/// assert_eq!(messages.read().unwrap(), None);
///
/// messages.write(String::from("hello")).unwrap();
/// messages.write(String::from("world")).unwrap();
///
/// // the read is queued behind both writes, so it sees the second one
/// assert_eq!(messages.read().unwrap().as_deref(), Some("world"));
/// assert_eq!(messages.len().unwrap(), 2);
/// ```
pub struct GuardedStore<T> {
    items: Arc<RwLock<Vec<T>>>,
    lane: ExecutionLane,
}

impl<T> GuardedStore<T>
where
    T: Send + Sync + 'static,
{
    /// Creates an empty store with its own concurrent lane, labeled `label`.
    ///
    /// # Errors
    ///
    /// See [`LaneBuilder::build`].
    ///
    /// [`LaneBuilder::build`]: struct.LaneBuilder.html#method.build
    pub fn new(label: impl Into<String>) -> Result<GuardedStore<T>, LaneError> {
        GuardedStore::with_lane(ExecutionLane::concurrent(label)?)
    }

    /// Creates an empty store that arbitrates access through `lane`.
    ///
    /// The store takes ownership of the lane; other work should not be submitted to it.
    ///
    /// # Errors
    ///
    /// Returns `LaneError::NotConcurrent` if `lane` is serial. A serial lane would be correct
    /// but would make reads wait on each other.
    pub fn with_lane(lane: ExecutionLane) -> Result<GuardedStore<T>, LaneError> {
        if lane.mode() != LaneMode::Concurrent {
            return Err(LaneError::NotConcurrent {
                label: lane.label().to_owned(),
            });
        }

        Ok(GuardedStore {
            items: Arc::new(RwLock::new(Vec::new())),
            lane,
        })
    }

    /// Returns the lane arbitrating access to this store.
    pub fn lane(&self) -> &ExecutionLane {
        &self.lane
    }

    /// Returns the last value written, or `None` if nothing has been written yet.
    ///
    /// # Errors
    ///
    /// Returns `LaneError::Closed` if the store's lane has been shut down.
    pub fn read(&self) -> Result<Option<T>, LaneError>
    where
        T: Clone,
    {
        self.with_items(|items| items.last().cloned())
    }

    /// Returns a copy of every value written so far, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `LaneError::Closed` if the store's lane has been shut down.
    pub fn snapshot(&self) -> Result<Vec<T>, LaneError>
    where
        T: Clone,
    {
        self.with_items(|items| items.to_vec())
    }

    /// Returns how many values have been written.
    ///
    /// # Errors
    ///
    /// Returns `LaneError::Closed` if the store's lane has been shut down.
    pub fn len(&self) -> Result<usize, LaneError> {
        self.with_items(|items| items.len())
    }

    /// Returns whether nothing has been written yet.
    ///
    /// # Errors
    ///
    /// Returns `LaneError::Closed` if the store's lane has been shut down.
    pub fn is_empty(&self) -> Result<bool, LaneError> {
        self.with_items(|items| items.is_empty())
    }

    /// Queues `value` to be appended and returns without waiting for it to be applied.
    ///
    /// # Errors
    ///
    /// Returns `LaneError::Closed` if the store's lane has been shut down. The value is dropped.
    pub fn write(&self, value: T) -> Result<(), LaneError> {
        let items = self.items.clone();
        self.lane.submit_barrier(move || {
            util::guts(items.write()).push(value);
        })
    }

    /// Blocks until every write queued before this call has been applied.
    ///
    /// # Errors
    ///
    /// Returns `LaneError::Closed` if the store's lane has been shut down.
    pub fn flush(&self) -> Result<(), LaneError> {
        self.lane.submit_barrier_and_await(|| ())
    }

    fn with_items<F, R>(&self, f: F) -> Result<R, LaneError>
    where
        F: FnOnce(&[T]) -> R + Send + 'static,
        R: Send + 'static,
    {
        let items = self.items.clone();
        self.lane
            .submit_and_await(move || f(&util::guts(items.read())))
    }
}

impl<T> fmt::Debug for GuardedStore<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GuardedStore")
            .field("lane", &self.lane)
            .finish_non_exhaustive()
    }
}
