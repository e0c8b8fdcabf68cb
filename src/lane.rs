//! Execution lanes: named pools of worker threads that start submitted work in FIFO order.
//!
//! The primary type in this module is [`ExecutionLane`], configured through [`LaneBuilder`]. See
//! the documentation on those types for further information.
//!
//! [`ExecutionLane`]: struct.ExecutionLane.html
//! [`LaneBuilder`]: struct.LaneBuilder.html

use std::collections::VecDeque;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

use tracing::{debug, error, trace};

use crate::coordinator::CompletionCoordinator;
use crate::error::LaneError;
use crate::handle::{self, TaskHandle};
use crate::util;

/// Determines how many items an [`ExecutionLane`] runs at once.
///
/// In both modes items *start* in the order they were submitted.
///
/// [`ExecutionLane`]: struct.ExecutionLane.html
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum LaneMode {
    /// One item at a time. Each item finishes before the next one starts.
    Serial,
    /// Several items may overlap and finish in any order.
    Concurrent,
}

/// Configuration for an [`ExecutionLane`].
///
/// # Example
///
/// ```
/// use dispatchlane::{LaneBuilder, LaneMode};
///
/// let lane = LaneBuilder::new("io")
///     .mode(LaneMode::Concurrent)
///     .worker_threads(3)
///     .build()
///     .unwrap();
///
/// assert_eq!(lane.worker_count(), 3);
/// assert_eq!(lane.label(), "io");
/// ```
///
/// [`ExecutionLane`]: struct.ExecutionLane.html
#[derive(Debug, Clone)]
pub struct LaneBuilder {
    label: String,
    mode: LaneMode,
    worker_threads: Option<usize>,
}

impl LaneBuilder {
    /// Starts configuring a serial lane with the given label.
    ///
    /// The label names the worker threads (`<label>-<n>`) and appears in log events and errors.
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            mode: LaneMode::Serial,
            worker_threads: None,
        }
    }

    /// Sets the lane's mode.
    pub fn mode(mut self, mode: LaneMode) -> Self {
        self.mode = mode;
        self
    }

    /// Sets how many worker threads a concurrent lane starts.
    ///
    /// Defaults to the machine's available parallelism, but never fewer than two. Serial lanes
    /// ignore this setting and always use a single worker.
    ///
    /// # Panics
    ///
    /// Panics if `n` is zero.
    pub fn worker_threads(mut self, n: usize) -> Self {
        assert!(n > 0, "worker_threads must be > 0");

        self.worker_threads = Some(n);
        self
    }

    fn resolved_workers(&self) -> usize {
        match self.mode {
            LaneMode::Serial => 1,
            LaneMode::Concurrent => self.worker_threads.unwrap_or_else(|| {
                thread::available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(1)
                    .max(2)
            }),
        }
    }

    /// Spawns the lane's workers.
    ///
    /// # Errors
    ///
    /// Returns `LaneError::Spawn` if a worker thread could not be started. Any workers that did
    /// start are shut down again.
    pub fn build(self) -> Result<ExecutionLane, LaneError> {
        let workers = self.resolved_workers();
        let shared = Arc::new(Shared {
            label: self.label,
            mode: self.mode,
            queue: Mutex::new(Queue::default()),
            ready: Condvar::new(),
        });

        let mut lane = ExecutionLane {
            shared,
            workers: Vec::with_capacity(workers),
        };

        for id in 0..workers {
            let shared = lane.shared.clone();
            let handle = thread::Builder::new()
                .name(format!("{}-{}", lane.shared.label, id))
                .spawn(move || shared.run_worker(id))
                .map_err(|source| LaneError::Spawn {
                    label: lane.shared.label.clone(),
                    source,
                })?;
            lane.workers.push(handle);
        }

        debug!(
            lane = %lane.shared.label,
            mode = ?lane.shared.mode,
            workers,
            "execution lane started"
        );

        Ok(lane)
    }
}

type Job = Box<dyn FnOnce() + Send + 'static>;

struct Item {
    job: Job,
    barrier: bool,
}

#[derive(Default)]
struct Queue {
    pending: VecDeque<Item>,
    running: usize,
    barrier_active: bool,
    closed: bool,
}

impl Queue {
    // Only the front item is ever considered, which is what keeps start order equal to
    // submission order.
    fn can_start(&self, barrier: bool) -> bool {
        !self.barrier_active && (!barrier || self.running == 0)
    }
}

struct Shared {
    label: String,
    mode: LaneMode,
    queue: Mutex<Queue>,
    ready: Condvar,
}

impl Shared {
    fn enqueue(&self, job: Job, barrier: bool) -> Result<(), LaneError> {
        let mut queue = util::guts(self.queue.lock());

        if queue.closed {
            return Err(LaneError::Closed {
                label: self.label.clone(),
            });
        }

        queue.pending.push_back(Item { job, barrier });
        drop(queue);

        self.ready.notify_all();
        Ok(())
    }

    fn next_item(&self) -> Option<Item> {
        let mut queue = util::guts(self.queue.lock());

        loop {
            match queue.pending.front().map(|item| item.barrier) {
                Some(barrier) if queue.can_start(barrier) => {
                    queue.running += 1;
                    queue.barrier_active = barrier;
                    return queue.pending.pop_front();
                }
                None if queue.closed => return None,
                _ => queue = util::guts(self.ready.wait(queue)),
            }
        }
    }

    fn finish_item(&self, barrier: bool) {
        let mut queue = util::guts(self.queue.lock());
        queue.running -= 1;
        if barrier {
            queue.barrier_active = false;
        }
        drop(queue);

        self.ready.notify_all();
    }

    fn run_worker(&self, id: usize) {
        while let Some(item) = self.next_item() {
            let barrier = item.barrier;
            if barrier {
                trace!(lane = %self.label, worker = id, "barrier started");
            }

            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(item.job)) {
                error!(
                    lane = %self.label,
                    worker = id,
                    panic = util::panic_message(&*payload),
                    "work item panicked"
                );
            }

            if barrier {
                trace!(lane = %self.label, worker = id, "barrier finished");
            }
            self.finish_item(barrier);
        }

        debug!(lane = %self.label, worker = id, "lane worker exiting");
    }
}

/// A named execution context that runs submitted work on its own worker threads.
///
/// Work submitted to a lane always *starts* in submission order. What happens after that depends
/// on the lane's [`LaneMode`]:
///
/// * A `Serial` lane runs one item at a time, so each item finishes before the next one starts.
/// * A `Concurrent` lane lets items overlap, so they may finish in any order.
///
/// A concurrent lane also accepts *barrier* submissions. A barrier waits for everything submitted
/// before it to finish, runs alone, and holds back everything submitted after it until it is done.
/// The lane goes back to running items concurrently as soon as the barrier completes.
///
/// Lanes are explicitly constructed and owned; there is no process-wide default lane. Dropping a
/// lane stops it from accepting work, lets the queued work drain, and joins the workers.
///
/// [`LaneMode`]: enum.LaneMode.html
///
/// # Example
///
/// ```
/// use dispatchlane::ExecutionLane;
/// use std::sync::{Arc, Mutex};
///
/// let serial = ExecutionLane::serial("pangers.serial").unwrap();
/// let log = Arc::new(Mutex::new(Vec::new()));
///
/// for task in 1..=2 {
///     let log = log.clone();
///     serial.submit(move || {
///         log.lock().unwrap().push(format!("serial task {} started", task));
///         // some work
///         log.lock().unwrap().push(format!("serial task {} finished", task));
///     }).unwrap();
/// }
///
/// // an awaited no-op returns once everything ahead of it is done
/// serial.submit_and_await(|| ()).unwrap();
///
/// assert_eq!(*log.lock().unwrap(), [
///     "serial task 1 started",
///     "serial task 1 finished",
///     "serial task 2 started",
///     "serial task 2 finished",
/// ]);
/// ```
pub struct ExecutionLane {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

impl ExecutionLane {
    /// Returns a builder for a lane with the given label.
    pub fn builder(label: impl Into<String>) -> LaneBuilder {
        LaneBuilder::new(label)
    }

    /// Creates a serial lane with the given label.
    ///
    /// # Errors
    ///
    /// See [`LaneBuilder::build`].
    ///
    /// [`LaneBuilder::build`]: struct.LaneBuilder.html#method.build
    pub fn serial(label: impl Into<String>) -> Result<ExecutionLane, LaneError> {
        LaneBuilder::new(label).mode(LaneMode::Serial).build()
    }

    /// Creates a concurrent lane with the given label and the default worker count.
    ///
    /// # Errors
    ///
    /// See [`LaneBuilder::build`].
    ///
    /// [`LaneBuilder::build`]: struct.LaneBuilder.html#method.build
    pub fn concurrent(label: impl Into<String>) -> Result<ExecutionLane, LaneError> {
        LaneBuilder::new(label).mode(LaneMode::Concurrent).build()
    }

    /// Returns the lane's label.
    pub fn label(&self) -> &str {
        &self.shared.label
    }

    /// Returns the lane's mode.
    pub fn mode(&self) -> LaneMode {
        self.shared.mode
    }

    /// Returns the number of worker threads serving this lane.
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Returns whether the lane has been shut down.
    pub fn is_closed(&self) -> bool {
        util::guts(self.shared.queue.lock()).closed
    }

    /// Enqueues `work` and returns immediately.
    ///
    /// If `work` panics, the panic is logged and the worker moves on to the next item.
    ///
    /// # Errors
    ///
    /// Returns `LaneError::Closed` if the lane has been shut down.
    pub fn submit<F>(&self, work: F) -> Result<(), LaneError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.shared.enqueue(Box::new(work), false)
    }

    /// Enqueues `work` as a barrier and returns immediately.
    ///
    /// The barrier starts only once every item submitted before it has finished, runs with no
    /// other item of this lane alongside it, and every item submitted after it waits until it is
    /// done. On a serial lane every item already runs alone, so a barrier behaves like
    /// [`submit`].
    ///
    /// # Errors
    ///
    /// Returns `LaneError::Closed` if the lane has been shut down.
    ///
    /// [`submit`]: #method.submit
    pub fn submit_barrier<F>(&self, work: F) -> Result<(), LaneError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.shared.enqueue(Box::new(work), true)
    }

    /// Enqueues `work` and returns a handle to its result.
    ///
    /// # Errors
    ///
    /// Returns `LaneError::Closed` if the lane has been shut down.
    pub fn spawn<F, R>(&self, work: F) -> Result<TaskHandle<R>, LaneError>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        self.spawn_item(work, false)
    }

    /// Enqueues `work`, blocks until it finishes, and returns its result.
    ///
    /// Calling this from inside work running on the same serial lane (or on a concurrent lane
    /// whose workers are all blocked the same way) deadlocks. The lane does not check for this.
    ///
    /// # Errors
    ///
    /// Returns `LaneError::Closed` if the lane has been shut down.
    ///
    /// # Panics
    ///
    /// If `work` panics, the panic is resumed on the calling thread.
    pub fn submit_and_await<F, R>(&self, work: F) -> Result<R, LaneError>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let task = self.spawn_item(work, false)?;
        Ok(join_or_resume(task))
    }

    /// Enqueues `work` as a barrier, blocks until it finishes, and returns its result.
    ///
    /// Submitting a no-op this way waits for everything submitted earlier to finish.
    ///
    /// # Errors
    ///
    /// Returns `LaneError::Closed` if the lane has been shut down.
    ///
    /// # Panics
    ///
    /// If `work` panics, the panic is resumed on the calling thread.
    pub fn submit_barrier_and_await<F, R>(&self, work: F) -> Result<R, LaneError>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let task = self.spawn_item(work, true)?;
        Ok(join_or_resume(task))
    }

    /// Enters `coordinator`, then enqueues `work` so that it leaves `coordinator` once it is done.
    ///
    /// The coordinator is entered on the calling thread before anything is queued, so a `wait`
    /// issued after this call returns always accounts for `work`. The coordinator is left even
    /// if `work` panics.
    ///
    /// # Errors
    ///
    /// Returns `LaneError::Closed` if the lane has been shut down, in which case the coordinator
    /// is left again before returning.
    ///
    /// # Example
    ///
    /// ```
    /// use dispatchlane::{CompletionCoordinator, ExecutionLane};
    /// use std::sync::Arc;
    /// use std::sync::atomic::{AtomicUsize, Ordering};
    ///
    /// let lane = ExecutionLane::concurrent("batch").unwrap();
    /// let group = Arc::new(CompletionCoordinator::new());
    /// let sum = Arc::new(AtomicUsize::new(0));
    ///
    /// for n in 1..=10 {
    ///     let sum = sum.clone();
    ///     lane.submit_tracked(&group, move || {
    ///         sum.fetch_add(n, Ordering::SeqCst);
    ///     }).unwrap();
    /// }
    ///
    /// group.wait();
    /// assert_eq!(sum.load(Ordering::SeqCst), 55);
    /// ```
    pub fn submit_tracked<F>(
        &self,
        coordinator: &Arc<CompletionCoordinator>,
        work: F,
    ) -> Result<(), LaneError>
    where
        F: FnOnce() + Send + 'static,
    {
        coordinator.enter();

        let departure = Departure(coordinator.clone());
        self.submit(move || {
            let _departure = departure;
            work();
        })
    }

    /// Stops the lane from accepting new work.
    ///
    /// Work that was already queued still runs. Calling this more than once has no further
    /// effect.
    pub fn shutdown(&self) {
        let mut queue = util::guts(self.shared.queue.lock());
        if queue.closed {
            return;
        }
        queue.closed = true;
        drop(queue);

        debug!(lane = %self.shared.label, "execution lane shutting down");
        self.shared.ready.notify_all();
    }

    fn spawn_item<F, R>(&self, work: F, barrier: bool) -> Result<TaskHandle<R>, LaneError>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let (promise, task) = handle::pair();
        let job = Box::new(move || {
            promise.fulfil(panic::catch_unwind(AssertUnwindSafe(work)));
        });

        self.shared.enqueue(job, barrier)?;
        Ok(task)
    }
}

fn join_or_resume<R>(task: TaskHandle<R>) -> R {
    match task.join() {
        Ok(value) => value,
        Err(payload) => panic::resume_unwind(payload),
    }
}

// Leaves the coordinator when dropped, whether the work ran to completion, panicked, or was
// thrown away because the lane was closed. An imbalance found here panics like any other
// unmatched leave: on a worker that lands in the work item's panic log, on a rejected submission
// it reaches the submitting thread.
struct Departure(Arc<CompletionCoordinator>);

impl Drop for Departure {
    fn drop(&mut self) {
        self.0.leave_on_drop();
    }
}

impl Drop for ExecutionLane {
    fn drop(&mut self) {
        self.shutdown();

        // a lane dropped from one of its own workers can't join itself; the workers exit on their
        // own once the queue drains
        let current = thread::current().id();
        if self.workers.iter().any(|w| w.thread().id() == current) {
            return;
        }

        for worker in self.workers.drain(..) {
            worker.join().ok();
        }
    }
}

impl fmt::Debug for ExecutionLane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionLane")
            .field("label", &self.shared.label)
            .field("mode", &self.shared.mode)
            .field("workers", &self.workers.len())
            .finish()
    }
}
