//! Support module for `CompletionCoordinator` and its guard.
//!
//! See the documentation of the [`CompletionCoordinator`] struct for more information.
//!
//! [`CompletionCoordinator`]: struct.CompletionCoordinator.html

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use crossbeam_queue::SegQueue;
use tracing::{error, trace};

use crate::error::CompletionError;

/// A counting synchronization primitive that lets a thread wait for any number of independently
/// completing tasks.
///
/// The orchestrating thread calls [`enter`] once per task *before* dispatching it, each task
/// calls [`leave`] once when it is done, and any thread may call [`wait`] to block until every
/// entered task has left. Entering from inside the task instead would let `wait` observe an empty
/// count before the task had registered itself.
///
/// Unlike a countdown latch, a `CompletionCoordinator` starts at zero and is reusable: once the
/// count drains, a new round of `enter`/`leave` can begin and `wait` can be called again. Calling
/// `leave` more times than `enter` is a programming error and panics immediately; the counter
/// never goes below zero.
///
/// There is no timeout. A task that never calls `leave` keeps every waiter blocked forever.
///
/// [`enter`]: #method.enter
/// [`leave`]: #method.leave
/// [`wait`]: #method.wait
///
/// # Example
///
/// Two tasks of different lengths run on a concurrent lane. The coordinator is entered for each
/// before it is dispatched, and `wait` returns once the slower task has left.
///
/// ```
/// use dispatchlane::{CompletionCoordinator, ExecutionLane};
/// use std::sync::{Arc, Mutex};
/// use std::thread;
/// use std::time::Duration;
///
/// let lane = ExecutionLane::concurrent("timers").unwrap();
/// let group = Arc::new(CompletionCoordinator::new());
/// let done = Arc::new(Mutex::new(Vec::new()));
///
/// for (label, delay) in [("short", 20), ("long", 120)] {
///     group.enter();
///     let group = group.clone();
///     let done = done.clone();
///     lane.submit(move || {
///         thread::sleep(Duration::from_millis(delay));
///         done.lock().unwrap().push(label);
///         group.leave();
///     }).unwrap();
/// }
///
/// group.wait();
/// assert_eq!(*done.lock().unwrap(), ["short", "long"]);
/// ```
pub struct CompletionCoordinator {
    // low 32 bits: outstanding count; high 32 bits: how many times the count has drained. Both
    // halves change in the same CAS, so no waiter can see a drained count with a stale round.
    state: AtomicU64,
    waiting: SegQueue<thread::Thread>,
}

const COUNT_MASK: u64 = u32::MAX as u64;
const ONE_ROUND: u64 = 1 << 32;

fn count_of(state: u64) -> usize {
    (state & COUNT_MASK) as usize
}

fn round_of(state: u64) -> u64 {
    state >> 32
}

impl CompletionCoordinator {
    /// Creates a new `CompletionCoordinator` with nothing outstanding.
    pub fn new() -> CompletionCoordinator {
        CompletionCoordinator {
            state: AtomicU64::new(0),
            waiting: SegQueue::new(),
        }
    }

    /// Returns the number of entered tasks that have not yet left.
    pub fn outstanding(&self) -> usize {
        count_of(self.state.load(Ordering::SeqCst))
    }

    /// Registers one more outstanding task.
    ///
    /// # Panics
    ///
    /// Panics if the counter would overflow. See [`try_enter`] for a non-panicking version.
    ///
    /// [`try_enter`]: #method.try_enter
    #[track_caller]
    pub fn enter(&self) {
        if let Err(err) = self.try_enter() {
            panic!("{}", err);
        }
    }

    /// Registers one more outstanding task.
    ///
    /// # Errors
    ///
    /// If more than `u32::MAX` tasks would be outstanding at once, this function returns
    /// `CompletionError::Saturated` and leaves the counter untouched.
    pub fn try_enter(&self) -> Result<(), CompletionError> {
        let mut current = self.state.load(Ordering::SeqCst);

        loop {
            if current & COUNT_MASK == COUNT_MASK {
                return Err(CompletionError::Saturated);
            }

            match self.state.compare_exchange(
                current,
                current + 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return Ok(()),
                Err(last_state) => current = last_state,
            }
        }
    }

    /// Marks one outstanding task as finished, and returns whether this released the waiting
    /// threads.
    ///
    /// # Panics
    ///
    /// Panics if nothing is outstanding. An unmatched `leave` means the caller has lost track of
    /// its tasks, so the coordinator refuses to continue rather than let a later `wait` return
    /// early. See [`try_leave`] to receive the error instead.
    ///
    /// [`try_leave`]: #method.try_leave
    #[track_caller]
    pub fn leave(&self) -> bool {
        match self.try_leave() {
            Ok(released) => released,
            Err(err) => {
                error!(%err, "unbalanced leave on completion coordinator");
                panic!("{}", err);
            }
        }
    }

    /// Marks one outstanding task as finished, and returns whether this released the waiting
    /// threads.
    ///
    /// # Errors
    ///
    /// If nothing is outstanding, this function returns `CompletionError::Imbalanced` and leaves
    /// the counter at zero.
    pub fn try_leave(&self) -> Result<bool, CompletionError> {
        let mut current = self.state.load(Ordering::SeqCst);

        let drained = loop {
            let count = count_of(current);
            if count == 0 {
                return Err(CompletionError::Imbalanced);
            }

            // the last leave of a round starts the next round in the same step
            let next = if count == 1 {
                (current - 1).wrapping_add(ONE_ROUND)
            } else {
                current - 1
            };

            match self.state.compare_exchange(current, next, Ordering::SeqCst, Ordering::SeqCst) {
                Ok(_) => break count == 1,
                Err(last_state) => current = last_state,
            }
        };

        if drained {
            trace!(round = round_of(current), "completion coordinator drained");
            while let Some(thread) = self.waiting.pop() {
                thread.unpark();
            }
        }

        Ok(drained)
    }

    // Leave on behalf of a guard being dropped. An imbalance found here still has to reach the
    // caller, but a second panic while already unwinding would abort the process.
    #[track_caller]
    pub(crate) fn leave_on_drop(&self) {
        if let Err(err) = self.try_leave() {
            error!(%err, "unbalanced leave on completion coordinator");
            if !thread::panicking() {
                panic!("{}", err);
            }
        }
    }

    /// Enters the coordinator, then returns a guard that leaves it upon drop.
    ///
    /// # Panics
    ///
    /// Panics under the same conditions as [`enter`].
    ///
    /// [`enter`]: #method.enter
    ///
    /// # Example
    ///
    /// ```
    /// use dispatchlane::CompletionCoordinator;
    /// use std::thread;
    ///
    /// let group = CompletionCoordinator::new();
    ///
    /// thread::scope(|s| {
    ///     for _ in 0..4 {
    ///         let guard = group.guard();
    ///         s.spawn(move || {
    ///             let _guard = guard;
    ///             // do some work
    ///         });
    ///     }
    ///     group.wait();
    /// });
    ///
    /// assert_eq!(group.outstanding(), 0);
    /// ```
    #[track_caller]
    pub fn guard(&self) -> CompletionGuard<'_> {
        self.enter();
        CompletionGuard { coordinator: self }
    }

    /// Blocks the current thread until nothing is outstanding.
    ///
    /// Returns immediately if nothing is outstanding. Every thread blocked here is released by the
    /// same transition to zero.
    pub fn wait(&self) {
        let round = round_of(self.state.load(Ordering::SeqCst));

        loop {
            if self.drained_since(round) {
                return;
            }

            // push before the second check: a `leave` that drains between the check above and
            // this push would otherwise find an empty queue and never wake us
            self.waiting.push(thread::current());

            if self.drained_since(round) {
                // our handle stays queued; the next drain unparks it for nothing, and any park
                // after that returns straight into a loop that checks again
                return;
            }

            thread::park();
        }
    }

    fn drained_since(&self, round: u64) -> bool {
        let state = self.state.load(Ordering::SeqCst);
        count_of(state) == 0 || round_of(state) != round
    }
}

impl Default for CompletionCoordinator {
    fn default() -> Self {
        CompletionCoordinator::new()
    }
}

impl fmt::Debug for CompletionCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionCoordinator")
            .field("outstanding", &self.outstanding())
            .finish_non_exhaustive()
    }
}

/// A guard that leaves its parent `CompletionCoordinator` on drop.
///
/// See [`CompletionCoordinator::guard`] for more information about this struct.
///
/// [`CompletionCoordinator::guard`]: struct.CompletionCoordinator.html#method.guard
#[derive(Debug)]
pub struct CompletionGuard<'a> {
    coordinator: &'a CompletionCoordinator,
}

/// Upon drop, this guard leaves its parent `CompletionCoordinator`. If that finds nothing
/// outstanding (some other caller left without entering and took this guard's slot), the drop
/// panics, unless the thread is already panicking, in which case the imbalance is only logged.
impl Drop for CompletionGuard<'_> {
    fn drop(&mut self) {
        self.coordinator.leave_on_drop();
    }
}
