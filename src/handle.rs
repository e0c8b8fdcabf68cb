//! Explicit completion handles for work spawned onto a lane.
//!
//! A [`TaskHandle`] is the receiving half of a one-shot result cell. The sending half stays
//! inside the lane and is fulfilled when the work finishes, so the result travels back to the
//! orchestrating thread by ownership instead of through captured shared state.
//!
//! [`TaskHandle`]: struct.TaskHandle.html

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use crossbeam_queue::SegQueue;

use crate::util;

struct Completion<R> {
    result: Mutex<Option<thread::Result<R>>>,
    done: AtomicBool,
    waiting: SegQueue<thread::Thread>,
}

impl<R> Completion<R> {
    fn set(&self, result: thread::Result<R>) {
        *util::guts(self.result.lock()) = Some(result);
        self.done.store(true, Ordering::SeqCst);

        while let Some(thread) = self.waiting.pop() {
            thread.unpark();
        }
    }

    fn take(&self) -> Option<thread::Result<R>> {
        util::guts(self.result.lock()).take()
    }
}

/// Creates a linked promise/handle pair.
pub(crate) fn pair<R>() -> (Promise<R>, TaskHandle<R>) {
    let completion = Arc::new(Completion {
        result: Mutex::new(None),
        done: AtomicBool::new(false),
        waiting: SegQueue::new(),
    });

    (
        Promise {
            completion: Some(completion.clone()),
        },
        TaskHandle { completion },
    )
}

/// The sending half held by the lane.
///
/// If it is dropped without being fulfilled (the work was thrown away before it ran), the handle
/// is completed with an error instead of leaving its owner blocked forever.
pub(crate) struct Promise<R> {
    completion: Option<Arc<Completion<R>>>,
}

impl<R> Promise<R> {
    pub(crate) fn fulfil(mut self, result: thread::Result<R>) {
        if let Some(completion) = self.completion.take() {
            completion.set(result);
        }
    }
}

impl<R> Drop for Promise<R> {
    fn drop(&mut self) {
        if let Some(completion) = self.completion.take() {
            completion.set(Err(Box::new("task was dropped before it ran")));
        }
    }
}

/// An owned handle to the result of work started with [`ExecutionLane::spawn`].
///
/// # Example
///
/// ```
/// use dispatchlane::ExecutionLane;
///
/// let lane = ExecutionLane::concurrent("squares").unwrap();
/// let handles: Vec<_> = (1..=4u32)
///     .map(|n| lane.spawn(move || n * n).unwrap())
///     .collect();
///
/// let squares: Vec<u32> = handles.into_iter().map(|h| h.join().unwrap()).collect();
/// assert_eq!(squares, [1, 4, 9, 16]);
/// ```
///
/// [`ExecutionLane::spawn`]: struct.ExecutionLane.html#method.spawn
pub struct TaskHandle<R> {
    completion: Arc<Completion<R>>,
}

impl<R> TaskHandle<R> {
    /// Returns whether the work has finished, successfully or not.
    pub fn is_finished(&self) -> bool {
        self.completion.done.load(Ordering::SeqCst)
    }

    /// Blocks until the work finishes and returns its result.
    ///
    /// # Errors
    ///
    /// If the work panicked, the panic payload is returned in `Err`, the same way
    /// `std::thread::JoinHandle::join` reports a panicked thread.
    pub fn join(self) -> thread::Result<R> {
        loop {
            if let Some(result) = self.completion.take() {
                return result;
            }

            // same ordering as CompletionCoordinator::wait: queue up, then look again
            self.completion.waiting.push(thread::current());

            if self.is_finished() {
                // the queued handle may be left behind; at most it gets one spare unpark
                continue;
            }

            thread::park();
        }
    }
}

impl<R> fmt::Debug for TaskHandle<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("finished", &self.is_finished())
            .finish()
    }
}
