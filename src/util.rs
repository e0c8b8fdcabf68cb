//! Small helpers shared by the lane, the handles, and the store.

use std::any::Any;
use std::sync::LockResult;

// Take the guard out of a LockResult whether or not the lock is poisoned.
//
// Work items run under catch_unwind, so a poisoned lock here means a panic escaped between two
// lines of our own bookkeeping. The state behind every lock in this crate is still consistent at
// that point, so we keep going instead of spreading the panic to every other thread.
pub(crate) fn guts<T>(res: LockResult<T>) -> T {
    match res {
        Ok(guard) => guard,
        Err(poison) => poison.into_inner(),
    }
}

// Render a panic payload for a log line. `panic!` with a literal gives a `&str`, with format
// arguments a `String`; anything else is opaque.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.as_str()
    } else {
        "<non-string panic payload>"
    }
}
