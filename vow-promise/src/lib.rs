//! A cancellable single-value promise for threads.
//!
//! [`Promise::new`] runs one unit of work on its own thread and hands back a
//! shareable handle to its eventual outcome; [`wait`] blocks a caller on that
//! outcome, racing it against the caller's own [`context::Context`]
//! cancellation. Cancellation is cooperative throughout: abandoning a wait
//! never stops the work unit, which keeps running until it returns unless it
//! watches its context itself.

mod promise;
mod wait;

pub use promise::{Promise, State};
pub use wait::{wait, WaitError};

pub use vow_context as context;
