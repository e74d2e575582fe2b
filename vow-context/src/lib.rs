//! Cooperative cancellation contexts.
//!
//! A [`Context`] carries a broadcast "done" signal and the reason it fired.
//! The signal is a crossbeam channel that never carries a message; it is
//! closed exactly once when the context is canceled, so any number of
//! threads can watch it concurrently (directly with `recv`, or raced against
//! other channels with `select!`) without consuming it.
//!
//! Cancellation here is advisory. A context cannot stop anything by itself;
//! code that accepts one is expected to check [`Context::done`] at suitable
//! points and bail out promptly.

use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, Sender};
use log::trace;
use parking_lot::{Condvar, Mutex};

/// Reason a [`Context`]'s done signal fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextError {
    Canceled,
    DeadlineExceeded,
}

impl Display for ContextError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ContextError::Canceled => write!(f, "context canceled"),
            ContextError::DeadlineExceeded => write!(f, "context deadline exceeded"),
        }
    }
}

impl Error for ContextError {}

struct Shared {
    // Dropping the sender closes the done channel. None once canceled.
    gate: Option<Sender<()>>,
    cause: Option<ContextError>,
}

struct Inner {
    done: Receiver<()>,
    shared: Mutex<Shared>,
    // Wakes a deadline watcher early when the context is canceled by hand.
    canceled: Condvar,
}

impl Inner {
    fn cancel(&self, cause: ContextError) {
        let mut shared = self.shared.lock();
        Inner::close(&mut shared, cause);
        self.canceled.notify_all();
    }

    // The cause must be settled before the gate drops; observers of the
    // closed channel read it through the same mutex.
    fn close(shared: &mut Shared, cause: ContextError) {
        if shared.gate.is_some() {
            trace!("context done: {}", cause);
            shared.cause = Some(cause);
            shared.gate = None;
        }
    }
}

/// A cancellation-aware context: a shareable handle over one done signal.
///
/// Clones share the same signal. Watch [`done`](Context::done) to learn the
/// context was canceled and [`error`](Context::error) to learn why.
#[derive(Clone)]
pub struct Context {
    inner: Arc<Inner>,
}

impl Context {
    fn new() -> Context {
        let (tx, rx) = channel::bounded(0);
        Context {
            inner: Arc::new(Inner {
                done: rx,
                shared: Mutex::new(Shared {
                    gate: Some(tx),
                    cause: None,
                }),
                canceled: Condvar::new(),
            }),
        }
    }

    /// A context that is never canceled. Its done channel never closes.
    pub fn background() -> Context {
        Context::new()
    }

    /// A context canceled by calling [`Canceler::cancel`] on the returned
    /// handle.
    pub fn with_cancel() -> (Context, Canceler) {
        let ctx = Context::new();
        let canceler = Canceler {
            inner: Arc::clone(&ctx.inner),
        };
        (ctx, canceler)
    }

    /// A context canceled automatically with [`ContextError::DeadlineExceeded`]
    /// once `deadline` passes. The returned [`Canceler`] may still cancel it
    /// sooner, in which case the cause is [`ContextError::Canceled`].
    pub fn with_deadline(deadline: Instant) -> (Context, Canceler) {
        let (ctx, canceler) = Context::with_cancel();
        let inner = Arc::clone(&ctx.inner);
        thread::Builder::new()
            .name("context-deadline".to_string())
            .spawn(move || watch_deadline(inner, deadline))
            .unwrap();
        (ctx, canceler)
    }

    /// Shorthand for [`with_deadline`](Context::with_deadline) at
    /// `Instant::now() + timeout`.
    pub fn with_timeout(timeout: Duration) -> (Context, Canceler) {
        Context::with_deadline(Instant::now() + timeout)
    }

    /// The done channel. It carries no messages; it is closed when the
    /// context is canceled and stays closed, so every receive operation on it
    /// becomes immediately ready from that point on.
    pub fn done(&self) -> &Receiver<()> {
        &self.inner.done
    }

    pub fn is_done(&self) -> bool {
        self.inner.shared.lock().gate.is_none()
    }

    /// Why the done channel closed; `None` while the context is live.
    pub fn error(&self) -> Option<ContextError> {
        self.inner.shared.lock().cause
    }
}

/// Owner-side handle that fires a [`Context`]'s done signal.
pub struct Canceler {
    inner: Arc<Inner>,
}

impl Canceler {
    /// Cancel the context. Idempotent; the first cause to land wins.
    pub fn cancel(&self) {
        self.inner.cancel(ContextError::Canceled);
    }
}

fn watch_deadline(inner: Arc<Inner>, deadline: Instant) {
    let mut shared = inner.shared.lock();
    while shared.gate.is_some() {
        if inner.canceled.wait_until(&mut shared, deadline).timed_out() {
            break;
        }
    }
    Inner::close(&mut shared, ContextError::DeadlineExceeded);
}
