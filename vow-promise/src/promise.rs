use std::fmt::{Display, Formatter};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;

use crossbeam::channel::{self, Receiver, Sender};
use log::{debug, trace};
use parking_lot::Mutex;

use vow_context::Context;

/// Observable lifecycle state of a [`Promise`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// The work unit has not settled the promise yet.
    Pending,
    /// The work unit returned a value.
    Fulfilled,
    /// The work unit returned an error, or panicked with one.
    Rejected,
}

impl Display for State {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            State::Pending => write!(f, "pending"),
            State::Fulfilled => write!(f, "fulfilled"),
            State::Rejected => write!(f, "rejected"),
        }
    }
}

#[derive(Clone)]
pub(crate) enum Outcome<T, E> {
    Pending,
    Fulfilled(T),
    Rejected(E),
}

impl<T, E> Outcome<T, E> {
    fn state(&self) -> State {
        match self {
            Outcome::Pending => State::Pending,
            Outcome::Fulfilled(_) => State::Fulfilled,
            Outcome::Rejected(_) => State::Rejected,
        }
    }
}

struct Inner<T, E> {
    outcome: Mutex<Outcome<T, E>>,
    // Closed by the work thread once the outcome is written. None for
    // pre-resolved promises, which no one ever needs to wait on.
    done: Option<Receiver<()>>,
}

/// A single-assignment container for the eventual outcome of one concurrently
/// executed unit of work.
///
/// The handle is cheap to clone; clones observe the same outcome. Blocking on
/// it is the job of [`wait`](crate::wait).
pub struct Promise<T, E> {
    inner: Arc<Inner<T, E>>,
}

impl<T, E> Clone for Promise<T, E> {
    fn clone(&self) -> Self {
        Promise {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T, E> Promise<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    /// Launches `f` on its own thread and immediately returns a pending
    /// handle to its eventual outcome. The context is passed through to `f`
    /// unchanged.
    ///
    /// `Ok` fulfills the promise and `Err` rejects it. A panic whose payload
    /// is an `E` also rejects it, exactly as if the error had been returned;
    /// a panic with any other payload is considered a programming error and
    /// is re-raised on the work thread, unabsorbed.
    ///
    /// The context is advisory only: nothing here stops `f`. If `f` ignores
    /// cancellation, its thread keeps running until `f` returns, even after
    /// every waiter has given up. Work units that may outlive their callers
    /// should watch [`Context::done`] and return promptly.
    pub fn new<F>(ctx: &Context, f: F) -> Promise<T, E>
    where
        F: FnOnce(&Context) -> Result<T, E> + Send + 'static,
    {
        let (tx, rx) = channel::bounded(0);
        let inner = Arc::new(Inner {
            outcome: Mutex::new(Outcome::Pending),
            done: Some(rx),
        });
        let shared = Arc::clone(&inner);
        let ctx = ctx.clone();
        thread::Builder::new()
            .name("promise-worker".to_string())
            .spawn(move || run(shared, tx, ctx, f))
            .unwrap();
        Promise { inner }
    }
}

impl<T, E> Promise<T, E> {
    /// A promise already fulfilled with `value`. No signal is allocated;
    /// waiting on it returns immediately under any context.
    pub fn resolved(value: T) -> Promise<T, E> {
        Promise {
            inner: Arc::new(Inner {
                outcome: Mutex::new(Outcome::Fulfilled(value)),
                done: None,
            }),
        }
    }

    /// A promise already rejected with `err`. No signal is allocated.
    pub fn rejected(err: E) -> Promise<T, E> {
        Promise {
            inner: Arc::new(Inner {
                outcome: Mutex::new(Outcome::Rejected(err)),
                done: None,
            }),
        }
    }

    /// Current lifecycle state. Monotonic: once this returns something other
    /// than [`State::Pending`] it never changes again.
    pub fn state(&self) -> State {
        self.inner.outcome.lock().state()
    }

    pub fn is_settled(&self) -> bool {
        self.state() != State::Pending
    }

    pub(crate) fn done(&self) -> Option<&Receiver<()>> {
        self.inner.done.as_ref()
    }
}

impl<T: Clone, E: Clone> Promise<T, E> {
    /// Non-blocking snapshot of the terminal outcome; `None` while pending.
    pub fn try_result(&self) -> Option<Result<T, E>> {
        match self.snapshot() {
            Outcome::Pending => None,
            Outcome::Fulfilled(value) => Some(Ok(value)),
            Outcome::Rejected(err) => Some(Err(err)),
        }
    }

    pub(crate) fn snapshot(&self) -> Outcome<T, E> {
        self.inner.outcome.lock().clone()
    }
}

#[cfg(test)]
impl<T, E> Promise<T, E> {
    // A pending promise with no work thread behind it. Dropping the sender
    // without settling reproduces a work thread that unwound.
    pub(crate) fn pending_with_signal() -> (Promise<T, E>, Sender<()>) {
        let (tx, rx) = channel::bounded(0);
        let promise = Promise {
            inner: Arc::new(Inner {
                outcome: Mutex::new(Outcome::Pending),
                done: Some(rx),
            }),
        };
        (promise, tx)
    }
}

// Runs the work unit and settles the promise. The signal sender is owned
// here so that every exit path closes the done channel, including the
// unwinding re-raise of a non-error panic payload; in that one case the
// channel closes with the outcome still pending.
fn run<T, E, F>(inner: Arc<Inner<T, E>>, signal: Sender<()>, ctx: Context, f: F)
where
    E: 'static,
    F: FnOnce(&Context) -> Result<T, E>,
{
    let _signal = signal;
    let settled = match panic::catch_unwind(AssertUnwindSafe(|| f(&ctx))) {
        Ok(Ok(value)) => Outcome::Fulfilled(value),
        Ok(Err(err)) => Outcome::Rejected(err),
        Err(payload) => match payload.downcast::<E>() {
            Ok(err) => {
                debug!("work unit panicked with an error payload; rejecting");
                Outcome::Rejected(*err)
            }
            Err(payload) => panic::resume_unwind(payload),
        },
    };
    trace!("promise settled: {}", settled.state());
    // The outcome must be fully written before _signal drops and closes the
    // done channel.
    *inner.outcome.lock() = settled;
}

#[cfg(test)]
mod test {
    use std::error::Error;
    use std::fmt::{Display, Formatter};
    use std::panic::{catch_unwind, panic_any, AssertUnwindSafe};
    use std::sync::Arc;
    use std::time::Duration;

    use crossbeam::channel::{self, RecvError};
    use parking_lot::Mutex;

    use vow_context::Context;

    use super::{run, Inner, Outcome, Promise, State};

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct TestError(&'static str);

    impl Display for TestError {
        fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
            write!(f, "{}", self.0)
        }
    }

    impl Error for TestError {}

    #[test]
    fn fulfilled_immediately() {
        let ctx = Context::background();
        let p: Promise<i32, TestError> = Promise::new(&ctx, |_| Ok(1));

        // The done channel closes once the outcome is written.
        assert_eq!(Err(RecvError), p.done().unwrap().recv());
        assert_eq!(State::Fulfilled, p.state());
        assert_eq!(Some(Ok(1)), p.try_result());
    }

    #[test]
    fn rejected_immediately() {
        let ctx = Context::background();
        let p: Promise<i32, TestError> = Promise::new(&ctx, |_| Err(TestError("some error")));

        assert_eq!(Err(RecvError), p.done().unwrap().recv());
        assert_eq!(State::Rejected, p.state());
        assert_eq!(Some(Err(TestError("some error"))), p.try_result());
    }

    #[test]
    fn fulfilled_after_delay() {
        let ctx = Context::background();
        let p: Promise<i32, TestError> = Promise::new(&ctx, |_| {
            std::thread::sleep(Duration::from_millis(100));
            Ok(1)
        });

        assert_eq!(State::Pending, p.state());
        assert_eq!(None, p.try_result());

        assert_eq!(Err(RecvError), p.done().unwrap().recv());
        assert_eq!(State::Fulfilled, p.state());
        assert_eq!(Some(Ok(1)), p.try_result());
    }

    #[test]
    fn panic_with_error_payload_rejects() {
        let ctx = Context::background();
        let p: Promise<i32, TestError> =
            Promise::new(&ctx, |_| panic_any(TestError("some error")));

        assert_eq!(Err(RecvError), p.done().unwrap().recv());
        assert_eq!(State::Rejected, p.state());
        assert_eq!(Some(Err(TestError("some error"))), p.try_result());
    }

    #[test]
    fn panic_with_other_payload_propagates() {
        let (tx, rx) = channel::bounded(0);
        let inner = Arc::new(Inner::<i32, TestError> {
            outcome: Mutex::new(Outcome::Pending),
            done: Some(rx.clone()),
        });

        let res = catch_unwind(AssertUnwindSafe(|| {
            run(Arc::clone(&inner), tx, Context::background(), |_| {
                panic!("some panic")
            })
        }));

        // The panic is re-raised, not absorbed, and the payload is intact.
        let payload = res.unwrap_err();
        assert_eq!(Some(&"some panic"), payload.downcast_ref::<&str>());

        // The signal still closed, with the outcome left pending.
        assert_eq!(Err(RecvError), rx.recv());
        assert_eq!(State::Pending, inner.outcome.lock().state());
    }

    #[test]
    fn resolved_needs_no_signal() {
        let p: Promise<i32, TestError> = Promise::resolved(1);
        assert!(p.done().is_none());
        assert_eq!(State::Fulfilled, p.state());
        assert!(p.is_settled());
        assert_eq!(Some(Ok(1)), p.try_result());
    }

    #[test]
    fn rejected_needs_no_signal() {
        let p: Promise<i32, TestError> = Promise::rejected(TestError("some error"));
        assert!(p.done().is_none());
        assert_eq!(State::Rejected, p.state());
        assert!(p.is_settled());
        assert_eq!(Some(Err(TestError("some error"))), p.try_result());
    }

    #[test]
    fn clones_observe_the_same_outcome() {
        let ctx = Context::background();
        let p: Promise<i32, TestError> = Promise::new(&ctx, |_| Ok(7));
        let q = p.clone();

        assert_eq!(Err(RecvError), p.done().unwrap().recv());
        assert_eq!(Some(Ok(7)), p.try_result());
        assert_eq!(Some(Ok(7)), q.try_result());
    }

    #[test]
    fn state_display() {
        assert_eq!("pending", State::Pending.to_string());
        assert_eq!("fulfilled", State::Fulfilled.to_string());
        assert_eq!("rejected", State::Rejected.to_string());
    }
}
