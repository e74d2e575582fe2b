use std::error::Error;
use std::fmt::{Display, Formatter};

use crossbeam::select;

use vow_context::{Context, ContextError};

use crate::promise::{Outcome, Promise};

/// Error returned by [`wait`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitError<E> {
    /// The caller's context was canceled before the promise settled. The
    /// work unit may still be running; its eventual outcome is simply never
    /// observed by this caller.
    Canceled(ContextError),
    /// The work unit failed; carries its error verbatim.
    Failed(E),
    /// The completion signal fired while the promise was still pending.
    /// Unreachable unless the work thread unwound without settling; kept as
    /// a defensive check on the construction contract rather than treated
    /// as success.
    InvalidState,
}

impl<E: Display> Display for WaitError<E> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            WaitError::Canceled(cause) => write!(f, "{}", cause),
            WaitError::Failed(err) => write!(f, "{}", err),
            WaitError::InvalidState => write!(f, "invalid promise state"),
        }
    }
}

impl<E: Error + 'static> Error for WaitError<E> {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            WaitError::Canceled(cause) => Some(cause),
            WaitError::Failed(err) => Some(err),
            WaitError::InvalidState => None,
        }
    }
}

/// Blocks until `promise` settles or `ctx` is canceled, whichever fires
/// first, and returns the corresponding outcome.
///
/// Waiting never affects the promise. Any number of callers may wait on the
/// same handle concurrently, each under its own context; canceling one
/// caller's context neither disturbs the others nor stops the work unit.
///
/// If the completion and cancellation signals become ready at the same
/// moment the winner is unspecified; callers must not rely on a tie-break.
/// A pre-resolved promise carries no signal and returns immediately, even
/// under an already-canceled context.
pub fn wait<T, E>(ctx: &Context, promise: &Promise<T, E>) -> Result<T, WaitError<E>>
where
    T: Clone,
    E: Clone,
{
    if let Some(done) = promise.done() {
        select! {
            recv(done) -> _ => {}
            recv(ctx.done()) -> _ => {
                let cause = ctx.error().unwrap_or(ContextError::Canceled);
                return Err(WaitError::Canceled(cause));
            }
        }
    }
    match promise.snapshot() {
        Outcome::Fulfilled(value) => Ok(value),
        Outcome::Rejected(err) => Err(WaitError::Failed(err)),
        Outcome::Pending => Err(WaitError::InvalidState),
    }
}
