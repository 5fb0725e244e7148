use alloc::{boxed::Box, sync::Arc, vec::Vec};
use core::fmt;

use spin::Mutex;

use crate::promise::{Promise, Settled};

pub type CleanupError = Arc<dyn fmt::Debug + Send + Sync>;

/// The asynchronous completion of a cleanup thunk.
pub type Cleanup = Promise<(), CleanupError>;

type Thunk = Box<dyn FnOnce() -> Cleanup + Send>;

impl<E> From<Result<(), E>> for Cleanup
where
    E: fmt::Debug + Send + Sync + 'static,
{
    fn from(result: Result<(), E>) -> Self {
        match result {
            Ok(()) => Promise::resolved(()),
            Err(error) => Promise::rejected(Arc::new(error)),
        }
    }
}

/// Cleanup thunks collected while a routine runs.
#[derive(Clone, Default)]
pub(crate) struct DeferQueue(Arc<Mutex<Vec<Thunk>>>);

impl DeferQueue {
    pub(crate) fn push<F, C>(&self, thunk: F)
    where
        F: FnOnce() -> C + Send + 'static,
        C: Into<Cleanup>,
    {
        self.0.lock().push(Box::new(move || thunk().into()));
    }

    pub(crate) fn take(&self) -> Vec<Thunk> {
        core::mem::take(&mut *self.0.lock())
    }
}

/// Runs `thunks` last to first, each one after the previous cleanup settled,
/// then calls `done`.
///
/// A failing thunk is reported to the unrecoverable-error handler and the
/// chain moves on. With no thunks, `done` runs before this returns.
pub(crate) fn drain<F>(thunks: Vec<Thunk>, done: F)
where
    F: FnOnce() + Send + 'static,
{
    if thunks.is_empty() {
        return done();
    }
    chain(thunks, Box::new(done))
}

fn chain(mut rest: Vec<Thunk>, done: Box<dyn FnOnce() + Send>) {
    while let Some(thunk) = rest.pop() {
        let cleanup = run(thunk);
        match cleanup.settled() {
            Some(settled) => report(settled),
            None => {
                cleanup.on_settle(move |settled| {
                    report(settled);
                    chain(rest, done)
                });
                return;
            }
        }
    }
    done()
}

/// Calls `thunk`, turning a panic into a rejected cleanup under `std`.
///
/// Without `std` a panicking thunk unwinds into whoever settled the promise
/// the chain was waiting on; thunks should report failure through their
/// [`Cleanup`] instead.
#[cfg(feature = "std")]
fn run(thunk: Thunk) -> Cleanup {
    use std::{
        panic::{catch_unwind, AssertUnwindSafe},
        string::String,
    };

    #[derive(Debug)]
    #[allow(dead_code)]
    struct Panicked(String);

    catch_unwind(AssertUnwindSafe(thunk)).unwrap_or_else(|payload| {
        let message = match payload.downcast::<String>() {
            Ok(message) => *message,
            Err(payload) => match payload.downcast_ref::<&str>() {
                Some(message) => String::from(*message),
                None => String::from("<non-string panic payload>"),
            },
        };
        let error: CleanupError = Arc::new(Panicked(message));
        Promise::rejected(error)
    })
}

#[cfg(not(feature = "std"))]
fn run(thunk: Thunk) -> Cleanup {
    thunk()
}

fn report(settled: Settled<(), CleanupError>) {
    if let Settled::Rejected(error) = settled {
        report_unrecoverable(&*error);
    }
}

type Handler = fn(&dyn fmt::Debug);

static UNRECOVERABLE: Mutex<Handler> = Mutex::new(default_handler as Handler);

fn default_handler(error: &dyn fmt::Debug) {
    #[cfg(feature = "std")]
    std::eprintln!("unrecoverable error in coroutine cleanup: {error:?}");
    #[cfg(not(feature = "std"))]
    let _ = error;
}

/// Replaces the process-wide sink for cleanup failures.
pub fn set_unrecoverable_handler(handler: fn(&dyn fmt::Debug)) {
    *UNRECOVERABLE.lock() = handler;
}

pub(crate) fn report_unrecoverable(error: &dyn fmt::Debug) {
    let handler = *UNRECOVERABLE.lock();
    handler(error)
}
