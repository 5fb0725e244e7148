//! Drives suspendable routines as cancellable promises.
//!
//! A [`Routine`] suspends on values it wants awaited. A [`Coroutine`] runs
//! each routine it creates, converts every suspended value into a
//! [`Promise`], resumes the routine once that promise settles, forwards
//! cancellation of its own promise into the routine, and runs the cleanup
//! thunks the routine registered before settling.

#![no_std]

extern crate alloc;

#[cfg(any(feature = "std", test))]
extern crate std;

mod context;
mod coroutine;
mod defer;
mod error;
mod promise;
mod resolve;
mod routine;
mod spawn;
mod traits;

#[cfg(feature = "std")]
pub use self::context::defer;
pub use self::{
    context::Cx,
    coroutine::{coroutine, spawn, Coroutine},
    defer::{set_unrecoverable_handler, Cleanup, CleanupError},
    error::{Cancelled, Error, OutsideCoroutine, Unrecognized},
    promise::{Promise, Settle, Settled, Status},
    resolve::{add_yield_handler, YieldHandler},
    routine::{from_fn, FromFn, Resumption, Routine, RoutineStep, Step},
    traits::{Awaitable, Receiver},
};
