//! The state machine that bridges one routine to one promise.
//!
//! A spawn is `Running` while a step of its routine executes, `Awaiting`
//! while it holds a pending promise the routine suspended on, `Draining`
//! while cleanup thunks run, and `Terminal` once its promise has settled.
//! Exactly one of running, awaiting or terminal holds at a time: the routine
//! lock is only taken for the duration of a step, and `awaited` is only set
//! while no step runs.

use alloc::sync::Arc;
use core::{
    fmt,
    panic::Location,
    sync::atomic::{AtomicBool, Ordering::*},
};

use spin::Mutex;

use crate::{
    context::{Active, Cx},
    defer::{self, DeferQueue},
    error::{Cancelled, Error, Unrecognized},
    promise::{Promise, Settle, Settled},
    resolve::{Resolver, YieldHandler},
    routine::{Routine, RoutineStep, Step},
    traits::Awaitable,
};

type Awaited<R> = Promise<<R as Routine>::Resume, Error<<R as Routine>::Error>>;
type Outcome<R> = Result<<R as Routine>::Output, Error<<R as Routine>::Error>>;
type ResultPromise<R> = Promise<<R as Routine>::Output, Error<<R as Routine>::Error>>;

pub(crate) struct Spawn<R: Routine> {
    // `None` once terminal.
    routine: Mutex<Option<R>>,
    awaited: Mutex<Option<Awaited<R>>>,
    result: Mutex<Option<Settle<R::Output, Error<R::Error>>>>,
    // Set by the first cancellation request, never cleared.
    cancel_requested: AtomicBool,
    // Set once termination or the sentinel has been delivered to the routine.
    cancelling: AtomicBool,
    defers: DeferQueue,
    resolver: Resolver<R::Yield>,
    origin: &'static Location<'static>,
}

impl<R> Spawn<R>
where
    R: Routine + Send + 'static,
    R::Yield: Awaitable<R::Resume, Error<R::Error>> + fmt::Debug + 'static,
    R::Resume: Clone + Send + 'static,
    R::Output: Clone + Send + 'static,
    R::Error: Clone + Send + 'static,
{
    /// Starts `routine` and returns its promise, which may already be settled.
    pub(crate) fn run(
        routine: R,
        yield_handler: Option<YieldHandler<R::Yield>>,
        origin: &'static Location<'static>,
    ) -> ResultPromise<R> {
        let (promise, settle) = Promise::pending();
        let spawn = Arc::new(Spawn {
            routine: Mutex::new(Some(routine)),
            awaited: Mutex::new(None),
            result: Mutex::new(None),
            cancel_requested: AtomicBool::new(false),
            cancelling: AtomicBool::new(false),
            defers: DeferQueue::default(),
            resolver: Resolver::new(yield_handler),
            origin,
        });

        let weak = Arc::downgrade(&spawn);
        settle.on_cancel(move || {
            if let Some(spawn) = weak.upgrade() {
                spawn.result_cancelled();
            }
        });
        *spawn.result.lock() = Some(settle);

        if let Some(step) = spawn.enter(|routine, cx| routine.start(cx)) {
            spawn.advance(step);
        }
        promise
    }

    /// Runs one step of the routine, or nothing if it is already terminal.
    fn enter<F>(&self, f: F) -> Option<RoutineStep<R>>
    where
        F: FnOnce(&mut R, &mut Cx<'_>) -> RoutineStep<R>,
    {
        let mut routine = self.routine.lock();
        let routine = routine.as_mut()?;
        let _active = Active::enter(&self.defers);
        Some(f(routine, &mut Cx::new(&self.defers)))
    }

    /// Classifies steps until the routine waits on a pending promise or
    /// reaches a terminal step.
    fn advance(self: &Arc<Self>, mut step: RoutineStep<R>) {
        loop {
            let yielded = match step {
                Step::Suspended(value) => value,
                Step::Completed(value) => return self.finish(Ok(value)),
                Step::Failed(error) => return self.finish(Err(error)),
            };
            let promise = match self.promise_for(yielded) {
                Ok(promise) => promise,
                Err(error) => return self.finish(Err(error)),
            };
            let next = match promise.settled() {
                Some(settled) => self.deliver(settled),
                None => return self.wait_on(promise),
            };
            match next {
                Some(next) => step = next,
                None => return,
            }
        }
    }

    fn promise_for(&self, value: R::Yield) -> Result<Awaited<R>, Error<R::Error>> {
        match value.into_promise() {
            Ok(promise) => Ok(promise),
            Err(value) => self
                .resolver
                .resolve(&value)
                .ok_or_else(|| Unrecognized::new(&value, self.origin).into()),
        }
    }

    /// Resumes the routine with a value that was already settled when the
    /// routine yielded it.
    ///
    /// A cancellation requested while that step ran takes precedence over a
    /// fulfilled value.
    fn deliver(&self, settled: Settled<R::Resume, Error<R::Error>>) -> Option<RoutineStep<R>> {
        match settled {
            // Cleanup awaits made after cancellation was delivered still get
            // their values.
            Settled::Fulfilled(value)
                if !self.cancel_requested.load(Acquire) || self.cancelling.load(Acquire) =>
            {
                self.resume(value)
            }
            Settled::Fulfilled(_) => self.terminate(),
            settled => self.deliver_awaited(settled),
        }
    }

    /// Resumes the routine once a promise it waited on settled.
    ///
    /// A fulfilled value always resumes the routine normally; only rejection
    /// and cancellation observe a pending cancellation request.
    fn deliver_awaited(
        &self,
        settled: Settled<R::Resume, Error<R::Error>>,
    ) -> Option<RoutineStep<R>> {
        match settled {
            Settled::Fulfilled(value) => self.resume(value),
            Settled::Rejected(error) if !self.cancel_requested.load(Acquire) => {
                self.enter(|routine, cx| routine.raise(cx, error))
            }
            _ => self.terminate(),
        }
    }

    fn resume(&self, value: R::Resume) -> Option<RoutineStep<R>> {
        self.enter(|routine, cx| routine.resume(cx, value))
    }

    /// Terminates the routine, falling back to raising the sentinel.
    ///
    /// The routine may suspend again to await its own cleanup.
    fn terminate(&self) -> Option<RoutineStep<R>> {
        self.cancel_requested.store(true, Release);
        self.cancelling.store(true, Release);
        self.enter(|routine, cx| match routine.terminate(cx) {
            Some(step) => step,
            None => routine.raise(cx, Error::Cancelled(Cancelled::SENTINEL)),
        })
    }

    fn wait_on(self: &Arc<Self>, promise: Awaited<R>) {
        *self.awaited.lock() = Some(promise.clone());
        let spawn = self.clone();
        promise.on_settle(move |settled| spawn.awaited_settled(settled));

        // Cancellation requested while the step ran.
        if self.cancel_requested.load(Acquire) && !self.cancelling.load(Acquire) {
            self.cancel_awaited();
        }
    }

    fn awaited_settled(self: &Arc<Self>, settled: Settled<R::Resume, Error<R::Error>>) {
        self.awaited.lock().take();
        if let Some(step) = self.deliver_awaited(settled) {
            self.advance(step);
        }
    }

    fn result_cancelled(&self) {
        if self.cancel_requested.swap(true, AcqRel) {
            return;
        }
        if !self.cancelling.load(Acquire) {
            self.cancel_awaited();
        }
    }

    // The awaited promise's own continuation drives the routine from here.
    fn cancel_awaited(&self) {
        let awaited = self.awaited.lock().clone();
        if let Some(awaited) = awaited {
            awaited.cancel();
        }
    }

    fn finish(self: &Arc<Self>, outcome: Outcome<R>) {
        let routine = self.routine.lock().take();
        drop(routine);
        self.awaited.lock().take();

        let spawn = self.clone();
        defer::drain(self.defers.take(), move || spawn.settle(outcome));
    }

    fn settle(&self, outcome: Outcome<R>) {
        let Some(result) = self.result.lock().take() else {
            return;
        };
        match outcome {
            _ if self.cancel_requested.load(Acquire) => result.cancel(),
            // A sentinel caught in another coroutine and rethrown here.
            Err(Error::Cancelled(_)) => result.cancel(),
            Ok(value) => result.fulfill(value),
            Err(error) => result.reject(error),
        }
    }
}
