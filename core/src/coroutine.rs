use alloc::sync::Arc;
use core::{fmt, panic::Location};

use crate::{
    error::Error,
    promise::Promise,
    resolve::YieldHandler,
    routine::Routine,
    spawn::Spawn,
    traits::Awaitable,
};

/// A routine factory whose every call runs a fresh routine as a promise.
///
/// Created with [`coroutine`].
pub struct Coroutine<F, Y> {
    factory: F,
    yield_handler: Option<YieldHandler<Y>>,
    origin: &'static Location<'static>,
}

impl<F, Y> fmt::Debug for Coroutine<F, Y> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Coroutine")
            .field("origin", &self.origin)
            .field("yield_handler", &self.yield_handler.is_some())
            .finish_non_exhaustive()
    }
}

/// Wraps a routine factory into a [`Coroutine`].
///
/// The caller's location is recorded and reported when a routine yields
/// something that cannot be awaited.
#[track_caller]
pub fn coroutine<F, A, R>(factory: F) -> Coroutine<F, R::Yield>
where
    F: Fn(A) -> R,
    R: Routine,
{
    Coroutine {
        factory,
        yield_handler: None,
        origin: Location::caller(),
    }
}

impl<F, Y> Coroutine<F, Y> {
    /// Sets a yield handler tried before the process-wide ones, for the
    /// routines of this coroutine only.
    pub fn with_yield_handler<H>(mut self, handler: H) -> Self
    where
        H: Fn(&Y) -> Option<Y> + Send + Sync + 'static,
    {
        self.yield_handler = Some(Arc::new(handler));
        self
    }

    pub fn origin(&self) -> &'static Location<'static> {
        self.origin
    }

    /// Creates a routine from `args` and starts driving it.
    ///
    /// The returned promise may already be settled if the routine finished
    /// without waiting on anything pending.
    pub fn call<A, R>(&self, args: A) -> Promise<R::Output, Error<R::Error>>
    where
        F: Fn(A) -> R,
        R: Routine<Yield = Y> + Send + 'static,
        Y: Awaitable<R::Resume, Error<R::Error>> + fmt::Debug + 'static,
        R::Resume: Clone + Send + 'static,
        R::Output: Clone + Send + 'static,
        R::Error: Clone + Send + 'static,
    {
        let routine = (self.factory)(args);
        Spawn::run(routine, self.yield_handler.clone(), self.origin)
    }
}

/// Drives an already constructed routine.
#[track_caller]
pub fn spawn<R>(routine: R) -> Promise<R::Output, Error<R::Error>>
where
    R: Routine + Send + 'static,
    R::Yield: Awaitable<R::Resume, Error<R::Error>> + fmt::Debug + 'static,
    R::Resume: Clone + Send + 'static,
    R::Output: Clone + Send + 'static,
    R::Error: Clone + Send + 'static,
{
    Spawn::run(routine, None, Location::caller())
}

#[cfg(test)]
mod tests {
    use std::{format, string::String, vec::Vec};

    use spin::Mutex;

    use super::*;
    use crate::{
        context::Cx,
        error::OutsideCoroutine,
        promise::{Settle, Settled, Status},
        routine::{from_fn, Resumption, Step},
    };

    type Fail = &'static str;
    type Awaited = Promise<i32, Error<Fail>>;
    type TestStep = Step<Yielded, i32, Error<Fail>>;
    type Input = Resumption<i32, Fail>;
    type Log = Arc<Mutex<Vec<&'static str>>>;

    #[derive(Debug)]
    enum Yielded {
        Wait(Awaited),
        Plain(i32),
    }

    impl Awaitable<i32, Error<Fail>> for Yielded {
        fn into_promise(self) -> Result<Awaited, Self> {
            match self {
                Yielded::Wait(promise) => Ok(promise),
                other => Err(other),
            }
        }
    }

    fn new_log() -> Log {
        Arc::new(Mutex::new(Vec::new()))
    }

    fn push_on_cleanup(cx: &mut Cx<'_>, log: &Log, name: &'static str) {
        let log = log.clone();
        cx.defer(move || log.lock().push(name));
    }

    /// Yields `n` as a plain value and returns whatever it is resumed with.
    fn echo(
        n: i32,
    ) -> impl Routine<Yield = Yielded, Resume = i32, Output = i32, Error = Fail> + Send + 'static
    {
        from_fn(move |_: &mut Cx<'_>, input: Input| -> TestStep {
            match input {
                Resumption::Start => Step::Suspended(Yielded::Plain(n)),
                Resumption::Value(value) => Step::Completed(value),
                Resumption::Raise(error) => Step::Failed(error),
            }
        })
    }

    #[test]
    fn returns_without_suspending() {
        let log = new_log();
        let l = log.clone();
        let co = coroutine(move |n: i32| {
            let log = l.clone();
            from_fn(move |cx: &mut Cx<'_>, _: Input| -> TestStep {
                for name in ["a", "b", "c"] {
                    push_on_cleanup(cx, &log, name);
                }
                Step::Completed(n)
            })
        });

        assert_eq!(co.call(7).value(), Some(7));
        assert_eq!(*log.lock(), ["c", "b", "a"]);
    }

    #[test]
    fn cleanup_finishes_before_the_promise_settles() {
        let log = new_log();
        let (gate, open) = Awaited::pending();
        let l = log.clone();
        let result = spawn(from_fn(move |cx: &mut Cx<'_>, input: Input| -> TestStep {
            match input {
                Resumption::Start => {
                    for name in ["a", "b", "c"] {
                        push_on_cleanup(cx, &l, name);
                    }
                    Step::Suspended(Yielded::Wait(gate.clone()))
                }
                Resumption::Value(value) => Step::Completed(value),
                Resumption::Raise(error) => Step::Failed(error),
            }
        }));
        assert!(result.is_pending());

        let l = log.clone();
        result.on_settle(move |settled: Settled<i32, Error<Fail>>| {
            assert_eq!(settled, Settled::Fulfilled(5));
            l.lock().push("settled");
        });
        open.fulfill(5);
        assert_eq!(*log.lock(), ["c", "b", "a", "settled"]);
    }

    #[test]
    fn failure_on_first_step_rejects() {
        let result = spawn(from_fn(|_: &mut Cx<'_>, _: Input| -> TestStep {
            Step::Failed(Error::User("boom"))
        }));
        assert_eq!(result.reason(), Some(Error::User("boom")));
    }

    #[test]
    fn rejection_is_raised_into_the_routine() {
        let (gate, close) = Awaited::pending();
        let seen = Arc::new(Mutex::new(None));
        let s = seen.clone();
        let result = spawn(from_fn(move |_: &mut Cx<'_>, input: Input| -> TestStep {
            match input {
                Resumption::Start => Step::Suspended(Yielded::Wait(Promise::resolved(1))),
                Resumption::Value(1) => Step::Suspended(Yielded::Wait(gate.clone())),
                Resumption::Value(value) => Step::Completed(value),
                Resumption::Raise(error) => {
                    *s.lock() = Some(error);
                    Step::Completed(-1)
                }
            }
        }));
        assert!(result.is_pending());

        close.reject(Error::User("lost"));
        assert_eq!(*seen.lock(), Some(Error::User("lost")));
        assert_eq!(result.value(), Some(-1));
    }

    #[test]
    fn cancelling_while_awaiting_raises_the_sentinel() {
        let log = new_log();
        let (gate, settle) = Awaited::pending();
        let l = log.clone();
        let awaited = gate.clone();
        let result = spawn(from_fn(move |_: &mut Cx<'_>, input: Input| -> TestStep {
            match input {
                Resumption::Start => Step::Suspended(Yielded::Wait(awaited.clone())),
                Resumption::Raise(error) if error.is_cancelled() => {
                    l.lock().push("sentinel");
                    Step::Failed(error)
                }
                _ => Step::Completed(0),
            }
        }));

        let l = log.clone();
        result.on_settle(move |settled: Settled<i32, Error<Fail>>| {
            assert_eq!(settled, Settled::Cancelled);
            l.lock().push("cancelled");
        });
        result.cancel();

        assert_eq!(gate.status(), Status::Cancelled);
        assert!(settle.is_cancel_requested());
        assert_eq!(*log.lock(), ["sentinel", "cancelled"]);
    }

    #[test]
    fn sentinel_can_be_caught() {
        let log = new_log();
        let (gate, _settle) = Awaited::pending();
        let l = log.clone();
        let result = spawn(from_fn(move |_: &mut Cx<'_>, input: Input| -> TestStep {
            match input {
                Resumption::Start => Step::Suspended(Yielded::Wait(gate.clone())),
                Resumption::Raise(_) => {
                    l.lock().push("caught");
                    Step::Suspended(Yielded::Wait(Promise::resolved(5)))
                }
                Resumption::Value(value) => {
                    l.lock().push("resumed");
                    Step::Completed(value)
                }
            }
        }));
        result.cancel();
        assert_eq!(*log.lock(), ["caught", "resumed"]);
        assert_eq!(result.status(), Status::Cancelled);
    }

    /// Supports native termination and awaits a cleanup promise when
    /// terminated.
    struct Guarded {
        log: Log,
        gate: Option<Awaited>,
        cleanup: Option<Awaited>,
    }

    impl Routine for Guarded {
        type Yield = Yielded;
        type Resume = i32;
        type Output = i32;
        type Error = Fail;

        fn start(&mut self, cx: &mut Cx<'_>) -> TestStep {
            push_on_cleanup(cx, &self.log, "deferred");
            match self.gate.take() {
                Some(gate) => Step::Suspended(Yielded::Wait(gate)),
                None => Step::Completed(0),
            }
        }

        fn resume(&mut self, _: &mut Cx<'_>, value: i32) -> TestStep {
            self.log.lock().push("resumed");
            Step::Completed(value)
        }

        fn raise(&mut self, _: &mut Cx<'_>, error: Error<Fail>) -> TestStep {
            self.log.lock().push("raised");
            Step::Failed(error)
        }

        fn terminate(&mut self, _: &mut Cx<'_>) -> Option<TestStep> {
            self.log.lock().push("terminate");
            Some(match self.cleanup.take() {
                Some(cleanup) => Step::Suspended(Yielded::Wait(cleanup)),
                None => Step::Completed(0),
            })
        }
    }

    #[test]
    fn termination_may_await_its_own_cleanup() {
        let log = new_log();
        let (gate, _settle) = Awaited::pending();
        let (cleanup, finish_cleanup) = Awaited::pending();
        let result = spawn(Guarded {
            log: log.clone(),
            gate: Some(gate.clone()),
            cleanup: Some(cleanup),
        });

        result.cancel();
        assert_eq!(gate.status(), Status::Cancelled);
        assert_eq!(*log.lock(), ["terminate"]);
        assert!(result.is_pending());

        finish_cleanup.fulfill(3);
        assert_eq!(*log.lock(), ["terminate", "resumed", "deferred"]);
        assert_eq!(result.status(), Status::Cancelled);
    }

    #[test]
    fn rejection_after_cancellation_terminates_again() {
        let log = new_log();
        let (gate, _settle) = Awaited::pending();
        let (cleanup, fail_cleanup) = Awaited::pending();
        let result = spawn(Guarded {
            log: log.clone(),
            gate: Some(gate),
            cleanup: Some(cleanup),
        });

        result.cancel();
        fail_cleanup.reject(Error::User("cleanup broke"));
        assert_eq!(*log.lock(), ["terminate", "terminate", "deferred"]);
        assert_eq!(result.status(), Status::Cancelled);
    }

    static UNRECOVERABLE: Mutex<Vec<String>> = Mutex::new(Vec::new());

    fn record(error: &dyn fmt::Debug) {
        UNRECOVERABLE.lock().push(format!("{error:?}"));
    }

    #[test]
    fn failing_cleanup_is_isolated() {
        crate::set_unrecoverable_handler(record);
        let log = new_log();
        let l = log.clone();
        let result = spawn(from_fn(move |cx: &mut Cx<'_>, _: Input| -> TestStep {
            push_on_cleanup(cx, &l, "a");
            let b = l.clone();
            cx.defer(move || {
                b.lock().push("b");
                Err::<(), _>("b failed")
            });
            push_on_cleanup(cx, &l, "c");
            Step::Failed(Error::User("original"))
        }));

        assert_eq!(*log.lock(), ["c", "b", "a"]);
        assert_eq!(result.reason(), Some(Error::User("original")));
        assert!(UNRECOVERABLE.lock().iter().any(|e| e.contains("b failed")));
    }

    fn fail_on_cleanup(cx: &mut Cx<'_>) {
        cx.defer(|| Err::<(), _>("cleanup failed"));
    }

    #[test]
    fn failing_cleanup_keeps_success_and_cancellation() {
        crate::set_unrecoverable_handler(record);
        let done = spawn(from_fn(|cx: &mut Cx<'_>, _: Input| -> TestStep {
            fail_on_cleanup(cx);
            Step::Completed(3)
        }));
        assert_eq!(done.value(), Some(3));

        let (gate, _settle) = Awaited::pending();
        let cancelled = spawn(from_fn(move |cx: &mut Cx<'_>, input: Input| -> TestStep {
            match input {
                Resumption::Start => {
                    fail_on_cleanup(cx);
                    Step::Suspended(Yielded::Wait(gate.clone()))
                }
                Resumption::Value(value) => Step::Completed(value),
                Resumption::Raise(error) => Step::Failed(error),
            }
        }));
        cancelled.cancel();
        assert_eq!(cancelled.status(), Status::Cancelled);

        let reported = UNRECOVERABLE.lock();
        assert!(reported.iter().filter(|e| e.contains("cleanup failed")).count() >= 2);
    }

    #[cfg(feature = "std")]
    fn explode() {
        panic!("cleanup exploded")
    }

    #[cfg(feature = "std")]
    #[test]
    fn panicking_cleanup_is_isolated() {
        crate::set_unrecoverable_handler(record);
        let log = new_log();
        let (gate, open) = Awaited::pending();
        let l = log.clone();
        let result = spawn(from_fn(move |cx: &mut Cx<'_>, input: Input| -> TestStep {
            match input {
                Resumption::Start => {
                    push_on_cleanup(cx, &l, "a");
                    cx.defer(explode);
                    Step::Suspended(Yielded::Wait(gate.clone()))
                }
                Resumption::Value(value) => Step::Completed(value),
                Resumption::Raise(error) => Step::Failed(error),
            }
        }));

        open.fulfill(1);
        assert_eq!(*log.lock(), ["a"]);
        assert_eq!(result.value(), Some(1));
        assert!(UNRECOVERABLE
            .lock()
            .iter()
            .any(|e| e.contains("cleanup exploded")));
    }

    #[test]
    fn settled_yields_are_handled_inline() {
        let log = new_log();
        let l = log.clone();
        let result = spawn(from_fn(move |_: &mut Cx<'_>, input: Input| -> TestStep {
            match input {
                Resumption::Start => {
                    Step::Suspended(Yielded::Wait(Promise::rejected(Error::User("early"))))
                }
                Resumption::Raise(Error::User("early")) => {
                    l.lock().push("raised");
                    Step::Suspended(Yielded::Wait(Promise::cancelled()))
                }
                Resumption::Raise(error) if error.is_cancelled() => {
                    l.lock().push("sentinel");
                    Step::Failed(error)
                }
                _ => Step::Completed(0),
            }
        }));
        assert_eq!(*log.lock(), ["raised", "sentinel"]);
        assert_eq!(result.status(), Status::Cancelled);
    }

    #[test]
    fn cancellation_requested_while_running() {
        // The routine cancels its own result from inside a step, then yields
        // either a pending promise or an already fulfilled one.
        for pending in [true, false] {
            let log = new_log();
            let (start, go) = Awaited::pending();
            let (next, _next_settle) = Awaited::pending();
            let own = Arc::new(Mutex::new(None::<Awaited>));
            let (l, o, n) = (log.clone(), own.clone(), next.clone());
            let result = spawn(from_fn(move |_: &mut Cx<'_>, input: Input| -> TestStep {
                match input {
                    Resumption::Start => Step::Suspended(Yielded::Wait(start.clone())),
                    Resumption::Value(1) => {
                        let own = o.lock().clone();
                        if let Some(own) = own {
                            own.cancel();
                        }
                        let next = if pending {
                            n.clone()
                        } else {
                            Promise::resolved(2)
                        };
                        Step::Suspended(Yielded::Wait(next))
                    }
                    Resumption::Value(_) => {
                        l.lock().push("resumed");
                        Step::Completed(0)
                    }
                    Resumption::Raise(error) => {
                        if error.is_cancelled() {
                            l.lock().push("sentinel");
                        }
                        Step::Failed(error)
                    }
                }
            }));
            *own.lock() = Some(result.clone());

            go.fulfill(1);
            assert_eq!(*log.lock(), ["sentinel"]);
            assert_eq!(result.status(), Status::Cancelled);
            let expected = if pending {
                Status::Cancelled
            } else {
                Status::Pending
            };
            assert_eq!(next.status(), expected);
        }
    }

    #[test]
    fn value_from_a_cancel_hook_resumes_the_routine() {
        let log = new_log();
        let (gate, settle) = Awaited::pending();
        let slot = Arc::new(Mutex::new(Some(settle)));
        if let Some(settle) = &*slot.lock() {
            let slot = slot.clone();
            settle.on_cancel(move || {
                let settle = slot.lock().take();
                if let Some(settle) = settle {
                    settle.fulfill(7);
                }
            });
        }

        let l = log.clone();
        let awaited = gate.clone();
        let result = spawn(from_fn(move |_: &mut Cx<'_>, input: Input| -> TestStep {
            match input {
                Resumption::Start => Step::Suspended(Yielded::Wait(awaited.clone())),
                Resumption::Value(7) => {
                    l.lock().push("seven");
                    Step::Completed(7)
                }
                Resumption::Value(_) => Step::Completed(0),
                Resumption::Raise(error) => {
                    l.lock().push("raised");
                    Step::Failed(error)
                }
            }
        }));

        result.cancel();
        assert_eq!(gate.value(), Some(7));
        assert_eq!(*log.lock(), ["seven"]);
        assert_eq!(result.status(), Status::Cancelled);
    }

    #[test]
    fn sentinel_rethrown_elsewhere_cancels() {
        let caught = Arc::new(Mutex::new(None));
        let (gate, _settle) = Awaited::pending();
        let c = caught.clone();
        let first = spawn(from_fn(move |_: &mut Cx<'_>, input: Input| -> TestStep {
            match input {
                Resumption::Start => Step::Suspended(Yielded::Wait(gate.clone())),
                Resumption::Raise(error) => {
                    *c.lock() = Some(error);
                    Step::Completed(0)
                }
                Resumption::Value(value) => Step::Completed(value),
            }
        }));
        first.cancel();

        let sentinel = caught.lock().take().unwrap();
        assert!(sentinel.is_cancelled());
        let second = spawn(from_fn(move |_: &mut Cx<'_>, _: Input| -> TestStep {
            Step::Failed(sentinel.clone())
        }));
        assert_eq!(second.status(), Status::Cancelled);
        assert_eq!(second.reason(), None);
    }

    #[test]
    fn unrecognized_yield_rejects() {
        let co = coroutine(echo);
        let result = co.call(3);
        match result.reason() {
            Some(Error::Unrecognized(error)) => {
                assert!(error.value().contains("Plain(3)"));
                assert_eq!(error.origin(), co.origin());
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn per_call_yield_handler() {
        let co = coroutine(echo).with_yield_handler(|value: &Yielded| match value {
            Yielded::Plain(_) => Some(Yielded::Wait(Promise::resolved(42))),
            Yielded::Wait(_) => None,
        });
        assert_eq!(co.call(3).value(), Some(42));
        // The handler belongs to `co` only.
        assert!(matches!(
            coroutine(echo).call(3).reason(),
            Some(Error::Unrecognized(_))
        ));
    }

    #[derive(Debug)]
    enum Ticket {
        Number(i32),
        Ready(Awaited),
    }

    impl Awaitable<i32, Error<Fail>> for Ticket {
        fn into_promise(self) -> Result<Awaited, Self> {
            match self {
                Ticket::Ready(promise) => Ok(promise),
                other => Err(other),
            }
        }
    }

    #[test]
    fn process_wide_yield_handler() {
        crate::add_yield_handler(|ticket: &Ticket| match ticket {
            Ticket::Number(n) => Some(Ticket::Ready(Promise::resolved(n * 2))),
            Ticket::Ready(_) => None,
        });
        let result = spawn(from_fn(
            |_: &mut Cx<'_>, input: Input| -> Step<Ticket, i32, Error<Fail>> {
                match input {
                    Resumption::Start => Step::Suspended(Ticket::Number(21)),
                    Resumption::Value(value) => Step::Completed(value),
                    Resumption::Raise(error) => Step::Failed(error),
                }
            },
        ));
        assert_eq!(result.value(), Some(42));
    }

    #[test]
    fn invocations_are_independent() {
        let gates: Arc<Mutex<Vec<Settle<i32, Error<Fail>>>>> = Arc::new(Mutex::new(Vec::new()));
        let g = gates.clone();
        let co = coroutine(move |_: ()| {
            let (gate, settle) = Awaited::pending();
            g.lock().push(settle);
            from_fn(move |_: &mut Cx<'_>, input: Input| -> TestStep {
                match input {
                    Resumption::Start => Step::Suspended(Yielded::Wait(gate.clone())),
                    Resumption::Value(value) => Step::Completed(value),
                    Resumption::Raise(error) => Step::Failed(error),
                }
            })
        });

        let first = co.call(());
        let second = co.call(());
        first.cancel();
        assert_eq!(first.status(), Status::Cancelled);
        assert!(second.is_pending());

        let settle = gates.lock().remove(1);
        settle.fulfill(9);
        assert_eq!(second.value(), Some(9));
    }

    #[cfg(feature = "std")]
    #[test]
    fn free_defer_needs_an_active_coroutine() {
        assert_eq!(crate::defer(|| ()), Err(OutsideCoroutine));

        let log = new_log();
        let l = log.clone();
        let result = spawn(from_fn(move |_: &mut Cx<'_>, _: Input| -> TestStep {
            // Starting another coroutine must not clear this one's marker.
            let inner = spawn(from_fn(|_: &mut Cx<'_>, _: Input| -> TestStep {
                Step::Completed(1)
            }));
            let outer = l.clone();
            let registered = crate::defer(move || outer.lock().push("outer"));
            assert_eq!(registered, Ok(()));
            Step::Completed(inner.value().unwrap_or_default())
        }));

        assert_eq!(result.value(), Some(1));
        assert_eq!(*log.lock(), ["outer"]);
        assert_eq!(crate::defer(|| ()), Err(OutsideCoroutine));
    }
}
