use core::marker::PhantomData;

use crate::{context::Cx, error::Error};

/// The outcome of driving a routine by one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step<Y, T, E> {
    /// The routine yielded a value and is waiting to be resumed.
    Suspended(Y),
    /// The routine returned; there are no more steps.
    Completed(T),
    /// The step raised an error.
    Failed(E),
}

impl<Y, T, E> Step<Y, T, E> {
    #[inline]
    pub const fn is_suspended(&self) -> bool {
        matches!(self, Step::Suspended(_))
    }

    #[inline]
    pub const fn is_terminal(&self) -> bool {
        !self.is_suspended()
    }

    pub fn map_yielded<Y2, F>(self, f: F) -> Step<Y2, T, E>
    where
        F: FnOnce(Y) -> Y2,
    {
        match self {
            Step::Suspended(value) => Step::Suspended(f(value)),
            Step::Completed(value) => Step::Completed(value),
            Step::Failed(error) => Step::Failed(error),
        }
    }
}

pub type RoutineStep<R> =
    Step<<R as Routine>::Yield, <R as Routine>::Output, Error<<R as Routine>::Error>>;

/// A suspendable computation.
///
/// A routine is started once, then resumed with the value of each promise it
/// suspended on, or has the promise's rejection raised into it. Every entry
/// point receives the [`Cx`] of the coroutine driving it.
pub trait Routine {
    /// What the routine suspends on. Converted to a promise before waiting.
    type Yield;
    /// What a fulfilled promise resumes the routine with.
    type Resume;
    type Output;
    type Error;

    fn start(&mut self, cx: &mut Cx<'_>) -> RoutineStep<Self>;

    fn resume(&mut self, cx: &mut Cx<'_>, value: Self::Resume) -> RoutineStep<Self>;

    fn raise(&mut self, cx: &mut Cx<'_>, error: Error<Self::Error>) -> RoutineStep<Self>;

    /// Terminates the routine early, as if it returned at its current
    /// suspension point.
    ///
    /// `None` means the routine has no native early termination; the
    /// cancellation sentinel is raised into it instead.
    fn terminate(&mut self, cx: &mut Cx<'_>) -> Option<RoutineStep<Self>> {
        let _ = cx;
        None
    }
}

/// How a [`FromFn`] routine is being entered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resumption<T, E> {
    Start,
    Value(T),
    Raise(Error<E>),
}

pub struct FromFn<F, Y, T, O, E> {
    f: F,
    marker: PhantomData<fn(T) -> (Y, O, E)>,
}

/// Builds a routine from a closure that is called once per step.
///
/// ```
/// use cospawn_core::{coroutine, from_fn, Error, Promise, Resumption, Step};
///
/// let double = coroutine(|n: i32| {
///     from_fn(move |_cx, input: Resumption<i32, ()>| match input {
///         Resumption::Start => Step::Suspended(Promise::<i32, Error<()>>::resolved(n)),
///         Resumption::Value(v) => Step::Completed(v * 2),
///         Resumption::Raise(e) => Step::Failed(e),
///     })
/// });
/// assert_eq!(double.call(21).value(), Some(42));
/// ```
pub fn from_fn<F, Y, T, O, E>(f: F) -> FromFn<F, Y, T, O, E>
where
    F: FnMut(&mut Cx<'_>, Resumption<T, E>) -> Step<Y, O, Error<E>>,
{
    FromFn {
        f,
        marker: PhantomData,
    }
}

impl<F, Y, T, O, E> Routine for FromFn<F, Y, T, O, E>
where
    F: FnMut(&mut Cx<'_>, Resumption<T, E>) -> Step<Y, O, Error<E>>,
{
    type Yield = Y;
    type Resume = T;
    type Output = O;
    type Error = E;

    fn start(&mut self, cx: &mut Cx<'_>) -> RoutineStep<Self> {
        (self.f)(cx, Resumption::Start)
    }

    fn resume(&mut self, cx: &mut Cx<'_>, value: T) -> RoutineStep<Self> {
        (self.f)(cx, Resumption::Value(value))
    }

    fn raise(&mut self, cx: &mut Cx<'_>, error: Error<E>) -> RoutineStep<Self> {
        (self.f)(cx, Resumption::Raise(error))
    }
}
