use alloc::{format, string::String};
use core::{fmt, panic::Location};

/// The rejection reason of a coroutine, and the error raised into a routine.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error<E> {
    /// Raised by routine code, or the rejection reason of an awaited promise.
    #[error("{0}")]
    User(E),
    #[error(transparent)]
    Unrecognized(#[from] Unrecognized),
    /// The cancellation sentinel.
    ///
    /// Raised into routines that have no native early termination. Catching it
    /// and carrying on is legal; cancellation is a request. It can be matched
    /// but not constructed outside this crate. A coroutine that received it,
    /// or that fails with one caught elsewhere, ends cancelled rather than
    /// rejected.
    #[error("the coroutine is being cancelled")]
    Cancelled(Cancelled),
}

impl<E> Error<E> {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled(_))
    }

    pub fn user(self) -> Option<E> {
        match self {
            Error::User(error) => Some(error),
            _ => None,
        }
    }
}

/// The payload of [`Error::Cancelled`].
///
/// ```rust,compile_fail
/// let _ = cospawn_core::Error::<()>::Cancelled(cospawn_core::Cancelled { _private: () });
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Cancelled {
    _private: (),
}

impl Cancelled {
    pub(crate) const SENTINEL: Cancelled = Cancelled { _private: () };
}

/// A yielded value that neither converted into a promise nor matched any
/// yield handler.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("a coroutine yielded a value that is not awaitable: {value}\n    coroutine created at {origin}")]
pub struct Unrecognized {
    value: String,
    origin: &'static Location<'static>,
}

impl Unrecognized {
    pub(crate) fn new(value: &dyn fmt::Debug, origin: &'static Location<'static>) -> Self {
        Unrecognized {
            value: format!("{value:?}"),
            origin,
        }
    }

    /// The `Debug` rendering of the yielded value.
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Where the coroutine was created.
    pub fn origin(&self) -> &'static Location<'static> {
        self.origin
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("cleanup registration outside an active coroutine")]
pub struct OutsideCoroutine;
