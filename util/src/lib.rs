//! Combinators over [`Promise`]s, handy as things for a routine to suspend
//! on.

#![no_std]

extern crate alloc;

#[cfg(any(feature = "std", test))]
extern crate std;

mod future;
mod join;
mod join_all;
mod map;
mod race;
#[cfg(feature = "std")]
mod wait;

use cospawn_core::Promise;
use either::Either;

#[cfg(feature = "std")]
pub use self::wait::{wait, WaitRecv};
pub use self::{
    future::from_future,
    join::join,
    join_all::{join_all, JoinAllExt},
    map::map,
    race::race,
};

pub trait PromiseExt<T, X>: Sized {
    fn map<U, F>(self, f: F) -> Promise<U, X>
    where
        T: Clone + Send + 'static,
        X: Clone + Send + 'static,
        U: Clone + Send + 'static,
        F: FnOnce(T) -> U + Send + 'static;

    fn join<U>(self, other: Promise<U, X>) -> Promise<(T, U), X>
    where
        T: Clone + Send + 'static,
        X: Clone + Send + 'static,
        U: Clone + Send + 'static;

    fn race<U>(self, other: Promise<U, X>) -> Promise<Either<T, U>, X>
    where
        T: Clone + Send + 'static,
        X: Clone + Send + 'static,
        U: Clone + Send + 'static;
}

impl<T, X> PromiseExt<T, X> for Promise<T, X> {
    fn map<U, F>(self, f: F) -> Promise<U, X>
    where
        T: Clone + Send + 'static,
        X: Clone + Send + 'static,
        U: Clone + Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        map(self, f)
    }

    fn join<U>(self, other: Promise<U, X>) -> Promise<(T, U), X>
    where
        T: Clone + Send + 'static,
        X: Clone + Send + 'static,
        U: Clone + Send + 'static,
    {
        join(self, other)
    }

    fn race<U>(self, other: Promise<U, X>) -> Promise<Either<T, U>, X>
    where
        T: Clone + Send + 'static,
        X: Clone + Send + 'static,
        U: Clone + Send + 'static,
    {
        race(self, other)
    }
}
