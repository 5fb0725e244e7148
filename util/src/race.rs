use alloc::sync::Arc;

use cospawn_core::{Promise, Settled};
use either::Either::{self, Left, Right};
use spin::Mutex;

use crate::join::finish;

/// Settles the way the first of the two promises settles, and cancels the
/// other one.
///
/// Cancelling the raced promise cancels both inputs.
pub fn race<T1, T2, X>(p1: Promise<T1, X>, p2: Promise<T2, X>) -> Promise<Either<T1, T2>, X>
where
    T1: Clone + Send + 'static,
    T2: Clone + Send + 'static,
    X: Clone + Send + 'static,
{
    let (raced, settle) = Promise::pending();
    {
        let (p1, p2) = (p1.clone(), p2.clone());
        settle.on_cancel(move || {
            p1.cancel();
            p2.cancel();
        });
    }
    let settle = Arc::new(Mutex::new(Some(settle)));

    {
        let (settle, loser) = (settle.clone(), p2.clone());
        p1.on_settle(move |settled: Settled<T1, X>| {
            finish(&settle, lift(settled, Left));
            loser.cancel();
        });
    }
    let loser = p1;
    p2.on_settle(move |settled: Settled<T2, X>| {
        finish(&settle, lift(settled, Right));
        loser.cancel();
    });
    raced
}

fn lift<T, U, X>(settled: Settled<T, X>, f: impl FnOnce(T) -> U) -> Settled<U, X> {
    match settled {
        Settled::Fulfilled(value) => Settled::Fulfilled(f(value)),
        Settled::Rejected(reason) => Settled::Rejected(reason),
        Settled::Cancelled => Settled::Cancelled,
    }
}
