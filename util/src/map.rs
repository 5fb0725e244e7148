use cospawn_core::{Promise, Settled};

/// Transforms the value of `promise` once it fulfills.
///
/// Cancelling the mapped promise cancels `promise`.
pub fn map<T, U, X, F>(promise: Promise<T, X>, f: F) -> Promise<U, X>
where
    T: Clone + Send + 'static,
    U: Clone + Send + 'static,
    X: Clone + Send + 'static,
    F: FnOnce(T) -> U + Send + 'static,
{
    let (mapped, settle) = Promise::pending();
    let upstream = promise.clone();
    settle.on_cancel(move || upstream.cancel());
    promise.on_settle(move |settled| match settled {
        Settled::Fulfilled(value) => settle.fulfill(f(value)),
        Settled::Rejected(reason) => settle.reject(reason),
        Settled::Cancelled => settle.cancel(),
    });
    mapped
}
