use crate::promise::{Promise, Settled};

/// The receiving end of a one-shot delivery.
///
/// Continuations registered on a [`Promise`] are receivers of its
/// [`Settled`] outcome. Any `FnOnce(T)` closure is a receiver.
pub trait Receiver<T> {
    fn set(self, value: T);
}

impl<T, F: FnOnce(T)> Receiver<T> for F {
    fn set(self, value: T) {
        self(value)
    }
}

/// Conversion of a yielded value into a promise.
///
/// Returning `Err(self)` hands the value back, meaning "not recognized as
/// awaitable". Unrecognized values are offered to the registered yield
/// handlers before the coroutine gives up on them.
pub trait Awaitable<T, X>: Sized {
    fn into_promise(self) -> Result<Promise<T, X>, Self>;
}

impl<T, X> Awaitable<T, X> for Promise<T, X> {
    fn into_promise(self) -> Result<Promise<T, X>, Self> {
        Ok(self)
    }
}

impl<T, X> Awaitable<T, X> for Settled<T, X> {
    fn into_promise(self) -> Result<Promise<T, X>, Self> {
        Ok(Promise::from_settled(self))
    }
}
