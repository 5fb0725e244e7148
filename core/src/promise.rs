use alloc::{boxed::Box, sync::Arc, vec::Vec};
use core::{
    fmt,
    future::Future,
    mem,
    pin::Pin,
    task::{Context, Poll, Waker},
};

use spin::Mutex;

use crate::traits::Receiver;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Pending,
    Fulfilled,
    Rejected,
    Cancelled,
}

/// The final state of a [`Promise`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Settled<T, X> {
    Fulfilled(T),
    Rejected(X),
    Cancelled,
}

impl<T, X> Settled<T, X> {
    pub fn status(&self) -> Status {
        match self {
            Settled::Fulfilled(_) => Status::Fulfilled,
            Settled::Rejected(_) => Status::Rejected,
            Settled::Cancelled => Status::Cancelled,
        }
    }

    /// Converts into a `Result`, or `None` if cancelled.
    pub fn into_result(self) -> Option<Result<T, X>> {
        match self {
            Settled::Fulfilled(value) => Some(Ok(value)),
            Settled::Rejected(reason) => Some(Err(reason)),
            Settled::Cancelled => None,
        }
    }
}

type Continuation<T, X> = Box<dyn FnOnce(Settled<T, X>) + Send>;
type CancelHook = Box<dyn FnOnce() + Send>;

struct Waiting<T, X> {
    continuations: Vec<Continuation<T, X>>,
    wakers: Vec<Waker>,
    on_cancel: Option<CancelHook>,
    cancel_requested: bool,
}

enum State<T, X> {
    Pending(Waiting<T, X>),
    Settled(Settled<T, X>),
}

struct Shared<T, X> {
    state: Mutex<State<T, X>>,
}

impl<T, X> Shared<T, X> {
    fn with_state(state: State<T, X>) -> Arc<Self> {
        Arc::new(Shared {
            state: Mutex::new(state),
        })
    }

    /// Moves the state out of `Pending`, returning what was waiting on it.
    ///
    /// The lock is released before anything is returned, so callers may run
    /// continuations freely.
    fn transition(&self, settled: Settled<T, X>) -> Option<Waiting<T, X>> {
        let mut state = self.state.lock();
        if !matches!(*state, State::Pending(_)) {
            return None;
        }
        match mem::replace(&mut *state, State::Settled(settled)) {
            State::Pending(waiting) => Some(waiting),
            State::Settled(_) => None,
        }
    }

    fn settle(&self, settled: Settled<T, X>)
    where
        T: Clone,
        X: Clone,
    {
        if let Some(waiting) = self.transition(settled.clone()) {
            waiting.wakers.into_iter().for_each(Waker::wake);
            for continuation in waiting.continuations {
                continuation(settled.clone());
            }
        }
    }

    // Cancellation carries no payload, so it needs no `Clone` and can run
    // from `Drop`.
    fn settle_cancelled(&self) {
        if let Some(waiting) = self.transition(Settled::Cancelled) {
            waiting.wakers.into_iter().for_each(Waker::wake);
            for continuation in waiting.continuations {
                continuation(Settled::Cancelled);
            }
        }
    }
}

/// A single-assignment, cancellable asynchronous result.
///
/// `Promise` is a cheap cloneable handle; every clone observes the same
/// outcome. The producing side is a [`Settle`], obtained from
/// [`Promise::pending`].
pub struct Promise<T, X> {
    shared: Arc<Shared<T, X>>,
}

impl<T, X> Clone for Promise<T, X> {
    fn clone(&self) -> Self {
        Promise {
            shared: self.shared.clone(),
        }
    }
}

impl<T, X> fmt::Debug for Promise<T, X> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Promise")
            .field("status", &self.status())
            .finish()
    }
}

impl<T, X> Promise<T, X> {
    /// Creates an empty pending promise and the handle that settles it.
    pub fn pending() -> (Self, Settle<T, X>) {
        let shared = Shared::with_state(State::Pending(Waiting {
            continuations: Vec::new(),
            wakers: Vec::new(),
            on_cancel: None,
            cancel_requested: false,
        }));
        (
            Promise {
                shared: shared.clone(),
            },
            Settle { shared },
        )
    }

    pub fn from_settled(settled: Settled<T, X>) -> Self {
        Promise {
            shared: Shared::with_state(State::Settled(settled)),
        }
    }

    pub fn resolved(value: T) -> Self {
        Self::from_settled(Settled::Fulfilled(value))
    }

    pub fn rejected(reason: X) -> Self {
        Self::from_settled(Settled::Rejected(reason))
    }

    pub fn cancelled() -> Self {
        Self::from_settled(Settled::Cancelled)
    }

    pub fn status(&self) -> Status {
        match &*self.shared.state.lock() {
            State::Pending(_) => Status::Pending,
            State::Settled(settled) => settled.status(),
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status() == Status::Pending
    }

    /// Requests cancellation of a pending promise.
    ///
    /// Only the first request has an effect. If the producer installed a hook
    /// with [`Settle::on_cancel`], the hook runs and the producer decides when
    /// the promise becomes cancelled; otherwise it is cancelled immediately.
    pub fn cancel(&self) {
        let hook = {
            let mut state = self.shared.state.lock();
            let State::Pending(waiting) = &mut *state else {
                return;
            };
            if waiting.cancel_requested {
                return;
            }
            waiting.cancel_requested = true;
            waiting.on_cancel.take()
        };
        match hook {
            Some(hook) => hook(),
            None => self.shared.settle_cancelled(),
        }
    }

    /// Registers a continuation for the outcome.
    ///
    /// The receiver is invoked exactly once: when the promise settles, or
    /// synchronously inside this call if it has already settled.
    pub fn on_settle<R>(&self, receiver: R)
    where
        T: Clone,
        X: Clone,
        R: Receiver<Settled<T, X>> + Send + 'static,
    {
        let settled = {
            let mut state = self.shared.state.lock();
            match &mut *state {
                State::Pending(waiting) => {
                    waiting
                        .continuations
                        .push(Box::new(move |settled| receiver.set(settled)));
                    return;
                }
                State::Settled(settled) => settled.clone(),
            }
        };
        receiver.set(settled)
    }
}

impl<T: Clone, X: Clone> Promise<T, X> {
    pub fn settled(&self) -> Option<Settled<T, X>> {
        match &*self.shared.state.lock() {
            State::Pending(_) => None,
            State::Settled(settled) => Some(settled.clone()),
        }
    }

    pub fn value(&self) -> Option<T> {
        match self.settled()? {
            Settled::Fulfilled(value) => Some(value),
            _ => None,
        }
    }

    pub fn reason(&self) -> Option<X> {
        match self.settled()? {
            Settled::Rejected(reason) => Some(reason),
            _ => None,
        }
    }
}

impl<X> From<()> for Promise<(), X> {
    fn from(_: ()) -> Self {
        Promise::resolved(())
    }
}

impl<T: Clone, X: Clone> Future for Promise<T, X> {
    type Output = Settled<T, X>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut state = self.shared.state.lock();
        match &mut *state {
            State::Settled(settled) => Poll::Ready(settled.clone()),
            State::Pending(waiting) => {
                if !waiting.wakers.iter().any(|w| w.will_wake(cx.waker())) {
                    waiting.wakers.push(cx.waker().clone());
                }
                Poll::Pending
            }
        }
    }
}

/// The producing half of a pending [`Promise`].
///
/// Dropping an unsettled `Settle` cancels its promise.
pub struct Settle<T, X> {
    shared: Arc<Shared<T, X>>,
}

impl<T, X> fmt::Debug for Settle<T, X> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settle")
            .field("status", &self.promise().status())
            .finish()
    }
}

impl<T, X> Settle<T, X> {
    pub fn promise(&self) -> Promise<T, X> {
        Promise {
            shared: self.shared.clone(),
        }
    }

    /// Installs the hook run by the first [`Promise::cancel`] call.
    ///
    /// If cancellation was already requested, the hook runs immediately.
    pub fn on_cancel<F>(&self, hook: F)
    where
        F: FnOnce() + Send + 'static,
    {
        {
            let mut state = self.shared.state.lock();
            let State::Pending(waiting) = &mut *state else {
                return;
            };
            if !waiting.cancel_requested {
                waiting.on_cancel = Some(Box::new(hook));
                return;
            }
        }
        hook()
    }

    pub fn is_cancel_requested(&self) -> bool {
        match &*self.shared.state.lock() {
            State::Pending(waiting) => waiting.cancel_requested,
            State::Settled(settled) => matches!(settled, Settled::Cancelled),
        }
    }

    pub fn cancel(self) {
        self.shared.settle_cancelled()
    }
}

impl<T: Clone, X: Clone> Settle<T, X> {
    pub fn fulfill(self, value: T) {
        self.shared.settle(Settled::Fulfilled(value))
    }

    pub fn reject(self, reason: X) {
        self.shared.settle(Settled::Rejected(reason))
    }

    pub fn settle(self, settled: Settled<T, X>) {
        self.shared.settle(settled)
    }
}

impl<T, X> Drop for Settle<T, X> {
    fn drop(&mut self) {
        self.shared.settle_cancelled()
    }
}
