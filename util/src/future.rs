use alloc::{boxed::Box, sync::Arc, task::Wake};
use core::{
    future::Future,
    pin::Pin,
    sync::atomic::{AtomicBool, Ordering::*},
    task::{Context, Poll, Waker},
};

use cospawn_core::{Promise, Settle};
use spin::Mutex;

struct Task<F, T, X> {
    // `None` once the future completed or was cancelled.
    future: Mutex<Option<Pin<Box<F>>>>,
    polls_again: AtomicBool,
    settle: Mutex<Option<Settle<T, X>>>,
}

impl<F, T, X> Task<F, T, X>
where
    F: Future<Output = Result<T, X>> + Send + 'static,
    T: Clone + Send + 'static,
    X: Clone + Send + 'static,
{
    /// Polls until the future stops asking for it.
    ///
    /// A wake that arrives while another thread is polling only sets
    /// `polls_again`; the polling thread picks it up before leaving.
    fn run(self: &Arc<Self>) {
        loop {
            let Some(mut slot) = self.future.try_lock() else {
                return;
            };
            while self.polls_again.swap(false, AcqRel) {
                let Some(future) = slot.as_mut() else {
                    return;
                };
                let waker = Waker::from(self.clone());
                if let Poll::Ready(output) = future.as_mut().poll(&mut Context::from_waker(&waker))
                {
                    *slot = None;
                    drop(slot);
                    return self.complete(output);
                }
                if self.settle.lock().is_none() {
                    // Cancelled while polling.
                    *slot = None;
                    return;
                }
            }
            drop(slot);
            if !self.polls_again.load(Acquire) {
                return;
            }
        }
    }

    fn complete(&self, output: Result<T, X>) {
        let settle = self.settle.lock().take();
        match (settle, output) {
            (Some(settle), Ok(value)) => settle.fulfill(value),
            (Some(settle), Err(reason)) => settle.reject(reason),
            (None, _) => {}
        }
    }

    fn cancel(&self) {
        let settle = self.settle.lock().take();
        if let Some(mut future) = self.future.try_lock() {
            *future = None;
        }
        if let Some(settle) = settle {
            settle.cancel();
        }
    }
}

impl<F, T, X> Wake for Task<F, T, X>
where
    F: Future<Output = Result<T, X>> + Send + 'static,
    T: Clone + Send + 'static,
    X: Clone + Send + 'static,
{
    fn wake(self: Arc<Self>) {
        self.wake_by_ref()
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.polls_again.store(true, Release);
        self.run();
    }
}

/// Drives `fut` to completion on whichever thread wakes it, and settles the
/// returned promise with its output.
///
/// The future is polled once right away. Cancelling the promise drops the
/// future.
pub fn from_future<F, T, X>(fut: F) -> Promise<T, X>
where
    F: Future<Output = Result<T, X>> + Send + 'static,
    T: Clone + Send + 'static,
    X: Clone + Send + 'static,
{
    let (promise, settle) = Promise::pending();
    let task = Arc::new(Task {
        future: Mutex::new(Some(Box::pin(fut))),
        polls_again: AtomicBool::new(true),
        settle: Mutex::new(Some(settle)),
    });

    let weak = Arc::downgrade(&task);
    if let Some(settle) = &*task.settle.lock() {
        settle.on_cancel(move || {
            if let Some(task) = weak.upgrade() {
                task.cancel();
            }
        });
    }
    task.run();
    promise
}
