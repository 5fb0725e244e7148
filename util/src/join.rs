use alloc::sync::Arc;

use cospawn_core::{Promise, Settle, Settled};
use either_slot::tuple;
use spin::Mutex;

type Shared<T> = Arc<Mutex<Option<T>>>;

/// Fulfills with both values once both promises fulfill.
///
/// The first rejection or cancellation of an input settles the joined promise
/// the same way. Cancelling the joined promise cancels both inputs.
pub fn join<T1, T2, X>(p1: Promise<T1, X>, p2: Promise<T2, X>) -> Promise<(T1, T2), X>
where
    T1: Clone + Send + 'static,
    T2: Clone + Send + 'static,
    X: Clone + Send + 'static,
{
    let (joined, settle) = Promise::pending();
    {
        let (p1, p2) = (p1.clone(), p2.clone());
        settle.on_cancel(move || {
            p1.cancel();
            p2.cancel();
        });
    }
    let settle: Shared<Settle<(T1, T2), X>> = Arc::new(Mutex::new(Some(settle)));

    let (s1, s2) = tuple::<(T1, T2)>();
    {
        let settle = settle.clone();
        p1.on_settle(move |settled| match settled {
            Settled::Fulfilled(v1) => {
                if let Err((Some(v1), Some(v2))) = s1.send(v1) {
                    finish(&settle, Settled::Fulfilled((v1, v2)))
                }
            }
            Settled::Rejected(reason) => finish(&settle, Settled::Rejected(reason)),
            Settled::Cancelled => finish(&settle, Settled::Cancelled),
        });
    }
    p2.on_settle(move |settled| match settled {
        Settled::Fulfilled(v2) => {
            if let Err((Some(v1), Some(v2))) = s2.send(v2) {
                finish(&settle, Settled::Fulfilled((v1, v2)))
            }
        }
        Settled::Rejected(reason) => finish(&settle, Settled::Rejected(reason)),
        Settled::Cancelled => finish(&settle, Settled::Cancelled),
    });
    joined
}

pub(crate) fn finish<T: Clone, X: Clone>(settle: &Shared<Settle<T, X>>, settled: Settled<T, X>) {
    let settle = settle.lock().take();
    if let Some(settle) = settle {
        settle.settle(settled);
    }
}
