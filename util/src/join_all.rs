use alloc::{sync::Arc, vec::Vec};

use cospawn_core::{Promise, Settled};
use spin::Mutex;

use crate::join::finish;

struct Gather<T> {
    values: Vec<Option<T>>,
    remaining: usize,
}

/// Fulfills with every value, in input order, once all promises fulfill.
///
/// Settles like [`join`](crate::join) otherwise. An empty input fulfills
/// right away.
pub fn join_all<I, T, X>(promises: I) -> Promise<Vec<T>, X>
where
    I: IntoIterator<Item = Promise<T, X>>,
    T: Clone + Send + 'static,
    X: Clone + Send + 'static,
{
    let promises: Vec<_> = promises.into_iter().collect();
    if promises.is_empty() {
        return Promise::resolved(Vec::new());
    }

    let (joined, settle) = Promise::pending();
    {
        let inputs = promises.clone();
        settle.on_cancel(move || inputs.iter().for_each(Promise::cancel));
    }
    let settle = Arc::new(Mutex::new(Some(settle)));
    let gather = Arc::new(Mutex::new(Gather {
        values: promises.iter().map(|_| None).collect(),
        remaining: promises.len(),
    }));

    for (index, promise) in promises.into_iter().enumerate() {
        let (settle, gather) = (settle.clone(), gather.clone());
        promise.on_settle(move |settled| match settled {
            Settled::Fulfilled(value) => {
                let values = {
                    let mut gather = gather.lock();
                    gather.values[index] = Some(value);
                    gather.remaining -= 1;
                    if gather.remaining > 0 {
                        return;
                    }
                    core::mem::take(&mut gather.values)
                };
                finish(&settle, Settled::Fulfilled(values.into_iter().flatten().collect()))
            }
            Settled::Rejected(reason) => finish(&settle, Settled::Rejected(reason)),
            Settled::Cancelled => finish(&settle, Settled::Cancelled),
        });
    }
    joined
}

pub trait JoinAllExt<T, X>: IntoIterator<Item = Promise<T, X>> + Sized {
    fn join_all(self) -> Promise<Vec<T>, X>
    where
        T: Clone + Send + 'static,
        X: Clone + Send + 'static,
    {
        join_all(self)
    }
}

impl<I, T, X> JoinAllExt<T, X> for I where I: IntoIterator<Item = Promise<T, X>> {}
