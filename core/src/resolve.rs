use alloc::{boxed::Box, collections::BTreeMap, sync::Arc, vec::Vec};
use core::any::{Any, TypeId};

use spin::Mutex;

use crate::{promise::Promise, traits::Awaitable};

/// Interprets a yielded value that is not awaitable by itself.
///
/// Returning `Some` offers a replacement value, which is converted with
/// [`Awaitable::into_promise`]; `None` declines.
pub type YieldHandler<Y> = Arc<dyn Fn(&Y) -> Option<Y> + Send + Sync>;

// One `Vec<YieldHandler<Y>>` per yielded type.
static REGISTRY: Mutex<BTreeMap<TypeId, Box<dyn Any + Send>>> = Mutex::new(BTreeMap::new());

/// Appends a process-wide yield handler for values of type `Y`.
///
/// Handlers are tried in registration order and are never removed. Only
/// coroutines started after this call see the handler.
pub fn add_yield_handler<Y, F>(handler: F)
where
    Y: 'static,
    F: Fn(&Y) -> Option<Y> + Send + Sync + 'static,
{
    let mut registry = REGISTRY.lock();
    let handlers = registry
        .entry(TypeId::of::<Y>())
        .or_insert_with(|| Box::new(Vec::<YieldHandler<Y>>::new()) as Box<dyn Any + Send>);
    if let Some(handlers) = handlers.downcast_mut::<Vec<YieldHandler<Y>>>() {
        handlers.push(Arc::new(handler));
    }
}

/// The handlers one coroutine consults, fixed when it starts.
pub(crate) struct Resolver<Y> {
    handlers: Vec<YieldHandler<Y>>,
}

impl<Y: 'static> Resolver<Y> {
    /// Snapshots the registry for `Y`, with `first` ahead of it.
    pub(crate) fn new(first: Option<YieldHandler<Y>>) -> Self {
        let registry = REGISTRY.lock();
        let global = registry
            .get(&TypeId::of::<Y>())
            .and_then(|handlers| handlers.downcast_ref::<Vec<YieldHandler<Y>>>());
        Resolver {
            handlers: first
                .into_iter()
                .chain(global.into_iter().flatten().cloned())
                .collect(),
        }
    }

    /// The first promise a handler produces for `value`.
    pub(crate) fn resolve<T, X>(&self, value: &Y) -> Option<Promise<T, X>>
    where
        Y: Awaitable<T, X>,
    {
        self.handlers
            .iter()
            .find_map(|handler| handler(value)?.into_promise().ok())
    }
}
