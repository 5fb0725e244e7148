use crate::defer::{Cleanup, DeferQueue};

/// The context a routine runs in.
///
/// A `Cx` is handed to every step of a routine and ties registrations made
/// during that step to the coroutine driving it.
pub struct Cx<'a> {
    defers: &'a DeferQueue,
}

impl<'a> Cx<'a> {
    pub(crate) fn new(defers: &'a DeferQueue) -> Self {
        Cx { defers }
    }

    /// Registers a cleanup thunk.
    ///
    /// Thunks run after the routine reaches a terminal step, whatever its
    /// outcome, in reverse registration order and one at a time. They finish
    /// before the coroutine's promise settles.
    pub fn defer<F, C>(&mut self, thunk: F)
    where
        F: FnOnce() -> C + Send + 'static,
        C: Into<Cleanup>,
    {
        self.defers.push(thunk)
    }
}

#[cfg(feature = "std")]
mod active {
    use core::cell::RefCell;

    use crate::{
        defer::{Cleanup, DeferQueue},
        error::OutsideCoroutine,
    };

    std::thread_local! {
        static CURRENT: RefCell<Option<DeferQueue>> = const { RefCell::new(None) };
    }

    /// Marks a coroutine as the one currently being resumed on this thread.
    ///
    /// The previous marker comes back on drop, so a coroutine started from
    /// inside another routine's step leaves the outer marker in place.
    pub(crate) struct Active(Option<DeferQueue>);

    impl Active {
        pub(crate) fn enter(defers: &DeferQueue) -> Self {
            Active(CURRENT.replace(Some(defers.clone())))
        }
    }

    impl Drop for Active {
        fn drop(&mut self) {
            CURRENT.set(self.0.take());
        }
    }

    /// Registers a cleanup thunk on the coroutine currently being resumed on
    /// this thread.
    ///
    /// Fails, registering nothing, when called outside a routine step. Prefer
    /// [`Cx::defer`](super::Cx::defer) where a context is at hand.
    pub fn defer<F, C>(thunk: F) -> Result<(), OutsideCoroutine>
    where
        F: FnOnce() -> C + Send + 'static,
        C: Into<Cleanup>,
    {
        CURRENT.with_borrow(|current| match current {
            Some(defers) => {
                defers.push(thunk);
                Ok(())
            }
            None => Err(OutsideCoroutine),
        })
    }
}

#[cfg(not(feature = "std"))]
mod active {
    use crate::defer::DeferQueue;

    pub(crate) struct Active;

    impl Active {
        pub(crate) fn enter(_: &DeferQueue) -> Self {
            Active
        }
    }
}

#[cfg(feature = "std")]
pub use self::active::defer;
pub(crate) use self::active::Active;
