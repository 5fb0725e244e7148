use cospawn_core::{Promise, Receiver, Settled};

/// Blocks the current thread until `promise` settles.
///
/// Must not be called from a thread that is expected to settle `promise`.
pub fn wait<T, X>(promise: &Promise<T, X>) -> Settled<T, X>
where
    T: Clone + Send + 'static,
    X: Clone + Send + 'static,
{
    let (tx, rx) = oneshot::channel();
    promise.on_settle(WaitRecv(tx));
    // The sender only disappears without sending if the continuation is
    // dropped, which happens to no pending promise.
    rx.recv().unwrap_or(Settled::Cancelled)
}

/// A [`Receiver`] that forwards into a oneshot channel.
#[derive(Debug)]
pub struct WaitRecv<T>(pub oneshot::Sender<T>);

impl<T> Receiver<T> for WaitRecv<T> {
    fn set(self, value: T) {
        let _ = self.0.send(value);
    }
}
