//! Pending delivery handles.

use flowq::FlowError;
use pin_project_lite::pin_project;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::oneshot;

pin_project! {
    /// Resolves once the operation it was returned for has actually taken
    /// effect downstream - delivery of an event to the subscriber, or
    /// settlement of a whole processing pipeline - not merely when it was
    /// queued.
    ///
    /// Resolves exceptionally if the link terminates first (cancellation, a
    /// prior terminal signal). Usable from async code via `.await` or from
    /// plain threads via [`blocking_wait`]; neither requires a runtime.
    ///
    /// [`blocking_wait`]: Completion::blocking_wait
    #[derive(Debug)]
    pub struct Completion {
        #[pin]
        rx: oneshot::Receiver<Result<(), FlowError>>,
    }
}

impl Completion {
    /// Creates a resolver/handle pair.
    pub(crate) fn pair() -> (CompletionTx, Completion) {
        let (tx, rx) = oneshot::channel();
        (tx, Completion { rx })
    }

    /// Blocks the calling thread until the handle resolves.
    ///
    /// A dropped resolver counts as cancellation: the link was torn down
    /// before the operation could take effect.
    pub fn blocking_wait(self) -> Result<(), FlowError> {
        match self.rx.blocking_recv() {
            Ok(result) => result,
            Err(_) => Err(FlowError::Cancelled),
        }
    }
}

impl Future for Completion {
    type Output = Result<(), FlowError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        match this.rx.poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(FlowError::Cancelled)),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Resolver side of a [`Completion`].
pub(crate) type CompletionTx = oneshot::Sender<Result<(), FlowError>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_on_send() {
        let (tx, handle) = Completion::pair();
        tx.send(Ok(())).unwrap();
        assert!(handle.blocking_wait().is_ok());
    }

    #[test]
    fn dropped_resolver_reads_as_cancellation() {
        let (tx, handle) = Completion::pair();
        drop(tx);
        assert!(matches!(
            handle.blocking_wait(),
            Err(FlowError::Cancelled)
        ));
    }

    #[test]
    fn awaitable_from_async_context() {
        let (tx, handle) = Completion::pair();
        tx.send(Err(FlowError::Terminated)).unwrap();
        let result = futures::executor::block_on(handle);
        assert!(matches!(result, Err(FlowError::Terminated)));
    }
}
