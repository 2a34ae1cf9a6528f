//! Bounded-concurrency asynchronous element processing.

use crate::completion::{Completion, CompletionTx};
use crate::invariants::debug_assert_in_flight_accounted;
use flowq::{FlowError, Subscriber, Subscription};
use futures_core::future::BoxFuture;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, trace};

type Transform<T> = dyn Fn(T) -> BoxFuture<'static, Result<(), FlowError>> + Send + Sync;

/// Applies an asynchronous transformation to each inbound element with at
/// most `max_concurrency` transformations in flight.
///
/// Demand discipline: `max_concurrency` elements are requested at
/// subscription and one more per resolved transformation, so the in-flight
/// count never exceeds the bound for a well-behaved upstream. The
/// [`Completion`] returned at construction resolves once upstream has
/// completed and every transformation has resolved successfully; it fails
/// immediately on the first transformation failure (the upstream is
/// cancelled and no further elements are requested) or on an upstream error.
///
/// Transformations are spawned as tasks, so elements must be processed
/// within a tokio runtime context.
pub struct AsyncBufferingSubscriber<T> {
    inner: Arc<AsyncBufferingInner<T>>,
}

impl<T> Clone for AsyncBufferingSubscriber<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct AsyncBufferingInner<T> {
    transform: Box<Transform<T>>,
    max_concurrency: u64,
    state: Mutex<AsyncBufferingState>,
}

struct AsyncBufferingState {
    upstream: Option<Arc<dyn Subscription>>,
    in_flight: u64,
    upstream_done: bool,
    settled: bool,
    completion: Option<CompletionTx>,
}

impl<T: Send + 'static> AsyncBufferingSubscriber<T> {
    /// Returns the subscriber and the handle that settles when processing
    /// finishes.
    ///
    /// # Panics
    ///
    /// Panics if `max_concurrency` is zero.
    pub fn new(
        max_concurrency: usize,
        transform: impl Fn(T) -> BoxFuture<'static, Result<(), FlowError>> + Send + Sync + 'static,
    ) -> (Self, Completion) {
        assert!(max_concurrency > 0, "concurrency bound must be positive");
        let (tx, handle) = Completion::pair();
        let subscriber = Self {
            inner: Arc::new(AsyncBufferingInner {
                transform: Box::new(transform),
                max_concurrency: max_concurrency as u64,
                state: Mutex::new(AsyncBufferingState {
                    upstream: None,
                    in_flight: 0,
                    upstream_done: false,
                    settled: false,
                    completion: Some(tx),
                }),
            }),
        };
        (subscriber, handle)
    }

    /// Transformations currently in flight.
    pub fn in_flight(&self) -> u64 {
        self.inner.state.lock().in_flight
    }
}

impl<T: Send + 'static> AsyncBufferingInner<T> {
    /// Called from the spawned task when one transformation resolves.
    fn on_settled(&self, result: Result<(), FlowError>) {
        enum After {
            RequestMore(Arc<dyn Subscription>),
            Finish(CompletionTx),
            Fail(CompletionTx, Option<Arc<dyn Subscription>>, FlowError),
            Nothing,
        }

        let after = {
            let mut state = self.state.lock();
            debug_assert_in_flight_accounted!(state.in_flight);
            state.in_flight = state.in_flight.saturating_sub(1);
            if state.settled {
                After::Nothing
            } else {
                match result {
                    Err(error) => {
                        state.settled = true;
                        match state.completion.take() {
                            Some(tx) => After::Fail(tx, state.upstream.take(), error),
                            None => After::Nothing,
                        }
                    }
                    Ok(()) => {
                        if state.upstream_done && state.in_flight == 0 {
                            state.settled = true;
                            match state.completion.take() {
                                Some(tx) => After::Finish(tx),
                                None => After::Nothing,
                            }
                        } else if !state.upstream_done {
                            match state.upstream.clone() {
                                Some(upstream) => After::RequestMore(upstream),
                                None => After::Nothing,
                            }
                        } else {
                            After::Nothing
                        }
                    }
                }
            }
        };

        match after {
            After::RequestMore(upstream) => upstream.request(1),
            After::Finish(tx) => {
                trace!("all transformations resolved");
                let _ = tx.send(Ok(()));
            }
            After::Fail(tx, upstream, error) => {
                debug!(%error, "transformation failed; cancelling upstream");
                if let Some(upstream) = upstream {
                    upstream.cancel();
                }
                let _ = tx.send(Err(error));
            }
            After::Nothing => {}
        }
    }
}

impl<T: Send + 'static> Subscriber<T> for AsyncBufferingSubscriber<T> {
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
        {
            let mut state = self.inner.state.lock();
            state.upstream = Some(Arc::clone(&subscription));
        }
        subscription.request(self.inner.max_concurrency);
    }

    fn on_next(&self, item: T) {
        let future = (self.inner.transform)(item);
        {
            let mut state = self.inner.state.lock();
            if state.settled {
                return;
            }
            state.in_flight += 1;
        }
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let result = future.await;
            inner.on_settled(result);
        });
    }

    fn on_complete(&self) {
        let finish = {
            let mut state = self.inner.state.lock();
            if state.settled {
                return;
            }
            state.upstream_done = true;
            state.upstream = None;
            if state.in_flight == 0 {
                state.settled = true;
                state.completion.take()
            } else {
                None
            }
        };
        if let Some(tx) = finish {
            let _ = tx.send(Ok(()));
        }
    }

    fn on_error(&self, error: FlowError) {
        let fail = {
            let mut state = self.inner.state.lock();
            if state.settled {
                return;
            }
            state.settled = true;
            state.upstream = None;
            state.completion.take()
        };
        if let Some(tx) = fail {
            let _ = tx.send(Err(error));
        }
    }
}
