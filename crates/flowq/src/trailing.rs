//! Trailing-element injection at end of stream.

use crate::error::FlowError;
use crate::traits::{Subscriber, Subscription};
use parking_lot::Mutex;
use std::sync::Arc;

/// Passes elements through unchanged and, on upstream completion, emits one
/// synthetic final element produced by the generator before forwarding
/// `Complete`.
///
/// The generator runs exactly once, when upstream completes; yielding `None`
/// skips the injection. Delivery of the synthetic element is demand-aware: if
/// downstream has no credit outstanding when upstream completes, the element
/// is stashed and emitted from the next `request` call, so elements delivered
/// never exceed demand granted.
pub struct TrailingDataSubscriber<T> {
    inner: Arc<TrailingInner<T>>,
}

struct TrailingInner<T> {
    generator: Box<dyn Fn() -> Option<T> + Send + Sync>,
    state: Mutex<TrailingState<T>>,
}

struct TrailingState<T> {
    downstream: Arc<dyn Subscriber<T>>,
    upstream: Option<Arc<dyn Subscription>>,
    demand: u64,
    stashed: Option<T>,
    complete_pending: bool,
    terminated: bool,
}

impl<T: Send + 'static> TrailingDataSubscriber<T> {
    pub fn new(
        downstream: Box<dyn Subscriber<T>>,
        generator: impl Fn() -> Option<T> + Send + Sync + 'static,
    ) -> Self {
        Self {
            inner: Arc::new(TrailingInner {
                generator: Box::new(generator),
                state: Mutex::new(TrailingState {
                    downstream: Arc::from(downstream),
                    upstream: None,
                    demand: 0,
                    stashed: None,
                    complete_pending: false,
                    terminated: false,
                }),
            }),
        }
    }
}

impl<T: Send + 'static> TrailingInner<T> {
    /// Emits the stashed element and the deferred completion once demand
    /// allows. At most one caller wins the stash.
    fn flush_stash(&self) {
        let (item, downstream) = {
            let mut state = self.state.lock();
            if state.terminated || !state.complete_pending {
                return;
            }
            if state.stashed.is_some() && state.demand == 0 {
                return;
            }
            state.terminated = true;
            if state.demand > 0 && state.stashed.is_some() {
                state.demand -= 1;
            }
            (state.stashed.take(), Arc::clone(&state.downstream))
        };
        if let Some(item) = item {
            downstream.on_next(item);
        }
        downstream.on_complete();
    }

    fn terminate(&self, error: FlowError) {
        let downstream = {
            let mut state = self.state.lock();
            if state.terminated {
                return;
            }
            state.terminated = true;
            state.stashed = None;
            state.upstream = None;
            Arc::clone(&state.downstream)
        };
        downstream.on_error(error);
    }
}

impl<T: Send + 'static> Subscriber<T> for TrailingDataSubscriber<T> {
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
        let downstream = {
            let mut state = self.inner.state.lock();
            state.upstream = Some(subscription);
            Arc::clone(&state.downstream)
        };
        downstream.on_subscribe(Arc::new(TrailingSubscription {
            inner: Arc::clone(&self.inner),
        }));
    }

    fn on_next(&self, item: T) {
        let downstream = {
            let mut state = self.inner.state.lock();
            if state.terminated {
                return;
            }
            state.demand = state.demand.saturating_sub(1);
            Arc::clone(&state.downstream)
        };
        downstream.on_next(item);
    }

    fn on_complete(&self) {
        {
            let mut state = self.inner.state.lock();
            if state.terminated || state.complete_pending {
                return;
            }
            state.complete_pending = true;
            state.upstream = None;
            state.stashed = (self.inner.generator)();
        }
        self.inner.flush_stash();
    }

    fn on_error(&self, error: FlowError) {
        self.inner.terminate(error);
    }
}

struct TrailingSubscription<T> {
    inner: Arc<TrailingInner<T>>,
}

impl<T: Send + 'static> Subscription for TrailingSubscription<T> {
    fn request(&self, n: u64) {
        if n == 0 {
            let upstream = {
                let mut state = self.inner.state.lock();
                if state.terminated {
                    return;
                }
                state.upstream.take()
            };
            if let Some(upstream) = upstream {
                upstream.cancel();
            }
            self.inner.terminate(FlowError::InvalidDemand);
            return;
        }
        let upstream = {
            let mut state = self.inner.state.lock();
            if state.terminated {
                return;
            }
            state.demand = state.demand.saturating_add(n);
            state.upstream.clone()
        };
        // Pass the request through: upstream and downstream share element
        // granularity here.
        if let Some(upstream) = upstream {
            upstream.request(n);
        }
        self.inner.flush_stash();
    }

    fn cancel(&self) {
        let upstream = {
            let mut state = self.inner.state.lock();
            if state.terminated {
                return;
            }
            state.terminated = true;
            state.stashed = None;
            state.upstream.take()
        };
        if let Some(upstream) = upstream {
            upstream.cancel();
        }
    }
}
