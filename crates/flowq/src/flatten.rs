//! Group-to-element granularity transform.

use crate::error::FlowError;
use crate::invariants::debug_assert_demand_charged;
use crate::traits::{Subscriber, Subscription};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

/// Splits inbound groups into individual elements for the downstream
/// subscriber.
///
/// Upstream demand is requested one group at a time, and only once the
/// current group's elements are exhausted while downstream still has credit
/// outstanding. Downstream demand is tracked per element. Upstream completion
/// is deferred until every buffered element has been forwarded.
#[derive(Clone)]
pub struct FlatteningSubscriber<T> {
    inner: Arc<FlattenInner<T>>,
}

struct FlattenInner<T> {
    state: Mutex<FlattenState<T>>,
}

struct FlattenState<T> {
    downstream: Arc<dyn Subscriber<T>>,
    upstream: Option<Arc<dyn Subscription>>,
    buffer: VecDeque<T>,
    demand: u64,
    group_requested: bool,
    upstream_done: bool,
    terminated: bool,
    delivering: bool,
}

enum Step<T> {
    Emit(T, Arc<dyn Subscriber<T>>),
    Complete(Arc<dyn Subscriber<T>>),
    RequestGroup(Arc<dyn Subscription>),
    Idle,
}

impl<T: Send + 'static> FlatteningSubscriber<T> {
    pub fn new(downstream: Box<dyn Subscriber<T>>) -> Self {
        Self {
            inner: Arc::new(FlattenInner {
                state: Mutex::new(FlattenState {
                    downstream: Arc::from(downstream),
                    upstream: None,
                    buffer: VecDeque::new(),
                    demand: 0,
                    group_requested: false,
                    upstream_done: false,
                    terminated: false,
                    delivering: false,
                }),
            }),
        }
    }
}

impl<T: Send + 'static> FlattenInner<T> {
    /// Single-owner delivery loop; competing callers deposit state changes
    /// and leave.
    fn drive(&self) {
        loop {
            {
                let mut state = self.state.lock();
                if state.delivering || state.terminated {
                    return;
                }
                state.delivering = true;
            }
            self.drain();
            let more = {
                let mut state = self.state.lock();
                state.delivering = false;
                Self::has_ready_work(&state)
            };
            if !more {
                return;
            }
        }
    }

    fn drain(&self) {
        loop {
            let step = {
                let mut state = self.state.lock();
                if state.terminated {
                    Step::Idle
                } else if state.demand > 0 && !state.buffer.is_empty() {
                    debug_assert_demand_charged!(state.demand);
                    state.demand -= 1;
                    match state.buffer.pop_front() {
                        Some(item) => Step::Emit(item, Arc::clone(&state.downstream)),
                        None => Step::Idle,
                    }
                } else if state.buffer.is_empty() && state.upstream_done {
                    state.terminated = true;
                    Step::Complete(Arc::clone(&state.downstream))
                } else if state.demand > 0
                    && !state.group_requested
                    && !state.upstream_done
                {
                    state.group_requested = true;
                    match state.upstream.clone() {
                        Some(upstream) => Step::RequestGroup(upstream),
                        None => Step::Idle,
                    }
                } else {
                    Step::Idle
                }
            };
            match step {
                Step::Emit(item, downstream) => downstream.on_next(item),
                Step::Complete(downstream) => {
                    downstream.on_complete();
                    return;
                }
                // The upstream may deliver the next group synchronously; its
                // on_next only buffers and re-enters drive, which bails out on
                // the delivering flag, so the loop here picks the group up.
                Step::RequestGroup(upstream) => upstream.request(1),
                Step::Idle => return,
            }
        }
    }

    fn has_ready_work(state: &FlattenState<T>) -> bool {
        if state.terminated {
            return false;
        }
        (state.demand > 0 && !state.buffer.is_empty())
            || (state.buffer.is_empty() && state.upstream_done)
            || (state.demand > 0 && !state.group_requested && !state.upstream_done)
    }

    fn terminate(&self, error: FlowError) {
        let downstream = {
            let mut state = self.state.lock();
            if state.terminated {
                return;
            }
            state.terminated = true;
            state.buffer.clear();
            state.upstream = None;
            Arc::clone(&state.downstream)
        };
        downstream.on_error(error);
    }
}

impl<T: Send + 'static> Subscriber<Vec<T>> for FlatteningSubscriber<T> {
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
        let downstream = {
            let mut state = self.inner.state.lock();
            state.upstream = Some(subscription);
            Arc::clone(&state.downstream)
        };
        downstream.on_subscribe(Arc::new(FlattenSubscription {
            inner: Arc::clone(&self.inner),
        }));
    }

    fn on_next(&self, group: Vec<T>) {
        {
            let mut state = self.inner.state.lock();
            if state.terminated {
                return;
            }
            state.group_requested = false;
            state.buffer.extend(group);
        }
        self.inner.drive();
    }

    fn on_complete(&self) {
        {
            let mut state = self.inner.state.lock();
            if state.terminated {
                return;
            }
            state.upstream_done = true;
            state.upstream = None;
        }
        self.inner.drive();
    }

    fn on_error(&self, error: FlowError) {
        self.inner.terminate(error);
    }
}

struct FlattenSubscription<T> {
    inner: Arc<FlattenInner<T>>,
}

impl<T: Send + 'static> Subscription for FlattenSubscription<T> {
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
        {
            let mut state = self.inner.state.lock();
            if state.terminated {
                return;
            }
            state.demand = state.demand.saturating_add(n);
        }
        self.inner.drive();
    }

    fn cancel(&self) {
        let upstream = {
            let mut state = self.inner.state.lock();
            if state.terminated {
                return;
            }
            state.terminated = true;
            state.buffer.clear();
            state.upstream.take()
        };
        if let Some(upstream) = upstream {
            upstream.cancel();
        }
    }
}
