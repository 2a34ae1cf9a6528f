//! Byte-coalescing decorators: exact-size chunking and threshold-delayed
//! delegation.

use crate::error::FlowError;
use crate::invariants::debug_assert_demand_charged;
use crate::traits::{Subscriber, Subscription};
use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

/// Coalesces inbound variable-size byte buffers into outbound buffers of an
/// exact target size.
///
/// Only full chunks are forwarded while the stream is live; on upstream
/// completion any partial remainder is flushed before `Complete`. Downstream
/// demand counts chunks; upstream buffers are requested one at a time while a
/// chunk is owed and nothing is ready.
#[derive(Clone)]
pub struct ChunkBufferingSubscriber {
    inner: Arc<ChunkInner>,
}

struct ChunkInner {
    chunk_size: usize,
    state: Mutex<ChunkState>,
}

struct ChunkState {
    downstream: Arc<dyn Subscriber<Bytes>>,
    upstream: Option<Arc<dyn Subscription>>,
    acc: BytesMut,
    ready: VecDeque<Bytes>,
    demand: u64,
    buffer_requested: bool,
    upstream_done: bool,
    terminated: bool,
    delivering: bool,
}

enum Step {
    Emit(Bytes, Arc<dyn Subscriber<Bytes>>),
    Complete(Arc<dyn Subscriber<Bytes>>),
    RequestBuffer(Arc<dyn Subscription>),
    Idle,
}

impl ChunkBufferingSubscriber {
    /// # Panics
    ///
    /// Panics if `chunk_size` is zero.
    pub fn new(downstream: Box<dyn Subscriber<Bytes>>, chunk_size: usize) -> Self {
        assert!(chunk_size > 0, "chunk size must be positive");
        Self {
            inner: Arc::new(ChunkInner {
                chunk_size,
                state: Mutex::new(ChunkState {
                    downstream: Arc::from(downstream),
                    upstream: None,
                    acc: BytesMut::new(),
                    ready: VecDeque::new(),
                    demand: 0,
                    buffer_requested: false,
                    upstream_done: false,
                    terminated: false,
                    delivering: false,
                }),
            }),
        }
    }
}

impl ChunkInner {
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
                } else if state.demand > 0 && !state.ready.is_empty() {
                    debug_assert_demand_charged!(state.demand);
                    state.demand -= 1;
                    match state.ready.pop_front() {
                        Some(chunk) => Step::Emit(chunk, Arc::clone(&state.downstream)),
                        None => Step::Idle,
                    }
                } else if state.ready.is_empty() && state.upstream_done {
                    state.terminated = true;
                    Step::Complete(Arc::clone(&state.downstream))
                } else if state.demand > 0
                    && state.ready.is_empty()
                    && !state.buffer_requested
                    && !state.upstream_done
                {
                    state.buffer_requested = true;
                    match state.upstream.clone() {
                        Some(upstream) => Step::RequestBuffer(upstream),
                        None => Step::Idle,
                    }
                } else {
                    Step::Idle
                }
            };
            match step {
                Step::Emit(chunk, downstream) => downstream.on_next(chunk),
                Step::Complete(downstream) => {
                    downstream.on_complete();
                    return;
                }
                Step::RequestBuffer(upstream) => upstream.request(1),
                Step::Idle => return,
            }
        }
    }

    fn has_ready_work(state: &ChunkState) -> bool {
        if state.terminated {
            return false;
        }
        (state.demand > 0 && !state.ready.is_empty())
            || (state.ready.is_empty() && state.upstream_done)
            || (state.demand > 0
                && state.ready.is_empty()
                && !state.buffer_requested
                && !state.upstream_done)
    }

    fn terminate(&self, error: FlowError) {
        let downstream = {
            let mut state = self.state.lock();
            if state.terminated {
                return;
            }
            state.terminated = true;
            state.acc.clear();
            state.ready.clear();
            state.upstream = None;
            Arc::clone(&state.downstream)
        };
        downstream.on_error(error);
    }
}

impl Subscriber<Bytes> for ChunkBufferingSubscriber {
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
        let downstream = {
            let mut state = self.inner.state.lock();
            state.upstream = Some(subscription);
            Arc::clone(&state.downstream)
        };
        downstream.on_subscribe(Arc::new(ChunkSubscription {
            inner: Arc::clone(&self.inner),
        }));
    }

    fn on_next(&self, buffer: Bytes) {
        {
            let mut state = self.inner.state.lock();
            if state.terminated {
                return;
            }
            state.buffer_requested = false;
            state.acc.extend_from_slice(&buffer);
            while state.acc.len() >= self.inner.chunk_size {
                let chunk = state.acc.split_to(self.inner.chunk_size).freeze();
                state.ready.push_back(chunk);
            }
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
            if !state.acc.is_empty() {
                let remainder = state.acc.split().freeze();
                state.ready.push_back(remainder);
            }
        }
        self.inner.drive();
    }

    fn on_error(&self, error: FlowError) {
        self.inner.terminate(error);
    }
}

struct ChunkSubscription {
    inner: Arc<ChunkInner>,
}

impl Subscription for ChunkSubscription {
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
            state.acc.clear();
            state.ready.clear();
            state.upstream.take()
        };
        if let Some(upstream) = upstream {
            upstream.cancel();
        }
    }
}

/// Holds inbound buffers until the buffered total reaches a trigger
/// threshold, then forwards the original buffers downstream unsliced and in
/// order.
///
/// Useful in front of a delegate that pays a fixed cost per delivery: small
/// writes coalesce into bursts while large writes pass through at once. On
/// upstream completion the remainder is flushed regardless of the threshold.
#[derive(Clone)]
pub struct DelegatingBufferingSubscriber {
    inner: Arc<DelegatingInner>,
}

struct DelegatingInner {
    trigger_bytes: u64,
    state: Mutex<DelegatingState>,
}

struct DelegatingState {
    downstream: Arc<dyn Subscriber<Bytes>>,
    upstream: Option<Arc<dyn Subscription>>,
    held: VecDeque<Bytes>,
    held_bytes: u64,
    flushing: bool,
    demand: u64,
    buffer_requested: bool,
    upstream_done: bool,
    terminated: bool,
    delivering: bool,
}

impl DelegatingBufferingSubscriber {
    /// # Panics
    ///
    /// Panics if `trigger_bytes` is zero.
    pub fn new(downstream: Box<dyn Subscriber<Bytes>>, trigger_bytes: u64) -> Self {
        assert!(trigger_bytes > 0, "trigger threshold must be positive");
        Self {
            inner: Arc::new(DelegatingInner {
                trigger_bytes,
                state: Mutex::new(DelegatingState {
                    downstream: Arc::from(downstream),
                    upstream: None,
                    held: VecDeque::new(),
                    held_bytes: 0,
                    flushing: false,
                    demand: 0,
                    buffer_requested: false,
                    upstream_done: false,
                    terminated: false,
                    delivering: false,
                }),
            }),
        }
    }
}

impl DelegatingInner {
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
                } else if state.demand > 0 && state.flushing && !state.held.is_empty() {
                    debug_assert_demand_charged!(state.demand);
                    state.demand -= 1;
                    match state.held.pop_front() {
                        Some(buffer) => {
                            state.held_bytes -= buffer.len() as u64;
                            if state.held.is_empty() && !state.upstream_done {
                                state.flushing = false;
                            }
                            Step::Emit(buffer, Arc::clone(&state.downstream))
                        }
                        None => Step::Idle,
                    }
                } else if state.upstream_done && state.held.is_empty() {
                    state.terminated = true;
                    Step::Complete(Arc::clone(&state.downstream))
                } else if state.demand > 0
                    && !(state.flushing && !state.held.is_empty())
                    && !state.buffer_requested
                    && !state.upstream_done
                {
                    state.buffer_requested = true;
                    match state.upstream.clone() {
                        Some(upstream) => Step::RequestBuffer(upstream),
                        None => Step::Idle,
                    }
                } else {
                    Step::Idle
                }
            };
            match step {
                Step::Emit(buffer, downstream) => downstream.on_next(buffer),
                Step::Complete(downstream) => {
                    downstream.on_complete();
                    return;
                }
                Step::RequestBuffer(upstream) => upstream.request(1),
                Step::Idle => return,
            }
        }
    }

    fn has_ready_work(state: &DelegatingState) -> bool {
        if state.terminated {
            return false;
        }
        (state.demand > 0 && state.flushing && !state.held.is_empty())
            || (state.upstream_done && state.held.is_empty())
            || (state.demand > 0
                && !(state.flushing && !state.held.is_empty())
                && !state.buffer_requested
                && !state.upstream_done)
    }

    fn terminate(&self, error: FlowError) {
        let downstream = {
            let mut state = self.state.lock();
            if state.terminated {
                return;
            }
            state.terminated = true;
            state.held.clear();
            state.held_bytes = 0;
            state.upstream = None;
            Arc::clone(&state.downstream)
        };
        downstream.on_error(error);
    }
}

impl Subscriber<Bytes> for DelegatingBufferingSubscriber {
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
        let downstream = {
            let mut state = self.inner.state.lock();
            state.upstream = Some(subscription);
            Arc::clone(&state.downstream)
        };
        downstream.on_subscribe(Arc::new(DelegatingSubscription {
            inner: Arc::clone(&self.inner),
        }));
    }

    fn on_next(&self, buffer: Bytes) {
        {
            let mut state = self.inner.state.lock();
            if state.terminated {
                return;
            }
            state.buffer_requested = false;
            state.held_bytes += buffer.len() as u64;
            state.held.push_back(buffer);
            if state.held_bytes >= self.inner.trigger_bytes {
                state.flushing = true;
            }
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
            state.flushing = true;
        }
        self.inner.drive();
    }

    fn on_error(&self, error: FlowError) {
        self.inner.terminate(error);
    }
}

struct DelegatingSubscription {
    inner: Arc<DelegatingInner>,
}

impl Subscription for DelegatingSubscription {
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
            state.held.clear();
            state.held_bytes = 0;
            state.upstream.take()
        };
        if let Some(upstream) = upstream {
            upstream.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iterable::IterPublisher;
    use crate::traits::Publisher;

    #[derive(Clone, Default)]
    struct Collect {
        events: Arc<Mutex<Vec<String>>>,
        subscription: Arc<Mutex<Option<Arc<dyn Subscription>>>>,
    }

    impl Collect {
        fn request(&self, n: u64) {
            let subscription = self.subscription.lock().clone();
            subscription.expect("not subscribed").request(n);
        }

        fn seen(&self) -> Vec<String> {
            self.events.lock().clone()
        }
    }

    impl Subscriber<Bytes> for Collect {
        fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
            *self.subscription.lock() = Some(subscription);
        }
        fn on_next(&self, buffer: Bytes) {
            self.events.lock().push(format!("next:{}", buffer.len()));
        }
        fn on_complete(&self) {
            self.events.lock().push("complete".into());
        }
        fn on_error(&self, error: FlowError) {
            self.events.lock().push(format!("error:{error}"));
        }
    }

    fn bytes_of(len: usize) -> Bytes {
        Bytes::from(vec![b'x'; len])
    }

    #[test]
    fn aligned_buffers_pass_through_as_chunks() {
        let collect = Collect::default();
        let chunker = ChunkBufferingSubscriber::new(Box::new(collect.clone()), 8);
        IterPublisher::from_items(vec![
            bytes_of(8),
            bytes_of(8),
            bytes_of(8),
            bytes_of(8),
        ])
        .subscribe(Box::new(chunker));

        collect.request(u64::MAX);
        assert_eq!(
            collect.seen(),
            ["next:8", "next:8", "next:8", "next:8", "complete"]
        );
    }

    #[test]
    fn small_buffers_coalesce_to_exact_chunks() {
        let collect = Collect::default();
        let chunker = ChunkBufferingSubscriber::new(Box::new(collect.clone()), 8);
        IterPublisher::from_items(vec![bytes_of(3), bytes_of(3), bytes_of(3), bytes_of(3)])
            .subscribe(Box::new(chunker));

        collect.request(u64::MAX);
        // 12 bytes total: one full chunk plus a 4-byte remainder flushed at
        // completion.
        assert_eq!(collect.seen(), ["next:8", "next:4", "complete"]);
    }

    #[test]
    fn oversized_buffer_splits_into_multiple_chunks() {
        let collect = Collect::default();
        let chunker = ChunkBufferingSubscriber::new(Box::new(collect.clone()), 8);
        IterPublisher::from_items(vec![bytes_of(20)]).subscribe(Box::new(chunker));

        collect.request(u64::MAX);
        assert_eq!(collect.seen(), ["next:8", "next:8", "next:4", "complete"]);
    }

    #[test]
    fn empty_stream_completes_without_chunks() {
        let collect = Collect::default();
        let chunker = ChunkBufferingSubscriber::new(Box::new(collect.clone()), 8);
        IterPublisher::from_items(Vec::<Bytes>::new()).subscribe(Box::new(chunker));

        collect.request(1);
        assert_eq!(collect.seen(), ["complete"]);
    }

    #[test]
    #[should_panic(expected = "chunk size must be positive")]
    fn zero_chunk_size_panics() {
        let collect = Collect::default();
        let _ = ChunkBufferingSubscriber::new(Box::new(collect), 0);
    }

    #[test]
    fn delegating_holds_until_threshold() {
        let collect = Collect::default();
        let delegating = DelegatingBufferingSubscriber::new(Box::new(collect.clone()), 10);
        IterPublisher::from_items(vec![bytes_of(4), bytes_of(4), bytes_of(4)])
            .subscribe(Box::new(delegating));

        collect.request(u64::MAX);
        // Nothing below 10 buffered bytes; the third buffer crosses the
        // threshold and the originals come through unsliced.
        assert_eq!(
            collect.seen(),
            ["next:4", "next:4", "next:4", "complete"]
        );
    }

    #[test]
    fn delegating_flushes_remainder_on_complete() {
        let collect = Collect::default();
        let delegating = DelegatingBufferingSubscriber::new(Box::new(collect.clone()), 100);
        IterPublisher::from_items(vec![bytes_of(4), bytes_of(4)])
            .subscribe(Box::new(delegating));

        collect.request(u64::MAX);
        assert_eq!(collect.seen(), ["next:4", "next:4", "complete"]);
    }

    #[test]
    fn delegating_step_by_step_demand() {
        let collect = Collect::default();
        let delegating = DelegatingBufferingSubscriber::new(Box::new(collect.clone()), 6);
        IterPublisher::from_items(vec![bytes_of(4), bytes_of(4), bytes_of(4)])
            .subscribe(Box::new(delegating));

        collect.request(1);
        // First credit pulls buffers until the threshold trips, then emits
        // exactly one held buffer.
        assert_eq!(collect.seen(), ["next:4"]);
        collect.request(1);
        assert_eq!(collect.seen(), ["next:4", "next:4"]);
        collect.request(2);
        assert_eq!(collect.seen(), ["next:4", "next:4", "next:4", "complete"]);
    }
}
