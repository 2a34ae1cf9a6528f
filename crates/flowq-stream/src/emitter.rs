//! Producer-side emitter: a thread-safe `send`/`complete`/`error` surface
//! feeding one demand-driven subscriber.

use crate::completion::{Completion, CompletionTx};
use crate::invariants::debug_assert_demand_charged;
use flowq::{Demand, FlowError, NoopSubscription, Publisher, Subscriber, Subscription};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::trace;

/// A publisher that callers drive by pushing events into it.
///
/// `send`, `complete` and `error` may be invoked concurrently from any
/// thread; events are delivered to the single subscriber strictly in the
/// order they were accepted, each against one unit of granted demand. Every
/// operation returns a [`Completion`] resolved when the event reaches the
/// subscriber - not when it is queued - so callers can bound their in-flight
/// sends and observe cancellation promptly.
///
/// Events sent before a subscriber attaches are buffered in arrival order
/// and flushed on subscription. The emitter stores an unbounded number of
/// pending events; callers limit in-flight sends to bound memory.
///
/// # Delivery loop
///
/// All state changes are represented as queue entries. A single drain owner
/// is elected with an atomic flag; everyone else deposits an entry and
/// leaves. The owner pops entries with the lock held but always invokes the
/// subscriber with the lock released, so a subscriber that calls `request`
/// reentrantly from `on_next` cannot deadlock - it only deposits demand and
/// bounces off the flag. After releasing the flag the owner re-checks the
/// queues, because new entries may have raced in.
///
/// Cancellation and demand violations travel in a higher-priority lane and
/// overtake buffered events.
pub struct Emitter<T> {
    inner: Arc<EmitterInner<T>>,
}

impl<T> Clone for Emitter<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct EmitterInner<T> {
    demand: Demand,
    processing: AtomicBool,
    state: Mutex<EmitterState<T>>,
}

struct EmitterState<T> {
    queue: VecDeque<Entry<T>>,
    priority: VecDeque<Entry<T>>,
    subscriber: Option<Arc<dyn Subscriber<T>>>,
    subscribed: bool,
    failure: Option<FlowError>,
}

enum Entry<T> {
    Next(T, CompletionTx),
    Complete(CompletionTx),
    Error(FlowError, Option<CompletionTx>),
    Cancel,
}

impl<T> Entry<T> {
    fn take_resolver(self) -> Option<CompletionTx> {
        match self {
            Entry::Next(_, tx) | Entry::Complete(tx) => Some(tx),
            Entry::Error(_, tx) => tx,
            Entry::Cancel => None,
        }
    }
}

enum Decision<T> {
    Process(Entry<T>, Arc<dyn Subscriber<T>>),
    FailEntry(Entry<T>, FlowError),
    Stop,
}

impl<T: Send + 'static> Emitter<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(EmitterInner {
                demand: Demand::new(),
                processing: AtomicBool::new(false),
                state: Mutex::new(EmitterState {
                    queue: VecDeque::new(),
                    priority: VecDeque::new(),
                    subscriber: None,
                    subscribed: false,
                    failure: None,
                }),
            }),
        }
    }

    /// Queues one element for delivery.
    ///
    /// The returned handle resolves once the subscriber has received the
    /// element. It resolves exceptionally if the subscription is cancelled
    /// first, or if `send` was called after [`complete`]/[`error`].
    ///
    /// [`complete`]: Emitter::complete
    /// [`error`]: Emitter::error
    pub fn send(&self, item: T) -> Completion {
        trace!("send queued");
        let (tx, handle) = Completion::pair();
        self.inner.state.lock().queue.push_back(Entry::Next(item, tx));
        self.inner.process();
        handle
    }

    /// Signals successful end of data. In-flight sends queued ahead of this
    /// call are delivered first.
    pub fn complete(&self) -> Completion {
        trace!("complete queued");
        let (tx, handle) = Completion::pair();
        self.inner.state.lock().queue.push_back(Entry::Complete(tx));
        self.inner.process();
        handle
    }

    /// Signals failed end of data. In-flight sends queued ahead of this call
    /// are delivered first.
    pub fn error(&self, error: FlowError) -> Completion {
        trace!(%error, "error queued");
        let (tx, handle) = Completion::pair();
        self.inner
            .state
            .lock()
            .queue
            .push_back(Entry::Error(error, Some(tx)));
        self.inner.process();
        handle
    }
}

impl<T: Send + 'static> Default for Emitter<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + 'static> Publisher<T> for Emitter<T> {
    fn subscribe(&self, subscriber: Box<dyn Subscriber<T>>) {
        let subscriber: Arc<dyn Subscriber<T>> = Arc::from(subscriber);
        let accepted = {
            let mut state = self.inner.state.lock();
            if state.subscribed {
                false
            } else {
                state.subscribed = true;
                true
            }
        };
        if !accepted {
            subscriber.on_subscribe(Arc::new(NoopSubscription));
            subscriber.on_error(FlowError::AlreadySubscribed);
            return;
        }
        subscriber.on_subscribe(Arc::new(EmitterSubscription {
            inner: Arc::clone(&self.inner),
        }));
        // The subscriber becomes visible to the delivery loop only after the
        // handshake returns, so a concurrent producer cannot slip a signal in
        // ahead of on_subscribe.
        self.inner.state.lock().subscriber = Some(subscriber);
        self.inner.process();
    }
}

impl<T: Send + 'static> EmitterInner<T> {
    /// Elect a single drain owner; re-check after handing the flag back
    /// because entries may have arrived while it was held.
    fn process(&self) {
        loop {
            if self
                .processing
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                return;
            }
            self.drain();
            self.processing.store(false, Ordering::Release);
            if !self.has_processable_entry() {
                return;
            }
        }
    }

    fn drain(&self) {
        loop {
            let decision = {
                let mut state = self.state.lock();
                if let Some(failure) = state.failure.clone() {
                    // Terminal: everything still queued resolves
                    // exceptionally, in order, both lanes.
                    match state.priority.pop_front().or_else(|| state.queue.pop_front()) {
                        Some(entry) => Decision::FailEntry(entry, failure),
                        None => Decision::Stop,
                    }
                } else {
                    let Some(subscriber) = state.subscriber.clone() else {
                        return;
                    };
                    if let Some(entry) = state.priority.pop_front() {
                        Decision::Process(entry, subscriber)
                    } else {
                        let can_take = match state.queue.front() {
                            None => false,
                            Some(Entry::Next(..)) => self.demand.current() > 0,
                            Some(_) => true,
                        };
                        if can_take {
                            match state.queue.pop_front() {
                                Some(entry) => Decision::Process(entry, subscriber),
                                None => Decision::Stop,
                            }
                        } else {
                            Decision::Stop
                        }
                    }
                }
            };

            match decision {
                Decision::Stop => return,
                Decision::FailEntry(entry, failure) => {
                    if let Some(tx) = entry.take_resolver() {
                        let _ = tx.send(Err(failure));
                    }
                }
                Decision::Process(entry, subscriber) => match entry {
                    Entry::Next(item, tx) => {
                        debug_assert_demand_charged!(self.demand.current());
                        trace!("delivering element");
                        subscriber.on_next(item);
                        self.demand.try_take_one();
                        let _ = tx.send(Ok(()));
                    }
                    Entry::Complete(tx) => {
                        self.set_failure(FlowError::Terminated);
                        trace!("delivering completion");
                        subscriber.on_complete();
                        let _ = tx.send(Ok(()));
                    }
                    Entry::Error(error, tx) => {
                        self.set_failure(FlowError::Terminated);
                        trace!(%error, "delivering error");
                        subscriber.on_error(error);
                        if let Some(tx) = tx {
                            let _ = tx.send(Ok(()));
                        }
                    }
                    Entry::Cancel => {
                        trace!("cancelling link");
                        let mut state = self.state.lock();
                        if state.failure.is_none() {
                            state.failure = Some(FlowError::Cancelled);
                        }
                        // Drop the subscriber reference; the link is dead.
                        state.subscriber = None;
                    }
                },
            }
        }
    }

    fn set_failure(&self, failure: FlowError) {
        let mut state = self.state.lock();
        if state.failure.is_none() {
            state.failure = Some(failure);
        }
    }

    fn has_processable_entry(&self) -> bool {
        let state = self.state.lock();
        if state.failure.is_some() {
            return !state.priority.is_empty() || !state.queue.is_empty();
        }
        if state.subscriber.is_none() {
            return false;
        }
        if !state.priority.is_empty() {
            return true;
        }
        match state.queue.front() {
            None => false,
            Some(Entry::Next(..)) => self.demand.current() > 0,
            Some(_) => true,
        }
    }
}

struct EmitterSubscription<T> {
    inner: Arc<EmitterInner<T>>,
}

impl<T: Send + 'static> Subscription for EmitterSubscription<T> {
    fn request(&self, n: u64) {
        if n == 0 {
            trace!("zero demand requested; failing the link");
            self.inner
                .state
                .lock()
                .priority
                .push_back(Entry::Error(FlowError::InvalidDemand, None));
            self.inner.process();
            return;
        }
        let new_demand = self.inner.demand.add(n);
        trace!(new_demand, "demand increased");
        self.inner.process();
    }

    fn cancel(&self) {
        trace!("cancel requested");
        self.inner.state.lock().priority.push_back(Entry::Cancel);
        self.inner.process();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

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

        fn cancel(&self) {
            let subscription = self.subscription.lock().clone();
            subscription.expect("not subscribed").cancel();
        }

        fn seen(&self) -> Vec<String> {
            self.events.lock().clone()
        }
    }

    impl Subscriber<u32> for Collect {
        fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
            *self.subscription.lock() = Some(subscription);
        }
        fn on_next(&self, item: u32) {
            self.events.lock().push(format!("next:{item}"));
        }
        fn on_complete(&self) {
            self.events.lock().push("complete".into());
        }
        fn on_error(&self, error: FlowError) {
            self.events.lock().push(format!("error:{error}"));
        }
    }

    #[test]
    fn events_sent_before_subscription_flush_in_order() {
        let emitter = Emitter::new();
        let send_handle = emitter.send(5);
        let complete_handle = emitter.complete();

        let collect = Collect::default();
        emitter.subscribe(Box::new(collect.clone()));
        assert!(collect.seen().is_empty());

        collect.request(1);
        assert_eq!(collect.seen(), ["next:5", "complete"]);
        assert!(send_handle.blocking_wait().is_ok());
        assert!(complete_handle.blocking_wait().is_ok());
    }

    #[test]
    fn elements_wait_for_demand() {
        let emitter = Emitter::new();
        let collect = Collect::default();
        emitter.subscribe(Box::new(collect.clone()));

        emitter.send(1);
        emitter.send(2);
        assert!(collect.seen().is_empty());

        collect.request(1);
        assert_eq!(collect.seen(), ["next:1"]);
        collect.request(5);
        assert_eq!(collect.seen(), ["next:1", "next:2"]);
    }

    #[test]
    fn send_after_terminal_fails_without_delivery() {
        let emitter = Emitter::new();
        let collect = Collect::default();
        emitter.subscribe(Box::new(collect.clone()));
        collect.request(u64::MAX);

        emitter.send(1).blocking_wait().unwrap();
        emitter.complete().blocking_wait().unwrap();

        let late = emitter.send(2);
        assert!(matches!(
            late.blocking_wait(),
            Err(FlowError::Terminated)
        ));
        let late_complete = emitter.complete();
        assert!(matches!(
            late_complete.blocking_wait(),
            Err(FlowError::Terminated)
        ));
        assert_eq!(collect.seen(), ["next:1", "complete"]);
    }

    #[test]
    fn cancel_resolves_pending_handles_exceptionally() {
        let emitter = Emitter::new();
        let collect = Collect::default();
        emitter.subscribe(Box::new(collect.clone()));
        collect.request(1);

        let delivered = emitter.send(1);
        let pending = emitter.send(2);
        assert!(delivered.blocking_wait().is_ok());

        collect.cancel();
        assert!(matches!(
            pending.blocking_wait(),
            Err(FlowError::Cancelled)
        ));
        // No terminal event is delivered to the subscriber on cancel.
        assert_eq!(collect.seen(), ["next:1"]);
    }

    #[test]
    fn cancel_is_idempotent() {
        let emitter = Emitter::<u32>::new();
        let collect = Collect::default();
        emitter.subscribe(Box::new(collect.clone()));

        collect.cancel();
        collect.cancel();
        let handle = emitter.send(1);
        assert!(matches!(handle.blocking_wait(), Err(FlowError::Cancelled)));
    }

    #[test]
    fn zero_demand_fails_link_and_pending_sends() {
        let emitter = Emitter::new();
        let collect = Collect::default();
        emitter.subscribe(Box::new(collect.clone()));

        let pending = emitter.send(1);
        collect.request(0);

        assert_eq!(
            collect.seen(),
            [format!("error:{}", FlowError::InvalidDemand)]
        );
        assert!(matches!(
            pending.blocking_wait(),
            Err(FlowError::Terminated)
        ));
    }

    #[test]
    fn error_event_reaches_subscriber_after_buffered_sends() {
        let emitter = Emitter::new();
        let collect = Collect::default();
        emitter.subscribe(Box::new(collect.clone()));
        collect.request(u64::MAX);

        emitter.send(7).blocking_wait().unwrap();
        let handle = emitter.error(FlowError::upstream(std::fmt::Error));
        assert!(handle.blocking_wait().is_ok());
        assert_eq!(collect.seen().len(), 2);
        assert!(collect.seen()[1].starts_with("error:"));
    }

    #[test]
    fn second_subscriber_is_refused() {
        let emitter = Emitter::<u32>::new();
        let first = Collect::default();
        let second = Collect::default();
        emitter.subscribe(Box::new(first.clone()));
        emitter.subscribe(Box::new(second.clone()));

        assert!(first.seen().is_empty());
        assert_eq!(
            second.seen(),
            [format!("error:{}", FlowError::AlreadySubscribed)]
        );
    }

    #[test]
    fn concurrent_sends_deliver_serialized_and_complete() {
        let emitter = Emitter::new();
        let collect = Collect::default();
        emitter.subscribe(Box::new(collect.clone()));
        collect.request(u64::MAX);

        let handles: Vec<_> = (0..8u32)
            .map(|t| {
                let emitter = emitter.clone();
                std::thread::spawn(move || {
                    for i in 0..100u32 {
                        emitter.send(t * 1000 + i).blocking_wait().unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        emitter.complete().blocking_wait().unwrap();

        let seen = collect.seen();
        assert_eq!(seen.len(), 801);
        assert_eq!(seen.last().map(String::as_str), Some("complete"));

        // Per-thread order is preserved even though threads interleave.
        for t in 0..8u32 {
            let of_thread: Vec<_> = seen
                .iter()
                .filter(|s| {
                    s.strip_prefix("next:")
                        .and_then(|v| v.parse::<u32>().ok())
                        .is_some_and(|v| v / 1000 == t)
                })
                .cloned()
                .collect();
            assert_eq!(of_thread.len(), 100);
            let mut last = None;
            for event in of_thread {
                let value: u32 = event.strip_prefix("next:").unwrap().parse().unwrap();
                if let Some(previous) = last {
                    assert!(value > previous);
                }
                last = Some(value);
            }
        }
    }
}
