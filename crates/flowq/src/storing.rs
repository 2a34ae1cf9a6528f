//! Fixed-capacity event queue between a push producer and a pull consumer.

use crate::error::FlowError;
use crate::event::Event;
use crate::invariants::debug_assert_bounded_queue;
use crate::traits::{LinkState, Subscriber, Subscription};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

/// A bounded holding area that decouples a push-based producer from a
/// pull-based consumer.
///
/// On subscription it requests one element per free slot; every [`poll`] that
/// frees a slot issues exactly one replacement `request(1)` while the link is
/// active, so the number of in-flight elements never exceeds the capacity for
/// a well-behaved producer.
///
/// The handle is cheap to clone; all clones share the same queue. Producer
/// signals (`on_next`/`on_complete`/`on_error`) and consumer calls
/// ([`poll`]/[`peek_with`]) may interleave arbitrarily from different threads.
///
/// [`poll`]: StoringSubscriber::poll
/// [`peek_with`]: StoringSubscriber::peek_with
#[derive(Clone)]
pub struct StoringSubscriber<T> {
    inner: Arc<StoringInner<T>>,
}

struct StoringInner<T> {
    capacity: usize,
    state: Mutex<StoringState<T>>,
}

struct StoringState<T> {
    events: VecDeque<Event<T>>,
    subscription: Option<Arc<dyn Subscription>>,
    link: LinkState,
}

impl<T: Send + 'static> StoringSubscriber<T> {
    /// Creates a queue holding at most `capacity` elements.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "capacity must be positive");
        Self {
            inner: Arc::new(StoringInner {
                capacity,
                state: Mutex::new(StoringState {
                    events: VecDeque::with_capacity(capacity),
                    subscription: None,
                    link: LinkState::Unsubscribed,
                }),
            }),
        }
    }

    /// Returns the oldest buffered event, or `None` if nothing is buffered.
    ///
    /// Non-blocking. Dequeuing an element frees a slot and issues one
    /// upstream `request(1)` if the link is still active.
    pub fn poll(&self) -> Option<Event<T>> {
        let (event, request_from) = {
            let mut state = self.inner.state.lock();
            let event = state.events.pop_front();
            let request_from = match &event {
                Some(Event::Next(_)) if state.link == LinkState::Active => {
                    state.subscription.clone()
                }
                _ => None,
            };
            (event, request_from)
        };
        // The upstream may deliver synchronously from request(), so the lock
        // must not be held here.
        if let Some(subscription) = request_from {
            subscription.request(1);
        }
        event
    }

    /// Observes the oldest buffered event without consuming it.
    ///
    /// Non-blocking; repeated peeks without an intervening [`poll`] see the
    /// same event. The closure runs under the internal lock, so it must not
    /// call back into this queue.
    ///
    /// [`poll`]: StoringSubscriber::poll
    pub fn peek_with<R>(&self, f: impl FnOnce(Option<&Event<T>>) -> R) -> R {
        let state = self.inner.state.lock();
        f(state.events.front())
    }

    /// Cancels the upstream subscription and drops all buffered events.
    /// Idempotent.
    pub fn cancel(&self) {
        let subscription = {
            let mut state = self.inner.state.lock();
            if state.link.is_terminal() {
                return;
            }
            state.link = LinkState::Cancelled;
            state.events.clear();
            state.subscription.take()
        };
        if let Some(subscription) = subscription {
            subscription.cancel();
        }
    }

    /// Number of buffered events (elements plus a possible terminal).
    pub fn buffered(&self) -> usize {
        self.inner.state.lock().events.len()
    }
}

impl<T: Send + 'static> Subscriber<T> for StoringSubscriber<T> {
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
        let accepted = {
            let mut state = self.inner.state.lock();
            if state.link == LinkState::Unsubscribed {
                state.link = LinkState::Active;
                state.subscription = Some(Arc::clone(&subscription));
                true
            } else {
                false
            }
        };
        if accepted {
            subscription.request(self.inner.capacity as u64);
        } else {
            // A link already exists; refuse the extra one.
            subscription.cancel();
        }
    }

    fn on_next(&self, item: T) {
        let mut state = self.inner.state.lock();
        if state.link != LinkState::Active {
            return;
        }
        state.events.push_back(Event::Next(item));
        debug_assert_bounded_queue!(state.events.len(), self.inner.capacity);
    }

    fn on_complete(&self) {
        let mut state = self.inner.state.lock();
        if state.link != LinkState::Active {
            return;
        }
        state.link = LinkState::Completed;
        state.subscription = None;
        state.events.push_back(Event::Complete);
    }

    fn on_error(&self, error: FlowError) {
        let mut state = self.inner.state.lock();
        if state.link != LinkState::Active {
            return;
        }
        state.link = LinkState::Errored;
        state.subscription = None;
        state.events.push_back(Event::Error(error));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    /// Subscription stub recording cumulative requested demand and cancels.
    #[derive(Default)]
    struct Recording {
        requested: AtomicU64,
        cancelled: AtomicU64,
    }

    impl Subscription for Recording {
        fn request(&self, n: u64) {
            self.requested.fetch_add(n, Ordering::SeqCst);
        }
        fn cancel(&self) {
            self.cancelled.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    #[should_panic(expected = "capacity must be positive")]
    fn zero_capacity_panics() {
        let _ = StoringSubscriber::<u32>::new(0);
    }

    #[test]
    fn subscribe_requests_capacity() {
        let queue = StoringSubscriber::<u32>::new(3);
        let subscription = Arc::new(Recording::default());
        queue.on_subscribe(subscription.clone());
        assert_eq!(subscription.requested.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn poll_requests_one_per_freed_slot() {
        let queue = StoringSubscriber::new(2);
        let subscription = Arc::new(Recording::default());
        queue.on_subscribe(subscription.clone());

        queue.on_next(10);
        queue.on_next(20);
        assert_eq!(subscription.requested.load(Ordering::SeqCst), 2);

        assert!(matches!(queue.poll(), Some(Event::Next(10))));
        assert_eq!(subscription.requested.load(Ordering::SeqCst), 3);
        assert!(matches!(queue.poll(), Some(Event::Next(20))));
        assert_eq!(subscription.requested.load(Ordering::SeqCst), 4);
        assert!(queue.poll().is_none());
    }

    #[test]
    fn no_request_after_terminal() {
        let queue = StoringSubscriber::new(2);
        let subscription = Arc::new(Recording::default());
        queue.on_subscribe(subscription.clone());

        queue.on_next(1);
        queue.on_complete();

        assert!(matches!(queue.poll(), Some(Event::Next(1))));
        assert!(matches!(queue.poll(), Some(Event::Complete)));
        // Only the initial capacity request; nothing for drained slots after
        // completion.
        assert_eq!(subscription.requested.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn peek_does_not_consume() {
        let queue = StoringSubscriber::new(2);
        let subscription = Arc::new(Recording::default());
        queue.on_subscribe(subscription.clone());
        queue.on_next(7);

        for _ in 0..3 {
            let peeked = queue.peek_with(|event| match event {
                Some(Event::Next(value)) => Some(*value),
                _ => None,
            });
            assert_eq!(peeked, Some(7));
        }
        assert_eq!(subscription.requested.load(Ordering::SeqCst), 2);
        assert!(matches!(queue.poll(), Some(Event::Next(7))));
    }

    #[test]
    fn signals_after_terminal_are_dropped() {
        let queue = StoringSubscriber::new(2);
        let subscription = Arc::new(Recording::default());
        queue.on_subscribe(subscription.clone());

        queue.on_complete();
        queue.on_next(99);
        queue.on_error(FlowError::Terminated);

        assert!(matches!(queue.poll(), Some(Event::Complete)));
        assert!(queue.poll().is_none());
    }

    #[test]
    fn cancel_is_idempotent_and_drops_buffer() {
        let queue = StoringSubscriber::new(2);
        let subscription = Arc::new(Recording::default());
        queue.on_subscribe(subscription.clone());
        queue.on_next(1);

        queue.cancel();
        queue.cancel();

        assert_eq!(subscription.cancelled.load(Ordering::SeqCst), 1);
        assert_eq!(queue.buffered(), 0);
        assert!(queue.poll().is_none());
    }

    #[test]
    fn second_subscription_is_cancelled() {
        let queue = StoringSubscriber::<u32>::new(1);
        let first = Arc::new(Recording::default());
        let second = Arc::new(Recording::default());
        queue.on_subscribe(first.clone());
        queue.on_subscribe(second.clone());

        assert_eq!(first.cancelled.load(Ordering::SeqCst), 0);
        assert_eq!(second.cancelled.load(Ordering::SeqCst), 1);
        assert_eq!(second.requested.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn producer_and_consumer_interleave_across_threads() {
        let queue = StoringSubscriber::new(8);
        let subscription = Arc::new(Recording::default());
        queue.on_subscribe(subscription);

        let producer = {
            let queue = queue.clone();
            std::thread::spawn(move || {
                for i in 0..1000u64 {
                    // A real upstream only delivers against granted demand;
                    // stay within the queue's free slots.
                    while queue.buffered() >= 8 {
                        std::thread::yield_now();
                    }
                    queue.on_next(i);
                }
                queue.on_complete();
            })
        };

        let mut received = Vec::new();
        loop {
            match queue.poll() {
                Some(Event::Next(value)) => received.push(value),
                Some(Event::Complete) => break,
                Some(Event::Error(error)) => panic!("unexpected error: {error}"),
                None => std::thread::yield_now(),
            }
        }
        producer.join().unwrap();

        assert_eq!(received.len(), 1000);
        assert!(received.windows(2).all(|w| w[0] < w[1]));
    }
}
