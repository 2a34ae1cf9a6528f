//! Demand-driven adapter over a synchronous iterator.

use crate::error::FlowError;
use crate::traits::{NoopSubscription, Publisher, Subscriber, Subscription};
use parking_lot::Mutex;
use std::iter::Peekable;
use std::sync::Arc;
use tracing::warn;

/// Publishes the elements of an iterator, pulling one element per credit.
///
/// The iterator yields `Option<T>` so that null-capable sources can be
/// adapted: `Some(item)` emits an element, a `None` mid-sequence is a
/// protocol violation that terminates the link with
/// [`FlowError::AbsentElement`] after the elements already produced. Plain
/// iterators are adapted with [`from_items`].
///
/// Delivery is synchronous with the consumer's `request` calls; an empty
/// iterator completes immediately upon subscription, before any demand is
/// signaled. Reentrant `request` calls from inside `on_next` are safe: the
/// drain loop is owned by one caller at a time and picks up accumulated
/// demand.
///
/// [`from_items`]: IterPublisher::from_items
pub struct IterPublisher<I: Iterator> {
    // Taken by the first subscriber; a later subscribe finds None.
    iter: Mutex<Option<I>>,
}

impl<T, I> IterPublisher<I>
where
    T: Send + 'static,
    I: Iterator<Item = Option<T>> + Send + 'static,
{
    pub fn new(iter: I) -> Self {
        Self {
            iter: Mutex::new(Some(iter)),
        }
    }
}

impl<T: Send + 'static> IterPublisher<std::iter::Map<std::vec::IntoIter<T>, fn(T) -> Option<T>>> {
    /// Adapts an infallible collection of items.
    pub fn from_items(items: impl IntoIterator<Item = T>) -> Self {
        let items: Vec<T> = items.into_iter().collect();
        Self::new(items.into_iter().map(Some as fn(T) -> Option<T>))
    }
}

impl<T, I> Publisher<T> for IterPublisher<I>
where
    T: Send + 'static,
    I: Iterator<Item = Option<T>> + Send + 'static,
{
    fn subscribe(&self, subscriber: Box<dyn Subscriber<T>>) {
        let Some(iter) = self.iter.lock().take() else {
            subscriber.on_subscribe(Arc::new(NoopSubscription));
            subscriber.on_error(FlowError::AlreadySubscribed);
            return;
        };

        let subscriber: Arc<dyn Subscriber<T>> = Arc::from(subscriber);
        let subscription = Arc::new(IterSubscription {
            state: Mutex::new(IterDrive {
                iter: iter.peekable(),
                subscriber: Arc::clone(&subscriber),
                demand: 0,
                draining: false,
                done: false,
            }),
        });
        subscriber.on_subscribe(subscription.clone());

        // Empty sources complete without waiting for demand. The subscriber
        // may already have drained everything from within on_subscribe.
        let complete_now = {
            let mut state = subscription.state.lock();
            if !state.done && state.iter.peek().is_none() {
                state.done = true;
                true
            } else {
                false
            }
        };
        if complete_now {
            subscriber.on_complete();
        }
    }
}

struct IterSubscription<I: Iterator<Item = Option<T>>, T> {
    state: Mutex<IterDrive<I, T>>,
}

struct IterDrive<I: Iterator<Item = Option<T>>, T> {
    iter: Peekable<I>,
    subscriber: Arc<dyn Subscriber<T>>,
    demand: u64,
    draining: bool,
    done: bool,
}

enum Step<T> {
    Emit(T, Arc<dyn Subscriber<T>>),
    Complete(Arc<dyn Subscriber<T>>),
    Absent(Arc<dyn Subscriber<T>>),
    Idle,
}

impl<T, I> IterSubscription<I, T>
where
    T: Send + 'static,
    I: Iterator<Item = Option<T>> + Send + 'static,
{
    /// Single-owner drain: the first caller pulls elements while demand
    /// lasts; concurrent or reentrant callers only deposit demand and leave.
    fn drive(&self) {
        loop {
            {
                let mut state = self.state.lock();
                if state.draining || state.done {
                    return;
                }
                state.draining = true;
            }
            self.drain();
            let more = {
                let mut state = self.state.lock();
                state.draining = false;
                !state.done && state.demand > 0
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
                if state.done || state.demand == 0 {
                    Step::Idle
                } else {
                    match state.iter.next() {
                        Some(Some(item)) => {
                            state.demand -= 1;
                            Step::Emit(item, Arc::clone(&state.subscriber))
                        }
                        Some(None) => {
                            state.done = true;
                            Step::Absent(Arc::clone(&state.subscriber))
                        }
                        None => {
                            state.done = true;
                            Step::Complete(Arc::clone(&state.subscriber))
                        }
                    }
                }
            };
            match step {
                Step::Emit(item, subscriber) => subscriber.on_next(item),
                Step::Complete(subscriber) => {
                    subscriber.on_complete();
                    return;
                }
                Step::Absent(subscriber) => {
                    warn!("iterator returned an absent element; failing the link");
                    subscriber.on_error(FlowError::AbsentElement);
                    return;
                }
                Step::Idle => return,
            }
        }
    }

    fn fail(&self, error: FlowError) {
        let subscriber = {
            let mut state = self.state.lock();
            if state.done {
                return;
            }
            state.done = true;
            Arc::clone(&state.subscriber)
        };
        subscriber.on_error(error);
    }
}

impl<T, I> Subscription for IterSubscription<I, T>
where
    T: Send + 'static,
    I: Iterator<Item = Option<T>> + Send + 'static,
{
    fn request(&self, n: u64) {
        if n == 0 {
            self.fail(FlowError::InvalidDemand);
            return;
        }
        {
            let mut state = self.state.lock();
            if state.done {
                return;
            }
            state.demand = state.demand.saturating_add(n);
        }
        self.drive();
    }

    fn cancel(&self) {
        let mut state = self.state.lock();
        state.done = true;
        state.demand = 0;
    }
}
