//! The capability interface every adapter composes around.
//!
//! One producer-to-consumer connection (a *link*) is established by handing a
//! [`Subscriber`] to a [`Publisher`]. The publisher calls back with a
//! [`Subscription`] before any other signal; from then on the subscriber pulls
//! with `request` and the publisher pushes at most that many `on_next` calls,
//! ending with exactly one `on_complete` or `on_error`.
//!
//! All methods take `&self`: signals may arrive from event-loop threads while
//! application threads poll, so every implementation synchronizes internally
//! and serializes delivery to its downstream.

use crate::error::FlowError;
use std::sync::Arc;

/// Upstream handle held by a subscriber: demand signaling and cancellation.
pub trait Subscription: Send + Sync {
    /// Grants the producer credit to deliver `n` more elements.
    ///
    /// `n` must be positive. Requesting zero demand is a protocol violation
    /// and terminates the link with [`FlowError::InvalidDemand`].
    /// `u64::MAX` acts as the unbounded sentinel.
    fn request(&self, n: u64);

    /// Cancels the link. Idempotent; safe to call concurrently with in-flight
    /// delivery. Buffered resources are released promptly and pending
    /// producer-side handles resolve exceptionally.
    fn cancel(&self);
}

/// Pull-based consumer of a stream of elements.
pub trait Subscriber<T>: Send + Sync {
    /// First signal on the link; `subscription` is the handle for demand and
    /// cancellation.
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>);

    /// One element, delivered only against previously granted demand.
    fn on_next(&self, item: T);

    /// Normal end of data. Terminal: no further signals follow.
    fn on_complete(&self);

    /// Upstream failure or protocol violation. Terminal.
    fn on_error(&self, error: FlowError);
}

/// Demand-driven source of elements. Each publisher here serves exactly one
/// subscriber; a second `subscribe` receives a no-op subscription followed by
/// [`FlowError::AlreadySubscribed`].
pub trait Publisher<T> {
    fn subscribe(&self, subscriber: Box<dyn Subscriber<T>>);
}

/// A subscription that ignores every signal. Handed to subscribers that
/// attach to an already-taken publisher, so the handshake stays well-formed
/// before the error is delivered.
#[derive(Debug, Default)]
pub struct NoopSubscription;

impl Subscription for NoopSubscription {
    fn request(&self, _n: u64) {}
    fn cancel(&self) {}
}

/// State of one producer-consumer link.
///
/// `Completed`, `Errored` and `Cancelled` are terminal: signals arriving
/// afterwards are dropped without effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// No subscription handshake yet.
    Unsubscribed,
    /// Handshake done; elements may flow.
    Active,
    /// Upstream completed normally.
    Completed,
    /// Upstream failed or a protocol violation occurred.
    Errored,
    /// The consumer cancelled.
    Cancelled,
}

impl LinkState {
    /// Returns `true` once the link can never carry another signal.
    #[inline]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Errored | Self::Cancelled)
    }
}
