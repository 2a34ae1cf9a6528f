//! Byte-granularity store with partial-region consumption and blocking
//! transfer.

use crate::error::FlowError;
use crate::traits::{LinkState, Subscriber, Subscription};
use bytes::{Buf, Bytes};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::debug;

/// Outcome kind of a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferResult {
    /// The destination was filled or the buffered data was exhausted without
    /// reaching a terminal signal. More data may still arrive.
    Success,
    /// Upstream completed and every buffered byte has been drained; no more
    /// data will ever arrive.
    EndOfStream,
}

/// Result of a single transfer call.
#[derive(Debug, Clone, Copy)]
pub struct Transfer {
    /// Whether the stream can still produce data.
    pub result: TransferResult,
    /// Bytes copied into the destination by this call.
    pub bytes: usize,
}

/// Stores upstream byte regions against a capacity expressed in bytes and
/// hands them to a consumer with byte granularity.
///
/// Regions are [`Bytes`] values: a region partially consumed by one transfer
/// is advanced in place, so splitting across reads copies nothing beyond the
/// bytes moved into the destination.
///
/// Capacity is a request-cadence bound, not a hard limit: a region accepted
/// just as capacity frees up may push the buffered total past `max_bytes`,
/// but no new upstream request is issued until the total falls back below it.
/// Exactly one region is requested per state change that leaves the store
/// below capacity — never an amount proportional to the bytes drained.
#[derive(Clone)]
pub struct ByteStoringSubscriber {
    inner: Arc<ByteStoreInner>,
}

struct ByteStoreInner {
    max_bytes: u64,
    state: Mutex<ByteStoreState>,
    data_ready: Condvar,
}

struct ByteStoreState {
    regions: VecDeque<Bytes>,
    buffered: u64,
    terminal: Option<Terminal>,
    subscription: Option<Arc<dyn Subscription>>,
    link: LinkState,
}

enum Terminal {
    Complete,
    Error(FlowError),
}

impl ByteStoringSubscriber {
    /// Creates a store that keeps requesting upstream data while fewer than
    /// `max_bytes` are buffered. `u64::MAX` acts as the unbounded sentinel.
    ///
    /// # Panics
    ///
    /// Panics if `max_bytes` is zero.
    pub fn new(max_bytes: u64) -> Self {
        assert!(max_bytes > 0, "capacity must be positive");
        Self {
            inner: Arc::new(ByteStoreInner {
                max_bytes,
                state: Mutex::new(ByteStoreState {
                    regions: VecDeque::new(),
                    buffered: 0,
                    terminal: None,
                    subscription: None,
                    link: LinkState::Unsubscribed,
                }),
                data_ready: Condvar::new(),
            }),
        }
    }

    /// Copies as many buffered bytes as fit into `dst`. Non-blocking.
    ///
    /// Returns [`TransferResult::EndOfStream`] in the same call that drains
    /// the final buffered byte after upstream completion — never one call
    /// behind. A stored upstream error is returned as `Err` once all data
    /// buffered ahead of it has been drained; the bytes copied before the
    /// error stay in `dst`.
    pub fn transfer_to(&self, dst: &mut [u8]) -> Result<Transfer, FlowError> {
        let (outcome, request_from) = {
            let mut state = self.inner.state.lock();
            Self::transfer_locked(&mut state, self.inner.max_bytes, dst)
        };
        // request() may synchronously deliver on_next, which takes the lock.
        if let Some(subscription) = request_from {
            subscription.request(1);
        }
        outcome
    }

    /// Like [`transfer_to`], but blocks the calling thread until at least one
    /// byte is transferred, the destination is zero-length, or a terminal
    /// signal is observed.
    ///
    /// A concurrent [`cancel`] wakes the blocked thread, which returns
    /// [`FlowError::Cancelled`].
    ///
    /// [`transfer_to`]: ByteStoringSubscriber::transfer_to
    /// [`cancel`]: ByteStoringSubscriber::cancel
    pub fn blocking_transfer_to(&self, dst: &mut [u8]) -> Result<Transfer, FlowError> {
        let mut state = self.inner.state.lock();
        loop {
            let (outcome, request_from) =
                Self::transfer_locked(&mut state, self.inner.max_bytes, dst);
            let pending = matches!(
                &outcome,
                Ok(transfer)
                    if transfer.bytes == 0
                        && transfer.result == TransferResult::Success
                        && !dst.is_empty()
            );
            if !pending {
                drop(state);
                if let Some(subscription) = request_from {
                    subscription.request(1);
                }
                return outcome;
            }
            self.inner.data_ready.wait(&mut state);
        }
    }

    /// Cancels the upstream subscription, drops buffered regions and wakes
    /// blocked transfers. Idempotent.
    pub fn cancel(&self) {
        let subscription = {
            let mut state = self.inner.state.lock();
            if state.link.is_terminal() {
                return;
            }
            state.link = LinkState::Cancelled;
            state.regions.clear();
            state.buffered = 0;
            let subscription = state.subscription.take();
            self.inner.data_ready.notify_all();
            subscription
        };
        if let Some(subscription) = subscription {
            subscription.cancel();
        }
    }

    /// Bytes currently buffered and not yet transferred.
    pub fn buffered_bytes(&self) -> u64 {
        self.inner.state.lock().buffered
    }

    /// Copies into `dst` and decides the outcome plus whether one more
    /// upstream region should be requested. Runs with the state lock held;
    /// the returned subscription must be driven after the lock is released.
    fn transfer_locked(
        state: &mut ByteStoreState,
        max_bytes: u64,
        dst: &mut [u8],
    ) -> (Result<Transfer, FlowError>, Option<Arc<dyn Subscription>>) {
        if state.link == LinkState::Cancelled {
            return (Err(FlowError::Cancelled), None);
        }

        let mut copied = 0;
        while copied < dst.len() {
            let Some(front) = state.regions.front_mut() else {
                break;
            };
            if front.is_empty() {
                state.regions.pop_front();
                continue;
            }
            let n = front.len().min(dst.len() - copied);
            dst[copied..copied + n].copy_from_slice(&front[..n]);
            if n == front.len() {
                state.regions.pop_front();
            } else {
                front.advance(n);
            }
            state.buffered -= n as u64;
            copied += n;
        }
        // Trailing empty regions must not hide a terminal signal behind a
        // full destination.
        while state.regions.front().is_some_and(Bytes::is_empty) {
            state.regions.pop_front();
        }

        let outcome = if state.regions.is_empty() {
            match &state.terminal {
                Some(Terminal::Error(error)) => Err(error.clone()),
                Some(Terminal::Complete) => Ok(Transfer {
                    result: TransferResult::EndOfStream,
                    bytes: copied,
                }),
                None => Ok(Transfer {
                    result: TransferResult::Success,
                    bytes: copied,
                }),
            }
        } else {
            Ok(Transfer {
                result: TransferResult::Success,
                bytes: copied,
            })
        };

        let request_from = if copied > 0
            && state.buffered < max_bytes
            && state.link == LinkState::Active
        {
            state.subscription.clone()
        } else {
            None
        };
        (outcome, request_from)
    }
}

impl Subscriber<Bytes> for ByteStoringSubscriber {
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
            subscription.request(1);
        } else {
            subscription.cancel();
        }
    }

    fn on_next(&self, region: Bytes) {
        let request_from = {
            let mut state = self.inner.state.lock();
            if state.link != LinkState::Active {
                return;
            }
            state.buffered += region.len() as u64;
            state.regions.push_back(region);
            self.inner.data_ready.notify_all();
            if state.buffered < self.inner.max_bytes {
                state.subscription.clone()
            } else {
                None
            }
        };
        if let Some(subscription) = request_from {
            subscription.request(1);
        }
    }

    fn on_complete(&self) {
        let mut state = self.inner.state.lock();
        if state.link != LinkState::Active {
            return;
        }
        debug!(buffered = state.buffered, "byte store completed");
        state.link = LinkState::Completed;
        state.terminal = Some(Terminal::Complete);
        state.subscription = None;
        self.inner.data_ready.notify_all();
    }

    fn on_error(&self, error: FlowError) {
        let mut state = self.inner.state.lock();
        if state.link != LinkState::Active {
            return;
        }
        debug!(%error, "byte store errored");
        state.link = LinkState::Errored;
        state.terminal = Some(Terminal::Error(error));
        state.subscription = None;
        self.inner.data_ready.notify_all();
    }
}
