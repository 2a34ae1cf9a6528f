//! Blocking `Read` view over an asynchronous byte publisher.

use bytes::Bytes;
use flowq::{ByteStoringSubscriber, FlowError, Publisher};
use std::io;
use tracing::debug;

/// Exposes a demand-driven byte publisher as a blocking [`std::io::Read`].
///
/// Internally runs a [`ByteStoringSubscriber`], so upstream is paced by the
/// store's byte capacity while `read` blocks the calling thread until data,
/// completion or an error is observable. End of stream reads as `Ok(0)`;
/// upstream errors surface as [`io::Error`] values preserving their cause.
///
/// [`close`] cancels the subscription: buffered bytes are dropped, a blocked
/// producer is released, and subsequent reads fail with a cancellation
/// error. Dropping the reader closes it.
///
/// [`close`]: StreamReader::close
pub struct StreamReader {
    store: ByteStoringSubscriber,
    closed: bool,
}

impl StreamReader {
    /// Default byte capacity buffered ahead of the reading thread.
    pub const DEFAULT_CAPACITY: u64 = 256 * 1024;

    /// Subscribes to `publisher` and returns the blocking view, buffering at
    /// most `max_buffered_bytes` ahead of the reader.
    ///
    /// # Panics
    ///
    /// Panics if `max_buffered_bytes` is zero.
    pub fn subscribe_to(publisher: &dyn Publisher<Bytes>, max_buffered_bytes: u64) -> Self {
        let store = ByteStoringSubscriber::new(max_buffered_bytes);
        publisher.subscribe(Box::new(store.clone()));
        Self {
            store,
            closed: false,
        }
    }

    /// Like [`subscribe_to`] with [`DEFAULT_CAPACITY`].
    ///
    /// [`subscribe_to`]: StreamReader::subscribe_to
    /// [`DEFAULT_CAPACITY`]: StreamReader::DEFAULT_CAPACITY
    pub fn new(publisher: &dyn Publisher<Bytes>) -> Self {
        Self::subscribe_to(publisher, Self::DEFAULT_CAPACITY)
    }

    /// Cancels the subscription. Idempotent; subsequent reads fail with a
    /// cancellation error.
    pub fn close(&mut self) {
        if !self.closed {
            debug!("closing stream reader");
            self.closed = true;
            self.store.cancel();
        }
    }
}

impl io::Read for StreamReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.closed {
            return Err(FlowError::Cancelled.into());
        }
        if buf.is_empty() {
            return Ok(0);
        }
        // End of stream with zero bytes is EOF; with data, the next read
        // observes the sticky end of stream and returns Ok(0) itself.
        match self.store.blocking_transfer_to(buf) {
            Ok(transfer) => Ok(transfer.bytes),
            Err(error) => Err(error.into()),
        }
    }
}

impl Drop for StreamReader {
    fn drop(&mut self) {
        self.close();
    }
}
