//! Blocking `Write` view feeding a demand-driven subscriber.

use crate::emitter::Emitter;
use bytes::{Bytes, BytesMut};
use flowq::{FlowError, Publisher, Subscriber};
use std::io;
use tracing::{debug, trace};

/// Exposes a blocking [`std::io::Write`] whose bytes are published to a
/// single demand-driven subscriber.
///
/// Writes accumulate in a fixed-size buffer; a full buffer (or an explicit
/// `flush`/[`close`]) is handed to the internal [`Emitter`] and the calling
/// thread blocks on the delivery handle. That one mechanism yields every
/// blocking behavior required here: a flush issued before any subscriber has
/// attached blocks until subscription, a flush issued against an
/// uninterested subscriber blocks until demand arrives, and downstream
/// cancellation resolves the handle exceptionally so an in-progress write
/// unblocks with an error instead of hanging.
///
/// [`close`] flushes the remainder and delivers `Complete`. Writes after
/// `close` or after cancellation fail with a state-specific error.
///
/// [`close`]: StreamWriter::close
pub struct StreamWriter {
    emitter: Emitter<Bytes>,
    buffer: BytesMut,
    buffer_size: usize,
    state: WriterState,
}

#[derive(Debug)]
enum WriterState {
    Open,
    Closed,
    Failed(FlowError),
}

impl StreamWriter {
    /// Default accumulation buffer size.
    pub const DEFAULT_BUFFER_SIZE: usize = 16 * 1024;

    pub fn new() -> Self {
        Self::with_buffer_size(Self::DEFAULT_BUFFER_SIZE)
    }

    /// # Panics
    ///
    /// Panics if `buffer_size` is zero.
    pub fn with_buffer_size(buffer_size: usize) -> Self {
        assert!(buffer_size > 0, "buffer size must be positive");
        Self {
            emitter: Emitter::new(),
            buffer: BytesMut::with_capacity(buffer_size),
            buffer_size,
            state: WriterState::Open,
        }
    }

    /// Flushes buffered bytes and delivers `Complete` downstream, blocking
    /// until both have been received. Idempotent once successful.
    pub fn close(&mut self) -> io::Result<()> {
        match &self.state {
            WriterState::Closed => return Ok(()),
            WriterState::Failed(error) => return Err(error.clone().into()),
            WriterState::Open => {}
        }
        self.flush_buffer()?;
        debug!("closing stream writer");
        match self.emitter.complete().blocking_wait() {
            Ok(()) => {
                self.state = WriterState::Closed;
                Ok(())
            }
            Err(error) => {
                self.state = WriterState::Failed(error.clone());
                Err(error.into())
            }
        }
    }

    fn ensure_open(&self) -> io::Result<()> {
        match &self.state {
            WriterState::Open => Ok(()),
            WriterState::Closed => Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "writer is closed",
            )),
            WriterState::Failed(error) => Err(error.clone().into()),
        }
    }

    /// Hands the accumulated bytes to the emitter and blocks until the
    /// subscriber receives them.
    fn flush_buffer(&mut self) -> io::Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let chunk = self.buffer.split().freeze();
        trace!(bytes = chunk.len(), "flushing buffered bytes");
        match self.emitter.send(chunk).blocking_wait() {
            Ok(()) => Ok(()),
            Err(error) => {
                self.state = WriterState::Failed(error.clone());
                Err(error.into())
            }
        }
    }
}

impl Default for StreamWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl io::Write for StreamWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.ensure_open()?;
        if buf.is_empty() {
            return Ok(0);
        }
        let room = self.buffer_size - self.buffer.len();
        let n = room.min(buf.len());
        self.buffer.extend_from_slice(&buf[..n]);
        if self.buffer.len() == self.buffer_size {
            self.flush_buffer()?;
        }
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.ensure_open()?;
        self.flush_buffer()
    }
}

impl Publisher<Bytes> for StreamWriter {
    fn subscribe(&self, subscriber: Box<dyn Subscriber<Bytes>>) {
        self.emitter.subscribe(subscriber);
    }
}

impl Drop for StreamWriter {
    fn drop(&mut self) {
        if matches!(self.state, WriterState::Open) {
            // Best-effort completion without blocking: queue the remainder
            // and the terminal; an attached subscriber will still observe
            // them in order.
            if !self.buffer.is_empty() {
                let chunk = self.buffer.split().freeze();
                drop(self.emitter.send(chunk));
            }
            drop(self.emitter.complete());
        }
    }
}
