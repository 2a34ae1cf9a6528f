//! Publisher that drains a blocking byte source on a caller-managed thread.

use crate::emitter::Emitter;
use bytes::Bytes;
use flowq::{FlowError, Publisher, Subscriber};
use std::io::Read;
use tracing::{debug, trace};

/// Publishes the contents of an externally supplied blocking reader.
///
/// [`drain`] runs on the caller's thread: it reads fixed-size chunks and
/// blocks on each chunk's delivery handle, so production is paced by
/// downstream demand and a downstream `cancel` is observed at the next chunk
/// boundary (the handle resolves exceptionally and `drain` returns) rather
/// than hanging. Source read failures are wrapped as [`FlowError::Io`],
/// forwarded downstream as an error event, and returned to the caller.
///
/// [`drain`]: ConsumingPublisher::drain
#[derive(Clone, Default)]
pub struct ConsumingPublisher {
    emitter: Emitter<Bytes>,
}

impl ConsumingPublisher {
    /// Bytes read from the source per delivery.
    pub const CHUNK_SIZE: usize = 16 * 1024;

    pub fn new() -> Self {
        Self {
            emitter: Emitter::new(),
        }
    }

    /// Reads `source` to end, publishing each chunk, and returns the total
    /// number of bytes transferred. Blocks the calling thread.
    pub fn drain(&self, mut source: impl Read) -> Result<u64, FlowError> {
        let mut chunk = vec![0u8; Self::CHUNK_SIZE];
        let mut total = 0u64;
        loop {
            match source.read(&mut chunk) {
                Ok(0) => {
                    debug!(total, "source exhausted");
                    self.emitter.complete().blocking_wait()?;
                    return Ok(total);
                }
                Ok(n) => {
                    total += n as u64;
                    trace!(bytes = n, "publishing chunk");
                    self.emitter
                        .send(Bytes::copy_from_slice(&chunk[..n]))
                        .blocking_wait()?;
                }
                Err(error) if error.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(error) => {
                    let error = FlowError::io(error);
                    debug!(%error, "source read failed");
                    // Forward downstream; the caller gets the same error
                    // without waiting on the delivery.
                    drop(self.emitter.error(error.clone()));
                    return Err(error);
                }
            }
        }
    }
}

impl Publisher<Bytes> for ConsumingPublisher {
    fn subscribe(&self, subscriber: Box<dyn Subscriber<Bytes>>) {
        self.emitter.subscribe(subscriber);
    }
}
