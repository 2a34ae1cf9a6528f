//! Blocking and asynchronous bridges for flowq links.
//!
//! This crate carries the producer-side and thread-bridging surface over the
//! `flowq` primitives:
//!
//! - **Backpressured emitter**: [`Emitter`] gives arbitrary threads a
//!   `send`/`complete`/`error` API feeding one demand-driven subscriber, each
//!   call returning a [`Completion`] resolved on actual delivery.
//! - **Blocking adapters**: [`StreamReader`] exposes a publisher as
//!   `std::io::Read`; [`StreamWriter`] exposes `std::io::Write` over an
//!   emitter; [`ConsumingPublisher`] drains a caller-supplied blocking
//!   reader into a link on the caller's thread.
//! - **Bounded-concurrency processing**: [`AsyncBufferingSubscriber`] runs an
//!   async transformation per element with a fixed number in flight.
//!
//! # Example
//!
//! ```ignore
//! use bytes::Bytes;
//! use flowq_stream::{Emitter, StreamReader};
//! use std::io::Read;
//!
//! let emitter = Emitter::new();
//! let mut reader = StreamReader::new(&emitter);
//!
//! // Producer side, e.g. an event-loop callback:
//! emitter.send(Bytes::from_static(b"payload"));
//! emitter.complete();
//!
//! // Consumer side, a plain blocking thread:
//! let mut body = Vec::new();
//! reader.read_to_end(&mut body)?;
//! ```

mod async_buffering;
mod completion;
mod consuming;
mod emitter;
mod invariants;
mod reader;
mod writer;

pub use async_buffering::AsyncBufferingSubscriber;
pub use completion::Completion;
pub use consuming::ConsumingPublisher;
pub use emitter::Emitter;
pub use reader::StreamReader;
pub use writer::StreamWriter;

// Re-export the core contract so callers need only one import path.
pub use flowq::{FlowError, Publisher, Subscriber, Subscription};
