//! flowq - Credit-Controlled Stream Primitives
//!
//! A small family of composable adapters around one abstraction: a producer
//! that emits elements only when a consumer signals numeric demand
//! ("credits"), plus terminal signals that may arrive at any time. Every
//! component obeys the same backpressure contract, so they compose
//! transparently: a byte store can sit between a network-read producer and a
//! blocking `read()` call while a chunking subscriber feeds a fixed-size
//! write path.
//!
//! # Components
//!
//! - [`StoringSubscriber`] - bounded element queue between a push producer
//!   and a pull consumer
//! - [`ByteStoringSubscriber`] - byte-granularity store with partial-region
//!   consumption and blocking transfer
//! - [`IterPublisher`] - demand-driven adapter over a synchronous iterator
//! - [`FlatteningSubscriber`], [`TrailingDataSubscriber`],
//!   [`ChunkBufferingSubscriber`], [`DelegatingBufferingSubscriber`] -
//!   demand-aware decorators, each wrapping exactly one downstream subscriber
//!
//! The producer-side emitter and the blocking `Read`/`Write` adapters live in
//! the companion `flowq-stream` crate.
//!
//! # Example
//!
//! ```
//! use flowq::{Event, IterPublisher, Publisher, StoringSubscriber};
//!
//! let queue = StoringSubscriber::new(4);
//! IterPublisher::from_items(vec![1, 2, 3]).subscribe(Box::new(queue.clone()));
//!
//! assert!(matches!(queue.poll(), Some(Event::Next(1))));
//! assert!(matches!(queue.poll(), Some(Event::Next(2))));
//! assert!(matches!(queue.poll(), Some(Event::Next(3))));
//! assert!(matches!(queue.poll(), Some(Event::Complete)));
//! assert!(queue.poll().is_none());
//! ```

mod buffering;
mod byte_store;
mod demand;
mod error;
mod event;
mod flatten;
mod invariants;
mod iterable;
mod storing;
mod traits;
mod trailing;

pub use buffering::{ChunkBufferingSubscriber, DelegatingBufferingSubscriber};
pub use byte_store::{ByteStoringSubscriber, Transfer, TransferResult};
pub use demand::Demand;
pub use error::FlowError;
pub use event::Event;
pub use flatten::FlatteningSubscriber;
pub use iterable::IterPublisher;
pub use storing::StoringSubscriber;
pub use traits::{LinkState, NoopSubscription, Publisher, Subscriber, Subscription};
pub use trailing::TrailingDataSubscriber;
