//! Cross-component composition tests.

use bytes::Bytes;
use flowq::{
    ByteStoringSubscriber, ChunkBufferingSubscriber, Event, FlatteningSubscriber, FlowError,
    IterPublisher, Publisher, StoringSubscriber, Subscriber, Subscription, TrailingDataSubscriber,
    TransferResult,
};
use parking_lot::Mutex;
use std::sync::Arc;

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

    fn seen(&self) -> Vec<String> {
        self.events.lock().clone()
    }
}

impl Subscriber<String> for Collect {
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
        *self.subscription.lock() = Some(subscription);
    }
    fn on_next(&self, item: String) {
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
fn groups_flatten_into_a_bounded_queue() {
    let queue = StoringSubscriber::new(2);
    let flatten = FlatteningSubscriber::new(Box::new(queue.clone()));
    IterPublisher::from_items(vec![
        vec!["a".to_string(), "b".to_string()],
        vec!["c".to_string()],
    ])
    .subscribe(Box::new(flatten));

    let mut drained = Vec::new();
    loop {
        match queue.poll() {
            Some(Event::Next(item)) => drained.push(item),
            Some(Event::Complete) => break,
            Some(Event::Error(error)) => panic!("unexpected error: {error}"),
            None => panic!("queue starved before completion"),
        }
    }
    assert_eq!(drained, ["a", "b", "c"]);
}

#[test]
fn chunked_bytes_flow_into_a_byte_store() {
    // 3 x 5 bytes re-chunked to 4-byte buffers, then byte-drained.
    let store = ByteStoringSubscriber::new(u64::MAX);
    let chunker = ChunkBufferingSubscriber::new(Box::new(store.clone()), 4);
    IterPublisher::from_items(vec![
        Bytes::from_static(b"aaaaa"),
        Bytes::from_static(b"bbbbb"),
        Bytes::from_static(b"ccccc"),
    ])
    .subscribe(Box::new(chunker));

    let mut out = Vec::new();
    let mut dst = [0u8; 6];
    loop {
        let transfer = store.transfer_to(&mut dst).expect("no error expected");
        out.extend_from_slice(&dst[..transfer.bytes]);
        if transfer.result == TransferResult::EndOfStream {
            break;
        }
    }
    assert_eq!(out, b"aaaaabbbbbccccc");
}

#[test]
fn byte_store_paces_a_synchronous_byte_source() {
    let store = ByteStoringSubscriber::new(8);
    IterPublisher::from_items((0..32u8).map(|i| Bytes::from(vec![i; 4])).collect::<Vec<_>>())
        .subscribe(Box::new(store.clone()));

    // The store never asks for more than one region while at or above
    // capacity, so only a bounded prefix is pulled from the source.
    assert!(store.buffered_bytes() >= 8);
    assert!(store.buffered_bytes() <= 12);

    let mut total = 0usize;
    let mut dst = [0u8; 16];
    loop {
        let transfer = store.transfer_to(&mut dst).expect("no error expected");
        total += transfer.bytes;
        if transfer.result == TransferResult::EndOfStream {
            break;
        }
    }
    assert_eq!(total, 32 * 4);
}

#[test]
fn trailing_data_composes_with_flatten() {
    let collect = Collect::default();
    let trailing = TrailingDataSubscriber::new(Box::new(collect.clone()), || {
        Some("checksum".to_string())
    });
    let flatten = FlatteningSubscriber::new(Box::new(trailing));
    IterPublisher::from_items(vec![vec!["p1".to_string()], vec!["p2".to_string()]])
        .subscribe(Box::new(flatten));

    collect.request(u64::MAX);
    assert_eq!(
        collect.seen(),
        ["next:p1", "next:p2", "next:checksum", "complete"]
    );
}
