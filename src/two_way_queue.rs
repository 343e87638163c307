//! The duplex channel pair connecting a producer task with a consumer task.
//!
//! Filled buffers travel producer → consumer; empty buffers travel back for
//! recycling. The scheduler injects at most a couple of buffers per queue,
//! so a fast producer blocks until its consumer returns scratch space.

use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam::channel::{unbounded, Receiver, Sender};

use crate::buffer::Buffer;

/// What a consumer pops from its end of the queue: either a filled buffer or
/// the in-band end-of-stream sentinel.
#[derive(Debug)]
pub enum Item {
    Data(Buffer),
    /// Pushed by a producer after its final real output.
    Poison,
}

/// A pair of FIFO channels between two adjacent tasks.
#[derive(Debug)]
pub struct TwoWayQueue {
    producer_tx: Sender<Buffer>,
    producer_rx: Receiver<Buffer>,
    consumer_tx: Sender<Item>,
    consumer_rx: Receiver<Item>,
    capacity: AtomicUsize,
}

impl TwoWayQueue {
    pub fn new() -> TwoWayQueue {
        let (producer_tx, producer_rx) = unbounded();
        let (consumer_tx, consumer_rx) = unbounded();

        TwoWayQueue {
            producer_tx,
            producer_rx,
            consumer_tx,
            consumer_rx,
            capacity: AtomicUsize::new(0),
        }
    }

    /// Injects a fresh buffer into the recycle loop, increasing the
    /// capacity.
    pub fn insert(&self, buffer: Buffer) {
        self.capacity.fetch_add(1, Ordering::Relaxed);
        self.producer_tx.send(buffer).expect("queue endpoints outlive the workers");
    }

    /// The number of buffers that have been injected into this queue.
    pub fn capacity(&self) -> usize {
        self.capacity.load(Ordering::Relaxed)
    }

    /// Retrieves an empty, recyclable buffer. Blocks until the consumer has
    /// returned one.
    pub fn producer_pop(&self) -> Buffer {
        self.producer_rx.recv().expect("queue endpoints outlive the workers")
    }

    /// Hands a filled buffer (or the end-of-stream sentinel) to the
    /// consumer.
    pub fn producer_push(&self, item: Item) {
        self.consumer_tx.send(item).expect("queue endpoints outlive the workers")
    }

    /// Retrieves the next filled buffer. Blocks until the producer delivers
    /// one or signals end-of-stream.
    pub fn consumer_pop(&self) -> Item {
        self.consumer_rx.recv().expect("queue endpoints outlive the workers")
    }

    /// Returns an empty buffer to the producer for recycling.
    pub fn consumer_push(&self, buffer: Buffer) {
        self.producer_tx.send(buffer).expect("queue endpoints outlive the workers")
    }

    /// Drains every buffer still sitting in either channel. Called by the
    /// scheduler after all workers have terminated.
    pub fn drain(&self) -> Vec<Buffer> {
        let mut buffers: Vec<Buffer> = self.producer_rx.try_iter().collect();

        buffers.extend(self.consumer_rx.try_iter().filter_map(|item| match item {
            Item::Data(buffer) => Some(buffer),
            Item::Poison => None,
        }));

        buffers
    }
}

impl Default for TwoWayQueue {
    fn default() -> TwoWayQueue {
        TwoWayQueue::new()
    }
}
