// SPDX-License-Identifier: Apache-2.0 OR MIT
// Bounded lock-free log queue
//
// Writers never block: when the queue is full the oldest entry is
// overwritten and counted as an overrun, like a kernel printk buffer.

use crossbeam_queue::ArrayQueue;
use std::sync::atomic::{AtomicU64, Ordering};

use super::entry::LogEntry;

/// Multi-producer single-consumer log queue
///
/// Any task may write; the `AsyncConsumer` is the only reader.
pub struct MPSCRingBuffer {
    queue: ArrayQueue<LogEntry>,
    overruns: AtomicU64,
}

impl MPSCRingBuffer {
    /// Create a queue holding at most `capacity` entries
    ///
    /// A zero capacity is bumped to one.
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity.max(1)),
            overruns: AtomicU64::new(0),
        }
    }

    /// Write an entry, displacing the oldest one if the queue is full
    pub fn write(&self, entry: LogEntry) {
        if self.queue.force_push(entry).is_some() {
            self.overruns.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Pop the oldest entry
    pub fn read(&self) -> Option<LogEntry> {
        self.queue.pop()
    }

    /// Number of entries lost to overwrites since creation
    pub fn overruns(&self) -> u64 {
        self.overruns.load(Ordering::Relaxed)
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
