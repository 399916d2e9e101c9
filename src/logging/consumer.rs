// SPDX-License-Identifier: Apache-2.0 OR MIT
// Log consumer task: drains facility queues into an output sink

use super::entry::LogEntry;
use super::logger::entry_to_json;
use super::ringbuffer::MPSCRingBuffer;
use super::Facility;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

const IDLE_POLL: Duration = Duration::from_millis(1);

/// Output sink for log entries
pub trait LogSink: Send {
    fn write_entry(&mut self, entry: &LogEntry);

    fn flush(&mut self);
}

/// Human-readable lines on stderr
///
/// `2026-10-18T09:12:44.120Z NOTICE [Session] peer established peer=192.0.2.1`
pub struct StderrSink {
    stderr: std::io::Stderr,
}

impl StderrSink {
    pub fn new() -> Self {
        Self {
            stderr: std::io::stderr(),
        }
    }
}

impl Default for StderrSink {
    fn default() -> Self {
        Self::new()
    }
}

impl LogSink for StderrSink {
    fn write_entry(&mut self, entry: &LogEntry) {
        let mut line = format!(
            "{} {} [{}] {}",
            entry
                .timestamp
                .to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            entry.severity,
            entry.facility,
            entry.get_message()
        );
        for kv in entry.get_kvs() {
            line.push(' ');
            line.push_str(&format!("{:?}", kv));
        }
        let _ = writeln!(self.stderr, "{}", line);
    }

    fn flush(&mut self) {
        let _ = self.stderr.flush();
    }
}

/// One JSON object per line on stderr
pub struct JsonSink {
    stderr: std::io::Stderr,
}

impl JsonSink {
    pub fn new() -> Self {
        Self {
            stderr: std::io::stderr(),
        }
    }
}

impl Default for JsonSink {
    fn default() -> Self {
        Self::new()
    }
}

impl LogSink for JsonSink {
    fn write_entry(&mut self, entry: &LogEntry) {
        let _ = writeln!(self.stderr, "{}", entry_to_json(entry));
    }

    fn flush(&mut self) {
        let _ = self.stderr.flush();
    }
}

/// Tokio task that polls every facility queue
///
/// Entries drained in one pass are written in global sequence order, so
/// interleaved messages from different facilities come out as they were
/// logged.
pub struct AsyncConsumer {
    ringbuffers: Vec<(Facility, Arc<MPSCRingBuffer>)>,
    sink: Box<dyn LogSink>,
    running: Arc<AtomicBool>,
}

impl AsyncConsumer {
    pub fn new(ringbuffers: Vec<(Facility, Arc<MPSCRingBuffer>)>, sink: Box<dyn LogSink>) -> Self {
        Self {
            ringbuffers,
            sink,
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn stderr(ringbuffers: Vec<(Facility, Arc<MPSCRingBuffer>)>) -> Self {
        Self::new(ringbuffers, Box::new(StderrSink::new()))
    }

    pub fn json(ringbuffers: Vec<(Facility, Arc<MPSCRingBuffer>)>) -> Self {
        Self::new(ringbuffers, Box::new(JsonSink::new()))
    }

    /// Clearing the flag stops the task after one final drain
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    fn drain_once(&mut self) -> bool {
        let mut batch: Vec<LogEntry> = Vec::new();
        for (_facility, ringbuffer) in &self.ringbuffers {
            while let Some(entry) = ringbuffer.read() {
                batch.push(entry);
            }
        }
        if batch.is_empty() {
            return false;
        }
        batch.sort_by_key(|e| e.sequence);
        for entry in &batch {
            self.sink.write_entry(entry);
        }
        self.sink.flush();
        true
    }

    pub async fn run(mut self) {
        while self.running.load(Ordering::Relaxed) {
            if !self.drain_once() {
                tokio::time::sleep(IDLE_POLL).await;
            }
        }
        self.drain_once();
        self.sink.flush();
    }
}
