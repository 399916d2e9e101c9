// SPDX-License-Identifier: Apache-2.0 OR MIT
// Facility-scoped logging for msdpd
//
// Every facility writes into its own bounded lock-free queue; one consumer
// task drains them all to stderr. Writers never block the protocol engine.

mod consumer;
mod daemon;
mod entry;
mod facility;
mod logger;
#[macro_use]
mod macros;
mod ringbuffer;
mod severity;

pub use consumer::{AsyncConsumer, JsonSink, LogSink, StderrSink};
pub use daemon::{DaemonLogging, LogFormat};
pub use entry::{KeyValue, LogEntry};
pub use facility::Facility;
pub use logger::{LogRegistry, LogWriter, Logger};
pub use ringbuffer::MPSCRingBuffer;
pub use severity::Severity;
