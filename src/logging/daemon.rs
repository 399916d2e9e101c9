// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Process-wide logging setup for the daemon
//!
//! Owns the `LogRegistry` and the consumer task that drains it. Tests that
//! start a full protocol subsystem use the same type so their output goes
//! through the same path as a running `msdpd`.

use crate::logging::{AsyncConsumer, Facility, LogRegistry, Logger, Severity};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Output format for the stderr sink
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

pub struct DaemonLogging {
    registry: Arc<LogRegistry>,
    consumer_handle: Option<tokio::task::JoinHandle<()>>,
    consumer_stop: Arc<AtomicBool>,
}

impl DaemonLogging {
    /// Create the registry and spawn its consumer on the current runtime
    pub fn start(level: Severity, format: LogFormat) -> Self {
        let registry = LogRegistry::with_level(level);
        let ringbuffers = registry.export_mpsc_ringbuffers();
        let consumer = match format {
            LogFormat::Text => AsyncConsumer::stderr(ringbuffers),
            LogFormat::Json => AsyncConsumer::json(ringbuffers),
        };
        let consumer_stop = consumer.stop_handle();
        let consumer_handle = Some(tokio::spawn(consumer.run()));

        Self {
            registry: Arc::new(registry),
            consumer_handle,
            consumer_stop,
        }
    }

    /// Logger for `facility`
    ///
    /// Facilities without a queue of their own (`Unknown`) fall back to
    /// direct JSON on stderr.
    pub fn logger(&self, facility: Facility) -> Logger {
        self.registry
            .get_logger(facility)
            .unwrap_or_else(Logger::stderr_json)
    }

    pub fn registry(&self) -> Arc<LogRegistry> {
        Arc::clone(&self.registry)
    }

    /// Stop the consumer after it flushes what is queued
    pub async fn shutdown(mut self) {
        self.consumer_stop.store(false, Ordering::Relaxed);
        if let Some(handle) = self.consumer_handle.take() {
            let _ = handle.await;
        }
    }
}
