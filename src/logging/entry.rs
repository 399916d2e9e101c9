// SPDX-License-Identifier: Apache-2.0 OR MIT
// Log entry structure

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};

use super::{Facility, Severity};

/// Maximum number of key-value pairs carried by one entry
pub const MAX_KVS: usize = 4;

static SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Key-value pair for structured logging
#[derive(Clone, PartialEq, Eq)]
pub struct KeyValue {
    key: String,
    value: String,
}

impl KeyValue {
    /// Create new key-value pair
    pub fn new(key: &str, value: &str) -> Self {
        Self {
            key: key.to_string(),
            value: value.to_string(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn value(&self) -> &str {
        &self.value
    }
}

impl std::fmt::Debug for KeyValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}={}", self.key, self.value)
    }
}

/// A single log record as it travels from a `Logger` to a sink
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub severity: Severity,
    pub facility: Facility,
    pub timestamp: DateTime<Utc>,
    /// Process-wide sequence number, preserves write order across queues
    pub sequence: u64,
    message: String,
    kvs: Vec<KeyValue>,
}

impl LogEntry {
    /// Create a new log entry
    pub fn new(severity: Severity, facility: Facility, message: &str) -> Self {
        Self {
            severity,
            facility,
            timestamp: Utc::now(),
            sequence: SEQUENCE.fetch_add(1, Ordering::Relaxed),
            message: message.to_string(),
            kvs: Vec::new(),
        }
    }

    /// Attach a key-value pair, silently ignored past `MAX_KVS`
    pub fn add_kv(&mut self, key: &str, value: &str) {
        if self.kvs.len() < MAX_KVS {
            self.kvs.push(KeyValue::new(key, value));
        }
    }

    pub fn get_message(&self) -> &str {
        &self.message
    }

    pub fn get_kvs(&self) -> &[KeyValue] {
        &self.kvs
    }
}
