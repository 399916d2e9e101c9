// SPDX-License-Identifier: Apache-2.0 OR MIT
// Logger handles and the per-facility registry

use super::entry::LogEntry;
use super::ringbuffer::MPSCRingBuffer;
use super::{Facility, Severity};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

type FacilityLevels = Arc<RwLock<HashMap<Facility, Severity>>>;

/// Destination for entries that pass the level filter
pub trait LogWriter: Send + Sync {
    fn write(&self, entry: LogEntry);
}

impl LogWriter for MPSCRingBuffer {
    fn write(&self, entry: LogEntry) {
        MPSCRingBuffer::write(self, entry);
    }
}

/// Writes one JSON object per line straight to stderr
///
/// Used by `msdpd check-config` and anywhere a consumer task is not running.
pub struct StderrJsonLogger;

impl LogWriter for StderrJsonLogger {
    fn write(&self, entry: LogEntry) {
        eprintln!("{}", entry_to_json(&entry));
    }
}

pub(crate) fn entry_to_json(entry: &LogEntry) -> serde_json::Value {
    let mut obj = serde_json::json!({
        "timestamp": entry.timestamp.to_rfc3339(),
        "level": entry.severity.as_str(),
        "facility": entry.facility.as_str(),
        "message": entry.get_message(),
    });
    if !entry.get_kvs().is_empty() {
        let kvs: serde_json::Map<String, serde_json::Value> = entry
            .get_kvs()
            .iter()
            .map(|kv| (kv.key().to_string(), kv.value().into()))
            .collect();
        obj["fields"] = serde_json::Value::Object(kvs);
    }
    obj
}

/// Cheap, cloneable handle for writing log entries
///
/// Level state is shared with the `LogRegistry` that created the handle,
/// so a level change made over the control socket applies to every clone.
#[derive(Clone)]
pub struct Logger {
    writer: Arc<dyn LogWriter>,
    global_min_level: Arc<AtomicU8>,
    facility_min_levels: FacilityLevels,
}

impl Logger {
    pub fn from_mpsc(
        ringbuffer: Arc<MPSCRingBuffer>,
        global_min_level: Arc<AtomicU8>,
        facility_min_levels: FacilityLevels,
    ) -> Self {
        Self {
            writer: ringbuffer as Arc<dyn LogWriter>,
            global_min_level,
            facility_min_levels,
        }
    }

    /// Logger that prints JSON lines directly, at Info and above
    pub fn stderr_json() -> Self {
        Self {
            writer: Arc::new(StderrJsonLogger),
            global_min_level: Arc::new(AtomicU8::new(Severity::Info as u8)),
            facility_min_levels: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Logger backed by a private queue, for tests that inspect output
    pub fn capture(capacity: usize, level: Severity) -> (Self, Arc<MPSCRingBuffer>) {
        let ringbuffer = Arc::new(MPSCRingBuffer::new(capacity));
        let logger = Self::from_mpsc(
            Arc::clone(&ringbuffer),
            Arc::new(AtomicU8::new(level as u8)),
            Arc::new(RwLock::new(HashMap::new())),
        );
        (logger, ringbuffer)
    }

    /// A facility override wins over the global level
    #[inline]
    fn should_log(&self, severity: Severity, facility: Facility) -> bool {
        let override_level = self
            .facility_min_levels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&facility)
            .copied();
        match override_level {
            Some(min_level) => severity <= min_level,
            None => (severity as u8) <= self.global_min_level.load(Ordering::Relaxed),
        }
    }

    #[inline]
    pub fn log(&self, severity: Severity, facility: Facility, message: &str) {
        if !self.should_log(severity, facility) {
            return;
        }
        self.writer.write(LogEntry::new(severity, facility, message));
    }

    /// Write an entry carrying structured fields
    #[inline]
    pub fn log_kv(
        &self,
        severity: Severity,
        facility: Facility,
        message: &str,
        kvs: &[(&str, &str)],
    ) {
        if !self.should_log(severity, facility) {
            return;
        }
        let mut entry = LogEntry::new(severity, facility, message);
        for (key, value) in kvs {
            entry.add_kv(key, value);
        }
        self.writer.write(entry);
    }

    #[inline]
    pub fn emergency(&self, facility: Facility, message: &str) {
        self.log(Severity::Emergency, facility, message);
    }

    #[inline]
    pub fn alert(&self, facility: Facility, message: &str) {
        self.log(Severity::Alert, facility, message);
    }

    #[inline]
    pub fn critical(&self, facility: Facility, message: &str) {
        self.log(Severity::Critical, facility, message);
    }

    #[inline]
    pub fn error(&self, facility: Facility, message: &str) {
        self.log(Severity::Error, facility, message);
    }

    #[inline]
    pub fn warning(&self, facility: Facility, message: &str) {
        self.log(Severity::Warning, facility, message);
    }

    #[inline]
    pub fn notice(&self, facility: Facility, message: &str) {
        self.log(Severity::Notice, facility, message);
    }

    #[inline]
    pub fn info(&self, facility: Facility, message: &str) {
        self.log(Severity::Info, facility, message);
    }

    #[inline]
    pub fn debug(&self, facility: Facility, message: &str) {
        self.log(Severity::Debug, facility, message);
    }

    pub fn set_global_level(&self, level: Severity) {
        self.global_min_level.store(level as u8, Ordering::Relaxed);
    }

    pub fn set_facility_level(&self, facility: Facility, level: Severity) {
        self.facility_min_levels
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(facility, level);
    }

    pub fn clear_facility_level(&self, facility: Facility) {
        self.facility_min_levels
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&facility);
    }
}

/// Owns one queue per facility and the level state shared by all loggers
pub struct LogRegistry {
    loggers: HashMap<Facility, Logger>,
    global_min_level: Arc<AtomicU8>,
    facility_min_levels: FacilityLevels,
    ringbuffers: Vec<(Facility, Arc<MPSCRingBuffer>)>,
}

impl LogRegistry {
    /// Create a registry with a queue for every facility in `Facility::ALL`
    pub fn new_mpsc() -> Self {
        Self::with_level(Severity::Info)
    }

    pub fn with_level(level: Severity) -> Self {
        let global_min_level = Arc::new(AtomicU8::new(level as u8));
        let facility_min_levels: FacilityLevels = Arc::new(RwLock::new(HashMap::new()));
        let mut loggers = HashMap::new();
        let mut ringbuffers = Vec::new();

        for facility in Facility::ALL {
            let ringbuffer = Arc::new(MPSCRingBuffer::new(facility.buffer_size()));
            loggers.insert(
                facility,
                Logger::from_mpsc(
                    Arc::clone(&ringbuffer),
                    Arc::clone(&global_min_level),
                    Arc::clone(&facility_min_levels),
                ),
            );
            ringbuffers.push((facility, ringbuffer));
        }

        Self {
            loggers,
            global_min_level,
            facility_min_levels,
            ringbuffers,
        }
    }

    pub fn get(&self, facility: Facility) -> Option<&Logger> {
        self.loggers.get(&facility)
    }

    pub fn get_logger(&self, facility: Facility) -> Option<Logger> {
        self.loggers.get(&facility).cloned()
    }

    pub fn set_global_level(&self, level: Severity) {
        self.global_min_level.store(level as u8, Ordering::Relaxed);
    }

    pub fn get_global_level(&self) -> Severity {
        Severity::from_u8(self.global_min_level.load(Ordering::Relaxed)).unwrap_or(Severity::Info)
    }

    pub fn set_facility_level(&self, facility: Facility, level: Severity) {
        self.facility_min_levels
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(facility, level);
    }

    pub fn clear_facility_level(&self, facility: Facility) {
        self.facility_min_levels
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&facility);
    }

    /// Effective level for `facility`: its override, else the global level
    pub fn get_facility_level(&self, facility: Facility) -> Severity {
        self.facility_min_levels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&facility)
            .copied()
            .unwrap_or_else(|| self.get_global_level())
    }

    pub fn get_all_facility_levels(&self) -> HashMap<Facility, Severity> {
        self.facility_min_levels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Queues for the `AsyncConsumer`
    pub fn export_mpsc_ringbuffers(&self) -> Vec<(Facility, Arc<MPSCRingBuffer>)> {
        self.ringbuffers
            .iter()
            .map(|(facility, rb)| (*facility, Arc::clone(rb)))
            .collect()
    }
}
