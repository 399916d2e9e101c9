// SPDX-License-Identifier: Apache-2.0 OR MIT
// Logging macros
//
// Each macro takes either a ready `&str` or a format string with arguments:
//   log_info!(logger, Facility::Session, "listener started");
//   log_info!(logger, Facility::Session, "peer {} established", peer);

#[macro_export]
macro_rules! log_emergency {
    ($logger:expr, $facility:expr, $msg:expr) => {
        $logger.emergency($facility, $msg)
    };
    ($logger:expr, $facility:expr, $fmt:literal, $($arg:tt)+) => {
        $logger.emergency($facility, &format!($fmt, $($arg)+))
    };
}

#[macro_export]
macro_rules! log_alert {
    ($logger:expr, $facility:expr, $msg:expr) => {
        $logger.alert($facility, $msg)
    };
    ($logger:expr, $facility:expr, $fmt:literal, $($arg:tt)+) => {
        $logger.alert($facility, &format!($fmt, $($arg)+))
    };
}

#[macro_export]
macro_rules! log_critical {
    ($logger:expr, $facility:expr, $msg:expr) => {
        $logger.critical($facility, $msg)
    };
    ($logger:expr, $facility:expr, $fmt:literal, $($arg:tt)+) => {
        $logger.critical($facility, &format!($fmt, $($arg)+))
    };
}

#[macro_export]
macro_rules! log_error {
    ($logger:expr, $facility:expr, $msg:expr) => {
        $logger.error($facility, $msg)
    };
    ($logger:expr, $facility:expr, $fmt:literal, $($arg:tt)+) => {
        $logger.error($facility, &format!($fmt, $($arg)+))
    };
}

#[macro_export]
macro_rules! log_warning {
    ($logger:expr, $facility:expr, $msg:expr) => {
        $logger.warning($facility, $msg)
    };
    ($logger:expr, $facility:expr, $fmt:literal, $($arg:tt)+) => {
        $logger.warning($facility, &format!($fmt, $($arg)+))
    };
}

#[macro_export]
macro_rules! log_notice {
    ($logger:expr, $facility:expr, $msg:expr) => {
        $logger.notice($facility, $msg)
    };
    ($logger:expr, $facility:expr, $fmt:literal, $($arg:tt)+) => {
        $logger.notice($facility, &format!($fmt, $($arg)+))
    };
}

#[macro_export]
macro_rules! log_info {
    ($logger:expr, $facility:expr, $msg:expr) => {
        $logger.info($facility, $msg)
    };
    ($logger:expr, $facility:expr, $fmt:literal, $($arg:tt)+) => {
        $logger.info($facility, &format!($fmt, $($arg)+))
    };
}

#[macro_export]
macro_rules! log_debug {
    ($logger:expr, $facility:expr, $msg:expr) => {
        $logger.debug($facility, $msg)
    };
    ($logger:expr, $facility:expr, $fmt:literal, $($arg:tt)+) => {
        $logger.debug($facility, &format!($fmt, $($arg)+))
    };
}

/// Log with structured fields
///
/// ```ignore
/// log_kv!(logger, Severity::Notice, Facility::Session, "peer established",
///         "peer" => &peer.to_string(), "local" => &local.to_string());
/// ```
#[macro_export]
macro_rules! log_kv {
    ($logger:expr, $severity:expr, $facility:expr, $msg:expr, $($key:expr => $value:expr),+) => {{
        let kvs: &[(&str, &str)] = &[$(($key, $value)),+];
        $logger.log_kv($severity, $facility, $msg, kvs)
    }};
}
