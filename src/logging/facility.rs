// SPDX-License-Identifier: Apache-2.0 OR MIT
// Logging facilities (component identifiers)

use serde::{Deserialize, Serialize};

/// Logging facility - identifies which component generated the log message
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Facility {
    // === Daemon ===
    /// Event loop, protocol enable/disable, peer configuration
    Supervisor = 0,
    /// Unix domain socket control interface
    ControlSocket = 1,
    /// Configuration loading and validation
    Config = 2,

    // === Protocol ===
    /// Peer TCP sessions, keepalive and hold timers
    Session = 4,
    /// Source-Active cache inserts, refreshes and expiry
    SaCache = 5,
    /// Loop checks and SA forwarding decisions
    Propagation = 6,
    /// Local source polling and SPT requests
    SourceFeeder = 7,
    /// Protocol timer scheduling
    Timers = 8,

    // === Testing and Utilities ===
    /// Test harness and fixtures
    Test = 12,

    /// Fallback for uncategorized messages
    Unknown = 255,
}

impl Facility {
    /// Every facility that gets its own log queue
    pub const ALL: [Facility; 9] = [
        Facility::Supervisor,
        Facility::ControlSocket,
        Facility::Config,
        Facility::Session,
        Facility::SaCache,
        Facility::Propagation,
        Facility::SourceFeeder,
        Facility::Timers,
        Facility::Test,
    ];

    /// Get facility code as u8
    #[inline]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Get facility name as static string
    pub const fn as_str(self) -> &'static str {
        match self {
            Facility::Supervisor => "Supervisor",
            Facility::ControlSocket => "ControlSocket",
            Facility::Config => "Config",
            Facility::Session => "Session",
            Facility::SaCache => "SaCache",
            Facility::Propagation => "Propagation",
            Facility::SourceFeeder => "SourceFeeder",
            Facility::Timers => "Timers",
            Facility::Test => "Test",
            Facility::Unknown => "Unknown",
        }
    }

    /// Create from u8 value (returns Unknown if invalid)
    pub const fn from_u8(value: u8) -> Self {
        match value {
            0 => Facility::Supervisor,
            1 => Facility::ControlSocket,
            2 => Facility::Config,
            4 => Facility::Session,
            5 => Facility::SaCache,
            6 => Facility::Propagation,
            7 => Facility::SourceFeeder,
            8 => Facility::Timers,
            12 => Facility::Test,
            _ => Facility::Unknown,
        }
    }

    /// Get recommended queue capacity for this facility
    ///
    /// Session and SA cache traffic scales with the number of peers and
    /// advertised sources, everything else is low rate.
    pub const fn buffer_size(self) -> usize {
        match self {
            Facility::Session => 4096,
            Facility::SaCache => 4096,
            Facility::Propagation => 2048,
            Facility::Supervisor => 1024,
            _ => 512,
        }
    }
}

impl std::fmt::Display for Facility {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Facility {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Facility::ALL
            .iter()
            .copied()
            .find(|f| f.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown facility '{}'", s))
    }
}
