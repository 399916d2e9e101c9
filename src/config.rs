// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Configuration file types and parsing for msdpd.
//!
//! JSON5 configuration format supporting:
//! - Router identity and local AS
//! - MSDP peers and peer groups (mesh or not)
//! - Protocol timers
//! - Static unicast routes and multicast sources for the built-in substrate
//! - Comments and trailing commas

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::net::Ipv4Addr;
use std::path::Path;
use std::time::Duration;

use crate::logging::{LogFormat, Severity};
use crate::protocols::msdp::{
    DEFAULT_CONNECT_RETRY_PERIOD, DEFAULT_FORWARD_HOLDDOWN, DEFAULT_HOLD_TIME,
    DEFAULT_KEEPALIVE_PERIOD, DEFAULT_READVERTISE_PERIOD, DEFAULT_SA_STATE_TIMEOUT,
    DEFAULT_SA_SWEEP_PERIOD, DEFAULT_SOURCE_POLL_PERIOD, MSDP_PORT,
};
use crate::protocols::msdp_peer::MsdpPeerConfig;
use crate::protocols::msdp_tcp::SessionConfig;
use crate::protocols::sa_cache::SaKey;
use crate::substrate::{StaticRoute, StaticSubstrate};
use crate::validation::{
    validate_multicast_group, validate_port, validate_source_group, validate_unicast_address,
};

/// Startup configuration (JSON5 file format)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    pub router_id: Ipv4Addr,

    pub local_as: u32,

    /// RP address carried in SAs we originate; defaults to `router_id`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub originator_id: Option<Ipv4Addr>,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub timers: TimerConfig,

    /// Capacity of each peer's outbound queue, in messages
    #[serde(default = "default_send_queue_depth")]
    pub send_queue_depth: usize,

    /// Violations tolerated per session before it is reset
    #[serde(default = "default_violation_threshold")]
    pub violation_threshold: u32,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub log_format: LogFormat,

    /// Start with the protocol enabled
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default)]
    pub peers: Vec<MsdpPeerConfig>,

    /// Peer groups by name
    #[serde(default)]
    pub groups: BTreeMap<String, GroupConfig>,

    #[serde(default)]
    pub routes: Vec<StaticRoute>,

    /// Sources active on directly connected networks
    #[serde(default)]
    pub local_sources: Vec<SaKey>,

    /// Groups with interested local receivers
    #[serde(default)]
    pub receivers: Vec<Ipv4Addr>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct GroupConfig {
    /// Members do not forward to each other
    #[serde(default)]
    pub mesh: bool,
}

/// Protocol timers, in seconds (fractions allowed)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TimerConfig {
    pub keepalive: f64,
    pub hold: f64,
    pub connect_retry: f64,
    pub sa_ttl: f64,
    pub sweep: f64,
    pub readvertise: f64,
    pub forward_holddown: f64,
    pub source_poll: f64,
    pub connect_timeout: f64,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            keepalive: DEFAULT_KEEPALIVE_PERIOD.as_secs_f64(),
            hold: DEFAULT_HOLD_TIME.as_secs_f64(),
            connect_retry: DEFAULT_CONNECT_RETRY_PERIOD.as_secs_f64(),
            sa_ttl: DEFAULT_SA_STATE_TIMEOUT.as_secs_f64(),
            sweep: DEFAULT_SA_SWEEP_PERIOD.as_secs_f64(),
            readvertise: DEFAULT_READVERTISE_PERIOD.as_secs_f64(),
            forward_holddown: DEFAULT_FORWARD_HOLDDOWN.as_secs_f64(),
            source_poll: DEFAULT_SOURCE_POLL_PERIOD.as_secs_f64(),
            connect_timeout: 10.0,
        }
    }
}

impl TimerConfig {
    fn named(&self) -> [(&'static str, f64); 9] {
        [
            ("keepalive", self.keepalive),
            ("hold", self.hold),
            ("connect_retry", self.connect_retry),
            ("sa_ttl", self.sa_ttl),
            ("sweep", self.sweep),
            ("readvertise", self.readvertise),
            ("forward_holddown", self.forward_holddown),
            ("source_poll", self.source_poll),
            ("connect_timeout", self.connect_timeout),
        ]
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for (name, secs) in self.named() {
            // forward_holddown may be zero: forward every refresh
            let ok = secs.is_finite() && (secs > 0.0 || (name == "forward_holddown" && secs == 0.0));
            if !ok || secs > u32::MAX as f64 {
                return Err(ConfigError::InvalidTimer {
                    name: name.to_string(),
                    value: secs,
                });
            }
        }
        if self.hold <= self.keepalive {
            return Err(ConfigError::InvalidTimer {
                name: "hold".to_string(),
                value: self.hold,
            });
        }
        Ok(())
    }

    pub fn keepalive(&self) -> Duration {
        Duration::from_secs_f64(self.keepalive)
    }

    pub fn hold(&self) -> Duration {
        Duration::from_secs_f64(self.hold)
    }

    pub fn connect_retry(&self) -> Duration {
        Duration::from_secs_f64(self.connect_retry)
    }

    pub fn sa_ttl(&self) -> Duration {
        Duration::from_secs_f64(self.sa_ttl)
    }

    pub fn sweep(&self) -> Duration {
        Duration::from_secs_f64(self.sweep)
    }

    pub fn readvertise(&self) -> Duration {
        Duration::from_secs_f64(self.readvertise)
    }

    pub fn forward_holddown(&self) -> Duration {
        Duration::from_secs_f64(self.forward_holddown)
    }

    pub fn source_poll(&self) -> Duration {
        Duration::from_secs_f64(self.source_poll)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.connect_timeout)
    }
}

fn default_port() -> u16 {
    MSDP_PORT
}

fn default_send_queue_depth() -> usize {
    256
}

fn default_violation_threshold() -> u32 {
    10
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_enabled() -> bool {
    true
}

impl Config {
    /// Minimal configuration with defaults for everything but identity
    pub fn new(router_id: Ipv4Addr, local_as: u32) -> Self {
        Self {
            router_id,
            local_as,
            originator_id: None,
            port: default_port(),
            timers: TimerConfig::default(),
            send_queue_depth: default_send_queue_depth(),
            violation_threshold: default_violation_threshold(),
            log_level: default_log_level(),
            log_format: LogFormat::default(),
            enabled: true,
            peers: Vec::new(),
            groups: BTreeMap::new(),
            routes: Vec::new(),
            local_sources: Vec::new(),
            receivers: Vec::new(),
        }
    }

    /// Load configuration from a JSON5 file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e.to_string()))?;
        Self::parse(&content)
    }

    /// Parse configuration from a JSON5 string
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        json5::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Serialize the effective configuration, defaults filled in (JSON
    /// output is valid JSON5)
    pub fn to_json5(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| "{}".to_string())
    }

    pub fn originator_id(&self) -> Ipv4Addr {
        self.originator_id.unwrap_or(self.router_id)
    }

    pub fn log_level(&self) -> Result<Severity, ConfigError> {
        self.log_level
            .parse()
            .map_err(|_| ConfigError::InvalidLogLevel(self.log_level.clone()))
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            port: self.port,
            keepalive_interval: self.timers.keepalive(),
            hold_time: self.timers.hold(),
            send_queue_depth: self.send_queue_depth,
            connect_timeout: self.timers.connect_timeout(),
        }
    }

    /// Whether members of `group` are fully meshed
    pub fn is_mesh_group(&self, group: Option<&str>) -> bool {
        group
            .and_then(|g| self.groups.get(g))
            .map(|g| g.mesh)
            .unwrap_or(false)
    }

    /// Validate everything except individual peers
    ///
    /// Peer errors are not fatal; see [`Config::partition_peers`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_unicast_address(self.router_id, "router_id").map_err(ConfigError::Invalid)?;
        validate_unicast_address(self.originator_id(), "originator_id")
            .map_err(ConfigError::Invalid)?;
        validate_port(self.port, "port").map_err(ConfigError::Invalid)?;
        if self.local_as == 0 {
            return Err(ConfigError::Invalid("local_as cannot be 0".to_string()));
        }
        if self.send_queue_depth == 0 {
            return Err(ConfigError::Invalid(
                "send_queue_depth must be at least 1".to_string(),
            ));
        }
        self.timers.validate()?;
        self.log_level()?;

        // Same check a receiving peer applies, so an originated SA is never
        // rejected on arrival
        for key in &self.local_sources {
            validate_source_group(key.source, key.group)
                .map_err(|e| ConfigError::Invalid(format!("local source: {}", e)))?;
        }
        for group in &self.receivers {
            validate_multicast_group(*group, "receiver group").map_err(ConfigError::Invalid)?;
        }
        Ok(())
    }

    /// Check a single peer definition against the rest of the configuration
    pub fn validate_peer(&self, peer: &MsdpPeerConfig) -> Result<(), ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidPeer {
            address: peer.address,
            reason,
        };
        validate_unicast_address(peer.address, "peer address").map_err(invalid)?;
        validate_unicast_address(peer.local_address, "local_address").map_err(invalid)?;
        if peer.address == peer.local_address {
            return Err(invalid("peer address equals local_address".to_string()));
        }
        if let Some(group) = &peer.group {
            if !self.groups.contains_key(group) {
                return Err(invalid(format!("unknown group '{}'", group)));
            }
        }
        if peer.remote_as == Some(0) {
            return Err(invalid("remote_as cannot be 0".to_string()));
        }
        Ok(())
    }

    /// Split peers into usable ones and the errors for the rest
    ///
    /// Duplicates after the first definition are rejected.
    pub fn partition_peers(&self) -> (Vec<MsdpPeerConfig>, Vec<ConfigError>) {
        let mut seen = HashSet::new();
        let mut valid = Vec::new();
        let mut errors = Vec::new();
        for peer in &self.peers {
            if !seen.insert(peer.address) {
                errors.push(ConfigError::DuplicatePeer(peer.address));
                continue;
            }
            match self.validate_peer(peer) {
                Ok(()) => valid.push(peer.clone()),
                Err(e) => errors.push(e),
            }
        }
        (valid, errors)
    }

    /// Seed a static substrate from `routes`, `local_sources` and `receivers`
    pub fn build_substrate(&self) -> StaticSubstrate {
        let substrate = StaticSubstrate::new();
        for route in &self.routes {
            substrate.add_route(route.prefix, route.first_hop_as);
        }
        for key in &self.local_sources {
            substrate.add_source(key.source, key.group);
        }
        for group in &self.receivers {
            substrate.add_receiver(*group);
        }
        substrate
    }
}

/// Configuration errors
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    IoError(std::path::PathBuf, String),
    ParseError(String),
    Invalid(String),
    InvalidTimer { name: String, value: f64 },
    InvalidLogLevel(String),
    InvalidPeer { address: Ipv4Addr, reason: String },
    DuplicatePeer(Ipv4Addr),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(path, msg) => {
                write!(
                    f,
                    "failed to read config file '{}': {}",
                    path.display(),
                    msg
                )
            }
            ConfigError::ParseError(msg) => write!(f, "failed to parse config: {}", msg),
            ConfigError::Invalid(msg) => write!(f, "invalid config: {}", msg),
            ConfigError::InvalidTimer { name, value } => {
                write!(f, "invalid value {} for timer '{}'", value, name)
            }
            ConfigError::InvalidLogLevel(level) => write!(f, "invalid log level '{}'", level),
            ConfigError::InvalidPeer { address, reason } => {
                write!(f, "invalid peer {}: {}", address, reason)
            }
            ConfigError::DuplicatePeer(address) => write!(f, "duplicate peer {}", address),
        }
    }
}

impl std::error::Error for ConfigError {}
