// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Error taxonomy for the MSDP engine
//!
//! None of these errors is fatal to the daemon. Each variant names the
//! recovery the engine applies: configuration errors skip the offending peer,
//! session errors back off and reconnect, protocol violations drop the entry
//! and count toward the per-peer reset threshold, loop detections are
//! dropped silently, and resource exhaustion drops the newest message.

use std::net::Ipv4Addr;

use thiserror::Error;

use crate::config::ConfigError;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MsdpError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("session with {peer}: {reason}")]
    Session { peer: Ipv4Addr, reason: String },

    #[error("protocol violation from {peer}: {reason}")]
    ProtocolViolation { peer: Ipv4Addr, reason: String },

    #[error(
        "SA ({sa_source}, {group}) from {peer} failed the first-hop AS check: expected AS {expected_as}, route says {}",
        .first_hop_as.map(|a| a.to_string()).unwrap_or_else(|| "unreachable".to_string())
    )]
    LoopDetected {
        peer: Ipv4Addr,
        sa_source: Ipv4Addr,
        group: Ipv4Addr,
        first_hop_as: Option<u32>,
        expected_as: u32,
    },

    #[error("send queue to {peer} is full")]
    ResourceExhaustion { peer: Ipv4Addr },
}

impl MsdpError {
    /// Severity bucket used when logging the error
    pub fn is_debug_only(&self) -> bool {
        matches!(self, MsdpError::LoopDetected { .. })
    }
}

impl From<ConfigError> for MsdpError {
    fn from(err: ConfigError) -> Self {
        MsdpError::Configuration(err.to_string())
    }
}
