// SPDX-License-Identifier: Apache-2.0 OR MIT
//! MSDP (Multicast Source Discovery Protocol) wire format and engine events
//!
//! Messages are TLVs carried over a TCP session between peers:
//!
//! | Type | Value | Handling |
//! |------|-------|----------|
//! | Source-Active | 1 | Parsed, fed to the propagation engine |
//! | SA-Request | 2 | Ignored |
//! | SA-Response | 3 | Ignored |
//! | Keepalive | 4 | Resets the hold timer |
//!
//! ## SA layout
//!
//! ```text
//!  0                   1                   2                   3
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |       1       |     x + y (Length)            | Entry Count   |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                          RP Address                           |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                     Reserved                  |  Sprefix Len  |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                         Group Address                         |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                         Source Address                        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! ## Timers
//!
//! | Timer | Default |
//! |-------|---------|
//! | Connect retry | 30s |
//! | Keepalive | 60s |
//! | Hold | 75s |
//! | SA state | 210s |

use std::net::Ipv4Addr;
use std::time::Duration;

use bytes::Bytes;
use thiserror::Error;
use tokio::sync::mpsc;

use super::msdp_peer::MsdpPeerConfig;
use super::msdp_tcp::CloseReason;
use super::PacketBuilder;

// MSDP message types (RFC 3618)
pub const MSDP_SA: u8 = 1;
pub const MSDP_SA_REQUEST: u8 = 2;
pub const MSDP_SA_RESPONSE: u8 = 3;
pub const MSDP_KEEPALIVE: u8 = 4;

/// MSDP well-known port
pub const MSDP_PORT: u16 = 639;

/// Largest message a speaker may send or accept
pub const MAX_MESSAGE_SIZE: usize = 9192;

/// Entry count is a single octet
pub const MAX_SA_ENTRIES: usize = 255;

/// Only host routes are valid in an SA entry
pub const SA_SPREFIX_LEN: u8 = 32;

// Default timer values (RFC 3618)
pub const DEFAULT_CONNECT_RETRY_PERIOD: Duration = Duration::from_secs(30);
pub const DEFAULT_KEEPALIVE_PERIOD: Duration = Duration::from_secs(60);
pub const DEFAULT_HOLD_TIME: Duration = Duration::from_secs(75);
pub const DEFAULT_SA_STATE_TIMEOUT: Duration = Duration::from_secs(210);
pub const DEFAULT_SA_SWEEP_PERIOD: Duration = Duration::from_secs(5);
pub const DEFAULT_READVERTISE_PERIOD: Duration = Duration::from_secs(60);
pub const DEFAULT_FORWARD_HOLDDOWN: Duration = Duration::from_secs(30);
pub const DEFAULT_SOURCE_POLL_PERIOD: Duration = Duration::from_secs(5);

/// Errors found while decoding a received message
///
/// `Truncated` and `InvalidRp` make the whole SA unusable; the others only
/// disqualify the entry they were found in.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("message truncated: need {expected} bytes, have {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("invalid RP address {0}")]
    InvalidRp(Ipv4Addr),

    #[error("sprefix length {0} is not 32")]
    InvalidPrefixLength(u8),

    #[error("{0} is not a multicast group")]
    InvalidGroup(Ipv4Addr),

    #[error("{0} is not a valid unicast source")]
    InvalidSource(Ipv4Addr),

    #[error("{name} message with {length} payload bytes")]
    UnexpectedLength { name: &'static str, length: usize },
}

/// Parsed MSDP message header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MsdpHeader {
    pub msg_type: u8,
    /// Message length, header included
    pub length: u16,
}

impl MsdpHeader {
    pub const SIZE: usize = 3;

    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < Self::SIZE {
            return None;
        }

        Some(Self {
            msg_type: data[0],
            length: u16::from_be_bytes([data[1], data[2]]),
        })
    }

    pub fn type_name(&self) -> &'static str {
        type_name(self.msg_type)
    }
}

pub fn type_name(msg_type: u8) -> &'static str {
    match msg_type {
        MSDP_SA => "SA",
        MSDP_SA_REQUEST => "SA-Request",
        MSDP_SA_RESPONSE => "SA-Response",
        MSDP_KEEPALIVE => "Keepalive",
        _ => "Unknown",
    }
}

/// Parsed Source-Active message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MsdpSaMessage {
    pub rp_address: Ipv4Addr,
    /// Well-formed (source, group) pairs
    pub entries: Vec<(Ipv4Addr, Ipv4Addr)>,
    /// One error per discarded entry
    pub invalid: Vec<CodecError>,
}

impl MsdpSaMessage {
    /// Entry count (1) + RP address (4)
    pub const MIN_SIZE: usize = 5;
    /// Reserved (3) + sprefix length (1) + group (4) + source (4)
    pub const ENTRY_SIZE: usize = 12;

    /// Parse an SA payload (the bytes after the header)
    ///
    /// Bytes past the last declared entry are ignored.
    pub fn parse(payload: &[u8]) -> Result<Self, CodecError> {
        if payload.len() < Self::MIN_SIZE {
            return Err(CodecError::Truncated {
                expected: Self::MIN_SIZE,
                actual: payload.len(),
            });
        }

        let entry_count = payload[0] as usize;
        let rp_address = read_addr(&payload[1..5]);
        if rp_address.is_unspecified() || rp_address.is_multicast() || rp_address.is_broadcast() {
            return Err(CodecError::InvalidRp(rp_address));
        }

        let expected = Self::MIN_SIZE + entry_count * Self::ENTRY_SIZE;
        if payload.len() < expected {
            return Err(CodecError::Truncated {
                expected,
                actual: payload.len(),
            });
        }

        let mut entries = Vec::with_capacity(entry_count);
        let mut invalid = Vec::new();
        for chunk in payload[Self::MIN_SIZE..expected].chunks_exact(Self::ENTRY_SIZE) {
            let sprefix_len = chunk[3];
            let group = read_addr(&chunk[4..8]);
            let source = read_addr(&chunk[8..12]);

            if sprefix_len != SA_SPREFIX_LEN {
                invalid.push(CodecError::InvalidPrefixLength(sprefix_len));
            } else if !group.is_multicast() {
                invalid.push(CodecError::InvalidGroup(group));
            } else if !is_valid_source(source) {
                invalid.push(CodecError::InvalidSource(source));
            } else {
                entries.push((source, group));
            }
        }

        Ok(Self {
            rp_address,
            entries,
            invalid,
        })
    }
}

fn read_addr(b: &[u8]) -> Ipv4Addr {
    Ipv4Addr::new(b[0], b[1], b[2], b[3])
}

pub fn is_valid_source(addr: Ipv4Addr) -> bool {
    !(addr.is_unspecified() || addr.is_multicast() || addr.is_broadcast() || addr.is_loopback())
}

/// Builder for one SA message of at most `MAX_SA_ENTRIES` entries
#[derive(Debug, Clone)]
pub struct MsdpSaBuilder {
    pub rp_address: Ipv4Addr,
    /// (source, group) entries
    pub entries: Vec<(Ipv4Addr, Ipv4Addr)>,
}

impl MsdpSaBuilder {
    pub fn new(rp_address: Ipv4Addr) -> Self {
        Self {
            rp_address,
            entries: Vec::new(),
        }
    }

    /// Add an entry; returns false once the message is full
    pub fn add_entry(&mut self, source: Ipv4Addr, group: Ipv4Addr) -> bool {
        if self.entries.len() >= MAX_SA_ENTRIES {
            return false;
        }
        self.entries.push((source, group));
        true
    }

    /// Split an arbitrary entry list into as many messages as needed
    pub fn chunked(rp_address: Ipv4Addr, entries: &[(Ipv4Addr, Ipv4Addr)]) -> Vec<Self> {
        entries
            .chunks(MAX_SA_ENTRIES)
            .map(|chunk| Self {
                rp_address,
                entries: chunk.to_vec(),
            })
            .collect()
    }

    pub fn encoded_len(&self) -> usize {
        MsdpHeader::SIZE + MsdpSaMessage::MIN_SIZE + self.entries.len() * MsdpSaMessage::ENTRY_SIZE
    }
}

impl PacketBuilder for MsdpSaBuilder {
    fn build(&self) -> Vec<u8> {
        let total_len = self.encoded_len();
        let mut packet = Vec::with_capacity(total_len);

        packet.push(MSDP_SA);
        packet.extend_from_slice(&(total_len as u16).to_be_bytes());
        packet.push(self.entries.len() as u8);
        packet.extend_from_slice(&self.rp_address.octets());

        for (source, group) in &self.entries {
            packet.extend_from_slice(&[0u8; 3]);
            packet.push(SA_SPREFIX_LEN);
            packet.extend_from_slice(&group.octets());
            packet.extend_from_slice(&source.octets());
        }

        packet
    }
}

/// Encode entries as one or more ready-to-send SA messages
pub fn encode_sa(rp_address: Ipv4Addr, entries: &[(Ipv4Addr, Ipv4Addr)]) -> Vec<(Bytes, usize)> {
    MsdpSaBuilder::chunked(rp_address, entries)
        .into_iter()
        .map(|b| (Bytes::from(b.build()), b.entries.len()))
        .collect()
}

/// Builder for MSDP Keepalive messages
#[derive(Debug, Default)]
pub struct MsdpKeepaliveBuilder;

impl MsdpKeepaliveBuilder {
    pub fn new() -> Self {
        Self
    }
}

impl PacketBuilder for MsdpKeepaliveBuilder {
    fn build(&self) -> Vec<u8> {
        vec![MSDP_KEEPALIVE, 0, MsdpHeader::SIZE as u8]
    }
}

/// Events delivered to the engine task
#[derive(Debug, Clone)]
pub enum MsdpEvent {
    /// A TCP session with a configured peer is up and its task is running
    SessionEstablished {
        peer: Ipv4Addr,
        local: Ipv4Addr,
        /// We initiated the connection
        is_active: bool,
        session_id: u64,
        /// Bounded queue feeding the session's writer
        tx: mpsc::Sender<Bytes>,
    },
    /// An outbound connection attempt failed
    SessionFailed { peer: Ipv4Addr, reason: String },
    /// A session task exited
    SessionClosed {
        peer: Ipv4Addr,
        session_id: u64,
        reason: CloseReason,
    },
    /// A complete message arrived on a session
    MessageReceived {
        peer: Ipv4Addr,
        session_id: u64,
        msg_type: u8,
        payload: Bytes,
    },
    /// The local source set in the substrate changed; poll it now
    SourcesChanged,
    AddPeer { config: MsdpPeerConfig },
    RemovePeer { peer: Ipv4Addr },
    /// Drop every SA entry; local sources are re-originated right away
    ClearSaCache,
    Enable,
    Disable,
}
