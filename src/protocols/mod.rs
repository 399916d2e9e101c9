// SPDX-License-Identifier: Apache-2.0 OR MIT
//! MSDP protocol machinery
//!
//! - `msdp`: wire codec and engine events
//! - `msdp_peer`: per-peer session state machine and counters
//! - `msdp_tcp`: TCP listeners, dialing and per-session I/O tasks
//! - `sa_cache`: the Source-Active database
//! - `propagation`: loop check and peer-group forwarding rules
//! - `source_feeder`: local source polling and SPT requests
//!
//! ## Architecture
//!
//! All protocol state is owned by a single engine task in the supervisor.
//! TCP sessions and timers run in their own tasks and only talk to the
//! engine through `ProtocolEvent`s, so every state change is serialized.

pub mod msdp;
pub mod msdp_peer;
pub mod msdp_tcp;
pub mod propagation;
pub mod sa_cache;
pub mod source_feeder;

use std::net::Ipv4Addr;
use std::time::Instant;

/// Everything the engine task reacts to
#[derive(Debug, Clone)]
pub enum ProtocolEvent {
    Msdp(msdp::MsdpEvent),
    TimerExpired(TimerType),
    /// Stop the engine task
    Shutdown,
}

/// Types of timers used by the engine
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TimerType {
    /// Backoff before reconnecting to a peer in reset-wait
    ConnectRetry { peer: Ipv4Addr },
    /// Periodic removal of expired SA entries
    SaExpirySweep,
    /// Periodic SA re-advertisement
    Readvertise,
    /// Periodic poll of the forwarding substrate for local sources
    SourcePoll,
}

/// Request to schedule a timer
#[derive(Debug, Clone)]
pub struct TimerRequest {
    pub timer_type: TimerType,
    pub fire_at: Instant,
    /// Cancel any pending timer of the same type first
    pub replace_existing: bool,
}

impl TimerRequest {
    pub fn replacing(timer_type: TimerType, fire_at: Instant) -> Self {
        Self {
            timer_type,
            fire_at,
            replace_existing: true,
        }
    }
}

/// Common trait for protocol message builders
pub trait PacketBuilder {
    /// Serialize the message, header included
    fn build(&self) -> Vec<u8>;
}
