// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Per-peer session state
//!
//! ```text
//!            Open                 HandshakeComplete
//!   Idle ------------> Connecting -----------------> Established
//!    ^                   ^   |                            |
//!    |      ConnectRetry |   | ConnectionFailed           | ConnectionLost
//!    |         Expired   |   v                            | HoldTimerExpired
//!    |                 ResetWait <------------------------+ ViolationThreshold
//!    |                                                        Exceeded
//!    +------- Close (from any state) -------------------------------
//! ```
//!
//! The state machine is pure: the engine feeds it events and acts on the
//! returned state (dialing, scheduling the retry timer, sending the initial
//! SA sync).

use std::net::Ipv4Addr;
use std::time::Instant;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::error::MsdpError;

/// Session states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionState {
    /// Configured but not activated (protocol disabled)
    Idle,
    /// Dialing (higher address) or waiting for the peer to dial us
    Connecting,
    /// TCP session up, SA exchange running
    Established,
    /// Backing off before the next connection attempt
    ResetWait,
}

impl SessionState {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Connecting => "connecting",
            SessionState::Established => "established",
            SessionState::ResetWait => "reset-wait",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inputs to the session state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    Open,
    ConnectRetryExpired,
    HandshakeComplete,
    ConnectionFailed,
    ConnectionLost,
    HoldTimerExpired,
    ViolationThresholdExceeded,
    Close,
}

/// Configuration for an MSDP peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsdpPeerConfig {
    pub address: Ipv4Addr,
    /// Source address for the session and the listener it is accepted on
    pub local_address: Ipv4Addr,
    /// When set and different from the local AS, SAs from this peer are
    /// subject to the first-hop AS check
    #[serde(default)]
    pub remote_as: Option<u32>,
    /// Peer group name; `None` is the implicit non-mesh default group
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl MsdpPeerConfig {
    pub fn new(address: Ipv4Addr, local_address: Ipv4Addr) -> Self {
        Self {
            address,
            local_address,
            remote_as: None,
            group: None,
            description: None,
        }
    }

    /// RFC 3618: the speaker with the higher address initiates
    pub fn is_active_side(&self) -> bool {
        self.local_address > self.address
    }
}

/// Counters kept per peer, surviving session resets
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerCounters {
    /// SA entries accepted from this peer's messages
    pub sa_received: u64,
    /// SA entries queued toward this peer
    pub sa_sent: u64,
    pub keepalives_received: u64,
    /// Messages dropped because the send queue was full
    pub sa_dropped: u64,
    /// Entries rejected by the first-hop AS check
    pub loops_rejected: u64,
    /// Protocol violations across all sessions
    pub violations: u64,
    pub connect_attempts: u64,
    /// Number of times the session reached Established
    pub established_transitions: u64,
}

/// A peer and its live session
#[derive(Debug)]
pub struct MsdpPeer {
    pub config: MsdpPeerConfig,
    pub state: SessionState,
    /// Writer queue of the current session task
    tx: Option<mpsc::Sender<Bytes>>,
    pub session_id: Option<u64>,
    /// Local address the current session is bound to
    pub session_local: Option<Ipv4Addr>,
    pub is_active: bool,
    pub last_received: Option<Instant>,
    pub established_at: Option<Instant>,
    /// Violations in the current session; reset when it is established
    pub session_violations: u32,
    pub counters: PeerCounters,
}

impl MsdpPeer {
    pub fn new(config: MsdpPeerConfig) -> Self {
        Self {
            config,
            state: SessionState::Idle,
            tx: None,
            session_id: None,
            session_local: None,
            is_active: false,
            last_received: None,
            established_at: None,
            session_violations: 0,
            counters: PeerCounters::default(),
        }
    }

    pub fn address(&self) -> Ipv4Addr {
        self.config.address
    }

    /// Apply an event and return the new state
    ///
    /// Events that make no sense in the current state leave it unchanged.
    pub fn handle_event(&mut self, event: SessionEvent, now: Instant) -> SessionState {
        let new_state = match (self.state, event) {
            (_, SessionEvent::Close) => SessionState::Idle,

            (SessionState::Idle, SessionEvent::Open) => SessionState::Connecting,
            (SessionState::ResetWait, SessionEvent::Open) => SessionState::Connecting,
            (SessionState::ResetWait, SessionEvent::ConnectRetryExpired) => {
                SessionState::Connecting
            }

            (SessionState::Connecting, SessionEvent::HandshakeComplete) => {
                SessionState::Established
            }
            // The peer dialed us while we were backing off
            (SessionState::ResetWait, SessionEvent::HandshakeComplete) => {
                SessionState::Established
            }
            // A collision winner replaced the session
            (SessionState::Established, SessionEvent::HandshakeComplete) => {
                SessionState::Established
            }
            (SessionState::Connecting, SessionEvent::ConnectionFailed) => SessionState::ResetWait,

            (SessionState::Established, SessionEvent::ConnectionLost)
            | (SessionState::Established, SessionEvent::HoldTimerExpired)
            | (SessionState::Established, SessionEvent::ViolationThresholdExceeded) => {
                SessionState::ResetWait
            }

            (state, _) => state,
        };

        if new_state != self.state {
            self.enter(new_state, now);
        }
        new_state
    }

    fn enter(&mut self, new_state: SessionState, now: Instant) {
        if self.state == SessionState::Established {
            self.drop_session();
        }
        match new_state {
            SessionState::Established => {
                self.established_at = Some(now);
                self.last_received = Some(now);
                self.session_violations = 0;
                self.counters.established_transitions += 1;
            }
            SessionState::Idle | SessionState::ResetWait => self.drop_session(),
            SessionState::Connecting => {}
        }
        self.state = new_state;
    }

    /// Attach the writer queue of a freshly established session
    pub fn attach_session(
        &mut self,
        session_id: u64,
        local: Ipv4Addr,
        is_active: bool,
        tx: mpsc::Sender<Bytes>,
    ) {
        self.tx = Some(tx);
        self.session_id = Some(session_id);
        self.session_local = Some(local);
        self.is_active = is_active;
    }

    /// Forget the current session; dropping the sender discards queued messages
    fn drop_session(&mut self) {
        self.tx = None;
        self.session_id = None;
        self.session_local = None;
        self.established_at = None;
    }

    pub fn is_established(&self) -> bool {
        self.state == SessionState::Established && self.tx.is_some()
    }

    /// Queue an encoded message without waiting
    pub fn send(&mut self, msg: Bytes) -> Result<(), MsdpError> {
        let tx = match (&self.tx, self.state) {
            (Some(tx), SessionState::Established) => tx,
            _ => {
                return Err(MsdpError::Session {
                    peer: self.config.address,
                    reason: format!("cannot send in state {}", self.state),
                })
            }
        };
        match tx.try_send(msg) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                self.counters.sa_dropped += 1;
                Err(MsdpError::ResourceExhaustion {
                    peer: self.config.address,
                })
            }
            Err(TrySendError::Closed(_)) => Err(MsdpError::Session {
                peer: self.config.address,
                reason: "session task has exited".to_string(),
            }),
        }
    }

    /// Count a violation; true once the session has exceeded `threshold`
    pub fn record_violation(&mut self, threshold: u32) -> bool {
        self.counters.violations += 1;
        self.session_violations += 1;
        self.session_violations > threshold
    }

    pub fn record_received(&mut self, now: Instant) {
        self.last_received = Some(now);
    }

    pub fn uptime_secs(&self, now: Instant) -> Option<u64> {
        self.established_at
            .map(|t| now.saturating_duration_since(t).as_secs())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_peer() -> MsdpPeer {
        MsdpPeer::new(MsdpPeerConfig::new(
            "192.0.2.2".parse().unwrap(),
            "192.0.2.1".parse().unwrap(),
        ))
    }

    #[test]
    fn test_active_side_is_higher_address() {
        let low = MsdpPeerConfig::new("10.0.0.2".parse().unwrap(), "10.0.0.1".parse().unwrap());
        let high = MsdpPeerConfig::new("10.0.0.1".parse().unwrap(), "10.0.0.2".parse().unwrap());
        assert!(!low.is_active_side());
        assert!(high.is_active_side());
    }

    #[test]
    fn test_open_to_established() {
        let mut peer = test_peer();
        let now = Instant::now();
        assert_eq!(peer.state, SessionState::Idle);

        assert_eq!(peer.handle_event(SessionEvent::Open, now), SessionState::Connecting);
        // open is idempotent
        assert_eq!(peer.handle_event(SessionEvent::Open, now), SessionState::Connecting);
        assert!(!peer.is_established());

        let (tx, _rx) = mpsc::channel(4);
        peer.attach_session(1, "192.0.2.1".parse().unwrap(), false, tx);
        assert_eq!(
            peer.handle_event(SessionEvent::HandshakeComplete, now),
            SessionState::Established
        );
        assert!(peer.is_established());
        assert_eq!(peer.handle_event(SessionEvent::Open, now), SessionState::Established);
        assert_eq!(peer.counters.established_transitions, 1);
    }

    #[test]
    fn test_failures_go_to_reset_wait() {
        let now = Instant::now();
        for event in [
            SessionEvent::ConnectionLost,
            SessionEvent::HoldTimerExpired,
            SessionEvent::ViolationThresholdExceeded,
        ] {
            let mut peer = test_peer();
            peer.handle_event(SessionEvent::Open, now);
            let (tx, _rx) = mpsc::channel(4);
            peer.attach_session(7, "192.0.2.1".parse().unwrap(), true, tx);
            peer.handle_event(SessionEvent::HandshakeComplete, now);

            assert_eq!(peer.handle_event(event, now), SessionState::ResetWait);
            assert!(peer.session_id.is_none());
            assert!(peer.established_at.is_none());
        }

        let mut peer = test_peer();
        peer.handle_event(SessionEvent::Open, now);
        assert_eq!(
            peer.handle_event(SessionEvent::ConnectionFailed, now),
            SessionState::ResetWait
        );
        assert_eq!(
            peer.handle_event(SessionEvent::ConnectRetryExpired, now),
            SessionState::Connecting
        );
    }

    #[test]
    fn test_close_from_any_state() {
        let now = Instant::now();
        let mut peer = test_peer();
        peer.handle_event(SessionEvent::Open, now);
        assert_eq!(peer.handle_event(SessionEvent::Close, now), SessionState::Idle);
        // Irrelevant events leave Idle alone
        assert_eq!(
            peer.handle_event(SessionEvent::HandshakeComplete, now),
            SessionState::Idle
        );
        assert_eq!(
            peer.handle_event(SessionEvent::ConnectRetryExpired, now),
            SessionState::Idle
        );
    }

    #[test]
    fn test_send_requires_established() {
        let mut peer = test_peer();
        let err = peer.send(Bytes::from_static(&[4, 0, 3])).unwrap_err();
        assert!(matches!(err, MsdpError::Session { .. }));
    }

    #[tokio::test]
    async fn test_send_full_queue_drops() {
        let now = Instant::now();
        let mut peer = test_peer();
        peer.handle_event(SessionEvent::Open, now);
        let (tx, mut rx) = mpsc::channel(1);
        peer.attach_session(3, "192.0.2.1".parse().unwrap(), false, tx);
        peer.handle_event(SessionEvent::HandshakeComplete, now);

        peer.send(Bytes::from_static(b"first")).unwrap();
        let err = peer.send(Bytes::from_static(b"second")).unwrap_err();
        assert_eq!(
            err,
            MsdpError::ResourceExhaustion {
                peer: "192.0.2.2".parse().unwrap()
            }
        );
        assert_eq!(peer.counters.sa_dropped, 1);
        assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(b"first"));
    }

    #[test]
    fn test_violation_threshold() {
        let mut peer = test_peer();
        assert!(!peer.record_violation(2));
        assert!(!peer.record_violation(2));
        assert!(peer.record_violation(2));
        assert_eq!(peer.counters.violations, 3);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(SessionState::ResetWait.to_string(), "reset-wait");
        assert_eq!(SessionState::Established.to_string(), "established");
    }
}
