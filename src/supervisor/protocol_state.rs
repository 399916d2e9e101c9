// SPDX-License-Identifier: Apache-2.0 OR MIT
//! The MSDP engine.
//!
//! `ProtocolState` owns the peer table, the SA database, the propagation
//! rules and the source feeder. It runs as a single task and is the only
//! writer of that state: TCP sessions, timers and the control socket all
//! reach it as `ProtocolEvent`s. After each event it publishes a fresh
//! `StatusSnapshot` on a watch channel.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use tokio::sync::{mpsc, watch};

use crate::config::Config;
use crate::error::MsdpError;
use crate::logging::{Facility, Logger};
use crate::protocols::msdp::{
    encode_sa, type_name, MsdpEvent, MsdpSaMessage, MSDP_KEEPALIVE, MSDP_SA, MSDP_SA_REQUEST,
    MSDP_SA_RESPONSE,
};
use crate::protocols::msdp_peer::{MsdpPeer, MsdpPeerConfig, SessionEvent, SessionState};
use crate::protocols::msdp_tcp::{CloseReason, MsdpTcpCommand};
use crate::protocols::propagation::{PeerView, PropagationEngine, SaSend};
use crate::protocols::sa_cache::{SaCache, SaKey, UpsertOutcome};
use crate::protocols::source_feeder::{setup_spt, SourceFeeder};
use crate::protocols::{ProtocolEvent, TimerRequest, TimerType};
use crate::status::StatusSnapshot;
use crate::substrate::{MulticastSubstrate, UnicastRib};

use super::actions::ProtocolHandlerResult;

pub struct ProtocolState {
    config: Config,
    enabled: bool,
    peers: HashMap<Ipv4Addr, MsdpPeer>,
    cache: SaCache,
    propagation: PropagationEngine,
    feeder: SourceFeeder,
    rib: Arc<dyn UnicastRib>,
    substrate: Arc<dyn MulticastSubstrate>,
    logger: Logger,
}

/// Views of every Established peer, for the propagation rules
fn established_views<'a>(
    peers: &'a HashMap<Ipv4Addr, MsdpPeer>,
    config: &Config,
) -> Vec<PeerView<'a>> {
    let mut views: Vec<PeerView<'a>> = peers
        .values()
        .filter(|p| p.is_established())
        .map(|p| peer_view(p, config))
        .collect();
    views.sort_by_key(|v| v.address);
    views
}

fn peer_view<'a>(peer: &'a MsdpPeer, config: &Config) -> PeerView<'a> {
    let group = peer.config.group.as_deref();
    PeerView {
        address: peer.address(),
        group,
        mesh: config.is_mesh_group(group),
        remote_as: peer.config.remote_as,
    }
}

impl ProtocolState {
    pub fn new(
        config: Config,
        rib: Arc<dyn UnicastRib>,
        substrate: Arc<dyn MulticastSubstrate>,
        logger: Logger,
    ) -> Self {
        let propagation = PropagationEngine::new(
            config.local_as,
            config.originator_id(),
            config.timers.forward_holddown(),
        );
        Self {
            cache: SaCache::new(config.timers.sa_ttl()),
            propagation,
            feeder: SourceFeeder::new(),
            enabled: false,
            peers: HashMap::new(),
            config,
            rib,
            substrate,
            logger,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn peer(&self, address: Ipv4Addr) -> Option<&MsdpPeer> {
        self.peers.get(&address)
    }

    pub fn cache(&self) -> &SaCache {
        &self.cache
    }

    pub fn snapshot(&self, now: Instant) -> StatusSnapshot {
        StatusSnapshot::build(
            self.enabled,
            self.peers.values(),
            |g| self.config.is_mesh_group(g),
            &self.cache,
            now,
        )
    }

    pub fn handle_event(&mut self, event: ProtocolEvent, now: Instant) -> ProtocolHandlerResult {
        match event {
            ProtocolEvent::Msdp(event) => self.handle_msdp_event(event, now),
            ProtocolEvent::TimerExpired(timer_type) => self.handle_timer_expired(timer_type, now),
            ProtocolEvent::Shutdown => ProtocolHandlerResult::new(),
        }
    }

    fn handle_msdp_event(&mut self, event: MsdpEvent, now: Instant) -> ProtocolHandlerResult {
        let mut result = ProtocolHandlerResult::new();

        match event {
            MsdpEvent::SessionEstablished {
                peer,
                local,
                is_active,
                session_id,
                tx,
            } => self.session_established(peer, local, is_active, session_id, tx, now, &mut result),
            MsdpEvent::SessionFailed { peer, reason } => {
                let retry = self.config.timers.connect_retry();
                if let Some(p) = self.peers.get_mut(&peer) {
                    log_debug!(
                        self.logger,
                        Facility::Session,
                        "{}",
                        MsdpError::Session { peer, reason }
                    );
                    if p.state == SessionState::Connecting
                        && p.handle_event(SessionEvent::ConnectionFailed, now)
                            == SessionState::ResetWait
                    {
                        result.add_timer(TimerRequest::replacing(
                            TimerType::ConnectRetry { peer },
                            now + retry,
                        ));
                    }
                }
            }
            MsdpEvent::SessionClosed {
                peer,
                session_id,
                reason,
            } => {
                let retry = self.config.timers.connect_retry();
                let p = match self.peers.get_mut(&peer) {
                    Some(p) if p.session_id == Some(session_id) => p,
                    _ => return result,
                };
                let session_event = match reason {
                    CloseReason::HoldTimerExpired => SessionEvent::HoldTimerExpired,
                    _ => SessionEvent::ConnectionLost,
                };
                if p.handle_event(session_event, now) == SessionState::ResetWait {
                    log_notice!(
                        self.logger,
                        Facility::Session,
                        "Peer {} down: {}",
                        peer,
                        reason
                    );
                    result.add_timer(TimerRequest::replacing(
                        TimerType::ConnectRetry { peer },
                        now + retry,
                    ));
                }
            }
            MsdpEvent::MessageReceived {
                peer,
                session_id,
                msg_type,
                payload,
            } => self.message_received(peer, session_id, msg_type, payload, now, &mut result),
            MsdpEvent::SourcesChanged => {
                if self.enabled {
                    self.poll_sources(now);
                }
            }
            MsdpEvent::AddPeer { config } => self.add_peer(config, now, &mut result),
            MsdpEvent::RemovePeer { peer } => {
                if self.peers.remove(&peer).is_some() {
                    let flushed = self.cache.remove_learned_from(peer);
                    log_info!(
                        self.logger,
                        Facility::Supervisor,
                        "Removed peer {} ({} SA entries flushed)",
                        peer,
                        flushed.len()
                    );
                    result.add_command(MsdpTcpCommand::Forget { peer });
                }
            }
            MsdpEvent::ClearSaCache => {
                let cleared = self.cache.len();
                self.cache.clear();
                self.feeder.reset();
                log_info!(
                    self.logger,
                    Facility::SaCache,
                    "SA cache cleared ({} entries)",
                    cleared
                );
                if self.enabled {
                    self.poll_sources(now);
                }
            }
            MsdpEvent::Enable => {
                if !self.enabled {
                    self.enabled = true;
                    log_info!(self.logger, Facility::Supervisor, "MSDP enabled");
                    let peers: Vec<Ipv4Addr> = self.peers.keys().copied().collect();
                    for peer in peers {
                        self.open(peer, now, &mut result);
                    }
                    let timers = &self.config.timers;
                    result.add_timer(TimerRequest::replacing(TimerType::SourcePoll, now));
                    result.add_timer(TimerRequest::replacing(
                        TimerType::SaExpirySweep,
                        now + timers.sweep(),
                    ));
                    result.add_timer(TimerRequest::replacing(
                        TimerType::Readvertise,
                        now + timers.readvertise(),
                    ));
                }
            }
            MsdpEvent::Disable => {
                if self.enabled {
                    self.enabled = false;
                    for (peer, p) in self.peers.iter_mut() {
                        p.handle_event(SessionEvent::Close, now);
                        result.disconnect(*peer);
                    }
                    self.cache.clear();
                    self.feeder.reset();
                    log_info!(self.logger, Facility::Supervisor, "MSDP disabled");
                }
            }
        }
        result
    }

    fn add_peer(&mut self, config: MsdpPeerConfig, now: Instant, result: &mut ProtocolHandlerResult) {
        let peer = config.address;
        if let Err(e) = self.config.validate_peer(&config) {
            log_error!(self.logger, Facility::Config, "{}", MsdpError::from(e));
            return;
        }
        if self.peers.contains_key(&peer) {
            log_warning!(
                self.logger,
                Facility::Config,
                "{}",
                MsdpError::Configuration(format!("peer {} is already configured", peer))
            );
            return;
        }

        log_info!(
            self.logger,
            Facility::Supervisor,
            "Added peer {} (local {}, {})",
            peer,
            config.local_address,
            if config.is_active_side() { "active" } else { "passive" }
        );
        result.add_command(MsdpTcpCommand::Configure {
            peer,
            local_address: config.local_address,
        });
        self.peers.insert(peer, MsdpPeer::new(config));
        if self.enabled {
            self.open(peer, now, result);
        }
    }

    /// Start connecting; a no-op while Connecting or Established
    fn open(&mut self, peer: Ipv4Addr, now: Instant, result: &mut ProtocolHandlerResult) {
        if let Some(p) = self.peers.get_mut(&peer) {
            let before = p.state;
            if p.handle_event(SessionEvent::Open, now) == SessionState::Connecting
                && before != SessionState::Connecting
            {
                p.counters.connect_attempts += 1;
                result.add_command(MsdpTcpCommand::Connect { peer });
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn session_established(
        &mut self,
        peer: Ipv4Addr,
        local: Ipv4Addr,
        is_active: bool,
        session_id: u64,
        tx: mpsc::Sender<Bytes>,
        now: Instant,
        result: &mut ProtocolHandlerResult,
    ) {
        let p = match self.peers.get_mut(&peer) {
            Some(p) if self.enabled => p,
            _ => {
                log_debug!(
                    self.logger,
                    Facility::Session,
                    "Dropping session with {}: not active",
                    peer
                );
                result.disconnect(peer);
                return;
            }
        };
        if p.handle_event(SessionEvent::HandshakeComplete, now) != SessionState::Established {
            result.disconnect(peer);
            return;
        }
        p.attach_session(session_id, local, is_active, tx);
        log_notice!(
            self.logger,
            Facility::Session,
            "Peer {} established ({})",
            peer,
            if is_active { "active" } else { "passive" }
        );

        let sends = match self.peers.get(&peer) {
            Some(p) => self
                .propagation
                .initial_sync(&self.cache, &peer_view(p, &self.config)),
            None => Vec::new(),
        };
        self.dispatch(sends);
    }

    fn message_received(
        &mut self,
        peer: Ipv4Addr,
        session_id: u64,
        msg_type: u8,
        payload: Bytes,
        now: Instant,
        result: &mut ProtocolHandlerResult,
    ) {
        match self.peers.get_mut(&peer) {
            Some(p) if p.session_id == Some(session_id) && p.is_established() => {
                p.record_received(now);
            }
            _ => return,
        }

        match msg_type {
            MSDP_SA => self.sa_received(peer, &payload, now, result),
            MSDP_KEEPALIVE => {
                if !payload.is_empty() {
                    self.violation(peer, format!("keepalive with {} byte payload", payload.len()), now, result);
                } else if let Some(p) = self.peers.get_mut(&peer) {
                    p.counters.keepalives_received += 1;
                }
            }
            MSDP_SA_REQUEST | MSDP_SA_RESPONSE => {
                log_debug!(
                    self.logger,
                    Facility::Session,
                    "Ignoring {} from {}",
                    type_name(msg_type),
                    peer
                );
            }
            other => {
                log_debug!(
                    self.logger,
                    Facility::Session,
                    "Ignoring unknown message type {} from {}",
                    other,
                    peer
                );
            }
        }
    }

    fn sa_received(
        &mut self,
        peer: Ipv4Addr,
        payload: &[u8],
        now: Instant,
        result: &mut ProtocolHandlerResult,
    ) {
        let message = match MsdpSaMessage::parse(payload) {
            Ok(m) => m,
            Err(e) => {
                self.violation(peer, e.to_string(), now, result);
                return;
            }
        };
        for e in &message.invalid {
            if self.violation(peer, e.to_string(), now, result) {
                return;
            }
        }

        let outcome = {
            let from = match self.peers.get(&peer) {
                Some(p) => peer_view(p, &self.config),
                None => return,
            };
            let established = established_views(&self.peers, &self.config);
            self.propagation.on_receive(
                &mut self.cache,
                self.rib.as_ref(),
                &from,
                &established,
                message.rp_address,
                &message.entries,
                now,
            )
        };

        for e in &outcome.rejected {
            if e.is_debug_only() {
                log_debug!(self.logger, Facility::Propagation, "{}", e);
            } else {
                log_warning!(self.logger, Facility::Propagation, "{}", e);
            }
        }
        for key in &outcome.inserted {
            log_debug!(
                self.logger,
                Facility::Propagation,
                "Learned {} from {} (rp {})",
                key,
                peer,
                message.rp_address
            );
        }
        if let Some(p) = self.peers.get_mut(&peer) {
            p.counters.sa_received += (outcome.inserted.len() + outcome.refreshed.len()) as u64;
            p.counters.loops_rejected += outcome.rejected.len() as u64;
        }

        self.dispatch(outcome.sends);
        self.request_spt(&outcome.inserted);
    }

    /// Count a protocol violation; resets the session past the threshold
    ///
    /// Returns true when the session was reset.
    fn violation(
        &mut self,
        peer: Ipv4Addr,
        reason: String,
        now: Instant,
        result: &mut ProtocolHandlerResult,
    ) -> bool {
        let threshold = self.config.violation_threshold;
        let retry = self.config.timers.connect_retry();
        let p = match self.peers.get_mut(&peer) {
            Some(p) => p,
            None => return false,
        };
        log_warning!(
            self.logger,
            Facility::Session,
            "{}",
            MsdpError::ProtocolViolation { peer, reason }
        );
        if !p.record_violation(threshold) {
            return false;
        }
        p.handle_event(SessionEvent::ViolationThresholdExceeded, now);
        log_warning!(
            self.logger,
            Facility::Session,
            "Resetting session with {}: more than {} violations",
            peer,
            threshold
        );
        result.disconnect(peer);
        result.add_timer(TimerRequest::replacing(
            TimerType::ConnectRetry { peer },
            now + retry,
        ));
        true
    }

    fn handle_timer_expired(&mut self, timer_type: TimerType, now: Instant) -> ProtocolHandlerResult {
        let mut result = ProtocolHandlerResult::new();
        if !self.enabled {
            return result;
        }
        let timers = self.config.timers.clone();

        match timer_type {
            TimerType::ConnectRetry { peer } => {
                if let Some(p) = self.peers.get_mut(&peer) {
                    if p.state == SessionState::ResetWait
                        && p.handle_event(SessionEvent::ConnectRetryExpired, now)
                            == SessionState::Connecting
                    {
                        p.counters.connect_attempts += 1;
                        result.add_command(MsdpTcpCommand::Connect { peer });
                    }
                }
            }
            TimerType::SaExpirySweep => {
                let expired = self.cache.expire(now);
                for key in &expired {
                    log_debug!(self.logger, Facility::SaCache, "SA {} expired", key);
                }
                result.add_timer(TimerRequest::replacing(
                    TimerType::SaExpirySweep,
                    now + timers.sweep(),
                ));
            }
            TimerType::Readvertise => {
                let sends = self
                    .propagation
                    .periodic(&self.cache, &established_views(&self.peers, &self.config));
                log_debug!(
                    self.logger,
                    Facility::Propagation,
                    "Periodic advertisement: {} SA messages",
                    sends.len()
                );
                self.dispatch(sends);
                result.add_timer(TimerRequest::replacing(
                    TimerType::Readvertise,
                    now + timers.readvertise(),
                ));
            }
            TimerType::SourcePoll => {
                self.poll_sources(now);
                let pending: Vec<SaKey> = self
                    .cache
                    .iter_ordered()
                    .filter(|e| !e.is_local() && !e.spt_setup)
                    .map(|e| e.key())
                    .collect();
                self.request_spt(&pending);
                result.add_timer(TimerRequest::replacing(
                    TimerType::SourcePoll,
                    now + timers.source_poll(),
                ));
            }
        }
        result
    }

    fn poll_sources(&mut self, now: Instant) {
        let update = self.feeder.poll(self.substrate.as_ref());

        for key in &update.deactivated {
            if self.cache.remove_local(key) {
                log_info!(self.logger, Facility::SourceFeeder, "Withdrew local SA {}", key);
            }
        }

        let mut sends = Vec::new();
        {
            let established = established_views(&self.peers, &self.config);
            for key in update.activated.iter().chain(update.still_active.iter()) {
                let (outcome, s) =
                    self.propagation
                        .on_local_origination(&mut self.cache, &established, *key, now);
                if outcome == UpsertOutcome::Inserted {
                    log_info!(
                        self.logger,
                        Facility::SourceFeeder,
                        "Originating SA {} to {} peers",
                        key,
                        s.len()
                    );
                }
                sends.extend(s);
            }
        }
        self.dispatch(sends);
    }

    fn request_spt(&mut self, keys: &[SaKey]) {
        for key in setup_spt(&mut self.cache, self.substrate.as_ref(), keys) {
            log_info!(self.logger, Facility::SourceFeeder, "SPT requested for {}", key);
        }
    }

    /// Queue SA messages on peer sessions without blocking
    fn dispatch(&mut self, sends: Vec<SaSend>) {
        for send in sends {
            let p = match self.peers.get_mut(&send.peer) {
                Some(p) => p,
                None => continue,
            };
            for (msg, count) in encode_sa(send.rp, &send.entries) {
                match p.send(msg) {
                    Ok(()) => p.counters.sa_sent += count as u64,
                    Err(e @ MsdpError::ResourceExhaustion { .. }) => {
                        log_warning!(self.logger, Facility::Propagation, "{}", e);
                    }
                    Err(e) => log_debug!(self.logger, Facility::Propagation, "{}", e),
                }
            }
        }
    }

    /// Engine loop: apply events until shutdown
    pub async fn run(
        mut self,
        mut event_rx: mpsc::Receiver<ProtocolEvent>,
        timer_tx: mpsc::Sender<TimerRequest>,
        tcp_tx: mpsc::Sender<MsdpTcpCommand>,
        status_tx: watch::Sender<Arc<StatusSnapshot>>,
    ) {
        log_info!(self.logger, Facility::Supervisor, "MSDP engine started");
        status_tx.send_replace(Arc::new(self.snapshot(Instant::now())));

        while let Some(event) = event_rx.recv().await {
            if matches!(event, ProtocolEvent::Shutdown) {
                break;
            }
            let now = Instant::now();
            let result = self.handle_event(event, now);
            self.apply(result, &timer_tx, &tcp_tx);
            status_tx.send_replace(Arc::new(self.snapshot(now)));
        }

        if tcp_tx.try_send(MsdpTcpCommand::Shutdown).is_err() {
            log_debug!(self.logger, Facility::Supervisor, "TCP runner already gone");
        }
        log_info!(self.logger, Facility::Supervisor, "MSDP engine stopped");
    }

    fn apply(
        &self,
        result: ProtocolHandlerResult,
        timer_tx: &mpsc::Sender<TimerRequest>,
        tcp_tx: &mpsc::Sender<MsdpTcpCommand>,
    ) {
        for timer in result.timers {
            if let Err(e) = timer_tx.try_send(timer) {
                log_error!(self.logger, Facility::Timers, "Failed to schedule timer: {}", e);
            }
        }
        for cmd in result.tcp_commands {
            if let Err(e) = tcp_tx.try_send(cmd) {
                log_error!(
                    self.logger,
                    Facility::Session,
                    "Failed to queue TCP command: {}",
                    e
                );
            }
        }
    }
}
