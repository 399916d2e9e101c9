// SPDX-License-Identifier: Apache-2.0 OR MIT
//! MSDP TCP connection management
//!
//! The runner owns the sockets. It listens on every configured local
//! address, dials peers where we are the active side (higher address), and
//! runs one task per session that frames messages, sends keepalives and
//! enforces the hold timer. The engine only sees `MsdpEvent`s and writes
//! through the bounded queue handed over in `SessionEstablished`.

use std::collections::HashMap;
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use bytes::{Buf, Bytes, BytesMut};
use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tokio_util::codec::{Decoder, Encoder, FramedRead, FramedWrite};

use super::msdp::{
    MsdpEvent, MsdpHeader, MsdpKeepaliveBuilder, DEFAULT_HOLD_TIME, DEFAULT_KEEPALIVE_PERIOD,
    MAX_MESSAGE_SIZE, MSDP_PORT,
};
use super::{PacketBuilder, ProtocolEvent};
use crate::logging::{Facility, Logger};

const LISTEN_BACKLOG: u32 = 64;

/// One complete message off the wire, header stripped
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MsdpFrame {
    pub msg_type: u8,
    pub payload: Bytes,
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("invalid message length {0}")]
    InvalidLength(u16),
    #[error("message of {0} bytes exceeds the {} byte limit", MAX_MESSAGE_SIZE)]
    TooLarge(usize),
}

/// TLV framing for a byte stream
///
/// Outbound messages are already encoded by the builders, so encoding only
/// copies bytes into the write buffer.
#[derive(Debug, Default, Clone, Copy)]
pub struct MsdpCodec;

impl Decoder for MsdpCodec {
    type Item = MsdpFrame;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<MsdpFrame>, FrameError> {
        let header = match MsdpHeader::parse(src) {
            Some(h) => h,
            None => return Ok(None),
        };

        let length = header.length as usize;
        if length < MsdpHeader::SIZE {
            return Err(FrameError::InvalidLength(header.length));
        }
        if length > MAX_MESSAGE_SIZE {
            return Err(FrameError::TooLarge(length));
        }
        if src.len() < length {
            src.reserve(length - src.len());
            return Ok(None);
        }

        let mut message = src.split_to(length);
        message.advance(MsdpHeader::SIZE);
        Ok(Some(MsdpFrame {
            msg_type: header.msg_type,
            payload: message.freeze(),
        }))
    }
}

impl Encoder<Bytes> for MsdpCodec {
    type Error = FrameError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), FrameError> {
        dst.extend_from_slice(&item);
        Ok(())
    }
}

/// Why a session task ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    PeerClosed,
    HoldTimerExpired,
    Framing(String),
    Io(String),
    /// The engine dropped its end of the session
    Released,
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CloseReason::PeerClosed => write!(f, "closed by peer"),
            CloseReason::HoldTimerExpired => write!(f, "hold timer expired"),
            CloseReason::Framing(e) => write!(f, "framing error: {}", e),
            CloseReason::Io(e) => write!(f, "i/o error: {}", e),
            CloseReason::Released => write!(f, "released by engine"),
        }
    }
}

/// Transport parameters shared by all sessions
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub port: u16,
    pub keepalive_interval: Duration,
    pub hold_time: Duration,
    /// Capacity of each session's outbound queue
    pub send_queue_depth: usize,
    pub connect_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            port: MSDP_PORT,
            keepalive_interval: DEFAULT_KEEPALIVE_PERIOD,
            hold_time: DEFAULT_HOLD_TIME,
            send_queue_depth: 256,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Commands that can be sent to the MSDP TCP runner
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MsdpTcpCommand {
    /// Accept connections from `peer` on `local_address`
    Configure {
        peer: Ipv4Addr,
        local_address: Ipv4Addr,
    },
    /// Tear down and stop accepting connections from `peer`
    Forget { peer: Ipv4Addr },
    /// Dial the peer if we are the active side; rebinds a missing listener
    Connect { peer: Ipv4Addr },
    /// Drop the current session without reporting it back
    Disconnect { peer: Ipv4Addr },
    Shutdown,
}

struct ActiveSession {
    id: u64,
    is_active: bool,
    task: JoinHandle<()>,
}

type Incoming = (Ipv4Addr, TcpStream, SocketAddr);
type Dialed = (Ipv4Addr, io::Result<TcpStream>);
type Exited = (Ipv4Addr, u64, CloseReason);

/// MSDP TCP runner: owns listeners, dial attempts and session tasks
pub struct MsdpTcpRunner {
    config: SessionConfig,
    cmd_rx: mpsc::Receiver<MsdpTcpCommand>,
    event_tx: mpsc::Sender<ProtocolEvent>,
    logger: Logger,
    /// peer -> local address it is configured on
    peers: HashMap<Ipv4Addr, Ipv4Addr>,
    listeners: HashMap<Ipv4Addr, JoinHandle<()>>,
    dialing: HashMap<Ipv4Addr, JoinHandle<()>>,
    sessions: HashMap<Ipv4Addr, ActiveSession>,
    next_session_id: u64,
    incoming_tx: mpsc::Sender<Incoming>,
    incoming_rx: mpsc::Receiver<Incoming>,
    dialed_tx: mpsc::Sender<Dialed>,
    dialed_rx: mpsc::Receiver<Dialed>,
    exit_tx: mpsc::Sender<Exited>,
    exit_rx: mpsc::Receiver<Exited>,
}

impl MsdpTcpRunner {
    pub fn new(
        config: SessionConfig,
        cmd_rx: mpsc::Receiver<MsdpTcpCommand>,
        event_tx: mpsc::Sender<ProtocolEvent>,
        logger: Logger,
    ) -> Self {
        let (incoming_tx, incoming_rx) = mpsc::channel(16);
        let (dialed_tx, dialed_rx) = mpsc::channel(16);
        let (exit_tx, exit_rx) = mpsc::channel(16);
        Self {
            config,
            cmd_rx,
            event_tx,
            logger,
            peers: HashMap::new(),
            listeners: HashMap::new(),
            dialing: HashMap::new(),
            sessions: HashMap::new(),
            next_session_id: 1,
            incoming_tx,
            incoming_rx,
            dialed_tx,
            dialed_rx,
            exit_tx,
            exit_rx,
        }
    }

    pub async fn run(mut self) {
        loop {
            tokio::select! {
                cmd = self.cmd_rx.recv() => {
                    match cmd {
                        Some(MsdpTcpCommand::Shutdown) | None => break,
                        Some(cmd) => self.handle_command(cmd).await,
                    }
                }
                Some((local, stream, addr)) = self.incoming_rx.recv() => {
                    self.handle_incoming(local, stream, addr).await;
                }
                Some((peer, result)) = self.dialed_rx.recv() => {
                    self.handle_dialed(peer, result).await;
                }
                Some((peer, session_id, reason)) = self.exit_rx.recv() => {
                    self.handle_exit(peer, session_id, reason).await;
                }
            }
        }

        for (_, session) in self.sessions.drain() {
            session.task.abort();
        }
        for (_, task) in self.dialing.drain().chain(self.listeners.drain()) {
            task.abort();
        }
        log_debug!(self.logger, Facility::Session, "TCP runner stopped");
    }

    async fn handle_command(&mut self, cmd: MsdpTcpCommand) {
        match cmd {
            MsdpTcpCommand::Configure {
                peer,
                local_address,
            } => {
                self.peers.insert(peer, local_address);
                self.ensure_listener(local_address);
            }
            MsdpTcpCommand::Forget { peer } => {
                self.disconnect(peer);
                if let Some(local) = self.peers.remove(&peer) {
                    if !self.peers.values().any(|l| *l == local) {
                        if let Some(listener) = self.listeners.remove(&local) {
                            listener.abort();
                            log_info!(self.logger, Facility::Session, "Stopped listening on {}", local);
                        }
                    }
                }
            }
            MsdpTcpCommand::Connect { peer } => self.connect(peer),
            MsdpTcpCommand::Disconnect { peer } => self.disconnect(peer),
            MsdpTcpCommand::Shutdown => {}
        }
    }

    fn ensure_listener(&mut self, local: Ipv4Addr) {
        if self.listeners.contains_key(&local) {
            return;
        }
        match bind_listener(local, self.config.port) {
            Ok(listener) => {
                log_info!(
                    self.logger,
                    Facility::Session,
                    "Listening on {}:{}",
                    local,
                    self.config.port
                );
                let task = tokio::spawn(accept_loop(
                    local,
                    listener,
                    self.incoming_tx.clone(),
                    self.logger.clone(),
                ));
                self.listeners.insert(local, task);
            }
            Err(e) => {
                log_error!(
                    self.logger,
                    Facility::Session,
                    "Failed to listen on {}:{}: {}",
                    local,
                    self.config.port,
                    e
                );
            }
        }
    }

    fn connect(&mut self, peer: Ipv4Addr) {
        let local = match self.peers.get(&peer) {
            Some(local) => *local,
            None => return,
        };
        self.ensure_listener(local);

        // The higher address initiates
        if local <= peer || self.sessions.contains_key(&peer) || self.dialing.contains_key(&peer)
        {
            return;
        }

        log_debug!(self.logger, Facility::Session, "Connecting to {} from {}", peer, local);
        let port = self.config.port;
        let timeout = self.config.connect_timeout;
        let dialed_tx = self.dialed_tx.clone();
        let task = tokio::spawn(async move {
            let result = dial(local, peer, port, timeout).await;
            let _ = dialed_tx.send((peer, result)).await;
        });
        self.dialing.insert(peer, task);
    }

    fn disconnect(&mut self, peer: Ipv4Addr) {
        if let Some(task) = self.dialing.remove(&peer) {
            task.abort();
        }
        if let Some(session) = self.sessions.remove(&peer) {
            session.task.abort();
            log_debug!(
                self.logger,
                Facility::Session,
                "Dropped session {} with {}",
                session.id,
                peer
            );
        }
    }

    async fn handle_incoming(&mut self, local: Ipv4Addr, stream: TcpStream, addr: SocketAddr) {
        let peer = match addr {
            SocketAddr::V4(v4) => *v4.ip(),
            SocketAddr::V6(_) => return,
        };

        match self.peers.get(&peer) {
            Some(configured) if *configured == local => {
                self.establish(peer, local, stream, false).await;
            }
            Some(configured) => {
                log_warning!(
                    self.logger,
                    Facility::Session,
                    "Rejected connection from {} on {}: peer is configured on {}",
                    peer,
                    local,
                    configured
                );
            }
            None => {
                log_warning!(
                    self.logger,
                    Facility::Session,
                    "Rejected connection from unconfigured peer {} on {}",
                    peer,
                    local
                );
            }
        }
    }

    async fn handle_dialed(&mut self, peer: Ipv4Addr, result: io::Result<TcpStream>) {
        if self.dialing.remove(&peer).is_none() {
            // Cancelled while in flight
            return;
        }
        let local = match self.peers.get(&peer) {
            Some(local) => *local,
            None => return,
        };

        match result {
            Ok(stream) => self.establish(peer, local, stream, true).await,
            Err(e) => {
                log_debug!(self.logger, Facility::Session, "Connect to {} failed: {}", peer, e);
                self.emit(MsdpEvent::SessionFailed {
                    peer,
                    reason: e.to_string(),
                })
                .await;
            }
        }
    }

    async fn establish(&mut self, peer: Ipv4Addr, local: Ipv4Addr, stream: TcpStream, is_active: bool) {
        if let Some(existing) = self.sessions.get(&peer) {
            // Collision: the connection initiated by the higher address wins
            let preferred_active = local > peer;
            if existing.is_active == preferred_active || is_active != preferred_active {
                log_debug!(
                    self.logger,
                    Facility::Session,
                    "Connection collision with {}: keeping session {}",
                    peer,
                    existing.id
                );
                return;
            }
            if let Some(loser) = self.sessions.remove(&peer) {
                loser.task.abort();
                log_debug!(
                    self.logger,
                    Facility::Session,
                    "Connection collision with {}: replacing session {}",
                    peer,
                    loser.id
                );
            }
        }

        if let Err(e) = stream.set_nodelay(true) {
            log_debug!(self.logger, Facility::Session, "set_nodelay for {} failed: {}", peer, e);
        }

        let session_id = self.next_session_id;
        self.next_session_id += 1;
        let (out_tx, out_rx) = mpsc::channel(self.config.send_queue_depth.max(1));

        // The engine must learn about the session before its first message
        self.emit(MsdpEvent::SessionEstablished {
            peer,
            local,
            is_active,
            session_id,
            tx: out_tx,
        })
        .await;

        log_info!(
            self.logger,
            Facility::Session,
            "Session {} with {} up ({})",
            session_id,
            peer,
            if is_active { "active" } else { "passive" }
        );

        let task = tokio::spawn(run_session(
            peer,
            session_id,
            stream,
            out_rx,
            self.event_tx.clone(),
            self.exit_tx.clone(),
            self.config.clone(),
        ));
        self.sessions.insert(
            peer,
            ActiveSession {
                id: session_id,
                is_active,
                task,
            },
        );
    }

    async fn handle_exit(&mut self, peer: Ipv4Addr, session_id: u64, reason: CloseReason) {
        match self.sessions.get(&peer) {
            Some(session) if session.id == session_id => {
                self.sessions.remove(&peer);
            }
            _ => return,
        }
        log_info!(
            self.logger,
            Facility::Session,
            "Session {} with {} closed: {}",
            session_id,
            peer,
            reason
        );
        self.emit(MsdpEvent::SessionClosed {
            peer,
            session_id,
            reason,
        })
        .await;
    }

    async fn emit(&self, event: MsdpEvent) {
        if self.event_tx.send(ProtocolEvent::Msdp(event)).await.is_err() {
            log_debug!(self.logger, Facility::Session, "Engine gone, event dropped");
        }
    }
}

fn bind_listener(local: Ipv4Addr, port: u16) -> io::Result<TcpListener> {
    let socket = TcpSocket::new_v4()?;
    socket.set_reuseaddr(true)?;
    socket.bind(SocketAddr::from((local, port)))?;
    socket.listen(LISTEN_BACKLOG)
}

async fn accept_loop(
    local: Ipv4Addr,
    listener: TcpListener,
    incoming_tx: mpsc::Sender<Incoming>,
    logger: Logger,
) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                if incoming_tx.send((local, stream, addr)).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                log_warning!(logger, Facility::Session, "Accept on {} failed: {}", local, e);
            }
        }
    }
}

async fn dial(local: Ipv4Addr, peer: Ipv4Addr, port: u16, timeout: Duration) -> io::Result<TcpStream> {
    let socket = TcpSocket::new_v4()?;
    socket.set_reuseaddr(true)?;
    socket.bind(SocketAddr::from((local, 0)))?;
    match tokio::time::timeout(timeout, socket.connect(SocketAddr::from((peer, port)))).await {
        Ok(result) => result,
        Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "connect timed out")),
    }
}

async fn run_session(
    peer: Ipv4Addr,
    session_id: u64,
    stream: TcpStream,
    out_rx: mpsc::Receiver<Bytes>,
    event_tx: mpsc::Sender<ProtocolEvent>,
    exit_tx: mpsc::Sender<Exited>,
    config: SessionConfig,
) {
    let reason = session_loop(peer, session_id, stream, out_rx, event_tx, &config).await;
    let _ = exit_tx.send((peer, session_id, reason)).await;
}

async fn session_loop(
    peer: Ipv4Addr,
    session_id: u64,
    stream: TcpStream,
    mut out_rx: mpsc::Receiver<Bytes>,
    event_tx: mpsc::Sender<ProtocolEvent>,
    config: &SessionConfig,
) -> CloseReason {
    let (read_half, write_half) = stream.into_split();
    let mut reader = FramedRead::new(read_half, MsdpCodec);
    let mut writer = FramedWrite::new(write_half, MsdpCodec);
    let keepalive = Bytes::from(MsdpKeepaliveBuilder::new().build());

    if let Err(e) = writer.send(keepalive.clone()).await {
        return CloseReason::Io(e.to_string());
    }
    let mut next_keepalive = Instant::now() + config.keepalive_interval;
    let mut hold_deadline = Instant::now() + config.hold_time;

    loop {
        tokio::select! {
            frame = reader.next() => match frame {
                Some(Ok(frame)) => {
                    hold_deadline = Instant::now() + config.hold_time;
                    let event = MsdpEvent::MessageReceived {
                        peer,
                        session_id,
                        msg_type: frame.msg_type,
                        payload: frame.payload,
                    };
                    if event_tx.send(ProtocolEvent::Msdp(event)).await.is_err() {
                        return CloseReason::Released;
                    }
                }
                Some(Err(FrameError::Io(e))) => return CloseReason::Io(e.to_string()),
                Some(Err(e)) => return CloseReason::Framing(e.to_string()),
                None => return CloseReason::PeerClosed,
            },
            msg = out_rx.recv() => match msg {
                Some(msg) => {
                    if let Err(e) = writer.send(msg).await {
                        return CloseReason::Io(e.to_string());
                    }
                    // Any message counts as a keepalive
                    next_keepalive = Instant::now() + config.keepalive_interval;
                }
                None => return CloseReason::Released,
            },
            _ = sleep_until(next_keepalive) => {
                if let Err(e) = writer.send(keepalive.clone()).await {
                    return CloseReason::Io(e.to_string());
                }
                next_keepalive = Instant::now() + config.keepalive_interval;
            }
            _ = sleep_until(hold_deadline) => return CloseReason::HoldTimerExpired,
        }
    }
}

/// Start the MSDP TCP runner on its own task
pub fn start_msdp_tcp(
    config: SessionConfig,
    event_tx: mpsc::Sender<ProtocolEvent>,
    logger: Logger,
) -> (mpsc::Sender<MsdpTcpCommand>, JoinHandle<()>) {
    let (cmd_tx, cmd_rx) = mpsc::channel(256);
    let runner = MsdpTcpRunner::new(config, cmd_rx, event_tx, logger);
    (cmd_tx, tokio::spawn(runner.run()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::Severity;
    use crate::protocols::msdp::{encode_sa, MSDP_KEEPALIVE, MSDP_SA};
    use tokio::io::AsyncReadExt;

    fn addr(s: &str) -> Ipv4Addr {
        s.parse().unwrap()
    }

    #[test]
    fn test_decode_waits_for_complete_message() {
        let mut codec = MsdpCodec;
        let mut buf = BytesMut::from(&[0x01, 0x00][..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(&[0x05, 0xAA]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(&[0xBB, 0x04, 0x00, 0x03]);
        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame.msg_type, 1);
        assert_eq!(&frame.payload[..], &[0xAA, 0xBB][..]);

        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame.msg_type, MSDP_KEEPALIVE);
        assert!(frame.payload.is_empty());
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_rejects_bad_lengths() {
        let mut codec = MsdpCodec;
        let mut buf = BytesMut::from(&[0x04, 0x00, 0x02][..]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(FrameError::InvalidLength(2))
        ));

        let mut buf = BytesMut::from(&[0x01, 0xFF, 0xFF][..]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(FrameError::TooLarge(65535))
        ));

        let at_limit = (MAX_MESSAGE_SIZE as u16).to_be_bytes();
        let mut buf = BytesMut::from(&[0x01, at_limit[0], at_limit[1]][..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_encode_passes_bytes_through() {
        let mut codec = MsdpCodec;
        let mut dst = BytesMut::new();
        let keepalive = Bytes::from(MsdpKeepaliveBuilder::new().build());
        codec.encode(keepalive.clone(), &mut dst).unwrap();
        assert_eq!(&dst[..], &keepalive[..]);
    }

    #[test]
    fn test_close_reason_display() {
        assert_eq!(CloseReason::HoldTimerExpired.to_string(), "hold timer expired");
        assert_eq!(
            CloseReason::Framing("bad".into()).to_string(),
            "framing error: bad"
        );
    }

    fn test_config(port: u16) -> SessionConfig {
        SessionConfig {
            port,
            keepalive_interval: Duration::from_millis(200),
            hold_time: Duration::from_secs(2),
            send_queue_depth: 8,
            connect_timeout: Duration::from_secs(2),
        }
    }

    async fn next_event<F>(rx: &mut mpsc::Receiver<ProtocolEvent>, mut pred: F) -> MsdpEvent
    where
        F: FnMut(&MsdpEvent) -> bool,
    {
        let wait = async {
            loop {
                match rx.recv().await {
                    Some(ProtocolEvent::Msdp(event)) if pred(&event) => return event,
                    Some(_) => continue,
                    None => panic!("event channel closed"),
                }
            }
        };
        tokio::time::timeout(Duration::from_secs(5), wait)
            .await
            .expect("timed out waiting for event")
    }

    #[tokio::test]
    async fn test_session_between_two_runners() {
        let port = 46391;
        let high = addr("127.10.0.2");
        let low = addr("127.10.0.1");
        let (logger, _) = Logger::capture(64, Severity::Debug);

        let (high_events_tx, mut high_events) = mpsc::channel(64);
        let (low_events_tx, mut low_events) = mpsc::channel(64);
        let (high_cmd, high_task) = start_msdp_tcp(test_config(port), high_events_tx, logger.clone());
        let (low_cmd, low_task) = start_msdp_tcp(test_config(port), low_events_tx, logger);

        low_cmd
            .send(MsdpTcpCommand::Configure { peer: high, local_address: low })
            .await
            .unwrap();
        high_cmd
            .send(MsdpTcpCommand::Configure { peer: low, local_address: high })
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        // The lower address never dials
        low_cmd.send(MsdpTcpCommand::Connect { peer: high }).await.unwrap();
        high_cmd.send(MsdpTcpCommand::Connect { peer: low }).await.unwrap();

        let high_tx = match next_event(&mut high_events, |e| {
            matches!(e, MsdpEvent::SessionEstablished { .. })
        })
        .await
        {
            MsdpEvent::SessionEstablished { peer, local, is_active, tx, .. } => {
                assert_eq!(peer, low);
                assert_eq!(local, high);
                assert!(is_active);
                tx
            }
            _ => unreachable!(),
        };
        // Holding the writer keeps the session open
        let (low_session, _low_tx) = match next_event(&mut low_events, |e| {
            matches!(e, MsdpEvent::SessionEstablished { .. })
        })
        .await
        {
            MsdpEvent::SessionEstablished { peer, is_active, session_id, tx, .. } => {
                assert_eq!(peer, high);
                assert!(!is_active);
                (session_id, tx)
            }
            _ => unreachable!(),
        };

        let (sa, _) = encode_sa(high, &[(addr("10.1.1.1"), addr("239.1.1.1"))])
            .into_iter()
            .next()
            .unwrap();
        high_tx.send(sa).await.unwrap();

        match next_event(&mut low_events, |e| {
            matches!(e, MsdpEvent::MessageReceived { msg_type: MSDP_SA, .. })
        })
        .await
        {
            MsdpEvent::MessageReceived { session_id, payload, .. } => {
                assert_eq!(session_id, low_session);
                assert_eq!(payload.len(), 1 + 4 + 12);
            }
            _ => unreachable!(),
        }

        // Dropping the session on one side closes it on the other
        high_cmd.send(MsdpTcpCommand::Disconnect { peer: low }).await.unwrap();
        match next_event(&mut low_events, |e| matches!(e, MsdpEvent::SessionClosed { .. })).await {
            MsdpEvent::SessionClosed { session_id, reason, .. } => {
                assert_eq!(session_id, low_session);
                // FIN, or RST if a keepalive was still unread when the task was aborted
                assert!(
                    matches!(reason, CloseReason::PeerClosed | CloseReason::Io(_)),
                    "unexpected close reason {:?}",
                    reason
                );
            }
            _ => unreachable!(),
        }

        high_cmd.send(MsdpTcpCommand::Shutdown).await.unwrap();
        low_cmd.send(MsdpTcpCommand::Shutdown).await.unwrap();
        high_task.await.unwrap();
        low_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_unconfigured_peer_rejected() {
        let port = 46392;
        let local = addr("127.10.1.1");
        let (logger, ring) = Logger::capture(64, Severity::Debug);
        let (events_tx, mut events) = mpsc::channel(16);
        let (cmd, task) = start_msdp_tcp(test_config(port), events_tx, logger);

        cmd.send(MsdpTcpCommand::Configure {
            peer: addr("127.10.1.2"),
            local_address: local,
        })
        .await
        .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let socket = TcpSocket::new_v4().unwrap();
        socket.bind(SocketAddr::from((addr("127.10.1.9"), 0))).unwrap();
        let mut stream = socket.connect(SocketAddr::from((local, port))).await.unwrap();

        let mut buf = [0u8; 16];
        let n = tokio::time::timeout(Duration::from_secs(5), stream.read(&mut buf))
            .await
            .expect("connection was not closed")
            .unwrap_or(0);
        assert_eq!(n, 0);
        assert!(events.try_recv().is_err());

        let mut rejected = false;
        while let Some(entry) = ring.read() {
            if entry.get_message().contains("unconfigured peer 127.10.1.9") {
                rejected = true;
            }
        }
        assert!(rejected);

        cmd.send(MsdpTcpCommand::Shutdown).await.unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_dial_failure_reported() {
        let (logger, _) = Logger::capture(16, Severity::Debug);
        let (events_tx, mut events) = mpsc::channel(16);
        // Nothing listens on this port at the peer address
        let (cmd, task) = start_msdp_tcp(test_config(46393), events_tx, logger);

        cmd.send(MsdpTcpCommand::Configure {
            peer: addr("127.10.2.1"),
            local_address: addr("127.10.2.2"),
        })
        .await
        .unwrap();
        cmd.send(MsdpTcpCommand::Connect { peer: addr("127.10.2.1") })
            .await
            .unwrap();

        match next_event(&mut events, |e| matches!(e, MsdpEvent::SessionFailed { .. })).await {
            MsdpEvent::SessionFailed { peer, .. } => assert_eq!(peer, addr("127.10.2.1")),
            _ => unreachable!(),
        }

        cmd.send(MsdpTcpCommand::Shutdown).await.unwrap();
        task.await.unwrap();
    }
}
