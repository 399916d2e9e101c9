// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Shared helpers for the integration tests

#![allow(dead_code)]

use std::net::Ipv4Addr;
use std::path::Path;
use std::time::Duration;

use msdpd::config::{Config, TimerConfig};
use msdpd::logging::{LogRegistry, Severity};
use msdpd::protocols::msdp_peer::MsdpPeerConfig;
use msdpd::status::StatusSnapshot;
use msdpd::supervisor::{start_protocol_subsystem, ProtocolHandle};
use msdpd::{Response, SupervisorCommand};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;

/// All routers in the tests listen on the same port of different loopback
/// addresses
pub const TEST_PORT: u16 = 46500;

pub const CONVERGENCE_TIMEOUT: Duration = Duration::from_secs(20);

pub fn addr(s: &str) -> Ipv4Addr {
    s.parse().unwrap()
}

/// Timers short enough for a test to converge in a few seconds
pub fn fast_timers() -> TimerConfig {
    TimerConfig {
        keepalive: 0.5,
        hold: 3.0,
        connect_retry: 0.2,
        sa_ttl: 30.0,
        sweep: 0.25,
        readvertise: 1.0,
        forward_holddown: 0.0,
        source_poll: 0.2,
        connect_timeout: 1.0,
    }
}

pub fn router_config(router_id: &str, local_as: u32) -> Config {
    let mut config = Config::new(addr(router_id), local_as);
    config.port = TEST_PORT;
    config.timers = fast_timers();
    config
}

/// Peer `remote` (in AS `remote_as`) from the router at `local`
pub fn peer(local: &str, remote: &str, remote_as: u32) -> MsdpPeerConfig {
    let mut peer = MsdpPeerConfig::new(addr(remote), addr(local));
    peer.remote_as = Some(remote_as);
    peer
}

pub fn start(config: &Config) -> ProtocolHandle {
    let registry = LogRegistry::with_level(Severity::Info);
    start_protocol_subsystem(config, &registry).unwrap()
}

/// Wait until `f` holds for the router's status
pub async fn wait_until<F>(handle: &ProtocolHandle, f: F) -> bool
where
    F: Fn(&StatusSnapshot) -> bool,
{
    let mut rx = handle.status_rx.clone();
    let converged = tokio::time::timeout(CONVERGENCE_TIMEOUT, async {
        loop {
            if f(&rx.borrow_and_update()) {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    })
    .await
    .is_ok();
    converged && f(&handle.status())
}

pub fn peer_state(status: &StatusSnapshot, peer: &str) -> Option<String> {
    status
        .show_peers()
        .get(&addr(peer))
        .map(|row| row.state.to_string())
}

pub fn is_established(status: &StatusSnapshot, peer: &str) -> bool {
    peer_state(status, peer).as_deref() == Some("established")
}

/// Send one command over the control socket and read the reply
pub async fn send_command(socket_path: &Path, command: &SupervisorCommand) -> Response {
    let mut stream = UnixStream::connect(socket_path).await.unwrap();
    stream
        .write_all(&serde_json::to_vec(command).unwrap())
        .await
        .unwrap();
    stream.shutdown().await.unwrap();
    let mut buffer = Vec::new();
    stream.read_to_end(&mut buffer).await.unwrap();
    serde_json::from_slice(&buffer).unwrap()
}

/// Wait for the daemon to accept connections on `socket_path`
pub async fn wait_for_socket(socket_path: &Path) {
    for _ in 0..100 {
        if UnixStream::connect(socket_path).await.is_ok() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("control socket {} never came up", socket_path.display());
}
