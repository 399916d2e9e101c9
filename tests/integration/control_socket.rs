// SPDX-License-Identifier: Apache-2.0 OR MIT
//! The daemon's Unix control socket, driven the way `msdpctl` drives it

use std::time::Duration;

use msdpd::config::Config;
use msdpd::logging::{Facility, LogRegistry, Severity};
use msdpd::supervisor;
use msdpd::{Response, SupervisorCommand};
use std::sync::Arc;

use super::common::*;

/// Poll a query until `f` accepts the response
async fn poll_until<F>(socket: &std::path::Path, command: SupervisorCommand, f: F) -> bool
where
    F: Fn(&Response) -> bool,
{
    for _ in 0..100 {
        if f(&send_command(socket, &command).await) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

#[tokio::test]
async fn test_control_socket_commands() {
    let dir = tempfile::tempdir().unwrap();
    let socket = dir.path().join("msdpd.sock");
    let config = router_config("127.6.1.1", 65060);

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    let registry = Arc::new(LogRegistry::with_level(Severity::Info));
    let daemon = tokio::spawn(supervisor::run(
        config,
        socket.clone(),
        Arc::clone(&registry),
        shutdown_rx,
    ));
    wait_for_socket(&socket).await;

    assert_eq!(
        send_command(&socket, &SupervisorCommand::Ping).await,
        Response::Success("pong".to_string())
    );

    // Peers added at runtime show up in "show peers"
    let response = send_command(
        &socket,
        &SupervisorCommand::AddPeer {
            address: addr("127.6.2.1"),
            local_address: addr("127.6.1.1"),
            remote_as: Some(65061),
            group: None,
            description: Some("lab".to_string()),
        },
    )
    .await;
    assert!(matches!(response, Response::Success(_)));
    assert!(
        poll_until(&socket, SupervisorCommand::GetPeers, |r| matches!(
            r,
            Response::Peers(peers) if peers.contains_key(&addr("127.6.2.1"))
        ))
        .await
    );

    // A local source is announced
    send_command(
        &socket,
        &SupervisorCommand::SourceActive {
            source: addr("10.6.1.10"),
            group: addr("239.6.6.6"),
        },
    )
    .await;
    assert!(
        poll_until(&socket, SupervisorCommand::GetSourceActive, |r| matches!(
            r,
            Response::SourceActive(view)
                if view.get(&addr("239.6.6.6")).is_some_and(|g| g.contains_key(&addr("10.6.1.10")))
        ))
        .await
    );
    assert!(
        poll_until(&socket, SupervisorCommand::GetStats, |r| matches!(
            r,
            Response::Stats(stats) if stats.sa_local == 1 && stats.peers_configured == 1
        ))
        .await
    );

    // Bad input is answered, not fatal
    let response = send_command(
        &socket,
        &SupervisorCommand::SourceActive {
            source: addr("10.6.1.10"),
            group: addr("10.6.6.6"),
        },
    )
    .await;
    assert!(matches!(response, Response::Error(_)));

    // Log levels are shared with the daemon's registry
    send_command(
        &socket,
        &SupervisorCommand::SetFacilityLogLevel {
            facility: Facility::Session,
            level: Severity::Debug,
        },
    )
    .await;
    assert_eq!(registry.get_facility_level(Facility::Session), Severity::Debug);

    // Removing the peer empties "show peers"
    send_command(
        &socket,
        &SupervisorCommand::RemovePeer {
            address: addr("127.6.2.1"),
        },
    )
    .await;
    assert!(
        poll_until(&socket, SupervisorCommand::GetPeers, |r| matches!(
            r,
            Response::Peers(peers) if peers.is_empty()
        ))
        .await
    );

    shutdown_tx.send(()).unwrap();
    daemon.await.unwrap().unwrap();
    assert!(!socket.exists());
}

#[tokio::test]
async fn test_malformed_request_gets_error() {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::UnixStream;

    let dir = tempfile::tempdir().unwrap();
    let socket = dir.path().join("msdpd.sock");
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    let daemon = tokio::spawn(supervisor::run(
        router_config("127.6.3.1", 65063),
        socket.clone(),
        Arc::new(LogRegistry::with_level(Severity::Info)),
        shutdown_rx,
    ));
    wait_for_socket(&socket).await;

    let mut stream = UnixStream::connect(&socket).await.unwrap();
    stream.write_all(b"{\"NoSuchCommand\":{}}").await.unwrap();
    stream.shutdown().await.unwrap();
    let mut buffer = Vec::new();
    stream.read_to_end(&mut buffer).await.unwrap();
    let response: Response = serde_json::from_slice(&buffer).unwrap();
    assert!(matches!(response, Response::Error(e) if e.contains("Invalid command")));

    // The daemon keeps serving
    assert_eq!(
        send_command(&socket, &SupervisorCommand::Ping).await,
        Response::Success("pong".to_string())
    );

    shutdown_tx.send(()).unwrap();
    daemon.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_daemon_from_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("msdpd.json5");
    std::fs::write(
        &path,
        r#"{
            // router identity
            router_id: "127.6.5.1",
            local_as: 65065,
            port: 46500,
            log_level: "warning",
            groups: { core: { mesh: true } },
            peers: [
                { address: "127.6.6.1", local_address: "127.6.5.1", remote_as: 65066, group: "core" },
                { address: "127.6.7.1", local_address: "127.6.5.1", group: "nonexistent" },
            ],
            local_sources: [ { source: "10.6.5.10", group: "239.6.5.5" } ],
        }"#,
    )
    .unwrap();

    let config = Config::load_from_file(&path).unwrap();
    assert_eq!(config.log_level().unwrap(), Severity::Warning);
    let handle = start(&config);

    // The peer with an unknown group is skipped; the rest still runs
    assert!(
        wait_until(&handle, |s| s.enabled
            && s.peers.len() == 1
            && s.peers[0].mesh
            && s.stats.sa_local == 1)
        .await
    );
    handle.shutdown().await;
}
