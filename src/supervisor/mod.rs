// SPDX-License-Identifier: Apache-2.0 OR MIT

// Submodules
mod actions;
mod command_handler;
mod protocol_state;
mod timer_manager;

// Re-exports
pub use actions::ProtocolHandlerResult;
pub use command_handler::{handle_supervisor_command, CommandAction};
pub use protocol_state::ProtocolState;
pub use timer_manager::ProtocolTimerManager;

use anyhow::{anyhow, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Duration;

use crate::config::Config;
use crate::logging::{Facility, LogRegistry, Logger};
use crate::protocols::msdp::MsdpEvent;
use crate::protocols::msdp_tcp::start_msdp_tcp;
use crate::protocols::ProtocolEvent;
use crate::status::StatusSnapshot;
use crate::substrate::StaticSubstrate;
use crate::{Response, SupervisorCommand};

const EVENT_CHANNEL_DEPTH: usize = 1024;
const TIMER_CHANNEL_DEPTH: usize = 256;
/// Time allowed for the engine and its helpers to stop
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);
/// Time a control client gets to send its command and read the reply
const CLIENT_TIMEOUT: Duration = Duration::from_secs(5);

fn facility_logger(registry: &LogRegistry, facility: Facility) -> Logger {
    registry
        .get_logger(facility)
        .unwrap_or_else(Logger::stderr_json)
}

/// A running engine with its timer manager and TCP runner
pub struct ProtocolHandle {
    pub event_tx: mpsc::Sender<ProtocolEvent>,
    pub status_rx: watch::Receiver<Arc<StatusSnapshot>>,
    pub substrate: Arc<StaticSubstrate>,
    tasks: Vec<JoinHandle<()>>,
}

impl ProtocolHandle {
    /// Latest published status
    pub fn status(&self) -> Arc<StatusSnapshot> {
        Arc::clone(&self.status_rx.borrow())
    }

    pub async fn dispatch(&self, event: MsdpEvent) -> Result<()> {
        self.event_tx
            .send(ProtocolEvent::Msdp(event))
            .await
            .map_err(|_| anyhow!("MSDP engine is not running"))
    }

    /// Stop the engine; it tells the TCP runner to close every session
    pub async fn shutdown(self) {
        let _ = self.event_tx.send(ProtocolEvent::Shutdown).await;
        drop(self.event_tx);
        for task in self.tasks {
            let abort = task.abort_handle();
            if tokio::time::timeout(SHUTDOWN_TIMEOUT, task).await.is_err() {
                abort.abort();
            }
        }
    }
}

/// Spawn the engine, the timer manager and the TCP runner for `config`
///
/// Peers that fail validation are logged and skipped; the rest are added
/// before the engine is enabled (when `config.enabled` is set).
pub fn start_protocol_subsystem(config: &Config, registry: &LogRegistry) -> Result<ProtocolHandle> {
    config.validate()?;
    let logger = facility_logger(registry, Facility::Supervisor);

    let substrate = Arc::new(config.build_substrate());
    let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_DEPTH);
    let (timer_tx, timer_rx) = mpsc::channel(TIMER_CHANNEL_DEPTH);
    let (status_tx, status_rx) = watch::channel(Arc::new(StatusSnapshot::default()));

    let timer_manager = ProtocolTimerManager::new(
        timer_rx,
        event_tx.clone(),
        facility_logger(registry, Facility::Timers),
    );
    let timer_task = tokio::spawn(timer_manager.run());

    let (tcp_tx, tcp_task) = start_msdp_tcp(
        config.session_config(),
        event_tx.clone(),
        facility_logger(registry, Facility::Session),
    );

    let state = ProtocolState::new(
        config.clone(),
        substrate.clone(),
        substrate.clone(),
        logger.clone(),
    );
    let engine_task = tokio::spawn(state.run(event_rx, timer_tx, tcp_tx, status_tx));

    let (peers, errors) = config.partition_peers();
    for e in errors {
        log_error!(logger, Facility::Config, "Skipping peer: {}", e);
    }
    for peer in peers {
        event_tx
            .try_send(ProtocolEvent::Msdp(MsdpEvent::AddPeer { config: peer }))
            .map_err(|e| anyhow!("failed to queue peer: {}", e))?;
    }
    if config.enabled {
        event_tx
            .try_send(ProtocolEvent::Msdp(MsdpEvent::Enable))
            .map_err(|e| anyhow!("failed to enable MSDP: {}", e))?;
    }

    log_info!(
        logger,
        Facility::Supervisor,
        "MSDP subsystem started (router {}, AS {})",
        config.router_id,
        config.local_as
    );

    Ok(ProtocolHandle {
        event_tx,
        status_rx,
        substrate,
        // The engine stops first; it owns the channels the others listen on
        tasks: vec![engine_task, tcp_task, timer_task],
    })
}

/// Everything a control client may touch
#[derive(Clone)]
struct ControlContext {
    config: Arc<Config>,
    event_tx: mpsc::Sender<ProtocolEvent>,
    status_rx: watch::Receiver<Arc<StatusSnapshot>>,
    substrate: Arc<StaticSubstrate>,
    registry: Arc<LogRegistry>,
}

async fn handle_client(mut client_stream: UnixStream, ctx: &ControlContext) -> Result<()> {
    let mut buffer = Vec::new();
    client_stream.read_to_end(&mut buffer).await?;

    let response = match serde_json::from_slice::<SupervisorCommand>(&buffer) {
        Ok(command) => {
            let snapshot = Arc::clone(&ctx.status_rx.borrow());
            let (response, action) = handle_supervisor_command(
                command,
                &snapshot,
                &ctx.config,
                &ctx.substrate,
                &ctx.registry,
            );
            match action {
                CommandAction::None => response,
                CommandAction::Dispatch(event) => {
                    match ctx.event_tx.send(ProtocolEvent::Msdp(event)).await {
                        Ok(()) => response,
                        Err(_) => Response::Error("MSDP engine is not running".to_string()),
                    }
                }
            }
        }
        Err(e) => Response::Error(format!("Invalid command: {}", e)),
    };

    let response_bytes = serde_json::to_vec(&response)?;
    client_stream.write_all(&response_bytes).await?;
    client_stream.shutdown().await?;
    Ok(())
}

fn bind_control_socket(path: &Path) -> Result<UnixListener> {
    if path.exists() {
        std::fs::remove_file(path)?;
    }
    Ok(UnixListener::bind(path)?)
}

/// Run the daemon until `shutdown_rx` fires
pub async fn run(
    config: Config,
    control_socket_path: PathBuf,
    registry: Arc<LogRegistry>,
    mut shutdown_rx: oneshot::Receiver<()>,
) -> Result<()> {
    let logger = facility_logger(&registry, Facility::ControlSocket);
    let handle = start_protocol_subsystem(&config, &registry)?;

    let listener = bind_control_socket(&control_socket_path)?;
    log_info!(
        logger,
        Facility::ControlSocket,
        "Control socket listening on {}",
        control_socket_path.display()
    );

    let ctx = ControlContext {
        config: Arc::new(config),
        event_tx: handle.event_tx.clone(),
        status_rx: handle.status_rx.clone(),
        substrate: Arc::clone(&handle.substrate),
        registry,
    };

    loop {
        tokio::select! {
            _ = &mut shutdown_rx => {
                log_info!(logger, Facility::Supervisor, "Shutting down");
                break;
            }

            accepted = listener.accept() => {
                let client_stream = match accepted {
                    Ok((stream, _)) => stream,
                    Err(e) => {
                        log_warning!(logger, Facility::ControlSocket, "Accept failed: {}", e);
                        continue;
                    }
                };
                // Clients are served one at a time; each gets a bounded slot
                match tokio::time::timeout(CLIENT_TIMEOUT, handle_client(client_stream, &ctx)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        log_error!(logger, Facility::ControlSocket, "Error handling client: {}", e);
                    }
                    Err(_) => {
                        log_debug!(logger, Facility::ControlSocket, "Control client timed out");
                    }
                }
            }
        }
    }

    drop(ctx);
    handle.shutdown().await;
    if let Err(e) = std::fs::remove_file(&control_socket_path) {
        log_debug!(logger, Facility::ControlSocket, "Could not remove control socket: {}", e);
    }
    Ok(())
}
