// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Control command handling.
//!
//! `handle_supervisor_command` is pure apart from the substrate tables and
//! log levels it edits. Queries are answered from the latest
//! `StatusSnapshot`; anything that changes engine state comes back as a
//! `CommandAction::Dispatch` for the caller to forward to the engine.

use crate::config::Config;
use crate::logging::LogRegistry;
use crate::protocols::msdp::MsdpEvent;
use crate::protocols::msdp_peer::MsdpPeerConfig;
use crate::status::StatusSnapshot;
use crate::substrate::StaticSubstrate;
use crate::validation::{validate_multicast_group, validate_source_group};
use crate::{Response, SupervisorCommand};

/// Follow-up needed after a command was handled
#[derive(Debug)]
pub enum CommandAction {
    None,
    /// Forward an event to the engine
    Dispatch(MsdpEvent),
}

fn error(message: String) -> (Response, CommandAction) {
    (Response::Error(message), CommandAction::None)
}

pub fn handle_supervisor_command(
    command: SupervisorCommand,
    snapshot: &StatusSnapshot,
    config: &Config,
    substrate: &StaticSubstrate,
    registry: &LogRegistry,
) -> (Response, CommandAction) {
    match command {
        SupervisorCommand::GetPeers => (Response::Peers(snapshot.show_peers()), CommandAction::None),

        SupervisorCommand::GetPeersDetail => (
            Response::PeersDetail(snapshot.peers.clone()),
            CommandAction::None,
        ),

        SupervisorCommand::GetSourceActive => (
            Response::SourceActive(snapshot.show_source_active()),
            CommandAction::None,
        ),

        SupervisorCommand::GetSourceActiveDetail => (
            Response::SourceActiveDetail(snapshot.sa.clone()),
            CommandAction::None,
        ),

        SupervisorCommand::GetStats => (Response::Stats(snapshot.stats.clone()), CommandAction::None),

        SupervisorCommand::AddPeer {
            address,
            local_address,
            remote_as,
            group,
            description,
        } => {
            let peer = MsdpPeerConfig {
                address,
                local_address,
                remote_as,
                group,
                description,
            };
            if let Err(e) = config.validate_peer(&peer) {
                return error(e.to_string());
            }
            if snapshot.peer(address).is_some() {
                return error(format!("Peer {} is already configured", address));
            }
            (
                Response::Success(format!("Peer {} added", address)),
                CommandAction::Dispatch(MsdpEvent::AddPeer { config: peer }),
            )
        }

        SupervisorCommand::RemovePeer { address } => {
            if snapshot.peer(address).is_none() {
                return error(format!("Peer {} is not configured", address));
            }
            (
                Response::Success(format!("Peer {} removed", address)),
                CommandAction::Dispatch(MsdpEvent::RemovePeer { peer: address }),
            )
        }

        SupervisorCommand::ClearSaCache => (
            Response::Success("SA cache cleared".to_string()),
            CommandAction::Dispatch(MsdpEvent::ClearSaCache),
        ),

        SupervisorCommand::SourceActive { source, group } => {
            if let Err(e) = validate_source_group(source, group) {
                return error(e);
            }
            if substrate.add_source(source, group) {
                (
                    Response::Success(format!("Source ({}, {}) active", source, group)),
                    CommandAction::Dispatch(MsdpEvent::SourcesChanged),
                )
            } else {
                (
                    Response::Success(format!("Source ({}, {}) was already active", source, group)),
                    CommandAction::None,
                )
            }
        }

        SupervisorCommand::SourceInactive { source, group } => {
            if substrate.remove_source(source, group) {
                (
                    Response::Success(format!("Source ({}, {}) inactive", source, group)),
                    CommandAction::Dispatch(MsdpEvent::SourcesChanged),
                )
            } else {
                error(format!("Source ({}, {}) is not active", source, group))
            }
        }

        SupervisorCommand::AddReceiver { group } => {
            if let Err(e) = validate_multicast_group(group, "group") {
                return error(e);
            }
            substrate.add_receiver(group);
            // Learned entries for the group may now need an SPT
            (
                Response::Success(format!("Receivers present for {}", group)),
                CommandAction::Dispatch(MsdpEvent::SourcesChanged),
            )
        }

        SupervisorCommand::RemoveReceiver { group } => {
            if substrate.remove_receiver(group) {
                (
                    Response::Success(format!("Receivers gone for {}", group)),
                    CommandAction::None,
                )
            } else {
                error(format!("No receivers for {}", group))
            }
        }

        SupervisorCommand::AddRoute {
            prefix,
            first_hop_as,
        } => {
            if first_hop_as == 0 {
                return error("first_hop_as cannot be 0".to_string());
            }
            substrate.add_route(prefix, first_hop_as);
            (
                Response::Success(format!("Route {} via AS {}", prefix, first_hop_as)),
                CommandAction::None,
            )
        }

        SupervisorCommand::RemoveRoute { prefix } => {
            if substrate.remove_route(prefix) {
                (
                    Response::Success(format!("Route {} removed", prefix)),
                    CommandAction::None,
                )
            } else {
                error(format!("No route for {}", prefix))
            }
        }

        SupervisorCommand::SetGlobalLogLevel { level } => {
            registry.set_global_level(level);
            (
                Response::Success(format!("Global log level set to {}", level)),
                CommandAction::None,
            )
        }

        SupervisorCommand::SetFacilityLogLevel { facility, level } => {
            registry.set_facility_level(facility, level);
            (
                Response::Success(format!("Log level for {} set to {}", facility, level)),
                CommandAction::None,
            )
        }

        SupervisorCommand::GetLogLevels => (
            Response::LogLevels {
                global: registry.get_global_level(),
                facility_overrides: registry.get_all_facility_levels(),
            },
            CommandAction::None,
        ),

        SupervisorCommand::Enable => (
            Response::Success("MSDP enabled".to_string()),
            CommandAction::Dispatch(MsdpEvent::Enable),
        ),

        SupervisorCommand::Disable => (
            Response::Success("MSDP disabled".to_string()),
            CommandAction::Dispatch(MsdpEvent::Disable),
        ),

        SupervisorCommand::Ping => (Response::Success("pong".to_string()), CommandAction::None),
    }
}
