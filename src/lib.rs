// SPDX-License-Identifier: Apache-2.0 OR MIT
//! msdpd: an MSDP source-announcement daemon.
//!
//! The daemon keeps TCP sessions with configured peers, learns and expires
//! Source-Active announcements, and floods them across the peer graph
//! under the mesh-group and first-hop AS rules. A Unix control socket
//! carries `SupervisorCommand`s in and `Response`s out as JSON.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::Ipv4Addr;

pub mod config;
pub mod error;
#[macro_use]
pub mod logging;
pub mod protocols;
pub mod status;
pub mod substrate;
pub mod supervisor;
pub mod validation;

pub use config::Config;
pub use error::MsdpError;

use logging::{Facility, Severity};
use status::{MsdpStats, PeerDetail, PeersView, SaDetail, SourceActiveView};
use substrate::Prefix;

/// Requests accepted on the control socket
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum SupervisorCommand {
    /// "show peers"
    GetPeers,
    GetPeersDetail,
    /// "show source-active"
    GetSourceActive,
    GetSourceActiveDetail,
    GetStats,
    AddPeer {
        address: Ipv4Addr,
        local_address: Ipv4Addr,
        #[serde(default)]
        remote_as: Option<u32>,
        #[serde(default)]
        group: Option<String>,
        #[serde(default)]
        description: Option<String>,
    },
    RemovePeer {
        address: Ipv4Addr,
    },
    ClearSaCache,
    /// Mark a directly connected source as active
    SourceActive {
        source: Ipv4Addr,
        group: Ipv4Addr,
    },
    SourceInactive {
        source: Ipv4Addr,
        group: Ipv4Addr,
    },
    AddReceiver {
        group: Ipv4Addr,
    },
    RemoveReceiver {
        group: Ipv4Addr,
    },
    AddRoute {
        prefix: Prefix,
        first_hop_as: u32,
    },
    RemoveRoute {
        prefix: Prefix,
    },
    SetGlobalLogLevel {
        level: Severity,
    },
    SetFacilityLogLevel {
        facility: Facility,
        level: Severity,
    },
    GetLogLevels,
    Enable,
    Disable,
    Ping,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum Response {
    Success(String),
    Error(String),
    Peers(PeersView),
    PeersDetail(Vec<PeerDetail>),
    SourceActive(SourceActiveView),
    SourceActiveDetail(Vec<SaDetail>),
    Stats(MsdpStats),
    LogLevels {
        global: Severity,
        facility_overrides: HashMap<Facility, Severity>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocols::msdp_peer::SessionState;
    use crate::status::PeerRow;

    fn round_trip_command(command: SupervisorCommand) {
        let json = serde_json::to_string(&command).unwrap();
        let deserialized: SupervisorCommand = serde_json::from_str(&json).unwrap();
        assert_eq!(command, deserialized);
    }

    #[test]
    fn test_command_serialization() {
        round_trip_command(SupervisorCommand::GetPeers);
        round_trip_command(SupervisorCommand::AddPeer {
            address: "192.0.2.2".parse().unwrap(),
            local_address: "192.0.2.1".parse().unwrap(),
            remote_as: Some(65002),
            group: Some("core".to_string()),
            description: None,
        });
        round_trip_command(SupervisorCommand::AddRoute {
            prefix: "10.0.0.0/8".parse().unwrap(),
            first_hop_as: 65002,
        });
        round_trip_command(SupervisorCommand::SetFacilityLogLevel {
            facility: Facility::Session,
            level: Severity::Debug,
        });
    }

    #[test]
    fn test_add_peer_optional_fields_default() {
        let json = r#"{"AddPeer":{"address":"192.0.2.2","local_address":"192.0.2.1"}}"#;
        let command: SupervisorCommand = serde_json::from_str(json).unwrap();
        assert_eq!(
            command,
            SupervisorCommand::AddPeer {
                address: "192.0.2.2".parse().unwrap(),
                local_address: "192.0.2.1".parse().unwrap(),
                remote_as: None,
                group: None,
                description: None,
            }
        );
    }

    #[test]
    fn test_response_serialization() {
        let error_response = Response::Error("Something went wrong".to_string());
        let json = serde_json::to_string(&error_response).unwrap();
        let deserialized: Response = serde_json::from_str(&json).unwrap();
        assert_eq!(error_response, deserialized);

        let peer: Ipv4Addr = "192.0.2.2".parse().unwrap();
        let mut peers = PeersView::new();
        peers.insert(
            peer,
            PeerRow {
                peer,
                local: "192.0.2.1".parse().unwrap(),
                state: SessionState::Established,
            },
        );
        let peers_response = Response::Peers(peers);
        let json = serde_json::to_string(&peers_response).unwrap();
        let deserialized: Response = serde_json::from_str(&json).unwrap();
        assert_eq!(peers_response, deserialized);

        let stats_response = Response::Stats(MsdpStats::default());
        let json = serde_json::to_string(&stats_response).unwrap();
        let deserialized: Response = serde_json::from_str(&json).unwrap();
        assert_eq!(stats_response, deserialized);
    }
}
