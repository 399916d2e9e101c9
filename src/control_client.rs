// SPDX-License-Identifier: Apache-2.0 OR MIT
use anyhow::Result;
use clap::Parser;
use msdpd::logging::{Facility, Severity};
use msdpd::substrate::Prefix;
use msdpd::SupervisorCommand;
use std::net::Ipv4Addr;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[clap(subcommand)]
    command: CliCommand,

    /// Path to the control socket
    #[arg(long, default_value = "/tmp/msdpd_control.sock")]
    socket_path: PathBuf,
}

#[derive(Parser, Debug)]
pub enum CliCommand {
    /// Show peers and their session state
    Peers {
        #[arg(long)]
        detail: bool,
    },
    /// Show the Source-Active cache
    Sa {
        #[arg(long)]
        detail: bool,
    },
    /// Show aggregate counters
    Stats,
    /// Add a peer
    AddPeer {
        #[arg(long)]
        address: Ipv4Addr,
        #[arg(long)]
        local_address: Ipv4Addr,
        #[arg(long)]
        remote_as: Option<u32>,
        #[arg(long)]
        group: Option<String>,
        #[arg(long)]
        description: Option<String>,
    },
    /// Remove a peer and flush what was learned from it
    RemovePeer {
        #[arg(long)]
        address: Ipv4Addr,
    },
    /// Mark a local source as active
    SourceActive {
        #[arg(long)]
        source: Ipv4Addr,
        #[arg(long)]
        group: Ipv4Addr,
    },
    /// Mark a local source as inactive
    SourceInactive {
        #[arg(long)]
        source: Ipv4Addr,
        #[arg(long)]
        group: Ipv4Addr,
    },
    AddReceiver {
        #[arg(long)]
        group: Ipv4Addr,
    },
    RemoveReceiver {
        #[arg(long)]
        group: Ipv4Addr,
    },
    /// Add a static route used by the first-hop AS check
    AddRoute {
        #[arg(long)]
        prefix: Prefix,
        #[arg(long)]
        first_hop_as: u32,
    },
    RemoveRoute {
        #[arg(long)]
        prefix: Prefix,
    },
    /// Drop every SA cache entry
    ClearSa,
    /// Set the global or a per-facility log level
    SetLogLevel {
        #[arg(long)]
        level: Severity,
        #[arg(long)]
        facility: Option<Facility>,
    },
    LogLevels,
    Enable,
    Disable,
    Ping,
}

pub fn build_command(cli_command: CliCommand) -> SupervisorCommand {
    match cli_command {
        CliCommand::Peers { detail: false } => SupervisorCommand::GetPeers,
        CliCommand::Peers { detail: true } => SupervisorCommand::GetPeersDetail,
        CliCommand::Sa { detail: false } => SupervisorCommand::GetSourceActive,
        CliCommand::Sa { detail: true } => SupervisorCommand::GetSourceActiveDetail,
        CliCommand::Stats => SupervisorCommand::GetStats,
        CliCommand::AddPeer {
            address,
            local_address,
            remote_as,
            group,
            description,
        } => SupervisorCommand::AddPeer {
            address,
            local_address,
            remote_as,
            group,
            description,
        },
        CliCommand::RemovePeer { address } => SupervisorCommand::RemovePeer { address },
        CliCommand::SourceActive { source, group } => {
            SupervisorCommand::SourceActive { source, group }
        }
        CliCommand::SourceInactive { source, group } => {
            SupervisorCommand::SourceInactive { source, group }
        }
        CliCommand::AddReceiver { group } => SupervisorCommand::AddReceiver { group },
        CliCommand::RemoveReceiver { group } => SupervisorCommand::RemoveReceiver { group },
        CliCommand::AddRoute {
            prefix,
            first_hop_as,
        } => SupervisorCommand::AddRoute {
            prefix,
            first_hop_as,
        },
        CliCommand::RemoveRoute { prefix } => SupervisorCommand::RemoveRoute { prefix },
        CliCommand::ClearSa => SupervisorCommand::ClearSaCache,
        CliCommand::SetLogLevel {
            level,
            facility: None,
        } => SupervisorCommand::SetGlobalLogLevel { level },
        CliCommand::SetLogLevel {
            level,
            facility: Some(facility),
        } => SupervisorCommand::SetFacilityLogLevel { facility, level },
        CliCommand::LogLevels => SupervisorCommand::GetLogLevels,
        CliCommand::Enable => SupervisorCommand::Enable,
        CliCommand::Disable => SupervisorCommand::Disable,
        CliCommand::Ping => SupervisorCommand::Ping,
    }
}

/// Print the payload of a response; errors exit non-zero
fn print_response(response: &msdpd::Response) -> Result<()> {
    use msdpd::Response;

    match response {
        Response::Success(message) => println!("{}", message),
        Response::Error(message) => anyhow::bail!("{}", message),
        Response::Peers(view) => println!("{}", serde_json::to_string_pretty(view)?),
        Response::PeersDetail(peers) => println!("{}", serde_json::to_string_pretty(peers)?),
        Response::SourceActive(view) => println!("{}", serde_json::to_string_pretty(view)?),
        Response::SourceActiveDetail(sa) => println!("{}", serde_json::to_string_pretty(sa)?),
        Response::Stats(stats) => println!("{}", serde_json::to_string_pretty(stats)?),
        Response::LogLevels { .. } => println!("{}", serde_json::to_string_pretty(response)?),
    }
    Ok(())
}

#[cfg(not(test))]
#[tokio::main]
async fn main() -> Result<()> {
    use msdpd::Response;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::UnixStream;

    let args = Args::parse();
    let command = build_command(args.command);

    let mut stream = UnixStream::connect(&args.socket_path).await?;
    let command_bytes = serde_json::to_vec(&command)?;
    stream.write_all(&command_bytes).await?;
    stream.shutdown().await?;

    let mut response_bytes = Vec::new();
    stream.read_to_end(&mut response_bytes).await?;

    let response: Response = serde_json::from_slice(&response_bytes)?;
    print_response(&response)
}
