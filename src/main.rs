// SPDX-License-Identifier: Apache-2.0 OR MIT
use anyhow::{Context, Result};
use clap::Parser;
use msdpd::logging::DaemonLogging;
use msdpd::{supervisor, Config};
use std::path::{Path, PathBuf};

const DEFAULT_CONTROL_SOCKET: &str = "/tmp/msdpd_control.sock";

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Parser, Debug, PartialEq)]
enum Command {
    /// Run the daemon
    Run {
        #[arg(long)]
        config: PathBuf,
        #[arg(long, default_value = DEFAULT_CONTROL_SOCKET)]
        control_socket: PathBuf,
    },
    /// Parse and validate a configuration file, then exit
    CheckConfig {
        #[arg(long)]
        config: PathBuf,
        /// Print the effective configuration with defaults filled in
        #[arg(long)]
        print: bool,
    },
}

fn load_config(path: &Path) -> Result<Config> {
    let config = Config::load_from_file(path)
        .with_context(|| format!("loading {}", path.display()))?;
    config
        .validate()
        .with_context(|| format!("validating {}", path.display()))?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    match args.command {
        Command::Run {
            config,
            control_socket,
        } => {
            let config = load_config(&config)?;
            let logging = DaemonLogging::start(config.log_level()?, config.log_format);

            let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    let _ = shutdown_tx.send(());
                }
            });

            let result =
                supervisor::run(config, control_socket, logging.registry(), shutdown_rx).await;
            logging.shutdown().await;
            result?;
        }
        Command::CheckConfig { config, print } => {
            let config = load_config(&config)?;
            if print {
                println!("{}", config.to_json5());
            }
            let (peers, errors) = config.partition_peers();
            for e in &errors {
                eprintln!("warning: {}", e);
            }
            println!(
                "configuration ok: router {}, AS {}, {} usable peers",
                config.router_id,
                config.local_as,
                peers.len()
            );
        }
    }

    Ok(())
}
