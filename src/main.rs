//! Command line front end for the gateway OTA engine.
//!
//! # Usage
//!
//! ```bash
//! zgw-ota serve --listen 0.0.0.0:8000
//! zgw-ota ota --node 5 firmware.gbl --activate
//! zgw-ota md-get --node 5
//! zgw-ota checksum 7a0600014142
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use log::{error, info};
use tokio::io::{AsyncBufReadExt, BufReader};

use zgw_ota::bridge::DEFAULT_LISTEN;
use zgw_ota::ota::{self, CONTROLLER_PORT, DEFAULT_FIRMWARE_ID};
use zgw_ota::{
    checksum, AckPolicy, Action, ActionOutput, BridgeConfig, BridgeServer, Dispatcher, OtaConfig, TransferOutcome,
    UdpLink,
};

#[derive(Parser)]
#[command(name = "zgw-ota")]
#[command(about = "Serve firmware to Z-Wave nodes and relay images to gateway bridges")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Accept bridge connections and read operator commands from stdin
    Serve {
        /// Address to listen on
        #[arg(long, env = "ZGW_OTA_LISTEN", default_value_t = DEFAULT_LISTEN)]
        listen: SocketAddr,
    },
    /// Transfer a firmware image to a node
    Ota {
        #[command(flatten)]
        node: NodeArgs,

        /// Raw firmware image
        firmware: PathBuf,

        /// Manufacturer id (decimal or 0x-prefixed hex)
        #[arg(long, value_parser = parse_u16, default_value = "0")]
        vendor_id: u16,

        /// Firmware id (decimal or 0x-prefixed hex)
        #[arg(long, value_parser = parse_u16, default_value_t = DEFAULT_FIRMWARE_ID)]
        firmware_id: u16,

        /// Firmware target
        #[arg(long, default_value = "0")]
        target: u8,

        /// Hardware version
        #[arg(long, default_value = "1")]
        hw_version: u8,

        /// Wait for the node to accept the update request
        #[arg(long)]
        require_ack: bool,

        /// Send Activation Set once the image has gone out
        #[arg(long)]
        activate: bool,

        /// Seconds to wait for each chunk request
        #[arg(long, default_value = "30")]
        timeout: u64,
    },
    /// Ask a node for its firmware metadata
    MdGet {
        #[command(flatten)]
        node: NodeArgs,
    },
    /// Ask a node for its version
    VersionGet {
        #[command(flatten)]
        node: NodeArgs,
    },
    /// Print the CRC-16 of a hex string
    Checksum {
        /// Hex encoded bytes
        data: String,
    },
}

#[derive(Args)]
struct NodeArgs {
    /// Z-Wave node id
    #[arg(short, long)]
    node: u16,

    /// Z/IP port on the node
    #[arg(long, env = "ZGW_OTA_PORT", default_value_t = CONTROLLER_PORT)]
    port: u16,

    /// Send without the secure flag
    #[arg(long)]
    insecure: bool,
}

impl NodeArgs {
    fn config(&self) -> OtaConfig {
        OtaConfig::new()
            .with_node(self.node)
            .with_port(self.port)
            .with_security(!self.insecure)
    }
}

fn parse_u16(value: &str) -> Result<u16, String> {
    let parsed = match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => value.parse(),
    };
    parsed.map_err(|e| format!("{}: {}", value, e))
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    match run(cli.command).await {
        Ok(code) => code,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Command) -> zgw_ota::Result<ExitCode> {
    match command {
        Command::Serve { listen } => {
            serve(BridgeConfig::new().with_listen(listen)).await?;
        }
        Command::Ota {
            node,
            firmware,
            vendor_id,
            firmware_id,
            target,
            hw_version,
            require_ack,
            activate,
            timeout,
        } => {
            let mut config = node
                .config()
                .with_vendor_id(vendor_id)
                .with_firmware_id(firmware_id)
                .with_target(target)
                .with_hw_version(hw_version)
                .with_request_timeout(Duration::from_secs(timeout));
            if require_ack {
                config = config.with_ack_policy(AckPolicy::Require);
            }
            if activate {
                config = config.activate();
            }

            match zgw_ota::update_node(&firmware, config).await? {
                TransferOutcome::Completed { reports_sent } => {
                    info!("Update complete, {} reports sent", reports_sent);
                }
                TransferOutcome::Abandoned { reports_sent } => {
                    error!("Node stopped requesting chunks after {} reports", reports_sent);
                    return Ok(ExitCode::FAILURE);
                }
            }
        }
        Command::MdGet { node } => {
            let config = node.config();
            let mut link = UdpLink::for_node(&config)?;
            ota::send_md_get(&mut link, &config).await?;
        }
        Command::VersionGet { node } => {
            let config = node.config();
            let mut link = UdpLink::for_node(&config)?;
            ota::send_version_get(&mut link, &config).await?;
        }
        Command::Checksum { data } => {
            let bytes = hex::decode(data.trim())
                .map_err(|e| zgw_ota::Error::Configuration(format!("data: {}", e)))?;
            println!("{:04X}", checksum::compute(&bytes));
        }
    }
    Ok(ExitCode::SUCCESS)
}

async fn serve(config: BridgeConfig) -> zgw_ota::Result<()> {
    let server = BridgeServer::bind(config).await?;
    let dispatcher = Dispatcher::new(server.registry());
    let mut server_task = tokio::spawn(server.run());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            finished = &mut server_task => {
                return match finished {
                    Ok(result) => result,
                    Err(e) => Err(zgw_ota::Error::Protocol(format!("server task failed: {}", e))),
                };
            }
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let line = line.trim();
                match line {
                    "" => continue,
                    "quit" | "x" => break,
                    _ => {}
                }
                match line.parse::<Action>() {
                    Ok(action) => match dispatcher.execute(action).await {
                        Ok(output) => report(&output),
                        Err(e) => error!("{}", e),
                    },
                    Err(e) => error!("{}", e),
                }
            }
        }
    }

    server_task.abort();
    Ok(())
}

fn report(output: &ActionOutput) {
    match output {
        ActionOutput::Clients(clients) if clients.is_empty() => println!("no clients connected"),
        ActionOutput::Clients(clients) => {
            for (i, address) in clients.iter().enumerate() {
                println!("{}: {}", i + 1, address);
            }
        }
        ActionOutput::Relayed { client, summary } => println!(
            "relayed {} bytes in {} records to {}",
            summary.bytes_sent, summary.data_records, client
        ),
        ActionOutput::Forwarded { client, bytes } => println!("forwarded {} bytes to {}", bytes, client),
    }
}
