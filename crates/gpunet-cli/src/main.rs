mod args;
mod client;
mod output;

use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use reqwest::{Client, Method};
use tracing_subscriber::EnvFilter;

use gpunet_common::{AcquireRequest, Ack, CommandOutput, DeviceInfo, DeviceStatus, PeerSnapshot, RunRequest};

use crate::args::{Args, Command};
use crate::client::{resolve_targets, NodeClient};
use crate::output::{print_ack, print_devices, print_output, print_peers, print_status, print_targets};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let http = Client::builder()
        .connect_timeout(Duration::from_secs(3))
        .build()?;
    let timeout = Duration::from_millis(args.timeout_ms);

    if let Command::Peers = args.command {
        let seed = NodeClient::new(http, vec![args.seed.clone()], timeout);
        let peers: Vec<PeerSnapshot> = seed.get("/v1/peers").await?;
        print_peers(&peers);
        return Ok(());
    }

    let targets = resolve_targets(&http, args.server.as_deref(), &args.seed, args.port).await?;
    let client = NodeClient::new(http, targets, timeout);

    match args.command {
        Command::List => {
            let devices: Vec<DeviceInfo> = client.get("/v1/devices").await?;
            print_devices(&client.targets().join(","), &devices);
        }
        Command::Status { uuid } => {
            let status: DeviceStatus = client.get(&format!("/v1/devices/{uuid}/status")).await?;
            print_status(&status);
        }
        Command::Acquire { uuid, ttl_ms } => {
            let ack: Ack = client
                .call(
                    Method::POST,
                    &format!("/v1/devices/{uuid}/acquire"),
                    Some(&AcquireRequest { ttl_ms }),
                )
                .await?;
            print_ack("acquire", &ack);
            if !ack.ok {
                std::process::exit(1);
            }
        }
        Command::Release { uuid } => {
            let ack: Ack = client
                .call::<(), _>(Method::POST, &format!("/v1/devices/{uuid}/release"), None)
                .await?;
            print_ack("release", &ack);
        }
        Command::Run { uuid, command } => {
            let req = RunRequest {
                command: command.join(" "),
            };
            let out: CommandOutput = client
                .call(Method::POST, &format!("/v1/devices/{uuid}/run"), Some(&req))
                .await?;
            print_output(&out);
            if out.exit_status != 0 {
                std::process::exit(out.exit_status);
            }
        }
        Command::Targets => print_targets(client.targets()),
        Command::Peers => {}
    }
    Ok(())
}
