//! `nukebox-send`: upload one track to a NukeBox server on the local network.
//!
//! Without `--server` the server is located by broadcasting a discovery probe
//! and taking the first answer.

mod discovery;
mod identity;
mod upload;

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use nukebox_proto::{DISCOVERY_PORT, TRANSFER_PORT};
use tracing_subscriber::EnvFilter;

use identity::Identity;
use upload::Event;

#[derive(Parser, Debug)]
#[command(name = "nukebox-send", version)]
struct Args {
    /// Audio file to upload
    path: PathBuf,

    /// Server IP; skips discovery
    #[arg(long)]
    server: Option<IpAddr>,

    /// Transfer port on the server
    #[arg(long, default_value_t = TRANSFER_PORT)]
    port: u16,

    /// Where to send the discovery probe
    #[arg(long, default_value_t = SocketAddr::from(([255, 255, 255, 255], DISCOVERY_PORT)))]
    broadcast: SocketAddr,

    /// Give up discovery after this many seconds (default: wait forever)
    #[arg(long)]
    discovery_timeout_secs: Option<u64>,

    /// Display name sent to the server (default: login name)
    #[arg(long)]
    name: Option<String>,

    /// Hardware id sent to the server (default: first network interface address)
    #[arg(long)]
    mac_id: Option<String>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,nukebox_send=info")
        }))
        .init();

    let identity = Identity::resolve(args.name, args.mac_id);
    let server_ip = match args.server {
        Some(ip) => ip,
        None => {
            let timeout = args.discovery_timeout_secs.map(Duration::from_secs);
            discovery::discover_server(args.broadcast, timeout)?.ip()
        }
    };
    let addr = SocketAddr::new(server_ip, args.port);
    tracing::info!(
        server = %addr,
        name = %identity.name,
        mac_id = %identity.mac_id,
        file = ?args.path,
        "uploading"
    );

    let (events, worker) = upload::spawn_upload(addr, args.path, identity)?;
    let mut failure = None;
    for event in events {
        match event {
            Event::Status(msg) => tracing::info!("{msg}"),
            Event::Progress { sent, total, percent } => {
                tracing::info!(sent, total, "{percent}%")
            }
            Event::Acked => tracing::info!("server acknowledged the upload"),
            Event::Error(msg) => failure = Some(msg),
        }
    }
    let _ = worker.join();

    match failure {
        Some(msg) => Err(anyhow::anyhow!(msg)),
        None => Ok(()),
    }
}
