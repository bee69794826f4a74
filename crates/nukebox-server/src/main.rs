//! NukeBox server: lets clients on the local network find it, upload tracks, and
//! hear them played in arrival order.
//!
//! ## Flow
//! 1. **Discovery**: answers UDP probes so clients learn the server address.
//! 2. **Transfer**: one thread per TCP connection registers the client and receives the file.
//! 3. **Validation**: tags are read; untagged or unreadable files are dropped.
//! 4. **Queue**: accepted files move into the library and are queued for the playback worker,
//!    which hands them to an external player one at a time.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use nukebox_server::{cli, config, runtime};

fn main() -> Result<()> {
    let args = cli::Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,nukebox_server=info")
        }))
        .init();

    let file_cfg = match args.config.as_deref() {
        Some(path) => config::ServerConfig::load(path)?,
        None => config::ServerConfig::default(),
    };
    let settings = config::ServerSettings::resolve(&args, &file_cfg)?;
    runtime::run_server(settings)
}
