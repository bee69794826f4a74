use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;

const VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("NUKEBOX_GIT_SHA"),
    ", ",
    env!("NUKEBOX_BUILD_DATE"),
    ")"
);

/// Jukebox ingest server: accepts uploads, validates them, and plays them in order.
///
/// Every flag is optional; command-line values win over the config file.
#[derive(Parser, Debug, Default)]
#[command(name = "nukebox-server", version = VERSION)]
pub struct Args {
    /// TOML config file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Directory accepted uploads are moved into (default: ~/Music/NukeBox2000)
    #[arg(long)]
    pub library_dir: Option<PathBuf>,

    /// Directory for in-flight uploads (default: <system temp>/NukeBox2000)
    #[arg(long)]
    pub temp_dir: Option<PathBuf>,

    /// Metadata database file (default: <library>/.nukebox/metadata.sqlite)
    #[arg(long)]
    pub db_path: Option<PathBuf>,

    /// TCP bind address for uploads
    #[arg(long)]
    pub transfer_bind: Option<SocketAddr>,

    /// UDP bind address for discovery probes
    #[arg(long)]
    pub discovery_bind: Option<SocketAddr>,

    /// Player command; the file path is appended (default: "cvlc --play-and-exit")
    #[arg(long)]
    pub player: Option<String>,
}
