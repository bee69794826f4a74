//! Configuration loading and resolution.
//!
//! Precedence: command line, then config file, then built-in defaults.

use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use nukebox_proto::{DISCOVERY_PORT, TRANSFER_PORT};
use serde::Deserialize;

use crate::cli::Args;
use crate::metadata_db::db_path_for;
use crate::player::DEFAULT_PLAYER;

const DEFAULT_MAX_UPLOAD_BYTES: u64 = 1024 * 1024 * 1024;
const APP_DIR_NAME: &str = "NukeBox2000";

/// Server configuration loaded from TOML.
#[derive(Debug, Default, Deserialize)]
pub struct ServerConfig {
    /// Library directory for accepted uploads.
    pub library_dir: Option<String>,
    /// Directory for in-flight uploads.
    pub temp_dir: Option<String>,
    /// Optional full path to the metadata SQLite file.
    pub metadata_db_path: Option<String>,
    /// TCP bind address (host:port).
    pub transfer_bind: Option<String>,
    /// UDP bind address (host:port).
    pub discovery_bind: Option<String>,
    /// Player program followed by its arguments.
    pub player: Option<Vec<String>>,
    /// Largest declared upload accepted, in bytes.
    pub max_upload_bytes: Option<u64>,
}

impl ServerConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw =
            std::fs::read_to_string(path).with_context(|| format!("read config {:?}", path))?;
        let cfg = toml::from_str::<ServerConfig>(&raw)
            .with_context(|| format!("parse config {:?}", path))?;
        Ok(cfg)
    }
}

/// Fully resolved settings the runtime works from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    pub library_dir: PathBuf,
    pub temp_dir: PathBuf,
    pub db_path: PathBuf,
    pub transfer_bind: SocketAddr,
    pub discovery_bind: SocketAddr,
    pub player: Vec<String>,
    pub max_upload_bytes: u64,
}

impl ServerSettings {
    pub fn resolve(args: &Args, cfg: &ServerConfig) -> Result<Self> {
        let library_dir = args
            .library_dir
            .clone()
            .or_else(|| non_empty_path(cfg.library_dir.as_deref()))
            .unwrap_or_else(default_library_dir);
        let temp_dir = args
            .temp_dir
            .clone()
            .or_else(|| non_empty_path(cfg.temp_dir.as_deref()))
            .unwrap_or_else(default_temp_dir);
        let db_path = args
            .db_path
            .clone()
            .or_else(|| non_empty_path(cfg.metadata_db_path.as_deref()))
            .unwrap_or_else(|| db_path_for(&library_dir));

        let transfer_bind = match args.transfer_bind {
            Some(addr) => addr,
            None => parse_bind(cfg.transfer_bind.as_deref(), "transfer_bind")?
                .unwrap_or_else(|| any_addr(TRANSFER_PORT)),
        };
        let discovery_bind = match args.discovery_bind {
            Some(addr) => addr,
            None => parse_bind(cfg.discovery_bind.as_deref(), "discovery_bind")?
                .unwrap_or_else(|| any_addr(DISCOVERY_PORT)),
        };

        let player = match args.player.as_deref() {
            Some(cmd) => cmd.split_whitespace().map(str::to_string).collect(),
            None => cfg
                .player
                .clone()
                .unwrap_or_else(|| DEFAULT_PLAYER.iter().map(|s| s.to_string()).collect()),
        };
        if player.is_empty() {
            anyhow::bail!("player command is empty");
        }

        Ok(Self {
            library_dir,
            temp_dir,
            db_path,
            transfer_bind,
            discovery_bind,
            player,
            max_upload_bytes: cfg.max_upload_bytes.unwrap_or(DEFAULT_MAX_UPLOAD_BYTES),
        })
    }
}

fn non_empty_path(value: Option<&str>) -> Option<PathBuf> {
    value
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
}

fn parse_bind(value: Option<&str>, field: &str) -> Result<Option<SocketAddr>> {
    let Some(raw) = value else {
        return Ok(None);
    };
    let addr = raw
        .parse()
        .with_context(|| format!("parse {field} {raw}"))?;
    Ok(Some(addr))
}

fn any_addr(port: u16) -> SocketAddr {
    SocketAddr::from((Ipv4Addr::UNSPECIFIED, port))
}

fn default_library_dir() -> PathBuf {
    dirs::audio_dir()
        .or_else(|| dirs::home_dir().map(|home| home.join("Music")))
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR_NAME)
}

fn default_temp_dir() -> PathBuf {
    std::env::temp_dir().join(APP_DIR_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_need_no_flags_or_file() {
        let s = ServerSettings::resolve(&Args::default(), &ServerConfig::default()).unwrap();
        assert!(s.library_dir.ends_with(APP_DIR_NAME));
        assert_eq!(s.temp_dir, std::env::temp_dir().join(APP_DIR_NAME));
        assert_eq!(s.db_path, db_path_for(&s.library_dir));
        assert_eq!(s.transfer_bind.port(), 8008);
        assert_eq!(s.discovery_bind.port(), 9009);
        assert_eq!(s.player, vec!["cvlc", "--play-and-exit"]);
        assert_eq!(s.max_upload_bytes, DEFAULT_MAX_UPLOAD_BYTES);
    }

    #[test]
    fn file_values_are_used() {
        let cfg: ServerConfig = toml::from_str(
            r#"
            library_dir = "/srv/music"
            temp_dir = "/srv/tmp"
            transfer_bind = "127.0.0.1:18008"
            player = ["mpv", "--no-video"]
            max_upload_bytes = 1000
            "#,
        )
        .unwrap();
        let s = ServerSettings::resolve(&Args::default(), &cfg).unwrap();
        assert_eq!(s.library_dir, PathBuf::from("/srv/music"));
        assert_eq!(s.temp_dir, PathBuf::from("/srv/tmp"));
        assert_eq!(s.db_path, PathBuf::from("/srv/music/.nukebox/metadata.sqlite"));
        assert_eq!(s.transfer_bind, "127.0.0.1:18008".parse().unwrap());
        assert_eq!(s.player, vec!["mpv", "--no-video"]);
        assert_eq!(s.max_upload_bytes, 1000);
    }

    #[test]
    fn flags_override_file() {
        let cfg = ServerConfig {
            library_dir: Some("/srv/music".to_string()),
            player: Some(vec!["mpv".to_string()]),
            ..ServerConfig::default()
        };
        let args = Args {
            library_dir: Some(PathBuf::from("/data/lib")),
            player: Some("ffplay -nodisp -autoexit".to_string()),
            ..Args::default()
        };
        let s = ServerSettings::resolve(&args, &cfg).unwrap();
        assert_eq!(s.library_dir, PathBuf::from("/data/lib"));
        assert_eq!(s.player, vec!["ffplay", "-nodisp", "-autoexit"]);
    }

    #[test]
    fn bad_bind_is_an_error() {
        let cfg = ServerConfig {
            discovery_bind: Some("not-an-addr".to_string()),
            ..ServerConfig::default()
        };
        assert!(ServerSettings::resolve(&Args::default(), &cfg).is_err());
    }

    #[test]
    fn blank_player_is_rejected() {
        let args = Args {
            player: Some("   ".to_string()),
            ..Args::default()
        };
        assert!(ServerSettings::resolve(&args, &ServerConfig::default()).is_err());
    }

    #[test]
    fn load_reads_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nukebox.toml");
        std::fs::write(&path, "temp_dir = \"/x/tmp\"\n").unwrap();
        let cfg = ServerConfig::load(&path).unwrap();
        assert_eq!(cfg.temp_dir.as_deref(), Some("/x/tmp"));
        assert!(ServerConfig::load(&dir.path().join("missing.toml")).is_err());
    }
}
