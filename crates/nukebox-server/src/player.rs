//! Playback worker: drains the queue into an external player, one file at a time.

use std::fmt;
use std::io;
use std::path::Path;
use std::process::{Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::thread::JoinHandle;

use anyhow::{Context, Result};

use crate::queue::PlaybackQueue;

pub const DEFAULT_PLAYER: [&str; 2] = ["cvlc", "--play-and-exit"];

#[derive(Debug)]
pub enum PlayerError {
    Spawn(io::Error),
    Exit(ExitStatus),
}

impl fmt::Display for PlayerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlayerError::Spawn(e) => write!(f, "failed to start player: {e}"),
            PlayerError::Exit(status) => write!(f, "player exited with {status}"),
        }
    }
}

impl std::error::Error for PlayerError {}

/// Plays one file and returns when playback has finished.
pub trait Player: Send {
    fn play(&mut self, path: &Path) -> Result<(), PlayerError>;
}

/// Runs `<program> <args..> <path>` and waits for it to exit.
#[derive(Debug, Clone)]
pub struct CommandPlayer {
    program: String,
    args: Vec<String>,
}

impl CommandPlayer {
    pub fn from_command(command: &[String]) -> Result<Self> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| anyhow::anyhow!("player command is empty"))?;
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }
}

impl Player for CommandPlayer {
    fn play(&mut self, path: &Path) -> Result<(), PlayerError> {
        let status = Command::new(&self.program)
            .args(&self.args)
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map_err(PlayerError::Spawn)?;
        if status.success() {
            Ok(())
        } else {
            Err(PlayerError::Exit(status))
        }
    }
}

/// Drain `queue` until it is closed. Returns how many files were handed to the player.
pub fn run_worker(queue: &PlaybackQueue, player: &mut dyn Player) -> usize {
    let mut played = 0usize;
    while let Some(req) = queue.dequeue_front() {
        if !req.path.is_file() {
            tracing::debug!(request = %req, "skipping entry; file no longer exists");
            continue;
        }
        tracing::info!(mac_id = %req.mac_id, path = ?req.path, "playing");
        played += 1;
        match player.play(&req.path) {
            Ok(()) => tracing::info!(path = ?req.path, "finished playing"),
            Err(e) => tracing::warn!(path = ?req.path, "playback error: {e}"),
        }
    }
    tracing::info!(played, "playback worker stopped");
    played
}

pub fn spawn_worker(
    queue: Arc<PlaybackQueue>,
    mut player: Box<dyn Player>,
) -> Result<JoinHandle<usize>> {
    std::thread::Builder::new()
        .name("playback".to_string())
        .spawn(move || run_worker(&queue, player.as_mut()))
        .context("spawn playback worker")
}
