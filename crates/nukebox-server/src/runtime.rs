//! Server runtime: directory bootstrap, socket binding, worker threads, accept loop.

use std::net::{TcpListener, TcpStream};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};

use crate::config::ServerSettings;
use crate::discovery;
use crate::metadata_db::MetadataDb;
use crate::net::{self, serve_connection};
use crate::player::{self, CommandPlayer};
use crate::queue::PlaybackQueue;
use crate::state::{ClientRegistry, ServerContext};

/// Run the server until the process is interrupted.
///
/// Only directory creation, the metadata store, and binding the two sockets can
/// fail here; everything after that is logged and survived.
pub fn run_server(settings: ServerSettings) -> Result<()> {
    for dir in [&settings.library_dir, &settings.temp_dir] {
        std::fs::create_dir_all(dir).with_context(|| format!("create dir {:?}", dir))?;
    }
    match net::cleanup_temp_files(&settings.temp_dir) {
        Ok(0) => {}
        Ok(n) => tracing::info!(count = n, "cleaned up stale temp files"),
        Err(e) => tracing::warn!("temp cleanup warning: {e}"),
    }

    let db = MetadataDb::open(&settings.db_path)?;
    tracing::info!(path = ?settings.db_path, users = db.user_count()?, "metadata store ready");

    let listener = TcpListener::bind(settings.transfer_bind)
        .with_context(|| format!("bind transfer {}", settings.transfer_bind))?;
    let discovery_socket = discovery::bind_responder(settings.discovery_bind)?;

    let queue = Arc::new(PlaybackQueue::new());
    let player = CommandPlayer::from_command(&settings.player)?;
    install_interrupt_handler(queue.clone(), settings.temp_dir.clone());

    discovery::spawn_responder(discovery_socket)?;
    let _worker = player::spawn_worker(queue.clone(), Box::new(player))?;

    let ctx = ServerContext {
        queue,
        db,
        library_dir: settings.library_dir.clone(),
        temp_dir: settings.temp_dir.clone(),
        max_upload_bytes: settings.max_upload_bytes,
        clients: ClientRegistry::default(),
        events: None,
    };
    tracing::info!(
        library = ?settings.library_dir,
        temp = ?settings.temp_dir,
        player = ?settings.player,
        "server ready"
    );
    serve(listener, ctx)
}

fn install_interrupt_handler(queue: Arc<PlaybackQueue>, temp_dir: PathBuf) {
    let result = ctrlc::set_handler(move || {
        tracing::info!("interrupt received; shutting down");
        queue.close();
        let _ = net::cleanup_temp_files(&temp_dir);
        std::process::exit(130);
    });
    if let Err(e) = result {
        tracing::warn!("failed to install interrupt handler: {e}");
    }
}

/// Accept connections forever, one session thread each.
pub fn serve(listener: TcpListener, ctx: ServerContext) -> Result<()> {
    let bind = listener.local_addr().context("listener address")?;
    tracing::info!(bind = %bind, "listening for uploads");

    let mut next_id = 0u64;
    for incoming in listener.incoming() {
        let stream = match incoming {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!("accept error: {e:#}");
                continue;
            }
        };
        next_id += 1;
        spawn_session(stream, ctx.clone(), next_id);
    }
    Ok(())
}

fn spawn_session(stream: TcpStream, ctx: ServerContext, session_id: u64) {
    let peer = stream.peer_addr().ok();
    tracing::info!(session = session_id, peer = ?peer, "client connected");
    let spawned = std::thread::Builder::new()
        .name(format!("session-{session_id}"))
        .spawn(move || {
            stream.set_nodelay(true).ok();
            let state = serve_connection(&stream, &ctx, session_id);
            tracing::info!(session = session_id, state = %state, "connection closed");
        });
    if let Err(e) = spawned {
        tracing::warn!(session = session_id, "failed to start session thread: {e}");
    }
}
