//! Shared handles injected into every transfer session.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crossbeam_channel::Sender;

use crate::metadata_db::MetadataDb;
use crate::net::session::{ClientIdentity, SessionEvent};
use crate::queue::PlaybackQueue;

/// Everything a session needs, constructed once by the runtime.
#[derive(Clone)]
pub struct ServerContext {
    pub queue: Arc<PlaybackQueue>,
    pub db: MetadataDb,
    pub library_dir: PathBuf,
    pub temp_dir: PathBuf,
    /// Registrations declaring more than this are refused.
    pub max_upload_bytes: u64,
    pub clients: ClientRegistry,
    /// Optional observer for session state and progress.
    pub events: Option<Sender<SessionEvent>>,
}

impl ServerContext {
    pub fn publish(&self, event: SessionEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }
}

/// Identities of currently connected, registered clients keyed by session id.
#[derive(Clone, Default)]
pub struct ClientRegistry {
    inner: Arc<Mutex<HashMap<u64, ClientIdentity>>>,
}

impl ClientRegistry {
    fn lock(&self) -> MutexGuard<'_, HashMap<u64, ClientIdentity>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the number of connected clients after the insert.
    pub fn insert(&self, session_id: u64, identity: ClientIdentity) -> usize {
        let mut g = self.lock();
        g.insert(session_id, identity);
        g.len()
    }

    pub fn remove(&self, session_id: u64) -> Option<ClientIdentity> {
        self.lock().remove(&session_id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
