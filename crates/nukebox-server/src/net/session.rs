//! One upload per TCP connection.
//!
//! ```text
//! New --registration--> Registered --raw bytes--> Receiving
//!     --tags ok--> Validated --placed--> Queued
//!
//! any state --error--> Failed
//! ```
//!
//! The connection starts line-framed. After the ready token goes out the same
//! buffered reader is read raw, so bytes that arrived together with the
//! registration line are not lost.

use std::fmt;
use std::io::{self, BufReader, Read, Write};
use std::path::PathBuf;

use nukebox_proto::{
    ACK_TOKEN, MAX_LINE_LEN, READY_TOKEN, TransferProgress, decode_registration, read_line,
    write_line,
};

use crate::library::{LIBRARY_EXTENSION, final_path_for, move_into_place, reserve_placeholder};
use crate::metadata_db::NewFile;
use crate::net::spool::{make_temp_path, remove_quietly, write_spool};
use crate::queue::PlayRequest;
use crate::state::ServerContext;
use crate::tags::{TrackTags, ValidationError, read_track_tags};

const READ_CHUNK: usize = 64 * 1024;
const MAX_PREALLOC: u64 = 16 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    New,
    Registered,
    Receiving,
    Validated,
    Queued,
    Failed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::New => "new",
            SessionState::Registered => "registered",
            SessionState::Receiving => "receiving",
            SessionState::Validated => "validated",
            SessionState::Queued => "queued",
            SessionState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Who is uploading, as declared at registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity {
    pub name: String,
    pub mac_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    StateChanged { session: u64, state: SessionState },
    Progress { session: u64, percent: u8 },
}

#[derive(Debug)]
pub enum SessionError {
    /// Malformed or out-of-order message from the client.
    Protocol(String),
    /// Socket read/write failure.
    Connection(io::Error),
    /// Temp file could not be written.
    Transfer(io::Error),
    Validation(ValidationError),
    /// Final name could not be reserved or the temp file not moved.
    Placement(io::Error),
    Store(anyhow::Error),
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::Protocol(msg) => write!(f, "protocol error: {msg}"),
            SessionError::Connection(e) => write!(f, "connection error: {e}"),
            SessionError::Transfer(e) => write!(f, "temp file write failed: {e}"),
            SessionError::Validation(e) => write!(f, "validation failed: {e}"),
            SessionError::Placement(e) => write!(f, "placement failed: {e}"),
            SessionError::Store(e) => write!(f, "metadata store error: {e:#}"),
        }
    }
}

impl std::error::Error for SessionError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveStatus {
    Pending,
    /// Declared size reached; bytes are in the temp file.
    Complete,
}

/// Where an accepted upload ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    pub final_path: PathBuf,
    pub file_id: i64,
    /// `false` when an equal request was already waiting in the queue.
    pub newly_queued: bool,
}

pub struct TransferSession<'a> {
    id: u64,
    ctx: &'a ServerContext,
    state: SessionState,
    progress: TransferProgress,
    receive_buffer: Vec<u8>,
    original_filename: String,
    temp_path: Option<PathBuf>,
    final_path: Option<PathBuf>,
    client: Option<ClientIdentity>,
    user_id: Option<i64>,
    tags: Option<TrackTags>,
}

impl<'a> TransferSession<'a> {
    pub fn new(id: u64, ctx: &'a ServerContext) -> Self {
        Self {
            id,
            ctx,
            state: SessionState::New,
            progress: TransferProgress::new(0),
            receive_buffer: Vec::new(),
            original_filename: String::new(),
            temp_path: None,
            final_path: None,
            client: None,
            user_id: None,
            tags: None,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn percent(&self) -> u8 {
        self.progress.percent()
    }

    pub fn bytes_received(&self) -> u64 {
        self.progress.received()
    }

    pub fn client(&self) -> Option<&ClientIdentity> {
        self.client.as_ref()
    }

    pub fn temp_path(&self) -> Option<&PathBuf> {
        self.temp_path.as_ref()
    }

    pub fn final_path(&self) -> Option<&PathBuf> {
        self.final_path.as_ref()
    }

    pub fn tags(&self) -> Option<&TrackTags> {
        self.tags.as_ref()
    }

    fn set_state(&mut self, state: SessionState) {
        tracing::debug!(session = self.id, from = %self.state, to = %state, "session state");
        self.state = state;
        self.ctx.publish(SessionEvent::StateChanged {
            session: self.id,
            state,
        });
    }

    fn expect_state(&self, want: SessionState, op: &str) -> Result<(), SessionError> {
        if self.state == want {
            Ok(())
        } else {
            Err(SessionError::Protocol(format!(
                "{op} not allowed in state {}",
                self.state
            )))
        }
    }

    /// New → Registered: decode the registration line and record the uploader.
    pub fn register(&mut self, line: &str) -> Result<&ClientIdentity, SessionError> {
        self.expect_state(SessionState::New, "registration")?;
        let reg = decode_registration(line).map_err(|e| SessionError::Protocol(e.to_string()))?;
        if reg.size > self.ctx.max_upload_bytes {
            return Err(SessionError::Protocol(format!(
                "declared size {} exceeds limit {}",
                reg.size, self.ctx.max_upload_bytes
            )));
        }

        let user = self
            .ctx
            .db
            .get_or_create_user(&reg.name, &reg.mac_id)
            .map_err(SessionError::Store)?;

        let identity = ClientIdentity {
            name: reg.name,
            mac_id: reg.mac_id,
        };
        let connected = self.ctx.clients.insert(self.id, identity.clone());
        tracing::info!(
            session = self.id,
            client = %identity.name,
            mac_id = %identity.mac_id,
            file = %reg.filename,
            size = reg.size,
            connected,
            "client registered"
        );

        self.progress = TransferProgress::new(reg.size);
        self.receive_buffer = Vec::with_capacity(reg.size.min(MAX_PREALLOC) as usize);
        self.original_filename = reg.filename;
        self.user_id = Some(user.user_id);
        self.set_state(SessionState::Registered);
        Ok(&*self.client.insert(identity))
    }

    /// Registered/Receiving: account for one raw chunk.
    ///
    /// Once the declared size is reached (over-run kept) the whole buffer is
    /// flushed to the temp file and `Complete` is returned.
    pub fn receive(&mut self, chunk: &[u8]) -> Result<ReceiveStatus, SessionError> {
        match self.state {
            SessionState::Registered => self.set_state(SessionState::Receiving),
            SessionState::Receiving if self.temp_path.is_none() => {}
            SessionState::Receiving => {
                return Err(SessionError::Protocol(
                    "raw data after transfer completed".to_string(),
                ));
            }
            other => {
                return Err(SessionError::Protocol(format!(
                    "raw data not allowed in state {other}"
                )));
            }
        }

        self.receive_buffer.extend_from_slice(chunk);
        if let Some(percent) = self.progress.advance(chunk.len() as u64) {
            tracing::debug!(session = self.id, percent, "upload progress");
            self.ctx.publish(SessionEvent::Progress {
                session: self.id,
                percent,
            });
        }
        if !self.progress.is_complete() {
            return Ok(ReceiveStatus::Pending);
        }

        let temp_path = make_temp_path(&self.ctx.temp_dir, self.id, &self.original_filename);
        self.temp_path = Some(temp_path.clone());
        let bytes = std::mem::take(&mut self.receive_buffer);
        write_spool(&temp_path, &bytes).map_err(SessionError::Transfer)?;
        tracing::info!(
            session = self.id,
            bytes = bytes.len(),
            path = ?temp_path,
            "upload received"
        );
        Ok(ReceiveStatus::Complete)
    }

    /// Receiving → Validated: read artist/title from the temp file.
    pub fn validate(&mut self) -> Result<&TrackTags, SessionError> {
        self.expect_state(SessionState::Receiving, "validation")?;
        let Some(temp_path) = self.temp_path.as_ref() else {
            return Err(SessionError::Protocol("upload incomplete".to_string()));
        };
        let tags = read_track_tags(temp_path).map_err(SessionError::Validation)?;
        tracing::info!(
            session = self.id,
            artist = %tags.artist,
            title = %tags.title,
            "upload validated"
        );
        self.set_state(SessionState::Validated);
        Ok(&*self.tags.insert(tags))
    }

    /// Validated → Queued: move into the library, record it, queue it.
    pub fn place_and_queue(&mut self) -> Result<Placement, SessionError> {
        self.expect_state(SessionState::Validated, "placement")?;
        let (Some(tags), Some(client), Some(user_id), Some(temp_path)) = (
            self.tags.clone(),
            self.client.clone(),
            self.user_id,
            self.temp_path.clone(),
        ) else {
            return Err(SessionError::Protocol("session not validated".to_string()));
        };

        let final_path = final_path_for(&self.ctx.library_dir, &tags.title);
        let reserved = reserve_placeholder(&final_path).map_err(SessionError::Placement)?;
        if let Err(e) = move_into_place(&temp_path, &final_path) {
            if reserved {
                remove_quietly(&final_path);
            }
            return Err(SessionError::Placement(e));
        }
        self.temp_path = None;
        self.final_path = Some(final_path.clone());

        let size = std::fs::metadata(&final_path)
            .map(|m| m.len())
            .unwrap_or_else(|_| self.progress.received());
        let record = self
            .ctx
            .db
            .get_or_create_file(&NewFile {
                path: final_path.to_string_lossy().into_owned(),
                size: i64::try_from(size).unwrap_or(i64::MAX),
                filetype: LIBRARY_EXTENSION.to_string(),
                title: tags.title.clone(),
                artist: tags.artist.clone(),
                genre: None,
                album: None,
                duration: None,
                user_id,
            })
            .map_err(SessionError::Store)?;

        let newly_queued = self
            .ctx
            .queue
            .enqueue(PlayRequest::new(client.mac_id, final_path.clone()));
        if newly_queued {
            tracing::info!(
                session = self.id,
                path = ?final_path,
                queued = self.ctx.queue.len(),
                "queued for playback"
            );
        } else {
            tracing::info!(
                session = self.id,
                path = ?final_path,
                "already queued; not added again"
            );
        }
        self.set_state(SessionState::Queued);
        Ok(Placement {
            final_path,
            file_id: record.file_id,
            newly_queued,
        })
    }

    /// Any → Failed: drop the temp file if one exists.
    pub fn fail(&mut self, err: &SessionError) {
        tracing::warn!(session = self.id, state = %self.state, "session failed: {err}");
        if let Some(temp_path) = self.temp_path.take() {
            remove_quietly(&temp_path);
        }
        self.receive_buffer = Vec::new();
        self.set_state(SessionState::Failed);
    }
}

impl Drop for TransferSession<'_> {
    fn drop(&mut self) {
        if self.client.is_some() {
            self.ctx.clients.remove(self.id);
        }
    }
}

/// Run one connection to completion and report the state it ended in.
///
/// A connection that closes before the declared size arrives is simply dropped,
/// leaving the session in `Receiving` with nothing on disk.
pub fn serve_connection<S: Read + Write>(
    stream: S,
    ctx: &ServerContext,
    session_id: u64,
) -> SessionState {
    let mut reader = BufReader::new(stream);
    let mut session = TransferSession::new(session_id, ctx);
    if let Err(e) = drive(&mut session, &mut reader) {
        session.fail(&e);
    }
    session.state()
}

fn drive<S: Read + Write>(
    session: &mut TransferSession<'_>,
    reader: &mut BufReader<S>,
) -> Result<(), SessionError> {
    let line = match read_line(reader, MAX_LINE_LEN) {
        Ok(Some(line)) => line,
        Ok(None) => {
            tracing::debug!(session = session.id(), "closed before registration");
            return Ok(());
        }
        Err(e) if e.kind() == io::ErrorKind::InvalidData => {
            return Err(SessionError::Protocol(e.to_string()));
        }
        Err(e) => return Err(SessionError::Connection(e)),
    };
    session.register(&line)?;
    write_line(reader.get_mut(), READY_TOKEN).map_err(SessionError::Connection)?;

    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => {
                tracing::info!(
                    session = session.id(),
                    received = session.bytes_received(),
                    percent = session.percent(),
                    "connection closed before transfer completed"
                );
                return Ok(());
            }
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(SessionError::Connection(e)),
        };
        if session.receive(&buf[..n])? == ReceiveStatus::Complete {
            break;
        }
    }

    if let Err(e) = write_line(reader.get_mut(), ACK_TOKEN) {
        tracing::warn!(session = session.id(), "ack not delivered: {e}");
    }

    session.validate()?;
    session.place_and_queue()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::path::Path;
    use std::sync::{Arc, Mutex};

    use crossbeam_channel::Receiver;
    use nukebox_proto::{Registration, encode_registration};

    use crate::metadata_db::{FileKey, MetadataDb};
    use crate::queue::PlaybackQueue;
    use crate::state::ClientRegistry;
    use crate::test_support::tagged_mp3_bytes;

    /// Serves reads one scripted chunk at a time and records everything written.
    struct ScriptedStream {
        chunks: VecDeque<Vec<u8>>,
        written: Arc<Mutex<Vec<u8>>>,
    }

    impl ScriptedStream {
        fn new(chunks: Vec<Vec<u8>>) -> (Self, Arc<Mutex<Vec<u8>>>) {
            let written = Arc::new(Mutex::new(Vec::new()));
            (
                Self {
                    chunks: chunks.into(),
                    written: written.clone(),
                },
                written,
            )
        }
    }

    impl Read for ScriptedStream {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let Some(mut chunk) = self.chunks.pop_front() else {
                return Ok(0);
            };
            if chunk.len() > buf.len() {
                let rest = chunk.split_off(buf.len());
                self.chunks.push_front(rest);
            }
            buf[..chunk.len()].copy_from_slice(&chunk);
            Ok(chunk.len())
        }
    }

    impl Write for ScriptedStream {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.written.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        ctx: ServerContext,
        events: Receiver<SessionEvent>,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let library_dir = dir.path().join("library");
        let temp_dir = dir.path().join("tmp");
        std::fs::create_dir_all(&library_dir).unwrap();
        std::fs::create_dir_all(&temp_dir).unwrap();
        let db = MetadataDb::open(&dir.path().join("db.sqlite")).unwrap();
        let (tx, rx) = crossbeam_channel::unbounded();
        let ctx = ServerContext {
            queue: Arc::new(PlaybackQueue::new()),
            db,
            library_dir,
            temp_dir,
            max_upload_bytes: 8 * 1024 * 1024,
            clients: ClientRegistry::default(),
            events: Some(tx),
        };
        Fixture {
            _dir: dir,
            ctx,
            events: rx,
        }
    }

    fn registration_line(size: u64, mac_id: &str) -> Vec<u8> {
        named_registration_line(size, mac_id, "/home/alice/Music/track one.mp3")
    }

    fn named_registration_line(size: u64, mac_id: &str, filename: &str) -> Vec<u8> {
        let reg = Registration {
            size,
            filename: filename.to_string(),
            name: "alice".to_string(),
            mac_id: mac_id.to_string(),
        };
        let mut line = encode_registration(&reg).unwrap().into_bytes();
        line.extend_from_slice(b"\r\n");
        line
    }

    fn temp_files(dir: &Path) -> usize {
        std::fs::read_dir(dir).unwrap().count()
    }

    fn progress_events(rx: &Receiver<SessionEvent>) -> Vec<u8> {
        rx.try_iter()
            .filter_map(|e| match e {
                SessionEvent::Progress { percent, .. } => Some(percent),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn acks_once_after_two_half_chunks() {
        let f = fixture();
        let (stream, written) = ScriptedStream::new(vec![
            registration_line(1024, "0xaa"),
            vec![7u8; 512],
            vec![7u8; 512],
        ]);

        let state = serve_connection(stream, &f.ctx, 1);

        assert_eq!(written.lock().unwrap().as_slice(), b"tx\r\nAck\r\n");
        assert_eq!(progress_events(&f.events), vec![50, 100]);
        // Random bytes carry no tags.
        assert_eq!(state, SessionState::Failed);
        assert_eq!(temp_files(&f.ctx.temp_dir), 0);
        assert!(f.ctx.queue.is_empty());
    }

    #[test]
    fn tagged_upload_is_placed_recorded_and_queued() {
        let f = fixture();
        let audio = tagged_mp3_bytes("Queen", "Bohemian Rhapsody");
        let third = audio.len() / 3;
        let (stream, written) = ScriptedStream::new(vec![
            registration_line(audio.len() as u64, "0xaa"),
            audio[..third].to_vec(),
            audio[third..2 * third].to_vec(),
            audio[2 * third..].to_vec(),
        ]);

        let state = serve_connection(stream, &f.ctx, 2);

        assert_eq!(state, SessionState::Queued);
        assert_eq!(written.lock().unwrap().as_slice(), b"tx\r\nAck\r\n");
        let final_path = f.ctx.library_dir.join("Bohemian-Rhapsody.mp3");
        assert_eq!(std::fs::read(&final_path).unwrap(), audio);
        let request = PlayRequest::new("0xaa", final_path.clone());
        assert!(f.ctx.queue.contains(&request));
        assert_eq!(f.ctx.queue.snapshot(), vec![request]);
        let record = f
            .ctx
            .db
            .find_file(&FileKey::Path(final_path.to_string_lossy().into_owned()))
            .unwrap()
            .unwrap();
        assert_eq!(record.artist, "Queen");
        assert_eq!(record.filetype, ".mp3");
        assert_eq!(temp_files(&f.ctx.temp_dir), 0);
        assert!(f.ctx.clients.is_empty());

        let states: Vec<_> = f
            .events
            .try_iter()
            .filter_map(|e| match e {
                SessionEvent::StateChanged { state, .. } => Some(state),
                _ => None,
            })
            .collect();
        assert_eq!(
            states,
            vec![
                SessionState::Registered,
                SessionState::Receiving,
                SessionState::Validated,
                SessionState::Queued
            ]
        );
    }

    #[test]
    fn bytes_sharing_the_registration_chunk_count_as_raw() {
        let f = fixture();
        let audio = tagged_mp3_bytes("Artist", "Same Packet");
        let mut first = registration_line(audio.len() as u64, "0xaa");
        first.extend_from_slice(&audio[..100]);
        let (stream, _written) = ScriptedStream::new(vec![first, audio[100..].to_vec()]);

        assert_eq!(serve_connection(stream, &f.ctx, 3), SessionState::Queued);
        assert_eq!(
            std::fs::read(f.ctx.library_dir.join("Same-Packet.mp3")).unwrap(),
            audio
        );
    }

    #[test]
    fn missing_mac_id_fails_without_reply_or_store_change() {
        let f = fixture();
        let line = br#"{"size":10,"filename":"a.mp3","name":"bob"}"#.to_vec();
        let mut first = line;
        first.extend_from_slice(b"\r\n");
        let (stream, written) = ScriptedStream::new(vec![first, vec![0u8; 10]]);

        assert_eq!(serve_connection(stream, &f.ctx, 4), SessionState::Failed);
        assert!(written.lock().unwrap().is_empty());
        assert_eq!(f.ctx.db.user_count().unwrap(), 0);
    }

    #[test]
    fn zero_size_is_refused() {
        let f = fixture();
        let (stream, written) = ScriptedStream::new(vec![registration_line(0, "0xaa")]);

        assert_eq!(serve_connection(stream, &f.ctx, 5), SessionState::Failed);
        assert!(written.lock().unwrap().is_empty());
        assert_eq!(f.ctx.db.user_count().unwrap(), 0);
    }

    #[test]
    fn oversized_declaration_is_refused() {
        let f = fixture();
        let size = f.ctx.max_upload_bytes + 1;
        let (stream, written) = ScriptedStream::new(vec![registration_line(size, "0xaa")]);

        assert_eq!(serve_connection(stream, &f.ctx, 6), SessionState::Failed);
        assert!(written.lock().unwrap().is_empty());
    }

    #[test]
    fn early_close_leaves_session_receiving() {
        let f = fixture();
        let (stream, written) =
            ScriptedStream::new(vec![registration_line(1000, "0xaa"), vec![1u8; 400]]);

        assert_eq!(serve_connection(stream, &f.ctx, 7), SessionState::Receiving);
        assert_eq!(written.lock().unwrap().as_slice(), b"tx\r\n");
        assert_eq!(temp_files(&f.ctx.temp_dir), 0);
        assert!(f.ctx.queue.is_empty());
        assert!(f.ctx.clients.is_empty());
    }

    #[test]
    fn overrun_is_kept_and_acked_once() {
        let f = fixture();
        let mut session = TransferSession::new(8, &f.ctx);
        let line = registration_line(10, "0xaa");
        let line = std::str::from_utf8(&line).unwrap().trim_end();
        session.register(line).unwrap();

        assert_eq!(session.receive(&[1u8; 6]).unwrap(), ReceiveStatus::Pending);
        assert_eq!(session.receive(&[2u8; 6]).unwrap(), ReceiveStatus::Complete);
        assert_eq!(session.percent(), 100);

        let temp = session.temp_path().unwrap().clone();
        assert_eq!(std::fs::metadata(&temp).unwrap().len(), 12);
        assert!(session.receive(&[3u8; 2]).is_err());
    }

    #[test]
    fn duplicate_upload_is_queued_once() {
        let f = fixture();
        let audio = tagged_mp3_bytes("Artist", "Twice");
        for id in [9, 10] {
            let (stream, _) = ScriptedStream::new(vec![
                registration_line(audio.len() as u64, "0xaa"),
                audio.clone(),
            ]);
            assert_eq!(serve_connection(stream, &f.ctx, id), SessionState::Queued);
        }
        assert_eq!(f.ctx.queue.len(), 1);
        assert_eq!(f.ctx.db.files_for_user("0xaa").unwrap().len(), 1);
    }

    #[test]
    fn placement_failure_cleans_up() {
        let mut f = fixture();
        f.ctx.library_dir = f.ctx.library_dir.join("missing").join("dir");
        let audio = tagged_mp3_bytes("Artist", "Nowhere");
        let (stream, written) = ScriptedStream::new(vec![
            registration_line(audio.len() as u64, "0xaa"),
            audio,
        ]);

        assert_eq!(serve_connection(stream, &f.ctx, 11), SessionState::Failed);
        assert_eq!(written.lock().unwrap().as_slice(), b"tx\r\nAck\r\n");
        assert_eq!(temp_files(&f.ctx.temp_dir), 0);
        assert!(f.ctx.queue.is_empty());
        assert!(f.ctx.db.files_for_user("0xaa").unwrap().is_empty());
    }

    #[test]
    fn upload_name_without_audio_extension_is_queued() {
        let f = fixture();
        let audio = tagged_mp3_bytes("Artist", "No Extension");
        for (id, filename) in [(13, "track"), (14, "notes/track.dat")] {
            let (stream, _) = ScriptedStream::new(vec![
                named_registration_line(audio.len() as u64, "0xaa", filename),
                audio.clone(),
            ]);
            assert_eq!(serve_connection(stream, &f.ctx, id), SessionState::Queued);
        }
        let final_path = f.ctx.library_dir.join("No-Extension.mp3");
        assert_eq!(std::fs::read(&final_path).unwrap(), audio);
        assert_eq!(f.ctx.queue.len(), 1);
        assert_eq!(temp_files(&f.ctx.temp_dir), 0);
    }

    #[test]
    fn failed_move_removes_reserved_placeholder() {
        let f = fixture();
        let audio = tagged_mp3_bytes("Artist", "Vanished");
        let mut session = TransferSession::new(15, &f.ctx);
        let line = registration_line(audio.len() as u64, "0xaa");
        session
            .register(std::str::from_utf8(&line).unwrap().trim_end())
            .unwrap();
        assert_eq!(session.client().unwrap().name, "alice");
        assert_eq!(session.receive(&audio).unwrap(), ReceiveStatus::Complete);
        session.validate().unwrap();
        assert_eq!(session.tags().unwrap().title, "Vanished");

        let temp = session.temp_path().unwrap().clone();
        std::fs::remove_file(&temp).unwrap();
        let err = session.place_and_queue().unwrap_err();
        assert!(matches!(err, SessionError::Placement(_)));
        session.fail(&err);

        let final_path = f.ctx.library_dir.join("Vanished.mp3");
        assert_eq!(session.state(), SessionState::Failed);
        assert!(session.final_path().is_none());
        assert!(!final_path.exists());
        assert!(!temp.exists());
        assert!(!f.ctx.queue.contains(&PlayRequest::new("0xaa", final_path)));
        assert!(f.ctx.queue.is_empty());
        assert!(f.ctx.db.files_for_user("0xaa").unwrap().is_empty());
    }

    #[test]
    fn out_of_order_calls_are_protocol_errors() {
        let f = fixture();
        let mut session = TransferSession::new(12, &f.ctx);
        assert!(matches!(
            session.receive(b"early"),
            Err(SessionError::Protocol(_))
        ));
        assert!(matches!(session.validate(), Err(SessionError::Protocol(_))));
        assert!(matches!(
            session.place_and_queue(),
            Err(SessionError::Protocol(_))
        ));
        assert_eq!(session.state(), SessionState::New);
    }
}
