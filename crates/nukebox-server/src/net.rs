//! Upload receiver: one transfer session per TCP connection.

pub mod session;
pub(crate) mod spool;

pub use session::{SessionEvent, SessionState, serve_connection};
pub(crate) use spool::cleanup_temp_files;
