//! Shared protocol primitives for `nukebox-server` and `nukebox-send`.
//!
//! Discovery (UDP): the client broadcasts [`DISCOVERY_PROBE`] on [`DISCOVERY_PORT`];
//! a server answers with [`DISCOVERY_RESPONSE`] unicast to the probe's source.
//!
//! Transfer (TCP, [`TRANSFER_PORT`]):
//! - client → server: one line holding the JSON [`Registration`]
//! - server → client: line [`READY_TOKEN`]; the connection is now in raw mode
//! - client → server: `size` raw bytes of file content, no framing
//! - server → client: line [`ACK_TOKEN`] once `size` bytes have arrived
//!
//! Lines end in `\r\n`. Readers also accept a bare `\n`.

use std::io::{self, BufRead, Read, Write};

use serde::{Deserialize, Serialize};

pub const DISCOVERY_PORT: u16 = 9009;
pub const TRANSFER_PORT: u16 = 8008;

pub const DISCOVERY_PROBE: &str = "Hello Jukebox";
pub const DISCOVERY_RESPONSE: &str = "This is the JukeBox Speaking. I'm Here";

/// Server → client: registration accepted, send raw bytes.
pub const READY_TOKEN: &str = "tx";
/// Server → client: declared byte count received.
pub const ACK_TOKEN: &str = "Ack";

/// Upper bound for a single line-framed message.
pub const MAX_LINE_LEN: usize = 64 * 1024;

pub fn is_probe(datagram: &[u8]) -> bool {
    datagram == DISCOVERY_PROBE.as_bytes()
}

pub fn is_response(datagram: &[u8]) -> bool {
    datagram == DISCOVERY_RESPONSE.as_bytes()
}

/// First message on a transfer connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registration {
    /// Number of raw bytes the client will send.
    pub size: u64,
    /// Client-side file name (may include directories).
    pub filename: String,
    /// Display name of the uploading user.
    pub name: String,
    /// Hex-encoded hardware identifier of the client.
    pub mac_id: String,
}

pub fn encode_registration(reg: &Registration) -> io::Result<String> {
    serde_json::to_string(reg).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

/// Decode a registration line, rejecting missing fields and non-positive sizes.
pub fn decode_registration(line: &str) -> io::Result<Registration> {
    let reg: Registration = serde_json::from_str(line).map_err(|e| {
        io::Error::new(io::ErrorKind::InvalidData, format!("bad registration: {e}"))
    })?;
    if reg.size == 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "declared size must be positive",
        ));
    }
    Ok(reg)
}

/// Write one `\r\n`-terminated line and flush.
pub fn write_line(mut w: impl Write, text: &str) -> io::Result<()> {
    w.write_all(text.as_bytes())?;
    w.write_all(b"\r\n")?;
    w.flush()
}

/// Read one line, without its terminator.
///
/// Returns `Ok(None)` on EOF before any byte. Bytes after the terminator stay in
/// the reader's buffer, so the same reader can continue in raw mode.
pub fn read_line<R: BufRead>(r: &mut R, max_len: usize) -> io::Result<Option<String>> {
    let mut buf = Vec::new();
    let limit = max_len as u64 + 2;
    let n = r.by_ref().take(limit).read_until(b'\n', &mut buf)?;
    if n == 0 {
        return Ok(None);
    }
    if buf.last() != Some(&b'\n') {
        if n as u64 >= limit {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "line too long"));
        }
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "connection closed mid-line",
        ));
    }
    buf.pop();
    if buf.last() == Some(&b'\r') {
        buf.pop();
    }
    if buf.len() > max_len {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "line too long"));
    }
    String::from_utf8(buf)
        .map(Some)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "line is not utf-8"))
}

/// `floor(received * 100 / expected)`, clamped to 100.
pub fn percent_of(received: u64, expected: u64) -> u8 {
    if expected == 0 {
        return 100;
    }
    let pct = (received as u128 * 100 / expected as u128).min(100);
    pct as u8
}

/// Byte counter for one transfer with a monotonic percentage.
#[derive(Debug, Clone)]
pub struct TransferProgress {
    expected: u64,
    received: u64,
    last_percent: u8,
}

impl TransferProgress {
    pub fn new(expected: u64) -> Self {
        Self {
            expected,
            received: 0,
            last_percent: 0,
        }
    }

    /// Count `n` more bytes. Returns the new percentage when it moved.
    pub fn advance(&mut self, n: u64) -> Option<u8> {
        self.received = self.received.saturating_add(n);
        let pct = percent_of(self.received, self.expected);
        if pct > self.last_percent {
            self.last_percent = pct;
            Some(pct)
        } else {
            None
        }
    }

    pub fn expected(&self) -> u64 {
        self.expected
    }

    pub fn received(&self) -> u64 {
        self.received
    }

    pub fn percent(&self) -> u8 {
        self.last_percent
    }

    pub fn is_complete(&self) -> bool {
        self.received >= self.expected
    }
}
