//! UDP discovery responder.
//!
//! Answers every probe datagram with the identification string, unicast back to
//! the probe's source over the same socket.

use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::thread::JoinHandle;

use anyhow::{Context, Result};
use nukebox_proto::{DISCOVERY_RESPONSE, is_probe};

/// Handle one datagram. Returns whether a reply was sent.
pub(crate) fn answer(socket: &UdpSocket, datagram: &[u8], from: SocketAddr) -> io::Result<bool> {
    if !is_probe(datagram) {
        tracing::debug!(from = %from, len = datagram.len(), "discovery: ignoring datagram");
        return Ok(false);
    }
    socket.send_to(DISCOVERY_RESPONSE.as_bytes(), from)?;
    tracing::info!(from = %from, "discovery: answered probe");
    Ok(true)
}

/// Bind the discovery socket. Failing here is fatal for the process.
pub fn bind_responder(bind: SocketAddr) -> Result<UdpSocket> {
    UdpSocket::bind(bind).with_context(|| format!("bind discovery {bind}"))
}

/// Serve probes on `socket` forever from a background thread.
pub fn spawn_responder(socket: UdpSocket) -> Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("discovery".to_string())
        .spawn(move || {
            if let Ok(addr) = socket.local_addr() {
                tracing::info!(bind = %addr, "discovery: listening");
            }
            let mut buf = [0u8; 512];
            loop {
                let (n, from) = match socket.recv_from(&mut buf) {
                    Ok(v) => v,
                    Err(e) => {
                        tracing::warn!("discovery: recv error: {e}");
                        continue;
                    }
                };
                if let Err(e) = answer(&socket, &buf[..n], from) {
                    tracing::warn!(to = %from, "discovery: reply failed: {e}");
                }
            }
        })
        .context("spawn discovery thread")
}
