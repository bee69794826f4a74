//! Locate a server by broadcasting the discovery probe.

use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::time::Duration;

use anyhow::{Context, Result};
use nukebox_proto::{DISCOVERY_PROBE, is_response};

/// Send one probe to `target` and return the address of the first server that answers.
///
/// Later answers are never read. With `timeout == None` this waits forever.
pub fn discover_server(target: SocketAddr, timeout: Option<Duration>) -> Result<SocketAddr> {
    let socket = UdpSocket::bind(("0.0.0.0", 0)).context("bind discovery socket")?;
    socket.set_broadcast(true).context("enable broadcast")?;
    socket
        .set_read_timeout(timeout)
        .context("set discovery timeout")?;

    socket
        .send_to(DISCOVERY_PROBE.as_bytes(), target)
        .with_context(|| format!("send probe to {target}"))?;
    tracing::info!(target = %target, "probe sent; waiting for a server");

    let mut buf = [0u8; 512];
    loop {
        let (n, from) = match socket.recv_from(&mut buf) {
            Ok(v) => v,
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                anyhow::bail!("no server answered within {:?}", timeout.unwrap_or_default());
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e).context("receive discovery reply"),
        };
        if is_response(&buf[..n]) {
            tracing::info!(server = %from, "server found");
            return Ok(from);
        }
        tracing::debug!(from = %from, len = n, "ignoring unrelated datagram");
    }
}
