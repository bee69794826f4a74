//! Background worker that owns the TCP connection and streams one file.

use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::path::{Path, PathBuf};
use std::thread::JoinHandle;

use anyhow::{Context, Result};
use crossbeam_channel::{Receiver, Sender};
use nukebox_proto::{
    ACK_TOKEN, MAX_LINE_LEN, READY_TOKEN, Registration, TransferProgress, encode_registration,
    read_line, write_line,
};

use crate::identity::Identity;

const CHUNK: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Status(String),
    Progress { sent: u64, total: u64, percent: u8 },
    Acked,
    Error(String),
}

fn expect_line<R: std::io::BufRead>(reader: &mut R, want: &str, stage: &str) -> Result<()> {
    match read_line(reader, MAX_LINE_LEN).with_context(|| format!("read {stage} reply"))? {
        Some(line) if line == want => Ok(()),
        Some(other) => anyhow::bail!("unexpected {stage} reply {other:?}"),
        None => anyhow::bail!("server closed the connection during {stage}"),
    }
}

/// Register, stream the file, and wait for the server's acknowledgement.
pub fn upload_file(
    addr: SocketAddr,
    path: &Path,
    identity: &Identity,
    evt_tx: &Sender<Event>,
) -> Result<()> {
    let mut file = File::open(path).with_context(|| format!("open {:?}", path))?;
    let size = file
        .metadata()
        .with_context(|| format!("stat {:?}", path))?
        .len();
    if size == 0 {
        anyhow::bail!("{:?} is empty", path);
    }
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "upload".to_string());

    let stream = TcpStream::connect(addr).with_context(|| format!("connect {addr}"))?;
    stream.set_nodelay(true).ok();
    let mut reader = BufReader::new(stream.try_clone().context("clone tcp stream")?);
    let mut writer = stream;

    let reg = Registration {
        size,
        filename,
        name: identity.name.clone(),
        mac_id: identity.mac_id.clone(),
    };
    let line = encode_registration(&reg).context("encode registration")?;
    write_line(&mut writer, &line).context("send registration")?;
    expect_line(&mut reader, READY_TOKEN, "registration")?;
    evt_tx
        .send(Event::Status(format!("Sending {} bytes to {addr}", size)))
        .ok();

    let mut progress = TransferProgress::new(size);
    let mut buf = vec![0u8; CHUNK];
    loop {
        let n = file
            .read(&mut buf)
            .with_context(|| format!("read {:?}", path))?;
        if n == 0 {
            break;
        }
        writer.write_all(&buf[..n]).context("send file bytes")?;
        if let Some(percent) = progress.advance(n as u64) {
            evt_tx
                .send(Event::Progress {
                    sent: progress.received(),
                    total: size,
                    percent,
                })
                .ok();
        }
    }
    writer.flush().context("flush file bytes")?;
    if !progress.is_complete() {
        anyhow::bail!(
            "{:?} shrank while sending ({} of {} bytes)",
            path,
            progress.received(),
            size
        );
    }

    expect_line(&mut reader, ACK_TOKEN, "transfer")?;
    evt_tx.send(Event::Acked).ok();
    Ok(())
}

/// Run [`upload_file`] on its own thread, reporting through the returned channel.
pub fn spawn_upload(
    addr: SocketAddr,
    path: PathBuf,
    identity: Identity,
) -> Result<(Receiver<Event>, JoinHandle<()>)> {
    let (evt_tx, evt_rx) = crossbeam_channel::unbounded();
    let handle = std::thread::Builder::new()
        .name("upload".to_string())
        .spawn(move || {
            if let Err(e) = upload_file(addr, &path, &identity, &evt_tx) {
                let _ = evt_tx.send(Event::Error(format!("{e:#}")));
            }
        })
        .context("spawn upload worker")?;
    Ok((evt_rx, handle))
}
