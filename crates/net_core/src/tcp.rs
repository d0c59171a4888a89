//! TCP transport: one reader and one writer thread per socket.
//!
//! The reader pushes raw chunks into a bounded channel the step drains at its
//! own pace; once it is full the reader blocks and TCP flow control pushes
//! back on the peer. The writer pulls batches from a bounded channel, so a
//! slow peer fills its own queue (and gets evicted by the server) instead of
//! stalling the step.
//! Outbound batches are length-prefixed on the socket (see `batch`).

use std::io::{ErrorKind, Read};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::thread;

use anyhow::{Context, Result};
use crossbeam_channel::Receiver;

use crate::batch::write_stream_batch;
use crate::channel::{self, Rx, Tx};
use crate::transport::{Disconnected, Transport, TrySendError};

const READ_CHUNK: usize = 4096;
/// Read chunks buffered per socket before the reader stops pulling.
pub const INBOUND_CHUNKS: usize = 64;

#[derive(Debug)]
pub struct TcpTransport {
    peer: SocketAddr,
    stream: TcpStream,
    outbound: Tx,
    inbound: Rx,
}

impl TcpTransport {
    /// Take ownership of an accepted socket and start its I/O threads.
    pub fn spawn(stream: TcpStream, outbound_capacity: usize) -> std::io::Result<Self> {
        let peer = stream.peer_addr()?;
        stream.set_nodelay(true)?;
        let read_half = stream.try_clone()?;
        let write_half = stream.try_clone()?;
        let (in_tx, in_rx) = channel::channel_bounded(INBOUND_CHUNKS);
        let (out_tx, out_rx) = channel::channel_bounded(outbound_capacity);
        thread::Builder::new()
            .name(format!("net-read-{peer}"))
            .spawn(move || read_loop(read_half, &in_tx))?;
        thread::Builder::new()
            .name(format!("net-write-{peer}"))
            .spawn(move || write_loop(write_half, &out_rx))?;
        Ok(Self {
            peer,
            stream,
            outbound: out_tx,
            inbound: in_rx,
        })
    }

    #[must_use]
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }
}

impl Transport for TcpTransport {
    fn try_send(&self, bytes: Vec<u8>) -> Result<(), TrySendError> {
        self.outbound.try_send(bytes)
    }
    fn try_recv(&self) -> Result<Option<Vec<u8>>, Disconnected> {
        self.inbound.try_recv()
    }
    fn depth(&self) -> usize {
        self.inbound.depth()
    }
    fn peer(&self) -> String {
        self.peer.to_string()
    }
    fn close(&self) {
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}

fn read_loop(mut s: TcpStream, tx: &Tx) {
    let mut buf = [0u8; READ_CHUNK];
    loop {
        match s.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                if tx.send_blocking(buf[..n].to_vec()).is_err() {
                    break;
                }
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => {
                log::debug!("net: read ended: {e}");
                break;
            }
        }
    }
}

fn write_loop(mut s: TcpStream, rx: &Rx) {
    while let Some(bytes) = rx.recv_blocking() {
        if let Err(e) = write_stream_batch(&mut s, &bytes) {
            log::debug!("net: write ended: {e}");
            break;
        }
    }
    let _ = s.shutdown(Shutdown::Both);
}

/// Bind `addr` and accept connections on a background thread. Each accepted
/// socket is wrapped in a `TcpTransport` and handed over through the returned
/// receiver; the server picks them up at its next step boundary.
pub fn listen(
    addr: &str,
    outbound_capacity: usize,
) -> Result<(SocketAddr, Receiver<Box<dyn Transport>>)> {
    let listener = TcpListener::bind(addr).with_context(|| format!("bind {addr}"))?;
    let local = listener.local_addr().context("listener local_addr")?;
    let (tx, rx) = crossbeam_channel::unbounded::<Box<dyn Transport>>();
    thread::Builder::new()
        .name("net-accept".to_string())
        .spawn(move || {
            for stream in listener.incoming() {
                let stream = match stream {
                    Ok(s) => s,
                    Err(e) => {
                        log::warn!("net: accept failed: {e}");
                        continue;
                    }
                };
                match TcpTransport::spawn(stream, outbound_capacity) {
                    Ok(t) => {
                        log::info!("net: accepted {}", t.peer_addr());
                        if tx.send(Box::new(t)).is_err() {
                            break;
                        }
                    }
                    Err(e) => log::warn!("net: failed to start transport: {e}"),
                }
            }
        })
        .context("spawn accept thread")?;
    Ok((local, rx))
}
