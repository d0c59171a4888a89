//! Transport abstraction for connection bytes.
//!
//! Implementations:
//! - `LocalLoopbackTransport`: in-proc bounded channels (tests, bots)
//! - `tcp::TcpTransport`: socket served by reader/writer threads

use crate::channel;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrySendError {
    /// Peer is not keeping up; the outbound queue is at capacity.
    Full,
    Disconnected,
}

/// The peer side of a transport has gone away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Disconnected;

/// Minimal non-blocking byte transport. Every call returns immediately so the
/// simulation step never waits on a peer.
pub trait Transport: Send + Sync {
    fn try_send(&self, bytes: Vec<u8>) -> Result<(), TrySendError>;
    fn try_recv(&self) -> Result<Option<Vec<u8>>, Disconnected>;
    /// Inbound messages queued but not yet received.
    fn depth(&self) -> usize;
    /// Human-readable peer label for logs.
    fn peer(&self) -> String {
        "local".to_string()
    }
    /// Ask the underlying link to shut down. Idempotent.
    fn close(&self) {}
}

/// In-process loopback using crossbeam bounded channels.
#[derive(Clone, Debug)]
pub struct LocalLoopbackTransport {
    tx: channel::Tx,
    rx: channel::Rx,
}

impl LocalLoopbackTransport {
    /// Returns the two ends of a link; each end's sends arrive at the other.
    #[must_use]
    pub fn new(capacity: usize) -> (Self, Self) {
        let (tx_a, rx_a) = channel::channel_bounded(capacity);
        let (tx_b, rx_b) = channel::channel_bounded(capacity);
        let a = Self { tx: tx_a, rx: rx_b };
        let b = Self { tx: tx_b, rx: rx_a };
        (a, b)
    }

    #[must_use]
    pub fn from_channel_pair(tx: channel::Tx, rx: channel::Rx) -> Self {
        Self { tx, rx }
    }

    #[must_use]
    pub fn split(self) -> (channel::Tx, channel::Rx) {
        (self.tx, self.rx)
    }

    /// Drain every message currently queued for this end.
    #[must_use]
    pub fn drain(&self) -> Vec<Vec<u8>> {
        self.rx.drain()
    }
}

impl Transport for LocalLoopbackTransport {
    fn try_send(&self, bytes: Vec<u8>) -> Result<(), TrySendError> {
        self.tx.try_send(bytes)
    }
    fn try_recv(&self) -> Result<Option<Vec<u8>>, Disconnected> {
        self.rx.try_recv()
    }
    fn depth(&self) -> usize {
        self.rx.depth()
    }
}
