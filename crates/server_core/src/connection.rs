//! Connection I/O boundary.
//!
//! Transports hand raw bytes in and out through non-blocking channels. At the
//! start of a step the world drains each connection's inbound bytes, rebuilds
//! frames and parses commands; at the end it flushes one batch per
//! connection. Sessions that misbehave are marked closing and reaped at the
//! end of the step.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crossbeam_channel::Receiver;
use net_core::frame::{FrameReader, OwnedFrame};
use net_core::transport::Transport;

use crate::ids::{ConnectionId, EntityId};
use crate::protocol::ServerMessage;
use crate::spatial::ChunkCoord;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CloseReason {
    PeerClosed,
    /// Framing or parse failure; carries the error text.
    Protocol(String),
    /// Outbound queue was full at flush time.
    SlowConsumer,
    Logout,
    Shutdown,
}

impl CloseReason {
    /// Metric label.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::PeerClosed => "peer_closed",
            Self::Protocol(_) => "protocol",
            Self::SlowConsumer => "slow_consumer",
            Self::Logout => "logout",
            Self::Shutdown => "shutdown",
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Protocol(e) => write!(f, "protocol error: {e}"),
            other => f.write_str(other.label()),
        }
    }
}

pub struct Connection {
    pub id: ConnectionId,
    transport: Box<dyn Transport>,
    reader: FrameReader,
    /// Frames enqueued this step, back to back in enqueue order.
    outbox: Vec<u8>,
    pub(crate) entity: Option<EntityId>,
    /// Chunks this connection is a spectator of.
    pub(crate) viewing: BTreeSet<ChunkCoord>,
    pub(crate) closing: Option<CloseReason>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer", &self.transport.peer())
            .field("entity", &self.entity)
            .field("outbox", &self.outbox.len())
            .field("viewing", &self.viewing.len())
            .field("closing", &self.closing)
            .finish()
    }
}

impl Connection {
    #[must_use]
    pub fn new(id: ConnectionId, transport: Box<dyn Transport>, max_inbound_frame: usize) -> Self {
        Self {
            id,
            transport,
            reader: FrameReader::new(max_inbound_frame),
            outbox: Vec::new(),
            entity: None,
            viewing: BTreeSet::new(),
            closing: None,
        }
    }

    #[must_use]
    pub fn entity(&self) -> Option<EntityId> {
        self.entity
    }

    #[must_use]
    pub fn viewing(&self) -> &BTreeSet<ChunkCoord> {
        &self.viewing
    }

    #[must_use]
    pub fn peer(&self) -> String {
        self.transport.peer()
    }

    #[must_use]
    pub fn is_closing(&self) -> bool {
        self.closing.is_some()
    }

    #[must_use]
    pub fn close_reason(&self) -> Option<&CloseReason> {
        self.closing.as_ref()
    }

    /// Mark for removal at the end of the step. The first reason wins.
    pub fn close(&mut self, reason: CloseReason) {
        if self.closing.is_none() {
            log::debug!("conn {}: closing ({reason})", self.id);
            self.closing = Some(reason);
        }
    }

    /// Append a framed message to this step's outbox. Oversized payloads are
    /// logged and dropped.
    pub fn enqueue(&mut self, msg: &ServerMessage) {
        if let Err(e) = msg.write_frame(&mut self.outbox) {
            log::warn!(
                "conn {}: dropping message 0x{:02x}: {e}",
                self.id,
                msg.opcode()
            );
            metrics::counter!("server.errors_total", "site" => "enqueue").increment(1);
        }
    }

    /// Bytes waiting for the next flush.
    #[must_use]
    pub fn pending_bytes(&self) -> usize {
        self.outbox.len()
    }

    pub(crate) fn take_outbox(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.outbox)
    }

    pub(crate) fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    /// Return up to `max` complete frames, pulling from the transport only
    /// while more are needed. Anything beyond `max` stays queued for the
    /// next step. A disconnect or framing error marks the connection closing;
    /// frames completed before the failure are still returned.
    pub fn read_frames(&mut self, max: usize) -> Vec<OwnedFrame> {
        let mut frames = Vec::new();
        while frames.len() < max {
            match self.reader.next_frame() {
                Ok(Some(f)) => {
                    frames.push(f);
                    continue;
                }
                Ok(None) => {}
                Err(e) => {
                    self.close(CloseReason::Protocol(e.to_string()));
                    break;
                }
            }
            match self.transport.try_recv() {
                Ok(Some(bytes)) => self.reader.push(&bytes),
                Ok(None) => break,
                Err(_) => {
                    self.close(CloseReason::PeerClosed);
                    break;
                }
            }
        }
        frames
    }

    /// Inbound bytes pulled off the transport but not yet framed.
    #[must_use]
    pub fn buffered_inbound(&self) -> usize {
        self.reader.buffered()
    }
}

/// Live connections plus the hand-off channel new transports arrive on.
#[derive(Debug)]
pub struct ConnectionTable {
    next_id: u32,
    conns: BTreeMap<ConnectionId, Connection>,
    incoming: Option<Receiver<Box<dyn Transport>>>,
    max_inbound_frame: usize,
}

impl ConnectionTable {
    #[must_use]
    pub fn new(max_inbound_frame: usize) -> Self {
        Self {
            next_id: 1,
            conns: BTreeMap::new(),
            incoming: None,
            max_inbound_frame,
        }
    }

    /// Take new transports from `rx` at each step boundary.
    pub fn set_incoming(&mut self, rx: Receiver<Box<dyn Transport>>) {
        self.incoming = Some(rx);
    }

    pub fn add(&mut self, transport: Box<dyn Transport>) -> ConnectionId {
        let id = ConnectionId(self.next_id);
        self.next_id += 1;
        log::info!("conn {id}: opened from {}", transport.peer());
        self.conns
            .insert(id, Connection::new(id, transport, self.max_inbound_frame));
        id
    }

    /// Register every transport waiting on the hand-off channel.
    pub fn accept_incoming(&mut self) -> Vec<ConnectionId> {
        let pending: Vec<Box<dyn Transport>> = match &self.incoming {
            Some(rx) => rx.try_iter().collect(),
            None => return Vec::new(),
        };
        pending.into_iter().map(|t| self.add(t)).collect()
    }

    #[must_use]
    pub fn get(&self, id: ConnectionId) -> Option<&Connection> {
        self.conns.get(&id)
    }

    pub fn get_mut(&mut self, id: ConnectionId) -> Option<&mut Connection> {
        self.conns.get_mut(&id)
    }

    pub fn remove(&mut self, id: ConnectionId) -> Option<Connection> {
        self.conns.remove(&id)
    }

    #[must_use]
    pub fn ids(&self) -> Vec<ConnectionId> {
        self.conns.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Connection> {
        self.conns.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Connection> {
        self.conns.values_mut()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.conns.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.conns.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use net_core::transport::LocalLoopbackTransport;

    #[test]
    fn partial_frames_wait_for_the_rest() {
        let (server, client) = LocalLoopbackTransport::new(8);
        let mut c = Connection::new(ConnectionId(1), Box::new(server), 64);
        client.try_send(vec![0x1e, 0x00]).expect("send");
        assert!(c.read_frames(16).is_empty());
        client.try_send(vec![0x00, 0x1e, 0x00, 0x00]).expect("send");
        let frames = c.read_frames(16);
        assert_eq!(frames.len(), 2);
        assert!(frames.iter().all(|f| f.opcode == 0x1e && f.payload.is_empty()));
        assert!(!c.is_closing());
    }

    #[test]
    fn frames_beyond_the_budget_wait_for_the_next_read() {
        let (server, client) = LocalLoopbackTransport::new(8);
        let mut c = Connection::new(ConnectionId(1), Box::new(server), 64);
        client.try_send([0x1e, 0x00, 0x00].repeat(5)).expect("send");
        client.try_send(vec![0x1e, 0x00, 0x00]).expect("send");
        assert_eq!(c.read_frames(2).len(), 2);
        // The second chunk is still queued on the transport.
        assert_eq!(c.buffered_inbound(), 9);
        assert_eq!(c.transport().depth(), 1);
        assert_eq!(c.read_frames(2).len(), 2);
        assert_eq!(c.read_frames(2).len(), 2);
        assert!(c.read_frames(2).is_empty());
        assert_eq!(c.buffered_inbound(), 0);
    }

    #[test]
    fn oversized_frame_closes_with_protocol_error() {
        let (server, client) = LocalLoopbackTransport::new(8);
        let mut c = Connection::new(ConnectionId(1), Box::new(server), 16);
        client.try_send(vec![0x96, 0xff, 0x00]).expect("send");
        assert!(c.read_frames(16).is_empty());
        assert!(matches!(c.close_reason(), Some(CloseReason::Protocol(_))));
    }

    #[test]
    fn hangup_is_peer_closed_and_first_reason_wins() {
        let (server, client) = LocalLoopbackTransport::new(8);
        let mut c = Connection::new(ConnectionId(1), Box::new(server), 64);
        drop(client);
        let _ = c.read_frames(16);
        c.close(CloseReason::SlowConsumer);
        assert_eq!(c.close_reason(), Some(&CloseReason::PeerClosed));
    }

    #[test]
    fn table_accepts_handed_off_transports() {
        let (tx, rx) = crossbeam_channel::unbounded::<Box<dyn Transport>>();
        let mut t = ConnectionTable::new(64);
        t.set_incoming(rx);
        let (a, _a_peer) = LocalLoopbackTransport::new(4);
        let (b, _b_peer) = LocalLoopbackTransport::new(4);
        tx.send(Box::new(a)).expect("send");
        tx.send(Box::new(b)).expect("send");
        let ids = t.accept_incoming();
        assert_eq!(ids, vec![ConnectionId(1), ConnectionId(2)]);
        assert_eq!(t.len(), 2);
        assert!(t.accept_incoming().is_empty());
    }
}
