//! Spatially scoped fan-out and the per-step flush.
//!
//! Producers call these directly after a successful mutation; there is no
//! subscription registry. Every fan-out resolves its audience from chunk
//! spectator sets and delivers at most one copy per connection.

use std::collections::BTreeSet;

use glam::{IVec3, UVec3};
use net_core::batch::encode_batch;
use net_core::transport::TrySendError;

use crate::connection::CloseReason;
use crate::ids::{ConnectionId, EntityId};
use crate::position::Position;
use crate::protocol::ServerMessage;
use crate::world::World;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Connections that got a batch this step.
    pub batches: usize,
    /// Bytes handed to transports, after compression.
    pub bytes: usize,
    pub compressed: usize,
    /// Connections closed because their transport refused the batch.
    pub dropped: usize,
}

impl World {
    /// Queue a message for one connection.
    pub fn send_to(&mut self, conn: ConnectionId, msg: &ServerMessage) {
        if let Some(c) = self.connections.get_mut(conn) {
            c.enqueue(msg);
        }
    }

    /// Queue a message for the connection controlling `id`, if any.
    pub fn send_to_entity(&mut self, id: EntityId, msg: &ServerMessage) {
        if let Some(conn) = self.registry.get(id).and_then(|c| c.connection) {
            self.send_to(conn, msg);
        }
    }

    pub(crate) fn deliver(&mut self, audience: impl IntoIterator<Item = ConnectionId>, msg: &ServerMessage) {
        for conn in audience {
            if let Some(c) = self.connections.get_mut(conn) {
                c.enqueue(msg);
            }
        }
    }

    /// Every spectator of one chunk.
    pub fn broadcast_chunk(&mut self, coord: UVec3, msg: &ServerMessage) {
        let Some(chunk) = self.lattice.chunk(coord) else {
            return;
        };
        for conn in chunk.spectators() {
            if let Some(c) = self.connections.get_mut(*conn) {
                c.enqueue(msg);
            }
        }
    }

    /// Spectators of the chunk containing `pos`.
    pub fn broadcast_at(&mut self, pos: Position, msg: &ServerMessage) {
        if let Some(coord) = self.lattice.chunk_coord(pos) {
            self.broadcast_chunk(coord, msg);
        }
    }

    /// Spectators of every chunk overlapping the square of `radius` tiles
    /// around `pos` on its floor, each receiving one copy.
    pub fn broadcast_radius(&mut self, pos: Position, radius: u16, msg: &ServerMessage) {
        let audience = self.audience_in_radius(pos, radius);
        self.deliver(audience, msg);
    }

    #[must_use]
    pub fn audience_in_radius(&self, pos: Position, radius: u16) -> BTreeSet<ConnectionId> {
        let c = pos.as_uvec3().as_ivec3();
        let r = IVec3::new(i32::from(radius), i32::from(radius), 0);
        self.lattice
            .chunks_in_box(c - r, c + r)
            .filter_map(|coord| self.lattice.chunk(coord))
            .flat_map(|chunk| chunk.spectators().iter().copied())
            .collect()
    }

    /// Hand each connection's outbox to its transport as one batch. A full
    /// queue or a dead peer closes only that connection.
    pub fn flush_all(&mut self) -> FlushReport {
        let threshold = self.cfg.net.compress_threshold;
        let mut report = FlushReport::default();
        for c in self.connections.iter_mut() {
            if c.pending_bytes() == 0 {
                continue;
            }
            let body = c.take_outbox();
            let batch = encode_batch(&body, threshold);
            let len = batch.len();
            let compressed = batch.first().is_some_and(|f| f & net_core::batch::FLAG_LZ4 != 0);
            match c.transport().try_send(batch) {
                Ok(()) => {
                    report.batches += 1;
                    report.bytes += len;
                    if compressed {
                        report.compressed += 1;
                    }
                }
                Err(TrySendError::Full) => {
                    log::warn!("conn {}: outbound queue full; dropping slow consumer", c.id);
                    c.close(CloseReason::SlowConsumer);
                    report.dropped += 1;
                }
                Err(TrySendError::Disconnected) => {
                    c.close(CloseReason::PeerClosed);
                    report.dropped += 1;
                }
            }
        }
        metrics::counter!("net.bytes_out_total").increment(report.bytes as u64);
        report
    }
}
