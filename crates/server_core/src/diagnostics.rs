//! Point-in-time counters for logs and health checks.

use crate::world::World;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct WorldStats {
    pub tick: u64,
    pub now_ms: u64,
    pub entities: usize,
    pub active: usize,
    pub connections: usize,
    /// Live scheduled events.
    pub events_pending: usize,
    /// Heap entries including cancelled tombstones.
    pub events_heap: usize,
    /// Dead creatures waiting to respawn.
    pub respawning: usize,
}

impl World {
    #[must_use]
    pub fn stats(&self) -> WorldStats {
        WorldStats {
            tick: self.clock.tick(),
            now_ms: self.clock.now_ms(),
            entities: self.registry.len(),
            active: self.registry.active_len(),
            connections: self.connections.len(),
            events_pending: self.events.len(),
            events_heap: self.events.heap_len(),
            respawning: self.respawning.len(),
        }
    }
}
