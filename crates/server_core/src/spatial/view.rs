//! Visible-chunk footprint around a viewer.

use std::collections::BTreeSet;

use glam::IVec3;

use super::{ChunkCoord, Lattice};
use crate::position::Position;

/// How far a viewer sees, in tiles and floors.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct View {
    pub radius_x: u16,
    pub radius_y: u16,
    pub floors: u8,
}

impl View {
    #[must_use]
    pub const fn new(radius_x: u16, radius_y: u16, floors: u8) -> Self {
        Self {
            radius_x,
            radius_y,
            floors,
        }
    }

    /// Chunks a viewer at `pos` spectates.
    ///
    /// The box is grown from the viewer's whole chunk rather than its tile, so
    /// the result depends only on the chunk coordinate. Moving within a chunk
    /// never changes it.
    #[must_use]
    pub fn footprint(&self, lattice: &Lattice, pos: Position) -> BTreeSet<ChunkCoord> {
        let Some(chunk) = lattice.chunk_at(pos) else {
            return BTreeSet::new();
        };
        let lo = chunk.origin().as_ivec3();
        let hi = lo + chunk.dims().as_ivec3() - IVec3::ONE;
        let r = IVec3::new(
            i32::from(self.radius_x),
            i32::from(self.radius_y),
            i32::from(self.floors),
        );
        lattice
            .chunks_in_box(lo - r, hi + r)
            .map(ChunkCoord::from)
            .collect()
    }
}

impl From<&data_runtime::configs::server::ViewCfg> for View {
    fn from(cfg: &data_runtime::configs::server::ViewCfg) -> Self {
        Self::new(cfg.radius_x, cfg.radius_y, cfg.floors)
    }
}
