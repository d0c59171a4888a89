//! Spatial index: Lattice -> Chunk -> Tile.
//!
//! The lattice is a dense grid of fixed-size chunks allocated once at world
//! load. Position lookups are a division and an index, never a search. World
//! dimensions need not be multiples of the chunk size; edge chunks are clipped.

pub mod chunk;
pub mod tile;
pub mod view;

use anyhow::{Result, bail, ensure};
use glam::{IVec3, UVec3};

pub use chunk::Chunk;
pub use tile::{Item, ItemId, Tile, TileFlags};
pub use view::View;

use crate::position::Position;

/// Upper bound on addressable tiles; larger worlds are a startup error.
pub const MAX_TILES: u64 = 1 << 26;

/// Ordered chunk key for spectator sets. Orders floor-major, then row, then
/// column, matching [`Lattice::chunks_in_box`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChunkCoord {
    pub z: u32,
    pub y: u32,
    pub x: u32,
}

impl ChunkCoord {
    #[must_use]
    pub const fn new(x: u32, y: u32, z: u32) -> Self {
        Self { z, y, x }
    }
}

impl From<UVec3> for ChunkCoord {
    fn from(v: UVec3) -> Self {
        Self::new(v.x, v.y, v.z)
    }
}

impl From<ChunkCoord> for UVec3 {
    fn from(c: ChunkCoord) -> Self {
        UVec3::new(c.x, c.y, c.z)
    }
}

#[derive(Debug)]
pub struct Lattice {
    size: UVec3,
    chunk_dims: UVec3,
    chunks_per_axis: UVec3,
    chunks: Vec<Chunk>,
}

impl Lattice {
    /// Allocate every chunk for a world of `size` tiles.
    pub fn new(size: UVec3, chunk_dims: UVec3) -> Result<Self> {
        ensure!(size.cmpgt(UVec3::ZERO).all(), "world size must be non-zero: {size}");
        ensure!(
            chunk_dims.cmpgt(UVec3::ZERO).all(),
            "chunk dims must be non-zero: {chunk_dims}"
        );
        if size.x > u32::from(u16::MAX) + 1
            || size.y > u32::from(u16::MAX) + 1
            || size.z > u32::from(u8::MAX) + 1
        {
            bail!("world size {size} exceeds the position range");
        }
        let tiles = u64::from(size.x) * u64::from(size.y) * u64::from(size.z);
        ensure!(
            tiles <= MAX_TILES,
            "world of {tiles} tiles exceeds the limit of {MAX_TILES}"
        );
        let chunks_per_axis = (size + chunk_dims - UVec3::ONE) / chunk_dims;
        let mut chunks = Vec::with_capacity(
            (chunks_per_axis.x * chunks_per_axis.y * chunks_per_axis.z) as usize,
        );
        for z in 0..chunks_per_axis.z {
            for y in 0..chunks_per_axis.y {
                for x in 0..chunks_per_axis.x {
                    let coord = UVec3::new(x, y, z);
                    let origin = coord * chunk_dims;
                    let dims = (size - origin).min(chunk_dims);
                    chunks.push(Chunk::new(coord, origin, dims));
                }
            }
        }
        log::debug!(
            "lattice: {size} tiles in {} chunks of {chunk_dims}",
            chunks.len()
        );
        Ok(Self {
            size,
            chunk_dims,
            chunks_per_axis,
            chunks,
        })
    }

    #[inline]
    #[must_use]
    pub fn size(&self) -> UVec3 {
        self.size
    }

    #[inline]
    #[must_use]
    pub fn chunk_dims(&self) -> UVec3 {
        self.chunk_dims
    }

    #[inline]
    #[must_use]
    pub fn chunks_per_axis(&self) -> UVec3 {
        self.chunks_per_axis
    }

    #[must_use]
    pub fn contains(&self, pos: Position) -> bool {
        pos.as_uvec3().cmplt(self.size).all()
    }

    /// Chunk coordinate holding `pos`, or `None` out of bounds.
    #[must_use]
    pub fn chunk_coord(&self, pos: Position) -> Option<UVec3> {
        self.contains(pos).then(|| pos.as_uvec3() / self.chunk_dims)
    }

    fn index(&self, coord: UVec3) -> Option<usize> {
        if !coord.cmplt(self.chunks_per_axis).all() {
            return None;
        }
        let (cx, cy) = (self.chunks_per_axis.x as usize, self.chunks_per_axis.y as usize);
        Some(coord.x as usize + coord.y as usize * cx + coord.z as usize * cx * cy)
    }

    #[must_use]
    pub fn chunk(&self, coord: UVec3) -> Option<&Chunk> {
        self.index(coord).map(|i| &self.chunks[i])
    }

    pub fn chunk_mut(&mut self, coord: UVec3) -> Option<&mut Chunk> {
        self.index(coord).map(move |i| &mut self.chunks[i])
    }

    #[must_use]
    pub fn chunk_at(&self, pos: Position) -> Option<&Chunk> {
        self.chunk(self.chunk_coord(pos)?)
    }

    pub fn chunk_at_mut(&mut self, pos: Position) -> Option<&mut Chunk> {
        let coord = self.chunk_coord(pos)?;
        self.chunk_mut(coord)
    }

    #[must_use]
    pub fn tile_at(&self, pos: Position) -> Option<&Tile> {
        let chunk = self.chunk_at(pos)?;
        chunk.tile(chunk.local_offset(pos)?)
    }

    pub fn tile_at_mut(&mut self, pos: Position) -> Option<&mut Tile> {
        let chunk = self.chunk_at_mut(pos)?;
        let off = chunk.local_offset(pos)?;
        chunk.tile_mut(off)
    }

    pub fn chunks(&self) -> impl Iterator<Item = &Chunk> {
        self.chunks.iter()
    }

    /// Chunk coordinates overlapping the inclusive tile box `[min, max]`,
    /// clipped to the world. Empty when the box misses the world entirely.
    pub fn chunks_in_box(&self, min: IVec3, max: IVec3) -> impl Iterator<Item = UVec3> + use<> {
        let hi_tile = self.size.as_ivec3() - IVec3::ONE;
        let lo = min.max(IVec3::ZERO);
        let hi = max.min(hi_tile);
        let empty = lo.cmpgt(hi).any();
        let dims = self.chunk_dims.as_ivec3();
        let (c0, c1) = if empty {
            (IVec3::ONE, IVec3::ZERO)
        } else {
            (lo / dims, hi / dims)
        };
        (c0.z..=c1.z).flat_map(move |z| {
            (c0.y..=c1.y).flat_map(move |y| {
                (c0.x..=c1.x).map(move |x| IVec3::new(x, y, z).as_uvec3())
            })
        })
    }

    /// Lay `ground` on every tile of `floor`.
    pub fn fill_ground(&mut self, floor: u8, ground: Item) {
        if u32::from(floor) >= self.size.z {
            return;
        }
        for y in 0..self.size.y {
            for x in 0..self.size.x {
                // Bounded by the size check in `new`.
                #[allow(clippy::cast_possible_truncation)]
                let pos = Position::new(x as u16, y as u16, floor);
                if let Some(tile) = self.tile_at_mut(pos) {
                    tile.set_ground(ground);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lattice() -> Lattice {
        Lattice::new(UVec3::new(20, 15, 10), UVec3::new(9, 7, 8)).expect("lattice")
    }

    #[test]
    fn chunk_count_rounds_up_and_edges_are_clipped() {
        let l = lattice();
        assert_eq!(l.chunks_per_axis(), UVec3::new(3, 3, 2));
        let edge = l.chunk(UVec3::new(2, 2, 1)).expect("edge chunk");
        assert_eq!(edge.origin(), UVec3::new(18, 14, 8));
        assert_eq!(edge.dims(), UVec3::new(2, 1, 2));
    }

    #[test]
    fn every_position_resolves_to_its_own_tile() {
        let l = lattice();
        for z in 0..10u8 {
            for y in 0..15u16 {
                for x in 0..20u16 {
                    let p = Position::new(x, y, z);
                    let chunk = l.chunk_at(p).expect("chunk");
                    let off = chunk.local_offset(p).expect("offset");
                    assert_eq!(chunk.world_position(off), Some(p));
                    assert!(l.tile_at(p).is_some());
                }
            }
        }
        assert!(l.tile_at(Position::new(20, 0, 0)).is_none());
        assert!(l.chunk_at(Position::new(0, 15, 0)).is_none());
        assert!(l.chunk_at(Position::new(0, 0, 10)).is_none());
    }

    #[test]
    fn rejects_bad_dimensions() {
        assert!(Lattice::new(UVec3::new(0, 4, 4), UVec3::ONE).is_err());
        assert!(Lattice::new(UVec3::new(4, 4, 4), UVec3::new(4, 0, 4)).is_err());
        assert!(Lattice::new(UVec3::new(4, 4, 300), UVec3::ONE).is_err());
        assert!(Lattice::new(UVec3::new(65_536, 65_536, 1), UVec3::new(64, 64, 1)).is_err());
    }

    #[test]
    fn chunks_in_box_clips_to_world() {
        let l = lattice();
        let got: Vec<UVec3> = l
            .chunks_in_box(IVec3::new(-5, -5, 0), IVec3::new(9, 3, 0))
            .collect();
        assert_eq!(got, vec![UVec3::new(0, 0, 0), UVec3::new(1, 0, 0)]);
        assert_eq!(
            l.chunks_in_box(IVec3::new(30, 0, 0), IVec3::new(40, 5, 0)).count(),
            0
        );
    }

    #[test]
    fn fill_ground_covers_one_floor() {
        let mut l = lattice();
        l.fill_ground(7, Item::new(100, 1));
        assert!(l.tile_at(Position::new(19, 14, 7)).expect("tile").is_walkable());
        assert!(!l.tile_at(Position::new(0, 0, 6)).expect("tile").is_walkable());
    }
}
