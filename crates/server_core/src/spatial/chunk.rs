//! A fixed block of tiles plus who stands in it and who watches it.

use std::collections::BTreeSet;

use glam::UVec3;

use super::tile::Tile;
use crate::ids::{ConnectionId, EntityId};
use crate::position::Position;

#[derive(Debug)]
pub struct Chunk {
    coord: UVec3,
    origin: UVec3,
    /// Clipped to the world edge, so edge chunks may be smaller than nominal.
    dims: UVec3,
    tiles: Vec<Tile>,
    occupants: BTreeSet<EntityId>,
    spectators: BTreeSet<ConnectionId>,
}

impl Chunk {
    pub(crate) fn new(coord: UVec3, origin: UVec3, dims: UVec3) -> Self {
        let len = (dims.x as usize) * (dims.y as usize) * (dims.z as usize);
        Self {
            coord,
            origin,
            dims,
            tiles: vec![Tile::default(); len],
            occupants: BTreeSet::new(),
            spectators: BTreeSet::new(),
        }
    }

    #[inline]
    #[must_use]
    pub fn coord(&self) -> UVec3 {
        self.coord
    }

    /// World tile coordinate of local offset (0, 0, 0).
    #[inline]
    #[must_use]
    pub fn origin(&self) -> UVec3 {
        self.origin
    }

    #[inline]
    #[must_use]
    pub fn dims(&self) -> UVec3 {
        self.dims
    }

    /// Offset of `pos` inside this chunk, or `None` if it lies elsewhere.
    #[must_use]
    pub fn local_offset(&self, pos: Position) -> Option<UVec3> {
        let p = pos.as_uvec3();
        if p.cmplt(self.origin).any() {
            return None;
        }
        let off = p - self.origin;
        off.cmplt(self.dims).all().then_some(off)
    }

    /// World position of a local offset.
    #[must_use]
    pub fn world_position(&self, offset: UVec3) -> Option<Position> {
        if !offset.cmplt(self.dims).all() {
            return None;
        }
        Position::from_uvec3(self.origin + offset)
    }

    #[must_use]
    pub fn contains(&self, pos: Position) -> bool {
        self.local_offset(pos).is_some()
    }

    fn index(&self, offset: UVec3) -> Option<usize> {
        if !offset.cmplt(self.dims).all() {
            return None;
        }
        let (w, h) = (self.dims.x as usize, self.dims.y as usize);
        Some(offset.x as usize + offset.y as usize * w + offset.z as usize * w * h)
    }

    #[must_use]
    pub fn tile(&self, offset: UVec3) -> Option<&Tile> {
        self.index(offset).map(|i| &self.tiles[i])
    }

    pub fn tile_mut(&mut self, offset: UVec3) -> Option<&mut Tile> {
        self.index(offset).map(move |i| &mut self.tiles[i])
    }

    /// Iterate `(world position, tile)` for every tile in the chunk.
    pub fn tiles(&self) -> impl Iterator<Item = (Position, &Tile)> + '_ {
        let (w, h) = (self.dims.x, self.dims.y);
        self.tiles.iter().enumerate().filter_map(move |(i, t)| {
            // `i` indexes a Vec sized from u32 dims, so it fits in u32.
            #[allow(clippy::cast_possible_truncation)]
            let i = i as u32;
            let off = UVec3::new(i % w, (i / w) % h, i / (w * h));
            Position::from_uvec3(self.origin + off).map(|p| (p, t))
        })
    }

    pub fn add_occupant(&mut self, id: EntityId) -> bool {
        self.occupants.insert(id)
    }

    pub fn remove_occupant(&mut self, id: EntityId) -> bool {
        self.occupants.remove(&id)
    }

    #[must_use]
    pub fn occupants(&self) -> &BTreeSet<EntityId> {
        &self.occupants
    }

    pub fn add_spectator(&mut self, conn: ConnectionId) -> bool {
        self.spectators.insert(conn)
    }

    pub fn remove_spectator(&mut self, conn: ConnectionId) -> bool {
        self.spectators.remove(&conn)
    }

    #[must_use]
    pub fn spectators(&self) -> &BTreeSet<ConnectionId> {
        &self.spectators
    }
}
