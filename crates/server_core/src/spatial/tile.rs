//! Contents of a single world position.

use net_core::WireError;
use net_core::codec::{PacketReader, PacketWriter, WireDecode, WireEncode};

use crate::ids::EntityId;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ItemId(pub u16);

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Item {
    pub id: ItemId,
    pub count: u16,
}

impl Item {
    #[must_use]
    pub const fn new(id: u16, count: u16) -> Self {
        Self { id: ItemId(id), count }
    }
}

impl WireEncode for Item {
    fn encode(&self, w: &mut PacketWriter) {
        w.put_u16(self.id.0).put_u16(self.count);
    }
}

impl WireDecode for Item {
    fn decode(r: &mut PacketReader<'_>) -> Result<Self, WireError> {
        Ok(Self {
            id: ItemId(r.get_u16()?),
            count: r.get_u16()?,
        })
    }
}

/// Static properties from map data.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct TileFlags {
    pub solid: bool,
    pub blocks_projectile: bool,
    pub protection_zone: bool,
}

/// Items are kept bottom-to-top; index 0 is always the ground.
#[derive(Clone, Debug, Default)]
pub struct Tile {
    items: Vec<Item>,
    creature: Option<EntityId>,
    pub flags: TileFlags,
}

impl Tile {
    #[must_use]
    pub fn with_ground(ground: Item) -> Self {
        Self {
            items: vec![ground],
            ..Self::default()
        }
    }

    #[must_use]
    pub fn ground(&self) -> Option<&Item> {
        self.items.first()
    }

    /// Replace the ground (or lay one on a bare tile).
    pub fn set_ground(&mut self, ground: Item) {
        match self.items.first_mut() {
            Some(g) => *g = ground,
            None => self.items.push(ground),
        }
    }

    /// Put an item on top of the stack. Bare tiles (no ground) take nothing.
    /// Returns the stack index the item landed at.
    pub fn push_item(&mut self, item: Item) -> Option<usize> {
        if self.items.is_empty() {
            return None;
        }
        self.items.push(item);
        Some(self.items.len() - 1)
    }

    /// Remove the topmost non-ground item equal to `item`.
    pub fn remove_item(&mut self, item: Item) -> Option<Item> {
        let idx = self.items.iter().skip(1).rposition(|i| *i == item)? + 1;
        Some(self.items.remove(idx))
    }

    #[must_use]
    pub fn items(&self) -> &[Item] {
        &self.items
    }

    #[must_use]
    pub fn creature(&self) -> Option<EntityId> {
        self.creature
    }

    pub(crate) fn set_creature(&mut self, id: Option<EntityId>) {
        self.creature = id;
    }

    /// Has ground, is not solid and nobody stands on it.
    #[must_use]
    pub fn is_walkable(&self) -> bool {
        !self.items.is_empty() && !self.flags.solid && self.creature.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ground_stays_at_bottom() {
        let mut t = Tile::with_ground(Item::new(100, 1));
        assert_eq!(t.push_item(Item::new(7, 3)), Some(1));
        t.set_ground(Item::new(101, 1));
        assert_eq!(t.items()[0], Item::new(101, 1));
        assert_eq!(t.items()[1], Item::new(7, 3));
    }

    #[test]
    fn bare_tile_rejects_items_and_is_not_walkable() {
        let mut t = Tile::default();
        assert_eq!(t.push_item(Item::new(7, 1)), None);
        assert!(!t.is_walkable());
    }

    #[test]
    fn remove_takes_topmost_match_and_never_the_ground() {
        let g = Item::new(100, 1);
        let mut t = Tile::with_ground(g);
        t.push_item(Item::new(7, 1));
        t.push_item(Item::new(8, 1));
        t.push_item(Item::new(7, 1));
        assert_eq!(t.remove_item(Item::new(7, 1)), Some(Item::new(7, 1)));
        assert_eq!(t.items(), &[g, Item::new(7, 1), Item::new(8, 1)]);
        assert_eq!(t.remove_item(g), None);
    }

    #[test]
    fn walkability_follows_flags_and_occupant() {
        let mut t = Tile::with_ground(Item::new(100, 1));
        assert!(t.is_walkable());
        t.set_creature(Some(EntityId(1)));
        assert!(!t.is_walkable());
        t.set_creature(None);
        t.flags.solid = true;
        assert!(!t.is_walkable());
    }
}
