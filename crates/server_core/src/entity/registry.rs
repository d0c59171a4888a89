//! Canonical id -> creature mapping plus the active set the dispatcher walks.

use std::collections::{BTreeSet, HashMap};

use super::Creature;
use crate::ids::EntityId;

#[derive(Debug)]
pub struct EntityRegistry {
    next_id: u32,
    creatures: HashMap<EntityId, Creature>,
    /// Ordered so dispatch order is stable between runs.
    active: BTreeSet<EntityId>,
}

impl Default for EntityRegistry {
    fn default() -> Self {
        Self {
            next_id: 1,
            creatures: HashMap::new(),
            active: BTreeSet::new(),
        }
    }
}

impl EntityRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Take ownership of `creature` and assign it a fresh id. Ids are never
    /// reused. New creatures start active.
    pub fn register(&mut self, mut creature: Creature) -> EntityId {
        let id = EntityId(self.next_id);
        self.next_id += 1;
        creature.id = id;
        self.creatures.insert(id, creature);
        self.active.insert(id);
        id
    }

    /// Drop a creature from the registry. Callers detach it from the lattice
    /// first; `World::remove_creature` does both.
    pub fn unregister(&mut self, id: EntityId) -> Option<Creature> {
        self.active.remove(&id);
        self.creatures.remove(&id)
    }

    #[must_use]
    pub fn get(&self, id: EntityId) -> Option<&Creature> {
        self.creatures.get(&id)
    }

    pub fn get_mut(&mut self, id: EntityId) -> Option<&mut Creature> {
        self.creatures.get_mut(&id)
    }

    #[must_use]
    pub fn contains(&self, id: EntityId) -> bool {
        self.creatures.contains_key(&id)
    }

    /// Returns `false` if `id` is unknown.
    pub fn set_active(&mut self, id: EntityId, active: bool) -> bool {
        if !self.creatures.contains_key(&id) {
            return false;
        }
        if active {
            self.active.insert(id);
        } else {
            self.active.remove(&id);
        }
        true
    }

    #[must_use]
    pub fn is_active(&self, id: EntityId) -> bool {
        self.active.contains(&id)
    }

    /// Ids active right now, in dispatch order.
    #[must_use]
    pub fn active_snapshot(&self) -> Vec<EntityId> {
        self.active.iter().copied().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.creatures.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.creatures.is_empty()
    }

    #[must_use]
    pub fn active_len(&self) -> usize {
        self.active.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (EntityId, &Creature)> {
        self.creatures.iter().map(|(id, c)| (*id, c))
    }
}
