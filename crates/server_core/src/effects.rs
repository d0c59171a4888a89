//! Timed effects driven by the event queue: conditions, item decay, death and
//! respawn.

use anyhow::{Context, Result};

use crate::conditions::{self, ActiveCondition, ConditionKind, ConditionMode, ConditionSpec};
use crate::entity::{Creature, CreatureKind, Property};
use crate::events::{EventContext, EventHandle};
use crate::ids::EntityId;
use crate::position::Position;
use crate::protocol::ServerMessage;
use crate::spatial::Item;
use crate::world::World;

/// Free-tile search radius when a dead creature comes back.
const RESPAWN_SEARCH_RADIUS: u16 = 2;

impl World {
    /// Start (or restart) a condition on a creature. Re-applying replaces the
    /// running one, undoing its boost first.
    pub fn apply_condition(&mut self, id: EntityId, spec: ConditionSpec) -> Result<EventHandle> {
        anyhow::ensure!(self.registry.contains(id), "condition: no creature {id}");
        anyhow::ensure!(spec.periods > 0, "condition: zero periods");
        if let Some(old) = self
            .registry
            .get_mut(id)
            .and_then(|c| c.conditions.remove(spec.kind))
        {
            self.end_condition(id, &old);
        }
        let base = match spec.mode {
            ConditionMode::Periodic => None,
            ConditionMode::Boost => self
                .registry
                .get_mut(id)
                .map(|c| conditions::boost(&spec, &mut c.props)),
        };
        if base.is_some() {
            self.report_property(id, spec.property);
        }
        let handle = self.schedule_condition_period(id, spec);
        if let Some(c) = self.registry.get_mut(id) {
            c.conditions.insert(ActiveCondition {
                spec,
                remaining: spec.periods,
                handle,
                base,
            });
        }
        self.send_condition_icons(id);
        Ok(handle)
    }

    fn schedule_condition_period(&mut self, id: EntityId, spec: ConditionSpec) -> EventHandle {
        let kind = spec.kind;
        self.schedule(
            spec.period_ms,
            EventContext::for_entity(id, kind.label()),
            move |w: &mut World| w.condition_period(id, kind),
        )
    }

    /// One period of a condition: apply its delta, then reschedule or expire.
    fn condition_period(&mut self, id: EntityId, kind: ConditionKind) -> Result<()> {
        let Some(cond) = self
            .registry
            .get(id)
            .and_then(|c| c.conditions.get(kind).copied())
        else {
            return Ok(());
        };
        if cond.spec.mode == ConditionMode::Periodic {
            self.adjust_property(id, cond.spec.property, cond.spec.delta)?;
        }
        // The delta may have killed the creature, which clears its conditions.
        let Some(c) = self.registry.get_mut(id) else {
            return Ok(());
        };
        let Some(active) = c.conditions.get_mut(kind) else {
            return Ok(());
        };
        active.remaining = active.remaining.saturating_sub(1);
        if active.remaining == 0 {
            if let Some(done) = c.conditions.remove(kind) {
                self.end_condition(id, &done);
            }
            self.send_condition_icons(id);
        } else {
            let spec = active.spec;
            let handle = self.schedule_condition_period(id, spec);
            if let Some(active) = self
                .registry
                .get_mut(id)
                .and_then(|c| c.conditions.get_mut(kind))
            {
                active.handle = handle;
            }
        }
        Ok(())
    }

    /// Stop a condition early.
    pub fn remove_condition(&mut self, id: EntityId, kind: ConditionKind) -> bool {
        let Some(old) = self
            .registry
            .get_mut(id)
            .and_then(|c| c.conditions.remove(kind))
        else {
            return false;
        };
        self.end_condition(id, &old);
        self.send_condition_icons(id);
        true
    }

    /// Cancel a condition already taken off the creature and undo its boost.
    fn end_condition(&mut self, id: EntityId, cond: &ActiveCondition) {
        self.events.cancel(cond.handle);
        let reverted = self
            .registry
            .get_mut(id)
            .and_then(|c| cond.revert(&mut c.props));
        if let Some(p) = reverted {
            self.report_property(id, p);
        }
    }

    fn send_condition_icons(&mut self, id: EntityId) {
        if let Some(icons) = self.registry.get(id).map(|c| c.conditions.icons()) {
            self.send_to_entity(id, &ServerMessage::ConditionIcons { id, icons });
        }
    }

    /// Add a clamped delta to a property and report it. Health reaching zero
    /// kills the creature.
    pub fn adjust_property(&mut self, id: EntityId, property: Property, delta: i64) -> Result<u32> {
        let c = self
            .registry
            .get_mut(id)
            .with_context(|| format!("adjust: no creature {id}"))?;
        let before = c.props.get(property);
        let value = c.props.adjust(property, delta);
        if value == before {
            return Ok(value);
        }
        self.report_property(id, property);
        if property == Property::Health && value == 0 {
            self.kill(id)?;
        }
        Ok(value)
    }

    /// Send a property's current value. Health changes are visible to
    /// everyone watching; other properties only to the owner.
    fn report_property(&mut self, id: EntityId, property: Property) {
        let Some(c) = self.registry.get(id) else {
            return;
        };
        let stat = c.props.stat(property);
        let pos = c.position;
        let msg = ServerMessage::PropertyUpdate {
            id,
            property,
            value: stat.value,
            max: stat.max,
        };
        match (property, pos) {
            (Property::Health, Some(pos)) => self.broadcast_at(pos, &msg),
            _ => self.send_to_entity(id, &msg),
        }
    }

    /// Reduce health by `amount`; returns the health left.
    pub fn damage(&mut self, id: EntityId, amount: u32) -> Result<u32> {
        self.adjust_property(id, Property::Health, -i64::from(amount))
    }

    pub fn heal(&mut self, id: EntityId, amount: u32) -> Result<u32> {
        self.adjust_property(id, Property::Health, i64::from(amount))
    }

    /// Players are restored at the spawn point; anything else is removed and,
    /// if it has a home, comes back there after `respawn_ms`.
    fn kill(&mut self, id: EntityId) -> Result<()> {
        let c = self
            .registry
            .get(id)
            .with_context(|| format!("kill: no creature {id}"))?;
        log::info!("world: {id} ({}) died", c.name);
        metrics::counter!("world.deaths_total").increment(1);
        if c.kind == CreatureKind::Player {
            return self.revive_player(id);
        }
        let Some(mut dead) = self.remove_creature(id) else {
            return Ok(());
        };
        if dead.home.is_none() {
            return Ok(());
        }
        for p in Property::ALL {
            dead.props.restore(p);
        }
        self.respawning.insert(id, dead);
        self.schedule_respawn(id);
        Ok(())
    }

    fn schedule_respawn(&mut self, old_id: EntityId) {
        let delay = self.cfg.world.respawn_ms;
        self.schedule(
            delay,
            EventContext::for_entity(old_id, "respawn"),
            move |w: &mut World| w.respawn(old_id),
        );
    }

    fn revive_player(&mut self, id: EntityId) -> Result<()> {
        let spawn = self
            .find_free_near(self.spawn_point(), RESPAWN_SEARCH_RADIUS)
            .context("revive: spawn area is full")?;
        let Some(c) = self.registry.get_mut(id) else {
            return Ok(());
        };
        let cleared = c.conditions.clear(&mut c.props);
        c.props.restore(Property::Health);
        c.props.restore(Property::Mana);
        let health = c.props.stat(Property::Health);
        for cond in &cleared {
            self.events.cancel(cond.handle);
            if cond.base.is_some() && cond.spec.property != Property::Health {
                self.report_property(id, cond.spec.property);
            }
        }
        self.move_creature(id, spawn)?;
        if let Some(pos) = self.creature(id).and_then(Creature::position) {
            self.broadcast_at(
                pos,
                &ServerMessage::PropertyUpdate {
                    id,
                    property: Property::Health,
                    value: health.value,
                    max: health.max,
                },
            );
        }
        self.send_condition_icons(id);
        Ok(())
    }

    fn respawn(&mut self, old_id: EntityId) -> Result<()> {
        let Some(home) = self.respawning.get(&old_id).and_then(|c| c.home) else {
            self.respawning.remove(&old_id);
            return Ok(());
        };
        let Some(pos) = self.find_free_near(home, RESPAWN_SEARCH_RADIUS) else {
            log::debug!("world: respawn of {old_id} at {home} blocked; retrying");
            self.schedule_respawn(old_id);
            return Ok(());
        };
        let Some(creature) = self.respawning.remove(&old_id) else {
            return Ok(());
        };
        let id = self.spawn_creature(creature, pos)?;
        log::debug!("world: {old_id} respawned as {id} at {pos}");
        Ok(())
    }

    /// Put an item on top of the tile at `pos`. With `decay_ms`, the item
    /// removes itself after that long; the handle is returned.
    pub fn place_item(&mut self, pos: Position, item: Item, decay_ms: Option<u64>) -> Result<Option<EventHandle>> {
        let tile = self
            .lattice
            .tile_at_mut(pos)
            .with_context(|| format!("place_item: {pos} is outside the world"))?;
        tile.push_item(item)
            .with_context(|| format!("place_item: {pos} has no ground"))?;
        let items = tile.items().to_vec();
        self.broadcast_at(pos, &ServerMessage::TileUpdate { pos, items });
        let handle = decay_ms.map(|ms| {
            self.schedule(ms, EventContext::new("decay"), move |w: &mut World| {
                w.remove_item(pos, item);
                Ok(())
            })
        });
        Ok(handle)
    }

    /// Take the topmost matching item off a tile and report the change.
    pub fn remove_item(&mut self, pos: Position, item: Item) -> Option<Item> {
        let tile = self.lattice.tile_at_mut(pos)?;
        let removed = tile.remove_item(item)?;
        let items = tile.items().to_vec();
        self.broadcast_at(pos, &ServerMessage::TileUpdate { pos, items });
        Some(removed)
    }
}
