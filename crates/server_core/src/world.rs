//! The authoritative world: lattice, registry, event queue, clock and
//! connections, plus every operation that writes a creature's position.
//!
//! Position writes update the tile, the chunk occupant sets and (for players)
//! the owner's spectator membership before anything is broadcast.

use std::collections::{BTreeSet, HashMap};

use anyhow::{Context, Result, bail, ensure};
use data_runtime::configs::server::ServerCfg;
use glam::UVec3;
use thiserror::Error;

use crate::connection::{CloseReason, ConnectionTable};
use crate::entity::{
    Behavior, Creature, CreatureKind, EntityRegistry, PlayerBrain, Properties,
};
use crate::events::{EventContext, EventHandle, EventQueue};
use crate::ids::{ConnectionId, EntityId};
use crate::position::{Direction, Position};
use crate::protocol::{CommandParsers, ServerMessage};
use crate::scheduler::SimClock;
use crate::spatial::{ChunkCoord, Lattice, View};

/// Chebyshev radius searched for a free tile when placing a player.
const PLACEMENT_SEARCH_RADIUS: u16 = 3;

/// Radius, in tiles, a spoken line carries.
pub const SAY_RADIUS: u16 = 7;

#[derive(Copy, Clone, Debug, Error, PartialEq, Eq)]
pub enum MoveError {
    #[error("no creature {0}")]
    NoSuchCreature(EntityId),
    #[error("creature {0} is not placed")]
    NotPlaced(EntityId),
    #[error("{0} is outside the world")]
    OutOfBounds(Position),
    #[error("{0} is blocked")]
    Blocked(Position),
}

pub struct World {
    pub(crate) cfg: ServerCfg,
    pub(crate) lattice: Lattice,
    pub(crate) view: View,
    pub(crate) registry: EntityRegistry,
    pub(crate) events: EventQueue<World>,
    pub(crate) clock: SimClock,
    pub(crate) connections: ConnectionTable,
    pub(crate) parsers: CommandParsers,
    /// Dead creatures waiting to come back, keyed by the id they died with.
    pub(crate) respawning: HashMap<EntityId, Creature>,
    spawn: Position,
}

impl std::fmt::Debug for World {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("World")
            .field("tick", &self.clock.tick())
            .field("now_ms", &self.clock.now_ms())
            .field("entities", &self.registry.len())
            .field("connections", &self.connections.len())
            .field("events", &self.events)
            .finish_non_exhaustive()
    }
}

impl World {
    /// Build a world around a populated lattice.
    pub fn new(cfg: ServerCfg, lattice: Lattice) -> Result<Self> {
        cfg.validate()?;
        let [sx, sy] = cfg.world.spawn;
        let spawn = Position::new(sx, sy, cfg.world.spawn_floor);
        ensure!(lattice.contains(spawn), "spawn {spawn} lies outside the lattice");
        Ok(Self {
            view: View::from(&cfg.view),
            clock: SimClock::new(cfg.tick_ms),
            connections: ConnectionTable::new(cfg.net.max_inbound_frame),
            registry: EntityRegistry::new(),
            events: EventQueue::new(),
            parsers: CommandParsers::with_defaults(),
            respawning: HashMap::new(),
            lattice,
            spawn,
            cfg,
        })
    }

    /// Build an empty lattice from `cfg.world`.
    pub fn from_config(cfg: ServerCfg) -> Result<Self> {
        let lattice = Lattice::new(UVec3::from(cfg.world.size), UVec3::from(cfg.world.chunk))
            .context("build lattice")?;
        Self::new(cfg, lattice)
    }

    #[must_use]
    pub fn config(&self) -> &ServerCfg {
        &self.cfg
    }

    #[must_use]
    pub fn lattice(&self) -> &Lattice {
        &self.lattice
    }

    /// Static map edits (ground, flags). Creature and item placement go
    /// through `World` so broadcasts and bookkeeping stay consistent.
    pub fn lattice_mut(&mut self) -> &mut Lattice {
        &mut self.lattice
    }

    #[must_use]
    pub fn registry(&self) -> &EntityRegistry {
        &self.registry
    }

    #[must_use]
    pub fn events(&self) -> &EventQueue<World> {
        &self.events
    }

    pub fn events_mut(&mut self) -> &mut EventQueue<World> {
        &mut self.events
    }

    #[must_use]
    pub fn connections(&self) -> &ConnectionTable {
        &self.connections
    }

    pub fn connections_mut(&mut self) -> &mut ConnectionTable {
        &mut self.connections
    }

    pub fn parsers_mut(&mut self) -> &mut CommandParsers {
        &mut self.parsers
    }

    #[must_use]
    pub fn view(&self) -> View {
        self.view
    }

    #[must_use]
    pub fn spawn_point(&self) -> Position {
        self.spawn
    }

    #[must_use]
    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    #[must_use]
    pub fn tick(&self) -> u64 {
        self.clock.tick()
    }

    #[must_use]
    pub fn creature(&self, id: EntityId) -> Option<&Creature> {
        self.registry.get(id)
    }

    pub fn creature_mut(&mut self, id: EntityId) -> Option<&mut Creature> {
        self.registry.get_mut(id)
    }

    /// Schedule a callback against this world, relative to simulation time.
    pub fn schedule(
        &mut self,
        delay_ms: u64,
        ctx: EventContext,
        callback: impl FnOnce(&mut World) -> Result<()> + Send + 'static,
    ) -> EventHandle {
        self.events.set_now(self.clock.now_ms());
        self.events.schedule(delay_ms, ctx, callback)
    }

    pub fn cancel(&mut self, handle: EventHandle) -> bool {
        self.events.cancel(handle)
    }

    /// Activate or deactivate a creature for dispatch.
    pub fn set_active(&mut self, id: EntityId, active: bool) -> bool {
        self.registry.set_active(id, active)
    }

    fn check_free(&self, pos: Position) -> Result<(), MoveError> {
        let tile = self.lattice.tile_at(pos).ok_or(MoveError::OutOfBounds(pos))?;
        if tile.is_walkable() {
            Ok(())
        } else {
            Err(MoveError::Blocked(pos))
        }
    }

    /// Nearest walkable tile to `pos` on its floor, searching outward ring by
    /// ring.
    #[must_use]
    pub fn find_free_near(&self, pos: Position, radius: u16) -> Option<Position> {
        for r in 0..=radius {
            let r = i32::from(r);
            for dy in -r..=r {
                for dx in -r..=r {
                    if dx.abs() != r && dy.abs() != r {
                        continue;
                    }
                    let (Ok(x), Ok(y)) = (
                        u16::try_from(i32::from(pos.x) + dx),
                        u16::try_from(i32::from(pos.y) + dy),
                    ) else {
                        continue;
                    };
                    let p = Position::new(x, y, pos.z);
                    if self.check_free(p).is_ok() {
                        return Some(p);
                    }
                }
            }
        }
        None
    }

    /// Register `creature` and place it at `pos`.
    pub fn spawn_creature(&mut self, creature: Creature, pos: Position) -> Result<EntityId, MoveError> {
        self.check_free(pos)?;
        let id = self.registry.register(creature);
        self.place(id, pos);
        if let Some(msg) = self.appear_message(id) {
            self.broadcast_at(pos, &msg);
        }
        log::debug!("world: spawned {id} at {pos}");
        Ok(id)
    }

    /// Write tile + occupant bookkeeping for a freshly placed creature.
    fn place(&mut self, id: EntityId, pos: Position) {
        if let Some(tile) = self.lattice.tile_at_mut(pos) {
            tile.set_creature(Some(id));
        }
        if let Some(chunk) = self.lattice.chunk_at_mut(pos) {
            chunk.add_occupant(id);
        }
        if let Some(c) = self.registry.get_mut(id) {
            c.position = Some(pos);
        }
    }

    /// Detach a creature from the lattice, cancel the events it holds, tell
    /// its observers, and drop it from the registry.
    pub fn remove_creature(&mut self, id: EntityId) -> Option<Creature> {
        let creature = self.registry.get_mut(id)?;
        let pos = creature.position.take();
        let conn = creature.connection.take();
        let mut handles: Vec<EventHandle> = creature
            .conditions
            .clear(&mut creature.props)
            .into_iter()
            .map(|c| c.handle)
            .collect();
        handles.append(&mut creature.timers);
        for h in handles {
            self.events.cancel(h);
        }
        if let Some(pos) = pos {
            if let Some(tile) = self.lattice.tile_at_mut(pos) {
                tile.set_creature(None);
            }
            if let Some(chunk) = self.lattice.chunk_at_mut(pos) {
                chunk.remove_occupant(id);
            }
        }
        if let Some(conn) = conn {
            self.detach_spectator(conn);
            if let Some(c) = self.connections.get_mut(conn) {
                c.entity = None;
            }
        }
        if let Some(pos) = pos {
            self.broadcast_at(pos, &ServerMessage::CreatureDisappear { id });
        }
        log::debug!("world: removed {id}");
        self.registry.unregister(id)
    }

    /// Move one tile towards `dir`, facing it.
    pub fn step_creature(&mut self, id: EntityId, dir: Direction) -> Result<Position, MoveError> {
        let from = self
            .registry
            .get(id)
            .ok_or(MoveError::NoSuchCreature(id))?
            .position
            .ok_or(MoveError::NotPlaced(id))?;
        let to = from.step(dir).ok_or(MoveError::OutOfBounds(from))?;
        self.relocate(id, to, Some(dir))?;
        Ok(to)
    }

    /// Move to any position (teleport), keeping the current facing.
    pub fn move_creature(&mut self, id: EntityId, to: Position) -> Result<(), MoveError> {
        self.relocate(id, to, None)
    }

    fn relocate(&mut self, id: EntityId, to: Position, facing: Option<Direction>) -> Result<(), MoveError> {
        let c = self.registry.get(id).ok_or(MoveError::NoSuchCreature(id))?;
        let from = c.position.ok_or(MoveError::NotPlaced(id))?;
        let conn = c.connection;
        if from == to {
            return Ok(());
        }
        self.check_free(to)?;
        let old_chunk = self.lattice.chunk_coord(from);
        let new_chunk = self.lattice.chunk_coord(to);

        if let Some(tile) = self.lattice.tile_at_mut(from) {
            tile.set_creature(None);
        }
        if let Some(tile) = self.lattice.tile_at_mut(to) {
            tile.set_creature(Some(id));
        }
        let crossed = old_chunk != new_chunk;
        // Captured before the mover's own view shifts.
        let old_specs = if crossed {
            self.spectators_of(old_chunk)
        } else {
            BTreeSet::new()
        };
        if crossed {
            if let Some(chunk) = self.lattice.chunk_at_mut(from) {
                chunk.remove_occupant(id);
            }
            if let Some(chunk) = self.lattice.chunk_at_mut(to) {
                chunk.add_occupant(id);
            }
        }
        let dir = {
            let Some(c) = self.registry.get_mut(id) else {
                return Err(MoveError::NoSuchCreature(id));
            };
            c.position = Some(to);
            if let Some(d) = facing {
                c.direction = d;
            }
            c.direction
        };
        if crossed && let Some(conn) = conn {
            self.refresh_view(conn);
        }

        let moved = ServerMessage::CreatureMove { id, from, to, dir };
        if crossed {
            // Everyone who saw the old chunk sees the move; spectators that
            // only see the new chunk meet the creature for the first time.
            let new_specs = self.spectators_of(new_chunk);
            self.deliver(old_specs.iter().copied(), &moved);
            if let Some(appear) = self.appear_message(id) {
                let fresh = new_specs
                    .difference(&old_specs)
                    .copied()
                    .filter(|&c| Some(c) != conn);
                self.deliver(fresh, &appear);
            }
        } else if let Some(coord) = new_chunk {
            self.broadcast_chunk(coord, &moved);
        }
        Ok(())
    }

    fn spectators_of(&self, coord: Option<UVec3>) -> BTreeSet<ConnectionId> {
        coord
            .and_then(|c| self.lattice.chunk(c))
            .map(|c| c.spectators().clone())
            .unwrap_or_default()
    }

    pub fn turn(&mut self, id: EntityId, dir: Direction) -> Result<(), MoveError> {
        let c = self
            .registry
            .get_mut(id)
            .ok_or(MoveError::NoSuchCreature(id))?;
        let pos = c.position.ok_or(MoveError::NotPlaced(id))?;
        if c.direction == dir {
            return Ok(());
        }
        c.direction = dir;
        self.broadcast_at(pos, &ServerMessage::CreatureTurn { id, dir });
        Ok(())
    }

    /// Broadcast a line to everyone watching within [`SAY_RADIUS`].
    pub fn say(&mut self, id: EntityId, text: &str) -> Result<()> {
        let c = self
            .registry
            .get(id)
            .with_context(|| format!("say: no creature {id}"))?;
        let Some(pos) = c.position else {
            bail!("say: creature {id} is not placed");
        };
        let msg = ServerMessage::CreatureSay {
            id,
            name: c.name.clone(),
            text: text.to_string(),
        };
        self.broadcast_radius(pos, SAY_RADIUS, &msg);
        Ok(())
    }

    pub(crate) fn appear_message(&self, id: EntityId) -> Option<ServerMessage> {
        let c = self.registry.get(id)?;
        Some(ServerMessage::CreatureAppear {
            id,
            kind: c.kind,
            name: c.name.clone(),
            pos: c.position?,
            dir: c.direction,
            health_pct: c.health_percent(),
        })
    }

    /// Recompute which chunks `conn` spectates from its creature's position,
    /// applying only the difference. Newly seen chunks produce appear and
    /// tile messages for their contents; chunks left behind produce
    /// disappear messages. The connection's own creature is never listed.
    pub fn refresh_view(&mut self, conn: ConnectionId) {
        let Some(c) = self.connections.get(conn) else {
            return;
        };
        let me = c.entity;
        let footprint = me
            .and_then(|id| self.registry.get(id))
            .and_then(Creature::position)
            .map(|pos| self.view.footprint(&self.lattice, pos))
            .unwrap_or_default();
        let added: Vec<ChunkCoord> = footprint.difference(&c.viewing).copied().collect();
        let removed: Vec<ChunkCoord> = c.viewing.difference(&footprint).copied().collect();
        if added.is_empty() && removed.is_empty() {
            return;
        }

        let mut out = Vec::new();
        for &coord in &removed {
            if let Some(chunk) = self.lattice.chunk_mut(coord.into()) {
                chunk.remove_spectator(conn);
                out.extend(
                    chunk
                        .occupants()
                        .iter()
                        .filter(|&&o| Some(o) != me)
                        .map(|&id| ServerMessage::CreatureDisappear { id }),
                );
            }
        }
        for &coord in &added {
            let Some(chunk) = self.lattice.chunk_mut(coord.into()) else {
                continue;
            };
            chunk.add_spectator(conn);
            let occupants: Vec<EntityId> = chunk.occupants().iter().copied().collect();
            for (pos, tile) in chunk.tiles() {
                if tile.items().len() > 1 {
                    out.push(ServerMessage::TileUpdate {
                        pos,
                        items: tile.items().to_vec(),
                    });
                }
            }
            out.extend(
                occupants
                    .into_iter()
                    .filter(|&o| Some(o) != me)
                    .filter_map(|o| self.appear_message(o)),
            );
        }
        if let Some(c) = self.connections.get_mut(conn) {
            c.viewing = footprint;
            for msg in &out {
                c.enqueue(msg);
            }
        }
    }

    /// Stop `conn` spectating anything.
    pub(crate) fn detach_spectator(&mut self, conn: ConnectionId) {
        let Some(c) = self.connections.get_mut(conn) else {
            return;
        };
        for coord in std::mem::take(&mut c.viewing) {
            if let Some(chunk) = self.lattice.chunk_mut(coord.into()) {
                chunk.remove_spectator(conn);
            }
        }
    }

    /// Bind a connection to a placed creature: login ack, then the initial
    /// view.
    pub fn attach_connection(&mut self, conn: ConnectionId, id: EntityId) -> Result<()> {
        let c = self
            .connections
            .get(conn)
            .with_context(|| format!("attach: no connection {conn}"))?;
        ensure!(c.entity.is_none(), "attach: {conn} already owns a creature");
        let creature = self
            .registry
            .get_mut(id)
            .with_context(|| format!("attach: no creature {id}"))?;
        ensure!(
            creature.connection.is_none(),
            "attach: {id} already has a connection"
        );
        let pos = creature
            .position
            .with_context(|| format!("attach: {id} is not placed"))?;
        creature.connection = Some(conn);
        let tick_ms = u16::try_from(self.cfg.tick_ms).unwrap_or(u16::MAX);
        if let Some(c) = self.connections.get_mut(conn) {
            c.entity = Some(id);
            c.enqueue(&ServerMessage::LoginAck { id, pos, tick_ms });
        }
        self.refresh_view(conn);
        log::info!("world: {conn} now controls {id} at {pos}");
        Ok(())
    }

    /// Create a player creature near the spawn point and hand it to `conn`.
    /// Stands in for the external login service.
    pub fn attach_player(&mut self, conn: ConnectionId, name: &str) -> Result<EntityId> {
        let pos = self
            .find_free_near(self.spawn, PLACEMENT_SEARCH_RADIUS)
            .context("no free tile near the spawn point")?;
        let player = Creature::new(name, CreatureKind::Player, Properties::new(150, 50, 220, 10, 10))
            .with_behavior(Behavior::Player(PlayerBrain::default()));
        let id = self.spawn_creature(player, pos)?;
        if let Err(e) = self.attach_connection(conn, id) {
            self.remove_creature(id);
            return Err(e);
        }
        Ok(id)
    }

    /// End the session that owns `id`; the creature is despawned when the
    /// connection is reaped at the end of the step.
    pub fn logout(&mut self, id: EntityId) {
        let conn = self.registry.get(id).and_then(Creature::connection);
        match conn.and_then(|c| self.connections.get_mut(c)) {
            Some(c) => c.close(CloseReason::Logout),
            None => {
                self.remove_creature(id);
            }
        }
    }

    /// Take a creature out of dispatch for `duration_ms`, then wake it.
    pub fn pause_entity(&mut self, id: EntityId, duration_ms: u64) -> Option<EventHandle> {
        if !self.registry.set_active(id, false) {
            return None;
        }
        let handle = self.schedule(
            duration_ms,
            EventContext::for_entity(id, "wake"),
            move |w: &mut World| {
                w.registry.set_active(id, true);
                if let Some(c) = w.registry.get_mut(id) {
                    let events = &w.events;
                    c.timers.retain(|h| events.is_pending(*h));
                }
                Ok(())
            },
        );
        if let Some(c) = self.registry.get_mut(id) {
            c.timers.push(handle);
        }
        Some(handle)
    }
}
