//! Server bootstrap: demo map and population, guest admission, and the tick
//! driver around `server_core::World`.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::{Context, Result};
use data_runtime::configs::server::ServerCfg;
use server_core::entity::{
    Behavior, Creature, CreatureKind, MonsterBrain, NpcBrain, NpcPause, Properties,
};
use server_core::scheduler::TickScheduler;
use server_core::spatial::Item;
use server_core::{ConnectionId, Position, World};

/// Plain grass over the whole spawn floor.
pub const GRASS: Item = Item::new(102, 1);

/// Build a world from `cfg` with a flat floor under the spawn point.
pub fn build_world(cfg: ServerCfg) -> Result<World> {
    let floor = cfg.world.spawn_floor;
    let mut world = World::from_config(cfg).context("build world")?;
    world.lattice_mut().fill_ground(floor, GRASS);
    Ok(world)
}

/// A few monsters around the spawn and a talkative NPC next to it.
pub fn populate_demo(world: &mut World) -> Result<()> {
    let spawn = world.spawn_point();
    let offsets: [(i32, i32); 4] = [(6, 0), (-6, 2), (0, 7), (5, -5)];
    for (i, (dx, dy)) in offsets.into_iter().enumerate() {
        let Some(home) = offset(spawn, dx, dy) else {
            continue;
        };
        let Some(home) = world.find_free_near(home, 2) else {
            continue;
        };
        let rat = Creature::new("rat", CreatureKind::Monster, Properties::new(20, 0, 120, 3, 1))
            .with_home(home)
            .with_behavior(Behavior::Monster(MonsterBrain::new(0x5eed + i as u64, 3)));
        world.spawn_creature(rat, home)?;
    }

    let lines = vec![
        "Welcome, traveller.".to_string(),
        "Mind the rats.".to_string(),
        "The road east is closed.".to_string(),
    ];
    let guide = NpcBrain::new(lines, 4_000).with_pause(NpcPause {
        every_lines: 3,
        duration_ms: 20_000,
    });
    if let Some(at) = offset(spawn, 2, -2).and_then(|p| world.find_free_near(p, 2)) {
        let npc = Creature::new("Guide", CreatureKind::Npc, Properties::new(100, 0, 100, 0, 0))
            .with_behavior(Behavior::Npc(guide));
        world.spawn_creature(npc, at)?;
    }
    log::info!("demo: {} creatures placed", world.registry().len());
    Ok(())
}

fn offset(p: Position, dx: i32, dy: i32) -> Option<Position> {
    let x = u16::try_from(i32::from(p.x) + dx).ok()?;
    let y = u16::try_from(i32::from(p.y) + dy).ok()?;
    Some(Position::new(x, y, p.z))
}

/// Give every connection without a creature a guest character. Stands in for
/// the account service; returns how many were admitted.
pub fn admit_guests(world: &mut World) -> usize {
    let waiting: Vec<ConnectionId> = world
        .connections()
        .iter()
        .filter(|c| c.entity().is_none() && !c.is_closing())
        .map(|c| c.id)
        .collect();
    let mut admitted = 0;
    for conn in waiting {
        match world.attach_player(conn, &format!("guest-{}", conn.0)) {
            Ok(_) => admitted += 1,
            Err(e) => log::warn!("login: {conn}: {e:#}"),
        }
    }
    admitted
}

/// One scheduler tick: simulate, then admit anyone who connected.
pub fn tick(world: &mut World) {
    world.step();
    admit_guests(world);
}

/// Listen on `cfg.net.bind_addr` and drive the world until `ticks` steps
/// have run, or forever when `None`.
pub fn run(cfg: ServerCfg, ticks: Option<u64>) -> Result<()> {
    let tick_ms = cfg.tick_ms;
    let interval = Duration::from_millis(tick_ms);
    let (addr, incoming) = net_core::tcp::listen(&cfg.net.bind_addr, cfg.net.outbound_capacity)?;
    let mut world = build_world(cfg)?;
    populate_demo(&mut world)?;
    world.connections_mut().set_incoming(incoming);
    tracing::info!(target: "server", %addr, tick_ms, "listening");

    let world = Arc::new(Mutex::new(world));
    let shared = Arc::clone(&world);
    let mut scheduler = TickScheduler::start(interval, move |_| {
        let mut w = shared.lock().unwrap_or_else(PoisonError::into_inner);
        tick(&mut w);
    })?;

    loop {
        std::thread::sleep(interval);
        if ticks.is_some_and(|n| scheduler.ticks() >= n) {
            break;
        }
    }
    scheduler.stop();

    let mut w = world.lock().unwrap_or_else(PoisonError::into_inner);
    w.disconnect_all();
    let s = w.stats();
    tracing::info!(
        target: "server",
        tick = s.tick,
        entities = s.entities,
        events = s.events_pending,
        "shut down"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> ServerCfg {
        let mut cfg = ServerCfg::default();
        cfg.world.size = [72, 56, 8];
        cfg.world.spawn = [30, 25];
        cfg
    }

    #[test]
    fn demo_population_lands_on_the_spawn_floor() {
        let mut w = build_world(cfg()).expect("world");
        populate_demo(&mut w).expect("populate");
        assert_eq!(w.registry().len(), 5);
        for (_, c) in w.registry().iter() {
            assert_eq!(c.position().map(|p| p.z), Some(7));
        }
    }

    #[test]
    fn guests_are_admitted_once() {
        let mut w = build_world(cfg()).expect("world");
        let (server_end, _client) = net_core::transport::LocalLoopbackTransport::new(8);
        let conn = w.connections_mut().add(Box::new(server_end));
        assert_eq!(admit_guests(&mut w), 1);
        assert_eq!(admit_guests(&mut w), 0);
        let id = w.connections().get(conn).and_then(|c| c.entity()).expect("player");
        assert_eq!(w.creature(id).map(|c| c.name.as_str()), Some("guest-1"));
    }
}
