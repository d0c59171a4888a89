use data_runtime::configs::server::ServerCfg;
use server_core::entity::{Behavior, Creature, CreatureKind, MonsterBrain, NpcBrain, NpcPause, Properties};
use server_core::spatial::Item;
use server_core::{EntityId, Position, World};

fn world() -> World {
    let mut cfg = ServerCfg::default();
    cfg.tick_ms = 100;
    cfg.world.size = [36, 28, 8];
    cfg.world.spawn = [4, 3];
    let mut w = World::from_config(cfg).expect("world");
    w.lattice_mut().fill_ground(7, Item::new(100, 1));
    w
}

fn wanderer(w: &mut World, seed: u64, home: Position) -> EntityId {
    let c = Creature::new("wolf", CreatureKind::Monster, Properties::new(30, 0, 400, 3, 2))
        .with_home(home)
        .with_behavior(Behavior::Monster(MonsterBrain::new(seed, 2)));
    w.spawn_creature(c, home).expect("spawn")
}

fn trail(seed: u64, steps: usize) -> Vec<Position> {
    let mut w = world();
    let home = Position::new(15, 14, 7);
    let id = wanderer(&mut w, seed, home);
    (0..steps)
        .map(|_| {
            w.step();
            w.creature(id).and_then(Creature::position).expect("placed")
        })
        .collect()
}

#[test]
fn monster_wanders_within_its_radius() {
    let home = Position::new(15, 14, 7);
    let path = trail(7, 400);
    assert!(path.iter().all(|p| p.distance_on_floor(home).is_some_and(|d| d <= 2)));
    // Speed 400 steps every 250-500 ms; 40 s is plenty to leave home.
    assert!(path.iter().any(|p| *p != home));
}

#[test]
fn wandering_is_deterministic_per_seed() {
    assert_eq!(trail(42, 200), trail(42, 200));
}

#[test]
fn npc_pauses_then_wakes() {
    let mut w = world();
    let brain = NpcBrain::new(vec!["welcome".into(), "buy something".into()], 100).with_pause(NpcPause {
        every_lines: 2,
        duration_ms: 1_000,
    });
    let c = Creature::new("trader", CreatureKind::Npc, Properties::new(50, 0, 100, 0, 0))
        .with_behavior(Behavior::Npc(brain));
    let id = w.spawn_creature(c, Position::new(8, 8, 7)).expect("spawn");
    let said = |w: &World| match w.creature(id).and_then(Creature::behavior) {
        Some(Behavior::Npc(b)) => b.lines_said(),
        _ => panic!("not an npc"),
    };

    w.step();
    w.step();
    assert_eq!(w.now_ms(), 200);
    assert_eq!(said(&w), 2);
    assert!(!w.registry().is_active(id));
    assert_eq!(w.registry().active_len(), 0);

    while w.now_ms() < 1_100 {
        w.step();
    }
    assert_eq!(said(&w), 2);
    assert!(!w.registry().is_active(id));

    // The wake event fires before dispatch, so it talks on the same tick.
    let report = w.step();
    assert_eq!(w.now_ms(), 1_200);
    assert_eq!(report.events.fired, 1);
    assert!(w.registry().is_active(id));
    assert_eq!(said(&w), 3);
}

#[test]
fn removing_a_paused_npc_cancels_its_wake() {
    let mut w = world();
    let brain = NpcBrain::new(vec!["zzz".into()], 100).with_pause(NpcPause {
        every_lines: 1,
        duration_ms: 5_000,
    });
    let c = Creature::new("sleeper", CreatureKind::Npc, Properties::new(50, 0, 100, 0, 0))
        .with_behavior(Behavior::Npc(brain));
    let id = w.spawn_creature(c, Position::new(8, 8, 7)).expect("spawn");
    w.step();
    assert_eq!(w.events().len(), 1);
    w.remove_creature(id);
    assert!(w.events().is_empty());
}

#[test]
fn pausing_an_unknown_creature_is_refused() {
    let mut w = world();
    assert!(w.pause_entity(EntityId(7), 1_000).is_none());
    assert!(w.events().is_empty());
}
