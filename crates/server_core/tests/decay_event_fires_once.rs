use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use data_runtime::configs::server::ServerCfg;
use server_core::events::EventContext;
use server_core::spatial::Item;
use server_core::{Position, World};

const GROUND: Item = Item::new(100, 1);
const CORPSE: Item = Item::new(3058, 1);

fn world() -> World {
    let mut cfg = ServerCfg::default();
    cfg.tick_ms = 100;
    cfg.world.size = [36, 14, 8];
    cfg.world.spawn = [4, 3];
    let mut w = World::from_config(cfg).expect("world");
    w.lattice_mut().fill_ground(7, GROUND);
    w
}

fn run_until(w: &mut World, now_ms: u64) {
    while w.now_ms() < now_ms {
        w.step();
    }
}

#[test]
fn decayed_item_disappears_exactly_at_its_deadline() {
    let mut w = world();
    let pos = Position::new(10, 5, 7);
    let fired = Arc::new(AtomicUsize::new(0));
    let probe = Arc::clone(&fired);

    let decay = w
        .place_item(pos, CORPSE, Some(300_000))
        .expect("place")
        .expect("decay handle");
    w.schedule(300_000, EventContext::new("probe"), move |_| {
        probe.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });
    assert_eq!(w.lattice().tile_at(pos).expect("tile").items(), &[GROUND, CORPSE]);

    run_until(&mut w, 299_900);
    assert_eq!(fired.load(Ordering::SeqCst), 0);
    assert_eq!(w.lattice().tile_at(pos).expect("tile").items().len(), 2);

    w.step();
    assert_eq!(w.now_ms(), 300_000);
    assert_eq!(fired.load(Ordering::SeqCst), 1);
    assert_eq!(w.lattice().tile_at(pos).expect("tile").items(), &[GROUND]);

    // Fired handles cannot be cancelled; a later drain does nothing.
    assert!(!w.cancel(decay));
    run_until(&mut w, 310_000);
    assert_eq!(fired.load(Ordering::SeqCst), 1);
    assert!(w.events().is_empty());
}

#[test]
fn cancelled_decay_leaves_the_item() {
    let mut w = world();
    let pos = Position::new(10, 5, 7);
    let handle = w
        .place_item(pos, CORPSE, Some(1_000))
        .expect("place")
        .expect("decay handle");
    assert!(w.cancel(handle));
    assert!(!w.cancel(handle));
    run_until(&mut w, 2_000);
    assert_eq!(w.lattice().tile_at(pos).expect("tile").items(), &[GROUND, CORPSE]);
}

#[test]
fn decay_removes_only_the_topmost_copy() {
    let mut w = world();
    let pos = Position::new(3, 3, 7);
    w.place_item(pos, CORPSE, None).expect("place");
    w.place_item(pos, Item::new(2148, 5), None).expect("place");
    w.place_item(pos, CORPSE, Some(500)).expect("place");
    run_until(&mut w, 500);
    assert_eq!(
        w.lattice().tile_at(pos).expect("tile").items(),
        &[GROUND, CORPSE, Item::new(2148, 5)]
    );
}

#[test]
fn placing_outside_the_world_is_an_error() {
    let mut w = world();
    assert!(w.place_item(Position::new(500, 5, 7), CORPSE, Some(10)).is_err());
    // Floor 0 has no ground.
    assert!(w.place_item(Position::new(5, 5, 0), CORPSE, Some(10)).is_err());
    assert!(w.events().is_empty());
}
