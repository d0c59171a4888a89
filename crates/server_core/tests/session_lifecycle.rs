use data_runtime::configs::server::{ServerCfg, ViewCfg};
use net_core::transport::{LocalLoopbackTransport, Transport};
use server_core::connection::CloseReason;
use server_core::protocol::{Command, ServerMessage};
use server_core::spatial::Item;
use server_core::{ConnectionId, Direction, Position, World};

fn cfg() -> ServerCfg {
    let mut cfg = ServerCfg::default();
    cfg.world.size = [36, 14, 8];
    cfg.world.spawn = [4, 3];
    cfg.view = ViewCfg {
        radius_x: 0,
        radius_y: 0,
        floors: 0,
    };
    cfg
}

fn world(compress_threshold: Option<usize>) -> World {
    let mut cfg = cfg();
    cfg.net.compress_threshold = compress_threshold;
    world_from(cfg)
}

fn world_from(cfg: ServerCfg) -> World {
    let mut w = World::from_config(cfg).expect("world");
    w.lattice_mut().fill_ground(7, Item::new(100, 1));
    w
}

fn connect(w: &mut World, capacity: usize) -> (ConnectionId, LocalLoopbackTransport) {
    let (server_end, client) = LocalLoopbackTransport::new(capacity);
    (w.connections_mut().add(Box::new(server_end)), client)
}

fn send(client: &LocalLoopbackTransport, cmd: &Command) {
    let mut out = Vec::new();
    cmd.write_frame(&mut out).expect("encode");
    client.try_send(out).expect("send");
}

fn recv(client: &LocalLoopbackTransport) -> Vec<ServerMessage> {
    let mut out = Vec::new();
    while let Ok(Some(batch)) = client.try_recv() {
        let body = net_core::batch::decode_batch(&batch).expect("batch");
        for f in net_core::frame::split_frames(&body).expect("frames") {
            out.push(ServerMessage::decode(f).expect("decode"));
        }
    }
    out
}

#[test]
fn ping_is_answered_before_login() {
    let mut w = world(None);
    let (_, client) = connect(&mut w, 64);
    send(&client, &Command::Ping);
    // Walking without a creature is dropped, not fatal.
    send(&client, &Command::Walk(Direction::East));
    let report = w.step();
    assert_eq!(report.ingest.frames, 2);
    assert_eq!(report.ingest.dropped, 1);
    assert_eq!(recv(&client), vec![ServerMessage::Pong]);
    assert_eq!(w.connections().len(), 1);
}

#[test]
fn login_then_walk() {
    let mut w = world(None);
    let (conn, client) = connect(&mut w, 64);
    let me = w.attach_player(conn, "ann").expect("login");
    w.step();
    let msgs = recv(&client);
    assert!(matches!(
        msgs.first(),
        Some(ServerMessage::LoginAck { id, pos, tick_ms: 50 }) if *id == me && *pos == Position::new(4, 3, 7)
    ));

    send(&client, &Command::Walk(Direction::East));
    w.step();
    let msgs = recv(&client);
    assert_eq!(
        msgs,
        vec![ServerMessage::CreatureMove {
            id: me,
            from: Position::new(4, 3, 7),
            to: Position::new(5, 3, 7),
            dir: Direction::East,
        }]
    );
    assert_eq!(
        w.creature(me).and_then(|c| c.position()),
        Some(Position::new(5, 3, 7))
    );
}

#[test]
fn malformed_frame_ends_the_session_and_despawns() {
    let mut w = world(None);
    let (bad, bad_client) = connect(&mut w, 64);
    let (good, good_client) = connect(&mut w, 64);
    let villain = w.attach_player(bad, "mallory").expect("login");
    w.attach_player(good, "bob").expect("login");
    w.step();
    let _ = recv(&good_client);

    let mut junk = Vec::new();
    net_core::frame::write_msg(&mut junk, 0xfe, &[1, 2, 3]).expect("encode");
    bad_client.try_send(junk).expect("send");
    let report = w.step();
    assert_eq!(report.closed, 1);
    assert!(w.connections().get(bad).is_none());
    assert!(w.creature(villain).is_none());

    // The despawn is announced with the next flush.
    w.step();
    assert!(
        recv(&good_client)
            .iter()
            .any(|m| *m == ServerMessage::CreatureDisappear { id: villain })
    );
}

#[test]
fn slow_consumer_is_dropped_alone() {
    let mut w = world(None);
    let (slow, _slow_client) = connect(&mut w, 1);
    let (fast, fast_client) = connect(&mut w, 64);
    w.attach_player(slow, "slow").expect("login");
    w.attach_player(fast, "fast").expect("login");
    w.step();

    // The slow client never reads, so its single-slot queue is still full.
    w.send_to(slow, &ServerMessage::Pong);
    w.send_to(fast, &ServerMessage::Pong);
    let report = w.step();
    assert_eq!(report.flush.dropped, 1);
    assert!(w.connections().get(slow).is_none());
    assert!(w.connections().get(fast).is_some());
    assert!(recv(&fast_client).contains(&ServerMessage::Pong));
}

#[test]
fn logout_closes_after_the_step() {
    let mut w = world(None);
    let (conn, client) = connect(&mut w, 64);
    let me = w.attach_player(conn, "ann").expect("login");
    w.step();
    send(&client, &Command::Logout);
    let report = w.step();
    assert_eq!(report.closed, 1);
    assert!(w.creature(me).is_none());
    assert!(w.connections().is_empty());
}

#[test]
fn close_reason_is_sticky() {
    let mut w = world(None);
    let (conn, _client) = connect(&mut w, 64);
    let c = w.connections_mut().get_mut(conn).expect("conn");
    c.close(CloseReason::SlowConsumer);
    c.close(CloseReason::Logout);
    assert_eq!(c.close_reason(), Some(&CloseReason::SlowConsumer));
}

#[test]
fn large_batches_are_compressed() {
    let mut w = world(Some(64));
    let (conn, client) = connect(&mut w, 64);
    let me = w.attach_player(conn, "ann").expect("login");
    w.step();
    let _ = recv(&client);

    let line = "all work and no play ".repeat(8);
    for _ in 0..4 {
        w.say(me, &line).expect("say");
    }
    let report = w.flush_all();
    assert_eq!(report.compressed, 1);
    let batch = client.try_recv().expect("link").expect("batch");
    assert_eq!(batch[0] & net_core::batch::FLAG_LZ4, net_core::batch::FLAG_LZ4);
    let body = net_core::batch::decode_batch(&batch).expect("inflate");
    let frames = net_core::frame::split_frames(&body).expect("frames");
    assert_eq!(frames.len(), 4);
    for f in frames {
        assert!(matches!(
            ServerMessage::decode(f).expect("decode"),
            ServerMessage::CreatureSay { text, .. } if text == line
        ));
    }
}

#[test]
fn flooding_peer_is_throttled_without_delaying_others() {
    let mut cfg = cfg();
    cfg.net.compress_threshold = None;
    cfg.net.max_frames_per_step = 8;
    let mut w = world_from(cfg);
    let (flood, flood_client) = connect(&mut w, 64);
    let (walker, walker_client) = connect(&mut w, 64);
    let me = w.attach_player(walker, "ann").expect("login");
    w.step();
    let _ = recv(&walker_client);

    let mut pings = Vec::new();
    for _ in 0..40 {
        Command::Ping.write_frame(&mut pings).expect("encode");
    }
    flood_client.try_send(pings).expect("send");
    send(&walker_client, &Command::Walk(Direction::East));

    let report = w.step();
    assert_eq!(report.ingest.throttled, 1);
    assert_eq!(report.ingest.frames, 8 + 1);
    assert_eq!(recv(&flood_client).len(), 8);
    assert_eq!(
        w.creature(me).and_then(|c| c.position()),
        Some(Position::new(5, 3, 7))
    );

    // The backlog drains at the budget, and the flooder stays connected.
    let mut pongs = 8;
    for _ in 0..4 {
        w.step();
        pongs += recv(&flood_client).len();
    }
    assert_eq!(pongs, 40);
    assert!(w.connections().get(flood).is_some());
    assert_eq!(w.step().ingest.throttled, 0);
}

#[test]
fn uncompressed_batch_is_a_zero_flags_byte_then_frames() {
    let mut w = world(None);
    let (_, client) = connect(&mut w, 64);
    send(&client, &Command::Ping);
    w.step();
    let batch = client.try_recv().expect("open").expect("one batch");
    assert_eq!(batch, vec![0x00, server_core::protocol::opcodes::PONG, 0x00, 0x00]);
}
