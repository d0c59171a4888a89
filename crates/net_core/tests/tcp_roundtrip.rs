use std::io::Write;
use std::net::TcpStream;
use std::time::{Duration, Instant};

use net_core::batch::{decode_batch, encode_batch, read_stream_batch};
use net_core::frame::{FrameReader, split_frames, write_msg};
use net_core::tcp::listen;
use net_core::transport::Transport;

fn wait_for<T>(mut f: impl FnMut() -> Option<T>) -> T {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        if let Some(v) = f() {
            return v;
        }
        assert!(Instant::now() < deadline, "timed out");
        std::thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn accepted_socket_hands_bytes_both_ways() {
    let (addr, accepted) = listen("127.0.0.1:0", 8).expect("listen");
    let mut client = TcpStream::connect(addr).expect("connect");
    let server_side = wait_for(|| accepted.try_recv().ok());

    // client -> server: two frames written in one go, reassembled server-side
    let mut wire = Vec::new();
    write_msg(&mut wire, 0x1e, &[]).expect("frame");
    write_msg(&mut wire, 0x96, b"\x02\x00hi").expect("frame");
    client.write_all(&wire).expect("write");

    let mut reader = FrameReader::new(1024);
    let mut frames = Vec::new();
    wait_for(|| {
        while let Ok(Some(chunk)) = server_side.try_recv() {
            reader.push(&chunk);
        }
        while let Some(f) = reader.next_frame().expect("valid frame") {
            frames.push(f);
        }
        (frames.len() == 2).then_some(())
    });
    assert_eq!(frames[0].opcode, 0x1e);
    assert_eq!(frames[1].payload, b"\x02\x00hi");

    // server -> client: one batch per flush
    let mut body = Vec::new();
    write_msg(&mut body, 0x1e, &[]).expect("frame");
    server_side
        .try_send(encode_batch(&body, None))
        .expect("queue batch");
    client
        .set_read_timeout(Some(Duration::from_secs(5)))
        .expect("timeout");
    let got = read_stream_batch(&mut client).expect("read batch");
    let decoded = decode_batch(&got).expect("batch");
    let frames = split_frames(&decoded).expect("frames");
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].opcode, 0x1e);
}

#[test]
fn peer_hangup_surfaces_as_disconnect() {
    let (addr, accepted) = listen("127.0.0.1:0", 8).expect("listen");
    let client = TcpStream::connect(addr).expect("connect");
    let server_side = wait_for(|| accepted.try_recv().ok());
    drop(client);
    wait_for(|| server_side.try_recv().is_err().then_some(()));
}
