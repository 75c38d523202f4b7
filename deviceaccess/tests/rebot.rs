//! Rebot backend against the dummy server, and the server's wire behaviour.

mod common;

use common::fixed;
use deviceaccess::catalogue::numeric::{
    NumericAddressedRegisterCatalogue, NumericAddressedRegisterInfo, RegisterAccess,
};
use deviceaccess::{Device, DeviceRegistry};
use rebot_dummy::{
    recv_words, send_words, RebotDummyServer, MULTI_WORD_READ, TOO_MUCH_DATA_REQUESTED,
};
use std::net::TcpStream;
use std::time::Duration;

fn rebot_map() -> NumericAddressedRegisterCatalogue {
    let mut map = NumericAddressedRegisterCatalogue::new();
    map.add_register(NumericAddressedRegisterInfo::flat(
        "BIG.ARRAY",
        1000,
        0,
        0,
        fixed(32, 0, true),
        RegisterAccess::ReadWrite,
    ))
    .unwrap();
    map.add_register(NumericAddressedRegisterInfo::flat(
        "BOARD.WORD",
        1,
        4000,
        0,
        fixed(32, 0, true),
        RegisterAccess::ReadWrite,
    ))
    .unwrap();
    map
}

fn rebot_registry(port: u16) -> DeviceRegistry {
    let mut registry = DeviceRegistry::new();
    registry.register_map("remote.map", rebot_map());
    registry.add_alias(
        "remote",
        &format!("rebot?ip=127.0.0.1&port={port}&map=remote.map"),
    );
    registry
}

#[test]
fn test_server_framing() {
    let server = RebotDummyServer::start(2048, 1).unwrap();
    for i in 0..4 {
        server.poke(0x100 + i, 1000 + i as i32);
    }

    let mut socket = TcpStream::connect(("127.0.0.1", server.port())).unwrap();
    socket
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();

    // a valid read returns exactly the requested words
    send_words(&mut socket, &[MULTI_WORD_READ, 0x100, 4]).unwrap();
    let words = recv_words(&mut socket, 4).unwrap();
    assert_eq!(words, vec![1000, 1001, 1002, 1003]);

    // an oversized read is refused with a single status word...
    send_words(&mut socket, &[MULTI_WORD_READ, 0x100, 1_000_000]).unwrap();
    let reply = recv_words(&mut socket, 1).unwrap();
    assert_eq!(reply, vec![TOO_MUCH_DATA_REQUESTED]);

    // ...and the connection stays usable
    send_words(&mut socket, &[MULTI_WORD_READ, 0x100, 2]).unwrap();
    let words = recv_words(&mut socket, 2).unwrap();
    assert_eq!(words, vec![1000, 1001]);
}

#[test]
fn test_client_round_trip_protocol_1() {
    let server = RebotDummyServer::start(2048, 1).unwrap();
    let registry = rebot_registry(server.port());
    let device = Device::open_new(&registry, "remote").unwrap();

    let mut word = device.accessor::<i32>("BOARD.WORD").unwrap();
    word.set_scalar(-4711);
    word.write().unwrap();
    assert_eq!(server.peek(1000), -4711);

    server.poke(1000, 12345);
    word.read().unwrap();
    assert_eq!(word.get_scalar(), 12345);

    device.close();
}

#[test]
fn test_client_chunks_large_reads_on_protocol_0() {
    let server = RebotDummyServer::start(2048, 0).unwrap();
    let registry = rebot_registry(server.port());
    let device = Device::open_new(&registry, "remote").unwrap();

    for i in 0..1000 {
        server.poke(i, i as i32 * 3);
    }

    // 1000 words exceed the 361-word protocol-0 limit; the client chunks
    let mut array = device.accessor::<i32>("BIG.ARRAY").unwrap();
    array.read().unwrap();
    for i in 0..1000 {
        assert_eq!(array.get(0, i), i as i32 * 3);
    }

    // writes fall back to single-word frames on protocol 0
    let mut word = device.accessor::<i32>("BOARD.WORD").unwrap();
    word.set_scalar(999);
    word.write().unwrap();
    assert_eq!(server.peek(1000), 999);

    device.close();
}

#[test]
fn test_unreachable_server_is_runtime_error() {
    let registry = rebot_registry(1);
    let device = Device::new(&registry, "remote").unwrap();
    let err = device.open().unwrap_err();
    assert!(err.is_runtime());
}
