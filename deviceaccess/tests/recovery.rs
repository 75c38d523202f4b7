//! Fault handling and write replay across a close/reopen cycle.

mod common;

use common::board_registry;
use deviceaccess::backend::dummy::DummyPort;
use deviceaccess::backend::numeric::NumericAddressedBackend;
use deviceaccess::{AccessMode, Device, VersionNumber};

fn dummy_port(device: &Device) -> &DummyPort {
    device
        .backend()
        .downcast_ref::<NumericAddressedBackend>()
        .unwrap()
        .port()
        .downcast_ref::<DummyPort>()
        .unwrap()
}

#[test]
fn test_runtime_error_faults_the_backend() {
    let registry = board_registry();
    let device = Device::open_new(&registry, "board").unwrap();

    let mut a = device.accessor::<i32>("BOARD.WORD").unwrap();
    let mut b = device.accessor::<i32>("BOARD.REG").unwrap();

    dummy_port(&device).set_throw_on_read(true);
    assert!(a.read().unwrap_err().is_runtime());
    assert!(!device.is_functional());
    assert_eq!(a.data_validity(), deviceaccess::DataValidity::Faulty);

    // other accessors raise immediately, without touching the device
    dummy_port(&device).set_throw_on_read(false);
    assert!(b.read().unwrap_err().is_runtime());

    // a failed read leaves buffer and version untouched
    assert_eq!(a.get_scalar(), 0);
    assert_eq!(a.version_number(), VersionNumber::BEFORE_EVERYTHING);

    // reopening clears the fault
    device.close();
    device.open().unwrap();
    assert!(device.is_functional());
    b.read().unwrap();
}

#[test]
fn test_recovery_replays_last_intended_writes_in_order() {
    let registry = board_registry();
    let device = Device::open_new(&registry, "board").unwrap();

    let mut first = device.accessor::<i32>("BOARD.REG").unwrap();
    let mut second = device.accessor::<i32>("BOARD.REG").unwrap();
    first.set_scalar(111);
    first.write().unwrap();
    second.set_scalar(222);
    second.write().unwrap();

    let mut word = device.accessor::<i32>("BOARD.WORD").unwrap();
    word.set(0, 0, 0x1234);
    word.write().unwrap();

    // break the device and lose the memory content
    dummy_port(&device).set_throw_on_read(true);
    assert!(word.read().unwrap_err().is_runtime());
    device.close();
    dummy_port(&device).set_throw_on_read(false);
    dummy_port(&device).poke(0, 0x14, 0).unwrap();
    dummy_port(&device).poke(0, 0x04, 0).unwrap();

    // reopening replays the staged writes before any user write
    device.open().unwrap();
    assert_eq!(dummy_port(&device).peek(0, 0x04).unwrap(), 0x1234);
    // both writers of BOARD.REG replay in write order, the later one wins
    assert_eq!(dummy_port(&device).peek(0, 0x14).unwrap(), 222);
}

#[test]
fn test_write_during_fault_is_replayed() {
    let registry = board_registry();
    let device = Device::open_new(&registry, "board").unwrap();

    let mut word = device.accessor::<i32>("BOARD.WORD").unwrap();
    dummy_port(&device).set_throw_on_write(true);
    word.set(0, 0, 77);
    assert!(word.write().unwrap_err().is_runtime());

    device.close();
    dummy_port(&device).set_throw_on_write(false);
    device.open().unwrap();

    // the intended value reached the device through recovery
    assert_eq!(dummy_port(&device).peek(0, 0x04).unwrap(), 77);
}

#[test]
fn test_subscriber_gets_fresh_initial_value_after_recovery() {
    let registry = board_registry();
    let device = Device::open_new(&registry, "board").unwrap();

    let mut subscriber = device
        .register_accessor::<u32>("EVENTS.COUNT", 0, 0, AccessMode::WAIT_FOR_NEW_DATA)
        .unwrap();
    subscriber.read().unwrap();
    let old_version = subscriber.version_number();

    // fault the device; the subscriber is notified through its queue
    dummy_port(&device).set_throw_on_read(true);
    let mut poll = device.accessor::<i32>("BOARD.WORD").unwrap();
    assert!(poll.read().unwrap_err().is_runtime());
    assert!(subscriber.read().unwrap_err().is_runtime());

    device.close();
    dummy_port(&device).set_throw_on_read(false);
    dummy_port(&device).poke(0, 0x1C, 99).unwrap();
    device.open().unwrap();

    // drain the shutdown notification(s), then the fresh initial value
    let mut result = subscriber.read();
    while let Err(e) = result {
        assert!(e.is_runtime());
        result = subscriber.read();
    }
    assert_eq!(subscriber.get_scalar(), 99);
    assert!(subscriber.version_number() > old_version);
}
