//! Shared dummy: BAR memory and interrupts shared between device instances.

mod common;

use common::board_map;
use deviceaccess::backend::numeric::NumericAddressedBackend;
use deviceaccess::backend::shared_dummy::SharedDummyPort;
use deviceaccess::{AccessMode, Device, DeviceRegistry, Void};

/// The segment namespace is process-global, so every test works on its own
/// instance id.
fn shared_registry(instance: &str) -> DeviceRegistry {
    let mut registry = DeviceRegistry::new();
    registry.register_map("board.map", board_map());
    // two distinct descriptor spellings resolve to two backend instances
    // that share one segment
    registry.add_alias("left", &format!("sharedDummy:{instance}?map=board.map"));
    registry.add_alias("right", &format!("(sharedDummy:{instance}?map=board.map)"));
    registry.add_alias("other", &format!("sharedDummy:{instance}-other?map=board.map"));
    registry
}

fn segment_port(device: &Device) -> &SharedDummyPort {
    device
        .backend()
        .downcast_ref::<NumericAddressedBackend>()
        .unwrap()
        .port()
        .downcast_ref::<SharedDummyPort>()
        .unwrap()
}

#[test]
fn test_same_instance_shares_memory() {
    let registry = shared_registry("memory");
    let left = Device::open_new(&registry, "left").unwrap();
    let right = Device::open_new(&registry, "right").unwrap();
    let other = Device::open_new(&registry, "other").unwrap();

    assert!(!std::ptr::eq(
        left.backend().as_ref(),
        right.backend().as_ref()
    ));

    let mut writer = left.accessor::<i32>("BOARD.WORD").unwrap();
    writer.set(0, 0, 0x5AFE);
    writer.write().unwrap();

    let mut reader = right.accessor::<i32>("BOARD.WORD").unwrap();
    reader.read().unwrap();
    assert_eq!(reader.get(0, 0), 0x5AFE);

    // a different instance id means a different segment
    let mut unrelated = other.accessor::<i32>("BOARD.WORD").unwrap();
    unrelated.read().unwrap();
    assert_eq!(unrelated.get(0, 0), 0);
}

#[test]
fn test_segment_naming_and_membership() {
    let registry = shared_registry("membership");
    let left = Device::open_new(&registry, "left").unwrap();
    let right = Device::open_new(&registry, "right").unwrap();

    let segment = segment_port(&left).segment().clone();
    assert!(segment.name().starts_with("ChimeraTK_SharedDummy_"));
    assert_eq!(segment.n_members(), 2);

    left.close();
    assert_eq!(segment.n_members(), 1);
    right.close();
    assert_eq!(segment.n_members(), 0);
}

#[test]
fn test_last_member_removes_the_segment() {
    let registry = shared_registry("cleanup");
    {
        let device = Device::open_new(&registry, "left").unwrap();
        let mut writer = device.accessor::<i32>("BOARD.REG").unwrap();
        writer.set_scalar(7);
        writer.write().unwrap();
        device.close();
    }
    // the segment was removed with its last member; a fresh open starts blank
    let device = Device::open_new(&registry, "right").unwrap();
    let mut reader = device.accessor::<i32>("BOARD.REG").unwrap();
    reader.read().unwrap();
    assert_eq!(reader.get_scalar(), 0);
}

#[test]
fn test_interrupts_cross_device_instances() {
    let registry = shared_registry("interrupts");
    let left = Device::open_new(&registry, "left").unwrap();
    let right = Device::open_new(&registry, "right").unwrap();

    let mut subscriber = left
        .register_accessor::<u32>("EVENTS.COUNT", 0, 0, AccessMode::WAIT_FOR_NEW_DATA)
        .unwrap();
    subscriber.read().unwrap();
    let initial_version = subscriber.version_number();

    // triggering through the other device instance wakes the subscriber
    let mut trigger = right
        .scalar_accessor::<Void>("/DUMMY_INTERRUPT_7", AccessMode::empty())
        .unwrap();
    trigger.write().unwrap();

    subscriber.read().unwrap();
    assert!(subscriber.version_number() > initial_version);
}
