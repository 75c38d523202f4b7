//! Device-level behaviour on the in-memory dummy backend.

mod common;

use common::board_registry;
use deviceaccess::backend::dummy::DummyPort;
use deviceaccess::backend::numeric::NumericAddressedBackend;
use deviceaccess::{
    AccessMode, DataConsistencyGroup, Device, DataValidity, VersionNumber, Void,
};

fn dummy_port(device: &Device) -> &DummyPort {
    device
        .backend()
        .downcast_ref::<NumericAddressedBackend>()
        .expect("dummy devices are numeric addressed")
        .port()
        .downcast_ref::<DummyPort>()
        .expect("the board runs on the dummy port")
}

#[test]
fn test_dummy_writeable_forces_write_access() {
    let registry = board_registry();
    let device = Device::open_new(&registry, "board").unwrap();
    let catalogue = device.register_catalogue();

    assert!(catalogue.has_register("ADC.VOLTAGE/DUMMY_WRITEABLE"));

    // the plain register refuses writes
    let mut direct = device.accessor::<f64>("ADC.VOLTAGE").unwrap();
    assert!(direct.write().unwrap_err().is_logic());

    // raw 42 through the forced-writeable alias
    let mut forced = device
        .register_accessor::<i32>("ADC.VOLTAGE/DUMMY_WRITEABLE", 0, 0, AccessMode::RAW)
        .unwrap();
    forced.set_scalar(42);
    forced.write().unwrap();

    direct.read().unwrap();
    assert_eq!(direct.get_scalar(), 42.0 / 8.0);
}

#[test]
fn test_raw_mode_cooked_element_access() {
    let registry = board_registry();
    let device = Device::open_new(&registry, "board").unwrap();

    let mut raw = device
        .register_accessor::<i32>("ADC.VOLTAGE/DUMMY_WRITEABLE", 0, 0, AccessMode::RAW)
        .unwrap();
    raw.set_as_cooked(0, 0, 3.125f64).unwrap();
    assert_eq!(raw.get_scalar(), 25);
    raw.write().unwrap();

    raw.read().unwrap();
    assert_eq!(raw.get_as_cooked::<f64>(0, 0).unwrap(), 3.125);
    assert_eq!(raw.get_as_cooked::<i16>(0, 0).unwrap(), 3);

    // raw mode requires an int32 accessor
    let err = device
        .register_accessor::<f64>("BOARD.WORD", 0, 0, AccessMode::RAW)
        .unwrap_err();
    assert!(err.is_logic());

    // cooked element access requires raw mode
    let mut cooked = device.accessor::<i32>("BOARD.WORD").unwrap();
    assert!(cooked.get_as_cooked::<f64>(0, 0).unwrap_err().is_logic());
}

#[test]
fn test_accessor_window() {
    let registry = board_registry();
    let device = Device::open_new(&registry, "board").unwrap();

    let mut whole = device.accessor::<i32>("BOARD.WORD").unwrap();
    for i in 0..4 {
        whole.set(0, i, 10 * i as i32);
    }
    whole.write().unwrap();

    let mut window = device
        .register_accessor::<i32>("BOARD.WORD", 2, 1, AccessMode::empty())
        .unwrap();
    window.read().unwrap();
    assert_eq!(window.channel(0), &[10, 20]);

    assert!(device
        .register_accessor::<i32>("BOARD.WORD", 4, 1, AccessMode::empty())
        .unwrap_err()
        .is_logic());
}

#[test]
fn test_multiplexed_register_interleaves_channels() {
    let registry = board_registry();
    let device = Device::open_new(&registry, "board").unwrap();

    let mut mux = device.accessor::<f64>("MUX.DATA").unwrap();
    assert_eq!(mux.n_channels(), 3);
    assert_eq!(mux.n_samples(), 4);
    for sample in 0..4 {
        mux.set(0, sample, sample as f64);
        mux.set(1, sample, sample as f64 + 0.5);
        mux.set(2, sample, sample as f64 * 1.5);
    }
    mux.write().unwrap();

    // channel-interleaved layout: word[sample * n_channels + channel]
    let port = dummy_port(&device);
    assert_eq!(port.peek(0, 0x30 + 4 * (1 * 3)).unwrap(), 1);
    assert_eq!(port.peek(0, 0x30 + 4 * (2 * 3 + 1)).unwrap(), 20); // 2.5 * 8
    assert_eq!(
        port.peek(0, 0x30 + 4 * (3 * 3 + 2)).unwrap(),
        4.5f32.to_bits() as i32
    );

    let mut reader = device.accessor::<f64>("MUX.DATA").unwrap();
    reader.read().unwrap();
    for sample in 0..4 {
        assert_eq!(reader.get(0, sample), sample as f64);
        assert_eq!(reader.get(1, sample), sample as f64 + 0.5);
        assert_eq!(reader.get(2, sample), sample as f64 * 1.5);
    }
}

#[test]
fn test_defensive_copy_and_destructive_write() {
    let registry = board_registry();
    let device = Device::open_new(&registry, "board").unwrap();

    let mut copied = device
        .accessor::<i32>("BOARD.WORD")
        .unwrap()
        .with_defensive_copy();
    copied.set(0, 0, 31);
    copied.write().unwrap();

    let mut plain = device.accessor::<i32>("BOARD.WORD").unwrap();
    plain.read().unwrap();
    assert_eq!(plain.get(0, 0), 31);

    copied.read().unwrap();
    assert_eq!(copied.get(0, 0), 31);

    plain.set(0, 0, 32);
    assert!(!plain.write_destructively().unwrap());
    copied.read().unwrap();
    assert_eq!(copied.get(0, 0), 32);
}

#[test]
fn test_fresh_accessor_state() {
    let registry = board_registry();
    let device = Device::open_new(&registry, "board").unwrap();

    let accessor = device.accessor::<i32>("BOARD.WORD").unwrap();
    assert_eq!(accessor.version_number(), VersionNumber::BEFORE_EVERYTHING);
    assert_eq!(accessor.data_validity(), DataValidity::Ok);
    for sample in 0..accessor.n_samples() {
        assert_eq!(accessor.get(0, sample), 0);
    }
}

#[test]
fn test_version_increases_iff_new_data() {
    let registry = board_registry();
    let device = Device::open_new(&registry, "board").unwrap();

    // poll accessors: every read is new data
    let mut poll = device.accessor::<i32>("BOARD.WORD").unwrap();
    poll.read().unwrap();
    let v1 = poll.version_number();
    assert!(v1 > VersionNumber::BEFORE_EVERYTHING);
    poll.read().unwrap();
    assert!(poll.version_number() > v1);

    // push accessors: an empty queue leaves the version untouched
    let mut push = device
        .register_accessor::<u32>("EVENTS.COUNT", 0, 0, AccessMode::WAIT_FOR_NEW_DATA)
        .unwrap();
    push.read().unwrap(); // initial value
    let v2 = push.version_number();
    assert!(!push.read_non_blocking().unwrap());
    assert_eq!(push.version_number(), v2);
}

#[test]
fn test_dummy_interrupt_triggers_exactly_one_event() {
    let registry = board_registry();
    let device = Device::open_new(&registry, "board").unwrap();
    assert!(device.register_catalogue().has_register("/DUMMY_INTERRUPT_7"));

    let mut subscriber = device
        .register_accessor::<u32>("EVENTS.COUNT", 0, 0, AccessMode::WAIT_FOR_NEW_DATA)
        .unwrap();
    subscriber.read().unwrap();
    let initial_version = subscriber.version_number();

    // put a value behind the register, then fire interrupt 7 once
    dummy_port(&device).poke(0, 0x1C, 123).unwrap();
    let mut trigger = device
        .scalar_accessor::<Void>("/DUMMY_INTERRUPT_7", AccessMode::empty())
        .unwrap();
    assert!(!trigger.write().unwrap());

    subscriber.read().unwrap();
    assert_eq!(subscriber.get_scalar(), 123);
    assert!(subscriber.version_number() > initial_version);

    // exactly one event per trigger
    assert!(!subscriber.read_non_blocking().unwrap());
}

#[test]
fn test_unknown_interrupt_trigger_is_rejected() {
    let registry = board_registry();
    let device = Device::open_new(&registry, "board").unwrap();
    assert!(device
        .scalar_accessor::<Void>("/DUMMY_INTERRUPT_3", AccessMode::empty())
        .unwrap_err()
        .is_logic());
}

#[test]
fn test_consistency_group_aligns_on_one_trigger() {
    let registry = board_registry();
    let device = Device::new(&registry, "board").unwrap();

    // subscribe before opening; activation delivers one consistent snapshot
    let mut count = device
        .register_accessor::<u32>("EVENTS.COUNT", 0, 0, AccessMode::WAIT_FOR_NEW_DATA)
        .unwrap();
    let mut time = device
        .register_accessor::<u32>("EVENTS.TIME", 0, 0, AccessMode::WAIT_FOR_NEW_DATA)
        .unwrap();
    device.open().unwrap();

    let mut group = DataConsistencyGroup::new();
    group.add(&count).unwrap();
    group.add(&time).unwrap();
    assert!(!group.is_consistent());

    count.read().unwrap();
    time.read().unwrap();
    group.update(&count);
    group.update(&time);
    assert!(group.is_consistent(), "initial values share the version");

    let mut trigger = device
        .scalar_accessor::<Void>("/DUMMY_INTERRUPT_7", AccessMode::empty())
        .unwrap();
    trigger.write().unwrap();

    count.read().unwrap();
    group.update(&count);
    assert!(!group.is_consistent(), "only one member saw the trigger");

    time.read().unwrap();
    group.update(&time);
    assert!(group.is_consistent());
    assert_eq!(count.version_number(), time.version_number());
}

#[test]
fn test_poll_accessors_are_rejected_by_consistency_group() {
    let registry = board_registry();
    let device = Device::open_new(&registry, "board").unwrap();
    let poll = device.accessor::<i32>("BOARD.WORD").unwrap();
    let mut group = DataConsistencyGroup::new();
    assert!(group.add(&poll).unwrap_err().is_logic());
}

#[test]
fn test_close_unblocks_waiting_reader() {
    let registry = board_registry();
    let device = Device::open_new(&registry, "board").unwrap();

    let mut subscriber = device
        .register_accessor::<u32>("EVENTS.COUNT", 0, 0, AccessMode::WAIT_FOR_NEW_DATA)
        .unwrap();
    subscriber.read().unwrap(); // initial value

    let device_clone = device.clone();
    let closer = std::thread::spawn(move || {
        std::thread::sleep(std::time::Duration::from_millis(100));
        device_clone.close();
    });

    // blocks until close() drains the domain with an exception
    let err = subscriber.read().unwrap_err();
    assert!(err.is_runtime());
    closer.join().unwrap();
}
