//! Logical name mapping: virtual registers over the dummy board.

mod common;

use common::board_registry;
use deviceaccess::data_types::DataType;
use deviceaccess::lnm::info::{LNMRegisterInfo, PluginSpec};
use deviceaccess::{AccessMode, DataValidity, Device, DeviceRegistry};

fn logical_registry() -> DeviceRegistry {
    let mut registry = board_registry();
    let table = vec![
        LNMRegisterInfo::register("/App/words", "board", "BOARD.WORD").with_slice(1, 2),
        LNMRegisterInfo::channel("/App/monitor", "board", "MUX.DATA", 1),
        LNMRegisterInfo::bit("/Flags/enable", "board", "BOARD.REG", 5),
        LNMRegisterInfo::constant("/Consts/answer", DataType::Int32, &["42"]),
        LNMRegisterInfo::variable("/scale", DataType::Float64, &["2"]),
        LNMRegisterInfo::register("/App/scaled", "board", "BOARD.TARGET")
            .with_plugin(PluginSpec::new("multiplier").with_parameter("factor", "0.5")),
        LNMRegisterInfo::register("/App/locked", "board", "BOARD.TARGET")
            .with_plugin(PluginSpec::new("forceReadOnly")),
        LNMRegisterInfo::register("/App/computed", "board", "BOARD.TARGET")
            .with_plugin(PluginSpec::new("math").with_parameter("formula", "x * scale")),
    ];
    registry.register_logical_map("app.lmap", table);
    registry.add_alias("app", "logicalNameMap?lmap=app.lmap");
    registry
}

#[test]
fn test_register_target_forwards_with_slice() {
    let registry = logical_registry();
    let app = Device::open_new(&registry, "app").unwrap();
    let board = Device::new(&registry, "board").unwrap();

    let mut words = board.accessor::<i32>("BOARD.WORD").unwrap();
    for i in 0..4 {
        words.set(0, i, 100 + i as i32);
    }
    words.write().unwrap();

    let mut logical = app.accessor::<i32>("/App/words").unwrap();
    assert_eq!(logical.n_samples(), 2);
    logical.read().unwrap();
    assert_eq!(logical.channel(0), &[101, 102]);
    assert_eq!(logical.name().as_str(), "/App/words");

    logical.set(0, 0, -1);
    logical.write().unwrap();
    words.read().unwrap();
    assert_eq!(words.channel(0), &[100, -1, 102, 103]);
}

#[test]
fn test_channel_target_is_read_only_row() {
    let registry = logical_registry();
    let app = Device::open_new(&registry, "app").unwrap();
    let board = Device::new(&registry, "board").unwrap();

    let mut mux = board.accessor::<f64>("MUX.DATA").unwrap();
    for sample in 0..4 {
        mux.set(1, sample, sample as f64 + 0.125);
    }
    mux.write().unwrap();

    let mut monitor = app.accessor::<f64>("/App/monitor").unwrap();
    assert_eq!(monitor.n_channels(), 1);
    monitor.read().unwrap();
    assert_eq!(monitor.channel(0), &[0.125, 1.125, 2.125, 3.125]);
    assert!(monitor.write().unwrap_err().is_logic());
}

#[test]
fn test_bit_target_read_modify_write() {
    let registry = logical_registry();
    let app = Device::open_new(&registry, "app").unwrap();
    let board = Device::new(&registry, "board").unwrap();

    let mut reg = board.accessor::<u32>("BOARD.REG").unwrap();
    reg.set_scalar(0);
    reg.write().unwrap();

    let mut enable = app.scalar_accessor::<bool>("/Flags/enable", AccessMode::empty()).unwrap();
    enable.set_scalar(true);
    enable.write().unwrap();
    reg.read().unwrap();
    assert_eq!(reg.get_scalar(), 0b10_0000);

    // other bits survive the read-modify-write
    reg.set_scalar(0b10_0001);
    reg.write().unwrap();
    enable.set_scalar(false);
    enable.write().unwrap();
    reg.read().unwrap();
    assert_eq!(reg.get_scalar(), 0b00_0001);

    enable.read().unwrap();
    assert!(!enable.get_scalar());
}

#[test]
fn test_constant_reads_and_rejects_writes() {
    let registry = logical_registry();
    let app = Device::open_new(&registry, "app").unwrap();

    let mut answer = app.accessor::<i32>("/Consts/answer").unwrap();
    answer.read().unwrap();
    assert_eq!(answer.get_scalar(), 42);
    assert!(answer.write().unwrap_err().is_logic());

    // other user types convert on the fly
    let mut as_string = app.accessor::<String>("/Consts/answer").unwrap();
    as_string.read().unwrap();
    assert_eq!(as_string.get_scalar(), "42");
}

#[test]
fn test_variable_poll_and_push() {
    let registry = logical_registry();
    let app = Device::open_new(&registry, "app").unwrap();

    let mut push = app
        .register_accessor::<f64>("/scale", 0, 0, AccessMode::WAIT_FOR_NEW_DATA)
        .unwrap();
    push.read().unwrap();
    assert_eq!(push.get_scalar(), 2.0, "initial value from the map");

    let mut writer = app.accessor::<f64>("/scale").unwrap();
    writer.set_scalar(3.5);
    writer.write().unwrap();

    push.read().unwrap();
    assert_eq!(push.get_scalar(), 3.5);
    assert_eq!(push.version_number(), writer.version_number());

    let mut poll = app.accessor::<i32>("/scale").unwrap();
    poll.read().unwrap();
    assert_eq!(poll.get_scalar(), 4, "converted with rounding");

    // read_latest drains the queue and keeps only the newest update
    writer.set_scalar(7.25);
    writer.write().unwrap();
    writer.set_scalar(8.5);
    writer.write().unwrap();
    assert!(push.read_latest().unwrap());
    assert_eq!(push.get_scalar(), 8.5);
    assert!(!push.read_non_blocking().unwrap());

    // a faulty write sticks to everything derived from it
    writer.set_data_validity(DataValidity::Faulty);
    writer.set_scalar(9.0);
    writer.write().unwrap();
    push.read().unwrap();
    assert_eq!(push.data_validity(), DataValidity::Faulty);
}

#[test]
fn test_multiplier_plugin_scales_both_directions() {
    let registry = logical_registry();
    let app = Device::open_new(&registry, "app").unwrap();
    let board = Device::new(&registry, "board").unwrap();

    let mut scaled = app.accessor::<f64>("/App/scaled").unwrap();
    scaled.set_scalar(21.0);
    scaled.write().unwrap();

    // written value is divided by the factor on the way to the target
    let mut target = board.accessor::<i32>("BOARD.TARGET").unwrap();
    target.read().unwrap();
    assert_eq!(target.get_scalar(), 42);

    scaled.read().unwrap();
    assert_eq!(scaled.get_scalar(), 21.0);
}

#[test]
fn test_force_read_only_plugin_blocks_writes() {
    let registry = logical_registry();
    let app = Device::open_new(&registry, "app").unwrap();

    let mut locked = app.accessor::<i32>("/App/locked").unwrap();
    locked.read().unwrap();
    assert!(locked.write().unwrap_err().is_logic());
}

#[test]
fn test_math_plugin_reevaluates_on_variable_write() {
    let registry = logical_registry();
    let app = Device::open_new(&registry, "app").unwrap();
    let board = Device::new(&registry, "board").unwrap();

    let mut computed = app.accessor::<f64>("/App/computed").unwrap();
    computed.set_scalar(5.0);
    computed.write().unwrap();

    let mut target = board.accessor::<i32>("BOARD.TARGET").unwrap();
    target.read().unwrap();
    assert_eq!(target.get_scalar(), 10, "5 * scale(2)");

    // writing the referenced variable re-fires the formula
    let mut scale = app.accessor::<f64>("/scale").unwrap();
    scale.set_scalar(3.0);
    scale.write().unwrap();

    target.read().unwrap();
    assert_eq!(target.get_scalar(), 15, "5 * scale(3)");
}

#[test]
fn test_raw_mode_is_rejected_through_lnm() {
    let registry = logical_registry();
    let app = Device::open_new(&registry, "app").unwrap();
    assert!(app
        .register_accessor::<i32>("/App/words", 0, 0, AccessMode::RAW)
        .unwrap_err()
        .is_logic());
}

#[test]
fn test_lnm_catalogue_lists_virtual_registers() {
    let registry = logical_registry();
    let app = Device::new(&registry, "app").unwrap();
    let catalogue = app.register_catalogue();
    assert!(catalogue.has_register("/Flags/enable"));
    assert!(catalogue.has_register("/Consts/answer"));
    assert!(!catalogue.has_register("BOARD.WORD"));
}
