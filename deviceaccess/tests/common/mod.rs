//! Shared register-map fixtures for the integration tests.
#![allow(dead_code)]

use deviceaccess::catalogue::numeric::{
    ChannelEncoding, ChannelInfo, NumericAddressedRegisterCatalogue, NumericAddressedRegisterInfo,
    RegisterAccess,
};
use deviceaccess::DeviceRegistry;

pub fn fixed(width: u32, n_fractional_bits: i32, signed: bool) -> ChannelInfo {
    ChannelInfo {
        width,
        n_fractional_bits,
        signed,
        encoding: ChannelEncoding::FixedPoint,
    }
}

pub fn ieee754() -> ChannelInfo {
    ChannelInfo {
        width: 32,
        n_fractional_bits: 0,
        signed: true,
        encoding: ChannelEncoding::Ieee754,
    }
}

/// The board used by most tests:
///
/// | register          | address | layout                          | access     |
/// |-------------------|---------|---------------------------------|------------|
/// | ADC.VOLTAGE       | 0x00    | 16-bit fixed, 3 fractional bits | read-only  |
/// | BOARD.WORD        | 0x04    | 4 x 32-bit signed               | read-write |
/// | BOARD.REG         | 0x14    | 32-bit unsigned                 | read-write |
/// | BOARD.TARGET      | 0x18    | 32-bit signed                   | read-write |
/// | EVENTS.COUNT      | 0x1C    | 32-bit unsigned, interrupt 7    | read-only  |
/// | EVENTS.TIME       | 0x20    | 32-bit unsigned, interrupt 7    | read-only  |
/// | MUX.DATA          | 0x30    | 3 channels x 4 samples          | read-write |
pub fn board_map() -> NumericAddressedRegisterCatalogue {
    let mut map = NumericAddressedRegisterCatalogue::new();
    map.add_register(NumericAddressedRegisterInfo::flat(
        "ADC.VOLTAGE",
        1,
        0x00,
        0,
        fixed(16, 3, true),
        RegisterAccess::ReadOnly,
    ))
    .unwrap();
    map.add_register(NumericAddressedRegisterInfo::flat(
        "BOARD.WORD",
        4,
        0x04,
        0,
        fixed(32, 0, true),
        RegisterAccess::ReadWrite,
    ))
    .unwrap();
    map.add_register(NumericAddressedRegisterInfo::flat(
        "BOARD.REG",
        1,
        0x14,
        0,
        fixed(32, 0, false),
        RegisterAccess::ReadWrite,
    ))
    .unwrap();
    map.add_register(NumericAddressedRegisterInfo::flat(
        "BOARD.TARGET",
        1,
        0x18,
        0,
        fixed(32, 0, true),
        RegisterAccess::ReadWrite,
    ))
    .unwrap();
    map.add_register(
        NumericAddressedRegisterInfo::flat(
            "EVENTS.COUNT",
            1,
            0x1C,
            0,
            fixed(32, 0, false),
            RegisterAccess::ReadOnly,
        )
        .with_interrupt(&[7]),
    )
    .unwrap();
    map.add_register(
        NumericAddressedRegisterInfo::flat(
            "EVENTS.TIME",
            1,
            0x20,
            0,
            fixed(32, 0, false),
            RegisterAccess::ReadOnly,
        )
        .with_interrupt(&[7]),
    )
    .unwrap();
    map.add_register(NumericAddressedRegisterInfo {
        path: "MUX.DATA".into(),
        n_elements: 4,
        address_bytes: 0x30,
        n_bytes: 4 * 3 * 4,
        bar: 0,
        channels: vec![fixed(16, 0, true), fixed(16, 3, true), ieee754()],
        access: RegisterAccess::ReadWrite,
        element_pitch_bits: 96,
        interrupt_id: Default::default(),
    })
    .unwrap();
    map
}

pub fn board_registry() -> DeviceRegistry {
    let mut registry = DeviceRegistry::new();
    registry.register_map("board.map", board_map());
    registry.add_alias("board", "dummy?map=board.map");
    registry
}
