//! Conversion between raw device words and cooked user values.

pub mod fixed_point;
pub mod ieee754;

pub use fixed_point::FixedPointCodec;
pub use ieee754::Ieee754Codec;

use crate::data_types::UserType;
use crate::error::Result;

/// Codec attached to one channel of a numeric-addressed register.
#[derive(Debug, Clone)]
pub enum ChannelCodec {
    FixedPoint(FixedPointCodec),
    Ieee754(Ieee754Codec),
    /// Zero-payload registers; every raw word decodes to the default value.
    Void,
}

impl ChannelCodec {
    pub fn to_cooked<T: UserType>(&self, raw: i32) -> T {
        match self {
            ChannelCodec::FixedPoint(c) => c.to_cooked_as(raw as u32),
            ChannelCodec::Ieee754(c) => c.to_cooked_as(raw as u32),
            ChannelCodec::Void => T::default(),
        }
    }

    pub fn to_raw<T: UserType>(&self, cooked: &T) -> i32 {
        match self {
            ChannelCodec::FixedPoint(c) => c.to_raw_from(cooked) as i32,
            ChannelCodec::Ieee754(c) => c.to_raw_from(cooked) as i32,
            ChannelCodec::Void => 0,
        }
    }

    pub fn to_cooked_f64(&self, raw: i32) -> f64 {
        match self {
            ChannelCodec::FixedPoint(c) => c.to_cooked(raw as u32),
            ChannelCodec::Ieee754(c) => c.to_cooked(raw as u32),
            ChannelCodec::Void => 0.0,
        }
    }

    pub fn to_raw_f64(&self, cooked: f64) -> i32 {
        match self {
            ChannelCodec::FixedPoint(c) => c.to_raw(cooked) as i32,
            ChannelCodec::Ieee754(c) => c.to_raw(cooked) as i32,
            ChannelCodec::Void => 0,
        }
    }
}

/// Builds the codec described by a channel of the register catalogue.
pub fn codec_for_channel(
    encoding: crate::catalogue::numeric::ChannelEncoding,
    width: u32,
    n_fractional_bits: i32,
    signed: bool,
) -> Result<ChannelCodec> {
    use crate::catalogue::numeric::ChannelEncoding;
    Ok(match encoding {
        ChannelEncoding::FixedPoint => {
            ChannelCodec::FixedPoint(FixedPointCodec::new(width, n_fractional_bits, signed)?)
        }
        ChannelEncoding::Ieee754 => ChannelCodec::Ieee754(Ieee754Codec),
        ChannelEncoding::Void => ChannelCodec::Void,
    })
}
