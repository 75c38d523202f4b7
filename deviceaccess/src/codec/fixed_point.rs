//! Two's-complement fixed-point conversion, up to 32 bits wide.

use crate::data_types::UserType;
use crate::error::{Error, Result};

/// Converts between raw fixed-point words and `f64` cooked values.
///
/// A word uses the lowest `n_bits` bits; if `signed` the top used bit is the
/// sign bit of a two's-complement number. `n_fractional_bits` places the
/// binary point and may be negative or exceed the word width, within the
/// dynamic range of `f64`.
#[derive(Debug, Clone)]
pub struct FixedPointCodec {
    n_bits: u32,
    n_fractional_bits: i32,
    signed: bool,

    /// 2^(-n_fractional_bits); multiplication is cheaper than division.
    fractional_coefficient: f64,
    /// 2^(n_fractional_bits).
    inverse_fractional_coefficient: f64,

    sign_bit_mask: u32,
    used_bits_mask: u32,
    unused_bits_mask: u32,

    min_cooked: f64,
    max_cooked: f64,
}

impl FixedPointCodec {
    pub fn new(n_bits: u32, n_fractional_bits: i32, signed: bool) -> Result<Self> {
        if n_bits == 0 || n_bits > 32 {
            return Err(Error::logic(format!(
                "fixed point codec: number of bits must be in 1..=32, got {n_bits}"
            )));
        }
        if n_fractional_bits > 1023 - n_bits as i32 || n_fractional_bits < -1024 + n_bits as i32 {
            return Err(Error::logic(format!(
                "fixed point codec: {n_fractional_bits} fractional bits exceed the dynamic range of a double"
            )));
        }

        let used_bits_mask = (((1u64) << n_bits) - 1) as u32;
        let fractional_coefficient = (-n_fractional_bits as f64).exp2();
        let inverse_fractional_coefficient = (n_fractional_bits as f64).exp2();

        let (min_raw, max_raw) = if signed {
            (-(1i64 << (n_bits - 1)), (1i64 << (n_bits - 1)) - 1)
        } else {
            (0, (1i64 << n_bits) - 1)
        };

        Ok(FixedPointCodec {
            n_bits,
            n_fractional_bits,
            signed,
            fractional_coefficient,
            inverse_fractional_coefficient,
            sign_bit_mask: 1 << (n_bits - 1),
            used_bits_mask,
            unused_bits_mask: !used_bits_mask,
            min_cooked: min_raw as f64 * fractional_coefficient,
            max_cooked: max_raw as f64 * fractional_coefficient,
        })
    }

    pub fn n_bits(&self) -> u32 {
        self.n_bits
    }

    pub fn n_fractional_bits(&self) -> i32 {
        self.n_fractional_bits
    }

    pub fn is_signed(&self) -> bool {
        self.signed
    }

    /// Smallest representable cooked value.
    pub fn min_cooked(&self) -> f64 {
        self.min_cooked
    }

    /// Largest representable cooked value.
    pub fn max_cooked(&self) -> f64 {
        self.max_cooked
    }

    /// Decodes a raw word. Bits above `n_bits` are ignored.
    pub fn to_cooked(&self, raw: u32) -> f64 {
        let raw = raw & self.used_bits_mask;
        let unscaled = if self.signed && (raw & self.sign_bit_mask) != 0 {
            // negative: fill the unused leading bits with ones and reinterpret
            (raw | self.unused_bits_mask) as i32 as f64
        } else {
            raw as f64
        };
        unscaled * self.fractional_coefficient
    }

    /// Encodes a cooked value, saturating to the representable range and
    /// rounding half to even. NaN encodes as zero.
    pub fn to_raw(&self, cooked: f64) -> u32 {
        if cooked.is_nan() {
            return 0;
        }
        let clipped = cooked.clamp(self.min_cooked, self.max_cooked);
        let scaled = (clipped * self.inverse_fractional_coefficient).round_ties_even();
        (scaled as i64 as u32) & self.used_bits_mask
    }

    pub fn to_cooked_as<T: UserType>(&self, raw: u32) -> T {
        T::from_f64(self.to_cooked(raw))
    }

    pub fn to_raw_from<T: UserType>(&self, cooked: &T) -> u32 {
        self.to_raw(cooked.to_f64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signed_16_bit_3_fractional() {
        let codec = FixedPointCodec::new(16, 3, true).unwrap();
        assert_eq!(codec.to_cooked(0x0019), 3.125);
        assert_eq!(codec.to_raw(-1.0), 0xFFF8);
        assert_eq!(codec.to_cooked(0x8000), -4096.0);
    }

    #[test]
    fn test_leading_bits_are_ignored() {
        let codec = FixedPointCodec::new(6, 0, true).unwrap();
        // in signed 6 bit, 0x3F is -1, whatever sits above the used bits
        assert_eq!(codec.to_cooked(0x3F), -1.0);
        assert_eq!(codec.to_cooked(0xFFFF_FF3F), -1.0);
        assert_eq!(codec.to_cooked(0x1F), 31.0);
    }

    #[test]
    fn test_full_width_unsigned() {
        let codec = FixedPointCodec::new(32, 0, false).unwrap();
        assert_eq!(codec.to_cooked(0xFFFF_FFFF), u32::MAX as f64);
        assert_eq!(codec.to_raw(u32::MAX as f64), u32::MAX);
        assert_eq!(codec.to_raw(-1.0), 0);
    }

    #[test]
    fn test_saturation() {
        let codec = FixedPointCodec::new(8, 0, true).unwrap();
        assert_eq!(codec.to_raw(1000.0), 0x7F);
        assert_eq!(codec.to_raw(-1000.0), 0x80);
        assert_eq!(codec.min_cooked(), -128.0);
        assert_eq!(codec.max_cooked(), 127.0);
    }

    #[test]
    fn test_rounding_half_to_even() {
        let codec = FixedPointCodec::new(16, 0, true).unwrap();
        assert_eq!(codec.to_raw(2.5), 2);
        assert_eq!(codec.to_raw(3.5), 4);
        assert_eq!(codec.to_raw(-0.5), 0);
    }

    #[test]
    fn test_negative_fractional_bits() {
        let codec = FixedPointCodec::new(8, -2, false).unwrap();
        // resolution is 4, range is [0, 255*4]
        assert_eq!(codec.to_cooked(1), 4.0);
        assert_eq!(codec.to_raw(8.0), 2);
        assert_eq!(codec.max_cooked(), 1020.0);
    }

    #[test]
    fn test_invalid_parameters() {
        assert!(FixedPointCodec::new(0, 0, false).is_err());
        assert!(FixedPointCodec::new(33, 0, false).is_err());
        assert!(FixedPointCodec::new(16, 1020, true).is_err());
        assert!(FixedPointCodec::new(16, -1020, true).is_err());
        assert!(FixedPointCodec::new(16, 1007, true).is_ok());
    }

    #[test]
    fn test_round_trip_is_projection() {
        // to_cooked(to_raw(x)) must equal x rounded to the codec resolution
        // and clipped to the range, and to_raw must be monotonic
        let codec = FixedPointCodec::new(12, 4, true).unwrap();
        let mut last_raw_as_cooked = f64::NEG_INFINITY;
        let mut x = -200.0;
        while x < 200.0 {
            let raw = codec.to_raw(x);
            let cooked = codec.to_cooked(raw);
            let expected = (x * 16.0).round_ties_even().clamp(-2048.0, 2047.0) / 16.0;
            assert_eq!(cooked, expected, "x = {x}");
            assert!(cooked >= last_raw_as_cooked, "monotonicity at x = {x}");
            last_raw_as_cooked = cooked;
            x += 0.0625 * 0.5;
        }
    }

    #[test]
    fn test_nan_encodes_as_zero() {
        let codec = FixedPointCodec::new(16, 3, true).unwrap();
        assert_eq!(codec.to_raw(f64::NAN), 0);
    }

    #[test]
    fn test_user_type_composition() {
        let codec = FixedPointCodec::new(16, 3, true).unwrap();
        assert_eq!(codec.to_cooked_as::<i32>(0x0019), 3);
        assert_eq!(codec.to_cooked_as::<String>(0x0019), "3.125");
        assert_eq!(codec.to_raw_from(&-1i16), 0xFFF8);
        // u8 saturates before the codec sees the value
        assert_eq!(codec.to_raw_from(&255u8), 255 << 3);
    }
}
