//! Catalogue of numeric-addressed (BAR + byte offset) registers.

use super::{
    unknown_register_error, CatalogueImpl, DataDescriptor, FundamentalType, RegisterInfo,
};
use crate::access_mode::AccessMode;
use crate::data_types::DataType;
use crate::error::{Error, Result};
use crate::register_path::RegisterPath;
use fnv::FnvBuildHasher;
use hashbrown::HashMap;
use tinyvec::TinyVec;

/// Interrupt identifier chain; the first entry is the primary interrupt.
pub type InterruptId = TinyVec<[u32; 4]>;

/// How raw words of one channel are encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelEncoding {
    #[default]
    FixedPoint,
    Ieee754,
    Void,
}

/// Encoding of one channel of a (possibly multiplexed) register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelInfo {
    pub width: u32,
    pub n_fractional_bits: i32,
    pub signed: bool,
    pub encoding: ChannelEncoding,
}

impl ChannelInfo {
    pub fn void() -> Self {
        ChannelInfo {
            width: 0,
            n_fractional_bits: 0,
            signed: false,
            encoding: ChannelEncoding::Void,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterAccess {
    ReadOnly,
    ReadWrite,
    WriteOnly,
    /// Readable, and additionally distributed on a hardware interrupt.
    Interrupt,
}

impl RegisterAccess {
    pub fn is_readable(self) -> bool {
        !matches!(self, RegisterAccess::WriteOnly)
    }

    pub fn is_writeable(self) -> bool {
        matches!(self, RegisterAccess::ReadWrite | RegisterAccess::WriteOnly)
    }
}

/// Descriptor of one flat or multiplexed numeric-addressed register.
#[derive(Debug, Clone, PartialEq)]
pub struct NumericAddressedRegisterInfo {
    pub path: RegisterPath,
    pub n_elements: usize,
    pub address_bytes: u64,
    pub n_bytes: u64,
    pub bar: u64,
    /// One entry for a flat register, one per channel for a multiplexed one.
    pub channels: Vec<ChannelInfo>,
    pub access: RegisterAccess,
    pub element_pitch_bits: u32,
    /// Non-empty exactly for `RegisterAccess::Interrupt` registers.
    pub interrupt_id: InterruptId,
}

impl NumericAddressedRegisterInfo {
    /// Flat register with a single fixed-point channel, pitch one word.
    pub fn flat(
        path: impl Into<RegisterPath>,
        n_elements: usize,
        address_bytes: u64,
        bar: u64,
        channel: ChannelInfo,
        access: RegisterAccess,
    ) -> Self {
        NumericAddressedRegisterInfo {
            path: path.into(),
            n_elements,
            address_bytes,
            n_bytes: n_elements as u64 * 4,
            bar,
            channels: vec![channel],
            access,
            element_pitch_bits: 32,
            interrupt_id: InterruptId::new(),
        }
    }

    pub fn with_interrupt(mut self, chain: &[u32]) -> Self {
        self.access = RegisterAccess::Interrupt;
        self.interrupt_id = chain.iter().copied().collect();
        self
    }

    pub fn is_multiplexed(&self) -> bool {
        self.channels.len() > 1
    }

    /// Checks the structural invariants of the descriptor.
    pub fn validate(&self) -> Result<()> {
        if self.element_pitch_bits % 8 != 0 {
            return Err(Error::logic(format!(
                "register '{}': element pitch of {} bits is not byte aligned",
                self.path, self.element_pitch_bits
            )));
        }
        for channel in &self.channels {
            if channel.encoding != ChannelEncoding::Void
                && !(1..=32).contains(&channel.width)
            {
                return Err(Error::logic(format!(
                    "register '{}': channel width {} is outside 1..=32",
                    self.path, channel.width
                )));
            }
        }
        if self.access == RegisterAccess::Interrupt && self.interrupt_id.is_empty() {
            return Err(Error::logic(format!(
                "register '{}': interrupt register without interrupt id",
                self.path
            )));
        }
        Ok(())
    }
}

impl RegisterInfo for NumericAddressedRegisterInfo {
    fn name(&self) -> &RegisterPath {
        &self.path
    }

    fn n_elements(&self) -> usize {
        self.n_elements
    }

    fn n_channels(&self) -> usize {
        self.channels.len()
    }

    fn data_descriptor(&self) -> DataDescriptor {
        let ch = self.channels[0];
        match ch.encoding {
            ChannelEncoding::Void => DataDescriptor::nodata(),
            ChannelEncoding::Ieee754 => DataDescriptor {
                fundamental_type: FundamentalType::Numeric,
                raw_type: Some(DataType::Int32),
                is_integral: false,
                is_signed: true,
                // decimal digits of a single-precision float
                n_digits: 39,
                n_fractional_digits: 45,
            },
            ChannelEncoding::FixedPoint => {
                let integer_bits = ch.width as i32 - ch.n_fractional_bits;
                // ceil(bits * log10(2)) decimal digits, plus one for the sign
                let n_digits = (integer_bits.max(1) as f64 * 2f64.log10()).ceil() as u32
                    + u32::from(ch.signed);
                let n_fractional_digits = if ch.n_fractional_bits > 0 {
                    (ch.n_fractional_bits as f64 * 2f64.log10()).ceil() as u32
                } else {
                    0
                };
                DataDescriptor {
                    fundamental_type: FundamentalType::Numeric,
                    raw_type: Some(DataType::Int32),
                    is_integral: ch.n_fractional_bits <= 0,
                    is_signed: ch.signed,
                    n_digits,
                    n_fractional_digits,
                }
            }
        }
    }

    fn is_readable(&self) -> bool {
        self.access.is_readable()
    }

    fn is_writeable(&self) -> bool {
        self.access.is_writeable()
    }

    fn supported_access_modes(&self) -> AccessMode {
        let mut modes = AccessMode::RAW;
        if self.access == RegisterAccess::Interrupt {
            modes |= AccessMode::WAIT_FOR_NEW_DATA;
        }
        modes
    }

    fn clone_boxed(&self) -> Box<dyn RegisterInfo> {
        Box::new(self.clone())
    }
}

/// The numeric-addressed register catalogue, one per backend instance.
#[derive(Clone, Default)]
pub struct NumericAddressedRegisterCatalogue {
    registers: HashMap<String, NumericAddressedRegisterInfo, FnvBuildHasher>,
    interrupts: Vec<InterruptId>,
}

impl NumericAddressedRegisterCatalogue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_registers(
        registers: impl IntoIterator<Item = NumericAddressedRegisterInfo>,
    ) -> Result<Self> {
        let mut catalogue = Self::new();
        for info in registers {
            catalogue.add_register(info)?;
        }
        Ok(catalogue)
    }

    pub fn add_register(&mut self, info: NumericAddressedRegisterInfo) -> Result<()> {
        info.validate()?;
        if !info.interrupt_id.is_empty() && !self.interrupts.contains(&info.interrupt_id) {
            self.interrupts.push(info.interrupt_id.clone());
        }
        let key = info.path.as_str().to_owned();
        if self.registers.insert(key, info).is_some() {
            log::warn!("duplicate catalogue entry overwritten");
        }
        Ok(())
    }

    pub fn get(&self, path: &RegisterPath) -> Option<&NumericAddressedRegisterInfo> {
        self.registers.get(path.as_str())
    }

    /// All interrupt id chains known to this catalogue.
    pub fn list_of_interrupts(&self) -> &[InterruptId] {
        &self.interrupts
    }

    pub fn iter(&self) -> impl Iterator<Item = &NumericAddressedRegisterInfo> {
        self.registers.values()
    }

    /// Highest used byte address per BAR, for sizing backend memory.
    pub fn bar_sizes(&self) -> HashMap<u64, u64, FnvBuildHasher> {
        let mut sizes: HashMap<u64, u64, FnvBuildHasher> = HashMap::default();
        for info in self.registers.values() {
            let end = info.address_bytes + info.n_bytes;
            let entry = sizes.entry(info.bar).or_insert(0);
            *entry = (*entry).max(end);
        }
        sizes
    }
}

impl CatalogueImpl for NumericAddressedRegisterCatalogue {
    fn has_register(&self, path: &RegisterPath) -> bool {
        self.registers.contains_key(path.as_str())
    }

    fn get_register(&self, path: &RegisterPath) -> Result<Box<dyn RegisterInfo>> {
        self.registers
            .get(path.as_str())
            .map(|info| info.clone_boxed())
            .ok_or_else(|| unknown_register_error(path))
    }

    fn visible_registers(&self) -> Vec<Box<dyn RegisterInfo>> {
        self.registers.values().map(|i| i.clone_boxed()).collect()
    }

    fn clone_impl(&self) -> Box<dyn CatalogueImpl> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed(width: u32, frac: i32, signed: bool) -> ChannelInfo {
        ChannelInfo {
            width,
            n_fractional_bits: frac,
            signed,
            encoding: ChannelEncoding::FixedPoint,
        }
    }

    #[test]
    fn test_lookup_normalises_separators() {
        let mut cat = NumericAddressedRegisterCatalogue::new();
        cat.add_register(NumericAddressedRegisterInfo::flat(
            "ADC.VOLTAGE",
            4,
            0,
            0,
            fixed(16, 0, true),
            RegisterAccess::ReadOnly,
        ))
        .unwrap();
        assert!(cat.has_register(&RegisterPath::new("/ADC/VOLTAGE")));
        assert!(cat.has_register(&RegisterPath::new("ADC.VOLTAGE")));
        assert!(!cat.has_register(&RegisterPath::new("/ADC")));
    }

    #[test]
    fn test_get_register_fails_logic() {
        let cat = NumericAddressedRegisterCatalogue::new();
        let err = cat.get_register(&RegisterPath::new("/NOPE")).unwrap_err();
        assert!(err.is_logic());
    }

    #[test]
    fn test_invariants_are_checked() {
        let mut info = NumericAddressedRegisterInfo::flat(
            "/X",
            1,
            0,
            0,
            fixed(33, 0, false),
            RegisterAccess::ReadWrite,
        );
        assert!(info.validate().is_err());
        info.channels[0].width = 32;
        info.element_pitch_bits = 12;
        assert!(info.validate().is_err());
        info.element_pitch_bits = 32;
        assert!(info.validate().is_ok());
    }

    #[test]
    fn test_data_descriptor_digits() {
        let info = NumericAddressedRegisterInfo::flat(
            "/X",
            1,
            0,
            0,
            fixed(16, 3, true),
            RegisterAccess::ReadOnly,
        );
        let d = info.data_descriptor();
        assert_eq!(d.fundamental_type, FundamentalType::Numeric);
        assert!(!d.is_integral);
        assert!(d.is_signed);
        assert_eq!(d.raw_type, Some(DataType::Int32));
        // 13 integer bits -> 4 digits, plus sign
        assert_eq!(d.n_digits, 5);
        assert_eq!(d.n_fractional_digits, 1);
    }

    #[test]
    fn test_interrupt_table() {
        let mut cat = NumericAddressedRegisterCatalogue::new();
        cat.add_register(
            NumericAddressedRegisterInfo::flat(
                "/EVENTS/COUNT",
                1,
                0,
                0,
                fixed(32, 0, false),
                RegisterAccess::ReadOnly,
            )
            .with_interrupt(&[7]),
        )
        .unwrap();
        assert_eq!(cat.list_of_interrupts().len(), 1);
        assert_eq!(cat.list_of_interrupts()[0].as_slice(), &[7]);
    }
}
