//! Catalogue wrapper adding the dummy-backend naming conventions.
//!
//! Two synthetic families exist on top of the plain numeric catalogue:
//! a `DUMMY_WRITEABLE` suffix forces an otherwise read-only register to
//! read-write (test access), and `DUMMY_INTERRUPT_<n>` is a zero-byte void
//! write-only register whose write triggers primary interrupt `n`.

use super::numeric::{
    ChannelInfo, NumericAddressedRegisterCatalogue, NumericAddressedRegisterInfo, RegisterAccess,
};
use super::{unknown_register_error, CatalogueImpl, RegisterInfo};
use crate::error::Result;
use crate::register_path::RegisterPath;

pub const DUMMY_WRITEABLE_SUFFIX: &str = "DUMMY_WRITEABLE";
pub const DUMMY_INTERRUPT_PREFIX: &str = "/DUMMY_INTERRUPT_";

#[derive(Clone, Default)]
pub struct DummyRegisterCatalogue {
    inner: NumericAddressedRegisterCatalogue,
}

impl DummyRegisterCatalogue {
    pub fn new(inner: NumericAddressedRegisterCatalogue) -> Self {
        DummyRegisterCatalogue { inner }
    }

    pub fn inner(&self) -> &NumericAddressedRegisterCatalogue {
        &self.inner
    }

    /// Returns the primary interrupt number if `path` names a valid
    /// `DUMMY_INTERRUPT_<n>` trigger of this catalogue.
    pub fn extract_controller_interrupt(&self, path: &RegisterPath) -> Option<u32> {
        let digits = path.as_str().strip_prefix(DUMMY_INTERRUPT_PREFIX)?;
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let primary: u32 = digits.parse().ok()?;
        // only interrupts the map actually declares count as triggers
        self.inner
            .list_of_interrupts()
            .iter()
            .any(|chain| chain.first() == Some(&primary))
            .then_some(primary)
    }

    fn writeable_base(&self, path: &RegisterPath) -> Option<&NumericAddressedRegisterInfo> {
        if path.last_segment() != Some(DUMMY_WRITEABLE_SUFFIX) {
            return None;
        }
        self.inner.get(&path.parent())
    }

    fn synthetic_interrupt_info(&self, path: &RegisterPath) -> NumericAddressedRegisterInfo {
        NumericAddressedRegisterInfo {
            path: path.clone(),
            n_elements: 0,
            address_bytes: 0,
            n_bytes: 0,
            bar: 0,
            channels: vec![ChannelInfo::void()],
            access: RegisterAccess::WriteOnly,
            element_pitch_bits: 32,
            interrupt_id: Default::default(),
        }
    }
}

impl CatalogueImpl for DummyRegisterCatalogue {
    fn has_register(&self, path: &RegisterPath) -> bool {
        if self.writeable_base(path).is_some() {
            return true;
        }
        if self.extract_controller_interrupt(path).is_some() {
            return true;
        }
        self.inner.has_register(path)
    }

    fn get_register(&self, path: &RegisterPath) -> Result<Box<dyn RegisterInfo>> {
        if let Some(base) = self.writeable_base(path) {
            let mut info = base.clone();
            info.path = path.clone();
            info.access = RegisterAccess::ReadWrite;
            info.interrupt_id = Default::default();
            return Ok(Box::new(info));
        }
        if self.extract_controller_interrupt(path).is_some() {
            return Ok(Box::new(self.synthetic_interrupt_info(path)));
        }
        self.inner
            .get(path)
            .map(|info| info.clone_boxed())
            .ok_or_else(|| unknown_register_error(path))
    }

    fn visible_registers(&self) -> Vec<Box<dyn RegisterInfo>> {
        self.inner.visible_registers()
    }

    fn hidden_registers(&self) -> Vec<Box<dyn RegisterInfo>> {
        let mut hidden: Vec<Box<dyn RegisterInfo>> = Vec::new();
        for info in self.inner.iter() {
            if !info.is_writeable() {
                let path = &info.path / DUMMY_WRITEABLE_SUFFIX;
                // unwrap cannot fail: the base register exists by construction
                hidden.push(self.get_register(&path).unwrap());
            }
        }
        for chain in self.inner.list_of_interrupts() {
            if let Some(primary) = chain.first() {
                let path = RegisterPath::new(&format!("{DUMMY_INTERRUPT_PREFIX}{primary}"));
                if let Ok(info) = self.get_register(&path) {
                    hidden.push(info);
                }
            }
        }
        hidden
    }

    fn clone_impl(&self) -> Box<dyn CatalogueImpl> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::super::numeric::ChannelEncoding;
    use super::*;

    fn catalogue() -> DummyRegisterCatalogue {
        let mut inner = NumericAddressedRegisterCatalogue::new();
        inner
            .add_register(NumericAddressedRegisterInfo::flat(
                "ADC.VOLTAGE",
                1,
                0,
                0,
                ChannelInfo {
                    width: 16,
                    n_fractional_bits: 0,
                    signed: false,
                    encoding: ChannelEncoding::FixedPoint,
                },
                RegisterAccess::ReadOnly,
            ))
            .unwrap();
        inner
            .add_register(
                NumericAddressedRegisterInfo::flat(
                    "/EVENTS/COUNT",
                    1,
                    4,
                    0,
                    ChannelInfo {
                        width: 32,
                        n_fractional_bits: 0,
                        signed: false,
                        encoding: ChannelEncoding::FixedPoint,
                    },
                    RegisterAccess::ReadOnly,
                )
                .with_interrupt(&[7]),
            )
            .unwrap();
        DummyRegisterCatalogue::new(inner)
    }

    #[test]
    fn test_dummy_writeable_forces_read_write() {
        let cat = catalogue();
        let path = RegisterPath::new("ADC.VOLTAGE/DUMMY_WRITEABLE");
        assert!(cat.has_register(&path));
        let info = cat.get_register(&path).unwrap();
        assert!(info.is_writeable());
        assert!(info.is_readable());
        // the base register is untouched
        let base = cat.get_register(&RegisterPath::new("ADC.VOLTAGE")).unwrap();
        assert!(!base.is_writeable());
    }

    #[test]
    fn test_dummy_interrupt_register() {
        let cat = catalogue();
        assert!(cat.has_register(&RegisterPath::new("/DUMMY_INTERRUPT_7")));
        // interrupt 3 is not in the map's interrupt table
        assert!(!cat.has_register(&RegisterPath::new("/DUMMY_INTERRUPT_3")));
        assert!(!cat.has_register(&RegisterPath::new("/DUMMY_INTERRUPT_")));
        assert!(!cat.has_register(&RegisterPath::new("/DUMMY_INTERRUPT_7x")));

        let info = cat.get_register(&RegisterPath::new("/DUMMY_INTERRUPT_7")).unwrap();
        assert!(info.is_writeable());
        assert!(!info.is_readable());
        assert_eq!(info.n_elements(), 0);
    }

    #[test]
    fn test_hidden_registers_are_disjoint_from_visible() {
        let cat = catalogue();
        let visible: Vec<String> = cat
            .visible_registers()
            .iter()
            .map(|i| i.name().to_string())
            .collect();
        let hidden: Vec<String> = cat
            .hidden_registers()
            .iter()
            .map(|i| i.name().to_string())
            .collect();
        assert!(hidden.contains(&"/ADC/VOLTAGE/DUMMY_WRITEABLE".to_string()));
        assert!(hidden.contains(&"/DUMMY_INTERRUPT_7".to_string()));
        for name in &hidden {
            assert!(!visible.contains(name), "{name} leaked into the visible set");
        }
    }
}
