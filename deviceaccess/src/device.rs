//! The user-facing device handle.

use crate::access_mode::AccessMode;
use crate::accessor::{AccessorConv, RegisterAccessor};
use crate::backend::registry::DeviceRegistry;
use crate::backend::{AccessorRequest, DeviceBackend};
use crate::catalogue::RegisterCatalogue;
use crate::error::Result;
use crate::register_path::RegisterPath;
use std::sync::Arc;

/// A device, resolved from an alias or descriptor through a registry.
///
/// The handle can be cloned cheaply; all clones share one backend instance,
/// so closing and reopening affects every accessor created from any clone.
#[derive(Clone)]
pub struct Device {
    backend: Arc<dyn DeviceBackend>,
}

impl Device {
    /// Resolves `alias_or_descriptor` without opening the device.
    pub fn new(registry: &DeviceRegistry, alias_or_descriptor: &str) -> Result<Self> {
        Ok(Device {
            backend: registry.get_backend(alias_or_descriptor)?,
        })
    }

    /// Resolves and immediately opens.
    pub fn open_new(registry: &DeviceRegistry, alias_or_descriptor: &str) -> Result<Self> {
        let device = Self::new(registry, alias_or_descriptor)?;
        device.open()?;
        Ok(device)
    }

    pub fn open(&self) -> Result<()> {
        self.backend.open()
    }

    pub fn close(&self) {
        self.backend.close();
    }

    pub fn is_open(&self) -> bool {
        self.backend.is_open()
    }

    pub fn is_functional(&self) -> bool {
        self.backend.is_functional()
    }

    pub fn device_info(&self) -> String {
        self.backend.device_info()
    }

    pub fn register_catalogue(&self) -> RegisterCatalogue {
        self.backend.catalogue()
    }

    pub fn backend(&self) -> &Arc<dyn DeviceBackend> {
        &self.backend
    }

    /// Accessor on a register window; `n_elements == 0` means the whole
    /// register.
    pub fn register_accessor<T: AccessorConv>(
        &self,
        path: impl Into<RegisterPath>,
        n_elements: usize,
        element_offset: usize,
        flags: AccessMode,
    ) -> Result<RegisterAccessor<T>> {
        let request = AccessorRequest {
            path: path.into(),
            n_elements,
            element_offset,
            flags,
            data_type: T::DATA_TYPE,
        };
        let any = self.backend.make_accessor(&self.backend, &request)?;
        let imp = T::unwrap_accessor(any)
            .expect("backend returned an accessor of the wrong type");
        Ok(RegisterAccessor::from_impl(imp))
    }

    /// Whole-register accessor without special flags.
    pub fn accessor<T: AccessorConv>(
        &self,
        path: impl Into<RegisterPath>,
    ) -> Result<RegisterAccessor<T>> {
        self.register_accessor(path, 0, 0, AccessMode::empty())
    }

    /// Scalar accessor on the first element.
    pub fn scalar_accessor<T: AccessorConv>(
        &self,
        path: impl Into<RegisterPath>,
        flags: AccessMode,
    ) -> Result<RegisterAccessor<T>> {
        self.register_accessor(path, 1, 0, flags)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalogue::numeric::{
        ChannelEncoding, ChannelInfo, NumericAddressedRegisterCatalogue,
        NumericAddressedRegisterInfo, RegisterAccess,
    };

    fn registry_with_map() -> DeviceRegistry {
        let mut map = NumericAddressedRegisterCatalogue::new();
        map.add_register(NumericAddressedRegisterInfo::flat(
            "/BOARD/WORD",
            2,
            0,
            0,
            ChannelInfo {
                width: 32,
                n_fractional_bits: 0,
                signed: true,
                encoding: ChannelEncoding::FixedPoint,
            },
            RegisterAccess::ReadWrite,
        ))
        .unwrap();
        let mut registry = DeviceRegistry::new();
        registry.register_map("board.map", map);
        registry.add_alias("board", "dummy?map=board.map");
        registry
    }

    #[test]
    fn test_open_write_read_round_trip() {
        let registry = registry_with_map();
        let device = Device::open_new(&registry, "board").unwrap();

        let mut writer = device.accessor::<i32>("/BOARD/WORD").unwrap();
        writer.set(0, 0, -17);
        writer.set(0, 1, 4711);
        writer.write().unwrap();

        let mut reader = device.accessor::<f64>("/BOARD/WORD").unwrap();
        reader.read().unwrap();
        assert_eq!(reader.get(0, 0), -17.0);
        assert_eq!(reader.get(0, 1), 4711.0);
    }

    #[test]
    fn test_closed_device_raises_logic_error() {
        let registry = registry_with_map();
        let device = Device::new(&registry, "board").unwrap();
        let mut accessor = device.accessor::<i32>("/BOARD/WORD").unwrap();
        let err = accessor.read().unwrap_err();
        assert_eq!(err.to_string(), "LogicError: Device is not opened.");
    }

    #[test]
    fn test_same_alias_shares_backend_instance() {
        let registry = registry_with_map();
        let a = Device::open_new(&registry, "board").unwrap();
        let b = Device::new(&registry, "board").unwrap();
        assert!(b.is_open(), "second handle sees the open instance");
        a.close();
        assert!(!b.is_open());
    }

    #[test]
    fn test_unknown_register_is_logic_error() {
        let registry = registry_with_map();
        let device = Device::open_new(&registry, "board").unwrap();
        assert!(device.accessor::<i32>("/NOPE").unwrap_err().is_logic());
    }
}
