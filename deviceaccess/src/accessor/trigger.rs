//! Write accessor behind a `DUMMY_INTERRUPT_<n>` register: writing triggers
//! the primary interrupt instead of touching device memory.

use super::NDRegisterAccessor;
use crate::access_mode::AccessMode;
use crate::backend::numeric::NumericAddressedBackend;
use crate::backend::DeviceBackend;
use crate::data_types::UserType;
use crate::error::{Error, Result};
use crate::register_path::RegisterPath;
use crate::transfer::{AccessorCore, TransferElement, TransferType};
use crate::version_number::VersionNumber;
use std::sync::Arc;

pub struct DummyInterruptTriggerAccessor<T: UserType> {
    core: AccessorCore,
    backend: Arc<NumericAddressedBackend>,
    interrupt: u32,
    buffer: Vec<Vec<T>>,
}

impl<T: UserType> DummyInterruptTriggerAccessor<T> {
    pub fn new(
        backend: Arc<NumericAddressedBackend>,
        path: RegisterPath,
        interrupt: u32,
        n_elements: usize,
        element_offset: usize,
        flags: AccessMode,
    ) -> Result<Self> {
        if n_elements > 1 {
            return Err(Error::logic(
                "a DUMMY_INTERRUPT register can have at most one element",
            ));
        }
        if element_offset != 0 {
            return Err(Error::logic(
                "a DUMMY_INTERRUPT register cannot have an element offset",
            ));
        }
        flags.check_for_unknown_flags(AccessMode::empty())?;

        Ok(DummyInterruptTriggerAccessor {
            core: AccessorCore::new(path, flags, true, true),
            backend,
            interrupt,
            buffer: vec![vec![T::from_f64(1.0)]],
        })
    }

    fn check_device_usable(&self) -> Result<()> {
        if !self.backend.is_open() {
            return Err(Error::device_not_opened());
        }
        self.backend.state().check_active_exception()
    }
}

impl<T: UserType> TransferElement for DummyInterruptTriggerAccessor<T> {
    fn core(&self) -> &AccessorCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut AccessorCore {
        &mut self.core
    }

    fn do_pre_read(&mut self, _transfer_type: TransferType) -> Result<()> {
        self.check_device_usable()
    }

    fn do_read_transfer_sync(&mut self) -> Result<()> {
        Ok(())
    }

    fn do_read_transfer_nonblocking(&mut self) -> Result<bool> {
        Ok(true)
    }

    fn do_post_read(&mut self, _transfer_type: TransferType, has_new_data: bool) -> Result<()> {
        if has_new_data {
            // the register always reads back as one
            self.buffer[0][0] = T::from_f64(1.0);
            self.core.version = VersionNumber::new();
        }
        Ok(())
    }

    fn do_pre_write(&mut self, _transfer_type: TransferType, _version: VersionNumber) -> Result<()> {
        self.check_device_usable()
    }

    fn do_write_transfer(&mut self, _version: VersionNumber) -> Result<bool> {
        self.backend.trigger_interrupt(self.interrupt)?;
        Ok(false)
    }

    fn do_post_write(&mut self, _transfer_type: TransferType, version: VersionNumber) -> Result<()> {
        self.core.version = version;
        Ok(())
    }
}

impl<T: UserType> NDRegisterAccessor<T> for DummyInterruptTriggerAccessor<T> {
    fn buffer(&self) -> &Vec<Vec<T>> {
        &self.buffer
    }

    fn buffer_mut(&mut self) -> &mut Vec<Vec<T>> {
        &mut self.buffer
    }
}
