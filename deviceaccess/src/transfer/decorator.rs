//! Generic accessor decorators.

use crate::accessor::{CookedAccess, NDRegisterAccessor};
use crate::data_types::UserType;
use crate::error::Result;
use crate::transfer::{AccessorCore, TransferElement, TransferType};
use crate::version_number::VersionNumber;

/// Keeps a defensive copy of the target's buffer, so the wrapped accessor
/// can be shared without exposing its buffer to concurrent mutation.
pub struct CopyRegisterDecorator<T: UserType> {
    target: Box<dyn NDRegisterAccessor<T>>,
    buffer: Vec<Vec<T>>,
}

impl<T: UserType> CopyRegisterDecorator<T> {
    pub fn new(target: Box<dyn NDRegisterAccessor<T>>) -> Self {
        let buffer = target.buffer().clone();
        CopyRegisterDecorator { target, buffer }
    }
}

impl<T: UserType> TransferElement for CopyRegisterDecorator<T> {
    fn core(&self) -> &AccessorCore {
        self.target.core()
    }

    fn core_mut(&mut self) -> &mut AccessorCore {
        self.target.core_mut()
    }

    fn do_pre_read(&mut self, transfer_type: TransferType) -> Result<()> {
        self.target.do_pre_read(transfer_type)
    }

    fn do_read_transfer_sync(&mut self) -> Result<()> {
        self.target.do_read_transfer_sync()
    }

    fn do_read_transfer_nonblocking(&mut self) -> Result<bool> {
        self.target.do_read_transfer_nonblocking()
    }

    fn do_read_transfer_latest(&mut self) -> Result<bool> {
        self.target.do_read_transfer_latest()
    }

    fn do_post_read(&mut self, transfer_type: TransferType, has_new_data: bool) -> Result<()> {
        self.target.do_post_read(transfer_type, has_new_data)?;
        if has_new_data {
            self.buffer.clone_from(self.target.buffer());
        }
        Ok(())
    }

    fn do_pre_write(&mut self, transfer_type: TransferType, version: VersionNumber) -> Result<()> {
        self.target.buffer_mut().clone_from(&self.buffer);
        self.target.do_pre_write(transfer_type, version)
    }

    fn do_write_transfer(&mut self, version: VersionNumber) -> Result<bool> {
        self.target.do_write_transfer(version)
    }

    fn do_post_write(&mut self, transfer_type: TransferType, version: VersionNumber) -> Result<()> {
        self.target.do_post_write(transfer_type, version)
    }
}

impl<T: UserType> NDRegisterAccessor<T> for CopyRegisterDecorator<T> {
    fn buffer(&self) -> &Vec<Vec<T>> {
        &self.buffer
    }

    fn buffer_mut(&mut self) -> &mut Vec<Vec<T>> {
        &mut self.buffer
    }

    fn cooked_access(&mut self) -> Option<&mut dyn CookedAccess> {
        self.target.cooked_access()
    }

    fn data_lost_in_queue(&self) -> bool {
        self.target.data_lost_in_queue()
    }
}
