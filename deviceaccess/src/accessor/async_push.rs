//! User-side push accessor: `read` blocks on the domain's bounded queue.

use super::NDRegisterAccessor;
use crate::access_mode::AccessMode;
use crate::backend::DeviceBackend;
use crate::data_types::UserType;
use crate::error::{Error, Result};
use crate::push::domain::AsyncDomain;
use crate::push::variable::{Payload, PushChannel, QueueItem};
use crate::register_path::RegisterPath;
use crate::transfer::{AccessorCore, TransferElement, TransferType};
use crate::version_number::VersionNumber;
use std::sync::{Arc, Weak};

/// Accessor with `AccessMode::WAIT_FOR_NEW_DATA`.
///
/// The domain owns the producing side; this accessor holds the consuming end
/// of its bounded queue and a weak handle to the domain for unsubscription,
/// so no reference cycle exists between domains and accessors.
pub struct AsyncNDRegisterAccessor<T: UserType> {
    core: AccessorCore,
    backend: Arc<dyn DeviceBackend>,
    domain: Weak<AsyncDomain>,
    channel: Arc<PushChannel<T>>,
    staged: Option<Payload<T>>,
    buffer: Vec<Vec<T>>,
}

impl<T: UserType> AsyncNDRegisterAccessor<T> {
    pub fn new(
        name: RegisterPath,
        backend: Arc<dyn DeviceBackend>,
        domain: &Arc<AsyncDomain>,
        channel: Arc<PushChannel<T>>,
        n_channels: usize,
        n_samples: usize,
        flags: AccessMode,
    ) -> Self {
        AsyncNDRegisterAccessor {
            core: AccessorCore::new(name, flags, true, false),
            backend,
            domain: Arc::downgrade(domain),
            channel,
            staged: None,
            buffer: vec![vec![T::default(); n_samples]; n_channels],
        }
    }

    fn stage(&mut self, item: QueueItem<T>) -> Result<bool> {
        match item {
            QueueItem::Data(payload) => {
                self.staged = Some(payload);
                Ok(true)
            }
            QueueItem::Error(error) => Err(error),
        }
    }
}

impl<T: UserType> TransferElement for AsyncNDRegisterAccessor<T> {
    fn core(&self) -> &AccessorCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut AccessorCore {
        &mut self.core
    }

    fn do_pre_read(&mut self, _transfer_type: TransferType) -> Result<()> {
        if !self.backend.is_open() {
            return Err(Error::device_not_opened());
        }
        Ok(())
    }

    fn do_read_transfer_sync(&mut self) -> Result<()> {
        let item = self.channel.pop_blocking();
        self.stage(item).map(|_| ())
    }

    fn do_read_transfer_nonblocking(&mut self) -> Result<bool> {
        match self.channel.pop() {
            Some(item) => self.stage(item),
            None => Ok(false),
        }
    }

    fn do_read_transfer_latest(&mut self) -> Result<bool> {
        match self.channel.pop_latest() {
            Some(item) => self.stage(item),
            None => Ok(false),
        }
    }

    fn do_post_read(&mut self, _transfer_type: TransferType, has_new_data: bool) -> Result<()> {
        if !has_new_data {
            return Ok(());
        }
        let payload = self
            .staged
            .take()
            .expect("post_read with new data but nothing staged");
        debug_assert!(payload.version > self.core.version);
        self.buffer = payload.data;
        self.core.version = payload.version;
        self.core.validity = payload.validity;
        Ok(())
    }

    fn do_pre_write(&mut self, _transfer_type: TransferType, _version: VersionNumber) -> Result<()> {
        Err(Error::logic(format!(
            "push accessor on register '{}' is not writeable",
            self.core.name
        )))
    }

    fn do_write_transfer(&mut self, _version: VersionNumber) -> Result<bool> {
        unreachable!("pre_write always fails for push accessors")
    }

    fn do_post_write(&mut self, _transfer_type: TransferType, _version: VersionNumber) -> Result<()> {
        Ok(())
    }
}

impl<T: UserType> NDRegisterAccessor<T> for AsyncNDRegisterAccessor<T> {
    fn buffer(&self) -> &Vec<Vec<T>> {
        &self.buffer
    }

    fn buffer_mut(&mut self) -> &mut Vec<Vec<T>> {
        &mut self.buffer
    }

    fn data_lost_in_queue(&self) -> bool {
        self.channel.take_data_lost()
    }
}

impl<T: UserType> Drop for AsyncNDRegisterAccessor<T> {
    fn drop(&mut self) {
        if let Some(domain) = self.domain.upgrade() {
            domain.unsubscribe(self.core.id);
        }
    }
}
