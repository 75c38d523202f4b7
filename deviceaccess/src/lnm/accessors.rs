//! Accessor implementations for the five virtual target kinds.

use super::variable::{AnyVec, AnyVecConv, LNMVariable};
use super::LogicalNameMappingBackend;
use crate::access_mode::AccessMode;
use crate::accessor::NDRegisterAccessor;
use crate::data_types::{DataValidity, UserType};
use crate::error::{Error, Result};
use crate::push::variable::{PushChannel, QueueItem};
use crate::register_path::RegisterPath;
use crate::transfer::{AccessorCore, TransferElement, TransferType};
use crate::version_number::VersionNumber;
use std::sync::{Arc, Mutex, Weak};

/// REGISTER target: thin forwarder onto the target backend's accessor,
/// renamed to the logical path.
pub struct ForwardingAccessor<T: UserType> {
    core: AccessorCore,
    target: Box<dyn NDRegisterAccessor<T>>,
}

impl<T: UserType> ForwardingAccessor<T> {
    pub fn new(logical_path: RegisterPath, target: Box<dyn NDRegisterAccessor<T>>) -> Self {
        let core = AccessorCore::new(
            logical_path,
            target.access_mode_flags(),
            target.is_readable(),
            target.is_writeable(),
        );
        ForwardingAccessor { core, target }
    }

    fn sync_metadata(&mut self) {
        self.core.version = self.target.version_number();
        self.core.validity = self.target.data_validity();
    }
}

impl<T: UserType> TransferElement for ForwardingAccessor<T> {
    fn core(&self) -> &AccessorCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut AccessorCore {
        &mut self.core
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
        self.sync_metadata();
        Ok(())
    }

    fn do_pre_write(&mut self, transfer_type: TransferType, version: VersionNumber) -> Result<()> {
        self.target.do_pre_write(transfer_type, version)
    }

    fn do_write_transfer(&mut self, version: VersionNumber) -> Result<bool> {
        self.target.do_write_transfer(version)
    }

    fn do_post_write(&mut self, transfer_type: TransferType, version: VersionNumber) -> Result<()> {
        self.target.do_post_write(transfer_type, version)?;
        self.sync_metadata();
        Ok(())
    }
}

impl<T: UserType> NDRegisterAccessor<T> for ForwardingAccessor<T> {
    fn buffer(&self) -> &Vec<Vec<T>> {
        self.target.buffer()
    }

    fn buffer_mut(&mut self) -> &mut Vec<Vec<T>> {
        self.target.buffer_mut()
    }

    fn data_lost_in_queue(&self) -> bool {
        self.target.data_lost_in_queue()
    }
}

/// CHANNEL target: one row of a 2-D target register, exposed as 1-D and
/// read-only.
pub struct ChannelAccessor<T: UserType> {
    core: AccessorCore,
    target: Box<dyn NDRegisterAccessor<T>>,
    channel: usize,
    buffer: Vec<Vec<T>>,
}

impl<T: UserType> ChannelAccessor<T> {
    pub fn new(
        logical_path: RegisterPath,
        target: Box<dyn NDRegisterAccessor<T>>,
        channel: usize,
    ) -> Result<Self> {
        if channel >= target.n_channels() {
            return Err(Error::logic(format!(
                "channel {channel} is outside the target register with {} channels",
                target.n_channels()
            )));
        }
        let n_samples = target.n_samples();
        Ok(ChannelAccessor {
            core: AccessorCore::new(logical_path, AccessMode::empty(), true, false),
            target,
            channel,
            buffer: vec![vec![T::default(); n_samples]],
        })
    }
}

impl<T: UserType> TransferElement for ChannelAccessor<T> {
    fn core(&self) -> &AccessorCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut AccessorCore {
        &mut self.core
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

    fn do_post_read(&mut self, transfer_type: TransferType, has_new_data: bool) -> Result<()> {
        self.target.do_post_read(transfer_type, has_new_data)?;
        if has_new_data {
            self.buffer[0].clone_from_slice(&self.target.buffer()[self.channel]);
            self.core.version = self.target.version_number();
            self.core.validity = self.target.data_validity();
        }
        Ok(())
    }

    fn do_pre_write(&mut self, _transfer_type: TransferType, _version: VersionNumber) -> Result<()> {
        Err(Error::logic("a CHANNEL register is not writeable"))
    }

    fn do_write_transfer(&mut self, _version: VersionNumber) -> Result<bool> {
        unreachable!("pre_write always fails for channel accessors")
    }

    fn do_post_write(&mut self, _transfer_type: TransferType, _version: VersionNumber) -> Result<()> {
        Ok(())
    }
}

impl<T: UserType> NDRegisterAccessor<T> for ChannelAccessor<T> {
    fn buffer(&self) -> &Vec<Vec<T>> {
        &self.buffer
    }

    fn buffer_mut(&mut self) -> &mut Vec<Vec<T>> {
        &mut self.buffer
    }
}

/// BIT target: a single bit of a scalar integer register; writes are
/// read-modify-write under the backend's per-register lock.
pub struct BitAccessor<T: UserType> {
    core: AccessorCore,
    target: Box<dyn NDRegisterAccessor<i64>>,
    bit: u32,
    lock: Arc<Mutex<()>>,
    buffer: Vec<Vec<T>>,
}

impl<T: UserType> BitAccessor<T> {
    pub fn new(
        logical_path: RegisterPath,
        target: Box<dyn NDRegisterAccessor<i64>>,
        bit: u32,
        lock: Arc<Mutex<()>>,
    ) -> Result<Self> {
        if target.n_channels() != 1 || target.n_samples() != 1 {
            return Err(Error::logic(
                "a BIT register must target a scalar 1-D register",
            ));
        }
        if bit > 62 {
            return Err(Error::logic(format!("bit index {bit} is out of range")));
        }
        let writeable = target.is_writeable();
        Ok(BitAccessor {
            core: AccessorCore::new(logical_path, AccessMode::empty(), true, writeable),
            target,
            bit,
            lock,
            buffer: vec![vec![T::default()]],
        })
    }
}

impl<T: UserType> TransferElement for BitAccessor<T> {
    fn core(&self) -> &AccessorCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut AccessorCore {
        &mut self.core
    }

    fn do_pre_read(&mut self, _transfer_type: TransferType) -> Result<()> {
        Ok(())
    }

    fn do_read_transfer_sync(&mut self) -> Result<()> {
        self.target.read()
    }

    fn do_read_transfer_nonblocking(&mut self) -> Result<bool> {
        self.target.read_non_blocking()
    }

    fn do_post_read(&mut self, _transfer_type: TransferType, has_new_data: bool) -> Result<()> {
        if has_new_data {
            let word = self.target.buffer()[0][0];
            let bit_value = (word >> self.bit) & 1;
            self.buffer[0][0] = T::from_f64(bit_value as f64);
            self.core.version = VersionNumber::new();
            self.core.validity = self.target.data_validity();
        }
        Ok(())
    }

    fn do_pre_write(&mut self, _transfer_type: TransferType, _version: VersionNumber) -> Result<()> {
        Ok(())
    }

    fn do_write_transfer(&mut self, _version: VersionNumber) -> Result<bool> {
        let set = self.buffer[0][0].to_f64() != 0.0;
        let _guard = self.lock.lock().unwrap();
        self.target.read()?;
        let word = self.target.buffer()[0][0];
        let modified = if set {
            word | (1i64 << self.bit)
        } else {
            word & !(1i64 << self.bit)
        };
        self.target.buffer_mut()[0][0] = modified;
        self.target.write()
    }

    fn do_post_write(&mut self, _transfer_type: TransferType, version: VersionNumber) -> Result<()> {
        self.core.version = version;
        Ok(())
    }
}

impl<T: UserType> NDRegisterAccessor<T> for BitAccessor<T> {
    fn buffer(&self) -> &Vec<Vec<T>> {
        &self.buffer
    }

    fn buffer_mut(&mut self) -> &mut Vec<Vec<T>> {
        &mut self.buffer
    }
}

/// CONSTANT / VARIABLE target: value lives in the backend's value table.
pub struct VariableAccessor<T: UserType + AnyVecConv> {
    core: AccessorCore,
    backend: Weak<LogicalNameMappingBackend>,
    variable: Arc<LNMVariable>,
    /// Set for push-mode accessors; filled by the variable's subscriber set.
    channel: Option<Arc<PushChannel<T>>>,
    staged: Option<(Vec<Vec<T>>, DataValidity, VersionNumber)>,
    buffer: Vec<Vec<T>>,
}

impl<T: UserType + AnyVecConv> VariableAccessor<T> {
    pub fn new(
        logical_path: RegisterPath,
        backend: &Arc<LogicalNameMappingBackend>,
        variable: Arc<LNMVariable>,
        flags: AccessMode,
    ) -> Result<Self> {
        flags.check_for_unknown_flags(AccessMode::WAIT_FOR_NEW_DATA)?;
        let n_elements = variable.n_elements();
        let writeable = !variable.is_constant();
        let core = AccessorCore::new(logical_path, flags, true, writeable);

        let channel = if flags.contains(AccessMode::WAIT_FOR_NEW_DATA) {
            let channel = Arc::new(PushChannel::<T>::new());
            variable.subscribe(core.id, Box::new(channel.clone()));
            Some(channel)
        } else {
            None
        };

        Ok(VariableAccessor {
            core,
            backend: Arc::downgrade(backend),
            variable,
            channel,
            staged: None,
            buffer: vec![vec![T::default(); n_elements]],
        })
    }

    fn check_open(&self) -> Result<()> {
        let open = self
            .backend
            .upgrade()
            .is_some_and(|backend| backend.is_open_flag());
        if open {
            Ok(())
        } else {
            Err(Error::device_not_opened())
        }
    }

    fn stage(&mut self, item: QueueItem<T>) -> Result<bool> {
        match item {
            QueueItem::Data(payload) => {
                self.staged = Some((payload.data, payload.validity, payload.version));
                Ok(true)
            }
            QueueItem::Error(error) => Err(error),
        }
    }
}

impl<T: UserType + AnyVecConv> TransferElement for VariableAccessor<T> {
    fn core(&self) -> &AccessorCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut AccessorCore {
        &mut self.core
    }

    fn do_pre_read(&mut self, _transfer_type: TransferType) -> Result<()> {
        self.check_open()
    }

    fn do_read_transfer_sync(&mut self) -> Result<()> {
        match &self.channel {
            Some(channel) => {
                let item = channel.pop_blocking();
                self.stage(item).map(|_| ())
            }
            None => Ok(()),
        }
    }

    fn do_read_transfer_nonblocking(&mut self) -> Result<bool> {
        match &self.channel {
            Some(channel) => match channel.pop() {
                Some(item) => self.stage(item),
                None => Ok(false),
            },
            None => Ok(true),
        }
    }

    fn do_read_transfer_latest(&mut self) -> Result<bool> {
        match &self.channel {
            Some(channel) => match channel.pop_latest() {
                Some(item) => self.stage(item),
                None => Ok(false),
            },
            None => Ok(true),
        }
    }

    fn do_post_read(&mut self, _transfer_type: TransferType, has_new_data: bool) -> Result<()> {
        if !has_new_data {
            return Ok(());
        }
        match self.staged.take() {
            Some((data, validity, version)) => {
                self.buffer = data;
                self.core.validity = validity;
                debug_assert!(version >= self.core.version);
                self.core.version = version;
            }
            None => {
                // poll mode: copy the latest slot
                let (value, validity, _) = self.variable.read_latest();
                self.buffer = vec![T::extract_vec(&value)];
                self.core.validity = validity;
                self.core.version = VersionNumber::new();
            }
        }
        Ok(())
    }

    fn do_pre_write(&mut self, _transfer_type: TransferType, _version: VersionNumber) -> Result<()> {
        self.check_open()
    }

    fn do_write_transfer(&mut self, version: VersionNumber) -> Result<bool> {
        // same-type writes bypass the f64 detour to stay lossless
        let value = if T::DATA_TYPE == self.variable.value_type() {
            T::wrap_vec(self.buffer[0].clone())
        } else {
            let cooked: Vec<f64> = self.buffer[0].iter().map(UserType::to_f64).collect();
            AnyVec::from_f64_slice(self.variable.value_type(), &cooked)
        };
        self.variable.write(value, self.core.validity, version)?;
        if let Some(backend) = self.backend.upgrade() {
            backend.variable_written(&self.core.name);
        }
        Ok(false)
    }

    fn do_post_write(&mut self, _transfer_type: TransferType, version: VersionNumber) -> Result<()> {
        self.core.version = version;
        Ok(())
    }
}

impl<T: UserType + AnyVecConv> NDRegisterAccessor<T> for VariableAccessor<T> {
    fn buffer(&self) -> &Vec<Vec<T>> {
        &self.buffer
    }

    fn buffer_mut(&mut self) -> &mut Vec<Vec<T>> {
        &mut self.buffer
    }

    fn data_lost_in_queue(&self) -> bool {
        self.channel
            .as_ref()
            .is_some_and(|channel| channel.take_data_lost())
    }
}

impl<T: UserType + AnyVecConv> Drop for VariableAccessor<T> {
    fn drop(&mut self) {
        if self.channel.is_some() {
            self.variable.unsubscribe(self.core.id);
        }
    }
}
