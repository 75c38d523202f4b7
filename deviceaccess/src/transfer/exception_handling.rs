//! Fault capture and write recovery.
//!
//! Every write-capable accessor on a numeric-addressed backend is wrapped in
//! an [`ExceptionHandlingDecorator`]. The decorator reports runtime errors to
//! the backend (switching it to the faulted state) and keeps the
//! last-intended raw write in a [`RecoveryHelper`], which the backend replays
//! in write order when the device is reopened.

use crate::accessor::numeric::NumericTransferElement;
use crate::accessor::{CookedAccess, NDRegisterAccessor};
use crate::backend::numeric::NumericAddressedBackend;
use crate::data_types::{DataValidity, UserType};
use crate::error::{Error, Result};
use crate::transfer::{AccessorCore, TransferElement, TransferElementId, TransferType};
use crate::version_number::VersionNumber;
use std::sync::{Arc, Mutex};

/// Raw words of one staged write, ready to be replayed through the port.
#[derive(Debug, Clone)]
pub struct RecoverySnapshot {
    pub bar: u64,
    pub address_bytes: u64,
    pub words: Vec<i32>,
}

#[derive(Debug, Default)]
struct RecoveryState {
    snapshot: Option<RecoverySnapshot>,
    version: VersionNumber,
    write_order: u64,
}

/// Stores the last-intended write of one accessor for replay after reopen.
#[derive(Debug)]
pub struct RecoveryHelper {
    id: TransferElementId,
    state: Mutex<RecoveryState>,
}

impl RecoveryHelper {
    pub fn new(id: TransferElementId) -> Self {
        RecoveryHelper {
            id,
            state: Mutex::new(RecoveryState::default()),
        }
    }

    pub fn id(&self) -> TransferElementId {
        self.id
    }

    pub fn stage(&self, snapshot: RecoverySnapshot, version: VersionNumber, write_order: u64) {
        let mut state = self.state.lock().unwrap();
        state.snapshot = Some(snapshot);
        state.version = version;
        state.write_order = write_order;
    }

    pub fn has_staged_value(&self) -> bool {
        self.state.lock().unwrap().snapshot.is_some()
    }

    pub fn write_order(&self) -> u64 {
        self.state.lock().unwrap().write_order
    }

    pub fn snapshot(&self) -> Option<RecoverySnapshot> {
        self.state.lock().unwrap().snapshot.clone()
    }
}

/// Decorator between the typed layer and the physical accessor.
pub struct ExceptionHandlingDecorator<T: UserType> {
    target: Box<dyn NumericTransferElement<T>>,
    backend: Arc<NumericAddressedBackend>,
    recovery: Option<Arc<RecoveryHelper>>,
}

impl<T: UserType> ExceptionHandlingDecorator<T> {
    pub fn new(
        target: Box<dyn NumericTransferElement<T>>,
        backend: Arc<NumericAddressedBackend>,
    ) -> Self {
        let recovery = if target.is_writeable() {
            let helper = Arc::new(RecoveryHelper::new(target.id()));
            backend.state().register_recovery(helper.clone());
            Some(helper)
        } else {
            None
        };
        ExceptionHandlingDecorator {
            target,
            backend,
            recovery,
        }
    }

    /// Reports runtime errors to the backend; the accessor's data is marked
    /// faulty until the next successful transfer.
    fn report(&mut self, error: Error) -> Error {
        if error.is_runtime() {
            self.backend.set_exception(&error);
            self.target.core_mut().validity = DataValidity::Faulty;
        }
        error
    }
}

impl<T: UserType> TransferElement for ExceptionHandlingDecorator<T> {
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
        self.target
            .do_read_transfer_sync()
            .map_err(|e| self.report(e))
    }

    fn do_read_transfer_nonblocking(&mut self) -> Result<bool> {
        self.target
            .do_read_transfer_nonblocking()
            .map_err(|e| self.report(e))
    }

    fn do_read_transfer_latest(&mut self) -> Result<bool> {
        self.target
            .do_read_transfer_latest()
            .map_err(|e| self.report(e))
    }

    fn do_post_read(&mut self, transfer_type: TransferType, has_new_data: bool) -> Result<()> {
        self.target.do_post_read(transfer_type, has_new_data)
    }

    fn do_pre_write(&mut self, transfer_type: TransferType, version: VersionNumber) -> Result<()> {
        self.target.do_pre_write(transfer_type, version)?;
        // the raw buffer is encoded now; stage it as the last-intended write
        if let Some(helper) = &self.recovery {
            if let Some(snapshot) = self.target.recovery_snapshot() {
                helper.stage(snapshot, version, self.backend.state().next_write_order());
            }
        }
        Ok(())
    }

    fn do_write_transfer(&mut self, version: VersionNumber) -> Result<bool> {
        self.target
            .do_write_transfer(version)
            .map_err(|e| self.report(e))
    }

    fn do_write_transfer_destructively(&mut self, version: VersionNumber) -> Result<bool> {
        self.target
            .do_write_transfer_destructively(version)
            .map_err(|e| self.report(e))
    }

    fn do_post_write(&mut self, transfer_type: TransferType, version: VersionNumber) -> Result<()> {
        self.target.do_post_write(transfer_type, version)
    }
}

impl<T: UserType> NDRegisterAccessor<T> for ExceptionHandlingDecorator<T> {
    fn buffer(&self) -> &Vec<Vec<T>> {
        self.target.buffer()
    }

    fn buffer_mut(&mut self) -> &mut Vec<Vec<T>> {
        self.target.buffer_mut()
    }

    fn cooked_access(&mut self) -> Option<&mut dyn CookedAccess> {
        self.target.cooked_access()
    }
}
