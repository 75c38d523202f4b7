//! Device backends: the physical side of the library.

pub mod dummy;
pub mod numeric;
pub mod rebot;
pub mod rebot_protocol;
pub mod registry;
pub mod shared_dummy;

use crate::access_mode::AccessMode;
use crate::accessor::AnyAccessor;
use crate::catalogue::RegisterCatalogue;
use crate::data_types::DataType;
use crate::error::{Error, Result};
use crate::push::dispatcher::InterruptSource;
use crate::register_path::RegisterPath;
use crate::transfer::exception_handling::RecoveryHelper;
use downcast_rs::{impl_downcast, Downcast, DowncastSync};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Parameters of one accessor request, type dispatch included.
#[derive(Debug, Clone)]
pub struct AccessorRequest {
    pub path: RegisterPath,
    /// `0` means "the whole register".
    pub n_elements: usize,
    pub element_offset: usize,
    pub flags: AccessMode,
    pub data_type: DataType,
}

impl AccessorRequest {
    pub fn new(path: impl Into<RegisterPath>, data_type: DataType) -> Self {
        AccessorRequest {
            path: path.into(),
            n_elements: 0,
            element_offset: 0,
            flags: AccessMode::empty(),
            data_type,
        }
    }
}

/// One backend instance: catalogue plus transport for one device.
pub trait DeviceBackend: DowncastSync {
    /// Opens (or re-opens) the device. A successful open clears the active
    /// exception, replays recovery writes and reactivates async domains.
    fn open(&self) -> Result<()>;

    /// Closes the device, joining dispatcher threads and unblocking all
    /// waiting push accessors with a runtime error.
    fn close(&self);

    fn is_open(&self) -> bool;

    /// Open and not faulted.
    fn is_functional(&self) -> bool;

    fn catalogue(&self) -> RegisterCatalogue;

    /// One-line human readable device description.
    fn device_info(&self) -> String;

    /// Builds the accessor chain for one register. `self_ref` must be the
    /// `Arc` this backend is owned through.
    fn make_accessor(
        &self,
        self_ref: &Arc<dyn DeviceBackend>,
        request: &AccessorRequest,
    ) -> Result<AnyAccessor>;
}
impl_downcast!(sync DeviceBackend);

/// Lifecycle and fault state shared by all backend implementations.
pub struct BackendState {
    opened: AtomicBool,
    active_exception: Mutex<Option<Error>>,
    recovery: Mutex<Vec<Arc<RecoveryHelper>>>,
    write_order: AtomicU64,
}

impl Default for BackendState {
    fn default() -> Self {
        BackendState {
            opened: AtomicBool::new(false),
            active_exception: Mutex::new(None),
            recovery: Mutex::new(Vec::new()),
            write_order: AtomicU64::new(1),
        }
    }
}

impl BackendState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_open(&self) -> bool {
        self.opened.load(Ordering::Acquire)
    }

    pub fn set_open(&self, open: bool) {
        self.opened.store(open, Ordering::Release);
    }

    /// Fails with the active runtime error, if any. Transfers call this
    /// before touching the device so a faulted backend raises immediately.
    pub fn check_active_exception(&self) -> Result<()> {
        match &*self.active_exception.lock().unwrap() {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }

    /// Records the first runtime error; returns whether this call was the
    /// one marking the backend faulted.
    pub fn set_exception(&self, error: Error) -> bool {
        debug_assert!(error.is_runtime());
        let mut active = self.active_exception.lock().unwrap();
        if active.is_none() {
            log::warn!("backend entered faulted state: {error}");
            *active = Some(error);
            true
        } else {
            false
        }
    }

    pub fn clear_exception(&self) {
        *self.active_exception.lock().unwrap() = None;
    }

    pub fn has_active_exception(&self) -> bool {
        self.active_exception.lock().unwrap().is_some()
    }

    pub fn next_write_order(&self) -> u64 {
        self.write_order.fetch_add(1, Ordering::Relaxed)
    }

    pub fn register_recovery(&self, helper: Arc<RecoveryHelper>) {
        self.recovery.lock().unwrap().push(helper);
    }

    /// Recovery helpers with a staged value, in ascending write order.
    pub fn recovery_replay_list(&self) -> Vec<Arc<RecoveryHelper>> {
        let mut list: Vec<Arc<RecoveryHelper>> = self
            .recovery
            .lock()
            .unwrap()
            .iter()
            .filter(|h| h.has_staged_value())
            .cloned()
            .collect();
        list.sort_by_key(|h| h.write_order());
        list
    }

    /// Drops helpers whose accessor is gone (only the backend holds them).
    pub fn prune_recovery(&self) {
        self.recovery
            .lock()
            .unwrap()
            .retain(|h| Arc::strong_count(h) > 1);
    }
}

/// Byte/word-addressed transport contract implemented by the physical
/// backends (dummy, shared dummy, Rebot; PCIe/UIO live outside this crate).
///
/// Implementations serialise `read_raw`/`write_raw` internally; callers may
/// invoke them from any thread.
pub trait RawMemoryPort: Send + Sync + Downcast {
    fn open_port(&self) -> Result<()>;

    fn close_port(&self);

    fn read_raw(&self, bar: u64, address_bytes: u64, data: &mut [i32]) -> Result<()>;

    fn write_raw(&self, bar: u64, address_bytes: u64, data: &[i32]) -> Result<()>;

    fn minimum_transfer_alignment(&self, _bar: u64) -> usize {
        4
    }

    /// One-line transport description for `device_info`.
    fn port_info(&self) -> String;

    /// Edge source for one primary interrupt, if the transport has one.
    fn interrupt_source(&self, _interrupt: u32) -> Option<Arc<dyn InterruptSource>> {
        None
    }

    /// Software-triggers a primary interrupt (dummy transports only).
    fn trigger_interrupt(&self, interrupt: u32) -> Result<()> {
        let _ = interrupt;
        Err(Error::logic(
            "this backend cannot trigger interrupts from software",
        ))
    }
}
impl_downcast!(RawMemoryPort);
