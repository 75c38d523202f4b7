//! The transfer-element state machine driving every accessor.
//!
//! A user operation is composed of three phases: `pre`, `transfer`, `post`.
//! Accessors implement the `do_*` hooks; the provided methods compose them
//! and guarantee that `post` runs even when `pre` or the transfer failed, so
//! an accessor is always left in a consistent state.

pub mod decorator;
pub mod exception_handling;

use crate::access_mode::AccessMode;
use crate::data_types::DataValidity;
use crate::error::{Error, Result};
use crate::register_path::RegisterPath;
use crate::version_number::VersionNumber;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identity of one accessor instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransferElementId(u64);

impl TransferElementId {
    pub fn allocate() -> Self {
        TransferElementId(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for TransferElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Which user operation is driving the current phase cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferType {
    Read,
    ReadNonBlocking,
    ReadLatest,
    Write,
    WriteDestructively,
}

/// State shared by every accessor implementation.
#[derive(Debug)]
pub struct AccessorCore {
    pub name: RegisterPath,
    pub id: TransferElementId,
    pub version: VersionNumber,
    pub validity: DataValidity,
    pub flags: AccessMode,
    pub readable: bool,
    pub writeable: bool,
}

impl AccessorCore {
    pub fn new(name: RegisterPath, flags: AccessMode, readable: bool, writeable: bool) -> Self {
        AccessorCore {
            name,
            id: TransferElementId::allocate(),
            version: VersionNumber::BEFORE_EVERYTHING,
            validity: DataValidity::Ok,
            flags,
            readable,
            writeable,
        }
    }
}

/// One accessor's transfer state machine.
///
/// Implementations provide the `do_*` hooks; users call the composed
/// operations (`read`, `write`, ...). A single accessor is single-threaded:
/// the caller serialises operations on it.
pub trait TransferElement: Send {
    fn core(&self) -> &AccessorCore;
    fn core_mut(&mut self) -> &mut AccessorCore;

    // ---- phase hooks ----

    fn do_pre_read(&mut self, transfer_type: TransferType) -> Result<()>;

    /// Blocking data transfer for `read()`.
    fn do_read_transfer_sync(&mut self) -> Result<()>;

    /// Non-blocking transfer; returns whether new data arrived.
    fn do_read_transfer_nonblocking(&mut self) -> Result<bool>;

    /// Drains any queue and keeps only the most recent item.
    fn do_read_transfer_latest(&mut self) -> Result<bool> {
        self.do_read_transfer_nonblocking()
    }

    fn do_post_read(&mut self, transfer_type: TransferType, has_new_data: bool) -> Result<()>;

    fn do_pre_write(&mut self, transfer_type: TransferType, version: VersionNumber) -> Result<()>;

    /// Returns `true` if a previously staged value was overwritten (lost).
    fn do_write_transfer(&mut self, version: VersionNumber) -> Result<bool>;

    fn do_write_transfer_destructively(&mut self, version: VersionNumber) -> Result<bool> {
        self.do_write_transfer(version)
    }

    fn do_post_write(&mut self, transfer_type: TransferType, version: VersionNumber) -> Result<()>;

    // ---- metadata ----

    fn name(&self) -> &RegisterPath {
        &self.core().name
    }

    fn id(&self) -> TransferElementId {
        self.core().id
    }

    fn version_number(&self) -> VersionNumber {
        self.core().version
    }

    fn data_validity(&self) -> DataValidity {
        self.core().validity
    }

    fn access_mode_flags(&self) -> AccessMode {
        self.core().flags
    }

    fn is_readable(&self) -> bool {
        self.core().readable
    }

    fn is_writeable(&self) -> bool {
        self.core().writeable
    }

    // ---- composed user operations ----

    /// Blocking read. On success the version number has strictly increased.
    fn read(&mut self) -> Result<()> {
        self.check_readable()?;
        if let Err(e) = self.do_pre_read(TransferType::Read) {
            let _ = self.do_post_read(TransferType::Read, false);
            return Err(e);
        }
        let transfer = self.do_read_transfer_sync();
        let post = self.do_post_read(TransferType::Read, transfer.is_ok());
        transfer.and(post)
    }

    /// Non-blocking read; returns whether new data was received. Without new
    /// data the buffer and version number are unchanged.
    fn read_non_blocking(&mut self) -> Result<bool> {
        self.read_cycle_nonblocking(TransferType::ReadNonBlocking)
    }

    /// Drains the incoming queue and keeps only the newest value.
    fn read_latest(&mut self) -> Result<bool> {
        self.read_cycle_nonblocking(TransferType::ReadLatest)
    }

    /// Blocking write; returns `true` if previous data was lost.
    fn write(&mut self) -> Result<bool> {
        self.write_cycle(TransferType::Write)
    }

    /// Like `write`, but the implementation may move the buffer out instead
    /// of copying it. The buffer content is unspecified afterwards.
    fn write_destructively(&mut self) -> Result<bool> {
        self.write_cycle(TransferType::WriteDestructively)
    }

    // ---- cycle helpers (not meant to be overridden) ----

    fn read_cycle_nonblocking(&mut self, transfer_type: TransferType) -> Result<bool> {
        self.check_readable()?;
        if let Err(e) = self.do_pre_read(transfer_type) {
            let _ = self.do_post_read(transfer_type, false);
            return Err(e);
        }
        let transfer = if transfer_type == TransferType::ReadLatest {
            self.do_read_transfer_latest()
        } else {
            self.do_read_transfer_nonblocking()
        };
        let has_new_data = *transfer.as_ref().unwrap_or(&false);
        let post = self.do_post_read(transfer_type, has_new_data);
        transfer.and(post.map(|()| has_new_data))
    }

    fn write_cycle(&mut self, transfer_type: TransferType) -> Result<bool> {
        self.check_writeable()?;
        let version = VersionNumber::new();
        if let Err(e) = self.do_pre_write(transfer_type, version) {
            let _ = self.do_post_write(transfer_type, version);
            return Err(e);
        }
        let transfer = if transfer_type == TransferType::WriteDestructively {
            self.do_write_transfer_destructively(version)
        } else {
            self.do_write_transfer(version)
        };
        let post = self.do_post_write(transfer_type, version);
        let data_lost = *transfer.as_ref().unwrap_or(&false);
        transfer.and(post.map(|()| data_lost))
    }

    fn check_readable(&self) -> Result<()> {
        if self.core().readable {
            Ok(())
        } else {
            Err(Error::logic(format!(
                "Register '{}' is not readable",
                self.core().name
            )))
        }
    }

    fn check_writeable(&self) -> Result<()> {
        if self.core().writeable {
            Ok(())
        } else {
            Err(Error::logic(format!(
                "Register '{}' is not writeable",
                self.core().name
            )))
        }
    }
}
