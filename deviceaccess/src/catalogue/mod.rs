//! Register catalogues: what a backend exposes, and how it is described.

pub mod dummy;
pub mod numeric;

use crate::access_mode::AccessMode;
use crate::data_types::DataType;
use crate::error::{Error, Result};
use crate::register_path::RegisterPath;
use downcast_rs::{impl_downcast, Downcast};

/// Fundamental kind of the cooked data a register exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FundamentalType {
    Numeric,
    String,
    Boolean,
    NoData,
}

/// Describes the cooked data of one register.
#[derive(Debug, Clone, PartialEq)]
pub struct DataDescriptor {
    pub fundamental_type: FundamentalType,
    /// Transport word type for registers with a raw layer, `None` otherwise.
    pub raw_type: Option<DataType>,
    pub is_integral: bool,
    pub is_signed: bool,
    /// Decimal digits needed left of the point (including sign).
    pub n_digits: u32,
    /// Decimal digits needed right of the point.
    pub n_fractional_digits: u32,
}

impl DataDescriptor {
    pub fn nodata() -> Self {
        DataDescriptor {
            fundamental_type: FundamentalType::NoData,
            raw_type: None,
            is_integral: false,
            is_signed: false,
            n_digits: 0,
            n_fractional_digits: 0,
        }
    }
}

/// Per-register metadata, independent of the backend kind.
pub trait RegisterInfo: Send + Sync + std::fmt::Debug + Downcast {
    fn name(&self) -> &RegisterPath;
    fn n_elements(&self) -> usize;
    fn n_channels(&self) -> usize;
    fn data_descriptor(&self) -> DataDescriptor;
    fn is_readable(&self) -> bool;
    fn is_writeable(&self) -> bool;
    fn supported_access_modes(&self) -> AccessMode;
    fn clone_boxed(&self) -> Box<dyn RegisterInfo>;
}
impl_downcast!(RegisterInfo);

/// Backend-side catalogue implementation behind [`RegisterCatalogue`].
pub trait CatalogueImpl: Send + Sync {
    fn has_register(&self, path: &RegisterPath) -> bool;
    fn get_register(&self, path: &RegisterPath) -> Result<Box<dyn RegisterInfo>>;
    /// The user-visible entries.
    fn visible_registers(&self) -> Vec<Box<dyn RegisterInfo>>;
    /// Internal-only entries, disjoint from the visible ones.
    fn hidden_registers(&self) -> Vec<Box<dyn RegisterInfo>> {
        Vec::new()
    }
    fn clone_impl(&self) -> Box<dyn CatalogueImpl>;
}

/// Owned handle to a backend's register catalogue.
///
/// Cloning clones the underlying catalogue; catalogues are immutable once the
/// backend is constructed, so a handle can be kept across transfers.
pub struct RegisterCatalogue {
    imp: Box<dyn CatalogueImpl>,
}

impl RegisterCatalogue {
    pub fn new(imp: Box<dyn CatalogueImpl>) -> Self {
        RegisterCatalogue { imp }
    }

    pub fn has_register(&self, path: impl Into<RegisterPath>) -> bool {
        self.imp.has_register(&path.into())
    }

    pub fn get_register(&self, path: impl Into<RegisterPath>) -> Result<Box<dyn RegisterInfo>> {
        self.imp.get_register(&path.into())
    }

    pub fn registers(&self) -> Vec<Box<dyn RegisterInfo>> {
        self.imp.visible_registers()
    }

    pub fn hidden_registers(&self) -> Vec<Box<dyn RegisterInfo>> {
        self.imp.hidden_registers()
    }

    pub fn n_registers(&self) -> usize {
        self.imp.visible_registers().len()
    }
}

impl Clone for RegisterCatalogue {
    fn clone(&self) -> Self {
        RegisterCatalogue {
            imp: self.imp.clone_impl(),
        }
    }
}

pub(crate) fn unknown_register_error(path: &RegisterPath) -> Error {
    Error::logic(format!("Register '{path}' was not found in the catalogue"))
}
