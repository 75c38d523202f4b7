//! Register-oriented access to accelerator and instrumentation hardware.
//!
//! The library exposes register-based devices — in-memory dummies, shared
//! dummies, TCP-tunneled register servers and, through the same contract,
//! memory-mapped hardware — behind a uniform typed accessor API:
//!
//! ```
//! use deviceaccess::catalogue::numeric::{
//!     ChannelEncoding, ChannelInfo, NumericAddressedRegisterCatalogue,
//!     NumericAddressedRegisterInfo, RegisterAccess,
//! };
//! use deviceaccess::{Device, DeviceRegistry};
//!
//! let mut map = NumericAddressedRegisterCatalogue::new();
//! map.add_register(NumericAddressedRegisterInfo::flat(
//!     "BOARD.TEMPERATURE", 1, 0, 0,
//!     ChannelInfo {
//!         width: 16, n_fractional_bits: 3, signed: true,
//!         encoding: ChannelEncoding::FixedPoint,
//!     },
//!     RegisterAccess::ReadWrite,
//! )).unwrap();
//!
//! let mut registry = DeviceRegistry::new();
//! registry.register_map("board.map", map);
//!
//! let device = Device::open_new(&registry, "dummy?map=board.map").unwrap();
//! let mut temperature = device.accessor::<f64>("BOARD.TEMPERATURE").unwrap();
//! temperature.set_scalar(3.125);
//! temperature.write().unwrap();
//! ```

pub mod access_mode;
pub mod accessor;
pub mod backend;
pub mod catalogue;
pub mod codec;
pub mod consistency;
pub mod data_types;
pub mod device;
pub mod error;
pub mod lnm;
pub mod push;
pub mod register_path;
pub mod transfer;
pub mod version_number;

pub use access_mode::AccessMode;
pub use accessor::{AccessorConv, AnyAccessor, NDRegisterAccessor, RegisterAccessor};
pub use backend::registry::{DeviceDescriptor, DeviceRegistry};
pub use backend::{AccessorRequest, DeviceBackend, RawMemoryPort};
pub use catalogue::{DataDescriptor, FundamentalType, RegisterCatalogue, RegisterInfo};
pub use consistency::DataConsistencyGroup;
pub use data_types::{DataType, DataValidity, UserType, Void};
pub use device::Device;
pub use error::{Error, Result};
pub use register_path::RegisterPath;
pub use transfer::{TransferElement, TransferElementId, TransferType};
pub use version_number::VersionNumber;
