//! Typed accessors: a 2-D user buffer on top of the transfer state machine.

pub mod async_push;
pub mod muxed;
pub mod numeric;
pub mod trigger;

use crate::data_types::UserType;
use crate::error::{Error, Result};
use crate::for_each_user_type;
use crate::transfer::TransferElement;
use downcast_rs::{impl_downcast, Downcast};

/// Accessor with a typed buffer `buffer[channel][sample]`.
///
/// The codec between raw device words and `T` runs inside `do_post_read` /
/// `do_pre_write` of the implementation; users only ever see cooked values,
/// unless the accessor was requested in raw mode.
pub trait NDRegisterAccessor<T: UserType>: TransferElement + Downcast {
    fn buffer(&self) -> &Vec<Vec<T>>;
    fn buffer_mut(&mut self) -> &mut Vec<Vec<T>>;

    fn n_channels(&self) -> usize {
        self.buffer().len()
    }

    fn n_samples(&self) -> usize {
        self.buffer().first().map_or(0, Vec::len)
    }

    /// Per-element cooked conversion for raw-mode accessors.
    fn cooked_access(&mut self) -> Option<&mut dyn CookedAccess> {
        None
    }

    /// Whether the incoming queue dropped data since the last read
    /// (push accessors only).
    fn data_lost_in_queue(&self) -> bool {
        false
    }
}
impl_downcast!(NDRegisterAccessor<T> where T: UserType);

/// Cooked view into a raw-mode accessor, one element at a time.
pub trait CookedAccess {
    fn get_cooked_f64(&self, channel: usize, sample: usize) -> Result<f64>;
    fn set_cooked_f64(&mut self, channel: usize, sample: usize, value: f64) -> Result<()>;
}

/// Type-erased accessor handed across the backend boundary.
///
/// Backends construct accessors from a runtime `DataType` tag; this enum is
/// the bridge back to the statically typed world. It is the flat dispatch
/// table over the closed user-type set.
pub enum AnyAccessor {
    Int8(Box<dyn NDRegisterAccessor<i8>>),
    UInt8(Box<dyn NDRegisterAccessor<u8>>),
    Int16(Box<dyn NDRegisterAccessor<i16>>),
    UInt16(Box<dyn NDRegisterAccessor<u16>>),
    Int32(Box<dyn NDRegisterAccessor<i32>>),
    UInt32(Box<dyn NDRegisterAccessor<u32>>),
    Int64(Box<dyn NDRegisterAccessor<i64>>),
    UInt64(Box<dyn NDRegisterAccessor<u64>>),
    Float32(Box<dyn NDRegisterAccessor<f32>>),
    Float64(Box<dyn NDRegisterAccessor<f64>>),
    Boolean(Box<dyn NDRegisterAccessor<bool>>),
    String(Box<dyn NDRegisterAccessor<String>>),
    Void(Box<dyn NDRegisterAccessor<crate::Void>>),
}

/// Wrapping and unwrapping of [`AnyAccessor`] for one member of the closed
/// user-type set.
pub trait AccessorConv: UserType + Sized {
    fn wrap_accessor(accessor: Box<dyn NDRegisterAccessor<Self>>) -> AnyAccessor;
    fn unwrap_accessor(any: AnyAccessor) -> Option<Box<dyn NDRegisterAccessor<Self>>>;
}

macro_rules! impl_accessor_conv {
    ($t:ty, $variant:ident) => {
        impl AccessorConv for $t {
            fn wrap_accessor(accessor: Box<dyn NDRegisterAccessor<Self>>) -> AnyAccessor {
                AnyAccessor::$variant(accessor)
            }

            fn unwrap_accessor(any: AnyAccessor) -> Option<Box<dyn NDRegisterAccessor<Self>>> {
                match any {
                    AnyAccessor::$variant(accessor) => Some(accessor),
                    _ => None,
                }
            }
        }
    };
}
for_each_user_type!(impl_accessor_conv);

/// User-facing handle to one register: a typed buffer plus the transfer
/// operations of the underlying accessor chain.
pub struct RegisterAccessor<T: UserType> {
    imp: Box<dyn NDRegisterAccessor<T>>,
}

impl<T: UserType> std::fmt::Debug for RegisterAccessor<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisterAccessor").finish_non_exhaustive()
    }
}

impl<T: UserType> RegisterAccessor<T> {
    pub(crate) fn from_impl(imp: Box<dyn NDRegisterAccessor<T>>) -> Self {
        RegisterAccessor { imp }
    }

    // transfer operations

    pub fn read(&mut self) -> Result<()> {
        self.imp.read()
    }

    pub fn read_non_blocking(&mut self) -> Result<bool> {
        self.imp.read_non_blocking()
    }

    pub fn read_latest(&mut self) -> Result<bool> {
        self.imp.read_latest()
    }

    pub fn write(&mut self) -> Result<bool> {
        self.imp.write()
    }

    pub fn write_destructively(&mut self) -> Result<bool> {
        self.imp.write_destructively()
    }

    // metadata

    pub fn name(&self) -> &crate::RegisterPath {
        self.imp.name()
    }

    pub fn id(&self) -> crate::TransferElementId {
        self.imp.id()
    }

    pub fn version_number(&self) -> crate::VersionNumber {
        self.imp.version_number()
    }

    pub fn data_validity(&self) -> crate::DataValidity {
        self.imp.data_validity()
    }

    /// Marks the buffer content as ok or faulty; the flag travels with the
    /// next write and sticks to everything derived from it.
    pub fn set_data_validity(&mut self, validity: crate::DataValidity) {
        self.imp.core_mut().validity = validity;
    }

    pub fn access_mode_flags(&self) -> crate::AccessMode {
        self.imp.access_mode_flags()
    }

    pub fn is_readable(&self) -> bool {
        self.imp.is_readable()
    }

    pub fn is_writeable(&self) -> bool {
        self.imp.is_writeable()
    }

    pub fn n_channels(&self) -> usize {
        self.imp.n_channels()
    }

    pub fn n_samples(&self) -> usize {
        self.imp.n_samples()
    }

    pub fn data_lost_in_queue(&self) -> bool {
        self.imp.data_lost_in_queue()
    }

    // buffer access

    pub fn get(&self, channel: usize, sample: usize) -> T {
        self.imp.buffer()[channel][sample].clone()
    }

    pub fn set(&mut self, channel: usize, sample: usize, value: T) {
        self.imp.buffer_mut()[channel][sample] = value;
    }

    pub fn channel(&self, channel: usize) -> &[T] {
        &self.imp.buffer()[channel]
    }

    pub fn set_channel(&mut self, channel: usize, values: &[T]) {
        let target = &mut self.imp.buffer_mut()[channel];
        assert_eq!(
            target.len(),
            values.len(),
            "channel length mismatch on register '{}'",
            self.imp.name()
        );
        target.clone_from_slice(values);
    }

    /// First element of the first channel; the usual scalar view.
    pub fn get_scalar(&self) -> T {
        self.get(0, 0)
    }

    pub fn set_scalar(&mut self, value: T) {
        self.set(0, 0, value);
    }

    /// Convenience: `set_scalar` + `write`.
    pub fn write_scalar(&mut self, value: T) -> Result<bool> {
        self.set_scalar(value);
        self.write()
    }

    /// Convenience: `read` + `get_scalar`.
    pub fn read_scalar(&mut self) -> Result<T> {
        self.read()?;
        Ok(self.get_scalar())
    }

    /// Wraps the accessor chain in a defensive-copy decorator: the buffer
    /// handed out is decoupled from the physical transfer buffer.
    pub fn with_defensive_copy(self) -> RegisterAccessor<T> {
        RegisterAccessor {
            imp: Box::new(crate::transfer::decorator::CopyRegisterDecorator::new(
                self.imp,
            )),
        }
    }

    // raw-mode cooked view

    pub fn get_as_cooked<U: UserType>(&mut self, channel: usize, sample: usize) -> Result<U> {
        let cooked = self
            .imp
            .cooked_access()
            .ok_or_else(|| raw_mode_required())?
            .get_cooked_f64(channel, sample)?;
        Ok(U::from_f64(cooked))
    }

    pub fn set_as_cooked<U: UserType>(
        &mut self,
        channel: usize,
        sample: usize,
        value: U,
    ) -> Result<()> {
        self.imp
            .cooked_access()
            .ok_or_else(|| raw_mode_required())?
            .set_cooked_f64(channel, sample, value.to_f64())
    }
}

fn raw_mode_required() -> Error {
    Error::logic("cooked element access requires an accessor with AccessMode::RAW")
}
