//! In-process value storage for CONSTANT and VARIABLE registers.

use crate::data_types::{DataType, DataValidity, UserType, Void};
use crate::error::{Error, Result};
use crate::for_each_user_type;
use crate::push::variable::{Payload, PushChannel};
use crate::transfer::TransferElementId;
use crate::version_number::VersionNumber;
use fnv::FnvBuildHasher;
use hashbrown::HashMap;
use std::sync::{Arc, Mutex};

/// Value vector tagged with its element type: the value slot of a CONSTANT
/// or VARIABLE, stored as the declared type only.
#[derive(Debug, Clone, PartialEq)]
pub enum AnyVec {
    Int8(Vec<i8>),
    UInt8(Vec<u8>),
    Int16(Vec<i16>),
    UInt16(Vec<u16>),
    Int32(Vec<i32>),
    UInt32(Vec<u32>),
    Int64(Vec<i64>),
    UInt64(Vec<u64>),
    Float32(Vec<f32>),
    Float64(Vec<f64>),
    Boolean(Vec<bool>),
    String(Vec<String>),
    Void(Vec<Void>),
}

/// Conversion between typed vectors and [`AnyVec`].
pub trait AnyVecConv: UserType {
    fn wrap_vec(values: Vec<Self>) -> AnyVec;
    /// Same-type extraction is lossless; across types values travel as f64.
    fn extract_vec(any: &AnyVec) -> Vec<Self>;
}

macro_rules! impl_any_vec {
    ($t:ty, $variant:ident) => {
        impl AnyVecConv for $t {
            fn wrap_vec(values: Vec<Self>) -> AnyVec {
                AnyVec::$variant(values)
            }

            fn extract_vec(any: &AnyVec) -> Vec<Self> {
                if let AnyVec::$variant(values) = any {
                    return values.clone();
                }
                any.to_f64_vec()
                    .into_iter()
                    .map(<$t as UserType>::from_f64)
                    .collect()
            }
        }
    };
}
for_each_user_type!(impl_any_vec);

impl AnyVec {
    pub fn filled_default(data_type: DataType, len: usize) -> Self {
        macro_rules! make {
            ($t:ty, $variant:ident) => {
                if data_type == DataType::$variant {
                    return AnyVec::$variant(vec![<$t>::default(); len]);
                }
            };
        }
        for_each_user_type!(make);
        unreachable!("the user-type set is closed");
    }

    /// Parses text values (the form they have in the logical name map).
    pub fn from_strings(data_type: DataType, values: &[String]) -> Self {
        if data_type == DataType::String {
            return AnyVec::String(values.to_vec());
        }
        let numbers: Vec<f64> = values
            .iter()
            .map(|s| s.trim().parse().unwrap_or(0.0))
            .collect();
        Self::from_f64_slice(data_type, &numbers)
    }

    pub fn from_f64_slice(data_type: DataType, values: &[f64]) -> Self {
        macro_rules! make {
            ($t:ty, $variant:ident) => {
                if data_type == DataType::$variant {
                    return AnyVec::$variant(
                        values.iter().map(|v| <$t as UserType>::from_f64(*v)).collect(),
                    );
                }
            };
        }
        for_each_user_type!(make);
        unreachable!("the user-type set is closed");
    }

    pub fn to_f64_vec(&self) -> Vec<f64> {
        macro_rules! arm {
            ($t:ty, $variant:ident) => {
                if let AnyVec::$variant(values) = self {
                    return values.iter().map(|v| UserType::to_f64(v)).collect();
                }
            };
        }
        for_each_user_type!(arm);
        unreachable!("the user-type set is closed");
    }

    pub fn len(&self) -> usize {
        macro_rules! arm {
            ($t:ty, $variant:ident) => {
                if let AnyVec::$variant(values) = self {
                    return values.len();
                }
            };
        }
        for_each_user_type!(arm);
        unreachable!("the user-type set is closed");
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Consumer-side handle of one variable subscription.
pub trait VariableSubscriber: Send + Sync {
    fn push_value(&self, value: &AnyVec, validity: DataValidity, version: VersionNumber);
    fn push_error(&self, error: &Error);
}

impl<T: UserType + AnyVecConv> VariableSubscriber for Arc<PushChannel<T>> {
    fn push_value(&self, value: &AnyVec, validity: DataValidity, version: VersionNumber) {
        self.push_payload(Payload {
            data: vec![T::extract_vec(value)],
            validity,
            version,
        });
    }

    fn push_error(&self, error: &Error) {
        (**self).push_error(error.clone());
    }
}

struct ValueTable {
    value: AnyVec,
    validity: DataValidity,
    version: VersionNumber,
    subscribers: HashMap<TransferElementId, Box<dyn VariableSubscriber>, FnvBuildHasher>,
}

/// Shared state of one CONSTANT or VARIABLE register.
pub struct LNMVariable {
    value_type: DataType,
    is_constant: bool,
    table: Mutex<ValueTable>,
}

impl LNMVariable {
    pub fn new(value_type: DataType, is_constant: bool, initial: AnyVec) -> Self {
        // the logical name map always supplies an initial value, so the slot
        // is born valid
        let version = VersionNumber::new();
        LNMVariable {
            value_type,
            is_constant,
            table: Mutex::new(ValueTable {
                value: initial,
                validity: DataValidity::Ok,
                version,
                subscribers: HashMap::default(),
            }),
        }
    }

    pub fn value_type(&self) -> DataType {
        self.value_type
    }

    pub fn is_constant(&self) -> bool {
        self.is_constant
    }

    pub fn n_elements(&self) -> usize {
        self.table.lock().unwrap().value.len()
    }

    /// Latest value with its validity and version.
    pub fn read_latest(&self) -> (AnyVec, DataValidity, VersionNumber) {
        let table = self.table.lock().unwrap();
        (table.value.clone(), table.validity, table.version)
    }

    /// Whether the variable was written (or initialised) at least once.
    pub fn has_value(&self) -> bool {
        self.table.lock().unwrap().version != VersionNumber::BEFORE_EVERYTHING
    }

    /// Updates the slot and enqueues the new value to every subscriber.
    pub fn write(&self, value: AnyVec, validity: DataValidity, version: VersionNumber) -> Result<()> {
        if self.is_constant {
            return Err(Error::logic("a CONSTANT register cannot be written"));
        }
        let mut table = self.table.lock().unwrap();
        table.value = value;
        table.validity = validity;
        table.version = version;
        for subscriber in table.subscribers.values() {
            subscriber.push_value(&table.value, table.validity, table.version);
        }
        Ok(())
    }

    /// Registers a subscriber and pushes the current value as initial value.
    pub fn subscribe(&self, id: TransferElementId, subscriber: Box<dyn VariableSubscriber>) {
        let mut table = self.table.lock().unwrap();
        let version = if table.version == VersionNumber::BEFORE_EVERYTHING {
            VersionNumber::new()
        } else {
            table.version
        };
        table.version = version;
        subscriber.push_value(&table.value, table.validity, version);
        table.subscribers.insert(id, subscriber);
    }

    pub fn unsubscribe(&self, id: TransferElementId) {
        self.table.lock().unwrap().subscribers.remove(&id);
    }

    /// Forwards an error to every subscriber (used on close).
    pub fn send_exception(&self, error: &Error) {
        let table = self.table.lock().unwrap();
        for subscriber in table.subscribers.values() {
            subscriber.push_error(error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_any_vec_conversion() {
        let v = AnyVec::from_strings(DataType::Int16, &["1".into(), "-2".into()]);
        assert_eq!(v, AnyVec::Int16(vec![1, -2]));
        assert_eq!(<f64 as AnyVecConv>::extract_vec(&v), vec![1.0, -2.0]);
        assert_eq!(<i16 as AnyVecConv>::extract_vec(&v), vec![1, -2]);
    }

    #[test]
    fn test_string_values_survive_same_type() {
        let v = AnyVec::from_strings(DataType::String, &["hello".into()]);
        assert_eq!(
            <String as AnyVecConv>::extract_vec(&v),
            vec!["hello".to_string()]
        );
    }

    #[test]
    fn test_constant_rejects_write() {
        let var = LNMVariable::new(
            DataType::Int32,
            true,
            AnyVec::Int32(vec![42]),
        );
        let err = var
            .write(AnyVec::Int32(vec![1]), DataValidity::Ok, VersionNumber::new())
            .unwrap_err();
        assert!(err.is_logic());
    }
}
