//! Descriptors of virtual (logically named) registers.

use crate::access_mode::AccessMode;
use crate::catalogue::{
    unknown_register_error, CatalogueImpl, DataDescriptor, FundamentalType, RegisterInfo,
};
use crate::data_types::DataType;
use crate::error::Result;
use crate::register_path::RegisterPath;
use fnv::FnvBuildHasher;
use hashbrown::HashMap;

/// What a virtual register is composed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetType {
    /// Slice of a target backend's register.
    Register,
    /// One row of a 2-D target register.
    Channel,
    /// A single bit of a scalar integer target.
    Bit,
    /// Immutable in-process value.
    Constant,
    /// Mutable in-process value.
    Variable,
}

/// One entry of an accessor-plugin chain, in parsed form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginSpec {
    pub name: String,
    pub parameters: HashMap<String, String, FnvBuildHasher>,
}

impl PluginSpec {
    pub fn new(name: &str) -> Self {
        PluginSpec {
            name: name.to_owned(),
            parameters: HashMap::default(),
        }
    }

    pub fn with_parameter(mut self, key: &str, value: &str) -> Self {
        self.parameters.insert(key.to_owned(), value.to_owned());
        self
    }
}

/// Descriptor of one virtual register, consumed from the parsed logical
/// name map.
#[derive(Debug, Clone, PartialEq)]
pub struct LNMRegisterInfo {
    pub path: RegisterPath,
    pub target_type: TargetType,
    pub target_device: Option<String>,
    pub target_register: Option<RegisterPath>,
    /// First target element of the slice.
    pub first_index: usize,
    /// Slice length; `0` means "to the end of the target".
    pub length: usize,
    /// Selected row for `Channel`.
    pub channel: usize,
    /// Selected bit for `Bit`.
    pub bit: u32,
    pub n_channels: usize,
    /// Element type of `Constant` / `Variable` values.
    pub value_type: DataType,
    /// Initial values of `Constant` / `Variable`, in text form.
    pub values: Vec<String>,
    pub plugins: Vec<PluginSpec>,
}

impl LNMRegisterInfo {
    fn base(path: &str, target_type: TargetType) -> Self {
        LNMRegisterInfo {
            path: RegisterPath::new(path),
            target_type,
            target_device: None,
            target_register: None,
            first_index: 0,
            length: 0,
            channel: 0,
            bit: 0,
            n_channels: 1,
            value_type: DataType::Float64,
            values: Vec::new(),
            plugins: Vec::new(),
        }
    }

    pub fn register(path: &str, device: &str, target: &str) -> Self {
        let mut info = Self::base(path, TargetType::Register);
        info.target_device = Some(device.to_owned());
        info.target_register = Some(RegisterPath::new(target));
        info
    }

    pub fn channel(path: &str, device: &str, target: &str, channel: usize) -> Self {
        let mut info = Self::base(path, TargetType::Channel);
        info.target_device = Some(device.to_owned());
        info.target_register = Some(RegisterPath::new(target));
        info.channel = channel;
        info
    }

    pub fn bit(path: &str, device: &str, target: &str, bit: u32) -> Self {
        let mut info = Self::base(path, TargetType::Bit);
        info.target_device = Some(device.to_owned());
        info.target_register = Some(RegisterPath::new(target));
        info.bit = bit;
        info
    }

    pub fn constant(path: &str, value_type: DataType, values: &[&str]) -> Self {
        let mut info = Self::base(path, TargetType::Constant);
        info.value_type = value_type;
        info.values = values.iter().map(|s| (*s).to_owned()).collect();
        info.length = values.len();
        info
    }

    pub fn variable(path: &str, value_type: DataType, values: &[&str]) -> Self {
        let mut info = Self::constant(path, value_type, values);
        info.target_type = TargetType::Variable;
        info
    }

    pub fn with_slice(mut self, first_index: usize, length: usize) -> Self {
        self.first_index = first_index;
        self.length = length;
        self
    }

    pub fn with_plugin(mut self, plugin: PluginSpec) -> Self {
        self.plugins.push(plugin);
        self
    }

    fn has_write_blocking_plugin(&self) -> bool {
        self.plugins.iter().any(|p| p.name == "forceReadOnly")
    }
}

impl RegisterInfo for LNMRegisterInfo {
    fn name(&self) -> &RegisterPath {
        &self.path
    }

    fn n_elements(&self) -> usize {
        match self.target_type {
            TargetType::Bit => 1,
            _ => self.length,
        }
    }

    fn n_channels(&self) -> usize {
        self.n_channels
    }

    fn data_descriptor(&self) -> DataDescriptor {
        let fundamental_type = match self.target_type {
            TargetType::Bit => FundamentalType::Boolean,
            TargetType::Constant | TargetType::Variable => match self.value_type {
                DataType::String => FundamentalType::String,
                DataType::Boolean => FundamentalType::Boolean,
                DataType::Void => FundamentalType::NoData,
                _ => FundamentalType::Numeric,
            },
            _ => FundamentalType::Numeric,
        };
        DataDescriptor {
            fundamental_type,
            raw_type: None,
            is_integral: self.value_type.is_integral(),
            is_signed: self.value_type.is_signed(),
            n_digits: 0,
            n_fractional_digits: 0,
        }
    }

    fn is_readable(&self) -> bool {
        true
    }

    fn is_writeable(&self) -> bool {
        match self.target_type {
            TargetType::Channel | TargetType::Constant => false,
            _ => !self.has_write_blocking_plugin(),
        }
    }

    fn supported_access_modes(&self) -> AccessMode {
        match self.target_type {
            TargetType::Constant | TargetType::Variable => AccessMode::WAIT_FOR_NEW_DATA,
            _ => AccessMode::empty(),
        }
    }

    fn clone_boxed(&self) -> Box<dyn RegisterInfo> {
        Box::new(self.clone())
    }
}

/// Catalogue over the logical name map table.
#[derive(Clone, Default)]
pub struct LNMCatalogue {
    registers: HashMap<String, LNMRegisterInfo, FnvBuildHasher>,
}

impl LNMCatalogue {
    pub fn from_table(table: &[LNMRegisterInfo]) -> Self {
        let mut registers: HashMap<String, LNMRegisterInfo, FnvBuildHasher> = HashMap::default();
        for info in table {
            registers.insert(info.path.as_str().to_owned(), info.clone());
        }
        LNMCatalogue { registers }
    }

    pub fn get(&self, path: &RegisterPath) -> Option<&LNMRegisterInfo> {
        self.registers.get(path.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &LNMRegisterInfo> {
        self.registers.values()
    }
}

impl CatalogueImpl for LNMCatalogue {
    fn has_register(&self, path: &RegisterPath) -> bool {
        self.registers.contains_key(path.as_str())
    }

    fn get_register(&self, path: &RegisterPath) -> Result<Box<dyn RegisterInfo>> {
        self.registers
            .get(path.as_str())
            .map(|info| info.clone_boxed())
            .ok_or_else(|| unknown_register_error(path))
    }

    fn visible_registers(&self) -> Vec<Box<dyn RegisterInfo>> {
        self.registers.values().map(|i| i.clone_boxed()).collect()
    }

    fn clone_impl(&self) -> Box<dyn CatalogueImpl> {
        Box::new(self.clone())
    }
}
