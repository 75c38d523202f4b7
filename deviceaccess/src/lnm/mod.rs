//! Logical name mapping: a backend composing virtual registers from targets.

pub mod accessors;
pub mod info;
pub mod plugins;
pub mod variable;

use crate::access_mode::AccessMode;
use crate::accessor::{AccessorConv, AnyAccessor, NDRegisterAccessor};
use crate::backend::registry::DeviceRegistry;
use crate::backend::{AccessorRequest, BackendState, DeviceBackend};
use crate::catalogue::RegisterCatalogue;
use crate::data_types::{DataType, DataValidity};
use crate::error::{Error, Result};
use crate::for_each_user_type;
use crate::register_path::RegisterPath;
use crate::transfer::TransferElement;
use accessors::{BitAccessor, ChannelAccessor, ForwardingAccessor, VariableAccessor};
use fnv::FnvBuildHasher;
use hashbrown::HashMap;
use info::{LNMCatalogue, LNMRegisterInfo, TargetType};
use plugins::{
    AccessorPlugin, ForceReadOnlyPlugin, MathPlugin, MultiplierPlugin, PluginDecorator,
};
use std::sync::{Arc, Mutex};
use variable::{AnyVec, AnyVecConv, LNMVariable};

/// One math plugin that must be re-evaluated when a parameter variable
/// changes; the result is written to the plugin's target register.
struct MathDependency {
    plugin: Arc<MathPlugin>,
    target_backend: Arc<dyn DeviceBackend>,
    target_path: RegisterPath,
    first_index: usize,
    length: usize,
    writer: Mutex<Option<Box<dyn NDRegisterAccessor<f64>>>>,
}

/// Backend whose catalogue maps virtual paths onto five target kinds.
pub struct LogicalNameMappingBackend {
    state: BackendState,
    catalogue: LNMCatalogue,
    targets: HashMap<String, Arc<dyn DeviceBackend>, FnvBuildHasher>,
    variables: HashMap<String, Arc<LNMVariable>, FnvBuildHasher>,
    /// Per-register locks serialising BIT read-modify-write cycles.
    register_locks: Mutex<HashMap<String, Arc<Mutex<()>>, FnvBuildHasher>>,
    plugin_chains: Mutex<HashMap<String, Vec<Arc<dyn AccessorPlugin>>, FnvBuildHasher>>,
    math_deps: Mutex<HashMap<String, Vec<Arc<MathDependency>>, FnvBuildHasher>>,
}

impl LogicalNameMappingBackend {
    /// Builds the backend from a parsed logical name map, resolving target
    /// device aliases through the registry.
    pub fn create(
        registry: &DeviceRegistry,
        table: &[LNMRegisterInfo],
    ) -> Result<Arc<dyn DeviceBackend>> {
        let mut targets: HashMap<String, Arc<dyn DeviceBackend>, FnvBuildHasher> =
            HashMap::default();
        let mut variables: HashMap<String, Arc<LNMVariable>, FnvBuildHasher> = HashMap::default();

        for info in table {
            match info.target_type {
                TargetType::Register | TargetType::Channel | TargetType::Bit => {
                    let alias = info.target_device.as_ref().ok_or_else(|| {
                        Error::logic(format!("register '{}': no target device", info.path))
                    })?;
                    if !targets.contains_key(alias) {
                        targets.insert(alias.clone(), registry.get_backend(alias)?);
                    }
                    if info.target_register.is_none() {
                        return Err(Error::logic(format!(
                            "register '{}': no target register",
                            info.path
                        )));
                    }
                }
                TargetType::Constant | TargetType::Variable => {
                    let initial = AnyVec::from_strings(info.value_type, &info.values);
                    if initial.is_empty() {
                        return Err(Error::logic(format!(
                            "register '{}': constant or variable without a value",
                            info.path
                        )));
                    }
                    variables.insert(
                        info.path.as_str().to_owned(),
                        Arc::new(LNMVariable::new(
                            info.value_type,
                            info.target_type == TargetType::Constant,
                            initial,
                        )),
                    );
                }
            }
        }

        let backend = Arc::new(LogicalNameMappingBackend {
            state: BackendState::new(),
            catalogue: LNMCatalogue::from_table(table),
            targets,
            variables,
            register_locks: Mutex::new(HashMap::default()),
            plugin_chains: Mutex::new(HashMap::default()),
            math_deps: Mutex::new(HashMap::default()),
        });
        backend.build_plugin_chains(table)?;
        Ok(backend)
    }

    fn build_plugin_chains(self: &Arc<Self>, table: &[LNMRegisterInfo]) -> Result<()> {
        let weak = Arc::downgrade(self);
        for info in table {
            if info.plugins.is_empty() {
                continue;
            }
            let mut chain: Vec<Arc<dyn AccessorPlugin>> = Vec::with_capacity(info.plugins.len());
            for spec in &info.plugins {
                match spec.name.as_str() {
                    "multiplier" => chain.push(Arc::new(MultiplierPlugin::from_spec(spec)?)),
                    "forceReadOnly" => chain.push(Arc::new(ForceReadOnlyPlugin)),
                    "math" => {
                        let plugin = MathPlugin::from_spec(spec, &weak)?;
                        self.register_math_dependencies(info, &plugin)?;
                        chain.push(plugin as Arc<dyn AccessorPlugin>);
                    }
                    other => {
                        return Err(Error::logic(format!("unknown accessor plugin '{other}'")));
                    }
                }
            }
            self.plugin_chains
                .lock()
                .unwrap()
                .insert(info.path.as_str().to_owned(), chain);
        }
        Ok(())
    }

    fn register_math_dependencies(
        &self,
        info: &LNMRegisterInfo,
        plugin: &Arc<MathPlugin>,
    ) -> Result<()> {
        if plugin.parameters().is_empty() {
            return Ok(());
        }
        if info.target_type != TargetType::Register {
            return Err(Error::logic(format!(
                "register '{}': the math plugin with parameters requires a REGISTER target",
                info.path
            )));
        }
        let alias = info.target_device.as_ref().unwrap();
        let dependency = Arc::new(MathDependency {
            plugin: plugin.clone(),
            target_backend: self.targets[alias.as_str()].clone(),
            target_path: info.target_register.clone().unwrap(),
            first_index: info.first_index,
            length: info.length,
            writer: Mutex::new(None),
        });
        let mut deps = self.math_deps.lock().unwrap();
        for parameter in plugin.parameters() {
            let variable_path = RegisterPath::new(parameter);
            if !self.variables.contains_key(variable_path.as_str()) {
                return Err(Error::logic(format!(
                    "register '{}': math parameter '{parameter}' is not a VARIABLE",
                    info.path
                )));
            }
            deps.entry(variable_path.as_str().to_owned())
                .or_default()
                .push(dependency.clone());
        }
        Ok(())
    }

    pub(crate) fn is_open_flag(&self) -> bool {
        self.state.is_open()
    }

    /// Scalar view of one VARIABLE, for formula evaluation.
    pub(crate) fn variable_as_f64(&self, name: &str) -> Option<f64> {
        let path = RegisterPath::new(name);
        let variable = self.variables.get(path.as_str())?;
        let (value, _, _) = variable.read_latest();
        value.to_f64_vec().first().copied()
    }

    /// Current validity of one VARIABLE; unknown variables count as faulty.
    pub(crate) fn variable_validity(&self, name: &str) -> DataValidity {
        let path = RegisterPath::new(name);
        match self.variables.get(path.as_str()) {
            Some(variable) => variable.read_latest().1,
            None => DataValidity::Faulty,
        }
    }

    /// Called after a VARIABLE write: re-evaluates dependent math formulas
    /// and writes their results to the target registers.
    pub(crate) fn variable_written(&self, variable_path: &RegisterPath) {
        let dependencies = match self
            .math_deps
            .lock()
            .unwrap()
            .get(variable_path.as_str())
        {
            Some(deps) => deps.clone(),
            None => return,
        };
        for dependency in dependencies {
            if let Err(e) = self.fire_math_dependency(&dependency) {
                log::warn!(
                    "re-evaluation of math formula on '{}' failed: {e}",
                    dependency.target_path
                );
            }
        }
    }

    fn fire_math_dependency(&self, dependency: &MathDependency) -> Result<()> {
        // fires only once the decorated accessor was written and every
        // parameter carries a value
        let Some(x) = dependency.plugin.last_written() else {
            return Ok(());
        };
        for parameter in dependency.plugin.parameters() {
            let path = RegisterPath::new(parameter);
            let ready = self
                .variables
                .get(path.as_str())
                .is_some_and(|v| v.has_value());
            if !ready {
                return Ok(());
            }
        }
        let result = dependency.plugin.evaluate(&x)?;

        let mut writer = dependency.writer.lock().unwrap();
        if writer.is_none() {
            let mut request = AccessorRequest::new(
                dependency.target_path.clone(),
                DataType::Float64,
            );
            request.n_elements = dependency.length;
            request.element_offset = dependency.first_index;
            let any = dependency
                .target_backend
                .make_accessor(&dependency.target_backend, &request)?;
            let accessor = <f64 as AccessorConv>::unwrap_accessor(any)
                .ok_or_else(|| Error::logic("accessor type dispatch failure"))?;
            *writer = Some(accessor);
        }
        let accessor = writer.as_mut().unwrap();
        accessor.buffer_mut()[0].clone_from_slice(&result);
        accessor.write()?;
        Ok(())
    }

    fn register_lock(&self, key: &str) -> Arc<Mutex<()>> {
        self.register_locks
            .lock()
            .unwrap()
            .entry(key.to_owned())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn target_of(&self, info: &LNMRegisterInfo) -> Result<(Arc<dyn DeviceBackend>, RegisterPath)> {
        let alias = info.target_device.as_ref().ok_or_else(|| {
            Error::logic(format!("register '{}': no target device", info.path))
        })?;
        let backend = self.targets.get(alias.as_str()).ok_or_else(|| {
            Error::logic(format!("target device '{alias}' was not resolved"))
        })?;
        Ok((backend.clone(), info.target_register.clone().unwrap()))
    }

    fn build_typed<T: AccessorConv + AnyVecConv>(
        self: &Arc<Self>,
        request: &AccessorRequest,
    ) -> Result<Box<dyn NDRegisterAccessor<T>>> {
        let info = self
            .catalogue
            .get(&request.path)
            .ok_or_else(|| {
                Error::logic(format!(
                    "Register '{}' was not found in the catalogue",
                    request.path
                ))
            })?
            .clone();

        if request.flags.contains(AccessMode::RAW) {
            return Err(Error::logic(
                "raw mode is not available through the logical name mapping",
            ));
        }

        let base: Box<dyn NDRegisterAccessor<T>> = match info.target_type {
            TargetType::Register => {
                let (backend, target_path) = self.target_of(&info)?;
                let mut target_request = AccessorRequest::new(target_path, T::DATA_TYPE);
                target_request.flags = request.flags;
                target_request.element_offset = info.first_index + request.element_offset;
                let window_error = || {
                    Error::logic(format!(
                        "requested window exceeds logical register '{}'",
                        info.path
                    ))
                };
                target_request.n_elements = if request.n_elements != 0 {
                    if info.length != 0 && request.element_offset + request.n_elements > info.length
                    {
                        return Err(window_error());
                    }
                    request.n_elements
                } else if info.length != 0 {
                    if request.element_offset >= info.length {
                        return Err(window_error());
                    }
                    info.length - request.element_offset
                } else {
                    0
                };
                let any = backend.make_accessor(&backend, &target_request)?;
                let target = T::unwrap_accessor(any)
                    .ok_or_else(|| Error::logic("accessor type dispatch failure"))?;
                Box::new(ForwardingAccessor::new(info.path.clone(), target))
            }
            TargetType::Channel => {
                request.flags.check_for_unknown_flags(AccessMode::empty())?;
                let (backend, target_path) = self.target_of(&info)?;
                let target_request = AccessorRequest::new(target_path, T::DATA_TYPE);
                let any = backend.make_accessor(&backend, &target_request)?;
                let target = T::unwrap_accessor(any)
                    .ok_or_else(|| Error::logic("accessor type dispatch failure"))?;
                Box::new(ChannelAccessor::new(
                    info.path.clone(),
                    target,
                    info.channel,
                )?)
            }
            TargetType::Bit => {
                request.flags.check_for_unknown_flags(AccessMode::empty())?;
                let (backend, target_path) = self.target_of(&info)?;
                let target_request = AccessorRequest::new(target_path.clone(), DataType::Int64);
                let any = backend.make_accessor(&backend, &target_request)?;
                let target = <i64 as AccessorConv>::unwrap_accessor(any)
                    .ok_or_else(|| Error::logic("accessor type dispatch failure"))?;
                let alias = info.target_device.clone().unwrap_or_default();
                let lock = self.register_lock(&format!("{alias}:{target_path}"));
                Box::new(BitAccessor::new(info.path.clone(), target, info.bit, lock)?)
            }
            TargetType::Constant | TargetType::Variable => {
                let variable = self
                    .variables
                    .get(info.path.as_str())
                    .expect("catalogue and variable table are built together")
                    .clone();
                Box::new(VariableAccessor::new(
                    info.path.clone(),
                    self,
                    variable,
                    request.flags,
                )?)
            }
        };

        let chains = self.plugin_chains.lock().unwrap();
        if let Some(chain) = chains.get(info.path.as_str()) {
            if !chain.is_empty() {
                return Ok(Box::new(PluginDecorator::new(base, chain.clone())));
            }
        }
        Ok(base)
    }
}

impl DeviceBackend for LogicalNameMappingBackend {
    fn open(&self) -> Result<()> {
        for target in self.targets.values() {
            target.open()?;
        }
        self.state.clear_exception();
        self.state.set_open(true);
        log::debug!("logical name mapping backend opened");
        Ok(())
    }

    fn close(&self) {
        self.state.set_open(false);
        for variable in self.variables.values() {
            variable.send_exception(&Error::runtime("device closed"));
        }
        for target in self.targets.values() {
            target.close();
        }
        log::debug!("logical name mapping backend closed");
    }

    fn is_open(&self) -> bool {
        self.state.is_open()
    }

    fn is_functional(&self) -> bool {
        self.state.is_open() && self.targets.values().all(|t| t.is_functional())
    }

    fn catalogue(&self) -> RegisterCatalogue {
        RegisterCatalogue::new(Box::new(self.catalogue.clone()))
    }

    fn device_info(&self) -> String {
        format!(
            "logical name mapping over {} target device(s)",
            self.targets.len()
        )
    }

    fn make_accessor(
        &self,
        self_ref: &Arc<dyn DeviceBackend>,
        request: &AccessorRequest,
    ) -> Result<AnyAccessor> {
        let me = self_ref
            .clone()
            .downcast_arc::<LogicalNameMappingBackend>()
            .map_err(|_| Error::logic("backend self reference has the wrong type"))?;

        macro_rules! dispatch {
            ($t:ty, $variant:ident) => {
                if request.data_type == DataType::$variant {
                    return Ok(AnyAccessor::$variant(me.build_typed::<$t>(request)?));
                }
            };
        }
        for_each_user_type!(dispatch);
        unreachable!("the user-type set is closed");
    }
}
