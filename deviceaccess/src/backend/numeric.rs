//! The numeric-addressed backend shared by the dummy, shared-dummy and Rebot
//! transports.

use super::{AccessorRequest, BackendState, DeviceBackend, RawMemoryPort};
use crate::access_mode::AccessMode;
use crate::accessor::async_push::AsyncNDRegisterAccessor;
use crate::accessor::muxed::NumericMuxedAccessor;
use crate::accessor::numeric::{NumericAccessor, NumericTransferElement};
use crate::accessor::trigger::DummyInterruptTriggerAccessor;
use crate::accessor::{AnyAccessor, NDRegisterAccessor};
use crate::catalogue::dummy::DUMMY_INTERRUPT_PREFIX;
use crate::catalogue::numeric::{NumericAddressedRegisterInfo, RegisterAccess};
use crate::catalogue::{CatalogueImpl, RegisterCatalogue};
use crate::data_types::{DataType, UserType};
use crate::error::{Error, Result};
use crate::for_each_user_type;
use crate::push::dispatcher::InterruptDispatcher;
use crate::push::domain::AsyncDomain;
use crate::push::variable::{PollingAsyncVariable, PushChannel};
use crate::register_path::RegisterPath;
use crate::transfer::exception_handling::ExceptionHandlingDecorator;
use crate::transfer::TransferElement;
use fnv::FnvBuildHasher;
use hashbrown::HashMap;
use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;

const SUBSCRIPTION_READY_TIMEOUT: Duration = Duration::from_secs(5);

/// Backend for register maps addressed by BAR and byte offset.
///
/// The physical transport is a [`RawMemoryPort`]; everything above it —
/// catalogue resolution, accessor construction, fault handling, recovery
/// replay and interrupt distribution — is shared here.
pub struct NumericAddressedBackend {
    state: BackendState,
    catalogue_impl: Box<dyn CatalogueImpl>,
    port: Box<dyn RawMemoryPort>,
    domains: Mutex<HashMap<u32, Arc<AsyncDomain>, FnvBuildHasher>>,
    dispatchers: Mutex<HashMap<u32, InterruptDispatcher, FnvBuildHasher>>,
}

impl NumericAddressedBackend {
    pub fn new(catalogue_impl: Box<dyn CatalogueImpl>, port: Box<dyn RawMemoryPort>) -> Arc<Self> {
        Arc::new(NumericAddressedBackend {
            state: BackendState::new(),
            catalogue_impl,
            port,
            domains: Mutex::new(HashMap::default()),
            dispatchers: Mutex::new(HashMap::default()),
        })
    }

    pub fn state(&self) -> &BackendState {
        &self.state
    }

    pub fn port(&self) -> &dyn RawMemoryPort {
        &*self.port
    }

    pub fn minimum_transfer_alignment(&self, bar: u64) -> usize {
        self.port.minimum_transfer_alignment(bar)
    }

    pub fn read_raw(&self, bar: u64, address_bytes: u64, data: &mut [i32]) -> Result<()> {
        self.port.read_raw(bar, address_bytes, data)
    }

    pub fn write_raw(&self, bar: u64, address_bytes: u64, data: &[i32]) -> Result<()> {
        self.port.write_raw(bar, address_bytes, data)
    }

    /// Marks the backend faulted and notifies every async domain. The first
    /// caller wins; later runtime errors are reported unchanged.
    pub fn set_exception(&self, error: &Error) {
        if self.state.set_exception(error.clone()) {
            for domain in self.domains.lock().unwrap().values() {
                domain.send_exception(error.clone());
            }
        }
    }

    /// Software-triggers a primary interrupt (dummy transports).
    pub fn trigger_interrupt(&self, interrupt: u32) -> Result<()> {
        self.port.trigger_interrupt(interrupt)
    }

    fn get_or_create_domain(&self, interrupt: u32) -> Arc<AsyncDomain> {
        self.domains
            .lock()
            .unwrap()
            .entry(interrupt)
            .or_insert_with(|| Arc::new(AsyncDomain::new()))
            .clone()
    }

    /// Starts the dispatcher thread for `interrupt` if it is not running and
    /// activates the domain once the initial edge clearing is done.
    fn ensure_dispatcher(&self, interrupt: u32, domain: &Arc<AsyncDomain>) -> Result<()> {
        {
            let mut dispatchers = self.dispatchers.lock().unwrap();
            if !dispatchers.contains_key(&interrupt) {
                let source = self.port.interrupt_source(interrupt).ok_or_else(|| {
                    Error::logic(format!(
                        "this backend has no interrupt source for interrupt {interrupt}"
                    ))
                })?;
                let (ready_tx, ready_rx) = mpsc::channel();
                let dispatcher =
                    InterruptDispatcher::spawn(interrupt, source, domain.clone(), ready_tx);
                ready_rx
                    .recv_timeout(SUBSCRIPTION_READY_TIMEOUT)
                    .map_err(|_| Error::runtime("interrupt subscription timed out"))?;
                dispatchers.insert(interrupt, dispatcher);
            }
        }
        if !domain.is_active() {
            domain.activate().map_err(|e| {
                if e.is_runtime() {
                    self.set_exception(&e);
                }
                e
            })?;
        }
        Ok(())
    }

    fn numeric_register_info(&self, path: &RegisterPath) -> Result<NumericAddressedRegisterInfo> {
        let info = self.catalogue_impl.get_register(path)?;
        info.downcast::<NumericAddressedRegisterInfo>()
            .map(|boxed| *boxed)
            .map_err(|_| {
                Error::logic(format!(
                    "register '{path}' is not a numeric-addressed register"
                ))
            })
    }

    fn build_typed<T: UserType>(
        self: &Arc<Self>,
        request: &AccessorRequest,
    ) -> Result<Box<dyn NDRegisterAccessor<T>>> {
        let info = self.numeric_register_info(&request.path)?;

        // interrupt trigger registers have no storage behind them
        if info.n_bytes == 0 && info.access == RegisterAccess::WriteOnly {
            let interrupt = parse_trigger_interrupt(&info.path)?;
            return Ok(Box::new(DummyInterruptTriggerAccessor::<T>::new(
                self.clone(),
                info.path.clone(),
                interrupt,
                request.n_elements,
                request.element_offset,
                request.flags,
            )?));
        }

        if request.flags.contains(AccessMode::WAIT_FOR_NEW_DATA) {
            return self.build_push_accessor(request, info);
        }

        let target: Box<dyn NumericTransferElement<T>> = if info.is_multiplexed() {
            Box::new(NumericMuxedAccessor::new(
                self.clone(),
                info,
                request.n_elements,
                request.element_offset,
                request.flags,
            )?)
        } else {
            Box::new(NumericAccessor::new(
                self.clone(),
                info,
                request.n_elements,
                request.element_offset,
                request.flags,
            )?)
        };
        Ok(Box::new(ExceptionHandlingDecorator::new(target, self.clone())))
    }

    fn build_push_accessor<T: UserType>(
        self: &Arc<Self>,
        request: &AccessorRequest,
        info: NumericAddressedRegisterInfo,
    ) -> Result<Box<dyn NDRegisterAccessor<T>>> {
        if info.access != RegisterAccess::Interrupt {
            return Err(Error::logic(format!(
                "register '{}' does not support AccessMode::WAIT_FOR_NEW_DATA",
                info.path
            )));
        }
        if request.flags.contains(AccessMode::RAW) {
            return Err(Error::logic(
                "raw mode cannot be combined with wait_for_new_data",
            ));
        }
        let interrupt = info.interrupt_id[0];
        let domain = self.get_or_create_domain(interrupt);

        let poller: Box<dyn NDRegisterAccessor<T>> = if info.is_multiplexed() {
            Box::new(NumericMuxedAccessor::new(
                self.clone(),
                info.clone(),
                request.n_elements,
                request.element_offset,
                AccessMode::empty(),
            )?)
        } else {
            Box::new(NumericAccessor::new(
                self.clone(),
                info.clone(),
                request.n_elements,
                request.element_offset,
                AccessMode::empty(),
            )?)
        };
        let (n_channels, n_samples) = (poller.n_channels(), poller.n_samples());

        let channel = Arc::new(PushChannel::new());
        let accessor = AsyncNDRegisterAccessor::new(
            info.path.clone(),
            self.clone() as Arc<dyn DeviceBackend>,
            &domain,
            channel.clone(),
            n_channels,
            n_samples,
            request.flags,
        );
        domain.subscribe(
            accessor.id(),
            Box::new(PollingAsyncVariable::new(poller, channel)),
        );
        if self.is_open() {
            self.ensure_dispatcher(interrupt, &domain)?;
        }
        Ok(Box::new(accessor))
    }
}

impl DeviceBackend for NumericAddressedBackend {
    fn open(&self) -> Result<()> {
        self.port.open_port()?;

        // replay last-intended writes of the previous session, in order
        self.state.prune_recovery();
        for helper in self.state.recovery_replay_list() {
            if let Some(snapshot) = helper.snapshot() {
                log::info!(
                    "recovery: replaying write of accessor {} ({} words)",
                    helper.id(),
                    snapshot.words.len()
                );
                self.port
                    .write_raw(snapshot.bar, snapshot.address_bytes, &snapshot.words)?;
            }
        }

        self.state.clear_exception();
        self.state.set_open(true);

        // restart dispatchers and push fresh initial values to subscribers
        let domains: Vec<(u32, Arc<AsyncDomain>)> = self
            .domains
            .lock()
            .unwrap()
            .iter()
            .map(|(k, v)| (*k, v.clone()))
            .collect();
        for (interrupt, domain) in domains {
            if domain.n_subscribers() > 0 {
                self.ensure_dispatcher(interrupt, &domain)?;
            }
        }

        log::debug!("backend opened: {}", self.port.port_info());
        Ok(())
    }

    fn close(&self) {
        self.state.set_open(false);
        self.dispatchers.lock().unwrap().clear();
        for domain in self.domains.lock().unwrap().values() {
            domain.send_exception(Error::runtime("device closed"));
        }
        self.port.close_port();
        log::debug!("backend closed: {}", self.port.port_info());
    }

    fn is_open(&self) -> bool {
        self.state.is_open()
    }

    fn is_functional(&self) -> bool {
        self.state.is_open() && !self.state.has_active_exception()
    }

    fn catalogue(&self) -> RegisterCatalogue {
        RegisterCatalogue::new(self.catalogue_impl.clone_impl())
    }

    fn device_info(&self) -> String {
        self.port.port_info()
    }

    fn make_accessor(
        &self,
        self_ref: &Arc<dyn DeviceBackend>,
        request: &AccessorRequest,
    ) -> Result<AnyAccessor> {
        let me = self_ref
            .clone()
            .downcast_arc::<NumericAddressedBackend>()
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

impl Drop for NumericAddressedBackend {
    fn drop(&mut self) {
        // joins dispatcher threads via the InterruptDispatcher drops
        self.dispatchers.get_mut().unwrap().clear();
    }
}

fn parse_trigger_interrupt(path: &RegisterPath) -> Result<u32> {
    path.as_str()
        .strip_prefix(DUMMY_INTERRUPT_PREFIX)
        .and_then(|digits| digits.parse().ok())
        .ok_or_else(|| {
            Error::logic(format!(
                "register '{path}' is not an interrupt trigger register"
            ))
        })
}
