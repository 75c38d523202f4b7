//! One push-data source and its subscriber bookkeeping.

use crate::error::{Error, Result};
use crate::transfer::TransferElementId;
use crate::version_number::VersionNumber;
use fnv::FnvBuildHasher;
use hashbrown::HashMap;
use std::cell::Cell;
use std::sync::Mutex;

thread_local! {
    /// Address of the domain whose lock the current thread is holding while
    /// dispatching. Lets a subscriber dropped from inside a dispatch defer
    /// its unsubscription instead of self-deadlocking.
    static HOLDING_DOMAIN_LOCK: Cell<usize> = Cell::new(0);
}

/// Domain-side handle to one subscriber.
pub trait AsyncVariable: Send {
    /// Produces the current value and pushes it with `version`.
    fn fill_and_push(&mut self, version: VersionNumber) -> Result<()>;

    /// Forwards an error into the subscriber's queue.
    fn send_exception(&self, error: &Error);
}

/// Subscriber map of one domain, guarded by the domain lock.
struct AsyncAccessorManager {
    active: bool,
    variables: HashMap<TransferElementId, Box<dyn AsyncVariable>, FnvBuildHasher>,
    last_version: VersionNumber,
    active_exception: Option<Error>,
}

/// One push-data source: an interrupt line or a poll distributor.
///
/// All distributions of a domain are totally ordered; every subscriber of a
/// single `distribute` receives the same fresh `VersionNumber`.
pub struct AsyncDomain {
    manager: Mutex<AsyncAccessorManager>,
    /// Unsubscriptions requested from inside a dispatch; kept outside the
    /// domain lock so the dispatching thread itself may append.
    delayed_unsubscriptions: Mutex<Vec<TransferElementId>>,
}

impl AsyncDomain {
    pub fn new() -> Self {
        AsyncDomain {
            manager: Mutex::new(AsyncAccessorManager {
                active: false,
                variables: HashMap::default(),
                last_version: VersionNumber::BEFORE_EVERYTHING,
                active_exception: None,
            }),
            delayed_unsubscriptions: Mutex::new(Vec::new()),
        }
    }

    fn with_domain_lock<R>(&self, f: impl FnOnce(&mut AsyncAccessorManager) -> R) -> R {
        let mut manager = self.manager.lock().unwrap();
        HOLDING_DOMAIN_LOCK.with(|h| h.set(self as *const _ as usize));
        let result = f(&mut manager);
        HOLDING_DOMAIN_LOCK.with(|h| h.set(0));
        // apply unsubscriptions that were requested from inside the dispatch
        for id in std::mem::take(&mut *self.delayed_unsubscriptions.lock().unwrap()) {
            manager.variables.remove(&id);
        }
        result
    }

    /// Registers a subscriber. If the domain is already active the variable
    /// immediately receives an initial value (or the pending exception).
    pub fn subscribe(&self, id: TransferElementId, mut variable: Box<dyn AsyncVariable>) {
        self.with_domain_lock(|manager| {
            if manager.active {
                let version = VersionNumber::new();
                if let Err(e) = variable.fill_and_push(version) {
                    variable.send_exception(&e);
                } else {
                    manager.last_version = version;
                }
            } else if let Some(e) = &manager.active_exception {
                variable.send_exception(e);
            }
            manager.variables.insert(id, variable);
        });
    }

    /// Removes a subscriber. Safe to call from inside a dispatch on the same
    /// thread; the removal is then deferred until the dispatch completes.
    pub fn unsubscribe(&self, id: TransferElementId) {
        let holding = HOLDING_DOMAIN_LOCK.with(|h| h.get());
        if holding == self as *const _ as usize {
            self.delayed_unsubscriptions.lock().unwrap().push(id);
            return;
        }
        self.with_domain_lock(|manager| {
            manager.variables.remove(&id);
        });
    }

    /// Distributes one update: every subscriber gets the same fresh version.
    /// Returns the first fill error, after all subscribers were attempted.
    pub fn distribute(&self) -> Result<()> {
        self.with_domain_lock(|manager| {
            if !manager.active {
                return Ok(());
            }
            let version = VersionNumber::new();
            let mut first_error = None;
            for variable in manager.variables.values_mut() {
                if let Err(e) = variable.fill_and_push(version) {
                    first_error.get_or_insert(e);
                }
            }
            manager.last_version = version;
            match first_error {
                Some(e) => Err(e),
                None => Ok(()),
            }
        })
    }

    /// Activates the domain and fills initial values for all subscribers.
    pub fn activate(&self) -> Result<()> {
        self.with_domain_lock(|manager| {
            manager.active_exception = None;
            let version = VersionNumber::new();
            let mut first_error = None;
            for variable in manager.variables.values_mut() {
                if let Err(e) = variable.fill_and_push(version) {
                    first_error.get_or_insert(e);
                }
            }
            manager.last_version = version;
            manager.active = true;
            match first_error {
                Some(e) => Err(e),
                None => Ok(()),
            }
        })
    }

    pub fn deactivate(&self) {
        self.with_domain_lock(|manager| manager.active = false);
    }

    /// Deactivates and forwards `error` to every subscriber queue.
    pub fn send_exception(&self, error: Error) {
        self.with_domain_lock(|manager| {
            manager.active = false;
            for variable in manager.variables.values() {
                variable.send_exception(&error);
            }
            manager.active_exception = Some(error);
        });
    }

    pub fn is_active(&self) -> bool {
        self.manager.lock().unwrap().active
    }

    pub fn last_version(&self) -> VersionNumber {
        self.manager.lock().unwrap().last_version
    }

    pub fn n_subscribers(&self) -> usize {
        self.manager.lock().unwrap().variables.len()
    }
}

impl Default for AsyncDomain {
    fn default() -> Self {
        Self::new()
    }
}
