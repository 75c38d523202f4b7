//! In-memory dummy transport, the workhorse for tests.

use super::numeric::NumericAddressedBackend;
use super::RawMemoryPort;
use crate::catalogue::dummy::DummyRegisterCatalogue;
use crate::catalogue::numeric::NumericAddressedRegisterCatalogue;
use crate::error::{Error, Result};
use crate::push::dispatcher::InterruptSource;
use fnv::FnvBuildHasher;
use hashbrown::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

/// Counting interrupt line driven from software.
pub struct ConditionInterruptSource {
    edges: Mutex<u32>,
    arrived: Condvar,
}

impl ConditionInterruptSource {
    pub fn new() -> Self {
        ConditionInterruptSource {
            edges: Mutex::new(0),
            arrived: Condvar::new(),
        }
    }

    pub fn trigger(&self) {
        let mut edges = self.edges.lock().unwrap();
        *edges += 1;
        self.arrived.notify_all();
    }
}

impl Default for ConditionInterruptSource {
    fn default() -> Self {
        Self::new()
    }
}

impl InterruptSource for ConditionInterruptSource {
    fn wait_for_interrupt(&self, timeout: Duration) -> Result<u32> {
        let mut edges = self.edges.lock().unwrap();
        if *edges == 0 && !timeout.is_zero() {
            let (guard, _) = self
                .arrived
                .wait_timeout(edges, timeout)
                .map_err(|_| Error::runtime("interrupt wait failed"))?;
            edges = guard;
        }
        Ok(*edges)
    }

    fn clear_interrupts(&self) -> Result<()> {
        *self.edges.lock().unwrap() = 0;
        Ok(())
    }
}

/// BAR memory held in process memory, plus software-triggered interrupts.
///
/// Forced read/write failures emulate a broken device for recovery tests.
pub struct DummyPort {
    bars: Mutex<HashMap<u64, Vec<i32>, FnvBuildHasher>>,
    sources: HashMap<u32, Arc<ConditionInterruptSource>, FnvBuildHasher>,
    throw_on_read: AtomicBool,
    throw_on_write: AtomicBool,
}

impl DummyPort {
    pub fn new(catalogue: &NumericAddressedRegisterCatalogue) -> Self {
        let mut bars: HashMap<u64, Vec<i32>, FnvBuildHasher> = HashMap::default();
        for (bar, size_bytes) in catalogue.bar_sizes() {
            bars.insert(bar, vec![0; (size_bytes as usize).div_ceil(4)]);
        }
        let mut sources: HashMap<u32, Arc<ConditionInterruptSource>, FnvBuildHasher> =
            HashMap::default();
        for chain in catalogue.list_of_interrupts() {
            if let Some(primary) = chain.first() {
                sources
                    .entry(*primary)
                    .or_insert_with(|| Arc::new(ConditionInterruptSource::new()));
            }
        }
        DummyPort {
            bars: Mutex::new(bars),
            sources,
            throw_on_read: AtomicBool::new(false),
            throw_on_write: AtomicBool::new(false),
        }
    }

    pub fn set_throw_on_read(&self, enabled: bool) {
        self.throw_on_read.store(enabled, Ordering::Relaxed);
    }

    pub fn set_throw_on_write(&self, enabled: bool) {
        self.throw_on_write.store(enabled, Ordering::Relaxed);
    }

    /// Direct test access to BAR memory, bypassing the accessor machinery.
    pub fn peek(&self, bar: u64, address_bytes: u64) -> Result<i32> {
        let bars = self.bars.lock().unwrap();
        let words = bars
            .get(&bar)
            .ok_or_else(|| Error::logic(format!("invalid bar {bar}")))?;
        words
            .get((address_bytes / 4) as usize)
            .copied()
            .ok_or_else(|| Error::logic(format!("address {address_bytes} outside bar {bar}")))
    }

    /// Direct test write into BAR memory.
    pub fn poke(&self, bar: u64, address_bytes: u64, value: i32) -> Result<()> {
        let mut bars = self.bars.lock().unwrap();
        let words = bars
            .get_mut(&bar)
            .ok_or_else(|| Error::logic(format!("invalid bar {bar}")))?;
        let slot = words
            .get_mut((address_bytes / 4) as usize)
            .ok_or_else(|| Error::logic(format!("address {address_bytes} outside bar {bar}")))?;
        *slot = value;
        Ok(())
    }

    fn check_range(words_len: usize, bar: u64, address_bytes: u64, n_words: usize) -> Result<usize> {
        if address_bytes % 4 != 0 {
            return Err(Error::logic(format!(
                "misaligned access at byte {address_bytes} of bar {bar}"
            )));
        }
        let start = (address_bytes / 4) as usize;
        if start + n_words > words_len {
            return Err(Error::logic(format!(
                "access [{start}, {}) words exceeds bar {bar} with {words_len} words",
                start + n_words
            )));
        }
        Ok(start)
    }
}

impl RawMemoryPort for DummyPort {
    fn open_port(&self) -> Result<()> {
        Ok(())
    }

    fn close_port(&self) {}

    fn read_raw(&self, bar: u64, address_bytes: u64, data: &mut [i32]) -> Result<()> {
        if self.throw_on_read.load(Ordering::Relaxed) {
            return Err(Error::runtime("DummyBackend: forced exception on read"));
        }
        let bars = self.bars.lock().unwrap();
        let words = bars
            .get(&bar)
            .ok_or_else(|| Error::logic(format!("invalid bar {bar}")))?;
        let start = Self::check_range(words.len(), bar, address_bytes, data.len())?;
        data.copy_from_slice(&words[start..start + data.len()]);
        Ok(())
    }

    fn write_raw(&self, bar: u64, address_bytes: u64, data: &[i32]) -> Result<()> {
        if self.throw_on_write.load(Ordering::Relaxed) {
            return Err(Error::runtime("DummyBackend: forced exception on write"));
        }
        let mut bars = self.bars.lock().unwrap();
        let words = bars
            .get_mut(&bar)
            .ok_or_else(|| Error::logic(format!("invalid bar {bar}")))?;
        let start = Self::check_range(words.len(), bar, address_bytes, data.len())?;
        words[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn port_info(&self) -> String {
        format!("dummy device with {} bars", self.bars.lock().unwrap().len())
    }

    fn interrupt_source(&self, interrupt: u32) -> Option<Arc<dyn InterruptSource>> {
        self.sources
            .get(&interrupt)
            .map(|s| s.clone() as Arc<dyn InterruptSource>)
    }

    fn trigger_interrupt(&self, interrupt: u32) -> Result<()> {
        let source = self.sources.get(&interrupt).ok_or_else(|| {
            Error::logic(format!("interrupt {interrupt} is not in the interrupt table"))
        })?;
        source.trigger();
        Ok(())
    }
}

/// Builds a complete dummy backend from an already-parsed register map.
pub fn new_dummy_backend(map: NumericAddressedRegisterCatalogue) -> Arc<NumericAddressedBackend> {
    let port = DummyPort::new(&map);
    let catalogue = DummyRegisterCatalogue::new(map);
    NumericAddressedBackend::new(Box::new(catalogue), Box::new(port))
}
