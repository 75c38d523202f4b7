//! Dummy transport whose BAR memory is shared between device instances.
//!
//! A named segment carries the BAR contents and a PID membership set.
//! Physical shared memory is outside this crate, so the segment namespace is
//! process-global; naming, membership bookkeeping and last-member cleanup
//! behave as if the segment were OS-backed.

use super::dummy::ConditionInterruptSource;
use super::numeric::NumericAddressedBackend;
use super::RawMemoryPort;
use crate::catalogue::dummy::DummyRegisterCatalogue;
use crate::catalogue::numeric::NumericAddressedRegisterCatalogue;
use crate::error::{Error, Result};
use crate::push::dispatcher::InterruptSource;
use fnv::FnvBuildHasher;
use hashbrown::HashMap;
use lazy_static::lazy_static;
use std::hash::Hasher;
use std::sync::{Arc, Mutex};

lazy_static! {
    /// The process-global stand-in for the OS shared-memory namespace.
    static ref SHARED_SEGMENTS: spin::Mutex<HashMap<String, Arc<SharedSegment>, FnvBuildHasher>> =
        spin::Mutex::new(HashMap::default());
}

fn fnv_hash(input: &str) -> u64 {
    let mut hasher = fnv::FnvHasher::default();
    hasher.write(input.as_bytes());
    hasher.finish()
}

/// Segment name as mandated for the shared dummy:
/// `ChimeraTK_SharedDummy_<instanceHash>_<mapHash>_<userHash>`.
pub fn segment_name(instance: &str, map_name: &str) -> String {
    let user = std::env::var("USER").unwrap_or_else(|_| "unknown".into());
    format!(
        "ChimeraTK_SharedDummy_{:016x}_{:016x}_{:016x}",
        fnv_hash(instance),
        fnv_hash(map_name),
        fnv_hash(&user)
    )
}

/// One named segment: BAR words plus the membership list.
pub struct SharedSegment {
    name: String,
    bars: Mutex<HashMap<u64, Vec<i32>, FnvBuildHasher>>,
    members: Mutex<Vec<u32>>,
    sources: Mutex<HashMap<u32, Arc<ConditionInterruptSource>, FnvBuildHasher>>,
}

impl SharedSegment {
    fn get_or_create(name: &str, bar_sizes: &HashMap<u64, u64, FnvBuildHasher>) -> Result<Arc<Self>> {
        let mut segments = SHARED_SEGMENTS.lock();
        if let Some(segment) = segments.get(name) {
            let bars = segment.bars.lock().unwrap();
            for (bar, size_bytes) in bar_sizes {
                let words = (*size_bytes as usize).div_ceil(4);
                if bars.get(bar).map(Vec::len) != Some(words) {
                    return Err(Error::runtime(format!(
                        "shared memory segment '{name}' does not match the register map"
                    )));
                }
            }
            return Ok(segment.clone());
        }
        let mut bars: HashMap<u64, Vec<i32>, FnvBuildHasher> = HashMap::default();
        for (bar, size_bytes) in bar_sizes {
            bars.insert(*bar, vec![0; (*size_bytes as usize).div_ceil(4)]);
        }
        let segment = Arc::new(SharedSegment {
            name: name.to_owned(),
            bars: Mutex::new(bars),
            members: Mutex::new(Vec::new()),
            sources: Mutex::new(HashMap::default()),
        });
        segments.insert(name.to_owned(), segment.clone());
        log::debug!("created shared segment '{name}'");
        Ok(segment)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn n_members(&self) -> usize {
        self.members.lock().unwrap().len()
    }

    fn register_member(&self) {
        let mut members = self.members.lock().unwrap();
        // a pid of another process cannot belong to a live member of this
        // in-process registry; treat it as a leftover and purge it
        members.retain(|pid| *pid == std::process::id());
        members.push(std::process::id());
    }

    /// Removes one membership; the last member removes the whole segment.
    fn remove_member(&self) {
        let mut members = self.members.lock().unwrap();
        if let Some(pos) = members.iter().position(|pid| *pid == std::process::id()) {
            members.remove(pos);
        }
        if members.is_empty() {
            SHARED_SEGMENTS.lock().remove(&self.name);
            log::debug!("removed shared segment '{}'", self.name);
        }
    }

    fn source(&self, interrupt: u32) -> Arc<ConditionInterruptSource> {
        self.sources
            .lock()
            .unwrap()
            .entry(interrupt)
            .or_insert_with(|| Arc::new(ConditionInterruptSource::new()))
            .clone()
    }
}

/// Port of one member of a shared segment.
pub struct SharedDummyPort {
    segment: Arc<SharedSegment>,
    interrupts: Vec<u32>,
}

impl SharedDummyPort {
    pub fn new(
        instance: &str,
        map_name: &str,
        catalogue: &NumericAddressedRegisterCatalogue,
    ) -> Result<Self> {
        let name = segment_name(instance, map_name);
        let segment = SharedSegment::get_or_create(&name, &catalogue.bar_sizes())?;
        let interrupts = catalogue
            .list_of_interrupts()
            .iter()
            .filter_map(|chain| chain.first().copied())
            .collect();
        Ok(SharedDummyPort {
            segment,
            interrupts,
        })
    }

    pub fn segment(&self) -> &Arc<SharedSegment> {
        &self.segment
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

impl RawMemoryPort for SharedDummyPort {
    fn open_port(&self) -> Result<()> {
        self.segment.register_member();
        Ok(())
    }

    fn close_port(&self) {
        self.segment.remove_member();
    }

    fn read_raw(&self, bar: u64, address_bytes: u64, data: &mut [i32]) -> Result<()> {
        let bars = self.segment.bars.lock().unwrap();
        let words = bars
            .get(&bar)
            .ok_or_else(|| Error::logic(format!("invalid bar {bar}")))?;
        let start = Self::check_range(words.len(), bar, address_bytes, data.len())?;
        data.copy_from_slice(&words[start..start + data.len()]);
        Ok(())
    }

    fn write_raw(&self, bar: u64, address_bytes: u64, data: &[i32]) -> Result<()> {
        let mut bars = self.segment.bars.lock().unwrap();
        let words = bars
            .get_mut(&bar)
            .ok_or_else(|| Error::logic(format!("invalid bar {bar}")))?;
        let start = Self::check_range(words.len(), bar, address_bytes, data.len())?;
        words[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn port_info(&self) -> String {
        format!("shared dummy on segment '{}'", self.segment.name())
    }

    fn interrupt_source(&self, interrupt: u32) -> Option<Arc<dyn InterruptSource>> {
        if !self.interrupts.contains(&interrupt) {
            return None;
        }
        Some(self.segment.source(interrupt) as Arc<dyn InterruptSource>)
    }

    fn trigger_interrupt(&self, interrupt: u32) -> Result<()> {
        if !self.interrupts.contains(&interrupt) {
            return Err(Error::logic(format!(
                "interrupt {interrupt} is not in the interrupt table"
            )));
        }
        self.segment.source(interrupt).trigger();
        Ok(())
    }
}

/// Builds a shared-dummy backend; instances created with the same address
/// and map share their BAR memory and interrupt lines.
pub fn new_shared_dummy_backend(
    instance: &str,
    map_name: &str,
    map: NumericAddressedRegisterCatalogue,
) -> Result<Arc<NumericAddressedBackend>> {
    let port = SharedDummyPort::new(instance, map_name, &map)?;
    let catalogue = DummyRegisterCatalogue::new(map);
    Ok(NumericAddressedBackend::new(
        Box::new(catalogue),
        Box::new(port),
    ))
}
