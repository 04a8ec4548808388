//! The boundary to the operating system.
//!
//! The core never touches affinity syscalls itself. Platform crates implement
//! [`AffinityBackend`]; [`SimulatedBackend`] records requests in memory and is used for
//! synthetic layouts and dry runs.

use crate::error::AffinityError;
use crate::mask::Mask;
use crate::topology::CpuLayout;
use log::debug;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::thread::{self, ThreadId};

/// Native affinity operations for the calling thread.
pub trait AffinityBackend: Send + Sync {
    /// The calling thread's current affinity mask.
    fn affinity_mask(&self) -> Result<Mask, AffinityError>;

    /// Restricts the calling thread to the CPUs in `mask`.
    fn set_affinity_mask(&self, mask: &Mask) -> Result<(), AffinityError>;

    /// The CPU the calling thread is running on, or -1 if unknown.
    fn current_cpu_id(&self) -> i32;

    fn current_process_id(&self) -> i32;

    /// The OS thread id of the calling thread, or -1 if unavailable.
    fn current_thread_id(&self) -> i32;

    /// Restricts the calling thread to `bits` within processor group `group_id` and returns
    /// the previous group mask. Only platforms with processor groups implement this.
    fn set_group_affinity(&self, group_id: u32, bits: u64) -> Result<Mask, AffinityError> {
        let _ = (group_id, bits);
        Err(AffinityError::NotSupported)
    }
}

/// Issues the native call matching the mask representation.
pub fn apply_mask(backend: &dyn AffinityBackend, mask: &Mask) -> Result<(), AffinityError> {
    match mask {
        Mask::Group { group_id, bits } => backend.set_group_affinity(*group_id, *bits).map(|_| ()),
        Mask::Bitset(_) => backend.set_affinity_mask(mask),
    }
}

/// In-memory backend. Each thread's mask is remembered and the "current CPU" is the lowest
/// CPU of that mask, so binds always verify as long as the mask is satisfiable.
pub struct SimulatedBackend {
    cpus: usize,
    group_bases: BTreeMap<u32, usize>,
    masks: Mutex<HashMap<ThreadId, Mask>>,
    reject: AtomicBool,
}

impl SimulatedBackend {
    pub fn new(cpus: usize) -> Self {
        Self {
            cpus,
            group_bases: BTreeMap::new(),
            masks: Mutex::new(HashMap::new()),
            reject: AtomicBool::new(false),
        }
    }

    /// Sized for `layout`, including the group offsets needed to resolve group masks.
    pub fn for_layout(layout: &CpuLayout) -> Self {
        let mut backend = Self::new(layout.cpus());
        backend.group_bases = layout.group_bases().clone();
        backend
    }

    /// Makes every subsequent set call fail, as a platform refusing the mask would.
    pub fn reject_requests(&self, reject: bool) {
        self.reject.store(reject, Ordering::SeqCst);
    }

    fn with_masks<R>(&self, f: impl FnOnce(&mut HashMap<ThreadId, Mask>) -> R) -> R {
        let mut masks = self.masks.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut masks)
    }

    fn check_accepting(&self, mask: &Mask) -> Result<(), AffinityError> {
        if self.reject.load(Ordering::SeqCst) {
            return Err(AffinityError::Rejected(mask.to_string()));
        }
        if mask.is_empty() {
            return Err(AffinityError::EmptyMask);
        }
        Ok(())
    }

    fn global_lowest(&self, mask: &Mask) -> Option<usize> {
        let lowest = mask.lowest_set()?;
        match mask {
            Mask::Bitset(_) => Some(lowest),
            Mask::Group { group_id, .. } => self.group_bases.get(group_id).map(|base| base + lowest),
        }
    }
}

impl AffinityBackend for SimulatedBackend {
    fn affinity_mask(&self) -> Result<Mask, AffinityError> {
        let id = thread::current().id();
        Ok(self.with_masks(|masks| masks.get(&id).cloned().unwrap_or_else(|| Mask::full(self.cpus))))
    }

    fn set_affinity_mask(&self, mask: &Mask) -> Result<(), AffinityError> {
        self.check_accepting(mask)?;
        if let Some(cpu) = mask.indices().into_iter().find(|&cpu| cpu >= self.cpus) {
            return Err(AffinityError::InvalidCpu { cpu, max: self.cpus.saturating_sub(1) });
        }
        debug!("simulated affinity for {:?} -> {}", thread::current().id(), mask);
        let id = thread::current().id();
        self.with_masks(|masks| masks.insert(id, mask.clone()));
        Ok(())
    }

    fn current_cpu_id(&self) -> i32 {
        let id = thread::current().id();
        let mask = self.with_masks(|masks| masks.get(&id).cloned());
        match mask {
            Some(mask) => self.global_lowest(&mask).map_or(-1, |cpu| cpu as i32),
            None => 0,
        }
    }

    fn current_process_id(&self) -> i32 {
        std::process::id() as i32
    }

    fn current_thread_id(&self) -> i32 {
        -1
    }

    fn set_group_affinity(&self, group_id: u32, bits: u64) -> Result<Mask, AffinityError> {
        let mask = Mask::group(group_id, bits);
        self.check_accepting(&mask)?;
        if !self.group_bases.contains_key(&group_id) {
            return Err(AffinityError::Rejected(mask.to_string()));
        }
        let id = thread::current().id();
        let previous = self.with_masks(|masks| masks.insert(id, mask));
        Ok(previous.unwrap_or_else(|| Mask::group(group_id, 0)))
    }
}
