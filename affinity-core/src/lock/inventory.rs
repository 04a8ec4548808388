use super::strategy::AffinityStrategy;
use crate::backend::{apply_mask, AffinityBackend};
use crate::config::AffinityConfig;
use crate::error::LockError;
use crate::thread::ThreadHandle;
use crate::topology::CpuLayout;
use log::{debug, info, trace, warn};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Reservation state of one logical CPU.
#[derive(Debug, Clone)]
pub struct AffinityLock {
    cpu_id: i32,
    base: bool,
    reservable: bool,
    assigned: Option<ThreadHandle>,
    bound: bool,
}

impl AffinityLock {
    fn new(cpu_id: i32, base: bool, reservable: bool) -> Self {
        Self { cpu_id, base, reservable, assigned: None, bound: false }
    }

    pub fn cpu_id(&self) -> i32 {
        self.cpu_id
    }

    pub fn is_base(&self) -> bool {
        self.base
    }

    pub fn is_reservable(&self) -> bool {
        self.reservable
    }

    /// The owner has been pinned natively, not just handed the reservation.
    pub fn is_bound(&self) -> bool {
        self.bound
    }

    pub fn assigned_thread(&self) -> Option<&ThreadHandle> {
        self.assigned.as_ref()
    }

    /// Reservable and either free or held by a thread that has exited.
    fn can_reserve(&self) -> bool {
        self.reservable && self.assigned.as_ref().map_or(true, |t| !t.is_alive())
    }

    fn clear(&mut self) {
        self.assigned = None;
        self.bound = false;
    }
}

impl fmt::Display for AffinityLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.assigned {
            Some(thread) => write!(f, "{thread} alive={}", thread.is_alive()),
            None if self.reservable => f.write_str("Reserved for this application"),
            None if self.base => f.write_str("General use CPU"),
            None => f.write_str("CPU not available"),
        }
    }
}

/// What an acquire call hands back. A handle with cpu id -1 means nothing was reserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockHandle {
    cpu_id: i32,
    whole_core: bool,
}

impl LockHandle {
    pub const NONE: LockHandle = LockHandle { cpu_id: -1, whole_core: false };

    pub fn cpu_id(&self) -> i32 {
        self.cpu_id
    }

    pub fn is_allocated(&self) -> bool {
        self.cpu_id >= 0
    }

    /// The handle reserved every sibling of its physical core.
    pub fn is_whole_core(&self) -> bool {
        self.whole_core
    }
}

struct InventoryState {
    layout: Arc<CpuLayout>,
    config: AffinityConfig,
    logical: Vec<AffinityLock>,
    /// Physical core id to its logical CPUs, in thread id order.
    physical: BTreeMap<u32, Vec<usize>>,
}

impl InventoryState {
    fn build(layout: Arc<CpuLayout>, config: AffinityConfig) -> Self {
        let mut logical = Vec::with_capacity(layout.cpus());
        let mut physical: BTreeMap<u32, Vec<usize>> = BTreeMap::new();
        for cpu in 0..layout.cpus() {
            let base = config.is_base(cpu);
            let reservable = config.is_reservable(cpu);
            trace!("cpu {cpu} base={base} reservable={reservable}");
            logical.push(AffinityLock::new(cpu as i32, base, reservable));
            physical.entry(layout.physical_core(cpu)).or_default().push(cpu);
        }
        for siblings in physical.values_mut() {
            siblings.sort_by_key(|&cpu| layout.thread_id(cpu));
        }
        Self { layout, config, logical, physical }
    }

    fn avoids(&self, strategy: AffinityStrategy, avoid: &[i32], cpu: usize) -> bool {
        let cpus = self.logical.len();
        avoid
            .iter()
            .filter(|&&id| id >= 0 && (id as usize) < cpus)
            .all(|&id| strategy.matches(&self.layout, id as usize, cpu))
    }
}

/// One lock per logical CPU, grouped by physical core.
///
/// Every operation runs under a single inventory-wide mutex, so the check for a free lock
/// and its assignment never interleave with another thread's.
pub struct LockInventory {
    state: Mutex<InventoryState>,
    backend: Arc<dyn AffinityBackend>,
}

impl LockInventory {
    pub fn new(layout: Arc<CpuLayout>, config: AffinityConfig, backend: Arc<dyn AffinityBackend>) -> Self {
        Self { state: Mutex::new(InventoryState::build(layout, config)), backend }
    }

    fn lock_state(&self) -> MutexGuard<'_, InventoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn layout(&self) -> Arc<CpuLayout> {
        Arc::clone(&self.lock_state().layout)
    }

    pub fn config(&self) -> AffinityConfig {
        self.lock_state().config.clone()
    }

    /// Installs `layout`, rebuilding every lock when it differs from the current one.
    /// Outstanding assignments are dropped, not migrated.
    pub fn set(&self, layout: Arc<CpuLayout>) {
        let mut state = self.lock_state();
        if *state.layout == *layout {
            return;
        }
        info!("rebuilding lock inventory for {} cpus", layout.cpus());
        let config = state.config.clone();
        *state = InventoryState::build(layout, config);
    }

    /// Reserves one logical CPU for the calling thread.
    ///
    /// # Logic
    /// 1. For each entry of `strategies` in order, scans from the highest CPU down to CPU 1
    ///    for a reservable lock that is free (or held by a dead thread) and matches that
    ///    strategy against every CPU in `avoid`.
    /// 2. Falls back to any reservable CPU, then to [`LockHandle::NONE`].
    ///
    /// An empty `strategies` slice behaves like `[AffinityStrategy::Any]`. With `bind` false
    /// the CPU is only reserved; [`bind_lock`](Self::bind_lock) binds it later.
    pub fn acquire_lock(&self, bind: bool, strategies: &[AffinityStrategy], avoid: &[i32]) -> LockHandle {
        let mut state = self.lock_state();
        self.acquire_locked(&mut state, bind, strategies, avoid)
    }

    fn acquire_locked(
        &self,
        state: &mut InventoryState,
        bind: bool,
        strategies: &[AffinityStrategy],
        avoid: &[i32],
    ) -> LockHandle {
        let cpus = state.logical.len();
        let found = strategies
            .iter()
            .find_map(|&strategy| {
                (1..cpus)
                    .rev()
                    .find(|&cpu| state.logical[cpu].can_reserve() && state.avoids(strategy, avoid, cpu))
            })
            .or_else(|| (1..cpus).rev().find(|&cpu| state.logical[cpu].can_reserve()));
        match found {
            Some(cpu) => {
                self.assign(state, cpu, bind);
                LockHandle { cpu_id: cpu as i32, whole_core: false }
            }
            None => {
                warn!("no reservable CPU for {}", ThreadHandle::current());
                LockHandle::NONE
            }
        }
    }

    /// Reserves a whole physical core.
    ///
    /// # Logic
    /// 1. For each entry of `strategies` in order, scans cores from the highest id down and
    ///    takes the first whose siblings are all reservable, free and matching that strategy
    ///    against `avoid`.
    /// 2. Every sibling is assigned to the caller; only the first sibling is bound natively.
    /// 3. When no core qualifies, falls back to [`acquire_lock`](Self::acquire_lock).
    pub fn acquire_core(&self, bind: bool, strategies: &[AffinityStrategy], avoid: &[i32]) -> LockHandle {
        let mut state = self.lock_state();
        let view: &InventoryState = &state;
        let found = strategies
            .iter()
            .copied()
            .chain(strategies.is_empty().then_some(AffinityStrategy::Any))
            .find_map(|strategy| {
                view.physical.iter().rev().find(|(_, siblings)| {
                    siblings
                        .iter()
                        .all(|&cpu| view.logical[cpu].can_reserve() && view.avoids(strategy, avoid, cpu))
                })
            })
            .map(|(core, siblings)| (*core, siblings.clone()));

        let Some((core, siblings)) = found else {
            warn!("no reservable core for {}", ThreadHandle::current());
            return self.acquire_locked(&mut state, bind, strategies, avoid);
        };

        let thread = ThreadHandle::current();
        for &cpu in &siblings {
            state.logical[cpu].assigned = Some(thread.clone());
        }
        let first = siblings[0];
        if bind && self.bind_native(&state, first) {
            for &cpu in &siblings {
                state.logical[cpu].bound = true;
            }
        }
        info!("assigning core {core}: cpus {siblings:?} to {thread}");
        LockHandle { cpu_id: first as i32, whole_core: true }
    }

    /// Binds the calling thread to a CPU reserved earlier, possibly by another thread.
    ///
    /// The lock (every sibling, for a whole-core handle) is reassigned to the caller and
    /// marked bound once the native mask is applied. Returns false for [`LockHandle::NONE`],
    /// a CPU outside the layout, a lock that is no longer reserved, or one already bound to
    /// another live thread.
    pub fn bind_lock(&self, handle: LockHandle) -> bool {
        if !handle.is_allocated() {
            warn!("can't bind since it was not possible to reserve a cpu");
            return false;
        }
        let mut state = self.lock_state();
        let cpu = handle.cpu_id as usize;
        if cpu >= state.logical.len() {
            warn!("cpu {cpu} is outside the layout");
            return false;
        }
        let thread = ThreadHandle::current();
        let lock = &state.logical[cpu];
        match &lock.assigned {
            None => {
                warn!("cpu {cpu} is not reserved");
                return false;
            }
            Some(owner) if lock.bound && owner.is_alive() && *owner != thread => {
                warn!("cpu {cpu} already bound to {owner}");
                return false;
            }
            Some(_) => {}
        }

        let siblings = if handle.whole_core {
            let core = state.layout.physical_core(cpu);
            state.physical.get(&core).cloned().unwrap_or_else(|| vec![cpu])
        } else {
            vec![cpu]
        };
        for &sibling in &siblings {
            state.logical[sibling].assigned = Some(thread.clone());
        }
        let bound = self.bind_native(&state, cpu);
        for &sibling in &siblings {
            state.logical[sibling].bound = bound;
        }
        bound
    }

    /// Marks every sibling of `cpu`'s physical core as bound to the calling thread. Siblings
    /// already bound to another live thread are left alone, and a `cpu` outside the layout
    /// is logged and ignored.
    pub fn bind_whole_core(&self, cpu: i32) {
        if cpu < 0 {
            warn!("can't bind core since it was not possible to reserve it");
            return;
        }
        let mut state = self.lock_state();
        let Some(core) = ((cpu as usize) < state.logical.len()).then(|| state.layout.physical_core(cpu as usize)) else {
            warn!("cpu {cpu} is outside the layout");
            return;
        };
        let siblings = state.physical.get(&core).cloned().unwrap_or_default();
        let thread = ThreadHandle::current();
        for &sibling in &siblings {
            let lock = &mut state.logical[sibling];
            match &lock.assigned {
                Some(owner) if lock.bound && owner.is_alive() && *owner != thread => {
                    warn!("cpu {sibling} already bound to {owner}");
                }
                _ => {
                    lock.bound = true;
                    lock.assigned = Some(thread.clone());
                }
            }
        }
        info!("assigning core {core}: cpus {siblings:?} to {thread}");
    }

    /// Frees every lock held by the calling thread and restores its affinity to the base set.
    ///
    /// # Logic
    /// Locks owned by the caller are cleared. Locks whose owner has exited are reaped in the
    /// same pass. Safe to call with nothing held.
    pub fn release(&self) {
        let mut state = self.lock_state();
        let thread = ThreadHandle::current();
        for lock in state.logical.iter_mut() {
            match &lock.assigned {
                Some(owner) if *owner == thread => {
                    info!("releasing cpu {} from {thread}", lock.cpu_id);
                    lock.clear();
                }
                Some(owner) if !owner.is_alive() => {
                    warn!("releasing cpu {} from {owner} as it is not alive", lock.cpu_id);
                    lock.clear();
                }
                _ => {}
            }
        }
        if let Err(e) = self.backend.set_affinity_mask(state.config.base()) {
            warn!("unable to restore base affinity {}: {e}", state.config.base());
        }
    }

    /// Frees one lock held by the calling thread.
    ///
    /// # Errors
    /// [`LockError::OutOfRange`] when `cpu` is not in the layout, [`LockError::NotHeld`] when
    /// the caller does not own the lock.
    pub fn release_lock(&self, cpu: i32) -> Result<(), LockError> {
        let mut state = self.lock_state();
        let cpus = state.logical.len();
        if cpu < 0 || cpu as usize >= cpus {
            return Err(LockError::OutOfRange { cpu, cpus });
        }
        let lock = &mut state.logical[cpu as usize];
        match &lock.assigned {
            Some(owner) if owner.is_current() => {
                info!("releasing cpu {cpu} from {owner}");
                lock.clear();
                Ok(())
            }
            _ => Err(LockError::NotHeld { cpu }),
        }
    }

    /// `{i}: {lock}` per logical CPU.
    pub fn dump_locks(&self) -> String {
        let state = self.lock_state();
        state.logical.iter().enumerate().map(|(i, lock)| format!("{i}: {lock}\n")).collect()
    }

    pub fn locks(&self) -> Vec<AffinityLock> {
        self.lock_state().logical.clone()
    }

    fn assign(&self, state: &mut InventoryState, cpu: usize, bind: bool) {
        let thread = ThreadHandle::current();
        debug!("assigning cpu {cpu} to {thread}");
        state.logical[cpu].assigned = Some(thread);
        if bind && self.bind_native(state, cpu) {
            state.logical[cpu].bound = true;
        }
    }

    fn bind_native(&self, state: &InventoryState, cpu: usize) -> bool {
        match apply_mask(self.backend.as_ref(), state.layout.cpu_mask(cpu)) {
            Ok(()) => {
                info!("binding {} to cpu {cpu}", ThreadHandle::current());
                true
            }
            Err(e) => {
                warn!("unable to bind {} to cpu {cpu}: {e}", ThreadHandle::current());
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SimulatedBackend;
    use crate::mask::Mask;
    use std::thread;

    fn inventory(desc: &str) -> (LockInventory, Arc<SimulatedBackend>) {
        let layout = Arc::new(CpuLayout::from_desc(desc).unwrap());
        let backend = Arc::new(SimulatedBackend::for_layout(&layout));
        let config = AffinityConfig::resolve(layout.cpus(), None, None).unwrap();
        (LockInventory::new(layout, config, backend.clone()), backend)
    }

    #[test]
    fn test_acquire_scans_from_highest() {
        let (inventory, backend) = inventory("1/4/1");
        let first = inventory.acquire_lock(true, &[AffinityStrategy::Any], &[]);
        let second = inventory.acquire_lock(false, &[AffinityStrategy::Any], &[]);
        assert_eq!(first.cpu_id(), 3);
        assert_eq!(second.cpu_id(), 2);
        assert_eq!(backend.current_cpu_id(), 3);
        let locks = inventory.locks();
        assert!(locks[3].is_bound());
        assert!(!locks[2].is_bound());
        inventory.release();
    }

    #[test]
    fn test_cpu_zero_never_handed_out() {
        let (inventory, _) = inventory("1/2/1");
        assert_eq!(inventory.acquire_lock(false, &[AffinityStrategy::Any], &[]).cpu_id(), 1);
        let none = inventory.acquire_lock(false, &[AffinityStrategy::Any], &[]);
        assert_eq!(none, LockHandle::NONE);
        assert!(!none.is_allocated());
        inventory.release();
    }

    #[test]
    fn test_strategy_falls_back_to_any() {
        let (inventory, _) = inventory("1/4/2");
        // Everything on socket 0: DifferentSocket can never match.
        let lock = inventory.acquire_lock(false, &[AffinityStrategy::DifferentSocket], &[7]);
        assert_eq!(lock.cpu_id(), 7);
        inventory.release();
    }

    #[test]
    fn test_same_core_picks_sibling() {
        let (inventory, _) = inventory("1/4/2");
        let lock = inventory.acquire_lock(false, &[AffinityStrategy::SameCore], &[2]);
        assert_eq!(lock.cpu_id(), 6);
        let lock = inventory.acquire_lock(false, &[AffinityStrategy::DifferentCore], &[6, 3]);
        assert_eq!(lock.cpu_id(), 5);
        inventory.release();
    }

    #[test]
    fn test_negative_avoid_ids_ignored() {
        let (inventory, _) = inventory("1/4/1");
        let lock = inventory.acquire_lock(false, &[AffinityStrategy::SameCore], &[-1]);
        assert_eq!(lock.cpu_id(), 3);
        inventory.release();
    }

    #[test]
    fn test_acquire_core_reserves_siblings() {
        let (inventory, backend) = inventory("1/4/2");
        let lock = inventory.acquire_core(true, &[AffinityStrategy::Any], &[]);
        assert!(lock.is_whole_core());
        assert_eq!(lock.cpu_id(), 3);
        let locks = inventory.locks();
        assert!(locks[3].is_bound() && locks[7].is_bound());
        assert_eq!(locks[7].assigned_thread(), Some(&ThreadHandle::current()));
        assert_eq!(backend.affinity_mask().unwrap(), Mask::single(8, 3));
        inventory.release();
    }

    #[test]
    fn test_acquire_core_skips_partially_reservable_core() {
        let (inventory, _) = inventory("1/2/2");
        let first = inventory.acquire_core(false, &[AffinityStrategy::Any], &[]);
        assert_eq!(first.cpu_id(), 1);
        assert!(first.is_whole_core());
        // Only core 0 is left and CPU 0 is not reservable: single-CPU fallback finds CPU 2.
        let second = inventory.acquire_core(false, &[AffinityStrategy::Any], &[]);
        assert!(!second.is_whole_core());
        assert_eq!(second.cpu_id(), 2);
        inventory.release();
    }

    #[test]
    fn test_release_frees_own_and_dead_locks() {
        let (inventory, backend) = inventory("1/4/1");
        let inventory = Arc::new(inventory);
        let worker = Arc::clone(&inventory);
        let dead_cpu = thread::spawn(move || worker.acquire_lock(false, &[AffinityStrategy::Any], &[]).cpu_id())
            .join()
            .unwrap();
        assert_eq!(dead_cpu, 3);
        // The dead thread's lock is reusable before any release.
        assert_eq!(inventory.acquire_lock(true, &[AffinityStrategy::Any], &[]).cpu_id(), 3);

        inventory.release();
        assert!(inventory.locks().iter().all(|l| l.assigned_thread().is_none()));
        assert_eq!(backend.affinity_mask().unwrap(), Mask::full(4));
        inventory.release();
    }

    #[test]
    fn test_release_lock_errors() {
        let (inventory, _) = inventory("1/4/1");
        let lock = inventory.acquire_lock(false, &[AffinityStrategy::Any], &[]);
        assert_eq!(inventory.release_lock(lock.cpu_id()), Ok(()));
        assert_eq!(inventory.release_lock(lock.cpu_id()), Err(LockError::NotHeld { cpu: 3 }));
        assert_eq!(inventory.release_lock(9), Err(LockError::OutOfRange { cpu: 9, cpus: 4 }));
        assert_eq!(inventory.release_lock(-1), Err(LockError::OutOfRange { cpu: -1, cpus: 4 }));
    }

    #[test]
    fn test_bind_whole_core_respects_live_owner() {
        let (inventory, _) = inventory("1/2/2");
        let inventory = Arc::new(inventory);
        let (held_tx, held_rx) = std::sync::mpsc::channel();
        let (done_tx, done_rx) = std::sync::mpsc::channel::<()>();
        let worker = Arc::clone(&inventory);
        let handle = thread::spawn(move || {
            worker.bind_whole_core(3);
            held_tx.send(()).unwrap();
            done_rx.recv().unwrap();
        });
        held_rx.recv().unwrap();
        inventory.bind_whole_core(1);
        let locks = inventory.locks();
        assert!(!locks[1].assigned_thread().unwrap().is_current());
        assert!(!locks[3].assigned_thread().unwrap().is_current());
        done_tx.send(()).unwrap();
        handle.join().unwrap();

        inventory.bind_whole_core(1);
        assert!(inventory.locks()[3].assigned_thread().unwrap().is_current());
        inventory.bind_whole_core(-1);
        inventory.release();
    }

    #[test]
    fn test_bind_whole_core_outside_layout() {
        let (inventory, _) = inventory("1/4/2");
        inventory.bind_whole_core(8);
        inventory.bind_whole_core(99);
        inventory.bind_whole_core(-1);
        assert!(inventory.locks().iter().all(|l| l.assigned_thread().is_none() && !l.is_bound()));
    }

    #[test]
    fn test_strategies_tried_in_order() {
        let (inventory, _) = inventory("2/4/2");
        let nearby = [AffinityStrategy::SameCore, AffinityStrategy::SameSocket, AffinityStrategy::Any];
        let held = inventory.acquire_lock(false, &[AffinityStrategy::Any], &[]);
        assert_eq!(held.cpu_id(), 15);

        // Sibling of 15 first, then another core on socket 1.
        let sibling = inventory.acquire_lock(false, &nearby, &[15]);
        assert_eq!(sibling.cpu_id(), 7);
        let same_socket = inventory.acquire_lock(false, &nearby, &[15]);
        assert_eq!(same_socket.cpu_id(), 14);

        let away_strategies = [AffinityStrategy::SameCore, AffinityStrategy::DifferentSocket];
        let away = inventory.acquire_lock(false, &away_strategies, &[15]);
        assert_eq!(away.cpu_id(), 11);
        assert_eq!(inventory.layout().socket_id(11), 0);

        // No strategies means anywhere.
        assert_eq!(inventory.acquire_lock(false, &[], &[15]).cpu_id(), 13);
        inventory.release();
    }

    #[test]
    fn test_core_strategies_tried_in_order() {
        let (inventory, _) = inventory("2/4/2");
        let strategies = [AffinityStrategy::SameCore, AffinityStrategy::DifferentSocket];
        let first = inventory.acquire_core(false, &strategies, &[5]);
        assert!(first.is_whole_core());
        assert_eq!(first.cpu_id(), 5);
        assert!(inventory.locks()[13].assigned_thread().unwrap().is_current());

        let second = inventory.acquire_core(false, &strategies, &[5]);
        assert!(second.is_whole_core());
        assert_eq!(inventory.layout().socket_id(second.cpu_id() as usize), 0);
        inventory.release();
    }

    #[test]
    fn test_bind_lock_from_another_thread() {
        let (inventory, backend) = inventory("1/4/1");
        let inventory = Arc::new(inventory);
        let lock = inventory.acquire_lock(false, &[AffinityStrategy::Any], &[]);
        assert_eq!(lock.cpu_id(), 3);
        assert!(!inventory.locks()[3].is_bound());

        let worker = Arc::clone(&inventory);
        let worker_backend = Arc::clone(&backend);
        let (bound, mask, owner) = thread::spawn(move || {
            let bound = worker.bind_lock(lock);
            let mask = worker_backend.affinity_mask().unwrap();
            let owner_is_worker = worker.locks()[3].assigned_thread().unwrap().is_current();
            (bound, mask, owner_is_worker)
        })
        .join()
        .unwrap();
        assert!(bound);
        assert!(owner);
        assert_eq!(mask, Mask::single(4, 3));
        assert!(inventory.locks()[3].is_bound());
        // The main thread was never bound.
        assert_eq!(backend.affinity_mask().unwrap(), Mask::full(4));
    }

    #[test]
    fn test_bind_lock_refusals() {
        let (inventory, backend) = inventory("1/4/2");
        assert!(!inventory.bind_lock(LockHandle::NONE));
        assert!(!inventory.bind_lock(LockHandle { cpu_id: 42, whole_core: false }));

        let lock = inventory.acquire_lock(false, &[AffinityStrategy::Any], &[]);
        assert!(inventory.release_lock(lock.cpu_id()).is_ok());
        assert!(!inventory.bind_lock(lock));

        let core = inventory.acquire_core(false, &[AffinityStrategy::Any], &[]);
        backend.reject_requests(true);
        assert!(!inventory.bind_lock(core));
        assert!(!inventory.locks()[core.cpu_id() as usize].is_bound());
        backend.reject_requests(false);
        assert!(inventory.bind_lock(core));
        let locks = inventory.locks();
        assert!(locks[3].is_bound() && locks[7].is_bound());
        inventory.release();
    }

    #[test]
    fn test_dump_locks() {
        let layout = Arc::new(CpuLayout::from_desc("1/4/1").unwrap());
        let backend = Arc::new(SimulatedBackend::for_layout(&layout));
        let config = AffinityConfig::new(Mask::from_indices(4, [0, 1]), Mask::from_indices(4, [2]));
        let inventory = LockInventory::new(layout, config, backend);
        let lock = inventory.acquire_lock(false, &[AffinityStrategy::Any], &[]);
        assert_eq!(lock.cpu_id(), 2);
        let dump = inventory.dump_locks();
        let lines: Vec<&str> = dump.lines().collect();
        assert_eq!(lines[0], "0: General use CPU");
        assert_eq!(lines[1], "1: General use CPU");
        assert!(lines[2].starts_with("2: Thread[") && lines[2].ends_with("alive=true"));
        assert_eq!(lines[3], "3: CPU not available");
        inventory.release();
        assert_eq!(inventory.dump_locks().lines().nth(2), Some("2: Reserved for this application"));
    }

    #[test]
    fn test_set_rebuilds_only_on_change() {
        let (inventory, _) = inventory("1/4/1");
        let lock = inventory.acquire_lock(false, &[AffinityStrategy::Any], &[]);
        inventory.set(Arc::new(CpuLayout::from_desc("1/4/1").unwrap()));
        assert!(inventory.locks()[lock.cpu_id() as usize].assigned_thread().is_some());

        inventory.set(Arc::new(CpuLayout::from_desc("1/2/2").unwrap()));
        assert!(inventory.locks().iter().all(|l| l.assigned_thread().is_none()));
        assert_eq!(inventory.layout().threads_per_core(), 2);
    }
}
