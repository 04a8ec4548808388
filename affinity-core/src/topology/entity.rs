use super::descriptor::{format_size, CacheInfo};
use crate::mask::Mask;
use crate::thread::ThreadHandle;
use std::cmp::Ordering;
use std::fmt;
use std::sync::{Mutex, MutexGuard, OnceLock, PoisonError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityType {
    Group,
    NumaNode,
    Socket,
    Core,
    Cache,
}

/// Variant data. Back-references are ids into the owning layout's lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Group,
    NumaNode,
    Socket { node: Option<u32> },
    Core { socket: u32 },
    Cache(CacheInfo),
}

/// A node of the topology graph: group, NUMA node, socket, core or cache.
///
/// Identity (`id`, `mask`, kind data) is fixed at construction. The bound-thread registry is
/// the only mutable part and sits behind its own mutex.
pub struct TopologyEntity {
    id: u32,
    mask: Mask,
    kind: EntityKind,
    threads: Mutex<Vec<ThreadHandle>>,
    location: OnceLock<String>,
}

impl TopologyEntity {
    pub(crate) fn new(id: u32, mask: Mask, kind: EntityKind) -> Self {
        Self {
            id,
            mask,
            kind,
            threads: Mutex::new(Vec::new()),
            location: OnceLock::new(),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn mask(&self) -> &Mask {
        &self.mask
    }

    pub fn kind(&self) -> &EntityKind {
        &self.kind
    }

    pub fn entity_type(&self) -> EntityType {
        match self.kind {
            EntityKind::Group => EntityType::Group,
            EntityKind::NumaNode => EntityType::NumaNode,
            EntityKind::Socket { .. } => EntityType::Socket,
            EntityKind::Core { .. } => EntityType::Core,
            EntityKind::Cache(_) => EntityType::Cache,
        }
    }

    /// Id of the owning socket, for cores.
    pub fn socket(&self) -> Option<u32> {
        match self.kind {
            EntityKind::Core { socket } => Some(socket),
            _ => None,
        }
    }

    /// Id of the owning NUMA node, for sockets on machines that report nodes.
    pub fn node(&self) -> Option<u32> {
        match self.kind {
            EntityKind::Socket { node } => node,
            _ => None,
        }
    }

    pub fn cache_info(&self) -> Option<&CacheInfo> {
        match &self.kind {
            EntityKind::Cache(info) => Some(info),
            _ => None,
        }
    }

    /// Name used in location paths and dumps: `Group`, `Node`, `Socket`, `Core`, `L1D`, `L3`...
    pub fn kind_name(&self) -> String {
        match &self.kind {
            EntityKind::Group => "Group".to_string(),
            EntityKind::NumaNode => "Node".to_string(),
            EntityKind::Socket { .. } => "Socket".to_string(),
            EntityKind::Core { .. } => "Core".to_string(),
            EntityKind::Cache(info) => info.type_name(),
        }
    }

    pub fn is_cache_level(&self, level: u8) -> bool {
        self.cache_info().map_or(false, |info| info.level == level)
    }

    /// `other` lies entirely within this entity.
    pub fn fully_contains(&self, other: &TopologyEntity) -> bool {
        other.mask.subset_of(&self.mask)
    }

    pub fn overlaps(&self, other: &TopologyEntity) -> bool {
        self.mask.overlaps(&other.mask)
    }

    pub fn cardinality(&self) -> usize {
        self.mask.cardinality()
    }

    pub fn same_entity(&self, other: &TopologyEntity) -> bool {
        self.entity_type() == other.entity_type() && self.id == other.id
    }

    pub(crate) fn register(&self, thread: ThreadHandle) {
        let mut threads = self.lock_threads();
        if !threads.contains(&thread) {
            threads.push(thread);
        }
    }

    pub fn unregister(&self, thread: &ThreadHandle) {
        self.lock_threads().retain(|t| t != thread);
    }

    /// Live threads registered here. Dead entries are dropped as a side effect.
    pub fn threads(&self) -> Vec<ThreadHandle> {
        let mut threads = self.lock_threads();
        threads.retain(ThreadHandle::is_alive);
        threads.clone()
    }

    pub fn has_thread(&self, thread: &ThreadHandle) -> bool {
        self.threads().contains(thread)
    }

    pub(crate) fn location_or_init(&self, init: impl FnOnce() -> String) -> &str {
        self.location.get_or_init(init)
    }

    /// Total order used by dumps: group id, then mask with the lowest bit winning (widest
    /// first on ties of the starting CPU), then cache level, then Core before Cache before
    /// Socket before Node before Group.
    pub fn layout_cmp(&self, other: &TopologyEntity) -> Ordering {
        let level = |e: &TopologyEntity| e.cache_info().map_or(0, |info| info.level);
        self.mask
            .layout_cmp(&other.mask)
            .then_with(|| level(self).cmp(&level(other)))
            .then_with(|| self.type_rank().cmp(&other.type_rank()))
            .then_with(|| self.id.cmp(&other.id))
    }

    fn type_rank(&self) -> u8 {
        match self.kind {
            EntityKind::Core { .. } => 0,
            EntityKind::Cache(_) => 1,
            EntityKind::Socket { .. } => 2,
            EntityKind::NumaNode => 3,
            EntityKind::Group => 4,
        }
    }

    fn lock_threads(&self) -> MutexGuard<'_, Vec<ThreadHandle>> {
        self.threads.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl PartialEq for TopologyEntity {
    fn eq(&self, other: &Self) -> bool {
        self.same_entity(other) && self.mask == other.mask
    }
}

impl fmt::Debug for TopologyEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{} {}", self.kind_name(), self.id, self.mask)
    }
}

/// `{Kind}: {id} M: {mask}`, with the size appended for caches.
impl fmt::Display for TopologyEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} M: {}", self.kind_name(), self.id, self.mask)?;
        if let Some(info) = self.cache_info() {
            write!(f, " ({})", format_size(info.size))?;
        }
        Ok(())
    }
}
