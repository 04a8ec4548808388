use super::descriptor::{CacheInfo, LogicalCpuDescriptor};
use super::entity::{EntityType, TopologyEntity};
use crate::mask::Mask;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Entity indexes of one logical CPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct CpuSlot {
    pub socket: usize,
    pub core: usize,
    pub node: Option<usize>,
    pub group: Option<usize>,
}

/// The machine's CPU topology: per-CPU descriptors plus the linked entity graph.
///
/// Built once by one of the constructors in [`builder`](super::builder) and immutable
/// afterwards, apart from the bound-thread registries inside each entity.
#[derive(Debug)]
pub struct CpuLayout {
    pub(super) cpus: Vec<LogicalCpuDescriptor>,
    pub(super) slots: Vec<CpuSlot>,
    pub(super) cpu_masks: Vec<Mask>,
    pub(super) groups: Vec<TopologyEntity>,
    pub(super) nodes: Vec<TopologyEntity>,
    pub(super) sockets: Vec<TopologyEntity>,
    pub(super) cores: Vec<TopologyEntity>,
    pub(super) caches: Vec<TopologyEntity>,
    pub(super) group_bases: BTreeMap<u32, usize>,
    pub(super) socket_count: usize,
    pub(super) cores_per_socket: usize,
    pub(super) threads_per_core: usize,
}

impl CpuLayout {
    pub fn cpus(&self) -> usize {
        self.cpus.len()
    }

    pub fn sockets(&self) -> usize {
        self.socket_count
    }

    pub fn cores_per_socket(&self) -> usize {
        self.cores_per_socket
    }

    pub fn threads_per_core(&self) -> usize {
        self.threads_per_core
    }

    pub fn descriptor(&self, cpu: usize) -> Option<&LogicalCpuDescriptor> {
        self.cpus.get(cpu)
    }

    pub fn descriptors(&self) -> &[LogicalCpuDescriptor] {
        &self.cpus
    }

    /// Socket id of `cpu` as reported by the source.
    ///
    /// # Panics
    /// Panics if `cpu >= self.cpus()`. The same holds for [`core_id`](Self::core_id),
    /// [`thread_id`](Self::thread_id), [`numa_node_id`](Self::numa_node_id),
    /// [`group_id`](Self::group_id), [`apic_id`](Self::apic_id),
    /// [`physical_core`](Self::physical_core) and [`cpu_mask`](Self::cpu_mask); use
    /// [`descriptor`](Self::descriptor) for a checked lookup.
    pub fn socket_id(&self, cpu: usize) -> u32 {
        self.cpus[cpu].socket_id
    }

    /// Core id within the socket. Siblings on one physical core share it.
    pub fn core_id(&self, cpu: usize) -> u32 {
        self.cpus[cpu].core_id
    }

    pub fn thread_id(&self, cpu: usize) -> u32 {
        self.cpus[cpu].thread_id
    }

    pub fn numa_node_id(&self, cpu: usize) -> Option<u32> {
        self.cpus[cpu].numa_node_id
    }

    pub fn group_id(&self, cpu: usize) -> Option<u32> {
        self.cpus[cpu].group_id
    }

    pub fn apic_id(&self, cpu: usize) -> Option<u32> {
        self.cpus[cpu].apic_id
    }

    /// Dense id of the physical core `cpu` belongs to, unique across the whole machine.
    ///
    /// # Panics
    /// Panics if `cpu >= self.cpus()`.
    pub fn physical_core(&self, cpu: usize) -> u32 {
        self.slots[cpu].core as u32
    }

    /// Number of logical CPUs sharing physical core `core`.
    pub fn threads_per_core_of(&self, core: usize) -> usize {
        self.cores.get(core).map_or(0, TopologyEntity::cardinality)
    }

    /// The single-CPU mask of `cpu`, in the layout's mask representation.
    ///
    /// # Panics
    /// Panics if `cpu >= self.cpus()`.
    pub fn cpu_mask(&self, cpu: usize) -> &Mask {
        &self.cpu_masks[cpu]
    }

    /// Global CPU index of bit 0 of each processor group, keyed by OS group id.
    /// Empty for bit-set layouts.
    pub fn group_bases(&self) -> &BTreeMap<u32, usize> {
        &self.group_bases
    }

    pub fn is_grouped(&self) -> bool {
        !self.group_bases.is_empty()
    }

    /// Whether `mask` (in this layout's representation) contains global CPU `cpu`.
    pub fn mask_contains(&self, mask: &Mask, cpu: usize) -> bool {
        self.cpu_masks.get(cpu).map_or(false, |single| single.subset_of(mask))
    }

    /// Global CPU indexes covered by `mask`.
    pub fn cpus_of(&self, mask: &Mask) -> Vec<usize> {
        match mask {
            Mask::Bitset(_) => mask.indices(),
            Mask::Group { group_id, .. } => match self.group_bases.get(group_id) {
                Some(base) => mask.indices().into_iter().map(|bit| base + bit).collect(),
                None => Vec::new(),
            },
        }
    }

    pub fn socket_of(&self, cpu: usize) -> Option<&TopologyEntity> {
        self.slots.get(cpu).map(|slot| &self.sockets[slot.socket])
    }

    pub fn core_of(&self, cpu: usize) -> Option<&TopologyEntity> {
        self.slots.get(cpu).map(|slot| &self.cores[slot.core])
    }

    pub fn node_of(&self, cpu: usize) -> Option<&TopologyEntity> {
        let node = self.slots.get(cpu)?.node?;
        self.nodes.get(node)
    }

    pub fn group_of(&self, cpu: usize) -> Option<&TopologyEntity> {
        let group = self.slots.get(cpu)?.group?;
        self.groups.get(group)
    }

    pub fn socket_entities(&self) -> &[TopologyEntity] {
        &self.sockets
    }

    pub fn core_entities(&self) -> &[TopologyEntity] {
        &self.cores
    }

    pub fn node_entities(&self) -> &[TopologyEntity] {
        &self.nodes
    }

    pub fn group_entities(&self) -> &[TopologyEntity] {
        &self.groups
    }

    pub fn cache_entities(&self) -> &[TopologyEntity] {
        &self.caches
    }

    pub fn entities_of(&self, entity_type: EntityType) -> &[TopologyEntity] {
        match entity_type {
            EntityType::Group => &self.groups,
            EntityType::NumaNode => &self.nodes,
            EntityType::Socket => &self.sockets,
            EntityType::Core => &self.cores,
            EntityType::Cache => &self.caches,
        }
    }

    pub fn entity(&self, entity_type: EntityType, id: u32) -> Option<&TopologyEntity> {
        self.entities_of(entity_type).get(id as usize)
    }

    /// The entity of the given kind that `cpu` belongs to. Caches resolve to the first
    /// cache (in mask order) containing the CPU.
    pub fn entity_for_cpu(&self, entity_type: EntityType, cpu: usize) -> Option<&TopologyEntity> {
        match entity_type {
            EntityType::Group => self.group_of(cpu),
            EntityType::NumaNode => self.node_of(cpu),
            EntityType::Socket => self.socket_of(cpu),
            EntityType::Core => self.core_of(cpu),
            EntityType::Cache => self.caches.iter().find(|c| self.mask_contains(c.mask(), cpu)),
        }
    }

    /// Every entity, in the dump order of [`TopologyEntity::layout_cmp`].
    pub fn ordered_entities(&self) -> Vec<&TopologyEntity> {
        let mut all: Vec<&TopologyEntity> = self
            .groups
            .iter()
            .chain(&self.nodes)
            .chain(&self.sockets)
            .chain(&self.cores)
            .chain(&self.caches)
            .collect();
        all.sort_by(|a, b| a.layout_cmp(b));
        all
    }

    /// `Core#2/Socket#1/L3#1`-style path: the entity itself, then every other entity that
    /// fully contains it, smallest first. Kinds with a single instance and level-1 caches are
    /// left out. Computed once per entity.
    pub fn location_of<'a>(&self, entity: &'a TopologyEntity) -> &'a str {
        entity.location_or_init(|| LocationIndex::new(self).path(entity))
    }

    /// One line per entity: `{location} {Kind}: {id} M: {mask}`.
    pub fn dump_layout(&self) -> String {
        let index = LocationIndex::new(self);
        let mut out = String::new();
        for &entity in &index.ordered {
            out.push_str(entity.location_or_init(|| index.path(entity)));
            out.push(' ');
            out.push_str(&entity.to_string());
            out.push('\n');
        }
        out
    }

    /// The cache of `level` serving `cpu`. Data caches win over instruction caches at L1.
    pub fn cache(&self, cpu: usize, level: u8) -> Option<&TopologyEntity> {
        self.caches
            .iter()
            .filter(|c| c.is_cache_level(level))
            .filter(|c| self.mask_contains(c.mask(), cpu))
            .min_by_key(|c| c.cache_info().map(|info| info.cache_type))
    }

    pub fn cache_info(&self, cpu: usize, level: u8) -> Option<CacheInfo> {
        self.cache(cpu, level).and_then(|c| c.cache_info().copied())
    }

    /// Caches that serve the whole of physical core `core`.
    pub fn caches_for_core(&self, core: usize) -> Vec<&TopologyEntity> {
        match self.cores.get(core) {
            Some(core) => self.caches.iter().filter(|c| c.fully_contains(core)).collect(),
            None => Vec::new(),
        }
    }
}

/// Dump order and per-kind instance counts, computed once and shared by every path.
struct LocationIndex<'l> {
    ordered: Vec<&'l TopologyEntity>,
    instances: HashMap<String, usize>,
}

impl<'l> LocationIndex<'l> {
    fn new(layout: &'l CpuLayout) -> Self {
        let ordered = layout.ordered_entities();
        let mut instances: HashMap<String, usize> = HashMap::new();
        for e in &ordered {
            *instances.entry(e.kind_name()).or_default() += 1;
        }
        Self { ordered, instances }
    }

    fn path(&self, entity: &TopologyEntity) -> String {
        let mut containers: Vec<&TopologyEntity> = self
            .ordered
            .iter()
            .copied()
            .filter(|e| !e.same_entity(entity))
            .filter(|e| !e.is_cache_level(1))
            .filter(|e| self.instances.get(&e.kind_name()).copied().unwrap_or(0) > 1)
            .filter(|e| e.fully_contains(entity))
            .collect();
        containers.sort_by(|a, b| a.cardinality().cmp(&b.cardinality()).then_with(|| a.layout_cmp(b)));

        std::iter::once(entity)
            .chain(containers)
            .map(|e| format!("{}#{}", e.kind_name(), e.id()))
            .collect::<Vec<_>>()
            .join("/")
    }
}

impl PartialEq for CpuLayout {
    fn eq(&self, other: &Self) -> bool {
        self.cpus == other.cpus
    }
}

impl Eq for CpuLayout {}

/// `{i}: CpuInfo{...}` per logical CPU.
impl fmt::Display for CpuLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, cpu) in self.cpus.iter().enumerate() {
            writeln!(f, "{i}: {cpu}")?;
        }
        Ok(())
    }
}
