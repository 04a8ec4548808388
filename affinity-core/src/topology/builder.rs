//! Layout construction from raw topology sources.
//!
//! Two input shapes are supported: per-CPU descriptor lists (cpuinfo style, always bit-set
//! masks) and relationship records (one mask per hardware entity, bit-set or processor-group
//! masks). Both end in the same validation and linking step.

use super::descriptor::{CacheInfo, LogicalCpuDescriptor, Relationship, RelationshipRecord};
use super::entity::{EntityKind, TopologyEntity};
use super::layout::{CpuLayout, CpuSlot};
use crate::error::LayoutError;
use crate::mask::Mask;
use log::{debug, info, warn};
use std::collections::{BTreeMap, BTreeSet};

/// Attempts made by [`CpuLayout::build_with_retry`] callers that have no better number.
pub const BUILD_ATTEMPTS: usize = 3;

/// Anything that can produce a layout, e.g. a platform probe.
pub trait LayoutSource {
    fn build_layout(&self) -> Result<CpuLayout, LayoutError>;
}

impl<F> LayoutSource for F
where
    F: Fn() -> Result<CpuLayout, LayoutError>,
{
    fn build_layout(&self) -> Result<CpuLayout, LayoutError> {
        self()
    }
}

/// Groups CPUs by `key`, one mask per distinct key, and numbers the masks densely in mask
/// order. Returns the ordered masks and each CPU's dense index.
fn dense_by_key<K: Ord + Copy>(keys: &[K]) -> (Vec<Mask>, Vec<usize>) {
    let n = keys.len();
    let mut by_key: BTreeMap<K, Mask> = BTreeMap::new();
    for (cpu, key) in keys.iter().enumerate() {
        by_key.entry(*key).or_insert_with(|| Mask::empty(n)).set(cpu);
    }
    let mut ordered: Vec<(K, Mask)> = by_key.into_iter().collect();
    ordered.sort_by(|a, b| a.1.cmp(&b.1));
    let index: BTreeMap<K, usize> = ordered.iter().enumerate().map(|(i, (k, _))| (*k, i)).collect();
    let slots = keys.iter().map(|k| index[k]).collect();
    (ordered.into_iter().map(|(_, m)| m).collect(), slots)
}

/// Per-CPU keys for an optional attribute: `None` if no CPU reports it, an error naming the
/// first CPU that is missing it when only some do.
fn optional_keys(
    cpus: &[LogicalCpuDescriptor],
    kind: &'static str,
    get: impl Fn(&LogicalCpuDescriptor) -> Option<u32>,
) -> Result<Option<Vec<u32>>, LayoutError> {
    if cpus.iter().all(|c| get(c).is_none()) {
        return Ok(None);
    }
    cpus.iter()
        .enumerate()
        .map(|(cpu, c)| get(c).ok_or(LayoutError::Uncovered { cpu, kind }))
        .collect::<Result<Vec<_>, _>>()
        .map(Some)
}

impl CpuLayout {
    /// Bit-set layout from per-CPU descriptors, indexed by logical CPU.
    ///
    /// Sockets and cores are always created; NUMA nodes and groups only when the descriptors
    /// report them.
    pub fn from_descriptors(cpus: Vec<LogicalCpuDescriptor>) -> Result<Self, LayoutError> {
        if cpus.is_empty() {
            return Err(LayoutError::Empty);
        }
        let n = cpus.len();
        let socket_keys: Vec<u32> = cpus.iter().map(|c| c.socket_id).collect();
        let core_keys: Vec<(u32, u32)> = cpus.iter().map(|c| (c.socket_id, c.core_id)).collect();
        let (socket_masks, socket_slots) = dense_by_key(&socket_keys);
        let (core_masks, core_slots) = dense_by_key(&core_keys);

        let (node_masks, node_slots) = match optional_keys(&cpus, "node", |c| c.numa_node_id)? {
            Some(keys) => {
                let (masks, slots) = dense_by_key(&keys);
                (masks, slots.into_iter().map(Some).collect())
            }
            None => (Vec::new(), vec![None; n]),
        };
        let (group_masks, group_slots) = match optional_keys(&cpus, "group", |c| c.group_id)? {
            Some(keys) => {
                let (masks, slots) = dense_by_key(&keys);
                (masks, slots.into_iter().map(Some).collect())
            }
            None => (Vec::new(), vec![None; n]),
        };

        let slots: Vec<CpuSlot> = (0..n)
            .map(|cpu| CpuSlot {
                socket: socket_slots[cpu],
                core: core_slots[cpu],
                node: node_slots[cpu],
                group: group_slots[cpu],
            })
            .collect();
        let cpu_masks = (0..n).map(|cpu| Mask::single(n, cpu)).collect();

        assemble(Parts {
            cpus,
            slots,
            cpu_masks,
            group_masks,
            node_masks,
            socket_masks,
            core_masks,
            caches: Vec::new(),
            group_bases: BTreeMap::new(),
        })
    }

    /// Layout from platform relationship records (groups, NUMA nodes, packages, cores and
    /// caches, each with its own mask). Masks may be bit-sets or processor-group masks but
    /// not a mix of both.
    pub fn from_relationships(records: &[RelationshipRecord]) -> Result<Self, LayoutError> {
        let Some(first) = records.first() else {
            return Err(LayoutError::Empty);
        };
        let grouped = first.mask.is_group();
        if records.iter().any(|r| r.mask.is_group() != grouped) {
            return Err(LayoutError::MalformedRecord("mixed mask representations".into()));
        }

        let mut groups = BTreeSet::new();
        let mut nodes = BTreeSet::new();
        let mut packages = BTreeSet::new();
        let mut cores = BTreeSet::new();
        let mut caches: Vec<(Mask, CacheInfo)> = Vec::new();
        for record in records {
            if record.mask.is_empty() {
                return Err(LayoutError::MalformedRecord(format!("empty mask in {:?}", record.relationship)));
            }
            let mask = record.mask.clone();
            match record.relationship {
                Relationship::Group => {
                    groups.insert(mask);
                }
                Relationship::NumaNode => {
                    nodes.insert(mask);
                }
                Relationship::Package => {
                    packages.insert(mask);
                }
                Relationship::Core => {
                    cores.insert(mask);
                }
                Relationship::Cache(info) => caches.push((mask, info)),
            }
        }
        caches.sort_by(|a, b| {
            a.0.cmp(&b.0)
                .then(a.1.level.cmp(&b.1.level))
                .then(a.1.cache_type.cmp(&b.1.cache_type))
        });
        caches.dedup();

        if grouped && groups.is_empty() {
            // No group records: each group spans the union of everything reported in it.
            let mut spans: BTreeMap<u32, u64> = BTreeMap::new();
            for record in records {
                if let Mask::Group { group_id, bits } = record.mask {
                    *spans.entry(group_id).or_default() |= bits;
                }
            }
            groups = spans.into_iter().map(|(id, bits)| Mask::group(id, bits)).collect();
        }

        let mut group_bases = BTreeMap::new();
        let total = if grouped {
            let mut total = 0;
            for group in &groups {
                if let Mask::Group { group_id, bits } = group {
                    if group_bases.insert(*group_id, total).is_some() {
                        return Err(LayoutError::MalformedRecord(format!("group {group_id} reported twice")));
                    }
                    total += bits.count_ones() as usize;
                }
            }
            total
        } else {
            packages
                .iter()
                .chain(&cores)
                .filter_map(|m| m.indices().last().copied())
                .max()
                .map_or(0, |highest| highest + 1)
        };
        if total == 0 {
            return Err(LayoutError::Empty);
        }

        let globalize = |mask: &Mask| -> Result<Vec<usize>, LayoutError> {
            let cpus = match mask {
                Mask::Bitset(_) => mask.indices(),
                Mask::Group { group_id, .. } => {
                    let base = group_bases.get(group_id).ok_or_else(|| {
                        LayoutError::MalformedRecord(format!("mask {mask} names unknown group {group_id}"))
                    })?;
                    mask.indices().into_iter().map(|bit| base + bit).collect()
                }
            };
            match cpus.iter().find(|&&cpu| cpu >= total) {
                Some(cpu) => Err(LayoutError::MalformedRecord(format!("cpu {cpu} outside {total} cpus in {mask}"))),
                None => Ok(cpus),
            }
        };
        let assign = |masks: &BTreeSet<Mask>, kind: &str| -> Result<Vec<Option<usize>>, LayoutError> {
            let mut slots = vec![None; total];
            for (id, mask) in masks.iter().enumerate() {
                for cpu in globalize(mask)? {
                    if slots[cpu].replace(id).is_some() {
                        return Err(LayoutError::MalformedRecord(format!("cpu {cpu} is in two {kind} records")));
                    }
                }
            }
            Ok(slots)
        };

        let group_slots = assign(&groups, "group")?;
        let node_slots = assign(&nodes, "node")?;
        let socket_slots = assign(&packages, "package")?;
        let core_slots = assign(&cores, "core")?;
        for cpu in 0..total {
            if core_slots[cpu].is_none() {
                return Err(LayoutError::Uncovered { cpu, kind: "core" });
            }
            if socket_slots[cpu].is_none() {
                return Err(LayoutError::Uncovered { cpu, kind: "package" });
            }
            if !nodes.is_empty() && node_slots[cpu].is_none() {
                return Err(LayoutError::Uncovered { cpu, kind: "node" });
            }
            if !groups.is_empty() && group_slots[cpu].is_none() {
                return Err(LayoutError::Uncovered { cpu, kind: "group" });
            }
        }

        let mut slots = Vec::with_capacity(total);
        let mut cpus = Vec::with_capacity(total);
        let mut next_thread: BTreeMap<usize, u32> = BTreeMap::new();
        for cpu in 0..total {
            let slot = CpuSlot {
                socket: socket_slots[cpu].unwrap_or_default(),
                core: core_slots[cpu].unwrap_or_default(),
                node: node_slots[cpu],
                group: group_slots[cpu],
            };
            let counter = next_thread.entry(slot.core).or_default();
            let thread_id = *counter;
            *counter += 1;
            cpus.push(LogicalCpuDescriptor {
                socket_id: slot.socket as u32,
                core_id: slot.core as u32,
                thread_id,
                group_id: slot.group.map(|g| g as u32),
                numa_node_id: slot.node.map(|n| n as u32),
                apic_id: None,
            });
            slots.push(slot);
        }

        let core_masks: Vec<Mask> = cores.into_iter().collect();
        let cpu_masks = if grouped {
            // The k-th thread of a core owns the k-th set bit of the core's mask.
            slots
                .iter()
                .zip(&cpus)
                .map(|(slot, desc)| {
                    let core = &core_masks[slot.core];
                    let bit = core.indices()[desc.thread_id as usize];
                    Mask::group(core.group_id().unwrap_or_default(), 1 << bit)
                })
                .collect()
        } else {
            (0..total).map(|cpu| Mask::single(total, cpu)).collect()
        };

        assemble(Parts {
            cpus,
            slots,
            cpu_masks,
            group_masks: groups.into_iter().collect(),
            node_masks: nodes.into_iter().collect(),
            socket_masks: packages.into_iter().collect(),
            core_masks,
            caches,
            group_bases,
        })
    }

    /// Synthetic layout from `"sockets/coresPerSocket/threadsPerCore"`.
    ///
    /// CPUs are enumerated thread outermost, then socket, then core, the order Linux uses in
    /// `/proc/cpuinfo`; with `"1/4/2"` CPUs 2 and 6 are the two threads of core 2.
    pub fn from_desc(desc: &str) -> Result<Self, LayoutError> {
        let parts: Vec<usize> = desc
            .split('/')
            .map(|part| part.trim().parse::<usize>())
            .collect::<Result<_, _>>()
            .map_err(|e| LayoutError::InvalidDescription(format!("{desc}: {e}")))?;
        let [sockets, cores, threads] = parts[..] else {
            return Err(LayoutError::InvalidDescription(format!("{desc}: expected sockets/cores/threads")));
        };
        if sockets == 0 || cores == 0 || threads == 0 {
            return Err(LayoutError::InvalidDescription(format!("{desc}: counts must be positive")));
        }

        let mut cpus = Vec::with_capacity(sockets * cores * threads);
        for t in 0..threads {
            for s in 0..sockets {
                for c in 0..cores {
                    cpus.push(LogicalCpuDescriptor::new(s as u32, c as u32, t as u32));
                }
            }
        }
        Self::from_descriptors(cpus)
    }

    /// One socket, one thread per core, `cpus` cores. Used when detection fails.
    pub fn flat(cpus: usize) -> Self {
        let n = cpus.max(1);
        let cores = (0..n)
            .map(|cpu| TopologyEntity::new(cpu as u32, Mask::single(n, cpu), EntityKind::Core { socket: 0 }))
            .collect();
        Self {
            cpus: (0..n).map(|cpu| LogicalCpuDescriptor::new(0, cpu as u32, 0)).collect(),
            slots: (0..n).map(|cpu| CpuSlot { socket: 0, core: cpu, node: None, group: None }).collect(),
            cpu_masks: (0..n).map(|cpu| Mask::single(n, cpu)).collect(),
            groups: Vec::new(),
            nodes: Vec::new(),
            sockets: vec![TopologyEntity::new(0, Mask::full(n), EntityKind::Socket { node: None })],
            cores,
            caches: Vec::new(),
            group_bases: BTreeMap::new(),
            socket_count: 1,
            cores_per_socket: n,
            threads_per_core: 1,
        }
    }

    /// Runs `source` up to `attempts` times and falls back to [`CpuLayout::flat`] over
    /// `fallback_cpus` when every attempt fails.
    pub fn build_with_retry(source: &dyn LayoutSource, attempts: usize, fallback_cpus: usize) -> Self {
        for attempt in 1..=attempts.max(1) {
            match source.build_layout() {
                Ok(layout) => {
                    info!(
                        "cpu layout: {} cpus, {} sockets, {} cores per socket, {} threads per core",
                        layout.cpus(),
                        layout.sockets(),
                        layout.cores_per_socket(),
                        layout.threads_per_core()
                    );
                    return layout;
                }
                Err(e) => warn!("cpu layout attempt {attempt}/{attempts} failed: {e}"),
            }
        }
        warn!("falling back to a flat layout of {fallback_cpus} cpus");
        Self::flat(fallback_cpus)
    }
}

struct Parts {
    cpus: Vec<LogicalCpuDescriptor>,
    slots: Vec<CpuSlot>,
    cpu_masks: Vec<Mask>,
    group_masks: Vec<Mask>,
    node_masks: Vec<Mask>,
    socket_masks: Vec<Mask>,
    core_masks: Vec<Mask>,
    caches: Vec<(Mask, CacheInfo)>,
    group_bases: BTreeMap<u32, usize>,
}

/// Validates counts and containment, then links cores to sockets and sockets to nodes.
fn assemble(parts: Parts) -> Result<CpuLayout, LayoutError> {
    let Parts { cpus, slots, cpu_masks, group_masks, node_masks, socket_masks, core_masks, caches, group_bases } =
        parts;

    let socket_count = socket_masks.len();
    let cores_per_socket = core_masks.len() / socket_count.max(1);
    let threads_per_core = cpus.iter().map(|c| c.thread_id).collect::<BTreeSet<_>>().len();
    if cpus.len() != socket_count * cores_per_socket * threads_per_core {
        let dump = cpus.iter().enumerate().map(|(i, c)| format!("{i}: {c}\n")).collect();
        return Err(LayoutError::InconsistentCounts {
            cpus: cpus.len(),
            sockets: socket_count,
            cores_per_socket,
            threads_per_core,
            dump,
        });
    }

    // Back-references come from the first CPU of each entity.
    let first_cpu = |mask: &Mask, pick: &dyn Fn(&CpuSlot) -> usize| -> usize {
        slots
            .iter()
            .zip(&cpu_masks)
            .find(|(_, single)| single.subset_of(mask))
            .map_or(0, |(slot, _)| pick(slot))
    };

    let groups: Vec<TopologyEntity> = group_masks
        .into_iter()
        .enumerate()
        .map(|(id, mask)| TopologyEntity::new(id as u32, mask, EntityKind::Group))
        .collect();
    let nodes: Vec<TopologyEntity> = node_masks
        .into_iter()
        .enumerate()
        .map(|(id, mask)| TopologyEntity::new(id as u32, mask, EntityKind::NumaNode))
        .collect();
    let sockets: Vec<TopologyEntity> = socket_masks
        .into_iter()
        .enumerate()
        .map(|(id, mask)| {
            let node = if nodes.is_empty() {
                None
            } else {
                Some(first_cpu(&mask, &|slot| slot.node.unwrap_or_default()) as u32)
            };
            TopologyEntity::new(id as u32, mask, EntityKind::Socket { node })
        })
        .collect();
    let cores: Vec<TopologyEntity> = core_masks
        .into_iter()
        .enumerate()
        .map(|(id, mask)| {
            let socket = first_cpu(&mask, &|slot| slot.socket) as u32;
            TopologyEntity::new(id as u32, mask, EntityKind::Core { socket })
        })
        .collect();
    let caches: Vec<TopologyEntity> = caches
        .into_iter()
        .enumerate()
        .map(|(id, (mask, info))| TopologyEntity::new(id as u32, mask, EntityKind::Cache(info)))
        .collect();

    for core in &cores {
        let socket = &sockets[core.socket().unwrap_or_default() as usize];
        if !socket.fully_contains(core) {
            return Err(LayoutError::MalformedRecord(format!("{core:?} is not inside {socket:?}")));
        }
    }
    for socket in &sockets {
        if let Some(node) = socket.node().and_then(|n| nodes.get(n as usize)) {
            if !node.fully_contains(socket) {
                return Err(LayoutError::MalformedRecord(format!("{socket:?} is not inside {node:?}")));
            }
        }
    }

    debug!(
        "assembled layout: {} groups, {} nodes, {} sockets, {} cores, {} caches",
        groups.len(),
        nodes.len(),
        sockets.len(),
        cores.len(),
        caches.len()
    );
    Ok(CpuLayout {
        cpus,
        slots,
        cpu_masks,
        groups,
        nodes,
        sockets,
        cores,
        caches,
        group_bases,
        socket_count,
        cores_per_socket,
        threads_per_core,
    })
}
