//! Binding threads to topology entities.

use crate::backend::{apply_mask, AffinityBackend};
use crate::thread::ThreadHandle;
use crate::topology::{CpuLayout, EntityType, TopologyEntity};
use log::{debug, info, warn};
use std::sync::Arc;

/// Binds the calling thread to groups, NUMA nodes, sockets, cores or caches of one layout.
///
/// A thread is registered with at most one entity at a time: binding to a new entity removes
/// it from every other. Create one per process and share it by reference.
pub struct AffinityManager {
    layout: Arc<CpuLayout>,
    backend: Arc<dyn AffinityBackend>,
}

impl AffinityManager {
    pub fn new(layout: Arc<CpuLayout>, backend: Arc<dyn AffinityBackend>) -> Self {
        Self { layout, backend }
    }

    pub fn layout(&self) -> &Arc<CpuLayout> {
        &self.layout
    }

    pub fn backend(&self) -> &Arc<dyn AffinityBackend> {
        &self.backend
    }

    /// Restricts the calling thread to `entity` and records the membership.
    /// Returns false, leaving registrations untouched, when the native call fails.
    pub fn bind(&self, entity: &TopologyEntity) -> bool {
        let thread = ThreadHandle::current();
        if let Err(e) = apply_mask(self.backend.as_ref(), entity.mask()) {
            warn!("unable to bind {thread} to {}: {e}", self.layout.location_of(entity));
            return false;
        }
        entity.register(thread.clone());
        self.unregister_from_others(entity, &thread);
        info!("bound {thread} to {}", self.layout.location_of(entity));
        true
    }

    /// Removes `thread` from every entity except `current`.
    pub fn unregister_from_others(&self, current: &TopologyEntity, thread: &ThreadHandle) {
        self.visit_entities(|entity| {
            if !entity.same_entity(current) {
                entity.unregister(thread);
            }
        });
    }

    /// Entities `thread` is registered with: empty or a single entry.
    pub fn bound_to(&self, thread: &ThreadHandle) -> Vec<&TopologyEntity> {
        let mut bound = Vec::with_capacity(1);
        for entity in self.all_entities() {
            if entity.has_thread(thread) {
                bound.push(entity);
            }
        }
        bound
    }

    /// Groups, nodes, sockets, cores, then caches, each in id order.
    pub fn visit_entities(&self, mut visitor: impl FnMut(&TopologyEntity)) {
        self.all_entities().for_each(|entity| visitor(entity));
    }

    fn all_entities(&self) -> impl Iterator<Item = &TopologyEntity> {
        self.layout
            .group_entities()
            .iter()
            .chain(self.layout.node_entities())
            .chain(self.layout.socket_entities())
            .chain(self.layout.core_entities())
            .chain(self.layout.cache_entities())
    }

    /// Every entity in dump order.
    pub fn entities(&self) -> Vec<&TopologyEntity> {
        self.layout.ordered_entities()
    }

    pub fn dump_layout(&self) -> String {
        self.layout.dump_layout()
    }

    pub fn location_of<'a>(&self, entity: &'a TopologyEntity) -> &'a str {
        self.layout.location_of(entity)
    }

    pub fn socket(&self, id: usize) -> Option<&TopologyEntity> {
        self.layout.socket_entities().get(id)
    }

    pub fn core(&self, id: usize) -> Option<&TopologyEntity> {
        self.layout.core_entities().get(id)
    }

    pub fn node(&self, id: usize) -> Option<&TopologyEntity> {
        self.layout.node_entities().get(id)
    }

    pub fn group(&self, id: usize) -> Option<&TopologyEntity> {
        self.layout.group_entities().get(id)
    }

    pub fn cache(&self, id: usize) -> Option<&TopologyEntity> {
        self.layout.cache_entities().get(id)
    }

    pub fn bind_to_socket(&self, id: usize) -> bool {
        self.socket(id).map_or(false, |e| self.bind_to_socket_entity(e))
    }

    pub fn bind_to_core(&self, id: usize) -> bool {
        self.core(id).map_or(false, |e| self.bind_to_core_entity(e))
    }

    pub fn bind_to_node(&self, id: usize) -> bool {
        self.node(id).map_or(false, |e| self.bind_to_node_entity(e))
    }

    pub fn bind_to_group(&self, id: usize) -> bool {
        self.group(id).map_or(false, |e| self.bind_to_group_entity(e))
    }

    pub fn bind_to_cache(&self, id: usize) -> bool {
        self.cache(id).map_or(false, |e| self.bind_to_cache_entity(e))
    }

    pub fn bind_to_socket_entity(&self, socket: &TopologyEntity) -> bool {
        self.bind_and_verify(EntityType::Socket, socket)
    }

    pub fn bind_to_core_entity(&self, core: &TopologyEntity) -> bool {
        self.bind_and_verify(EntityType::Core, core)
    }

    pub fn bind_to_node_entity(&self, node: &TopologyEntity) -> bool {
        self.bind_and_verify(EntityType::NumaNode, node)
    }

    pub fn bind_to_group_entity(&self, group: &TopologyEntity) -> bool {
        self.bind_and_verify(EntityType::Group, group)
    }

    pub fn bind_to_cache_entity(&self, cache: &TopologyEntity) -> bool {
        self.bind_and_verify(EntityType::Cache, cache)
    }

    fn bind_and_verify(&self, expected: EntityType, entity: &TopologyEntity) -> bool {
        if entity.entity_type() != expected {
            warn!("{entity:?} is not a {expected:?}");
            return false;
        }
        if !self.bind(entity) {
            return false;
        }
        let cpu = self.backend.current_cpu_id();
        if cpu < 0 {
            debug!("current cpu unknown after binding to {entity:?}");
            return false;
        }
        let cpu = cpu as usize;
        let landed = match expected {
            // Several caches can hold the same CPU, so only membership is checked.
            EntityType::Cache => self.layout.mask_contains(entity.mask(), cpu),
            kind => self.layout.entity_for_cpu(kind, cpu).map_or(false, |e| e.same_entity(entity)),
        };
        if !landed {
            debug!("thread is on cpu {cpu}, outside {entity:?}");
        }
        landed
    }
}
