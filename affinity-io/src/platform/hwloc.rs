//! Topology source backed by the hwloc library.

use crate::error::PlatformError;
use affinity_core::{CpuLayout, LogicalCpuDescriptor};
use hwloc2::{ObjectType, Topology, TopologyObject};
use log::debug;
use std::collections::HashMap;

fn ancestor_index(pu: &TopologyObject, wanted: fn(&ObjectType) -> bool) -> Option<u32> {
    let mut current = pu.parent();
    while let Some(object) = current {
        if wanted(&object.object_type()) {
            return Some(object.logical_index());
        }
        current = object.parent();
    }
    None
}

/// One descriptor per processing unit, ordered by OS index. The package and core logical
/// indexes become socket and core ids.
pub fn descriptors_from_hwloc() -> Result<Vec<LogicalCpuDescriptor>, PlatformError> {
    let topology = Topology::new().ok_or_else(|| PlatformError::Hwloc("initialisation failed".to_string()))?;
    let pus = topology
        .objects_with_type(&ObjectType::PU)
        .map_err(|e| PlatformError::Hwloc(format!("{e:?}")))?;

    let mut by_os_index: Vec<(u32, u32, u32)> = pus
        .iter()
        .map(|pu| {
            let socket = ancestor_index(pu, |t| matches!(t, ObjectType::Package)).unwrap_or(0);
            let core = ancestor_index(pu, |t| matches!(t, ObjectType::Core)).unwrap_or_else(|| pu.logical_index());
            (pu.os_index(), socket, core)
        })
        .collect();
    by_os_index.sort_unstable();

    let mut thread_count: HashMap<(u32, u32), u32> = HashMap::new();
    let mut cpus = Vec::with_capacity(by_os_index.len());
    for (expected, (os_index, socket, core)) in by_os_index.into_iter().enumerate() {
        if os_index as usize != expected {
            return Err(PlatformError::Hwloc(format!("processing unit {expected} missing, found {os_index}")));
        }
        let thread = thread_count.entry((socket, core)).or_default();
        cpus.push(LogicalCpuDescriptor::new(socket, core, *thread));
        *thread += 1;
    }
    debug!("hwloc reported {} processing units", cpus.len());
    Ok(cpus)
}

pub fn layout_from_hwloc() -> Result<CpuLayout, PlatformError> {
    Ok(CpuLayout::from_descriptors(descriptors_from_hwloc()?)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hwloc_layout_is_consistent() {
        match layout_from_hwloc() {
            Ok(layout) => {
                assert!(layout.cpus() >= 1);
                assert!(layout.threads_per_core() >= 1);
            }
            Err(e) => eprintln!("Skipping hwloc test: {e}"),
        }
    }
}
