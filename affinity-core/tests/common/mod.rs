//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use affinity_core::topology::{CacheInfo, CacheType, Relationship, RelationshipRecord};
use affinity_core::*;
use std::sync::Arc;

pub fn layout(desc: &str) -> Arc<CpuLayout> {
    Arc::new(CpuLayout::from_desc(desc).expect("valid layout description"))
}

pub fn inventory(desc: &str) -> (LockInventory, Arc<SimulatedBackend>) {
    let layout = layout(desc);
    let backend = Arc::new(SimulatedBackend::for_layout(&layout));
    let config = AffinityConfig::resolve(layout.cpus(), None, None).expect("default config");
    (LockInventory::new(layout, config, backend.clone()), backend)
}

fn cache(level: u8, cache_type: CacheType, size: u64, group: u32, bits: u64) -> RelationshipRecord {
    let info = CacheInfo { level, cache_type, size, line_size: 64, associativity: 8 };
    RelationshipRecord::new(Relationship::Cache(info), Mask::group(group, bits))
}

/// A 16-CPU machine split into two processor groups of 8. Each group is one NUMA node and
/// one package of four two-thread cores with private L1D/L2 and a shared L3.
pub fn grouped_records() -> Vec<RelationshipRecord> {
    let mut records = Vec::new();
    for group in 0..2 {
        records.push(RelationshipRecord::new(Relationship::Group, Mask::group(group, 0xFF)));
        records.push(RelationshipRecord::new(Relationship::NumaNode, Mask::group(group, 0xFF)));
        records.push(RelationshipRecord::new(Relationship::Package, Mask::group(group, 0xFF)));
        records.push(cache(3, CacheType::Unified, 16 << 20, group, 0xFF));
        for core in 0..4 {
            let bits = 0b11u64 << (core * 2);
            records.push(RelationshipRecord::new(Relationship::Core, Mask::group(group, bits)));
            records.push(cache(1, CacheType::Data, 32 << 10, group, bits));
            records.push(cache(1, CacheType::Instruction, 32 << 10, group, bits));
            records.push(cache(2, CacheType::Unified, 1 << 20, group, bits));
        }
    }
    records
}

pub fn grouped_layout() -> Arc<CpuLayout> {
    Arc::new(CpuLayout::from_relationships(&grouped_records()).expect("valid relationship records"))
}
