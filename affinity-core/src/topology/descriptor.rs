use crate::mask::Mask;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One logical CPU as reported by a raw topology source.
///
/// Sources must hand these over ordered by ascending logical CPU index with no gaps.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LogicalCpuDescriptor {
    pub socket_id: u32,
    /// Unique within the socket.
    pub core_id: u32,
    /// Unique within the core.
    pub thread_id: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub numa_node_id: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub apic_id: Option<u32>,
}

impl LogicalCpuDescriptor {
    pub fn new(socket_id: u32, core_id: u32, thread_id: u32) -> Self {
        Self { socket_id, core_id, thread_id, ..Default::default() }
    }
}

impl fmt::Display for LogicalCpuDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CpuInfo{")?;
        if let Some(apic) = self.apic_id {
            write!(f, "apicId={apic}, ")?;
        }
        write!(
            f,
            "socketId={}, coreId={}, threadId={}",
            self.socket_id, self.core_id, self.thread_id
        )?;
        if let Some(node) = self.numa_node_id {
            write!(f, ", numaId={node}")?;
        }
        if let Some(group) = self.group_id {
            write!(f, ", groupId={group}")?;
        }
        f.write_str("}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CacheType {
    Data,
    Instruction,
    Trace,
    Unified,
}

impl CacheType {
    pub fn short_name(self) -> char {
        match self {
            CacheType::Data => 'D',
            CacheType::Instruction => 'I',
            CacheType::Trace => 'T',
            CacheType::Unified => 'U',
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheInfo {
    /// 1..=3
    pub level: u8,
    pub cache_type: CacheType,
    /// Bytes.
    pub size: u64,
    pub line_size: u16,
    /// 0 when fully associative.
    pub associativity: u8,
}

impl CacheInfo {
    /// `L2`, `L3` for unified caches, `L1D` / `L1I` otherwise.
    pub fn type_name(&self) -> String {
        match self.cache_type {
            CacheType::Unified => format!("L{}", self.level),
            other => format!("L{}{}", self.level, other.short_name()),
        }
    }
}

/// What a platform relationship record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relationship {
    Group,
    NumaNode,
    Package,
    Core,
    Cache(CacheInfo),
}

/// A platform relationship record: the set of logical CPUs sharing one hardware entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationshipRecord {
    pub relationship: Relationship,
    pub mask: Mask,
}

impl RelationshipRecord {
    pub fn new(relationship: Relationship, mask: Mask) -> Self {
        Self { relationship, mask }
    }
}

/// Human readable size: the largest of T/G/M/K the size exceeds, remainder dropped.
pub fn format_size(size: u64) -> String {
    const UNITS: [(u64, char); 4] = [(1 << 40, 'T'), (1 << 30, 'G'), (1 << 20, 'M'), (1 << 10, 'K')];
    for (limit, suffix) in UNITS {
        if size > limit {
            return format!("{}{}", size / limit, suffix);
        }
    }
    format!("{size}B")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_display() {
        assert_eq!(
            LogicalCpuDescriptor::new(0, 2, 1).to_string(),
            "CpuInfo{socketId=0, coreId=2, threadId=1}"
        );
        let apic = LogicalCpuDescriptor { apic_id: Some(5), ..LogicalCpuDescriptor::new(0, 2, 1) };
        assert_eq!(apic.to_string(), "CpuInfo{apicId=5, socketId=0, coreId=2, threadId=1}");
    }

    #[test]
    fn test_descriptor_json() {
        let parsed: LogicalCpuDescriptor =
            serde_json::from_str(r#"{"socket_id":1,"core_id":3,"thread_id":0,"numa_node_id":1}"#).unwrap();
        assert_eq!(parsed.socket_id, 1);
        assert_eq!(parsed.numa_node_id, Some(1));
        assert_eq!(parsed.group_id, None);
    }

    #[test]
    fn test_cache_names_and_sizes() {
        let l1d = CacheInfo { level: 1, cache_type: CacheType::Data, size: 32 << 10, line_size: 64, associativity: 8 };
        let l3 = CacheInfo { level: 3, cache_type: CacheType::Unified, size: 30 << 20, line_size: 64, associativity: 20 };
        assert_eq!(l1d.type_name(), "L1D");
        assert_eq!(l3.type_name(), "L3");
        assert_eq!(format_size(l1d.size), "32K");
        assert_eq!(format_size(l3.size), "30M");
        assert_eq!(format_size(512), "512B");
    }
}
