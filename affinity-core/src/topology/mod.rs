pub mod builder;
pub mod descriptor;
pub mod entity;
pub mod layout;

pub use builder::{LayoutSource, BUILD_ATTEMPTS};
pub use descriptor::{format_size, CacheInfo, CacheType, LogicalCpuDescriptor, Relationship, RelationshipRecord};
pub use entity::{EntityKind, EntityType, TopologyEntity};
pub use layout::CpuLayout;
