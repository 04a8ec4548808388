//! Affinity core: the CPU topology model and the reservation allocator.
//!
//! This crate never calls the operating system directly. Native affinity calls go through an
//! [`AffinityBackend`]; `affinity-io` provides the platform implementations.

pub mod backend;
pub mod config;
pub mod error;
pub mod lock;
pub mod manager;
pub mod mask;
pub mod thread;
pub mod topology;

// Re-exports for callers that only need the common types
pub use backend::{apply_mask, AffinityBackend, SimulatedBackend};
pub use config::AffinityConfig;
pub use error::{AffinityError, LayoutError, LockError};
pub use lock::{AffinityLock, AffinityStrategy, LockHandle, LockInventory};
pub use manager::AffinityManager;
pub use mask::Mask;
pub use thread::ThreadHandle;
pub use topology::{
    CpuLayout, EntityKind, EntityType, LayoutSource, LogicalCpuDescriptor, TopologyEntity, BUILD_ATTEMPTS,
};
