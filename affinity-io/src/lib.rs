//! Affinity I/O: the platform side of `affinity-core`.
//!
//! Native affinity backends and the raw topology sources that feed
//! [`CpuLayout`](affinity_core::CpuLayout) construction.

pub mod error;
pub mod platform;

pub use error::PlatformError;
pub use platform::affinity::{online_cpus, LinuxAffinity};
pub use platform::default_backend;
pub use platform::null::NullAffinity;
pub use platform::topology::{parse_cpu_range_list, SystemTopology};
