pub mod affinity;
pub mod cpuinfo;
#[cfg(feature = "hwloc")]
pub mod hwloc;
pub mod null;
pub mod topology;

use affinity_core::AffinityBackend;
use std::sync::Arc;

/// The native backend for this platform, or [`null::NullAffinity`] where there is none.
pub fn default_backend() -> Arc<dyn AffinityBackend> {
    if cfg!(target_os = "linux") {
        Arc::new(affinity::LinuxAffinity::new())
    } else {
        Arc::new(null::NullAffinity)
    }
}
