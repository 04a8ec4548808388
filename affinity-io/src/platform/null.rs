use affinity_core::{AffinityBackend, AffinityError, Mask};
use log::trace;

/// Backend for platforms without affinity support. Reads return nothing useful and every
/// set request is refused.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullAffinity;

impl AffinityBackend for NullAffinity {
    fn affinity_mask(&self) -> Result<Mask, AffinityError> {
        Ok(Mask::empty(0))
    }

    fn set_affinity_mask(&self, mask: &Mask) -> Result<(), AffinityError> {
        trace!("unable to set mask to {} as the platform has no support", mask);
        Err(AffinityError::NotSupported)
    }

    fn current_cpu_id(&self) -> i32 {
        -1
    }

    fn current_process_id(&self) -> i32 {
        std::process::id() as i32
    }

    fn current_thread_id(&self) -> i32 {
        -1
    }
}
