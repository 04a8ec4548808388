//! Thread affinity through `sched_setaffinity(2)`.

use affinity_core::{AffinityBackend, AffinityError, Mask};
use log::{debug, warn};

/// Maximum CPU ID that can be used with CPU_SET.
///
/// The `cpu_set_t` in glibc is fixed at this size, even though the kernel supports more CPUs.
pub const CPU_SETSIZE: usize = 1024;

/// Linux backend. Every call acts on the calling thread (`pid` 0).
#[derive(Debug, Default, Clone, Copy)]
pub struct LinuxAffinity;

impl LinuxAffinity {
    pub fn new() -> Self {
        Self
    }
}

#[cfg(target_os = "linux")]
impl AffinityBackend for LinuxAffinity {
    fn affinity_mask(&self) -> Result<Mask, AffinityError> {
        // safety: cpu_set_t is a POD type, zero-initialization is standard
        let mut cpu_set: libc::cpu_set_t = unsafe { std::mem::zeroed() };

        // safety: sched_getaffinity is safe with valid parameters
        let result = unsafe { libc::sched_getaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &mut cpu_set) };
        if result != 0 {
            return Err(AffinityError::Io(std::io::Error::last_os_error()));
        }

        // safety: CPU_ISSET is safe for any cpu < CPU_SETSIZE
        let cpus: Vec<usize> = (0..CPU_SETSIZE).filter(|&cpu| unsafe { libc::CPU_ISSET(cpu, &cpu_set) }).collect();
        let len = cpus.last().map_or(0, |&highest| highest + 1).max(online_cpus());
        Ok(Mask::from_indices(len, cpus))
    }

    fn set_affinity_mask(&self, mask: &Mask) -> Result<(), AffinityError> {
        if mask.is_group() {
            return Err(AffinityError::NotSupported);
        }
        // safety: cpu_set_t is a POD type, zero-initialization is standard
        let mut cpu_set: libc::cpu_set_t = unsafe { std::mem::zeroed() };
        let mut has_cpus = false;
        for cpu in mask.indices() {
            // Also validate against CPU_SETSIZE to prevent undefined behavior
            if cpu >= CPU_SETSIZE {
                return Err(AffinityError::InvalidCpu { cpu, max: CPU_SETSIZE - 1 });
            }
            // safety: We've validated cpu is within valid range
            unsafe {
                libc::CPU_SET(cpu, &mut cpu_set);
            }
            has_cpus = true;
        }
        if !has_cpus {
            return Err(AffinityError::EmptyMask);
        }

        // safety: sched_setaffinity is safe with valid parameters
        let result = unsafe { libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &cpu_set) };
        if result != 0 {
            let err = std::io::Error::last_os_error();
            warn!("Failed to set affinity {}: {}", mask, err);
            return Err(AffinityError::Io(err));
        }
        debug!("affinity set to {}", mask);
        Ok(())
    }

    fn current_cpu_id(&self) -> i32 {
        // safety: no arguments, returns -1 on failure
        unsafe { libc::sched_getcpu() }
    }

    fn current_process_id(&self) -> i32 {
        nix::unistd::getpid().as_raw()
    }

    fn current_thread_id(&self) -> i32 {
        nix::unistd::gettid().as_raw()
    }
}

#[cfg(not(target_os = "linux"))]
impl AffinityBackend for LinuxAffinity {
    fn affinity_mask(&self) -> Result<Mask, AffinityError> {
        Err(AffinityError::NotSupported)
    }

    fn set_affinity_mask(&self, _mask: &Mask) -> Result<(), AffinityError> {
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

/// Number of online CPUs as reported by `sysconf`, at least 1.
#[cfg(unix)]
pub fn online_cpus() -> usize {
    // safety: sysconf has no memory-safety preconditions
    let count = unsafe { libc::sysconf(libc::_SC_NPROCESSORS_ONLN) };
    if count <= 0 {
        warn!("Failed to detect CPU count via libc. Fallback to {}.", num_cpus::get());
        num_cpus::get().max(1)
    } else {
        count as usize
    }
}

#[cfg(not(unix))]
pub fn online_cpus() -> usize {
    num_cpus::get().max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[cfg(target_os = "linux")]
    fn test_round_trip_current_mask() {
        let backend = LinuxAffinity::new();
        let original = backend.affinity_mask().expect("sched_getaffinity");
        assert!(!original.is_empty());
        assert!(original.indices().iter().all(|&cpu| cpu < CPU_SETSIZE));

        let first = original.lowest_set().unwrap();
        match backend.set_affinity_mask(&Mask::single(original.indices().len(), first)) {
            Ok(()) => {
                assert_eq!(backend.affinity_mask().unwrap().indices(), vec![first]);
                assert_eq!(backend.current_cpu_id(), first as i32);
                backend.set_affinity_mask(&original).expect("restore affinity");
            }
            Err(AffinityError::Io(err)) => eprintln!("Skipping affinity test: {err}"),
            Err(e) => panic!("Unexpected error: {e:?}"),
        }
    }

    #[test]
    #[cfg(target_os = "linux")]
    fn test_rejects_bad_masks() {
        let backend = LinuxAffinity::new();
        assert!(matches!(backend.set_affinity_mask(&Mask::empty(4)), Err(AffinityError::EmptyMask)));
        assert!(matches!(
            backend.set_affinity_mask(&Mask::single(2048, 2000)),
            Err(AffinityError::InvalidCpu { cpu: 2000, max: 1023 })
        ));
        assert!(matches!(backend.set_affinity_mask(&Mask::group(0, 1)), Err(AffinityError::NotSupported)));
    }

    #[test]
    #[cfg(target_os = "linux")]
    fn test_ids() {
        let backend = LinuxAffinity::new();
        assert_eq!(backend.current_process_id(), std::process::id() as i32);
        assert!(backend.current_thread_id() > 0);
        assert!(backend.current_cpu_id() >= 0);
        assert!(online_cpus() >= 1);
    }

    #[test]
    #[cfg(not(target_os = "linux"))]
    fn test_not_supported_on_non_linux() {
        let backend = LinuxAffinity::new();
        assert!(matches!(backend.affinity_mask(), Err(AffinityError::NotSupported)));
        assert_eq!(backend.current_cpu_id(), -1);
    }
}
