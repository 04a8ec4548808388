//! Error types for topology construction, native affinity calls and lock bookkeeping.

use std::io;
use thiserror::Error;

/// Errors raised while reconstructing a [`CpuLayout`](crate::topology::CpuLayout).
///
/// Every variant is fatal for the construction attempt that produced it. Callers that
/// must keep running use [`CpuLayout::build_with_retry`](crate::topology::CpuLayout::build_with_retry),
/// which degrades to a flat layout instead.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum LayoutError {
    /// The raw source reported no logical CPUs at all.
    #[error("topology source reported no logical CPUs")]
    Empty,

    /// `sockets * coresPerSocket * threadsPerCore` does not add up to the CPU count.
    #[error(
        "cpus: {cpus} != sockets: {sockets} * coresPerSocket: {cores_per_socket} * threadsPerCore: {threads_per_core}\n{dump}"
    )]
    InconsistentCounts {
        cpus: usize,
        sockets: usize,
        cores_per_socket: usize,
        threads_per_core: usize,
        dump: String,
    },

    /// A relationship record or descriptor could not be placed in the hierarchy.
    #[error("malformed topology record: {0}")]
    MalformedRecord(String),

    /// A logical CPU is not claimed by any entity of a kind that must cover every CPU.
    #[error("logical CPU {cpu} does not belong to any {kind}")]
    Uncovered { cpu: usize, kind: &'static str },

    /// A synthetic layout description did not have the `s/c/t` shape.
    #[error("invalid layout description '{0}' (expected sockets/coresPerSocket/threadsPerCore)")]
    InvalidDescription(String),
}

/// Errors returned by an [`AffinityBackend`](crate::backend::AffinityBackend).
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum AffinityError {
    /// I/O or system call error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The backend cannot perform the operation on this platform.
    #[error("CPU affinity operation is not supported by this backend")]
    NotSupported,

    /// A mask named a CPU the platform cannot address.
    #[error("CPU {cpu} is invalid (max CPU is {max})")]
    InvalidCpu { cpu: usize, max: usize },

    /// An affinity mask with no CPU set was passed to the backend.
    #[error("affinity mask cannot be empty")]
    EmptyMask,

    /// The backend refused the mask.
    #[error("affinity mask {0} rejected")]
    Rejected(String),

    /// A textual mask (e.g. from `AFFINITY_RESERVED`) could not be parsed.
    #[error("invalid affinity mask '{0}'")]
    InvalidMask(String),
}

/// Caller bugs detected by the lock allocator.
#[derive(Error, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum LockError {
    /// The lock is free or belongs to another thread.
    #[error("cpu {cpu} is not held by the calling thread")]
    NotHeld { cpu: i32 },

    /// The CPU id does not exist in the installed layout.
    #[error("cpu {cpu} is outside the installed layout ({cpus} cpus)")]
    OutOfRange { cpu: i32, cpus: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = LayoutError::InconsistentCounts {
            cpus: 6,
            sockets: 1,
            cores_per_socket: 4,
            threads_per_core: 2,
            dump: "0: CpuInfo{socketId=0, coreId=0, threadId=0}".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "cpus: 6 != sockets: 1 * coresPerSocket: 4 * threadsPerCore: 2\n0: CpuInfo{socketId=0, coreId=0, threadId=0}"
        );

        let err = LockError::NotHeld { cpu: 3 };
        assert_eq!(err.to_string(), "cpu 3 is not held by the calling thread");

        let err = AffinityError::InvalidCpu { cpu: 2048, max: 1023 };
        assert_eq!(err.to_string(), "CPU 2048 is invalid (max CPU is 1023)");
    }

    #[test]
    fn test_from_io_error() {
        let io_err = io::Error::new(io::ErrorKind::PermissionDenied, "Permission denied");
        match AffinityError::from(io_err) {
            AffinityError::Io(err) => assert_eq!(err.kind(), io::ErrorKind::PermissionDenied),
            other => panic!("Expected Io error, got {other:?}"),
        }
    }
}
