//! Errors raised while probing the platform.

use affinity_core::LayoutError;
use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum PlatformError {
    /// I/O or system call error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A topology file or CPU list had an unexpected shape.
    #[error("Failed to parse topology data: {0}")]
    ParseError(String),

    /// The probed data did not form a consistent layout.
    #[error(transparent)]
    Layout(#[from] LayoutError),

    /// Operation not supported on this platform
    #[error("topology probing is not supported on this platform")]
    NotSupported,

    /// The hwloc library could not produce a topology.
    #[error("hwloc topology unavailable: {0}")]
    Hwloc(String),
}
