//! Reservation of logical CPUs and physical cores.

pub mod inventory;
pub mod strategy;

pub use inventory::{AffinityLock, LockHandle, LockInventory};
pub use strategy::AffinityStrategy;
