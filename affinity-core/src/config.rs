//! Which CPUs the allocator may hand out.
//!
//! The base set is where unpinned threads run (the process affinity at start-up). The
//! reserved set is what [`LockInventory`](crate::lock::LockInventory) may assign exclusively.
//! `AFFINITY_RESERVED` overrides the reserved set with a hex mask, most significant digit
//! first, e.g. `AFFINITY_RESERVED=f0` reserves CPUs 4 to 7.

use crate::backend::AffinityBackend;
use crate::error::AffinityError;
use crate::mask::Mask;
use log::{info, warn};
use std::env;

pub const RESERVED_ENV: &str = "AFFINITY_RESERVED";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AffinityConfig {
    base: Mask,
    reserved: Mask,
}

impl AffinityConfig {
    pub fn new(base: Mask, reserved: Mask) -> Self {
        Self { base, reserved }
    }

    /// Resolves the configuration for `cpus` logical CPUs.
    ///
    /// `base` defaults to every CPU. `reserved_hex` wins when given; otherwise the CPUs from 1
    /// upwards outside `base` are reserved, and when that leaves nothing (no isolated CPUs)
    /// every CPU but 0 is.
    pub fn resolve(cpus: usize, base: Option<Mask>, reserved_hex: Option<&str>) -> Result<Self, AffinityError> {
        let base = base.unwrap_or_else(|| Mask::full(cpus));
        let reserved = match reserved_hex.map(str::trim).filter(|s| !s.is_empty()) {
            Some(hex) => parse_hex_mask(hex)?,
            None => {
                let mut reserved = Mask::from_indices(cpus, (1..cpus).filter(|&cpu| !base.test(cpu)));
                if reserved.is_empty() && cpus > 1 {
                    info!("no isolated CPUs found, assuming CPUs 1 to {} are available", cpus - 1);
                    reserved = Mask::from_indices(cpus, 1..cpus);
                }
                reserved
            }
        };
        Ok(Self { base, reserved })
    }

    /// Reads the base set from `backend` and the reserved override from the environment.
    /// An unparsable override is logged and ignored.
    pub fn detect(cpus: usize, backend: &dyn AffinityBackend) -> Self {
        let base = match backend.affinity_mask() {
            Ok(mask) if !mask.is_group() && !mask.is_empty() => Some(mask),
            Ok(_) => None,
            Err(e) => {
                warn!("unable to read base affinity: {e}");
                None
            }
        };
        let env_value = env::var(RESERVED_ENV).ok();
        match Self::resolve(cpus, base.clone(), env_value.as_deref()) {
            Ok(config) => config,
            Err(e) => {
                warn!("ignoring {RESERVED_ENV}: {e}");
                Self::resolve(cpus, base, None).unwrap_or_else(|_| Self::new(Mask::full(cpus), Mask::empty(cpus)))
            }
        }
    }

    pub fn base(&self) -> &Mask {
        &self.base
    }

    pub fn reserved(&self) -> &Mask {
        &self.reserved
    }

    pub fn is_base(&self, cpu: usize) -> bool {
        self.base.test(cpu)
    }

    pub fn is_reservable(&self, cpu: usize) -> bool {
        self.reserved.test(cpu)
    }
}

/// Parses a hex CPU mask written most significant digit first, with an optional `0x`.
pub fn parse_hex_mask(text: &str) -> Result<Mask, AffinityError> {
    let digits = text.trim();
    let digits = digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")).unwrap_or(digits);
    if digits.is_empty() {
        return Err(AffinityError::InvalidMask(text.to_string()));
    }
    let mut mask = Mask::empty(digits.len() * 4);
    for (position, ch) in digits.chars().rev().enumerate() {
        let nibble = ch.to_digit(16).ok_or_else(|| AffinityError::InvalidMask(text.to_string()))?;
        for bit in 0..4 {
            if nibble & (1 << bit) != 0 {
                mask.set(position * 4 + bit);
            }
        }
    }
    Ok(mask)
}
