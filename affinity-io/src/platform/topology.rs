use super::affinity::online_cpus;
use super::cpuinfo::{read_cpuinfo, PROC_CPUINFO};
use crate::error::PlatformError;
use affinity_core::config::RESERVED_ENV;
use affinity_core::{AffinityBackend, AffinityConfig, CpuLayout, LayoutError, Mask, BUILD_ATTEMPTS};
use log::{info, warn};
use std::env;

pub const ISOLATED_CPUS: &str = "/sys/devices/system/cpu/isolated";

/// What the running machine looks like: online CPUs and the CPUs isolated from the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemTopology {
    cpus: usize,
    isolated: Vec<usize>,
}

impl SystemTopology {
    /// Probes the system. A missing or unreadable isolated list means nothing is isolated.
    pub fn detect() -> Self {
        let cpus = online_cpus();
        let isolated = match read_isolated_cpus() {
            Ok(isolated) => isolated.into_iter().filter(|&cpu| cpu < cpus).collect(),
            Err(e) => {
                warn!("unable to read isolated cpus: {e}");
                Vec::new()
            }
        };
        info!("Topology Discovery: {} cpus online, isolated {:?}", cpus, isolated);
        Self { cpus, isolated }
    }

    pub fn with_cpus(cpus: usize, isolated: Vec<usize>) -> Self {
        Self { cpus: cpus.max(1), isolated }
    }

    pub fn cpus(&self) -> usize {
        self.cpus
    }

    pub fn isolated_cpus(&self) -> &[usize] {
        &self.isolated
    }

    /// Builds the layout from the best available source, retrying before falling back to a
    /// flat layout of the online CPUs.
    pub fn layout(&self) -> CpuLayout {
        let source = || -> Result<CpuLayout, LayoutError> {
            #[cfg(feature = "hwloc")]
            match super::hwloc::layout_from_hwloc() {
                Ok(layout) => return Ok(layout),
                Err(e) => warn!("hwloc topology unavailable, reading {PROC_CPUINFO}: {e}"),
            }
            let cpus = read_cpuinfo(PROC_CPUINFO).map_err(into_layout_error)?;
            CpuLayout::from_descriptors(cpus)
        };
        CpuLayout::build_with_retry(&source, BUILD_ATTEMPTS, self.cpus)
    }

    /// Allocator configuration. Isolated CPUs are taken out of the base set when the process
    /// affinity still covers them, so they become the reserved set.
    pub fn affinity_config(&self, backend: &dyn AffinityBackend) -> AffinityConfig {
        let base = Mask::from_indices(self.cpus, (0..self.cpus).filter(|cpu| !self.isolated.contains(cpu)));
        if self.isolated.is_empty() || base.is_empty() {
            return AffinityConfig::detect(self.cpus, backend);
        }
        let env_value = env::var(RESERVED_ENV).ok();
        AffinityConfig::resolve(self.cpus, Some(base.clone()), env_value.as_deref()).unwrap_or_else(|e| {
            warn!("ignoring {RESERVED_ENV}: {e}");
            let reserved = Mask::from_indices(self.cpus, self.isolated.iter().copied());
            AffinityConfig::new(base, reserved)
        })
    }
}

fn into_layout_error(err: PlatformError) -> LayoutError {
    match err {
        PlatformError::Layout(e) => e,
        other => LayoutError::MalformedRecord(other.to_string()),
    }
}

/// Parses a kernel CPU list such as `0-3,8,10-11`. Empty input is an empty list.
pub fn parse_cpu_range_list(text: &str) -> Result<Vec<usize>, PlatformError> {
    let mut cpus = Vec::new();
    for part in text.trim().split(',').map(str::trim).filter(|part| !part.is_empty()) {
        let parse = |s: &str| {
            s.trim()
                .parse::<usize>()
                .map_err(|_| PlatformError::ParseError(format!("invalid cpu list entry: {part}")))
        };
        match part.split_once('-') {
            Some((start, end)) => {
                let (start, end) = (parse(start)?, parse(end)?);
                if start > end {
                    return Err(PlatformError::ParseError(format!("descending cpu range: {part}")));
                }
                cpus.extend(start..=end);
            }
            None => cpus.push(parse(part)?),
        }
    }
    cpus.sort_unstable();
    cpus.dedup();
    Ok(cpus)
}

#[cfg(target_os = "linux")]
pub fn read_isolated_cpus() -> Result<Vec<usize>, PlatformError> {
    parse_cpu_range_list(&std::fs::read_to_string(ISOLATED_CPUS)?)
}

#[cfg(not(target_os = "linux"))]
pub fn read_isolated_cpus() -> Result<Vec<usize>, PlatformError> {
    Err(PlatformError::NotSupported)
}
