use crate::topology::CpuLayout;
use std::fmt;
use std::str::FromStr;

/// Placement rule between a candidate CPU and a CPU to stay near or away from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AffinityStrategy {
    Any,
    /// Same socket and same core id.
    SameCore,
    /// Same socket, another core.
    SameSocket,
    /// Core id differs. Sockets are not compared.
    DifferentCore,
    DifferentSocket,
}

impl AffinityStrategy {
    pub const ALL: [AffinityStrategy; 5] = [
        AffinityStrategy::Any,
        AffinityStrategy::SameCore,
        AffinityStrategy::SameSocket,
        AffinityStrategy::DifferentCore,
        AffinityStrategy::DifferentSocket,
    ];

    pub fn matches(self, layout: &CpuLayout, cpu_a: usize, cpu_b: usize) -> bool {
        let same_socket = || layout.socket_id(cpu_a) == layout.socket_id(cpu_b);
        let same_core = || layout.core_id(cpu_a) == layout.core_id(cpu_b);
        match self {
            AffinityStrategy::Any => true,
            AffinityStrategy::SameCore => same_socket() && same_core(),
            AffinityStrategy::SameSocket => same_socket() && !same_core(),
            AffinityStrategy::DifferentCore => !same_core(),
            AffinityStrategy::DifferentSocket => !same_socket(),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            AffinityStrategy::Any => "any",
            AffinityStrategy::SameCore => "same-core",
            AffinityStrategy::SameSocket => "same-socket",
            AffinityStrategy::DifferentCore => "different-core",
            AffinityStrategy::DifferentSocket => "different-socket",
        }
    }
}

impl fmt::Display for AffinityStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for AffinityStrategy {
    type Err = String;

    /// Accepts `same-core`, `same_core` and `SAME_CORE` spellings.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('_', "-");
        AffinityStrategy::ALL
            .into_iter()
            .find(|strategy| strategy.name() == normalized)
            .ok_or_else(|| format!("unknown strategy '{s}'"))
    }
}
