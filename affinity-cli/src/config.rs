use affinity_core::config::RESERVED_ENV;
use affinity_core::AffinityStrategy;
use clap::Parser;
use std::path::PathBuf;

/// Prints the CPU layout the allocator sees, its entity tree and the lock table.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Synthetic layout as sockets/cores-per-socket/threads-per-core, e.g. 2/8/2
    #[arg(short, long, conflicts_with_all = ["descriptors", "cpuinfo", "properties"])]
    pub desc: Option<String>,

    /// JSON array of logical CPU descriptors
    #[arg(long, conflicts_with_all = ["cpuinfo", "properties"])]
    pub descriptors: Option<PathBuf>,

    /// A saved /proc/cpuinfo
    #[arg(long, conflicts_with = "properties")]
    pub cpuinfo: Option<PathBuf>,

    /// A cpu=socket,core,thread properties file
    #[arg(long)]
    pub properties: Option<PathBuf>,

    /// Reserved CPUs as a hex mask, most significant digit first
    #[arg(short, long, env = RESERVED_ENV)]
    pub reserved: Option<String>,

    /// Print the lock table
    #[arg(short, long)]
    pub locks: bool,

    /// Reserve this many CPUs for the main thread before printing the lock table
    #[arg(short, long, default_value_t = 0)]
    pub acquire: usize,

    /// Placement of each reservation relative to the previous ones, tried in order,
    /// e.g. same_core,same_socket,any
    #[arg(short, long, value_delimiter = ',', default_value = "any")]
    pub strategy: Vec<AffinityStrategy>,

    /// Reserve whole cores instead of single CPUs
    #[arg(long)]
    pub cores: bool,

    /// Bind the main thread natively to each reservation
    #[arg(short, long)]
    pub bind: bool,
}

impl Args {
    /// True when the layout comes from a file or description rather than this machine.
    pub fn is_described(&self) -> bool {
        self.desc.is_some() || self.descriptors.is_some() || self.cpuinfo.is_some() || self.properties.is_some()
    }
}
