mod config;

use affinity_core::{
    AffinityBackend, AffinityConfig, CpuLayout, LockInventory, LogicalCpuDescriptor, SimulatedBackend,
};
use affinity_io::platform::cpuinfo::{layout_from_cpuinfo, layout_from_properties};
use affinity_io::{default_backend, SystemTopology};
use anyhow::Context;
use clap::Parser;
use config::Args;
use log::info;
use std::fs;
use std::sync::Arc;

fn described_layout(args: &Args) -> anyhow::Result<Option<CpuLayout>> {
    let layout = if let Some(desc) = &args.desc {
        CpuLayout::from_desc(desc).with_context(|| format!("invalid layout description {desc}"))?
    } else if let Some(path) = &args.descriptors {
        let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        let cpus: Vec<LogicalCpuDescriptor> =
            serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
        CpuLayout::from_descriptors(cpus)?
    } else if let Some(path) = &args.cpuinfo {
        layout_from_cpuinfo(path).with_context(|| format!("loading {}", path.display()))?
    } else if let Some(path) = &args.properties {
        layout_from_properties(path).with_context(|| format!("loading {}", path.display()))?
    } else {
        return Ok(None);
    };
    Ok(Some(layout))
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    // 1. Interrogate hardware, or take the layout given on the command line
    let (layout, backend, config) = match described_layout(&args)? {
        Some(layout) => {
            let layout = Arc::new(layout);
            let backend: Arc<dyn AffinityBackend> = Arc::new(SimulatedBackend::for_layout(&layout));
            let config = AffinityConfig::resolve(layout.cpus(), None, args.reserved.as_deref())?;
            (layout, backend, config)
        }
        None => {
            let system = SystemTopology::detect();
            let layout = Arc::new(system.layout());
            let backend = default_backend();
            let config = match &args.reserved {
                Some(hex) => {
                    let base = backend.affinity_mask().ok().filter(|mask| !mask.is_group() && !mask.is_empty());
                    AffinityConfig::resolve(layout.cpus(), base, Some(hex))?
                }
                None => system.affinity_config(backend.as_ref()),
            };
            (layout, backend, config)
        }
    };
    info!("Using {} layout of {} cpus", if args.is_described() { "described" } else { "detected" }, layout.cpus());

    println!("{}", layout);
    println!("{}", layout.dump_layout());

    // 2. Optional reservations for this thread
    let inventory = LockInventory::new(layout, config, backend);
    let mut held = Vec::new();
    for _ in 0..args.acquire {
        let lock = if args.cores {
            inventory.acquire_core(args.bind, &args.strategy, &held)
        } else {
            inventory.acquire_lock(args.bind, &args.strategy, &held)
        };
        if !lock.is_allocated() {
            println!("No CPU left after {} reservations", held.len());
            break;
        }
        held.push(lock.cpu_id());
    }
    if !held.is_empty() {
        println!("Reserved cpus: {:?}\n", held);
    }

    if args.locks || !held.is_empty() {
        println!("{}", inventory.dump_locks());
    }
    inventory.release();
    Ok(())
}
