use affinity_core::*;
use std::sync::Arc;
use std::time::Instant;

fn main() {
    let desc = "4/8/2"; // Dual-rank server shape
    let iterations = 100_000;

    let layout = Arc::new(CpuLayout::from_desc(desc).expect("valid description"));
    let backend = Arc::new(SimulatedBackend::for_layout(&layout));
    let config = AffinityConfig::resolve(layout.cpus(), None, None).expect("default config");
    let inventory = LockInventory::new(layout.clone(), config, backend);

    // 1. Strategy predicates over every CPU pair
    println!("Benchmarking strategy predicates on {} ({} cpus)...", desc, layout.cpus());
    for strategy in AffinityStrategy::ALL {
        let start = Instant::now();
        let mut hits = 0u64;
        for i in 0..layout.cpus() {
            for j in 0..layout.cpus() {
                if strategy.matches(&layout, i, j) {
                    hits += 1;
                }
            }
        }
        println!("{:>16}: {:?} ({} matching pairs)", strategy, start.elapsed(), hits);
    }

    // 2. Acquire/release round trips
    println!("\nBenchmarking acquire/release ({} iterations)...", iterations);
    let start = Instant::now();
    let mut last = -1;
    for _ in 0..iterations {
        last = inventory.acquire_lock(false, &[AffinityStrategy::Any], &[]).cpu_id();
        inventory.release();
    }
    let lock_duration = start.elapsed();
    println!("acquire_lock: {:?} (last cpu: {})", lock_duration, last);

    let start = Instant::now();
    for _ in 0..iterations {
        last = inventory.acquire_core(false, &[AffinityStrategy::DifferentSocket], &[1]).cpu_id();
        inventory.release();
    }
    let core_duration = start.elapsed();
    println!("acquire_core: {:?} (last cpu: {})", core_duration, last);

    println!(
        "\nPer round trip: {:.0} ns (lock), {:.0} ns (core)",
        lock_duration.as_nanos() as f64 / iterations as f64,
        core_duration.as_nanos() as f64 / iterations as f64
    );

    // 3. Location paths, cold then memoized
    let start = Instant::now();
    let dump = layout.dump_layout();
    let cold = start.elapsed();
    let start = Instant::now();
    let again = layout.dump_layout();
    println!("\ndump_layout: {:?} cold, {:?} memoized ({} lines)", cold, start.elapsed(), dump.lines().count());
    assert_eq!(dump, again);
}
