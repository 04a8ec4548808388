use affinity_core::{AffinityConfig, AffinityStrategy, CpuLayout, LockInventory, SimulatedBackend};
use clap::Parser;
use crossbeam_utils::thread;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::time::{Duration, Instant};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Synthetic layout as sockets/cores-per-socket/threads-per-core
    #[arg(short, long, default_value = "2/8/2")]
    desc: String,

    #[arg(short, long, default_value_t = 16)]
    threads: usize,

    #[arg(short, long, default_value_t = 20000)]
    iterations: usize,

    /// any, same_core, same_socket, different_core or different_socket
    #[arg(short, long, default_value = "any")]
    strategy: AffinityStrategy,

    /// Allocate whole cores instead of single CPUs
    #[arg(long)]
    cores: bool,
}

const FREE: usize = 0;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let layout = Arc::new(CpuLayout::from_desc(&args.desc)?);
    let backend = Arc::new(SimulatedBackend::for_layout(&layout));
    let config = AffinityConfig::resolve(layout.cpus(), None, None)?;
    let inventory = LockInventory::new(layout.clone(), config, backend);
    let total_requests = args.threads * args.iterations;

    println!("--- AFFINITY LOCK STRESS ---");
    println!("Layout:       {} ({} cpus)", args.desc, layout.cpus());
    println!("Threads:      {}", args.threads);
    println!("Iterations:   {}", args.iterations);
    println!("Strategy:     {}", args.strategy);
    println!("Whole cores:  {}", args.cores);
    println!("----------------------------\n");

    // holder + 1 per CPU, FREE when unassigned
    let owners: Vec<AtomicUsize> = (0..layout.cpus()).map(|_| AtomicUsize::new(FREE)).collect();
    let duplicates = AtomicUsize::new(0);
    let granted = AtomicUsize::new(0);
    let barrier = Barrier::new(args.threads);
    let cpus = layout.cpus() as i32;
    let global_start = Instant::now();

    let mut all_latencies: Vec<Duration> = thread::scope(|s| {
        let handles: Vec<_> = (0..args.threads)
            .map(|worker| {
                let (inventory, owners, duplicates, granted, barrier) =
                    (&inventory, &owners, &duplicates, &granted, &barrier);
                let (strategy, cores, iterations) = (args.strategy, args.cores, args.iterations);
                s.spawn(move |_| {
                    let mut latencies = Vec::with_capacity(iterations);
                    barrier.wait();
                    for i in 0..iterations {
                        let start = Instant::now();
                        let avoid = [(worker + i) as i32 % cpus];
                        let lock = if cores {
                            inventory.acquire_core(false, &[strategy], &avoid)
                        } else {
                            inventory.acquire_lock(false, &[strategy], &avoid)
                        };
                        if lock.is_allocated() {
                            granted.fetch_add(1, Ordering::Relaxed);
                            let owner = &owners[lock.cpu_id() as usize];
                            if owner.compare_exchange(FREE, worker + 1, Ordering::AcqRel, Ordering::Acquire).is_err() {
                                duplicates.fetch_add(1, Ordering::Relaxed);
                            }
                            std::hint::spin_loop();
                            let _ = owner.compare_exchange(worker + 1, FREE, Ordering::AcqRel, Ordering::Acquire);
                        }
                        inventory.release();
                        latencies.push(start.elapsed());
                    }
                    latencies
                })
            })
            .collect();
        handles.into_iter().flat_map(|h| h.join().unwrap_or_default()).collect()
    })
    .map_err(|_| "stress worker panicked")?;

    let total_time = global_start.elapsed();
    let duplicates = duplicates.load(Ordering::Relaxed);
    let granted = granted.load(Ordering::Relaxed);
    let throughput = all_latencies.len() as f64 / total_time.as_secs_f64();

    all_latencies.sort();
    let count = all_latencies.len();
    let avg = if count > 0 { all_latencies.iter().sum::<Duration>() / count as u32 } else { Duration::ZERO };
    let p50 = if count > 0 { all_latencies[count / 2] } else { Duration::ZERO };
    let p99 = if count > 0 { all_latencies[(count as f64 * 0.99) as usize] } else { Duration::ZERO };
    let max = if count > 0 { all_latencies[count - 1] } else { Duration::ZERO };

    println!("\n==================================================");
    println!("           AFFINITY LOCK STRESS RECEIPT           ");
    println!("==================================================");
    println!(" [ BLOCK 1: EXECUTION INTEGRITY ]");
    let status = if duplicates == 0 { "PASS" } else { "FAIL" };
    println!(" Status:       {}", status);
    println!(" Round trips:  {}/{}", count, total_requests);
    println!(" Granted:      {}", granted);
    println!(" Duplicates:   {}", duplicates);
    println!("--------------------------------------------------");
    println!(" [ BLOCK 2: PERFORMANCE METRICS ]");
    println!(" Wall Clock:   {:.2?}", total_time);
    println!(" Throughput:   {:.2} ops/sec", throughput);
    println!("--------------------------------------------------");
    println!(" [ BLOCK 3: STATISTICAL LATENCY ]");
    println!(" Average:      {:.2?}", avg);
    println!(" P50 (Median): {:.2?}", p50);
    println!(" P99 (Tail):   {:.2?}", p99);
    println!(" Max/Jitter:   {:.2?}", max);
    println!("==================================================\n");

    if duplicates > 0 {
        return Err(format!("{duplicates} cpus were handed to two threads at once").into());
    }
    Ok(())
}
