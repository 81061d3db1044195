use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Result, ensure};
use clap::{Parser, ValueEnum};
use hazlist::{LockFreeList, reclaim, stats};
use rand::Rng;
use tracing::info;

#[derive(Parser)]
#[command(name = "hazlist-stress")]
#[command(about = "Concurrent workload harness for the hazlist set")]
struct Args {
    /// Worker threads per round
    #[arg(long, default_value = "8")]
    threads: usize,

    /// Elements per round (rounded down to a multiple of the thread count)
    #[arg(long, default_value = "8000")]
    elements: usize,

    /// Rounds per workload
    #[arg(long, default_value = "10")]
    rounds: u32,

    /// Workload to run
    #[arg(long, value_enum, default_value_t = Workload::All)]
    workload: Workload,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Workload {
    /// Disjoint parallel inserts
    Insert,
    /// Parallel deletes of a prefilled set
    Delete,
    /// Inserters racing deleters over the same range
    Mixed,
    /// Randomized insert/remove/contains churn
    Churn,
    /// Everything above, in order
    All,
}

impl std::fmt::Display for Workload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Workload::Insert => write!(f, "insert"),
            Workload::Delete => write!(f, "delete"),
            Workload::Mixed => write!(f, "mixed"),
            Workload::Churn => write!(f, "churn"),
            Workload::All => write!(f, "all"),
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("info".parse()?),
        )
        .with_target(false)
        .init();

    let args = Args::parse();
    let threads = args.threads.max(1);
    let per_thread = (args.elements / threads).max(1);
    let elements = per_thread * threads;

    info!("🚀 hazlist stress harness");
    info!("├─ Threads: {threads}");
    info!("├─ Elements per round: {elements}");
    info!("├─ Rounds: {}", args.rounds);
    info!("└─ Workload: {}", args.workload);

    for round in 1..=args.rounds {
        if matches!(args.workload, Workload::Insert | Workload::All) {
            let spent = insert_round(threads, per_thread)?;
            info!(round, "{elements} inserts, {}ms", spent.as_millis());
        }
        if matches!(args.workload, Workload::Delete | Workload::All) {
            let spent = delete_round(threads, per_thread)?;
            info!(round, "{elements} deletes, {}ms", spent.as_millis());
        }
        if matches!(args.workload, Workload::Mixed | Workload::All) {
            let spent = mixed_round(threads, per_thread)?;
            info!(round, "{elements} mixed insert/delete, {}ms", spent.as_millis());
        }
        if matches!(args.workload, Workload::Churn | Workload::All) {
            let spent = churn_round(threads, per_thread)?;
            info!(round, "{elements} random ops, {}ms", spent.as_millis());
        }
    }

    reclaim::flush();
    let nodes = stats::node_stats();
    info!("✅ all rounds passed");
    info!("├─ Nodes allocated: {}", nodes.allocated);
    info!("├─ Nodes reclaimed: {}", nodes.reclaimed);
    info!("├─ Nodes live: {}", nodes.live());
    info!(
        "└─ Hazard records: {}",
        reclaim::domain().registered_records()
    );
    Ok(())
}

/// Spin until the round gate opens; keeps thread startup out of the timing.
fn wait_for(gate: &AtomicBool) {
    while !gate.load(Ordering::Acquire) {
        thread::yield_now();
    }
}

fn insert_round(threads: usize, per_thread: usize) -> Result<Duration> {
    let list = LockFreeList::new();
    let gate = AtomicBool::new(false);

    let timer = thread::scope(|s| {
        for t in 0..threads {
            let list = &list;
            let gate = &gate;
            s.spawn(move || {
                wait_for(gate);
                for value in t * per_thread..(t + 1) * per_thread {
                    let _ = list.insert(value);
                }
            });
        }
        gate.store(true, Ordering::Release);
        Instant::now()
    });
    let spent = timer.elapsed();

    ensure!(
        list.len() == threads * per_thread,
        "insert round lost elements: {}",
        list.len()
    );
    Ok(spent)
}

fn delete_round(threads: usize, per_thread: usize) -> Result<Duration> {
    let list = LockFreeList::new();
    for value in 0..threads * per_thread {
        let _ = list.insert(value);
    }
    let gate = AtomicBool::new(false);

    let timer = thread::scope(|s| {
        for t in 0..threads {
            let list = &list;
            let gate = &gate;
            s.spawn(move || {
                wait_for(gate);
                for value in t * per_thread..(t + 1) * per_thread {
                    let _ = list.remove(&value);
                }
            });
        }
        gate.store(true, Ordering::Release);
        Instant::now()
    });
    let spent = timer.elapsed();

    ensure!(list.is_empty(), "delete round left elements: {}", list.len());
    Ok(spent)
}

fn mixed_round(threads: usize, per_thread: usize) -> Result<Duration> {
    let inserters = (threads / 2).max(1);
    let deleters = (threads / 2).max(1);
    let total = inserters * per_thread;

    let list = LockFreeList::new();
    let gate = AtomicBool::new(false);
    let deleted = AtomicUsize::new(0);

    let timer = thread::scope(|s| {
        for t in 0..inserters {
            let list = &list;
            let gate = &gate;
            s.spawn(move || {
                wait_for(gate);
                for value in t * per_thread..(t + 1) * per_thread {
                    let _ = list.insert(value);
                }
            });
        }
        for _ in 0..deleters {
            let list = &list;
            let gate = &gate;
            let deleted = &deleted;
            s.spawn(move || {
                wait_for(gate);
                while deleted.load(Ordering::Relaxed) < total {
                    for value in 0..total {
                        if list.remove(&value) {
                            deleted.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                }
            });
        }
        gate.store(true, Ordering::Release);
        Instant::now()
    });
    let spent = timer.elapsed();

    ensure!(
        deleted.load(Ordering::Relaxed) == total,
        "mixed round deleted {} of {total}",
        deleted.load(Ordering::Relaxed)
    );
    ensure!(list.is_empty(), "mixed round left elements: {}", list.len());
    Ok(spent)
}

fn churn_round(threads: usize, per_thread: usize) -> Result<Duration> {
    let keyspace = (threads * per_thread / 4).max(64);
    let ops = per_thread;

    let mut list = LockFreeList::new();
    let gate = AtomicBool::new(false);

    let timer = thread::scope(|s| {
        for _ in 0..threads {
            let list = &list;
            let gate = &gate;
            s.spawn(move || {
                wait_for(gate);
                let mut rng = rand::thread_rng();
                for _ in 0..ops {
                    let value = rng.gen_range(0..keyspace);
                    match rng.gen_range(0..3) {
                        0 => {
                            let _ = list.insert(value);
                        }
                        1 => {
                            let _ = list.remove(&value);
                        }
                        _ => {
                            let _ = list.contains(&value);
                        }
                    }
                }
            });
        }
        gate.store(true, Ordering::Release);
        Instant::now()
    });
    let spent = timer.elapsed();

    let values = list.snapshot();
    ensure!(
        values.windows(2).all(|pair| pair[0] < pair[1]),
        "churn round broke the ordering invariant"
    );
    ensure!(
        values.len() == list.len(),
        "churn round size drifted: {} vs {}",
        values.len(),
        list.len()
    );
    Ok(spent)
}
