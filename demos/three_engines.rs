//! Runs the same kind of work through each of the three engines.

use std::time::Duration;
use triad_rs::prelude::*;
use triad_rs::telemetry::{init_logging, LogConfig};

fn add((a, b): (i64, i64)) -> TaskResult<i64> {
    Ok(a + b)
}

fn worker_pool() -> triad_rs::Result<()> {
    println!("=== Worker pool ===");

    let config = PoolConfig::builder()
        .num_workers(2)
        .enable_metrics(true)
        .build()?;
    let pool: ThreadWorkerPool<u32, (i64, i64), i64> = ThreadWorkerPool::new(&config)?;

    pool.submit(0, (2, 3), add)?;
    pool.submit(1, (0, 0), |_| Err(TaskError::failed("boom")))?;
    pool.submit(2, (4, 4), add)?;
    pool.shutdown()?;

    let mut results = pool.drain_results();
    results.sort_by_key(|r| r.id);
    for result in &results {
        match &result.outcome {
            Ok(v) => println!("  job {} -> {} (worker {})", result.id, v, result.worker),
            Err(e) => println!("  job {} failed: {}", result.id, e),
        }
    }

    if let Some(snapshot) = pool.metrics() {
        println!(
            "  succeeded={} failed={} p99={:?}",
            snapshot.jobs_succeeded,
            snapshot.jobs_failed,
            Duration::from_nanos(snapshot.p99_latency_ns)
        );
    }
    Ok(())
}

fn isolated_units() -> triad_rs::Result<()> {
    println!("\n=== Isolated units ===");

    let processor = IsolatedUnitProcessor::default();
    println!("  mode: {:?}", processor.config().mode);

    let squares = processor.process_all(vec![5i64, 3, 9], |x| Ok(x * x))?;
    println!("  squares: {:?}", squares);

    let slots = processor.process(vec![4i64, -1, 6], |x| {
        if x < 0 {
            panic!("negative input {}", x);
        }
        Ok(x / 2)
    })?;
    for (i, slot) in slots.iter().enumerate() {
        println!("  slot {}: {:?}", i, slot);
    }
    Ok(())
}

fn cooperative_tasks() -> triad_rs::Result<()> {
    println!("\n=== Cooperative tasks ===");

    let mut scheduler = CooperativeScheduler::default();
    for (name, yields) in [("a", 3u32), ("b", 3), ("c", 2)] {
        scheduler.schedule(name, move |y| async move {
            for step in 0..yields {
                println!("  {} step {}", name, step);
                y.yield_now().await;
            }
            println!("  {} done", name);
            Ok(yields)
        })?;
    }

    let outcomes = scheduler.run()?;
    let mut names: Vec<_> = outcomes.keys().cloned().collect();
    names.sort();
    for name in names {
        println!("  {} -> {:?}", name, outcomes[&name]);
    }

    if let Some(trace) = scheduler.trace() {
        println!("  round robin: {}", trace.is_round_robin());
    }
    Ok(())
}

fn main() -> triad_rs::Result<()> {
    init_logging(&LogConfig::default())?;

    worker_pool()?;
    isolated_units()?;
    cooperative_tasks()?;
    Ok(())
}
