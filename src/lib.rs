//! triad - three ways to run the same jobs
//!
//! Every engine takes caller-supplied callables, runs them, and hands back
//! one outcome per task as data: a value or a [`TaskError`]. Task failures
//! never escape as panics or errors of the engine itself; only misuse (such
//! as submitting after shutdown) and infrastructure failures do.
//!
//! # Engines
//!
//! - [`ThreadWorkerPool`]: a fixed set of worker threads draining one
//!   shared FIFO queue. Results are buffered until drained.
//! - [`IsolatedUnitProcessor`]: one isolated unit (a forked process or an
//!   owning thread) per input, results returned in input order with
//!   per-slot errors.
//! - [`CooperativeScheduler`]: single-threaded round-robin over `async`
//!   task bodies that yield explicitly.
//!
//! # Quick Start
//!
//! ```no_run
//! use triad_rs::prelude::*;
//!
//! let config = PoolConfig::builder().num_workers(2).build().unwrap();
//! let pool = ThreadWorkerPool::new(&config).unwrap();
//!
//! pool.submit(0, (2, 3), |(a, b)| Ok(a + b)).unwrap();
//! pool.submit(1, (0, 0), |_| Err(TaskError::failed("boom"))).unwrap();
//! pool.shutdown().unwrap();
//!
//! for result in pool.drain_results() {
//!     println!("{}: {:?}", result.id, result.outcome);
//! }
//! ```

#![warn(missing_debug_implementations)]

pub mod config;
pub mod error;
pub mod executor;
pub mod isolation;
pub mod job;
pub mod prelude;
pub mod scheduler;
pub mod telemetry;

pub use config::{IsolationConfig, IsolationMode, PoolConfig, PoolConfigBuilder, SchedulerConfig};
pub use error::{Error, Result};
pub use executor::ThreadWorkerPool;
pub use isolation::IsolatedUnitProcessor;
pub use job::{Job, JobResult, TaskError, TaskErrorKind, TaskResult};
pub use scheduler::CooperativeScheduler;
