//! Worker-thread pool.
//!
//! A fixed number of long-lived OS threads pop jobs from one shared queue,
//! run them under panic capture and push a [`JobResult`](crate::job::JobResult)
//! for every job into a shared result store. Shutdown travels through the
//! same queue as a typed sentinel, one per worker.

pub mod panic_handler;
pub mod pool;
pub mod worker;

pub use panic_handler::{PanicHandler, PanicStrategy};
pub use pool::ThreadWorkerPool;
pub use worker::{WorkerId, WorkerState};
