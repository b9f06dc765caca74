//! Cooperative single-threaded scheduling.
//!
//! Task bodies are `async` blocks: each one compiles to a state machine that
//! is resumed by polling and suspends at [`Yielder::yield_now`]. No OS thread
//! is created per task and nothing runs in parallel; a body that never
//! yields keeps the scheduler until it returns.
//!
//! ```
//! use triad_rs::scheduler::CooperativeScheduler;
//!
//! let mut scheduler = CooperativeScheduler::default();
//! scheduler
//!     .schedule("count", |y| async move {
//!         let mut total = 0;
//!         for i in 0..3 {
//!             total += i;
//!             y.yield_now().await;
//!         }
//!         Ok(total)
//!     })
//!     .unwrap();
//!
//! let outcomes = scheduler.run().unwrap();
//! assert_eq!(outcomes["count"], Ok(3));
//! ```

pub mod cooperative;
pub mod task;
pub mod trace;

pub use cooperative::CooperativeScheduler;
pub use task::{TaskHandle, TaskId, TaskState, YieldNow, Yielder};
pub use trace::{ExecutionTrace, TraceEvent};
