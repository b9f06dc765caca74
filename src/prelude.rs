pub use crate::config::{IsolationConfig, IsolationMode, PoolConfig, SchedulerConfig};
pub use crate::error::{Error, Result};
pub use crate::executor::{PanicStrategy, ThreadWorkerPool};
pub use crate::isolation::IsolatedUnitProcessor;
pub use crate::job::{Job, JobResult, TaskError, TaskErrorKind, TaskResult};
pub use crate::scheduler::{CooperativeScheduler, TaskHandle, TaskState, Yielder};
