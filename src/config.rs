use crate::error::{Error, Result};
use crate::executor::PanicStrategy;
use std::time::Duration;

const MAX_WORKERS: usize = 1024;

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub num_workers: Option<usize>,
    pub pin_workers: bool,
    pub stack_size: Option<usize>,
    pub thread_name_prefix: String,
    pub panic_strategy: PanicStrategy,
    pub enable_metrics: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            num_workers: None,
            pin_workers: false,
            stack_size: Some(2 * 1024 * 1024),
            thread_name_prefix: "triad-worker".to_string(),
            panic_strategy: PanicStrategy::default(),
            enable_metrics: true,
        }
    }
}

impl PoolConfig {
    pub fn builder() -> PoolConfigBuilder {
        PoolConfigBuilder::new()
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(n) = self.num_workers {
            if n == 0 {
                return Err(Error::config("num_workers must be > 0"));
            }
            if n > MAX_WORKERS {
                return Err(Error::config("num_workers too large (max 1024)"));
            }
        }

        if let Some(size) = self.stack_size {
            if size == 0 {
                return Err(Error::config("stack_size must be > 0"));
            }
        }

        Ok(())
    }

    pub fn worker_threads(&self) -> usize {
        self.num_workers.unwrap_or_else(num_cpus::get)
    }
}

#[derive(Debug, Default)]
pub struct PoolConfigBuilder {
    config: PoolConfig,
}

impl PoolConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: PoolConfig::default(),
        }
    }

    pub fn num_workers(mut self, n: usize) -> Self {
        self.config.num_workers = Some(n);
        self
    }

    pub fn pin_workers(mut self, pin: bool) -> Self {
        self.config.pin_workers = pin;
        self
    }

    pub fn stack_size(mut self, size: usize) -> Self {
        self.config.stack_size = Some(size);
        self
    }

    pub fn thread_name_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.config.thread_name_prefix = prefix.into();
        self
    }

    pub fn panic_strategy(mut self, strategy: PanicStrategy) -> Self {
        self.config.panic_strategy = strategy;
        self
    }

    pub fn enable_metrics(mut self, enable: bool) -> Self {
        self.config.enable_metrics = enable;
        self
    }

    pub fn build(self) -> Result<PoolConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// How an isolated unit is realised.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationMode {
    /// Forked child process with its own copy-on-write address space.
    ///
    /// The child is forked from a possibly multi-threaded parent and can
    /// deadlock on a lock another thread held at fork time. Pair this mode
    /// with a `deadline` when the caller runs other threads.
    #[cfg(unix)]
    Process,
    /// Dedicated thread owning its input and its own handle to the task.
    Thread,
}

impl Default for IsolationMode {
    #[cfg(unix)]
    fn default() -> Self {
        IsolationMode::Process
    }

    #[cfg(not(unix))]
    fn default() -> Self {
        IsolationMode::Thread
    }
}

#[derive(Debug, Clone)]
pub struct IsolationConfig {
    pub mode: IsolationMode,
    /// Upper bound on units alive at the same time.
    pub max_units: usize,
    /// Units still running this long after `process` starts are reported as timed out.
    pub deadline: Option<Duration>,
    pub thread_name_prefix: String,
}

impl Default for IsolationConfig {
    fn default() -> Self {
        Self {
            mode: IsolationMode::default(),
            max_units: num_cpus::get(),
            deadline: None,
            thread_name_prefix: "triad-unit".to_string(),
        }
    }
}

impl IsolationConfig {
    pub fn with_mode(mut self, mode: IsolationMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_max_units(mut self, max_units: usize) -> Self {
        self.max_units = max_units;
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_units == 0 {
            return Err(Error::config("max_units must be > 0"));
        }
        if self.deadline == Some(Duration::ZERO) {
            return Err(Error::config("deadline must be > 0"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub record_trace: bool,
    /// Stop after this many resumptions; unfinished tasks end as cancelled.
    pub max_turns: Option<u64>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            record_trace: true,
            max_turns: None,
        }
    }
}

impl SchedulerConfig {
    pub fn with_max_turns(mut self, turns: u64) -> Self {
        self.max_turns = Some(turns);
        self
    }

    pub fn with_trace(mut self, record: bool) -> Self {
        self.record_trace = record;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_turns == Some(0) {
            return Err(Error::config("max_turns must be > 0"));
        }
        Ok(())
    }
}
