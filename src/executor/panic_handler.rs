use crate::job::{TaskError, TaskResult};
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};

/// How loudly a task panic is reported. Every strategy turns the panic into
/// a `Panicked` result; none of them takes the worker down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PanicStrategy {
    /// Report at error level, for deployments that alert on task panics.
    Escalate,
    Isolate,
    LogAndContinue,
}

impl Default for PanicStrategy {
    fn default() -> Self {
        PanicStrategy::LogAndContinue
    }
}

#[derive(Debug)]
pub struct PanicHandler {
    strategy: PanicStrategy,
    panic_count: AtomicUsize,
}

impl PanicHandler {
    pub fn new(strategy: PanicStrategy) -> Self {
        Self {
            strategy,
            panic_count: AtomicUsize::new(0),
        }
    }

    /// Run `f`, turning a panic into a `Panicked` task error.
    pub fn execute<F, R>(&self, f: F) -> TaskResult<R>
    where
        F: FnOnce() -> TaskResult<R>,
    {
        match catch_unwind(AssertUnwindSafe(f)) {
            Ok(result) => result,
            Err(payload) => {
                self.panic_count.fetch_add(1, Ordering::Relaxed);

                let message = panic_message(payload.as_ref());

                match self.strategy {
                    PanicStrategy::Escalate => {
                        tracing::error!(%message, "task panicked");
                    }
                    PanicStrategy::Isolate => {}
                    PanicStrategy::LogAndContinue => {
                        tracing::warn!(%message, "task panicked");
                    }
                }

                Err(TaskError::panicked(message))
            }
        }
    }

    pub fn panic_count(&self) -> usize {
        self.panic_count.load(Ordering::Relaxed)
    }

    pub fn reset_count(&self) {
        self.panic_count.store(0, Ordering::Relaxed);
    }

    pub fn strategy(&self) -> PanicStrategy {
        self.strategy
    }
}

impl Default for PanicHandler {
    fn default() -> Self {
        Self::new(PanicStrategy::default())
    }
}

/// Run `f` with no logging, for callers that report panics themselves.
pub(crate) fn capture<F, R>(f: F) -> TaskResult<R>
where
    F: FnOnce() -> TaskResult<R>,
{
    catch_unwind(AssertUnwindSafe(f))
        .unwrap_or_else(|payload| Err(TaskError::panicked(panic_message(payload.as_ref()))))
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    }
}
