//! Job and result shapes shared by every engine.
//!
//! A [`Job`] owns its identifier, its input and the callable that consumes
//! the input. Once submitted, the engine owns the job; the matching
//! [`JobResult`] is created exactly once and handed back to the caller when
//! results are drained.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Outcome of a single task: its value or the error it produced.
pub type TaskResult<T> = std::result::Result<T, TaskError>;

/// Why a task did not produce a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskErrorKind {
    /// The task returned an error.
    Failed,
    /// The task panicked.
    Panicked,
    /// The execution unit died without handing back a result.
    Crashed,
    /// The deadline passed before the task finished.
    TimedOut,
    /// The task was cancelled before it could finish.
    Cancelled,
}

impl fmt::Display for TaskErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskErrorKind::Failed => "task failed",
            TaskErrorKind::Panicked => "task panicked",
            TaskErrorKind::Crashed => "unit crashed",
            TaskErrorKind::TimedOut => "timed out",
            TaskErrorKind::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Error captured from a task and stored as data in its result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct TaskError {
    kind: TaskErrorKind,
    message: String,
}

impl TaskError {
    pub fn new<S: Into<String>>(kind: TaskErrorKind, message: S) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn failed<S: Into<String>>(message: S) -> Self {
        Self::new(TaskErrorKind::Failed, message)
    }

    pub fn panicked<S: Into<String>>(message: S) -> Self {
        Self::new(TaskErrorKind::Panicked, message)
    }

    pub fn crashed<S: Into<String>>(message: S) -> Self {
        Self::new(TaskErrorKind::Crashed, message)
    }

    pub fn timed_out<S: Into<String>>(message: S) -> Self {
        Self::new(TaskErrorKind::TimedOut, message)
    }

    pub fn cancelled<S: Into<String>>(message: S) -> Self {
        Self::new(TaskErrorKind::Cancelled, message)
    }

    pub fn kind(&self) -> TaskErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

type BoxedTask<I, O> = Box<dyn FnOnce(I) -> TaskResult<O> + Send + 'static>;

/// A unit of work: caller-supplied identifier, input and callable.
///
/// Identifiers are not deduplicated; keeping them unique is up to the caller.
pub struct Job<K, I, O> {
    id: K,
    input: I,
    task: BoxedTask<I, O>,
}

impl<K, I, O> Job<K, I, O> {
    pub fn new<F>(id: K, input: I, task: F) -> Self
    where
        F: FnOnce(I) -> TaskResult<O> + Send + 'static,
    {
        Self {
            id,
            input,
            task: Box::new(task),
        }
    }

    pub fn id(&self) -> &K {
        &self.id
    }

    pub fn input(&self) -> &I {
        &self.input
    }

    pub(crate) fn into_parts(self) -> (K, I, BoxedTask<I, O>) {
        (self.id, self.input, self.task)
    }
}

impl<K: fmt::Debug, I, O> fmt::Debug for Job<K, I, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job").field("id", &self.id).finish_non_exhaustive()
    }
}

/// Result of one executed job, keyed by the job's identifier.
#[derive(Debug, Clone, PartialEq)]
pub struct JobResult<K, O> {
    pub id: K,
    pub outcome: TaskResult<O>,
    /// Index of the worker that ran the job.
    pub worker: usize,
    pub elapsed: Duration,
}

impl<K, O> JobResult<K, O> {
    pub fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn value(&self) -> Option<&O> {
        self.outcome.as_ref().ok()
    }

    pub fn error(&self) -> Option<&TaskError> {
        self.outcome.as_ref().err()
    }

    pub fn into_outcome(self) -> TaskResult<O> {
        self.outcome
    }
}
