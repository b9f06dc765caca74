//! Handles and yield points for cooperatively scheduled tasks.

use serde::{Deserialize, Serialize};
use std::cell::Cell;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

/// Identifier assigned to a task in registration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(pub usize);

/// Lifecycle of a scheduled task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskState {
    /// Registered, never resumed.
    Pending,
    /// Currently executing.
    Running,
    /// Yielded; waiting for its next turn.
    Suspended,
    Completed,
    Failed,
    Cancelled,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed | TaskState::Cancelled
        )
    }
}

#[derive(Debug)]
pub(crate) struct TaskControl {
    state: Cell<TaskState>,
    cancel_requested: Cell<bool>,
    resumptions: Cell<u64>,
}

impl TaskControl {
    fn new() -> Self {
        Self {
            state: Cell::new(TaskState::Pending),
            cancel_requested: Cell::new(false),
            resumptions: Cell::new(0),
        }
    }

    pub fn state(&self) -> TaskState {
        self.state.get()
    }

    pub fn set_state(&self, state: TaskState) {
        self.state.set(state);
    }

    pub fn cancel_requested(&self) -> bool {
        self.cancel_requested.get()
    }

    pub fn count_resumption(&self) {
        self.resumptions.set(self.resumptions.get() + 1);
    }
}

/// Caller-side view of a scheduled task.
#[derive(Debug, Clone)]
pub struct TaskHandle {
    id: TaskId,
    name: Rc<str>,
    pub(crate) control: Rc<TaskControl>,
}

impl TaskHandle {
    pub(crate) fn new(id: TaskId, name: &str) -> Self {
        Self {
            id,
            name: Rc::from(name),
            control: Rc::new(TaskControl::new()),
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> TaskState {
        self.control.state()
    }

    /// Times the scheduler has resumed this task.
    pub fn resumptions(&self) -> u64 {
        self.control.resumptions.get()
    }

    /// Ask the scheduler to stop this task at its next turn.
    ///
    /// Has no effect once the task has finished.
    pub fn cancel(&self) {
        if !self.state().is_terminal() {
            self.control.cancel_requested.set(true);
        }
    }

    pub(crate) fn yielder(&self) -> Yielder {
        Yielder {
            id: self.id,
            control: self.control.clone(),
        }
    }
}

/// Passed to every task body; the only way a task gives up its turn.
#[derive(Debug, Clone)]
pub struct Yielder {
    id: TaskId,
    control: Rc<TaskControl>,
}

impl Yielder {
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Suspend the calling task until every other runnable task had a turn.
    pub fn yield_now(&self) -> YieldNow {
        YieldNow { yielded: false }
    }

    /// True once [`TaskHandle::cancel`] was called; the scheduler stops the
    /// task at its next yield regardless.
    pub fn is_cancelled(&self) -> bool {
        self.control.cancel_requested()
    }
}

/// Future returned by [`Yielder::yield_now`].
#[derive(Debug)]
#[must_use = "yield_now does nothing unless awaited"]
pub struct YieldNow {
    yielded: bool,
}

impl Future for YieldNow {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.yielded {
            Poll::Ready(())
        } else {
            self.yielded = true;
            cx.waker().wake_by_ref();
            Poll::Pending
        }
    }
}
