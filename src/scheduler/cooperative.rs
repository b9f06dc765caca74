use super::task::{TaskHandle, TaskId, TaskState, Yielder};
use super::trace::{ExecutionTrace, TraceEvent};
use crate::config::SchedulerConfig;
use crate::error::{Error, Result};
use crate::executor::panic_handler::panic_message;
use crate::job::{TaskError, TaskErrorKind, TaskResult};
use futures::task::noop_waker;
use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::task::{Context, Poll};

type TaskFuture<T> = Pin<Box<dyn Future<Output = TaskResult<T>>>>;
type TaskBody<T> = Box<dyn FnOnce(Yielder) -> TaskFuture<T>>;

struct ScheduledTask<T> {
    handle: TaskHandle,
    // taken on the first resumption
    body: Option<TaskBody<T>>,
    future: Option<TaskFuture<T>>,
}

impl<T> ScheduledTask<T> {
    fn resume(&mut self, cx: &mut Context<'_>) -> Poll<TaskResult<T>> {
        if let Some(body) = self.body.take() {
            self.future = Some(body(self.handle.yielder()));
        }
        match self.future.as_mut() {
            Some(future) => future.as_mut().poll(cx),
            None => Poll::Ready(Err(TaskError::failed("task resumed after it finished"))),
        }
    }
}

/// Single-threaded round-robin scheduler for tasks that yield explicitly.
///
/// Exactly one task runs at a time, and only until its next
/// [`yield_now`](Yielder::yield_now) or its return. A yielding task goes to
/// the back of the run list, so every other unfinished task gets one turn
/// before it runs again. Given the same registration order and yield
/// pattern, the interleaving is identical run to run.
pub struct CooperativeScheduler<T> {
    config: SchedulerConfig,
    run_list: VecDeque<ScheduledTask<T>>,
    next_id: usize,
    clock: u64,
    trace: Option<ExecutionTrace>,
    has_run: bool,
    // outcomes are keyed by name, so each name may be registered once
    names: HashSet<String>,
}

impl<T: 'static> CooperativeScheduler<T> {
    pub fn new(config: SchedulerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::from_valid_config(config))
    }

    fn from_valid_config(config: SchedulerConfig) -> Self {
        let trace = config.record_trace.then(ExecutionTrace::new);
        Self {
            config,
            run_list: VecDeque::new(),
            next_id: 0,
            clock: 0,
            trace,
            has_run: false,
            names: HashSet::new(),
        }
    }

    /// Register a task. `body` is called with the task's [`Yielder`] on its
    /// first turn, not here.
    ///
    /// Names must be unique; a repeated name is rejected with
    /// [`Error::DuplicateTask`].
    pub fn schedule<S, F, Fut>(&mut self, name: S, body: F) -> Result<TaskHandle>
    where
        S: AsRef<str>,
        F: FnOnce(Yielder) -> Fut + 'static,
        Fut: Future<Output = TaskResult<T>> + 'static,
    {
        if self.has_run {
            return Err(Error::AlreadyRun);
        }
        if !self.names.insert(name.as_ref().to_string()) {
            return Err(Error::DuplicateTask(name.as_ref().to_string()));
        }

        let id = TaskId(self.next_id);
        self.next_id += 1;
        let handle = TaskHandle::new(id, name.as_ref());
        tracing::trace!(task = handle.name(), id = id.0, "task scheduled");

        let body: TaskBody<T> =
            Box::new(move |yielder| -> TaskFuture<T> { Box::pin(body(yielder)) });
        self.run_list.push_back(ScheduledTask {
            handle: handle.clone(),
            body: Some(body),
            future: None,
        });

        Ok(handle)
    }

    /// Drive every task to a terminal state and return outcomes by name.
    ///
    /// A task that fails or panics is recorded as failed; the others keep
    /// running. Can only be called once.
    pub fn run(&mut self) -> Result<HashMap<String, TaskResult<T>>> {
        if self.has_run {
            return Err(Error::AlreadyRun);
        }
        self.has_run = true;

        let waker = noop_waker();
        let mut cx = Context::from_waker(&waker);
        let mut outcomes = HashMap::with_capacity(self.run_list.len());
        let mut turns: u64 = 0;

        while let Some(mut task) = self.run_list.pop_front() {
            if task.handle.control.cancel_requested() {
                self.finish(
                    &task.handle,
                    Err(TaskError::cancelled("cancelled by caller")),
                    &mut outcomes,
                );
                continue;
            }

            if self.config.max_turns.map_or(false, |max| turns >= max) {
                tracing::warn!(
                    unfinished = self.run_list.len() + 1,
                    turns,
                    "turn budget exhausted"
                );
                self.finish(
                    &task.handle,
                    Err(TaskError::cancelled("turn budget exhausted")),
                    &mut outcomes,
                );
                while let Some(rest) = self.run_list.pop_front() {
                    self.finish(
                        &rest.handle,
                        Err(TaskError::cancelled("turn budget exhausted")),
                        &mut outcomes,
                    );
                }
                break;
            }

            turns += 1;
            let id = task.handle.id();
            task.handle.control.set_state(TaskState::Running);
            task.handle.control.count_resumption();
            self.record(|timestamp| TraceEvent::Resumed {
                task_id: id,
                timestamp,
            });

            match catch_unwind(AssertUnwindSafe(|| task.resume(&mut cx))) {
                Ok(Poll::Pending) => {
                    task.handle.control.set_state(TaskState::Suspended);
                    self.record(|timestamp| TraceEvent::Yielded {
                        task_id: id,
                        timestamp,
                    });
                    self.run_list.push_back(task);
                }
                Ok(Poll::Ready(outcome)) => self.finish(&task.handle, outcome, &mut outcomes),
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    tracing::warn!(task = task.handle.name(), %message, "task panicked");
                    self.finish(&task.handle, Err(TaskError::panicked(message)), &mut outcomes);
                }
            }
        }

        tracing::debug!(tasks = outcomes.len(), turns, "cooperative run finished");
        Ok(outcomes)
    }

    fn finish(
        &mut self,
        handle: &TaskHandle,
        outcome: TaskResult<T>,
        outcomes: &mut HashMap<String, TaskResult<T>>,
    ) {
        let task_id = handle.id();
        let state = match &outcome {
            Ok(_) => {
                self.record(|timestamp| TraceEvent::Completed { task_id, timestamp });
                TaskState::Completed
            }
            Err(err) if err.kind() == TaskErrorKind::Cancelled => {
                self.record(|timestamp| TraceEvent::Cancelled { task_id, timestamp });
                TaskState::Cancelled
            }
            Err(err) => {
                let message = err.to_string();
                self.record(|timestamp| TraceEvent::Failed {
                    task_id,
                    timestamp,
                    message,
                });
                TaskState::Failed
            }
        };
        handle.control.set_state(state);
        tracing::trace!(task = handle.name(), ?state, "task finished");
        outcomes.insert(handle.name().to_string(), outcome);
    }

    fn record<E>(&mut self, event: E)
    where
        E: FnOnce(u64) -> TraceEvent,
    {
        let timestamp = self.clock;
        self.clock += 1;
        if let Some(ref mut trace) = self.trace {
            trace.record(event(timestamp));
        }
    }
}

impl<T> CooperativeScheduler<T> {
    /// Tasks registered and not yet finished.
    pub fn len(&self) -> usize {
        self.run_list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.run_list.is_empty()
    }

    pub fn has_run(&self) -> bool {
        self.has_run
    }

    pub fn trace(&self) -> Option<&ExecutionTrace> {
        self.trace.as_ref()
    }

    pub fn take_trace(&mut self) -> Option<ExecutionTrace> {
        self.trace.take()
    }
}

impl<T: 'static> Default for CooperativeScheduler<T> {
    fn default() -> Self {
        Self::from_valid_config(SchedulerConfig::default())
    }
}

impl<T> std::fmt::Debug for CooperativeScheduler<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CooperativeScheduler")
            .field("tasks", &self.run_list.len())
            .field("has_run", &self.has_run)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn counting_task(
        log: Rc<RefCell<Vec<String>>>,
        name: &'static str,
        yields: u32,
    ) -> impl FnOnce(Yielder) -> Pin<Box<dyn Future<Output = TaskResult<u32>>>> {
        move |y| {
            Box::pin(async move {
                for i in 0..yields {
                    log.borrow_mut().push(format!("{}{}", name, i));
                    y.yield_now().await;
                }
                Ok(yields)
            })
        }
    }

    #[test]
    fn test_round_robin_interleaving() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut scheduler = CooperativeScheduler::default();
        scheduler.schedule("a", counting_task(log.clone(), "a", 2)).unwrap();
        scheduler.schedule("b", counting_task(log.clone(), "b", 2)).unwrap();

        let outcomes = scheduler.run().unwrap();

        assert_eq!(*log.borrow(), vec!["a0", "b0", "a1", "b1"]);
        assert_eq!(outcomes["a"], Ok(2));
        assert_eq!(outcomes["b"], Ok(2));
        assert!(scheduler.is_empty());
    }

    #[test]
    fn test_state_transitions() {
        let mut scheduler = CooperativeScheduler::default();
        let watcher = scheduler
            .schedule("watcher", |y| async move {
                y.yield_now().await;
                Ok(1)
            })
            .unwrap();
        let observed = Rc::new(RefCell::new(Vec::new()));
        let seen = observed.clone();
        let w = watcher.clone();
        scheduler
            .schedule("observer", move |y| async move {
                seen.borrow_mut().push(w.state());
                y.yield_now().await;
                seen.borrow_mut().push(w.state());
                Ok(0)
            })
            .unwrap();

        assert_eq!(watcher.state(), TaskState::Pending);
        scheduler.run().unwrap();

        assert_eq!(
            *observed.borrow(),
            vec![TaskState::Suspended, TaskState::Completed]
        );
        assert_eq!(watcher.state(), TaskState::Completed);
        assert_eq!(watcher.resumptions(), 2);
    }

    fn explode() -> TaskResult<i32> {
        panic!("exploded")
    }

    #[test]
    fn test_failure_and_panic_do_not_stop_others() {
        let mut scheduler: CooperativeScheduler<i32> = CooperativeScheduler::default();
        let failing = scheduler
            .schedule("failing", |y| async move {
                y.yield_now().await;
                Err(TaskError::failed("bad"))
            })
            .unwrap();
        let panicking = scheduler
            .schedule("panicking", |_| async move { explode() })
            .unwrap();
        scheduler
            .schedule("fine", |y| async move {
                y.yield_now().await;
                y.yield_now().await;
                Ok(7)
            })
            .unwrap();

        let outcomes = scheduler.run().unwrap();

        assert_eq!(outcomes.len(), 3);
        assert_eq!(outcomes["fine"], Ok(7));
        assert_eq!(
            outcomes["failing"].as_ref().unwrap_err().kind(),
            TaskErrorKind::Failed
        );
        assert_eq!(
            outcomes["panicking"].as_ref().unwrap_err().kind(),
            TaskErrorKind::Panicked
        );
        assert_eq!(failing.state(), TaskState::Failed);
        assert_eq!(panicking.state(), TaskState::Failed);
    }

    #[test]
    fn test_run_twice_is_misuse() {
        let mut scheduler: CooperativeScheduler<()> = CooperativeScheduler::default();
        scheduler.run().unwrap();
        assert!(matches!(scheduler.run(), Err(Error::AlreadyRun)));
        assert!(matches!(
            scheduler.schedule("late", |_| async { Ok(()) }),
            Err(Error::AlreadyRun)
        ));
    }

    #[test]
    fn test_cancel_at_yield_point() {
        let mut scheduler: CooperativeScheduler<u32> = CooperativeScheduler::default();
        let victim = scheduler
            .schedule("victim", |y| async move {
                while !y.is_cancelled() {
                    y.yield_now().await;
                }
                Ok(1)
            })
            .unwrap();
        let target = victim.clone();
        scheduler
            .schedule("killer", move |y| async move {
                y.yield_now().await;
                target.cancel();
                Ok(0)
            })
            .unwrap();

        let outcomes = scheduler.run().unwrap();

        assert_eq!(outcomes["killer"], Ok(0));
        assert_eq!(
            outcomes["victim"].as_ref().unwrap_err().kind(),
            TaskErrorKind::Cancelled
        );
        assert_eq!(victim.state(), TaskState::Cancelled);
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let mut scheduler: CooperativeScheduler<u32> = CooperativeScheduler::default();
        scheduler.schedule("dup", |_| async { Ok(1) }).unwrap();

        let err = scheduler
            .schedule("dup", |_| async { Ok(2) })
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateTask(ref name) if name == "dup"));
        assert!(err.is_protocol_misuse());
        assert_eq!(scheduler.len(), 1);

        let outcomes = scheduler.run().unwrap();
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes["dup"], Ok(1));
    }

    #[test]
    fn test_default_matches_default_config() {
        let scheduler: CooperativeScheduler<()> = CooperativeScheduler::default();
        assert_eq!(
            scheduler.trace().is_some(),
            SchedulerConfig::default().record_trace
        );

        let untraced: CooperativeScheduler<()> =
            CooperativeScheduler::new(SchedulerConfig::default().with_trace(false)).unwrap();
        assert!(untraced.trace().is_none());
    }

    #[test]
    fn test_turn_budget_stops_run() {
        let config = SchedulerConfig::default().with_max_turns(3);
        let mut scheduler: CooperativeScheduler<u32> = CooperativeScheduler::new(config).unwrap();
        scheduler.schedule("quick", |_| async { Ok(1) }).unwrap();
        scheduler
            .schedule("forever", |y| async move {
                while !y.is_cancelled() {
                    y.yield_now().await;
                }
                Ok(2)
            })
            .unwrap();

        let outcomes = scheduler.run().unwrap();

        assert_eq!(outcomes["quick"], Ok(1));
        assert_eq!(
            outcomes["forever"].as_ref().unwrap_err().kind(),
            TaskErrorKind::Cancelled
        );
        assert_eq!(scheduler.trace().unwrap().resumption_order().len(), 3);
    }

    #[test]
    fn test_trace_disabled() {
        let config = SchedulerConfig::default().with_trace(false);
        let mut scheduler: CooperativeScheduler<u32> = CooperativeScheduler::new(config).unwrap();
        scheduler.schedule("t", |_| async { Ok(1) }).unwrap();
        scheduler.run().unwrap();
        assert!(scheduler.trace().is_none());
    }
}
