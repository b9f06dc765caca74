use super::unit::{spawn_thread_unit, Handoff, UnitHandle};
use crate::config::{IsolationConfig, IsolationMode};
use crate::error::{Error, Result};
use crate::job::{TaskError, TaskResult};
use crossbeam_channel::{unbounded, RecvTimeoutError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

/// Runs each input in its own isolated unit and returns outputs in input order.
#[derive(Debug, Clone, Default)]
pub struct IsolatedUnitProcessor {
    config: IsolationConfig,
}

impl IsolatedUnitProcessor {
    pub fn new(config: IsolationConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &IsolationConfig {
        &self.config
    }

    /// Run `task` once per item and block until every slot is filled.
    ///
    /// `result[i]` always belongs to `items[i]`. A unit that fails, panics,
    /// crashes or misses the deadline fills its own slot with the error and
    /// leaves the others alone. At most `max_units` units are alive at once;
    /// the next item is dispatched as soon as a unit reports.
    ///
    /// The outer `Err` is reserved for failures to create units at all.
    pub fn process<I, O, F>(&self, items: Vec<I>, task: F) -> Result<Vec<TaskResult<O>>>
    where
        I: Send + 'static,
        O: Serialize + DeserializeOwned + Send + 'static,
        F: Fn(I) -> TaskResult<O> + Send + Sync + 'static,
    {
        let total = items.len();
        if total == 0 {
            return Ok(Vec::new());
        }

        let task = Arc::new(task);
        let deadline = self.config.deadline.map(|d| Instant::now() + d);
        let (handoff, reports) = unbounded();

        let mut slots: Vec<Option<TaskResult<O>>> = (0..total).map(|_| None).collect();
        let mut queued = items.into_iter().enumerate();
        let mut live: HashMap<usize, UnitHandle> = HashMap::new();

        tracing::debug!(
            units = total,
            max_live = self.config.max_units,
            mode = ?self.config.mode,
            "processing isolated units"
        );

        loop {
            while live.len() < self.config.max_units {
                let Some((index, item)) = queued.next() else {
                    break;
                };
                match self.spawn_unit(index, item, &task, handoff.clone()) {
                    Ok(unit) => {
                        live.insert(index, unit);
                    }
                    Err(e) => {
                        for (_, unit) in live.drain() {
                            unit.abandon();
                        }
                        return Err(e);
                    }
                }
            }

            if live.is_empty() {
                break;
            }

            let report = match deadline {
                Some(deadline) => reports.recv_deadline(deadline),
                None => reports
                    .recv()
                    .map_err(|_| RecvTimeoutError::Disconnected),
            };

            match report {
                Ok((index, outcome)) => {
                    live.remove(&index);
                    if let Err(ref err) = outcome {
                        tracing::debug!(unit = index, error = %err, "unit reported failure");
                    }
                    slots[index] = Some(outcome);
                }
                Err(RecvTimeoutError::Timeout) => {
                    tracing::warn!(
                        running = live.len(),
                        "isolated units missed the deadline"
                    );
                    for (index, unit) in live.drain() {
                        unit.abandon();
                        slots[index] = Some(Err(TaskError::timed_out(
                            "unit did not finish before the deadline",
                        )));
                    }
                    for (index, _) in queued.by_ref() {
                        slots[index] = Some(Err(TaskError::timed_out(
                            "unit was not started before the deadline",
                        )));
                    }
                    break;
                }
                // cannot happen while `handoff` is held here
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(Error::executor("unit handoff channel closed"));
                }
            }
        }

        Ok(slots
            .into_iter()
            .map(|slot| {
                slot.unwrap_or_else(|| Err(TaskError::crashed("unit produced no handoff")))
            })
            .collect())
    }

    /// Like [`process`](Self::process), but the first failed slot fails the
    /// whole call.
    pub fn process_all<I, O, F>(&self, items: Vec<I>, task: F) -> Result<Vec<O>>
    where
        I: Send + 'static,
        O: Serialize + DeserializeOwned + Send + 'static,
        F: Fn(I) -> TaskResult<O> + Send + Sync + 'static,
    {
        self.process(items, task)?
            .into_iter()
            .enumerate()
            .map(|(index, slot)| slot.map_err(|source| Error::UnitFailed { index, source }))
            .collect()
    }

    fn spawn_unit<I, O, F>(
        &self,
        index: usize,
        item: I,
        task: &Arc<F>,
        handoff: Handoff<O>,
    ) -> Result<UnitHandle>
    where
        I: Send + 'static,
        O: Serialize + DeserializeOwned + Send + 'static,
        F: Fn(I) -> TaskResult<O> + Send + Sync + 'static,
    {
        let prefix = &self.config.thread_name_prefix;
        match self.config.mode {
            #[cfg(unix)]
            IsolationMode::Process => {
                super::process::spawn_process_unit(index, item, task.as_ref(), handoff, prefix)
            }
            IsolationMode::Thread => {
                spawn_thread_unit(index, item, Arc::clone(task), handoff, prefix)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::TaskErrorKind;
    use std::thread;
    use std::time::Duration;

    fn processor(mode: IsolationMode) -> IsolatedUnitProcessor {
        IsolatedUnitProcessor::new(IsolationConfig::default().with_mode(mode).with_max_units(4))
            .unwrap()
    }

    #[test]
    fn test_empty_input() {
        let out = processor(IsolationMode::Thread)
            .process(Vec::<i32>::new(), |x| Ok(x))
            .unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_thread_mode_keeps_order() {
        let out = processor(IsolationMode::Thread)
            .process_all(vec![5u64, 3, 9], |x| {
                thread::sleep(Duration::from_millis(x));
                Ok(x * x)
            })
            .unwrap();
        assert_eq!(out, vec![25, 9, 81]);
    }

    #[test]
    fn test_per_slot_failure() {
        let out = processor(IsolationMode::Thread)
            .process(vec![1, 2, 3], |x: i32| {
                if x == 2 {
                    Err(TaskError::failed("two"))
                } else {
                    Ok(x)
                }
            })
            .unwrap();
        assert_eq!(out[0], Ok(1));
        assert_eq!(out[1].as_ref().unwrap_err().kind(), TaskErrorKind::Failed);
        assert_eq!(out[2], Ok(3));
    }

    #[test]
    fn test_process_all_reports_first_failure() {
        let err = processor(IsolationMode::Thread)
            .process_all(vec![1, 2, 3], |x: i32| {
                if x >= 2 {
                    Err(TaskError::failed("too big"))
                } else {
                    Ok(x)
                }
            })
            .unwrap_err();
        assert!(matches!(err, Error::UnitFailed { index: 1, .. }));
    }

    #[test]
    fn test_window_of_one_runs_everything() {
        let processor = IsolatedUnitProcessor::new(
            IsolationConfig::default()
                .with_mode(IsolationMode::Thread)
                .with_max_units(1),
        )
        .unwrap();
        let out = processor.process_all((0..20).collect(), |x: i32| Ok(x + 1)).unwrap();
        assert_eq!(out, (1..21).collect::<Vec<_>>());
    }

    #[test]
    fn test_deadline_marks_slow_units() {
        let processor = IsolatedUnitProcessor::new(
            IsolationConfig::default()
                .with_mode(IsolationMode::Thread)
                .with_max_units(2)
                .with_deadline(Duration::from_millis(100)),
        )
        .unwrap();

        let out = processor
            .process(vec![0u64, 2_000, 0], |ms| {
                thread::sleep(Duration::from_millis(ms));
                Ok(ms)
            })
            .unwrap();

        assert_eq!(out[0], Ok(0));
        assert_eq!(out[1].as_ref().unwrap_err().kind(), TaskErrorKind::TimedOut);
        assert_eq!(out[2], Ok(0));
    }

    #[cfg(unix)]
    #[test]
    fn test_process_mode_crash_is_per_slot() {
        let out = processor(IsolationMode::Process)
            .process(vec![1u32, 0, 3], |x| {
                if x == 0 {
                    std::process::abort();
                }
                Ok(x * 10)
            })
            .unwrap();
        assert_eq!(out[0], Ok(10));
        assert_eq!(out[1].as_ref().unwrap_err().kind(), TaskErrorKind::Crashed);
        assert_eq!(out[2], Ok(30));
    }

    #[test]
    fn test_rejects_invalid_config() {
        assert!(IsolatedUnitProcessor::new(IsolationConfig::default().with_max_units(0)).is_err());
    }
}
