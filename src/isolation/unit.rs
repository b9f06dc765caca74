use crate::error::{Error, Result};
use crate::executor::panic_handler::capture;
use crate::job::TaskResult;
use crossbeam_channel::Sender;
use std::sync::Arc;
use std::thread;

/// Where a unit sends its single `(index, outcome)` pair.
pub(crate) type Handoff<O> = Sender<(usize, TaskResult<O>)>;

pub(crate) enum UnitHandle {
    Thread,
    #[cfg(unix)]
    Process(super::process::ProcessUnit),
}

impl UnitHandle {
    /// Give up on the unit. A process is killed; a thread cannot be, so it
    /// is left to finish and its late handoff is discarded.
    pub fn abandon(self) {
        match self {
            UnitHandle::Thread => {}
            #[cfg(unix)]
            UnitHandle::Process(unit) => unit.kill(),
        }
    }
}

pub(crate) fn spawn_thread_unit<I, O, F>(
    index: usize,
    input: I,
    task: Arc<F>,
    handoff: Handoff<O>,
    name_prefix: &str,
) -> Result<UnitHandle>
where
    I: Send + 'static,
    O: Send + 'static,
    F: Fn(I) -> TaskResult<O> + Send + Sync + 'static,
{
    thread::Builder::new()
        .name(format!("{}-{}", name_prefix, index))
        .spawn(move || {
            let outcome = capture(|| task(input));
            // receiver is gone if the caller already gave up on this unit
            let _ = handoff.send((index, outcome));
        })
        .map_err(|e| Error::spawn(format!("unit {} spawn failed: {}", index, e)))?;

    Ok(UnitHandle::Thread)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::TaskErrorKind;

    #[test]
    fn test_thread_unit_hands_off_once() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let task = Arc::new(|x: i32| Ok(x + 1));
        spawn_thread_unit(4, 41, task, tx, "unit-test").unwrap();

        let (index, outcome) = rx.recv().unwrap();
        assert_eq!(index, 4);
        assert_eq!(outcome, Ok(42));
        assert!(rx.recv().is_err());
    }

    #[test]
    fn test_thread_unit_panic_is_captured() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let task = Arc::new(|_: i32| -> TaskResult<i32> { panic!("unit blew up") });
        spawn_thread_unit(0, 1, task, tx, "unit-test").unwrap();

        let (_, outcome) = rx.recv().unwrap();
        assert_eq!(outcome.unwrap_err().kind(), TaskErrorKind::Panicked);
    }
}
