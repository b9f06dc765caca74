//! Forked child processes as isolated units.

use super::unit::{Handoff, UnitHandle};
use crate::error::{Error, Result};
use crate::executor::panic_handler::capture;
use crate::job::{TaskError, TaskResult};
use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{fork, ForkResult, Pid};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::sync::Arc;
use std::thread;

const EXIT_WRITE_FAILED: i32 = 101;
const EXIT_ENCODE_FAILED: i32 = 102;

pub(crate) struct ProcessUnit {
    pid: Pid,
    // true until the reader has reaped the child; the pid is ours while it holds
    alive: Arc<Mutex<bool>>,
}

impl ProcessUnit {
    pub fn kill(&self) {
        let alive = self.alive.lock();
        if *alive {
            if let Err(e) = kill(self.pid, Signal::SIGKILL) {
                tracing::warn!(pid = self.pid.as_raw(), error = %e, "failed to kill unit");
            }
        }
    }
}

pub(crate) fn spawn_process_unit<I, O, F>(
    index: usize,
    input: I,
    task: &F,
    handoff: Handoff<O>,
    name_prefix: &str,
) -> Result<UnitHandle>
where
    O: Serialize + DeserializeOwned + Send + 'static,
    F: Fn(I) -> TaskResult<O>,
{
    let (mut parent_end, mut child_end) = UnixStream::pair()?;

    // SAFETY: the child only runs the task, writes one report to its socket
    // and leaves through `_exit` without unwinding into the caller's frames.
    // The parent may be multi-threaded and the task may allocate, lock or
    // log, so the child is only sound while no other parent thread held a
    // lock the task needs (allocator, stdio, a user mutex) at the moment of
    // the fork. A child that inherits such a lock blocks forever; set
    // `IsolationConfig::deadline` so it is killed and reported `TimedOut`.
    match unsafe { fork() } {
        Err(e) => Err(Error::spawn(format!("fork failed for unit {}: {}", index, e))),
        Ok(ForkResult::Child) => {
            drop(parent_end);
            let outcome = capture(|| task(input));
            let code = match serde_json::to_vec(&outcome) {
                Ok(bytes) => {
                    if child_end.write_all(&bytes).is_ok() {
                        0
                    } else {
                        EXIT_WRITE_FAILED
                    }
                }
                Err(_) => EXIT_ENCODE_FAILED,
            };
            drop(child_end);
            unsafe { libc::_exit(code) }
        }
        Ok(ForkResult::Parent { child }) => {
            drop(child_end);

            let alive = Arc::new(Mutex::new(true));
            let reader_alive = alive.clone();
            let spawned = thread::Builder::new()
                .name(format!("{}-{}", name_prefix, index))
                .spawn(move || {
                    let outcome = collect_report(&mut parent_end, child, &reader_alive);
                    let _ = handoff.send((index, outcome));
                });

            if let Err(e) = spawned {
                let _ = kill(child, Signal::SIGKILL);
                let _ = reap(child);
                return Err(Error::spawn(format!(
                    "unit {} reader spawn failed: {}",
                    index, e
                )));
            }

            tracing::trace!(unit = index, pid = child.as_raw(), "unit forked");
            Ok(UnitHandle::Process(ProcessUnit { pid: child, alive }))
        }
    }
}

fn collect_report<O: DeserializeOwned>(
    stream: &mut UnixStream,
    child: Pid,
    alive: &Mutex<bool>,
) -> TaskResult<O> {
    let mut report = Vec::new();
    let read = stream.read_to_end(&mut report);

    let status = {
        let mut alive = alive.lock();
        let status = reap(child);
        *alive = false;
        status
    };

    match read {
        Ok(_) if !report.is_empty() => serde_json::from_slice(&report).unwrap_or_else(|e| {
            Err(TaskError::crashed(format!("undecodable unit report: {}", e)))
        }),
        Ok(_) => {
            let reason = describe_exit(&status);
            tracing::debug!(pid = child.as_raw(), %reason, "unit ended without a report");
            Err(TaskError::crashed(reason))
        }
        Err(e) => Err(TaskError::crashed(format!("unit handoff read failed: {}", e))),
    }
}

fn reap(child: Pid) -> nix::Result<WaitStatus> {
    loop {
        match waitpid(child, None) {
            Err(Errno::EINTR) => continue,
            other => return other,
        }
    }
}

fn describe_exit(status: &nix::Result<WaitStatus>) -> String {
    match status {
        Ok(WaitStatus::Exited(_, code)) => {
            format!("unit exited with status {} before reporting", code)
        }
        Ok(WaitStatus::Signaled(_, signal, _)) => format!("unit killed by {:?}", signal),
        Ok(other) => format!("unit stopped unexpectedly: {:?}", other),
        Err(e) => format!("unit could not be reaped: {}", e),
    }
}
