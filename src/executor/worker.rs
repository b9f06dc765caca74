// worker thread stuff
use super::panic_handler::PanicHandler;
use crate::job::{Job, JobResult};
use crate::telemetry::Metrics;
use crossbeam_channel::Receiver;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub type WorkerId = usize;

/// What travels through the job queue.
pub(crate) enum Message<K, I, O> {
    Job(Job<K, I, O>),
    /// Each worker exits after taking exactly one of these.
    Shutdown,
}

// stats for each worker
#[derive(Debug, Default)]
pub struct WorkerState {
    pub jobs_executed: AtomicU64,
    pub jobs_failed: AtomicU64,
    pub busy_time_ns: AtomicU64,
}

/// Results buffered until the caller drains them.
pub(crate) struct ResultStore<K, O> {
    results: Mutex<VecDeque<JobResult<K, O>>>,
    ready: Condvar,
}

impl<K, O> ResultStore<K, O> {
    pub fn new() -> Self {
        Self {
            results: Mutex::new(VecDeque::new()),
            ready: Condvar::new(),
        }
    }

    pub fn push(&self, result: JobResult<K, O>) {
        self.results.lock().push_back(result);
        self.ready.notify_all();
    }

    pub fn drain(&self) -> Vec<JobResult<K, O>> {
        self.results.lock().drain(..).collect()
    }

    /// Block until at least `count` results are buffered or `timeout` passes,
    /// then drain whatever is there.
    pub fn wait_for(&self, count: usize, timeout: Duration) -> Vec<JobResult<K, O>> {
        let deadline = Instant::now() + timeout;
        let mut results = self.results.lock();
        while results.len() < count {
            if self.ready.wait_until(&mut results, deadline).timed_out() {
                break;
            }
        }
        results.drain(..).collect()
    }
}

pub(crate) struct Worker<K, I, O> {
    pub id: WorkerId,
    pub state: Arc<WorkerState>,
    pub jobs: Receiver<Message<K, I, O>>,
    pub results: Arc<ResultStore<K, O>>,
    pub pending: Arc<AtomicUsize>,
    pub completed: Arc<AtomicUsize>,
    pub panic_handler: Arc<PanicHandler>,
    pub metrics: Option<Arc<Metrics>>,
}

impl<K, I, O> Worker<K, I, O> {
    // main loop
    pub fn run(self) {
        tracing::debug!(worker = self.id, "worker started");

        loop {
            match self.jobs.recv() {
                Ok(Message::Job(job)) => self.execute_job(job),
                Ok(Message::Shutdown) => break,
                // every sender is gone, nothing more can arrive
                Err(_) => break,
            }
        }

        tracing::debug!(
            worker = self.id,
            executed = self.state.jobs_executed.load(Ordering::Relaxed),
            "worker exiting"
        );
    }

    fn execute_job(&self, job: Job<K, I, O>) {
        let (id, input, task) = job.into_parts();
        let start = Instant::now();

        let outcome = self.panic_handler.execute(move || task(input));

        let elapsed = start.elapsed();
        let elapsed_ns = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);
        self.state.busy_time_ns.fetch_add(elapsed_ns, Ordering::Relaxed);
        self.state.jobs_executed.fetch_add(1, Ordering::Relaxed);

        match &outcome {
            Ok(_) => {
                if let Some(ref metrics) = self.metrics {
                    metrics.record_success(elapsed);
                }
            }
            Err(err) => {
                self.state.jobs_failed.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(worker = self.id, error = %err, "job failed");
                if let Some(ref metrics) = self.metrics {
                    match err.kind() {
                        crate::job::TaskErrorKind::Panicked => metrics.record_panic(elapsed),
                        _ => metrics.record_failure(elapsed),
                    }
                }
            }
        }

        // counters settle before the result becomes visible to waiters
        self.completed.fetch_add(1, Ordering::Release);
        self.pending.fetch_sub(1, Ordering::AcqRel);
        self.results.push(JobResult {
            id,
            outcome,
            worker: self.id,
            elapsed,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::TaskError;
    use std::thread;

    fn result(id: u32) -> JobResult<u32, u32> {
        JobResult {
            id,
            outcome: Ok(id),
            worker: 0,
            elapsed: Duration::ZERO,
        }
    }

    #[test]
    fn test_store_drain_empties() {
        let store = ResultStore::new();
        assert!(store.drain().is_empty());

        store.push(result(1));
        store.push(result(2));
        assert_eq!(store.drain().len(), 2);
        assert!(store.drain().is_empty());
    }

    #[test]
    fn test_store_wait_for_times_out() {
        let store: ResultStore<u32, u32> = ResultStore::new();
        let start = Instant::now();
        let got = store.wait_for(1, Duration::from_millis(20));
        assert!(got.is_empty());
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_store_wait_for_wakes_on_push() {
        let store = Arc::new(ResultStore::new());
        let producer = {
            let store = store.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(10));
                store.push(result(9));
            })
        };

        let got = store.wait_for(1, Duration::from_secs(5));
        producer.join().unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].id, 9);
    }

    #[test]
    fn test_worker_survives_failures_and_stops_on_shutdown() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let results = Arc::new(ResultStore::new());
        let pending = Arc::new(AtomicUsize::new(2));
        let worker = Worker {
            id: 3,
            state: Arc::new(WorkerState::default()),
            jobs: rx,
            results: results.clone(),
            pending: pending.clone(),
            completed: Arc::new(AtomicUsize::new(0)),
            panic_handler: Arc::new(PanicHandler::new(
                super::super::panic_handler::PanicStrategy::Isolate,
            )),
            metrics: None,
        };

        tx.send(Message::Job(Job::new(0u32, 1u32, |_| -> crate::job::TaskResult<u32> {
            panic!("boom")
        })))
        .unwrap();
        tx.send(Message::Job(Job::new(1u32, 1u32, |_| Err(TaskError::failed("nope")))))
            .unwrap();
        tx.send(Message::Shutdown).unwrap();

        worker.run();

        let drained = results.drain();
        assert_eq!(drained.len(), 2);
        assert!(drained.iter().all(|r| r.worker == 3 && !r.is_ok()));
        assert_eq!(pending.load(Ordering::Acquire), 0);
    }
}
