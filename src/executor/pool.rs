use super::panic_handler::PanicHandler;
use super::worker::{Message, ResultStore, Worker, WorkerId, WorkerState};
use crate::config::PoolConfig;
use crate::error::{Error, Result};
use crate::job::{Job, JobResult, TaskResult};
use crate::telemetry::{Metrics, MetricsSnapshot};
use crossbeam_channel::{unbounded, Sender};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

#[cfg(target_os = "linux")]
fn pin_thread_to_core(core_id: usize) {
    let cores = num_cpus::get();
    unsafe {
        let mut cpuset: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_SET(core_id % cores, &mut cpuset);
        let result = libc::sched_setaffinity(
            0, // current thread
            std::mem::size_of::<libc::cpu_set_t>(),
            &cpuset,
        );
        if result != 0 {
            tracing::warn!(
                thread = std::thread::current().name().unwrap_or("unknown"),
                core_id,
                "failed to pin worker to core"
            );
        }
    }
}

/// Fixed-size pool of worker threads draining one shared FIFO job queue.
///
/// Results are buffered inside the pool until [`drain_results`] or
/// [`wait_for_results`] hands them to the caller. Arrival order across jobs
/// is unspecified.
///
/// [`drain_results`]: ThreadWorkerPool::drain_results
/// [`wait_for_results`]: ThreadWorkerPool::wait_for_results
pub struct ThreadWorkerPool<K, I, O> {
    workers: Mutex<Vec<WorkerHandle>>,
    jobs: Sender<Message<K, I, O>>,
    results: Arc<ResultStore<K, O>>,
    // false once shutdown has started; write-locked while sentinels go out
    accepting: RwLock<bool>,
    num_workers: usize,
    pending: Arc<AtomicUsize>,
    completed: Arc<AtomicUsize>,
    panic_handler: Arc<PanicHandler>,
    metrics: Option<Arc<Metrics>>,
}

struct WorkerHandle {
    id: WorkerId,
    thread: Option<JoinHandle<()>>,
    state: Arc<WorkerState>,
}

impl<K, I, O> ThreadWorkerPool<K, I, O>
where
    K: Send + 'static,
    I: Send + 'static,
    O: Send + 'static,
{
    pub fn new(config: &PoolConfig) -> Result<Self> {
        config.validate()?;
        let num_workers = config.worker_threads();
        if num_workers == 0 {
            return Err(Error::config("need at least 1 worker"));
        }

        let (jobs, receiver) = unbounded();
        let results = Arc::new(ResultStore::new());
        let pending = Arc::new(AtomicUsize::new(0));
        let completed = Arc::new(AtomicUsize::new(0));
        let panic_handler = Arc::new(PanicHandler::new(config.panic_strategy));
        let metrics = config.enable_metrics.then(|| Arc::new(Metrics::new()));

        let mut handles = Vec::with_capacity(num_workers);

        for id in 0..num_workers {
            let state = Arc::new(WorkerState::default());
            let worker = Worker {
                id,
                state: state.clone(),
                jobs: receiver.clone(),
                results: results.clone(),
                pending: pending.clone(),
                completed: completed.clone(),
                panic_handler: panic_handler.clone(),
                metrics: metrics.clone(),
            };
            let name = format!("{}-{}", config.thread_name_prefix, id);

            let mut builder = thread::Builder::new().name(name);

            if let Some(stack_size) = config.stack_size {
                builder = builder.stack_size(stack_size);
            }

            let pin_workers = config.pin_workers;
            let spawned = builder.spawn(move || {
                // Pin worker to core if requested
                #[cfg(target_os = "linux")]
                if pin_workers {
                    pin_thread_to_core(id);
                }
                #[cfg(not(target_os = "linux"))]
                let _ = pin_workers;

                worker.run();
            });

            let thread = match spawned {
                Ok(thread) => thread,
                Err(e) => {
                    // release the workers that did start before reporting
                    for _ in 0..handles.len() {
                        let _ = jobs.send(Message::Shutdown);
                    }
                    for handle in &mut handles {
                        join_worker(handle);
                    }
                    return Err(Error::spawn(format!("worker spawn failed: {}", e)));
                }
            };

            handles.push(WorkerHandle {
                id,
                thread: Some(thread),
                state,
            });
        }

        tracing::info!(workers = num_workers, "thread worker pool started");

        Ok(Self {
            workers: Mutex::new(handles),
            jobs,
            results,
            accepting: RwLock::new(true),
            num_workers,
            pending,
            completed,
            panic_handler,
            metrics,
        })
    }

    /// Enqueue `task(input)` under `id`.
    pub fn submit<F>(&self, id: K, input: I, task: F) -> Result<()>
    where
        F: FnOnce(I) -> TaskResult<O> + Send + 'static,
    {
        self.submit_job(Job::new(id, input, task))
    }

    pub fn submit_job(&self, job: Job<K, I, O>) -> Result<()> {
        let accepting = self.accepting.read();
        if !*accepting {
            return Err(Error::ShutDown);
        }

        self.pending.fetch_add(1, Ordering::AcqRel);
        if let Some(ref metrics) = self.metrics {
            metrics.record_submission();
        }

        if self.jobs.send(Message::Job(job)).is_err() {
            self.pending.fetch_sub(1, Ordering::AcqRel);
            return Err(Error::executor("job queue disconnected"));
        }

        Ok(())
    }

    /// Take every buffered result. Never blocks.
    pub fn drain_results(&self) -> Vec<JobResult<K, O>> {
        self.results.drain()
    }

    /// Block until `count` results are buffered or `timeout` passes, then
    /// take everything buffered.
    pub fn wait_for_results(&self, count: usize, timeout: Duration) -> Vec<JobResult<K, O>> {
        self.results.wait_for(count, timeout)
    }

    /// Stop accepting jobs, let workers drain the queue, then join them.
    ///
    /// Calling it again is a no-op that still waits for the workers to be
    /// joined by whichever call got there first.
    pub fn shutdown(&self) -> Result<()> {
        let mut workers = {
            let mut accepting = self.accepting.write();
            if !*accepting {
                drop(accepting);
                // held by a concurrent shutdown until its joins are done
                drop(self.workers.lock());
                return Ok(());
            }
            *accepting = false;

            // queued after every job already submitted, one per worker
            for _ in 0..self.num_workers {
                self.jobs
                    .send(Message::Shutdown)
                    .map_err(|_| Error::executor("job queue disconnected"))?;
            }

            // taken before `accepting` is released so later callers queue behind it
            self.workers.lock()
        };
        let mut panicked = 0;
        for worker in workers.iter_mut() {
            if !join_worker(worker) {
                panicked += 1;
            }
        }

        tracing::info!(
            completed = self.completed.load(Ordering::Acquire),
            "thread worker pool shut down"
        );

        if panicked > 0 {
            return Err(Error::executor(format!("{} worker(s) panicked", panicked)));
        }
        Ok(())
    }

    pub fn is_shut_down(&self) -> bool {
        !*self.accepting.read()
    }
}

impl<K, I, O> ThreadWorkerPool<K, I, O> {
    pub fn num_workers(&self) -> usize {
        self.num_workers
    }

    /// Jobs submitted but not yet turned into a result.
    pub fn pending_jobs(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    pub fn completed_jobs(&self) -> usize {
        self.completed.load(Ordering::Acquire)
    }

    /// Jobs executed by each worker, indexed by worker id.
    pub fn jobs_per_worker(&self) -> Vec<u64> {
        self.workers
            .lock()
            .iter()
            .map(|w| w.state.jobs_executed.load(Ordering::Relaxed))
            .collect()
    }

    pub fn panic_count(&self) -> usize {
        self.panic_handler.panic_count()
    }

    pub fn metrics(&self) -> Option<MetricsSnapshot> {
        self.metrics.as_ref().map(|m| m.snapshot())
    }
}

fn join_worker(worker: &mut WorkerHandle) -> bool {
    match worker.thread.take() {
        Some(thread) => {
            let joined = thread.join().is_ok();
            if !joined {
                tracing::error!(worker = worker.id, "worker thread panicked");
            }
            joined
        }
        None => true,
    }
}

impl<K, I, O> Drop for ThreadWorkerPool<K, I, O> {
    fn drop(&mut self) {
        let accepting = std::mem::replace(self.accepting.get_mut(), false);
        if accepting {
            for _ in 0..self.num_workers {
                let _ = self.jobs.send(Message::Shutdown);
            }
        }
        for worker in self.workers.get_mut().iter_mut() {
            join_worker(worker);
        }
    }
}

impl<K, I, O> std::fmt::Debug for ThreadWorkerPool<K, I, O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadWorkerPool")
            .field("num_workers", &self.num_workers)
            .field("pending", &self.pending_jobs())
            .field("completed", &self.completed_jobs())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::TaskError;

    fn pool(workers: usize) -> ThreadWorkerPool<u32, i64, i64> {
        let config = PoolConfig::builder().num_workers(workers).build().unwrap();
        ThreadWorkerPool::new(&config).unwrap()
    }

    #[test]
    fn test_submit_and_drain() {
        let pool = pool(2);
        for i in 0..10u32 {
            pool.submit(i, i as i64, |x| Ok(x * x)).unwrap();
        }
        pool.shutdown().unwrap();

        let mut results = pool.drain_results();
        results.sort_by_key(|r| r.id);
        assert_eq!(results.len(), 10);
        for r in &results {
            assert_eq!(r.value(), Some(&((r.id as i64) * (r.id as i64))));
        }
        assert_eq!(pool.pending_jobs(), 0);
        assert_eq!(pool.completed_jobs(), 10);
    }

    #[test]
    fn test_submit_after_shutdown_is_rejected() {
        let pool = pool(1);
        pool.shutdown().unwrap();
        let err = pool.submit(0, 1, Ok).unwrap_err();
        assert!(matches!(err, Error::ShutDown));
        assert!(pool.is_shut_down());
    }

    #[test]
    fn test_shutdown_twice_is_noop() {
        let pool = pool(3);
        pool.shutdown().unwrap();
        pool.shutdown().unwrap();
    }

    #[test]
    fn test_concurrent_shutdown_waits_for_join() {
        let pool = Arc::new(pool(1));
        pool.submit(0, 1, |x| {
            thread::sleep(Duration::from_millis(100));
            Ok(x)
        })
        .unwrap();

        let callers: Vec<_> = (0..4)
            .map(|_| {
                let pool = pool.clone();
                thread::spawn(move || {
                    pool.shutdown().unwrap();
                    // workers are joined, so the slow job has finished
                    pool.completed_jobs()
                })
            })
            .collect();

        for caller in callers {
            assert_eq!(caller.join().unwrap(), 1);
        }
    }

    #[test]
    fn test_panic_never_stops_worker_under_any_strategy() {
        for strategy in [
            crate::executor::PanicStrategy::Escalate,
            crate::executor::PanicStrategy::Isolate,
            crate::executor::PanicStrategy::LogAndContinue,
        ] {
            let config = PoolConfig::builder()
                .num_workers(1)
                .panic_strategy(strategy)
                .build()
                .unwrap();
            let pool: ThreadWorkerPool<u32, i64, i64> = ThreadWorkerPool::new(&config).unwrap();
            pool.submit(0, 0, |_| panic!("first job dies")).unwrap();
            pool.submit(1, 1, Ok).unwrap();
            pool.shutdown().unwrap();

            let mut results = pool.drain_results();
            results.sort_by_key(|r| r.id);
            assert_eq!(results.len(), 2, "strategy {:?}", strategy);
            assert_eq!(
                results[0].error().map(TaskError::kind),
                Some(crate::job::TaskErrorKind::Panicked)
            );
            assert_eq!(results[1].value(), Some(&1));
        }
    }

    #[test]
    fn test_metrics_track_outcomes() {
        let config = PoolConfig::builder()
            .num_workers(2)
            .panic_strategy(crate::executor::PanicStrategy::Isolate)
            .build()
            .unwrap();
        let pool: ThreadWorkerPool<u32, i64, i64> = ThreadWorkerPool::new(&config).unwrap();
        pool.submit(0, 1, Ok).unwrap();
        pool.submit(1, 1, |_| Err(TaskError::failed("no"))).unwrap();
        pool.submit(2, 1, |_| panic!("worse")).unwrap();
        pool.shutdown().unwrap();

        let snapshot = pool.metrics().unwrap();
        assert_eq!(snapshot.jobs_submitted, 3);
        assert_eq!(snapshot.jobs_succeeded, 1);
        assert_eq!(snapshot.jobs_failed, 1);
        assert_eq!(snapshot.jobs_panicked, 1);
        assert_eq!(pool.panic_count(), 1);
        assert_eq!(pool.jobs_per_worker().iter().sum::<u64>(), 3);
    }

    #[test]
    fn test_metrics_disabled() {
        let config = PoolConfig::builder()
            .num_workers(1)
            .enable_metrics(false)
            .build()
            .unwrap();
        let pool: ThreadWorkerPool<u32, i64, i64> = ThreadWorkerPool::new(&config).unwrap();
        assert!(pool.metrics().is_none());
    }

    #[test]
    fn test_drop_without_shutdown_joins_workers() {
        let pool = pool(2);
        pool.submit(0, 5, Ok).unwrap();
        drop(pool);
    }
}
