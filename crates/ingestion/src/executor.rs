//! Background execution substrate
//!
//! Decouples the request path from multi-second ingestion runs. Jobs run
//! on a small fixed pool of plain worker threads; the async metadata
//! store is reached from those threads through a [`SchedulerHandle`]
//! captured from the process's tokio runtime exactly once at startup.

use docvault_common::errors::{AppError, Result};
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Mutex;
use std::thread;
use tracing::{debug, error, info};

/// Handle to the process-wide async runtime.
///
/// Worker threads use [`block_on`](Self::block_on) to run store futures
/// on the runtime and wait for the result, bridging the synchronous
/// pipeline into the asynchronous metadata store. Construct it once at
/// startup, inside the runtime, and pass it into every component that
/// crosses the thread/async boundary.
#[derive(Clone)]
pub struct SchedulerHandle {
    inner: tokio::runtime::Handle,
}

impl SchedulerHandle {
    /// Capture the currently running runtime.
    ///
    /// Fails loudly when no runtime is running: calling into the store
    /// before startup wiring is a programming error, not something to
    /// hang on.
    pub fn current() -> Result<Self> {
        tokio::runtime::Handle::try_current()
            .map(|inner| Self { inner })
            .map_err(|_| AppError::Scheduler {
                message: "no tokio runtime is running; construct the SchedulerHandle \
                          at startup before submitting jobs"
                    .to_string(),
            })
    }

    pub fn from_handle(inner: tokio::runtime::Handle) -> Self {
        Self { inner }
    }

    /// Run a future on the runtime and block this thread on its result.
    ///
    /// Only for plain worker threads; calling this from inside the
    /// runtime itself would deadlock and panics instead.
    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.inner.block_on(future)
    }
}

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Fixed-size pool of background worker threads.
///
/// `submit` enqueues and returns immediately; submissions beyond the
/// pool's capacity queue up rather than being rejected. `shutdown`
/// drains: no new jobs are accepted, queued and in-flight jobs finish,
/// then the threads are joined.
pub struct WorkerPool {
    sender: Mutex<Option<crossbeam_channel::Sender<Job>>>,
    workers: Mutex<Vec<thread::JoinHandle<()>>>,
}

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        let (sender, receiver) = crossbeam_channel::unbounded::<Job>();

        let workers = (0..size.max(1))
            .map(|i| {
                let receiver = receiver.clone();
                thread::Builder::new()
                    .name(format!("bg-worker-{}", i))
                    .spawn(move || {
                        while let Ok(job) = receiver.recv() {
                            // A panicking job must not take the worker
                            // (or the process) down with it.
                            if catch_unwind(AssertUnwindSafe(job)).is_err() {
                                error!("background job panicked");
                            }
                        }
                        debug!("worker thread drained");
                    })
                    .expect("failed to spawn worker thread")
            })
            .collect();

        info!(pool_size = size.max(1), "worker pool started");
        Self {
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(workers),
        }
    }

    /// Enqueue a job. Never blocks waiting for the job to run.
    pub fn submit(&self, job: impl FnOnce() + Send + 'static) -> Result<()> {
        let sender = self.sender.lock().map_err(|_| AppError::WorkerPool {
            message: "worker pool lock poisoned".to_string(),
        })?;
        match sender.as_ref() {
            Some(sender) => sender.send(Box::new(job)).map_err(|_| AppError::WorkerPool {
                message: "job queue disconnected".to_string(),
            }),
            None => Err(AppError::WorkerPool {
                message: "worker pool is shut down".to_string(),
            }),
        }
    }

    /// Stop accepting jobs, wait for queued and in-flight work, join
    /// the threads. Idempotent.
    pub fn shutdown(&self) {
        let taken = match self.sender.lock() {
            Ok(mut sender) => sender.take(),
            Err(_) => return,
        };
        if taken.is_none() {
            return;
        }
        drop(taken);

        let handles = match self.workers.lock() {
            Ok(mut workers) => std::mem::take(&mut *workers),
            Err(_) => return,
        };
        for handle in handles {
            if handle.join().is_err() {
                error!("worker thread terminated abnormally");
            }
        }
        info!("worker pool drained");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_all_submitted_jobs_run() {
        let counter = Arc::new(AtomicUsize::new(0));
        let pool = WorkerPool::new(2);

        for _ in 0..20 {
            let counter = counter.clone();
            pool.submit(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        }

        pool.shutdown();
        assert_eq!(counter.load(Ordering::SeqCst), 20);
    }

    #[test]
    fn test_submit_after_shutdown_fails() {
        let pool = WorkerPool::new(1);
        pool.shutdown();
        assert!(pool.submit(|| {}).is_err());
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let pool = WorkerPool::new(1);
        pool.shutdown();
        pool.shutdown();
    }

    #[test]
    fn test_panicking_job_does_not_kill_pool() {
        let counter = Arc::new(AtomicUsize::new(0));
        let pool = WorkerPool::new(1);

        pool.submit(|| panic!("boom")).unwrap();
        let c = counter.clone();
        pool.submit(move || {
            c.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

        pool.shutdown();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_scheduler_requires_runtime() {
        assert!(SchedulerHandle::current().is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_scheduler_bridges_worker_threads() {
        let scheduler = SchedulerHandle::current().unwrap();

        let result = std::thread::spawn(move || scheduler.block_on(async { 21 * 2 }))
            .join()
            .unwrap();

        assert_eq!(result, 42);
    }
}
