//! Bounded worker pool with a completion barrier.

use anyhow::{Context, Result};
use parking_lot::{Condvar, Mutex};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Default)]
struct Pending {
    count: Mutex<usize>,
    idle: Condvar,
}

/// Runs independent jobs on a fixed number of threads.
///
/// With a size of one there are no threads: jobs run inline on the caller.
pub struct WorkerPool {
    pool: Option<rayon::ThreadPool>,
    size: usize,
    pending: Arc<Pending>,
    failures: Arc<AtomicUsize>,
}

impl WorkerPool {
    pub fn new(size: usize) -> Result<Self> {
        let size = size.max(1);
        let pool = if size == 1 {
            None
        } else {
            Some(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(size)
                    .thread_name(|i| format!("cluster-worker-{}", i))
                    .build()
                    .context("Failed to build cluster worker pool")?,
            )
        };
        Ok(Self {
            pool,
            size,
            pending: Arc::new(Pending::default()),
            failures: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Jobs run on the calling thread.
    pub fn is_inline(&self) -> bool {
        self.pool.is_none()
    }

    /// Submit a job. Errors and panics are logged and counted; they never
    /// reach sibling jobs or the caller.
    pub fn execute<F>(&self, name: String, job: F)
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        let Some(pool) = &self.pool else {
            run_job(&name, job, &self.failures);
            return;
        };

        *self.pending.count.lock() += 1;
        let pending = Arc::clone(&self.pending);
        let failures = Arc::clone(&self.failures);
        pool.spawn(move || {
            run_job(&name, job, &failures);
            let mut count = pending.count.lock();
            *count -= 1;
            if *count == 0 {
                pending.idle.notify_all();
            }
        });
    }

    /// Block until every submitted job has finished.
    pub fn wait(&self) {
        let mut count = self.pending.count.lock();
        while *count > 0 {
            self.pending.idle.wait(&mut count);
        }
    }

    /// Jobs that returned an error or panicked so far.
    pub fn failures(&self) -> usize {
        self.failures.load(Ordering::Relaxed)
    }
}

fn run_job<F>(name: &str, job: F, failures: &AtomicUsize)
where
    F: FnOnce() -> Result<()>,
{
    match catch_unwind(AssertUnwindSafe(job)) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            failures.fetch_add(1, Ordering::Relaxed);
            tracing::warn!("Job {} failed: {:#}", name, e);
        }
        Err(_) => {
            failures.fetch_add(1, Ordering::Relaxed);
            tracing::error!("Job {} panicked", name);
        }
    }
}
