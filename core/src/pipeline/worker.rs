//! Fixed-size pool of decode threads.

use std::collections::VecDeque;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, warn};

use crate::error::PipelineError;

type Job = Box<dyn FnOnce() + Send + 'static>;

#[derive(Default)]
struct QueueState {
    jobs: VecDeque<Job>,
    active: usize,
    shutdown: bool,
}

#[derive(Default)]
struct JobQueue {
    state: Mutex<QueueState>,
    available: Condvar,
    idle: Condvar,
}

impl JobQueue {
    /// Next job, or `None` once shut down and drained.
    fn next(&self) -> Option<Job> {
        let mut state = self.state.lock();
        loop {
            if let Some(job) = state.jobs.pop_front() {
                state.active += 1;
                return Some(job);
            }
            if state.shutdown {
                return None;
            }
            self.available.wait(&mut state);
        }
    }

    fn finish(&self) {
        let mut state = self.state.lock();
        state.active -= 1;
        if state.active == 0 && state.jobs.is_empty() {
            self.idle.notify_all();
        }
    }
}

/// Runs submitted jobs on a bounded set of worker threads.
///
/// The worker count caps how many decodes run at once. Dropping the pool lets queued jobs
/// finish before the threads are joined, so no submitted job is silently discarded.
pub struct DecodePool {
    queue: Arc<JobQueue>,
    workers: Vec<JoinHandle<()>>,
}

impl DecodePool {
    pub fn new(worker_count: usize) -> Result<Self, PipelineError> {
        let worker_count = worker_count.max(1);
        let queue = Arc::new(JobQueue::default());
        let mut pool = Self { queue, workers: Vec::with_capacity(worker_count) };

        for id in 0..worker_count {
            let queue = Arc::clone(&pool.queue);
            let handle = thread::Builder::new()
                .name(format!("bitmap-decode-{id}"))
                .spawn(move || {
                    while let Some(job) = queue.next() {
                        if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                            warn!(target: "pipeline::worker", "decode job panicked");
                        }
                        queue.finish();
                    }
                })
                .map_err(|err| PipelineError::WorkerSpawn { message: err.to_string() })?;
            pool.workers.push(handle);
        }

        info!(target: "pipeline::worker", workers = worker_count, "decode pool started");
        Ok(pool)
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Queue a job for the next free worker.
    pub fn submit<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut state = self.queue.state.lock();
        state.jobs.push_back(Box::new(job));
        self.queue.available.notify_one();
    }

    /// Jobs waiting for a worker.
    pub fn queued(&self) -> usize {
        self.queue.state.lock().jobs.len()
    }

    /// Jobs currently running.
    pub fn active(&self) -> usize {
        self.queue.state.lock().active
    }

    /// Block until every submitted job has run.
    pub fn wait_idle(&self) {
        let mut state = self.queue.state.lock();
        while state.active > 0 || !state.jobs.is_empty() {
            self.queue.idle.wait(&mut state);
        }
    }
}

impl fmt::Debug for DecodePool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.queue.state.lock();
        f.debug_struct("DecodePool")
            .field("workers", &self.workers.len())
            .field("queued", &state.jobs.len())
            .field("active", &state.active)
            .finish()
    }
}

impl Drop for DecodePool {
    fn drop(&mut self) {
        self.queue.state.lock().shutdown = true;
        self.queue.available.notify_all();
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                debug!(target: "pipeline::worker", "decode worker panicked during shutdown");
            }
        }
    }
}
