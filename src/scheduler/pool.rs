//! Fixed-size worker pool draining a shared FIFO queue.
//!
//! Exists so a slow inference call can never stall the connection
//! accept/read loop: I/O tasks enqueue closures here and await a
//! completion signal instead of running compute inline.
//!
//! Jobs are started in enqueue order; completion order is unspecified when
//! more than one worker is idle. The queue is unbounded: no depth limit or
//! in-flight cap, so sustained overload grows memory. That gap is known;
//! `flush` is the recovery lever, dropping all not-yet-started work in one
//! step.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::{Condvar, Mutex};
use thiserror::Error;

/// One unit of compute-bound work.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("Worker pool is shut down")]
    Closed,
}

struct PoolInner {
    queue: Mutex<VecDeque<Job>>,
    available: Condvar,
    stop: AtomicBool,
}

pub struct WorkerPool {
    inner: Arc<PoolInner>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Spawn `threads` workers. A count of zero disables offload entirely:
    /// `enqueue` then runs jobs inline on the calling thread.
    pub fn new(threads: usize) -> Self {
        let inner = Arc::new(PoolInner {
            queue: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
            stop: AtomicBool::new(false),
        });

        let mut workers = Vec::with_capacity(threads);
        for id in 0..threads {
            let inner = Arc::clone(&inner);
            let handle = std::thread::Builder::new()
                .name(format!("tg-worker-{}", id))
                .spawn(move || worker_loop(&inner))
                .expect("failed to spawn worker thread");
            workers.push(handle);
        }

        Self {
            inner,
            workers: Mutex::new(workers),
        }
    }

    pub fn worker_count(&self) -> usize {
        self.workers.lock().len()
    }

    /// Number of jobs queued but not yet taken by a worker.
    pub fn queued(&self) -> usize {
        self.inner.queue.lock().len()
    }

    /// Append a job and wake exactly one idle worker.
    pub fn enqueue(&self, job: Job) -> Result<(), PoolError> {
        if self.inner.stop.load(Ordering::SeqCst) {
            return Err(PoolError::Closed);
        }

        if self.workers.lock().is_empty() {
            job();
            return Ok(());
        }

        self.inner.queue.lock().push_back(job);
        self.inner.available.notify_one();
        Ok(())
    }

    /// Discard all not-yet-started jobs. Work already taken by a worker
    /// runs to completion.
    pub fn flush(&self) {
        self.inner.queue.lock().clear();
    }

    /// Set the stop flag and wake all workers. Queued jobs still drain;
    /// new `enqueue` calls fail with [`PoolError::Closed`].
    pub fn shutdown(&self) {
        self.inner.stop.store(true, Ordering::SeqCst);
        self.inner.available.notify_all();
    }

    /// Shut down and block until every worker has exited.
    pub fn join(&self) {
        self.shutdown();
        let handles: Vec<_> = self.workers.lock().drain(..).collect();
        for handle in handles {
            let _ = handle.join();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.join();
    }
}

fn worker_loop(inner: &PoolInner) {
    loop {
        let job = {
            let mut queue = inner.queue.lock();
            loop {
                if let Some(job) = queue.pop_front() {
                    break job;
                }
                if inner.stop.load(Ordering::SeqCst) {
                    return;
                }
                inner.available.wait(&mut queue);
            }
        };
        job();
    }
}
