//! Worker pool that runs operation handlers off the FUSE session thread.
//!
//! `fuser` delivers every request on one session thread through `&mut self`
//! methods. Each request is packaged as a closure owning its reply and
//! submitted here, so handlers run concurrently and a slow backing store
//! stalls only the workers touching it.
//!
//! # Design
//!
//! - Fixed number of named worker threads
//! - Bounded submission queue; when it is full (or the pool is shut down)
//!   the job runs inline on the submitting thread, which throttles the
//!   session instead of dropping the request
//! - A panicking job is caught and logged; the worker keeps serving

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use parking_lot::Mutex;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

/// A unit of work: one request plus its reply.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// How often idle workers re-check the shutdown flag.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Fixed-size pool of handler threads.
pub struct WorkerPool {
    submit_tx: Sender<Job>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    spawned: usize,
    shutdown: Arc<AtomicBool>,
    submitted: AtomicU64,
    inline: AtomicU64,
}

impl WorkerPool {
    /// Start `threads` workers behind a queue of `capacity` jobs.
    pub fn new(threads: usize, capacity: usize) -> Self {
        let (submit_tx, submit_rx) = bounded(capacity.max(1));
        let shutdown = Arc::new(AtomicBool::new(false));

        let mut workers = Vec::with_capacity(threads);
        for worker_id in 0..threads {
            let rx = submit_rx.clone();
            let shutdown = Arc::clone(&shutdown);
            match thread::Builder::new()
                .name(format!("mftfs-worker-{worker_id}"))
                .spawn(move || worker_loop(worker_id, &rx, &shutdown))
            {
                Ok(handle) => workers.push(handle),
                Err(e) => error!(worker_id, error = %e, "Failed to spawn worker thread"),
            }
        }

        let spawned = workers.len();
        info!(threads = spawned, capacity, "Worker pool started");
        Self {
            submit_tx,
            workers: Mutex::new(workers),
            spawned,
            shutdown,
            submitted: AtomicU64::new(0),
            inline: AtomicU64::new(0),
        }
    }

    /// Run `job` on a worker, or inline if the pool cannot take it.
    pub fn submit(&self, job: Job) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
        if self.spawned == 0 || self.shutdown.load(Ordering::Acquire) {
            self.run_inline(job);
            return;
        }

        match self.submit_tx.try_send(job) {
            Ok(()) => trace!("Job queued"),
            Err(TrySendError::Full(job)) => {
                warn!("Worker queue full, running request inline");
                self.run_inline(job);
            }
            Err(TrySendError::Disconnected(job)) => {
                error!("Worker channel disconnected, running request inline");
                self.run_inline(job);
            }
        }
    }

    fn run_inline(&self, job: Job) {
        self.inline.fetch_add(1, Ordering::Relaxed);
        run_job(usize::MAX, job);
    }

    /// Jobs submitted so far.
    pub fn submitted(&self) -> u64 {
        self.submitted.load(Ordering::Relaxed)
    }

    /// Jobs that ran on the submitting thread.
    pub fn ran_inline(&self) -> u64 {
        self.inline.load(Ordering::Relaxed)
    }

    /// Number of live worker threads.
    pub fn threads(&self) -> usize {
        self.workers.lock().len()
    }

    /// Stop accepting work, drain the queue and join the workers.
    pub fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!("Shutting down worker pool");
        let workers = std::mem::take(&mut *self.workers.lock());
        for handle in workers {
            if handle.join().is_err() {
                warn!("Worker thread panicked during shutdown");
            }
        }
        info!("Worker pool stopped");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("threads", &self.threads())
            .field("submitted", &self.submitted())
            .field("inline", &self.ran_inline())
            .finish_non_exhaustive()
    }
}

fn worker_loop(worker_id: usize, rx: &Receiver<Job>, shutdown: &AtomicBool) {
    debug!(worker_id, "Worker started");
    loop {
        match rx.recv_timeout(POLL_INTERVAL) {
            Ok(job) => run_job(worker_id, job),
            Err(_) if shutdown.load(Ordering::Acquire) => {
                // Queue drained and no more work accepted
                break;
            }
            Err(_) => {}
        }
    }
    debug!(worker_id, "Worker exiting");
}

fn run_job(worker_id: usize, job: Job) {
    if catch_unwind(AssertUnwindSafe(job)).is_err() {
        error!(worker_id, "Request handler panicked");
    }
}
