//! Bounded-concurrency job pool for bulk lifecycle operations.
//!
//! A pool is built for one batch: jobs are queued with [`JobPool::add`] and
//! [`JobPool::run`] executes all of them with at most `workers` running at
//! once, returning a [`BatchResult`].
//!
//! ```text
//!   queue ──▶ worker 1 ──▶ spawn(job) ──┐
//!         ──▶ worker 2 ──▶ spawn(job) ──┼──▶ results (completion order)
//!         ──▶ worker W ──▶ spawn(job) ──┘
//! ```
//!
//! Each job runs in its own task, so a panicking job is reported as that
//! job's [`Error::JobPanicked`] and its worker moves on to the next job.
//! There is no early abort: once `run` starts, every job runs to completion.

use crate::batch::BatchResult;
use crate::error::{Error, Result};
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::debug;

/// Outcome of one job: every error it collected, or success.
pub type JobOutcome = std::result::Result<(), Vec<Error>>;

/// Boxed unit of work.
pub type JobFuture = Pin<Box<dyn Future<Output = JobOutcome> + Send + 'static>>;

/// One unit of work keyed by the entity it acts on.
pub struct Job {
    id: String,
    work: JobFuture,
}

impl Job {
    /// Creates a job for the given entity ID.
    pub fn new<F>(id: impl Into<String>, work: F) -> Self
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        Self {
            id: id.into(),
            work: Box::pin(async move { work.await.map_err(|e| vec![e]) }),
        }
    }

    /// Creates a job that can report several errors. An empty list is
    /// success.
    pub fn collecting<F>(id: impl Into<String>, work: F) -> Self
    where
        F: Future<Output = Vec<Error>> + Send + 'static,
    {
        Self {
            id: id.into(),
            work: Box::pin(async move {
                let errors = work.await;
                if errors.is_empty() { Ok(()) } else { Err(errors) }
            }),
        }
    }

    /// Entity ID this job reports under.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job").field("id", &self.id).finish_non_exhaustive()
    }
}

/// Executor for one batch of independent jobs.
#[derive(Debug)]
pub struct JobPool {
    name: String,
    workers: usize,
    jobs: VecDeque<Job>,
}

impl JobPool {
    /// Creates a pool. A worker count of zero is treated as one.
    #[must_use]
    pub fn new(name: impl Into<String>, workers: usize) -> Self {
        Self {
            name: name.into(),
            workers: workers.max(1),
            jobs: VecDeque::new(),
        }
    }

    /// Creates a pool with room for `capacity` jobs.
    #[must_use]
    pub fn with_capacity(name: impl Into<String>, workers: usize, capacity: usize) -> Self {
        let mut pool = Self::new(name, workers);
        pool.jobs.reserve(capacity);
        pool
    }

    /// Queues a job.
    pub fn add(&mut self, job: Job) {
        self.jobs.push_back(job);
    }

    /// Configured worker limit.
    #[must_use]
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Number of queued jobs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    /// Returns true if no jobs are queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Runs every queued job and collects the outcomes.
    pub async fn run(self) -> BatchResult {
        let total = self.jobs.len();
        if total == 0 {
            return BatchResult::new();
        }

        let workers = self.workers.min(total);
        debug!(
            "Running pool {} with {} workers for {} jobs",
            self.name, workers, total
        );

        let queue = Arc::new(Mutex::new(self.jobs));
        let (tx, mut rx) = mpsc::unbounded_channel::<(String, JobOutcome)>();

        let mut handles = Vec::with_capacity(workers);
        for _ in 0..workers {
            let queue = Arc::clone(&queue);
            let tx = tx.clone();
            handles.push(tokio::spawn(async move {
                loop {
                    let next = {
                        let mut queue = queue.lock().unwrap_or_else(|p| p.into_inner());
                        queue.pop_front()
                    };
                    let Some(Job { id, work }) = next else {
                        break;
                    };
                    let outcome = match tokio::spawn(work).await {
                        Ok(outcome) => outcome,
                        Err(e) => Err(vec![join_failure(&id, e)]),
                    };
                    if tx.send((id, outcome)).is_err() {
                        break;
                    }
                }
            }));
        }
        drop(tx);

        let mut batch = BatchResult::new();
        while let Some((id, outcome)) = rx.recv().await {
            match outcome {
                Ok(()) => batch.record_success(id),
                Err(errors) => {
                    for e in &errors {
                        debug!("Job {} in pool {} failed: {}", id, self.name, e);
                    }
                    batch.record_errors(id, errors);
                }
            }
        }

        for handle in handles {
            let _ = handle.await;
        }
        batch
    }
}

fn join_failure(id: &str, err: tokio::task::JoinError) -> Error {
    if err.is_panic() {
        let payload = err.into_panic();
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic payload".to_string());
        Error::JobPanicked {
            id: id.to_string(),
            message,
        }
    } else {
        Error::Internal(format!("job '{id}' was cancelled"))
    }
}

// =============================================================================
// Default Worker Counts
// =============================================================================

/// Operation classes with their own default worker count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PoolOp {
    Start,
    Stop,
    Kill,
    Pause,
    Unpause,
    Restart,
    Remove,
    Prune,
}

impl PoolOp {
    /// Pool name used in logs.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Kill => "kill",
            Self::Pause => "pause",
            Self::Unpause => "unpause",
            Self::Restart => "restart",
            Self::Remove => "rm",
            Self::Prune => "prune",
        }
    }
}

/// Default worker count for an operation on a host with `cpus` CPUs.
#[must_use]
pub fn default_pool_size(op: PoolOp, cpus: usize) -> usize {
    let cpus = cpus.max(1);
    match op {
        PoolOp::Kill | PoolOp::Pause | PoolOp::Unpause | PoolOp::Remove | PoolOp::Prune => {
            if cpus <= 3 { cpus * 3 } else { cpus * 4 }
        }
        PoolOp::Restart => cpus * 2,
        PoolOp::Stop => {
            if cpus <= 2 { 4 } else { cpus * 3 }
        }
        PoolOp::Start => 3,
    }
}

/// Worker count for an operation: the override if set, else the default.
#[must_use]
pub fn pool_size(op: PoolOp, override_workers: Option<usize>) -> usize {
    let size = override_workers.unwrap_or_else(|| {
        let cpus = std::thread::available_parallelism()
            .map(usize::from)
            .unwrap_or(1);
        default_pool_size(op, cpus)
    });
    debug!("Setting maximum {} workers to {}", op.name(), size);
    size.max(1)
}
