//! Fan-out of independent work across a fixed pool of worker threads.
//!
//! Jobs travel to the workers over one channel and results come back, tagged with their
//! input index, over another, so results are returned in input order regardless of which
//! worker finished first. Workers are scoped threads: the pool is always joined before a
//! map call returns, whether it succeeded, failed or a task panicked.

use std::any::Any;
use std::fmt;
use std::num::NonZeroUsize;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;

use crossbeam_channel::unbounded;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Task counters shared between the dispatcher and its workers.
#[derive(Debug, Default)]
pub struct Progress {
    dispatched: AtomicUsize,
    completed: AtomicUsize,
}

impl Progress {
    /// Tasks a worker has picked up.
    pub fn dispatched(&self) -> usize {
        self.dispatched.load(Ordering::Acquire)
    }

    /// Tasks whose result (or failure) has been collected.
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::Acquire)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WorkerPool {
    workers: NonZeroUsize,
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new(None)
    }
}

impl WorkerPool {
    /// A pool of `workers` threads, or one per available core when `None` or zero.
    pub fn new(workers: Option<usize>) -> Self {
        let workers = workers
            .and_then(NonZeroUsize::new)
            .or_else(|| thread::available_parallelism().ok())
            .unwrap_or(NonZeroUsize::MIN);
        Self { workers }
    }

    pub fn workers(&self) -> usize {
        self.workers.get()
    }

    /// Applies `f` to every item. A panicking task is reported as a failed task.
    pub fn map<T, R, F>(&self, items: Vec<T>, f: F) -> Result<Vec<R>>
    where
        T: Send,
        R: Send,
        F: Fn(T) -> R + Sync,
    {
        self.try_map(items, |item| Ok::<R, Error>(f(item)))
    }

    /// Applies a fallible `f` to every item.
    ///
    /// After the first failure no new task is started; tasks already running finish.
    /// All failures are reported together in one [`Error::Worker`].
    pub fn try_map<T, R, E, F>(&self, items: Vec<T>, f: F) -> Result<Vec<R>>
    where
        T: Send,
        R: Send,
        E: fmt::Display,
        F: Fn(T) -> std::result::Result<R, E> + Sync,
    {
        self.run(items, f, &Progress::default(), |_| {})
    }

    fn run<T, R, E, F, C>(
        &self,
        items: Vec<T>,
        f: F,
        progress: &Progress,
        on_complete: C,
    ) -> Result<Vec<R>>
    where
        T: Send,
        R: Send,
        E: fmt::Display,
        F: Fn(T) -> std::result::Result<R, E> + Sync,
        C: Fn(usize),
    {
        let total = items.len();
        if total == 0 {
            return Ok(Vec::new());
        }

        let (job_tx, job_rx) = unbounded::<(usize, T)>();
        let (result_tx, result_rx) = unbounded::<(usize, std::result::Result<R, String>)>();
        for job in items.into_iter().enumerate() {
            if job_tx.send(job).is_err() {
                break;
            }
        }
        drop(job_tx);

        let abort = AtomicBool::new(false);
        let mut slots: Vec<Option<R>> = (0..total).map(|_| None).collect();
        let mut failures = Vec::new();
        let workers = self.workers.get().min(total);
        debug!(total, workers, "dispatching tasks");

        thread::scope(|scope| {
            for _ in 0..workers {
                let job_rx = job_rx.clone();
                let result_tx = result_tx.clone();
                let (f, abort) = (&f, &abort);
                scope.spawn(move || {
                    for (index, item) in job_rx.iter() {
                        if abort.load(Ordering::Acquire) {
                            break;
                        }
                        progress.dispatched.fetch_add(1, Ordering::AcqRel);
                        let outcome = match panic::catch_unwind(AssertUnwindSafe(|| f(item))) {
                            Ok(Ok(value)) => Ok(value),
                            Ok(Err(e)) => Err(e.to_string()),
                            Err(payload) => Err(panic_message(payload.as_ref())),
                        };
                        if outcome.is_err() {
                            abort.store(true, Ordering::Release);
                        }
                        if result_tx.send((index, outcome)).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(result_tx);

            for (index, outcome) in result_rx.iter() {
                match outcome {
                    Ok(value) => slots[index] = Some(value),
                    Err(message) => failures.push((index, message)),
                }
                let done = progress.completed.fetch_add(1, Ordering::AcqRel) + 1;
                on_complete(done);
            }
        });

        if !failures.is_empty() {
            failures.sort_by_key(|(index, _)| *index);
            warn!(failed = failures.len(), total, "parallel tasks failed");
            return Err(Error::Worker { total, failures });
        }

        let mut results = Vec::with_capacity(total);
        for (index, slot) in slots.into_iter().enumerate() {
            match slot {
                Some(value) => results.push(value),
                None => {
                    return Err(Error::Worker {
                        total,
                        failures: vec![(index, "task produced no result".to_string())],
                    })
                }
            }
        }
        Ok(results)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {s}")
    } else {
        "panicked".to_string()
    }
}

/// Maps `f` over `items` on a pool of `workers` threads (all cores when `None`).
pub fn parallel_map<T, R, F>(f: F, items: Vec<T>, workers: Option<usize>) -> Result<Vec<R>>
where
    T: Send,
    R: Send,
    F: Fn(T) -> R + Sync,
{
    WorkerPool::new(workers).map(items, f)
}

/// A [`WorkerPool`] that reports how far a map has progressed.
///
/// Results and errors are exactly those of the wrapped pool.
#[derive(Debug)]
pub struct ProgressParallel {
    pool: WorkerPool,
    progress: Progress,
    visible: bool,
    label: String,
}

impl ProgressParallel {
    pub fn new(pool: WorkerPool, visible: bool) -> Self {
        Self {
            pool,
            progress: Progress::default(),
            visible,
            label: String::new(),
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn dispatched(&self) -> usize {
        self.progress.dispatched()
    }

    pub fn completed(&self) -> usize {
        self.progress.completed()
    }

    pub fn try_map<T, R, E, F>(&self, items: Vec<T>, f: F) -> Result<Vec<R>>
    where
        T: Send,
        R: Send,
        E: fmt::Display,
        F: Fn(T) -> std::result::Result<R, E> + Sync,
    {
        let bar = self.bar(items.len());
        let result = self.pool.run(items, f, &self.progress, |done| bar.set_position(done as u64));
        match &result {
            Ok(_) => bar.finish_with_message("done"),
            Err(_) => bar.abandon_with_message("failed"),
        }
        result
    }

    pub fn map<T, R, F>(&self, items: Vec<T>, f: F) -> Result<Vec<R>>
    where
        T: Send,
        R: Send,
        F: Fn(T) -> R + Sync,
    {
        self.try_map(items, |item| Ok::<R, Error>(f(item)))
    }

    fn bar(&self, total: usize) -> ProgressBar {
        let bar = ProgressBar::with_draw_target(Some(total as u64), ProgressDrawTarget::stderr());
        if !self.visible {
            bar.set_draw_target(ProgressDrawTarget::hidden());
        }
        let style = ProgressStyle::default_bar()
            .template("{prefix} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-");
        bar.set_style(style);
        bar.set_prefix(self.label.clone());
        bar
    }
}
