//! Schedulers: where fiber drains run.
//!
//! A fiber never runs itself on the thread that woke it. When its mailbox
//! gate flips, it hands a drain [`Task`] to its [`Scheduler`]. Three
//! implementations are provided:
//!
//! - [`ControlledScheduler`]: a manually driven queue for deterministic tests
//! - [`SyncScheduler`]: buffers tasks for a synchronous run, then forwards
//!   to a fallback
//! - [`WorkerScheduler`]: a pool of named OS threads

use crate::error::{Error, Result};
use crate::tracing_compat::{debug, error};
use crossbeam_queue::SegQueue;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// A unit of work handed to a scheduler.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Runs tasks submitted by fibers.
pub trait Scheduler: Send + Sync {
    /// Arranges for `task` to run. Must not run it on the calling thread
    /// before returning.
    fn schedule(&self, task: Task);
}

// =============================================================================
// ControlledScheduler
// =============================================================================

/// A scheduler that runs nothing until told to.
///
/// Tasks run in FIFO order by default. A seeded scheduler picks the next task
/// pseudo-randomly, so different seeds explore different interleavings while
/// each seed stays reproducible.
pub struct ControlledScheduler {
    queue: Mutex<VecDeque<Task>>,
    rng: Mutex<Option<u64>>,
}

impl Default for ControlledScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl ControlledScheduler {
    /// A FIFO scheduler.
    #[must_use]
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            rng: Mutex::new(None),
        }
    }

    /// A scheduler that picks tasks with a xorshift generator seeded with
    /// `seed`.
    #[must_use]
    pub fn with_seed(seed: u64) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            rng: Mutex::new(Some(if seed == 0 { 1 } else { seed })),
        }
    }

    fn next_index(&self, len: usize) -> usize {
        let mut rng = self.rng.lock();
        match rng.as_mut() {
            None => 0,
            Some(x) => {
                *x ^= *x << 13;
                *x ^= *x >> 7;
                *x ^= *x << 17;
                #[allow(clippy::cast_possible_truncation)]
                let idx = (*x % len as u64) as usize;
                idx
            }
        }
    }

    /// Runs one task. Returns `false` if none was pending.
    pub fn tick(&self) -> bool {
        let task = {
            let mut queue = self.queue.lock();
            if queue.is_empty() {
                return false;
            }
            let idx = self.next_index(queue.len());
            queue.remove(idx)
        };
        match task {
            Some(task) => {
                task();
                true
            }
            None => false,
        }
    }

    /// Runs tasks until none are pending. Returns how many ran.
    pub fn run_until_idle(&self) -> usize {
        let mut ran = 0;
        while self.tick() {
            ran += 1;
        }
        ran
    }

    /// Runs at most `max_ticks` tasks. Returns how many ran.
    pub fn run_for(&self, max_ticks: usize) -> usize {
        let mut ran = 0;
        while ran < max_ticks && self.tick() {
            ran += 1;
        }
        ran
    }

    /// Number of tasks waiting to run.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }
}

impl Scheduler for ControlledScheduler {
    fn schedule(&self, task: Task) {
        self.queue.lock().push_back(task);
    }
}

impl fmt::Debug for ControlledScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControlledScheduler")
            .field("pending", &self.pending())
            .field("seeded", &self.rng.lock().is_some())
            .finish()
    }
}

// =============================================================================
// SyncScheduler
// =============================================================================

/// Buffers tasks so a caller can drive them to completion on its own thread.
///
/// After [`flush`](Self::flush), every task goes straight to the fallback.
pub struct SyncScheduler {
    buffered: Mutex<Option<VecDeque<Task>>>,
    fallback: Arc<dyn Scheduler>,
}

impl SyncScheduler {
    /// A buffering scheduler that forwards to `fallback` once flushed.
    #[must_use]
    pub fn new(fallback: Arc<dyn Scheduler>) -> Self {
        Self {
            buffered: Mutex::new(Some(VecDeque::new())),
            fallback,
        }
    }

    /// Runs buffered tasks, including tasks they schedule, until none are
    /// left, then switches to forwarding. Returns how many ran.
    pub fn flush(&self) -> usize {
        let mut ran = 0;
        loop {
            let task = {
                let mut buffered = self.buffered.lock();
                match buffered.as_mut().and_then(VecDeque::pop_front) {
                    Some(task) => task,
                    None => {
                        *buffered = None;
                        return ran;
                    }
                }
            };
            task();
            ran += 1;
        }
    }

    /// Returns `true` while tasks are still being buffered.
    #[must_use]
    pub fn is_buffering(&self) -> bool {
        self.buffered.lock().is_some()
    }
}

impl Scheduler for SyncScheduler {
    fn schedule(&self, task: Task) {
        let task = {
            let mut buffered = self.buffered.lock();
            match buffered.as_mut() {
                Some(queue) => {
                    queue.push_back(task);
                    return;
                }
                None => task,
            }
        };
        self.fallback.schedule(task);
    }
}

impl fmt::Debug for SyncScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncScheduler")
            .field("buffering", &self.is_buffering())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// WorkerScheduler
// =============================================================================

const PARK_TIMEOUT: Duration = Duration::from_millis(10);

struct WorkerShared {
    queue: SegQueue<Task>,
    shutdown: AtomicBool,
    mutex: Mutex<()>,
    condvar: Condvar,
}

/// A fixed pool of OS threads draining a shared queue.
pub struct WorkerScheduler {
    shared: Arc<WorkerShared>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    threads: usize,
}

impl WorkerScheduler {
    /// Starts `threads` workers named `{prefix}-{n}`.
    pub fn new(threads: usize, prefix: &str) -> Result<Self> {
        let threads = threads.max(1);
        let shared = Arc::new(WorkerShared {
            queue: SegQueue::new(),
            shutdown: AtomicBool::new(false),
            mutex: Mutex::new(()),
            condvar: Condvar::new(),
        });
        let scheduler = Self {
            shared,
            handles: Mutex::new(Vec::with_capacity(threads)),
            threads,
        };
        for n in 0..threads {
            let shared = Arc::clone(&scheduler.shared);
            let handle = thread::Builder::new()
                .name(format!("{prefix}-{n}"))
                .spawn(move || worker_loop(&shared))
                .map_err(|e| Error::Scheduler(format!("failed to spawn worker {n}: {e}")))?;
            scheduler.handles.lock().push(handle);
        }
        debug!(threads, prefix, "worker scheduler started");
        Ok(scheduler)
    }

    /// Number of worker threads.
    #[must_use]
    pub fn threads(&self) -> usize {
        self.threads
    }

    /// Stops accepting work. Queued tasks still run before workers exit.
    pub fn shutdown(&self) {
        if !self.shared.shutdown.swap(true, Ordering::AcqRel) {
            debug!(threads = self.threads, "worker scheduler shutting down");
        }
        let _guard = self.shared.mutex.lock();
        self.shared.condvar.notify_all();
    }

    /// Returns `true` once [`shutdown`](Self::shutdown) has been called.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.shared.shutdown.load(Ordering::Acquire)
    }
}

fn worker_loop(shared: &WorkerShared) {
    loop {
        if let Some(task) = shared.queue.pop() {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(task)) {
                let message = crate::types::Defect::from_panic(payload.as_ref());
                error!(%message, "scheduler task panicked");
            }
            continue;
        }
        if shared.shutdown.load(Ordering::Acquire) {
            break;
        }
        let mut guard = shared.mutex.lock();
        if shared.queue.is_empty() && !shared.shutdown.load(Ordering::Acquire) {
            shared.condvar.wait_for(&mut guard, PARK_TIMEOUT);
        }
    }
}

impl Scheduler for WorkerScheduler {
    fn schedule(&self, task: Task) {
        self.shared.queue.push(task);
        let _guard = self.shared.mutex.lock();
        self.shared.condvar.notify_one();
    }
}

impl Drop for WorkerScheduler {
    fn drop(&mut self) {
        self.shutdown();
        let current = thread::current().id();
        for handle in self.handles.lock().drain(..) {
            if handle.thread().id() != current {
                let _ = handle.join();
            }
        }
    }
}

impl fmt::Debug for WorkerScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerScheduler")
            .field("threads", &self.threads)
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    fn recorder() -> (Arc<Mutex<Vec<usize>>>, impl Fn(usize) -> Task) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let log2 = Arc::clone(&log);
        let make = move |n: usize| -> Task {
            let log = Arc::clone(&log2);
            Box::new(move || log.lock().push(n))
        };
        (log, make)
    }

    // =========================================================================
    // ControlledScheduler
    // =========================================================================

    #[test]
    fn controlled_runs_fifo() {
        let scheduler = ControlledScheduler::new();
        let (log, task) = recorder();
        for n in 0..4 {
            scheduler.schedule(task(n));
        }
        assert_eq!(scheduler.pending(), 4);
        assert_eq!(scheduler.run_for(2), 2);
        assert_eq!(*log.lock(), vec![0, 1]);
        assert_eq!(scheduler.run_until_idle(), 2);
        assert_eq!(*log.lock(), vec![0, 1, 2, 3]);
        assert!(!scheduler.tick());
    }

    #[test]
    fn seeded_order_is_reproducible() {
        let order = |seed| {
            let scheduler = ControlledScheduler::with_seed(seed);
            let (log, task) = recorder();
            for n in 0..8 {
                scheduler.schedule(task(n));
            }
            scheduler.run_until_idle();
            let result = log.lock().clone();
            result
        };
        let a = order(42);
        assert_eq!(a, order(42));
        let mut sorted = a.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, (0..8).collect::<Vec<_>>());
    }

    // =========================================================================
    // SyncScheduler
    // =========================================================================

    #[test]
    fn sync_scheduler_buffers_then_forwards() {
        let fallback = Arc::new(ControlledScheduler::new());
        let sync = SyncScheduler::new(fallback.clone());
        let (log, task) = recorder();

        sync.schedule(task(1));
        sync.schedule(task(2));
        assert!(log.lock().is_empty());
        assert_eq!(sync.flush(), 2);
        assert!(!sync.is_buffering());

        sync.schedule(task(3));
        assert_eq!(fallback.pending(), 1);
        fallback.run_until_idle();
        assert_eq!(*log.lock(), vec![1, 2, 3]);
    }

    // =========================================================================
    // WorkerScheduler
    // =========================================================================

    #[test]
    fn workers_run_tasks_and_survive_panics() {
        let scheduler = WorkerScheduler::new(2, "test-worker").expect("spawn workers");
        let count = Arc::new(AtomicUsize::new(0));
        scheduler.schedule(Box::new(|| panic!("task failure")));
        for _ in 0..16 {
            let count = Arc::clone(&count);
            scheduler.schedule(Box::new(move || {
                count.fetch_add(1, Ordering::SeqCst);
            }));
        }
        let deadline = Instant::now() + Duration::from_secs(5);
        while count.load(Ordering::SeqCst) < 16 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(count.load(Ordering::SeqCst), 16);
        assert_eq!(scheduler.threads(), 2);
        scheduler.shutdown();
        assert!(scheduler.is_shutdown());
    }
}
