//! Shared worker pool.
//!
//! A fixed set of worker threads drains a FIFO queue of boxed jobs. The
//! pool supports pause/resume, wait-for-all, resizing, and cooperative
//! shutdown (queued jobs are discarded and their handles resolve to an
//! error). Task panics are absorbed at the job boundary and surface as
//! error-typed results; a panic never kills a worker.

use mtfs_error::{Result, StoreError};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};

// ── One-shot result slot ────────────────────────────────────────────────────

enum SlotState<T> {
    Pending,
    Ready(Result<T>),
    Taken,
}

struct Slot<T> {
    state: Mutex<SlotState<T>>,
    cv: Condvar,
}

/// Handle to an asynchronously produced value.
///
/// `join` blocks until the worker fulfils the slot. If the job was
/// discarded at shutdown or panicked, joining yields an error instead.
pub struct TaskHandle<T> {
    slot: Arc<Slot<T>>,
}

impl<T> TaskHandle<T> {
    /// Wait for the task and take its result.
    pub fn join(self) -> Result<T> {
        let mut state = self.slot.state.lock();
        loop {
            match std::mem::replace(&mut *state, SlotState::Taken) {
                SlotState::Pending => {
                    *state = SlotState::Pending;
                    self.slot.cv.wait(&mut state);
                }
                SlotState::Ready(result) => return result,
                SlotState::Taken => {
                    return Err(StoreError::Protocol("task result already taken".into()));
                }
            }
        }
    }

    /// Whether the task has produced a result.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        !matches!(*self.slot.state.lock(), SlotState::Pending)
    }
}

struct Promise<T> {
    slot: Arc<Slot<T>>,
    fulfilled: bool,
}

impl<T> Promise<T> {
    fn fulfill(mut self, result: Result<T>) {
        self.store(result);
        self.fulfilled = true;
    }

    fn store(&self, result: Result<T>) {
        let mut state = self.slot.state.lock();
        *state = SlotState::Ready(result);
        self.slot.cv.notify_all();
    }
}

impl<T> Drop for Promise<T> {
    fn drop(&mut self) {
        if !self.fulfilled {
            self.store(Err(StoreError::Protocol(
                "task discarded before execution".into(),
            )));
        }
    }
}

fn oneshot<T>() -> (Promise<T>, TaskHandle<T>) {
    let slot = Arc::new(Slot {
        state: Mutex::new(SlotState::Pending),
        cv: Condvar::new(),
    });
    (
        Promise {
            slot: Arc::clone(&slot),
            fulfilled: false,
        },
        TaskHandle { slot },
    )
}

// ── Pool ────────────────────────────────────────────────────────────────────

type Job = Box<dyn FnOnce() + Send + 'static>;

struct PoolShared {
    queue: Mutex<VecDeque<Job>>,
    work_cv: Condvar,
    idle_cv: Condvar,
    stop: AtomicBool,
    paused: AtomicBool,
    active: AtomicUsize,
    live: AtomicUsize,
    target: AtomicUsize,
}

/// Fixed-size worker pool with a FIFO queue.
pub struct WorkerPool {
    shared: Arc<PoolShared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Pool sized to the hardware parallelism.
    #[must_use]
    pub fn new() -> Self {
        Self::with_threads(default_parallelism())
    }

    /// Pool with an explicit worker count (minimum one).
    #[must_use]
    pub fn with_threads(threads: usize) -> Self {
        let threads = threads.max(1);
        let shared = Arc::new(PoolShared {
            queue: Mutex::new(VecDeque::new()),
            work_cv: Condvar::new(),
            idle_cv: Condvar::new(),
            stop: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            active: AtomicUsize::new(0),
            live: AtomicUsize::new(0),
            target: AtomicUsize::new(threads),
        });
        let pool = Self {
            shared,
            workers: Mutex::new(Vec::new()),
        };
        {
            let mut workers = pool.workers.lock();
            for index in 0..threads {
                workers.push(pool.spawn_worker(index));
            }
        }
        info!(threads, "worker pool started");
        pool
    }

    fn spawn_worker(&self, index: usize) -> JoinHandle<()> {
        let shared = Arc::clone(&self.shared);
        shared.live.fetch_add(1, Ordering::SeqCst);
        thread::Builder::new()
            .name(format!("mtfs-worker-{index}"))
            .spawn(move || worker_loop(&shared))
            .expect("spawn worker thread")
    }

    /// Submit a job and receive a handle for its result.
    ///
    /// A panicking job resolves the handle to a protocol error; the worker
    /// survives.
    pub fn submit<F, T>(&self, task: F) -> TaskHandle<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (promise, handle) = oneshot();
        if self.shared.stop.load(Ordering::SeqCst) {
            drop(promise); // resolves as discarded
            return handle;
        }
        let job: Job = Box::new(move || {
            match catch_unwind(AssertUnwindSafe(task)) {
                Ok(value) => promise.fulfill(Ok(value)),
                Err(_) => {
                    warn!("worker task panicked");
                    promise.fulfill(Err(StoreError::Protocol("worker task panicked".into())));
                }
            }
        });
        self.shared.queue.lock().push_back(job);
        self.shared.work_cv.notify_one();
        handle
    }

    /// Fire-and-forget submission.
    pub fn execute<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let _ = self.submit(task);
    }

    /// Stop handing out queued jobs until [`resume`](Self::resume).
    /// Jobs already running are unaffected.
    pub fn pause(&self) {
        let _guard = self.shared.queue.lock();
        self.shared.paused.store(true, Ordering::SeqCst);
        debug!("worker pool paused");
    }

    /// Resume a paused pool.
    pub fn resume(&self) {
        // Flip the flag under the queue lock so a worker between its flag
        // check and its wait cannot miss the wakeup.
        {
            let _guard = self.shared.queue.lock();
            self.shared.paused.store(false, Ordering::SeqCst);
        }
        self.shared.work_cv.notify_all();
        debug!("worker pool resumed");
    }

    /// Block until the queue is empty and no job is running.
    ///
    /// Waiting on a paused pool with queued work blocks until resumed.
    pub fn wait_for_all(&self) {
        let mut queue = self.shared.queue.lock();
        while !(queue.is_empty() && self.shared.active.load(Ordering::SeqCst) == 0) {
            self.shared.idle_cv.wait(&mut queue);
        }
    }

    /// Grow or shrink the worker set. Shrinking is cooperative: excess
    /// workers exit after finishing their current job.
    pub fn resize(&self, threads: usize) {
        let threads = threads.max(1);
        {
            let _guard = self.shared.queue.lock();
            self.shared.target.store(threads, Ordering::SeqCst);
        }
        let mut workers = self.workers.lock();
        let live = self.shared.live.load(Ordering::SeqCst);
        if threads > live {
            for index in live..threads {
                workers.push(self.spawn_worker(index));
            }
        } else {
            self.shared.work_cv.notify_all();
        }
        info!(threads, "worker pool resized");
    }

    /// Number of live worker threads.
    #[must_use]
    pub fn thread_count(&self) -> usize {
        self.shared.live.load(Ordering::SeqCst)
    }

    /// Number of queued (not yet started) jobs.
    #[must_use]
    pub fn queue_len(&self) -> usize {
        self.shared.queue.lock().len()
    }

    /// Number of jobs currently executing.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.shared.active.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.active_count() > 0 || self.queue_len() > 0
    }

    /// Signal stop, wake and join every worker, and discard queued jobs.
    /// Discarded handles resolve to an error. Idempotent.
    pub fn shutdown(&self) {
        if self.shared.stop.swap(true, Ordering::SeqCst) {
            return;
        }
        // Pass through the queue lock so no worker is between its stop
        // check and its wait when the notification fires.
        drop(self.shared.queue.lock());
        self.shared.work_cv.notify_all();
        let handles: Vec<JoinHandle<()>> = self.workers.lock().drain(..).collect();
        for handle in handles {
            let _ = handle.join();
        }
        let mut queue = self.shared.queue.lock();
        let discarded = queue.len();
        queue.clear();
        drop(queue);
        if discarded > 0 {
            warn!(discarded, "queued tasks discarded at shutdown");
        }
        self.shared.idle_cv.notify_all();
        info!("worker pool stopped");
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(shared: &PoolShared) {
    loop {
        let job = {
            let mut queue = shared.queue.lock();
            loop {
                if shared.stop.load(Ordering::SeqCst) {
                    shared.live.fetch_sub(1, Ordering::SeqCst);
                    return;
                }
                if shared.live.load(Ordering::SeqCst) > shared.target.load(Ordering::SeqCst) {
                    shared.live.fetch_sub(1, Ordering::SeqCst);
                    return;
                }
                if !shared.paused.load(Ordering::SeqCst) {
                    if let Some(job) = queue.pop_front() {
                        break job;
                    }
                }
                shared.work_cv.wait(&mut queue);
            }
        };

        shared.active.fetch_add(1, Ordering::SeqCst);
        job();
        shared.active.fetch_sub(1, Ordering::SeqCst);

        let queue = shared.queue.lock();
        if queue.is_empty() && shared.active.load(Ordering::SeqCst) == 0 {
            shared.idle_cv.notify_all();
        }
    }
}

fn default_parallelism() -> usize {
    thread::available_parallelism().map_or(4, usize::from)
}

/// Collect a batch of handles in input order.
///
/// Collection runs on a dedicated thread, never on a pool worker, so a
/// batch can never starve the pool that produces its items.
#[must_use]
pub fn join_all<T: Send + 'static>(handles: Vec<TaskHandle<T>>) -> TaskHandle<Vec<Result<T>>> {
    let (promise, out) = oneshot();
    let builder = thread::Builder::new().name("mtfs-collect".to_owned());
    builder
        .spawn(move || {
            let results: Vec<Result<T>> = handles.into_iter().map(TaskHandle::join).collect();
            promise.fulfill(Ok(results));
        })
        .expect("spawn collector thread");
    out
}

/// Like [`join_all`], for handles whose tasks themselves return `Result`:
/// worker-level failures (panic, discard) and task-level errors flatten
/// into one `Result` per item.
#[must_use]
pub fn join_all_flatten<T: Send + 'static>(
    handles: Vec<TaskHandle<Result<T>>>,
) -> TaskHandle<Vec<Result<T>>> {
    let (promise, out) = oneshot();
    let builder = thread::Builder::new().name("mtfs-collect".to_owned());
    builder
        .spawn(move || {
            let results: Vec<Result<T>> = handles
                .into_iter()
                .map(|handle| handle.join().and_then(|inner| inner))
                .collect();
            promise.fulfill(Ok(results));
        })
        .expect("spawn collector thread");
    out
}

// ── Process-wide pool ───────────────────────────────────────────────────────

static GLOBAL: OnceLock<Mutex<Option<Arc<WorkerPool>>>> = OnceLock::new();

fn global_slot() -> &'static Mutex<Option<Arc<WorkerPool>>> {
    GLOBAL.get_or_init(|| Mutex::new(None))
}

/// The process-wide pool, created on first use.
#[must_use]
pub fn global() -> Arc<WorkerPool> {
    let mut slot = global_slot().lock();
    if let Some(pool) = slot.as_ref() {
        return Arc::clone(pool);
    }
    let pool = Arc::new(WorkerPool::new());
    *slot = Some(Arc::clone(&pool));
    pool
}

/// Shut down and drop the process-wide pool. The next [`global`] call
/// creates a fresh one.
pub fn shutdown_global() {
    if let Some(pool) = global_slot().lock().take() {
        pool.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    #[test]
    fn submit_returns_value() {
        let pool = WorkerPool::with_threads(2);
        let handle = pool.submit(|| 2 + 2);
        assert_eq!(handle.join().expect("join"), 4);
    }

    #[test]
    fn wait_for_all_drains_queue() {
        let pool = WorkerPool::with_threads(2);
        let counter = Arc::new(AtomicU32::new(0));
        for _ in 0..32 {
            let counter = Arc::clone(&counter);
            pool.execute(move || {
                let _ = counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        pool.wait_for_all();
        assert_eq!(counter.load(Ordering::SeqCst), 32);
        assert!(!pool.is_busy());
    }

    #[test]
    fn panicking_task_yields_error_and_pool_survives() {
        let pool = WorkerPool::with_threads(1);
        let bad = pool.submit(|| panic!("boom"));
        assert!(bad.join().is_err());
        let good = pool.submit(|| 7);
        assert_eq!(good.join().expect("join"), 7);
    }

    #[test]
    fn pause_defers_execution_until_resume() {
        let pool = WorkerPool::with_threads(1);
        pool.pause();
        let counter = Arc::new(AtomicU32::new(0));
        let handle = {
            let counter = Arc::clone(&counter);
            pool.submit(move || counter.fetch_add(1, Ordering::SeqCst))
        };
        thread::sleep(Duration::from_millis(30));
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        pool.resume();
        let _ = handle.join().expect("join");
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn resize_grows_and_shrinks() {
        let pool = WorkerPool::with_threads(1);
        pool.resize(4);
        pool.wait_for_all();
        assert_eq!(pool.thread_count(), 4);
        pool.resize(1);
        // Shrinking is cooperative; give workers a moment to exit.
        for _ in 0..50 {
            if pool.thread_count() == 1 {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(pool.thread_count(), 1);
        let handle = pool.submit(|| 1);
        assert_eq!(handle.join().expect("join"), 1);
    }

    #[test]
    fn shutdown_discards_queued_tasks() {
        let pool = WorkerPool::with_threads(1);
        pool.pause();
        let queued = pool.submit(|| 9);
        pool.shutdown();
        assert!(queued.join().is_err());
    }

    #[test]
    fn join_all_preserves_input_order() {
        let pool = WorkerPool::with_threads(4);
        let handles: Vec<_> = (0..16_u32)
            .map(|i| {
                pool.submit(move || {
                    if i % 3 == 0 {
                        thread::sleep(Duration::from_millis(5));
                    }
                    i
                })
            })
            .collect();
        let results = join_all(handles).join().expect("collect");
        let values: Vec<u32> = results.into_iter().map(|r| r.expect("task")).collect();
        assert_eq!(values, (0..16).collect::<Vec<_>>());
    }

    #[test]
    fn global_pool_is_reused_until_shutdown() {
        let a = global();
        let b = global();
        assert!(Arc::ptr_eq(&a, &b));
        shutdown_global();
        let c = global();
        assert!(!Arc::ptr_eq(&a, &c));
        shutdown_global();
    }
}
