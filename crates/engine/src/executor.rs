//! Refresh executors
//!
//! `EntityStore::refresh_with` hands one task per entity type to a
//! [`RefreshExecutor`]. [`InlineExecutor`] runs tasks on the calling
//! thread; [`WorkerPool`] runs them on a fixed set of named worker threads
//! with a bounded FIFO queue.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tessera_core::Result;
use tracing::error;

use crate::config::StoreConfig;

/// Unit of refresh work
pub type RefreshTask = Box<dyn FnOnce() + Send + 'static>;

/// Runs refresh tasks
pub trait RefreshExecutor: Send + Sync {
    /// Run `task`, now or later; it must run exactly once
    fn execute(&self, task: RefreshTask);
}

/// Runs each task immediately on the calling thread
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineExecutor;

impl RefreshExecutor for InlineExecutor {
    fn execute(&self, task: RefreshTask) {
        task();
    }
}

/// Task handed back when the pool cannot accept it
pub struct Rejected(pub RefreshTask);

impl std::fmt::Debug for Rejected {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "worker pool queue is full or shut down")
    }
}

/// Pool metrics snapshot.
#[derive(Debug, Clone, Copy)]
pub struct PoolStats {
    /// Tasks waiting in the queue.
    pub queue_depth: usize,
    /// Tasks currently executing.
    pub active_tasks: usize,
    /// Tasks completed since the pool was created.
    pub tasks_completed: u64,
    /// Number of worker threads.
    pub worker_count: usize,
}

struct PoolInner {
    queue: Mutex<VecDeque<RefreshTask>>,
    work_ready: Condvar,
    drain_cond: Condvar,
    shutdown: AtomicBool,
    queue_depth: AtomicUsize,
    active_tasks: AtomicUsize,
    max_queue_depth: usize,
    tasks_completed: AtomicU64,
}

/// Fixed pool of refresh worker threads.
///
/// Workers are named `tessera-refresh-0`, `tessera-refresh-1`, etc.
pub struct WorkerPool {
    inner: Arc<PoolInner>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    num_threads: usize,
}

impl WorkerPool {
    /// Start `num_threads` workers with a queue bounded at `max_queue_depth`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if a worker thread cannot be spawned; workers
    /// already started are shut down first.
    pub fn new(num_threads: usize, max_queue_depth: usize) -> Result<Self> {
        let inner = Arc::new(PoolInner {
            queue: Mutex::new(VecDeque::new()),
            work_ready: Condvar::new(),
            drain_cond: Condvar::new(),
            shutdown: AtomicBool::new(false),
            queue_depth: AtomicUsize::new(0),
            active_tasks: AtomicUsize::new(0),
            max_queue_depth,
            tasks_completed: AtomicU64::new(0),
        });

        let pool = WorkerPool {
            inner,
            workers: Mutex::new(Vec::with_capacity(num_threads)),
            num_threads,
        };
        for i in 0..num_threads {
            let inner = Arc::clone(&pool.inner);
            let handle = std::thread::Builder::new()
                .name(format!("tessera-refresh-{}", i))
                .spawn(move || worker_loop(&inner));
            match handle {
                Ok(handle) => pool.workers.lock().push(handle),
                Err(e) => {
                    pool.shutdown();
                    return Err(e.into());
                }
            }
        }
        Ok(pool)
    }

    /// Pool of `refresh_workers` threads, queue bounded at four tasks per worker.
    ///
    /// # Errors
    ///
    /// Same as [`WorkerPool::new`].
    pub fn from_config(config: &StoreConfig) -> Result<Self> {
        Self::new(config.refresh_workers, config.refresh_workers * 4)
    }

    /// Queue a task.
    ///
    /// Hands the task back if the queue is at capacity or the pool has
    /// been shut down.
    pub fn submit(&self, task: RefreshTask) -> std::result::Result<(), Rejected> {
        if self.inner.shutdown.load(Ordering::Acquire) {
            return Err(Rejected(task));
        }
        {
            let mut queue = self.inner.queue.lock();
            if queue.len() >= self.inner.max_queue_depth {
                return Err(Rejected(task));
            }
            queue.push_back(task);
            self.inner.queue_depth.fetch_add(1, Ordering::Release);
        }
        self.inner.work_ready.notify_one();
        Ok(())
    }

    /// Block until all queued and in-flight tasks have completed.
    ///
    /// Workers keep running afterwards.
    pub fn drain(&self) {
        let mut queue = self.inner.queue.lock();
        while self.inner.queue_depth.load(Ordering::Acquire) > 0
            || self.inner.active_tasks.load(Ordering::Acquire) > 0
        {
            self.inner.drain_cond.wait(&mut queue);
        }
    }

    /// Signal workers to exit after the queue empties and join them.
    pub fn shutdown(&self) {
        self.inner.shutdown.store(true, Ordering::Release);
        // Notify under the queue lock so a worker between its shutdown
        // check and wait() cannot miss the wakeup.
        {
            let _queue = self.inner.queue.lock();
            self.inner.work_ready.notify_all();
        }
        let mut workers = self.workers.lock();
        for handle in workers.drain(..) {
            let _ = handle.join();
        }
    }

    /// Return a snapshot of pool metrics.
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            queue_depth: self.inner.queue_depth.load(Ordering::Relaxed),
            active_tasks: self.inner.active_tasks.load(Ordering::Relaxed),
            tasks_completed: self.inner.tasks_completed.load(Ordering::Relaxed),
            worker_count: self.num_threads,
        }
    }
}

impl RefreshExecutor for WorkerPool {
    /// Queue the task, running it inline when the pool rejects it
    fn execute(&self, task: RefreshTask) {
        if let Err(Rejected(task)) = self.submit(task) {
            task();
        }
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
            .field("stats", &self.stats())
            .finish()
    }
}

/// Decrements `active_tasks` and wakes drain waiters on drop, including
/// when the task panics.
struct ActiveTaskGuard<'a> {
    inner: &'a PoolInner,
}

impl Drop for ActiveTaskGuard<'_> {
    fn drop(&mut self) {
        let prev_active = self.inner.active_tasks.fetch_sub(1, Ordering::Release);
        self.inner.tasks_completed.fetch_add(1, Ordering::Relaxed);
        if prev_active == 1 && self.inner.queue_depth.load(Ordering::Acquire) == 0 {
            let _queue = self.inner.queue.lock();
            self.inner.drain_cond.notify_all();
        }
    }
}

fn worker_loop(inner: &PoolInner) {
    loop {
        let task = {
            let mut queue = inner.queue.lock();
            loop {
                if let Some(task) = queue.pop_front() {
                    inner.queue_depth.fetch_sub(1, Ordering::Release);
                    inner.active_tasks.fetch_add(1, Ordering::Release);
                    break task;
                }
                if inner.shutdown.load(Ordering::Acquire) {
                    return;
                }
                inner.work_ready.wait(&mut queue);
            }
        };

        let _guard = ActiveTaskGuard { inner };
        if let Err(e) = catch_unwind(AssertUnwindSafe(task)) {
            error!(
                target: "tessera::store",
                "refresh task panicked: {:?}",
                e.downcast_ref::<&str>().copied().unwrap_or("(non-string panic)")
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::time::Duration;

    #[test]
    fn test_submit_and_drain() {
        let pool = WorkerPool::new(2, 64).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..10 {
            let c = Arc::clone(&counter);
            pool.submit(Box::new(move || {
                c.fetch_add(1, Ordering::Relaxed);
            }))
            .unwrap();
        }
        pool.drain();
        assert_eq!(counter.load(Ordering::Relaxed), 10);
        assert_eq!(pool.stats().tasks_completed, 10);
        pool.shutdown();
    }

    #[test]
    fn test_fifo_on_single_worker() {
        let pool = WorkerPool::new(1, 64).unwrap();
        let barrier = Arc::new(Barrier::new(2));
        let b = Arc::clone(&barrier);
        pool.submit(Box::new(move || {
            b.wait();
        }))
        .unwrap();
        std::thread::sleep(Duration::from_millis(50));

        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..5 {
            let o = Arc::clone(&order);
            pool.submit(Box::new(move || o.lock().push(i))).unwrap();
        }
        barrier.wait();
        pool.drain();
        assert_eq!(*order.lock(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_backpressure_hands_task_back() {
        let pool = WorkerPool::new(1, 1).unwrap();
        let barrier = Arc::new(Barrier::new(2));
        let b = Arc::clone(&barrier);
        pool.submit(Box::new(move || {
            b.wait();
        }))
        .unwrap();
        std::thread::sleep(Duration::from_millis(50));

        pool.submit(Box::new(|| {})).unwrap();
        let ran = Arc::new(AtomicBool::new(false));
        let r = Arc::clone(&ran);
        let rejected = pool.submit(Box::new(move || r.store(true, Ordering::SeqCst)));
        let Err(Rejected(task)) = rejected else {
            panic!("queue should be full");
        };
        task();
        assert!(ran.load(Ordering::SeqCst));

        barrier.wait();
        pool.drain();
    }

    #[test]
    fn test_execute_runs_rejected_tasks_inline() {
        let pool = WorkerPool::new(1, 4).unwrap();
        pool.shutdown();
        let ran = Arc::new(AtomicBool::new(false));
        let r = Arc::clone(&ran);
        pool.execute(Box::new(move || r.store(true, Ordering::SeqCst)));
        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn test_panicking_task_does_not_hang_drain() {
        let pool = WorkerPool::new(1, 8).unwrap();
        pool.submit(Box::new(|| panic!("boom"))).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&counter);
        pool.submit(Box::new(move || {
            c.fetch_add(1, Ordering::Relaxed);
        }))
        .unwrap();
        pool.drain();
        assert_eq!(counter.load(Ordering::Relaxed), 1);
        assert_eq!(pool.stats().worker_count, 1);
    }

    #[test]
    fn test_inline_executor() {
        let ran = Arc::new(AtomicBool::new(false));
        let r = Arc::clone(&ran);
        InlineExecutor.execute(Box::new(move || r.store(true, Ordering::SeqCst)));
        assert!(ran.load(Ordering::SeqCst));
    }

    static_assertions::assert_impl_all!(WorkerPool: Send, Sync);
}
