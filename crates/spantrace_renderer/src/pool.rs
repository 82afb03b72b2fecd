//! Minimal worker pool for tile jobs.
//!
//! One mutex-guarded FIFO holds every pending job. Submitting a job queues
//! it and starts a worker thread if fewer than the pool size are running;
//! each worker drains the queue and then retires. Results come back through
//! a per-job slot guarded by its own mutex and condition variable.
//!
//! Every submitted job runs exactly once; there is no cancellation.

use std::any::Any;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread;

use thiserror::Error;

/// Worker count used when the hardware concurrency cannot be detected.
pub const FALLBACK_THREADS: usize = 4;

/// Why a job produced no value.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum JobError {
    #[error("Job panicked: {0}")]
    Panicked(String),

    #[error("Job result was already taken")]
    Taken,

    #[error("Failed to start a worker thread: {0}")]
    Spawn(String),
}

pub type JobResult<T> = Result<T, JobError>;

type Task = Box<dyn FnOnce() + Send + 'static>;

struct QueuedTask {
    id: u64,
    task: Task,
}

#[derive(Default)]
struct Queue {
    tasks: VecDeque<QueuedTask>,
    workers: usize,
}

struct PoolShared {
    queue: Mutex<Queue>,
    max_workers: usize,
    next_id: AtomicU64,
}

/// Lock a mutex, ignoring poisoning. Jobs run under `catch_unwind`, so a
/// poisoned lock can only come from a panic between two plain field writes.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Fixed-size pool of worker threads. Cloning shares the pool.
#[derive(Clone)]
pub struct ThreadPool {
    shared: Arc<PoolShared>,
}

impl ThreadPool {
    /// Pool running at most `threads` jobs at once (at least one).
    pub fn new(threads: usize) -> Self {
        let max_workers = threads.max(1);
        log::info!("Thread pool created with {} workers", max_workers);
        Self {
            shared: Arc::new(PoolShared {
                queue: Mutex::new(Queue::default()),
                max_workers,
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// Pool sized to the machine's available parallelism.
    pub fn with_available_parallelism() -> Self {
        let threads = thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(FALLBACK_THREADS);
        Self::new(threads)
    }

    /// Maximum number of jobs running at once.
    pub fn threads(&self) -> usize {
        self.shared.max_workers
    }

    /// Jobs waiting for a worker.
    pub fn queued(&self) -> usize {
        lock(&self.shared.queue).tasks.len()
    }

    /// Queue `job` and return a handle to its result.
    pub fn submit<T, F>(&self, job: F) -> JobResult<JobHandle<T>>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let slot = Arc::new(JobSlot::new());
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);

        let task_slot = Arc::clone(&slot);
        let task: Task = Box::new(move || task_slot.run(job));

        let start_worker = {
            let mut queue = lock(&self.shared.queue);
            queue.tasks.push_back(QueuedTask { id, task });
            if queue.workers < self.shared.max_workers {
                queue.workers += 1;
                true
            } else {
                false
            }
        };

        if start_worker {
            let shared = Arc::clone(&self.shared);
            let spawned = thread::Builder::new()
                .name("spantrace-worker".into())
                .spawn(move || worker_loop(shared));
            if let Err(e) = spawned {
                let mut queue = lock(&self.shared.queue);
                queue.workers -= 1;
                if queue.workers == 0 {
                    // Nobody left to run it
                    queue.tasks.retain(|t| t.id != id);
                    return Err(JobError::Spawn(e.to_string()));
                }
                log::warn!("Failed to start worker thread, continuing with {}: {}", queue.workers, e);
            }
        }

        Ok(JobHandle { slot })
    }
}

impl Default for ThreadPool {
    fn default() -> Self {
        Self::with_available_parallelism()
    }
}

fn worker_loop(shared: Arc<PoolShared>) {
    loop {
        let next = {
            let mut queue = lock(&shared.queue);
            let next = queue.tasks.pop_front();
            if next.is_none() {
                queue.workers -= 1;
            }
            next
        };
        match next {
            Some(queued) => (queued.task)(),
            None => return,
        }
    }
}

enum JobState<T> {
    Queued,
    Running,
    Finished(JobResult<T>),
    /// Result handed out
    Done,
}

struct JobSlot<T> {
    state: Mutex<JobState<T>>,
    changed: Condvar,
}

impl<T> JobSlot<T> {
    fn new() -> Self {
        Self {
            state: Mutex::new(JobState::Queued),
            changed: Condvar::new(),
        }
    }

    /// Run `job` and publish the outcome.
    fn run<F: FnOnce() -> T>(&self, job: F) {
        *lock(&self.state) = JobState::Running;

        let outcome = panic::catch_unwind(AssertUnwindSafe(job)).map_err(|payload| JobError::Panicked(panic_message(payload)));

        *lock(&self.state) = JobState::Finished(outcome);
        self.changed.notify_all();
    }

    /// Block until the job has left the queued and running states.
    fn wait(&self) -> MutexGuard<'_, JobState<T>> {
        let mut state = lock(&self.state);
        while matches!(*state, JobState::Queued | JobState::Running) {
            state = self.changed.wait(state).unwrap_or_else(|e| e.into_inner());
        }
        state
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Handle to a submitted job.
///
/// Dropping the handle blocks until the job has run, whether it was still
/// queued or already running.
pub struct JobHandle<T> {
    slot: Arc<JobSlot<T>>,
}

impl<T> JobHandle<T> {
    /// Block until the job finishes and take its result.
    pub fn join(self) -> JobResult<T> {
        let mut state = self.slot.wait();
        match std::mem::replace(&mut *state, JobState::Done) {
            JobState::Finished(result) => result,
            _ => Err(JobError::Taken),
        }
    }

    /// True once the job has finished (successfully or not).
    pub fn is_finished(&self) -> bool {
        matches!(*lock(&self.slot.state), JobState::Finished(_) | JobState::Done)
    }

    /// True while a worker is executing the job.
    pub fn is_running(&self) -> bool {
        matches!(*lock(&self.slot.state), JobState::Running)
    }
}

impl<T> Drop for JobHandle<T> {
    fn drop(&mut self) {
        drop(self.slot.wait());
    }
}
