use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use rayon::{ThreadPool, ThreadPoolBuilder};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("failed to start worker threads: {0}")]
    Build(#[from] rayon::ThreadPoolBuildError),

    #[error("task panicked")]
    Panicked,
}

/// Worker pool shared by the simulation and the indexes.
///
/// Constructed explicitly and handed out as `Arc<TaskPool>`; the workers
/// shut down when the last owner drops it.
pub struct TaskPool {
    pool: ThreadPool,
}

impl TaskPool {
    /// `workers == 0` lets rayon pick one thread per core.
    pub fn new(workers: usize) -> Result<Self, TaskError> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("tanks-worker-{i}"))
            .build()?;
        log::debug!("task pool started with {} workers", pool.current_num_threads());
        Ok(Self { pool })
    }

    #[inline]
    pub fn workers(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Queue a unit of work; the handle's [`TaskHandle::wait`] blocks until
    /// it ran.
    pub fn submit<F>(&self, job: F) -> TaskHandle
    where
        F: FnOnce() + Send + 'static,
    {
        let done = Arc::new(Completion::default());
        let signal = Arc::clone(&done);
        self.pool.spawn(move || {
            let outcome =
                panic::catch_unwind(AssertUnwindSafe(job)).map_err(|_| TaskError::Panicked);
            signal.finish(outcome);
        });
        TaskHandle { done }
    }

    /// Fork-join over borrowed work: every unit submitted to the scope has
    /// completed when this returns.
    pub fn fork<'scope, OP, R>(&self, op: OP) -> R
    where
        OP: FnOnce(&ForkScope<'_, 'scope>) -> R + Send,
        R: Send,
    {
        self.pool.scope(|scope| op(&ForkScope { scope }))
    }
}

/// Submission side of [`TaskPool::fork`].
pub struct ForkScope<'a, 'scope> {
    scope: &'a rayon::Scope<'scope>,
}

impl<'scope> ForkScope<'_, 'scope> {
    pub fn submit<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'scope,
    {
        self.scope.spawn(move |_| job());
    }
}

/*──────────────────────── completion handle ────────────────────────*/

#[derive(Default)]
struct Completion {
    outcome: Mutex<Option<Result<(), TaskError>>>,
    ready: Condvar,
}

impl Completion {
    fn finish(&self, outcome: Result<(), TaskError>) {
        *self.outcome.lock() = Some(outcome);
        self.ready.notify_all();
    }
}

/// Completion handle returned by [`TaskPool::submit`].
///
/// Do not `wait` from inside a pool worker: the blocked worker cannot help
/// run the job it waits for.
pub struct TaskHandle {
    done: Arc<Completion>,
}

impl TaskHandle {
    pub fn is_finished(&self) -> bool {
        self.done.outcome.lock().is_some()
    }

    /// Block until the job ran; a panicking job yields
    /// [`TaskError::Panicked`].
    pub fn wait(self) -> Result<(), TaskError> {
        let mut outcome = self.done.outcome.lock();
        loop {
            if let Some(result) = outcome.take() {
                return result;
            }
            self.done.ready.wait(&mut outcome);
        }
    }
}

/// Wait for every handle, reporting the first failure after all finished.
pub fn wait_all(handles: impl IntoIterator<Item = TaskHandle>) -> Result<(), TaskError> {
    handles
        .into_iter()
        .map(TaskHandle::wait)
        .fold(Ok(()), |acc, r| acc.and(r))
}
