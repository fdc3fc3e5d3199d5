use std::{
    sync::{Arc, Mutex, OnceLock, PoisonError},
    time::Instant,
};

use crossbeam_channel::{Receiver, Sender};
use rayon::ThreadPool;

type Job<T> = Box<dyn FnOnce() -> T + Send + 'static>;

/// A value computed at most once, either on a worker pool or inline on first
/// access.
///
/// Completion is signalled by dropping the only sender of `done`, which wakes
/// every blocked [`Lazy::get`] at once.
pub struct Lazy<T> {
    job: Mutex<Option<Job<T>>>,
    value: OnceLock<T>,
    became_ready_at: OnceLock<Instant>,
    done_tx: Mutex<Option<Sender<()>>>,
    done_rx: Receiver<()>,
}

impl<T: Send + Sync + 'static> Lazy<T> {
    pub fn new(job: impl FnOnce() -> T + Send + 'static) -> Self {
        Self::with_job(Some(Box::new(job)))
    }

    /// Already computed value.
    pub fn ready(value: T) -> Self {
        let lazy = Self::with_job(None);
        lazy.finish(value);
        lazy
    }

    fn with_job(job: Option<Job<T>>) -> Self {
        let (done_tx, done_rx) = crossbeam_channel::bounded(0);
        Self {
            job: Mutex::new(job),
            value: OnceLock::new(),
            became_ready_at: OnceLock::new(),
            done_tx: Mutex::new(Some(done_tx)),
            done_rx,
        }
    }

    fn take_job(&self) -> Option<Job<T>> {
        self.job.lock().unwrap_or_else(PoisonError::into_inner).take()
    }

    fn finish(&self, value: T) {
        let _ = self.value.set(value);
        let _ = self.became_ready_at.set(Instant::now());
        self.done_tx.lock().unwrap_or_else(PoisonError::into_inner).take();
    }

    /// Schedule the computation on `pool`. No-op once started.
    pub fn compute_async(self: &Arc<Self>, pool: &ThreadPool) {
        let Some(job) = self.take_job() else {
            return;
        };
        let this = Arc::clone(self);
        pool.spawn(move || {
            let value = job();
            this.finish(value);
        });
    }

    pub fn is_ready(&self) -> bool {
        self.value.get().is_some()
    }

    pub fn became_ready_at(&self) -> Option<Instant> {
        self.became_ready_at.get().copied()
    }

    /// The value; runs the job inline if it was never scheduled, otherwise
    /// blocks until the worker finishes.
    pub fn get(&self) -> &T {
        if let Some(job) = self.take_job() {
            self.finish(job());
        }
        loop {
            if let Some(value) = self.value.get() {
                return value;
            }
            // Returns Err once the sender is dropped in `finish`.
            let _ = self.done_rx.recv();
        }
    }
}
