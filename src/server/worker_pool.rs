//! Fixed-size worker pool fed by a bounded task queue.
//!
//! Each I/O worker owns one pool. Threads block on the queue; `push_task`
//! never blocks and surfaces a full queue to the caller, which turns it into
//! a 503. `stop` is draining: queued tasks still run before the threads
//! observe the stop and join.

use crate::queue::{Bounded, PushError};
use std::{
    io,
    sync::Arc,
    thread::{self, JoinHandle},
};
use tracing::debug;

pub(crate) type Task = Box<dyn FnOnce() + Send + 'static>;

pub(crate) struct WorkerPool {
    tasks: Arc<Bounded<Task>>,
    threads: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawns `size` threads named `{name}-w{n}` blocking on a queue bounded
    /// at `capacity`.
    pub(crate) fn start(name: &str, size: usize, capacity: usize) -> io::Result<Self> {
        let tasks: Arc<Bounded<Task>> = Arc::new(Bounded::new(capacity));
        let mut threads = Vec::with_capacity(size);

        for n in 0..size {
            let tasks = Arc::clone(&tasks);
            let handle = thread::Builder::new()
                .name(format!("{name}-w{n}"))
                .spawn(move || {
                    while let Some(task) = tasks.pop_blocking() {
                        task();
                    }
                    debug!("worker thread draining complete");
                })?;
            threads.push(handle);
        }

        Ok(Self { tasks, threads })
    }

    /// Non-blocking; `Err(Full)` is the overload signal.
    #[inline]
    pub(crate) fn push_task(&self, task: Task) -> Result<(), PushError> {
        self.tasks.push(task)
    }

    /// Tasks queued but not yet picked up.
    #[inline]
    pub(crate) fn queued(&self) -> usize {
        self.tasks.len()
    }

    /// Stops the queue and joins every thread. Already-queued tasks run to
    /// completion first; the event loop's drain phase depends on that.
    pub(crate) fn stop(&mut self) {
        self.tasks.stop();
        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }
    }
}
