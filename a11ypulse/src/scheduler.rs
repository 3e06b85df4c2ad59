use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle, ThreadId};

use anyhow::{Context, Result};

type Task = Box<dyn FnOnce() + Send + 'static>;

struct Shared {
    queue: Mutex<VecDeque<Task>>,
    work_available: Condvar,
    shutdown: AtomicBool,
}

/// Runs submitted work one item at a time, in submission order, on a single
/// dedicated worker thread.
///
/// Every OS callback thread funnels through here, so everything that runs
/// inside a task observes a totally ordered history and never races itself.
pub struct SequentialTaskScheduler {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
    worker_id: ThreadId,
}

/// Cloneable submission side of the scheduler, handed to callback sources.
#[derive(Clone)]
pub struct SchedulerHandle {
    shared: Arc<Shared>,
}

impl SequentialTaskScheduler {
    pub fn new(name: &str) -> Result<Self> {
        let shared = Arc::new(Shared {
            queue: Mutex::new(VecDeque::new()),
            work_available: Condvar::new(),
            shutdown: AtomicBool::new(false),
        });

        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || run_worker(&worker_shared))
            .with_context(|| format!("Failed to spawn scheduler thread {}", name))?;
        let worker_id = worker.thread().id();

        tracing::debug!("Scheduler {} started", name);

        Ok(Self {
            shared,
            worker: Mutex::new(Some(worker)),
            worker_id,
        })
    }

    pub fn handle(&self) -> SchedulerHandle {
        SchedulerHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn submit<F>(&self, work: F)
    where
        F: FnOnce() + Send + 'static,
    {
        submit(&self.shared, Box::new(work));
    }

    pub fn pending(&self) -> usize {
        self.shared
            .queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Ask the worker to exit and wait for it.
    ///
    /// The task currently running is allowed to finish; anything still queued
    /// may or may not run. Calling this from inside a task only raises the flag.
    pub fn shutdown(&self) {
        self.shared.shutdown.store(true, Ordering::SeqCst);
        {
            // Take the lock so the worker cannot miss the wakeup between its
            // flag check and its wait.
            let _queue = self
                .shared
                .queue
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            self.shared.work_available.notify_all();
        }

        if thread::current().id() == self.worker_id {
            return;
        }

        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(worker) = worker {
            if worker.join().is_err() {
                tracing::error!("Scheduler worker exited by panic");
            }
        }
    }
}

impl Drop for SequentialTaskScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl SchedulerHandle {
    pub fn submit<F>(&self, work: F)
    where
        F: FnOnce() + Send + 'static,
    {
        submit(&self.shared, Box::new(work));
    }
}

fn submit(shared: &Shared, task: Task) {
    if shared.shutdown.load(Ordering::SeqCst) {
        tracing::debug!("Scheduler is shutting down, dropping submitted task");
        return;
    }
    let mut queue = shared.queue.lock().unwrap_or_else(PoisonError::into_inner);
    queue.push_back(task);
    shared.work_available.notify_one();
}

fn run_worker(shared: &Shared) {
    let _guard = PanicGuard;

    loop {
        let task = {
            let mut queue = shared.queue.lock().unwrap_or_else(PoisonError::into_inner);
            loop {
                if shared.shutdown.load(Ordering::SeqCst) {
                    tracing::debug!("Scheduler worker exiting ({} tasks dropped)", queue.len());
                    return;
                }
                if let Some(task) = queue.pop_front() {
                    break task;
                }
                queue = shared
                    .work_available
                    .wait(queue)
                    .unwrap_or_else(PoisonError::into_inner);
            }
        };

        // Runs outside the lock so submitters never wait on a task body.
        task();
    }
}

/// A panicking task is a logic bug in a detector. Nothing downstream can be
/// trusted afterwards, so the whole process goes down instead of the worker
/// quietly disappearing.
struct PanicGuard;

impl Drop for PanicGuard {
    fn drop(&mut self) {
        if thread::panicking() {
            tracing::error!("Scheduled task panicked, aborting");
            std::process::abort();
        }
    }
}
