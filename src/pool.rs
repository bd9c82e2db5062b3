//! Fixed-size worker pool with pollable completion handles.
//!
//! Sized `max_threads + 3`: the extra workers keep the file watcher, the
//! keyboard loop, and the web server from starving query tasks. Tasks return
//! a boolean success flag; the submitter polls the handle from the tick loop
//! and never blocks on it. The internal job queue is unbounded; admission
//! control is the caller's job.

use crossbeam_channel::{unbounded, Receiver, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};

/// Workers reserved for long-lived infrastructure tasks.
pub const RESERVED_WORKERS: u32 = 3;

type Job = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug, Default)]
struct TaskSlot {
    ready: AtomicBool,
    result: Mutex<Option<bool>>,
}

/// Completion handle for a submitted task.
#[derive(Debug, Clone)]
pub struct TaskHandle {
    slot: Arc<TaskSlot>,
}

impl TaskHandle {
    /// Non-blocking readiness check.
    #[must_use]
    pub fn poll_ready(&self) -> bool {
        self.slot.ready.load(Ordering::Acquire)
    }

    /// Move the result out. `None` until the task is ready or after the
    /// result was already taken.
    pub fn take(&self) -> Option<bool> {
        if !self.poll_ready() {
            return None;
        }
        self.slot.result.lock().expect("task slot lock poisoned").take()
    }
}

#[derive(Debug)]
struct Outstanding {
    count: Mutex<usize>,
    all_done: Condvar,
}

pub struct ThreadPool {
    sender: Sender<Job>,
    outstanding: Arc<Outstanding>,
    workers: u32,
}

impl ThreadPool {
    /// Create a pool with `max_threads + RESERVED_WORKERS` workers.
    #[must_use]
    pub fn new(max_threads: u32) -> Self {
        let workers = max_threads + RESERVED_WORKERS;
        let (sender, receiver) = unbounded::<Job>();

        for index in 0..workers {
            let receiver: Receiver<Job> = receiver.clone();
            std::thread::Builder::new()
                .name(format!("worker-{index}"))
                .spawn(move || {
                    while let Ok(job) = receiver.recv() {
                        job();
                    }
                })
                .expect("spawn pool worker");
        }

        Self {
            sender,
            outstanding: Arc::new(Outstanding {
                count: Mutex::new(0),
                all_done: Condvar::new(),
            }),
            workers,
        }
    }

    #[must_use]
    pub const fn worker_count(&self) -> u32 {
        self.workers
    }

    /// Submit a task and get a pollable handle for its boolean result.
    pub fn submit<F>(&self, task: F) -> TaskHandle
    where
        F: FnOnce() -> bool + Send + 'static,
    {
        let slot = Arc::new(TaskSlot::default());
        let handle = TaskHandle { slot: slot.clone() };

        {
            let mut count = self.outstanding.count.lock().expect("outstanding lock poisoned");
            *count += 1;
        }

        let outstanding = self.outstanding.clone();
        let job: Job = Box::new(move || {
            // a panicking task must still complete its handle, or wait_all
            // would block forever
            let ok = std::panic::catch_unwind(std::panic::AssertUnwindSafe(task)).unwrap_or_else(
                |_| {
                    tracing::error!("pool task panicked");
                    false
                },
            );
            *slot.result.lock().expect("task slot lock poisoned") = Some(ok);
            slot.ready.store(true, Ordering::Release);

            let mut count = outstanding.count.lock().expect("outstanding lock poisoned");
            *count -= 1;
            if *count == 0 {
                outstanding.all_done.notify_all();
            }
        });

        self.sender.send(job).expect("pool queue closed");
        handle
    }

    /// Submit a fire-and-forget task that `wait_all` does not account for.
    /// Used for workers that block on I/O the process cannot interrupt.
    pub fn submit_detached<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.sender.send(Box::new(task)).expect("pool queue closed");
    }

    /// Block until every counted task has completed.
    pub fn wait_all(&self) {
        let mut count = self.outstanding.count.lock().expect("outstanding lock poisoned");
        while *count > 0 {
            count = self
                .outstanding
                .all_done
                .wait(count)
                .expect("outstanding lock poisoned");
        }
    }

    /// Number of counted tasks not yet completed.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        *self.outstanding.count.lock().expect("outstanding lock poisoned")
    }
}

// Dropping the pool closes the job queue; idle workers exit on their own.
// Workers stuck in a blocking job (the keyboard loop) are reclaimed at
// process exit, so no join happens here.

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[test]
    fn pool_reserves_infrastructure_workers() {
        let pool = ThreadPool::new(2);
        assert_eq!(pool.worker_count(), 2 + RESERVED_WORKERS);
    }

    #[test]
    fn submitted_task_result_is_taken_once() {
        let pool = ThreadPool::new(1);
        let handle = pool.submit(|| true);
        pool.wait_all();

        assert!(handle.poll_ready());
        assert_eq!(handle.take(), Some(true));
        assert_eq!(handle.take(), None);
    }

    #[test]
    fn failing_task_reports_false() {
        let pool = ThreadPool::new(1);
        let handle = pool.submit(|| false);
        pool.wait_all();
        assert_eq!(handle.take(), Some(false));
    }

    #[test]
    fn wait_all_blocks_until_tasks_finish() {
        let pool = ThreadPool::new(2);
        let counter = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let counter = counter.clone();
            handles.push(pool.submit(move || {
                std::thread::sleep(Duration::from_millis(5));
                counter.fetch_add(1, Ordering::SeqCst);
                true
            }));
        }

        pool.wait_all();
        assert_eq!(counter.load(Ordering::SeqCst), 8);
        assert_eq!(pool.outstanding(), 0);
        assert!(handles.iter().all(TaskHandle::poll_ready));
    }

    #[test]
    fn detached_tasks_do_not_block_wait_all() {
        let pool = ThreadPool::new(1);
        let (sender, receiver) = crossbeam_channel::bounded::<()>(0);
        pool.submit_detached(move || {
            // parked until the test ends
            let _ = receiver.recv();
        });

        let handle = pool.submit(|| true);
        pool.wait_all();
        assert_eq!(handle.take(), Some(true));
        drop(sender);
    }

    #[test]
    fn panicking_task_reports_failure_instead_of_hanging() {
        let pool = ThreadPool::new(1);
        let handle = pool.submit(|| panic!("boom"));
        pool.wait_all();
        assert_eq!(handle.take(), Some(false));
    }

    #[test]
    fn handle_is_not_ready_before_completion() {
        let pool = ThreadPool::new(1);
        let (sender, receiver) = crossbeam_channel::bounded::<()>(0);
        let handle = pool.submit(move || {
            let _ = receiver.recv();
            true
        });

        assert!(!handle.poll_ready());
        assert_eq!(handle.take(), None);

        drop(sender);
        pool.wait_all();
        assert_eq!(handle.take(), Some(true));
    }
}
