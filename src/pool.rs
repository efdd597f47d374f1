//! Fixed-size worker pool with timed result handles.

use crate::error::{LockscopeError, Result};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// A named pool of OS threads pulling jobs from one queue.
pub struct WorkerPool {
    name: String,
    jobs: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new(name: &str, size: usize) -> Result<Self> {
        if size == 0 {
            return Err(LockscopeError::UserError(format!(
                "worker pool '{}' needs at least one thread",
                name
            )));
        }

        let (jobs, queue) = mpsc::channel::<Job>();
        let queue = Arc::new(Mutex::new(queue));
        let mut workers = Vec::with_capacity(size);
        for index in 0..size {
            let queue = Arc::clone(&queue);
            let worker = thread::Builder::new()
                .name(format!("{}-{}", name, index))
                .spawn(move || run_worker(&queue))
                .map_err(|e| {
                    LockscopeError::UserError(format!("failed to spawn worker thread: {}", e))
                })?;
            workers.push(worker);
        }

        tracing::debug!(pool = name, size, "worker pool started");
        Ok(Self {
            name: name.to_string(),
            jobs: Some(jobs),
            workers,
        })
    }

    /// Queue `work` and return a handle to its result.
    pub fn submit<T, F>(&self, work: F) -> Result<TaskHandle<T>>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        let job: Job = Box::new(move || {
            let outcome = catch_unwind(AssertUnwindSafe(work)).unwrap_or_else(|panic| {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                Err(LockscopeError::Interrupted(format!(
                    "running a task that panicked: {}",
                    message
                )))
            });
            // The caller may have stopped waiting; the result is then dropped.
            let _ = tx.send(outcome);
        });

        let sender = self.jobs.as_ref().ok_or_else(|| self.closed())?;
        sender.send(job).map_err(|_| self.closed())?;
        Ok(TaskHandle { result: rx })
    }

    fn closed(&self) -> LockscopeError {
        LockscopeError::Interrupted(format!("submitting to closed pool '{}'", self.name))
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Closing the queue lets idle workers exit once queued jobs finish.
        self.jobs.take();
        let current = thread::current().id();
        for worker in self.workers.drain(..) {
            // The last handle can be released by a task on one of our own threads.
            if worker.thread().id() == current {
                continue;
            }
            if worker.join().is_err() {
                tracing::warn!(pool = %self.name, "worker thread panicked");
            }
        }
    }
}

fn run_worker(queue: &Mutex<Receiver<Job>>) {
    loop {
        let job = {
            let queue = queue.lock().unwrap_or_else(|p| p.into_inner());
            queue.recv()
        };
        match job {
            Ok(job) => job(),
            Err(_) => return,
        }
    }
}

/// Pending result of a submitted task.
pub struct TaskHandle<T> {
    result: Receiver<Result<T>>,
}

impl<T> TaskHandle<T> {
    /// Wait up to `timeout` for the task's result.
    pub fn wait(self, timeout: Duration) -> Result<T> {
        self.poll(timeout)
            .unwrap_or(Err(LockscopeError::TimeoutExceeded {
                what: "a pooled task".to_string(),
                timeout,
            }))
    }

    /// Like [`wait`](Self::wait), but a task still running after `timeout`
    /// yields `None` and the handle stays usable.
    pub fn poll(&self, timeout: Duration) -> Option<Result<T>> {
        match self.result.recv_timeout(timeout) {
            Ok(outcome) => Some(outcome),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => Some(Err(LockscopeError::Interrupted(
                "waiting for a task that was dropped".to_string(),
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    #[test]
    fn test_tasks_run_and_return_results() {
        let pool = WorkerPool::new("test", 2).unwrap();
        let handle = pool.submit(|| Ok(6 * 7)).unwrap();
        assert_eq!(handle.wait(Duration::from_secs(5)).unwrap(), 42);
    }

    #[test]
    fn test_task_errors_are_returned_to_the_caller() {
        let pool = WorkerPool::new("test", 1).unwrap();
        let handle = pool
            .submit::<(), _>(|| Err(LockscopeError::Database("boom".to_string())))
            .unwrap();
        let err = handle.wait(Duration::from_secs(5)).unwrap_err();
        assert!(matches!(err, LockscopeError::Database(_)));
    }

    #[test]
    fn test_slow_task_times_out() {
        let pool = WorkerPool::new("test", 1).unwrap();
        let handle = pool
            .submit(|| {
                thread::sleep(Duration::from_millis(300));
                Ok(())
            })
            .unwrap();
        let err = handle.wait(Duration::from_millis(20)).unwrap_err();
        assert!(err.is_timeout());
    }

    #[test]
    fn test_poll_keeps_the_handle_until_the_task_finishes() {
        let pool = WorkerPool::new("test", 1).unwrap();
        let handle = pool
            .submit(|| {
                thread::sleep(Duration::from_millis(200));
                Ok(7)
            })
            .unwrap();
        assert!(handle.poll(Duration::from_millis(10)).is_none());
        let outcome = handle.poll(Duration::from_secs(5)).unwrap();
        assert_eq!(outcome.unwrap(), 7);
    }

    #[test]
    fn test_panicking_task_does_not_kill_the_pool() {
        let pool = WorkerPool::new("test", 1).unwrap();
        let handle = pool.submit::<(), _>(|| panic!("task exploded")).unwrap();
        let err = handle.wait(Duration::from_secs(5)).unwrap_err();
        assert!(err.to_string().contains("task exploded"));

        let handle = pool.submit(|| Ok("still alive")).unwrap();
        assert_eq!(handle.wait(Duration::from_secs(5)).unwrap(), "still alive");
    }

    #[test]
    fn test_tasks_run_concurrently() {
        let pool = WorkerPool::new("test", 4).unwrap();
        let running = Arc::new(AtomicUsize::new(0));
        let started = Instant::now();
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let running = Arc::clone(&running);
                pool.submit(move || {
                    running.fetch_add(1, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(100));
                    Ok(())
                })
                .unwrap()
            })
            .collect();
        for handle in handles {
            handle.wait(Duration::from_secs(5)).unwrap();
        }
        assert_eq!(running.load(Ordering::SeqCst), 4);
        assert!(started.elapsed() < Duration::from_millis(390));
    }

    #[test]
    fn test_zero_sized_pool_is_rejected() {
        assert!(WorkerPool::new("empty", 0).is_err());
    }
}
