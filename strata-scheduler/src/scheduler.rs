use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use parking_lot::Mutex;
use strata_result::{Error, Result};

use crate::task::{BoxedTask, Task};

/// How long an idle worker waits before re-checking its stop flag.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Handle for enqueueing tasks, one per producing pipeline.
///
/// Tokens are cheap to clone and may outlive the scheduler; enqueueing after
/// the scheduler is gone fails with [`Error::Internal`].
#[derive(Clone, Debug)]
pub struct ProducerToken {
    id: u64,
    sender: Sender<BoxedTask>,
}

impl ProducerToken {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn enqueue(&self, task: BoxedTask) -> Result<()> {
        self.sender
            .send(task)
            .map_err(|_| Error::Internal("task scheduler has shut down".into()))
    }
}

struct Worker {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// Fixed queue, resizable pool of worker threads.
pub struct TaskScheduler {
    sender: Sender<BoxedTask>,
    receiver: Receiver<BoxedTask>,
    workers: Mutex<Vec<Worker>>,
    next_token: AtomicU64,
    next_worker: AtomicU64,
    poll_interval: Duration,
}

impl std::fmt::Debug for TaskScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskScheduler")
            .field("threads", &self.thread_count())
            .field("pending", &self.pending_tasks())
            .finish()
    }
}

impl TaskScheduler {
    /// Create a scheduler running `threads` workers. Zero is allowed: tasks
    /// then only run when a caller drains them with [`Self::try_execute_one`].
    pub fn new(threads: usize) -> Result<Self> {
        Self::with_poll_interval(threads, DEFAULT_POLL_INTERVAL)
    }

    pub fn with_poll_interval(threads: usize, poll_interval: Duration) -> Result<Self> {
        let (sender, receiver) = unbounded();
        let scheduler = Self {
            sender,
            receiver,
            workers: Mutex::new(Vec::new()),
            next_token: AtomicU64::new(0),
            next_worker: AtomicU64::new(0),
            poll_interval,
        };
        scheduler.set_threads(threads)?;
        Ok(scheduler)
    }

    pub fn create_producer(&self) -> ProducerToken {
        ProducerToken {
            id: self.next_token.fetch_add(1, Ordering::Relaxed),
            sender: self.sender.clone(),
        }
    }

    /// Enqueue `task` on behalf of `token`.
    pub fn schedule_task(&self, token: &ProducerToken, task: BoxedTask) -> Result<()> {
        token.enqueue(task)
    }

    /// Run one queued task on the calling thread, waiting at most `timeout`
    /// for one to show up. Returns whether a task ran.
    pub fn try_execute_one(&self, timeout: Duration) -> bool {
        match self.receiver.recv_timeout(timeout) {
            Ok(task) => {
                run_task(task);
                true
            }
            Err(_) => false,
        }
    }

    pub fn thread_count(&self) -> usize {
        self.workers.lock().len()
    }

    pub fn pending_tasks(&self) -> usize {
        self.receiver.len()
    }

    /// Grow or shrink the pool to `threads` workers.
    ///
    /// Shrinking flags the surplus workers and joins them, so it waits for
    /// their current task. Must not be called from inside a task.
    pub fn set_threads(&self, threads: usize) -> Result<()> {
        let mut workers = self.workers.lock();
        let before = workers.len();
        while workers.len() < threads {
            workers.push(self.spawn_worker()?);
        }
        let surplus: Vec<Worker> = if workers.len() > threads {
            workers.drain(threads..).collect()
        } else {
            Vec::new()
        };
        drop(workers);

        for worker in &surplus {
            worker.stop.store(true, Ordering::Release);
        }
        for worker in surplus {
            if worker.handle.join().is_err() {
                tracing::error!("scheduler worker panicked while stopping");
            }
        }
        if before != threads {
            tracing::debug!(from = before, to = threads, "scheduler thread count changed");
        }
        Ok(())
    }

    fn spawn_worker(&self) -> Result<Worker> {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let receiver = self.receiver.clone();
        let poll = self.poll_interval;
        let n = self.next_worker.fetch_add(1, Ordering::Relaxed);
        let handle = thread::Builder::new()
            .name(format!("strata-worker-{n}"))
            .spawn(move || worker_loop(&receiver, &flag, poll))
            .map_err(|e| Error::Internal(format!("failed to spawn scheduler worker: {e}")))?;
        Ok(Worker { stop, handle })
    }
}

impl Drop for TaskScheduler {
    fn drop(&mut self) {
        if let Err(err) = self.set_threads(0) {
            tracing::error!(error = %err, "failed to stop scheduler workers");
        }
    }
}

fn worker_loop(receiver: &Receiver<BoxedTask>, stop: &AtomicBool, poll: Duration) {
    tracing::trace!("scheduler worker started");
    while !stop.load(Ordering::Acquire) {
        match receiver.recv_timeout(poll) {
            Ok(task) => run_task(task),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    tracing::trace!("scheduler worker stopped");
}

fn run_task(task: BoxedTask) {
    // A panicking task must not take its worker down with it.
    if catch_unwind(AssertUnwindSafe(move || task.execute())).is_err() {
        tracing::error!("scheduled task panicked");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn zero_threads_runs_on_caller() {
        let scheduler = TaskScheduler::new(0).unwrap();
        let token = scheduler.create_producer();
        let hits = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let hits = Arc::clone(&hits);
            token
                .enqueue(Box::new(move || {
                    hits.fetch_add(1, Ordering::SeqCst);
                }))
                .unwrap();
        }
        assert_eq!(scheduler.pending_tasks(), 3);
        while scheduler.try_execute_one(Duration::from_millis(1)) {}
        assert_eq!(hits.load(Ordering::SeqCst), 3);
        assert!(!scheduler.try_execute_one(Duration::from_millis(1)));
    }

    #[test]
    fn tokens_get_distinct_ids() {
        let scheduler = TaskScheduler::new(0).unwrap();
        let a = scheduler.create_producer();
        let b = scheduler.create_producer();
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn enqueue_after_drop_fails() {
        let scheduler = TaskScheduler::new(1).unwrap();
        let token = scheduler.create_producer();
        drop(scheduler);
        assert!(token.enqueue(Box::new(|| {})).is_err());
    }
}
