//! Priority task executor
//!
//! A fixed set of workers draining a shared priority queue. Used to keep
//! slow work such as SMTP delivery off the request path.
//!
//! Ordering:
//! - `High` tasks are always dequeued before `Low` tasks
//! - Within one priority, tasks run in submission order

use futures::future::BoxFuture;
use futures::FutureExt;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    Low,
    High,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecutorError {
    #[error("executor has been shut down")]
    ShutDown,
}

/// Queued task with its ordering key
struct Job {
    priority: Priority,
    sequence: u64,
    task: BoxFuture<'static, ()>,
}

impl Eq for Job {}

impl PartialEq for Job {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.sequence == other.sequence
    }
}

impl Ord for Job {
    fn cmp(&self, other: &Self) -> Ordering {
        // Higher priority first, then lower sequence (FIFO)
        match self.priority.cmp(&other.priority) {
            Ordering::Equal => other.sequence.cmp(&self.sequence),
            ord => ord,
        }
    }
}

impl PartialOrd for Job {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunState {
    Running,
    Draining,
    Killed,
}

struct Queue {
    jobs: BinaryHeap<Job>,
    next_sequence: u64,
    state: RunState,
}

enum Next {
    Run(Job),
    Wait,
    Exit,
}

struct Shared {
    queue: Mutex<Queue>,
    available: Notify,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Queue> {
        // Tasks never run while the lock is held, so poisoning cannot
        // leave the heap half-updated.
        self.queue.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn next(&self) -> Next {
        let mut queue = self.lock();
        match queue.state {
            RunState::Killed => Next::Exit,
            RunState::Running => queue.jobs.pop().map_or(Next::Wait, Next::Run),
            RunState::Draining => queue.jobs.pop().map_or(Next::Exit, Next::Run),
        }
    }
}

pub struct PriorityExecutor {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl PriorityExecutor {
    /// Start `workers` workers (at least one) on the current runtime.
    pub fn new(workers: usize) -> Self {
        let workers = workers.max(1);
        let shared = Arc::new(Shared {
            queue: Mutex::new(Queue {
                jobs: BinaryHeap::new(),
                next_sequence: 0,
                state: RunState::Running,
            }),
            available: Notify::new(),
        });

        let handles = (0..workers)
            .map(|id| tokio::spawn(worker_loop(id, Arc::clone(&shared))))
            .collect();

        info!("Priority executor started with {} workers", workers);

        Self {
            shared,
            workers: Mutex::new(handles),
        }
    }

    /// Queue a task. Never blocks.
    pub fn submit<F>(&self, priority: Priority, task: F) -> Result<(), ExecutorError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        {
            let mut queue = self.shared.lock();
            if queue.state != RunState::Running {
                return Err(ExecutorError::ShutDown);
            }

            let sequence = queue.next_sequence;
            queue.next_sequence += 1;
            queue.jobs.push(Job {
                priority,
                sequence,
                task: task.boxed(),
            });
            debug!(?priority, sequence, queued = queue.jobs.len(), "Task queued");
        }

        self.shared.available.notify_one();
        Ok(())
    }

    /// Number of tasks waiting for a worker.
    pub fn queued(&self) -> usize {
        self.shared.lock().jobs.len()
    }

    pub fn is_running(&self) -> bool {
        self.shared.lock().state == RunState::Running
    }

    /// Stop accepting tasks and wait until every queued task has run.
    pub async fn shutdown(&self) {
        {
            let mut queue = self.shared.lock();
            if queue.state == RunState::Running {
                queue.state = RunState::Draining;
            }
            info!("Executor shutting down, draining {} queued tasks", queue.jobs.len());
        }
        self.shared.available.notify_waiters();
        self.join_workers().await;
    }

    /// Stop accepting tasks, drop the queue and cancel running tasks.
    /// Returns the number of abandoned queued tasks.
    pub async fn kill(&self) -> usize {
        let abandoned = {
            let mut queue = self.shared.lock();
            queue.state = RunState::Killed;
            let abandoned = queue.jobs.len();
            queue.jobs.clear();
            abandoned
        };

        for handle in self.take_workers() {
            handle.abort();
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    error!("Executor worker failed: {}", e);
                }
            }
        }

        warn!("Executor killed, {} queued tasks abandoned", abandoned);
        abandoned
    }

    async fn join_workers(&self) {
        for handle in self.take_workers() {
            if let Err(e) = handle.await {
                error!("Executor worker failed: {}", e);
            }
        }
    }

    fn take_workers(&self) -> Vec<JoinHandle<()>> {
        let mut workers = self
            .workers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        std::mem::take(&mut *workers)
    }
}

impl Drop for PriorityExecutor {
    fn drop(&mut self) {
        for handle in self.take_workers() {
            handle.abort();
        }
    }
}

async fn worker_loop(id: usize, shared: Arc<Shared>) {
    debug!(worker = id, "Executor worker started");
    loop {
        let job = match shared.next() {
            Next::Run(job) => job,
            Next::Exit => break,
            Next::Wait => {
                // Only an idle worker waits on the queue. Interest is
                // registered before the second look so a submit racing
                // with it is not missed.
                let notified = shared.available.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();

                match shared.next() {
                    Next::Run(job) => job,
                    Next::Exit => break,
                    Next::Wait => {
                        notified.await;
                        continue;
                    }
                }
            }
        };

        if AssertUnwindSafe(job.task).catch_unwind().await.is_err() {
            error!(worker = id, priority = ?job.priority, "Executor task panicked");
        }
    }
    debug!(worker = id, "Executor worker stopped");
}
