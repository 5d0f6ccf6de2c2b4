//! Bounded Task Scheduler
//!
//! All browser-bound work funnels through one worker task reading from an
//! unbounded channel, so at most one session is open at any instant and
//! tasks run in submission order. A task that fails or panics settles its
//! own handle and the worker moves on.

mod task;

pub use task::QueuedTask;

use futures::FutureExt;
use serde::Serialize;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{Notify, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::error::ScrapeError;

type Job = Pin<Box<dyn Future<Output = ()> + Send>>;

struct Envelope {
    label: String,
    job: Job,
}

#[derive(Debug, Default)]
struct QueueState {
    queued: AtomicUsize,
    running: AtomicBool,
    completed: AtomicU64,
    panicked: AtomicU64,
    idle: Notify,
}

impl QueueState {
    fn is_idle(&self) -> bool {
        self.queued.load(Ordering::SeqCst) == 0 && !self.running.load(Ordering::SeqCst)
    }
}

/// Point-in-time view of the queue for `/status`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueSnapshot {
    pub queued: usize,
    pub running: bool,
    pub completed: u64,
    pub panicked: u64,
}

/// Single-flight queue for browser work
#[derive(Clone)]
pub struct BrowserQueue {
    sender: mpsc::UnboundedSender<Envelope>,
    state: Arc<QueueState>,
}

impl std::fmt::Debug for BrowserQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrowserQueue")
            .field("snapshot", &self.snapshot())
            .finish()
    }
}

impl BrowserQueue {
    /// Spawn the worker and return the queue handle
    ///
    /// The worker stops once every handle is dropped.
    #[must_use]
    pub fn start() -> (Self, JoinHandle<()>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let state = Arc::new(QueueState::default());
        let worker = tokio::spawn(run_worker(receiver, Arc::clone(&state)));
        (Self { sender, state }, worker)
    }

    /// Append `work` to the queue
    ///
    /// The returned handle resolves with the task's output, with
    /// `TaskPanicked` if it panicked, or with `SchedulerClosed` if the
    /// worker is gone.
    pub fn submit<F, T>(&self, label: impl Into<String>, work: F) -> QueuedTask<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let label = label.into();
        let (reply, receiver) = oneshot::channel();
        let task_label = label.clone();
        let state = Arc::clone(&self.state);

        let job: Job = Box::pin(async move {
            let outcome = AssertUnwindSafe(work).catch_unwind().await;
            let result = outcome.map_err(|panic| {
                let detail = panic
                    .downcast_ref::<&str>()
                    .map(|s| (*s).to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_default();
                error!(task = %task_label, %detail, "Queued task panicked");
                state.panicked.fetch_add(1, Ordering::SeqCst);
                ScrapeError::TaskPanicked(task_label.clone())
            });
            // the submitter may have stopped waiting
            let _ = reply.send(result);
        });

        self.state.queued.fetch_add(1, Ordering::SeqCst);
        if self.sender.send(Envelope { label, job }).is_err() {
            self.state.queued.fetch_sub(1, Ordering::SeqCst);
            // receiver is dropped with the envelope, so the handle reports SchedulerClosed
        }
        QueuedTask::new(receiver)
    }

    #[must_use]
    pub fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            queued: self.state.queued.load(Ordering::SeqCst),
            running: self.state.running.load(Ordering::SeqCst),
            completed: self.state.completed.load(Ordering::SeqCst),
            panicked: self.state.panicked.load(Ordering::SeqCst),
        }
    }

    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.state.is_idle()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    /// Wait until nothing is queued or running
    ///
    /// Returns `false` if `timeout` elapsed first.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.state.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.state.is_idle() {
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.state.is_idle();
            }
        }
    }
}

async fn run_worker(mut receiver: mpsc::UnboundedReceiver<Envelope>, state: Arc<QueueState>) {
    info!("Browser queue worker started");
    while let Some(Envelope { label, job }) = receiver.recv().await {
        // mark running before dequeuing so the queue never looks idle in between
        state.running.store(true, Ordering::SeqCst);
        state.queued.fetch_sub(1, Ordering::SeqCst);
        debug!(task = %label, "Browser task started");

        job.await;

        state.completed.fetch_add(1, Ordering::SeqCst);
        state.running.store(false, Ordering::SeqCst);
        debug!(task = %label, "Browser task settled");
        if state.is_idle() {
            state.idle.notify_waiters();
        }
    }
    info!("Browser queue worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_tasks_run_in_submission_order() {
        let (queue, _worker) = BrowserQueue::start();
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let handles: Vec<_> = (0..5)
            .map(|i| {
                let order = Arc::clone(&order);
                queue.submit(format!("task-{i}"), async move {
                    tokio::time::sleep(Duration::from_millis(5 * (5 - i))).await;
                    order.lock().push(i);
                    i
                })
            })
            .collect();

        for (i, handle) in handles.into_iter().enumerate() {
            assert_eq!(handle.await.unwrap(), i as u64);
        }
        assert_eq!(*order.lock(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_panic_does_not_stall_queue() {
        let (queue, _worker) = BrowserQueue::start();
        let bad = queue.submit("bad", async {
            panic!("boom");
        });
        let good = queue.submit("good", async { 7 });

        let err: Result<(), _> = bad.await;
        assert!(matches!(err, Err(ScrapeError::TaskPanicked(label)) if label == "bad"));
        assert_eq!(good.await.unwrap(), 7);
        assert!(queue.wait_idle(Duration::from_secs(1)).await);
        let snapshot = queue.snapshot();
        assert_eq!(snapshot.completed, 2);
        assert_eq!(snapshot.panicked, 1);
    }

    #[tokio::test]
    async fn test_dead_worker_reports_closed() {
        let (queue, worker) = BrowserQueue::start();
        worker.abort();
        let _ = worker.await;
        let result = queue.submit("late", async { 1 }).await;
        assert!(matches!(result, Err(ScrapeError::SchedulerClosed)));
    }

    #[tokio::test]
    async fn test_wait_idle() {
        let (queue, _worker) = BrowserQueue::start();
        let handle = queue.submit("slow", async {
            tokio::time::sleep(Duration::from_millis(50)).await;
        });
        assert!(!queue.wait_idle(Duration::from_millis(5)).await);
        assert!(queue.wait_idle(Duration::from_secs(2)).await);
        handle.await.unwrap();
        assert!(queue.is_idle());
    }
}
