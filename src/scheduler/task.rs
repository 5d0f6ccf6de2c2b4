//! Awaitable handle for a queued browser task

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::oneshot;

use crate::error::{ScrapeError, ScrapeResult};

/// A pending unit of browser work
///
/// Wraps the worker's reply channel and implements `Future`, so callers
/// simply `.await` it. A dropped reply means the worker is gone.
pub struct QueuedTask<T> {
    receiver: oneshot::Receiver<ScrapeResult<T>>,
}

impl<T> QueuedTask<T> {
    #[must_use]
    pub(crate) fn new(receiver: oneshot::Receiver<ScrapeResult<T>>) -> Self {
        Self { receiver }
    }
}

impl<T> Future for QueuedTask<T> {
    type Output = ScrapeResult<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.receiver).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(ScrapeError::SchedulerClosed)),
            Poll::Pending => Poll::Pending,
        }
    }
}
