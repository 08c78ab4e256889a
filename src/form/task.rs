use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};

use pin_project::pin_project;

/// Shared cancel flag for a [`CancelableTask`].
///
/// Canceling never interrupts the underlying future; the task keeps running and
/// its output is dropped once it settles.
#[derive(Clone, Debug, Default)]
pub struct CancelHandle {
    canceled: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` only for the call that actually flipped the flag.
    pub fn cancel(&self) -> bool {
        !self.canceled.swap(true, Ordering::SeqCst)
    }

    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::SeqCst)
    }

    pub fn same_task(&self, other: &CancelHandle) -> bool {
        Arc::ptr_eq(&self.canceled, &other.canceled)
    }
}

#[pin_project]
#[must_use = "a cancelable task does nothing unless polled"]
pub struct CancelableTask<Fut> {
    #[pin]
    inner: Fut,
    handle: CancelHandle,
}

impl<Fut> CancelableTask<Fut>
where
    Fut: Future,
{
    pub fn start<F>(factory: F) -> (Self, CancelHandle)
    where
        F: FnOnce() -> Fut,
    {
        let handle = CancelHandle::new();
        let task = Self {
            inner: factory(),
            handle: handle.clone(),
        };
        (task, handle)
    }

    pub fn handle(&self) -> &CancelHandle {
        &self.handle
    }
}

impl<Fut> Future for CancelableTask<Fut>
where
    Fut: Future,
{
    type Output = Option<Fut::Output>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        match this.inner.poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(output) => Poll::Ready((!this.handle.is_canceled()).then_some(output)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::channel::oneshot;
    use futures::executor::block_on;

    #[test]
    fn completes_normally_without_cancel() {
        let (task, handle) = CancelableTask::start(|| async { 7 });
        assert!(!handle.is_canceled());
        assert_eq!(block_on(task), Some(7));
    }

    #[test]
    fn cancel_before_completion_drops_the_output() {
        let (sender, receiver) = oneshot::channel::<u32>();
        let (task, handle) = CancelableTask::start(move || receiver);
        assert!(handle.cancel());
        assert!(!handle.cancel());
        sender.send(3).expect("receiver is alive");
        assert_eq!(block_on(task), None);
    }

    #[test]
    fn cancel_drops_failures_too() {
        let (task, handle) = CancelableTask::start(|| async { Err::<(), &str>("boom") });
        handle.cancel();
        assert_eq!(block_on(task), None);
    }

    #[test]
    fn handles_identify_their_task() {
        let (task, handle) = CancelableTask::start(|| async {});
        let (_, other) = CancelableTask::start(|| async {});
        assert!(task.handle().same_task(&handle));
        assert!(!handle.same_task(&other));
    }
}
