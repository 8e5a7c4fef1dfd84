use std::future::Future;
use std::pin::Pin;
use std::sync::mpsc;
use std::task::{Context, Poll};

/// Handle to a job running on a [`TaskPool`](super::TaskPool).
///
/// The result is delivered through a channel, so the handle can be polled
/// from a loop with [`try_recv`](Self::try_recv) without blocking, or awaited
/// with a noop waker.
///
/// # Example
///
/// ```ignore
/// let handle = pool.spawn(move || PrecomputedKeyframes::compute(&anim, &skeleton, 30.0));
///
/// // Later, on the polling thread:
/// if let Some(result) = handle.try_recv() {
///     merge(result);
/// }
/// ```
pub struct TaskHandle<T> {
    receiver: mpsc::Receiver<T>,
    finished: bool,
}

impl<T> TaskHandle<T> {
    /// Wraps the receiving end of a result channel.
    pub fn new(receiver: mpsc::Receiver<T>) -> Self {
        Self {
            receiver,
            finished: false,
        }
    }

    /// Takes the result if the task has completed.
    ///
    /// Returns `None` while the task is running. The value is consumed:
    /// subsequent calls return `None`.
    pub fn try_recv(&mut self) -> Option<T> {
        match self.receiver.try_recv() {
            Ok(value) => {
                self.finished = true;
                Some(value)
            }
            Err(mpsc::TryRecvError::Empty) => None,
            Err(mpsc::TryRecvError::Disconnected) => {
                self.finished = true;
                None
            }
        }
    }

    /// Whether the task produced its value or its worker went away.
    ///
    /// A handle whose task panicked reports `true` and never yields a value.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Blocks until the task completes.
    ///
    /// Returns `None` if the task was dropped without producing a value.
    pub fn recv(self) -> Option<T> {
        self.receiver.recv().ok()
    }
}

impl<T> Future for TaskHandle<T> {
    type Output = Option<T>;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Option<T>> {
        match self.receiver.try_recv() {
            Ok(val) => Poll::Ready(Some(val)),
            Err(mpsc::TryRecvError::Empty) => Poll::Pending,
            Err(mpsc::TryRecvError::Disconnected) => Poll::Ready(None),
        }
    }
}
