//! Future-like results for operations run on an execution context.
//!
//! An [`AsyncResult`] can be awaited from async code or waited on from a
//! plain thread. The matching [`Completer`] fills it; dropping the completer
//! unfilled resolves the result with [`CoordError::Cancelled`].

use parking_lot::{Condvar, Mutex};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::time::Duration;

use crate::error::{CoordError, Result};

struct Slot<T> {
    value: Option<Result<T>>,
    waker: Option<Waker>,
}

struct Shared<T> {
    slot: Mutex<Slot<T>>,
    ready: Condvar,
}

impl<T> Shared<T> {
    fn fill(&self, value: Result<T>) {
        let waker = {
            let mut slot = self.slot.lock();
            slot.value = Some(value);
            slot.waker.take()
        };
        self.ready.notify_all();
        if let Some(waker) = waker {
            waker.wake();
        }
    }
}

/// Consumer side of a pending operation.
pub struct AsyncResult<T> {
    shared: Arc<Shared<T>>,
}

/// Producer side of a pending operation.
pub struct Completer<T> {
    shared: Option<Arc<Shared<T>>>,
}

impl<T> AsyncResult<T> {
    /// Create a linked completer/result pair.
    pub fn pair() -> (Completer<T>, AsyncResult<T>) {
        let shared = Arc::new(Shared {
            slot: Mutex::new(Slot {
                value: None,
                waker: None,
            }),
            ready: Condvar::new(),
        });
        (
            Completer {
                shared: Some(shared.clone()),
            },
            AsyncResult { shared },
        )
    }

    /// A result that is already resolved.
    pub fn ready(value: Result<T>) -> Self {
        let (completer, result) = Self::pair();
        completer.complete(value);
        result
    }

    /// Whether the value is available without waiting.
    pub fn is_ready(&self) -> bool {
        self.shared.slot.lock().value.is_some()
    }

    /// Block the calling thread until the result is available.
    pub fn wait(self) -> Result<T> {
        let mut slot = self.shared.slot.lock();
        loop {
            if let Some(value) = slot.value.take() {
                return value;
            }
            self.shared.ready.wait(&mut slot);
        }
    }

    /// Block for at most `timeout`. Returns `None` if the result is still
    /// pending, in which case it can be waited on again.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<T>> {
        let mut slot = self.shared.slot.lock();
        if slot.value.is_none() {
            let _ = self
                .shared
                .ready
                .wait_while_for(&mut slot, |s| s.value.is_none(), timeout);
        }
        slot.value.take()
    }
}

impl<T> Future for AsyncResult<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut slot = self.shared.slot.lock();
        match slot.value.take() {
            Some(value) => Poll::Ready(value),
            None => {
                slot.waker = Some(cx.waker().clone());
                Poll::Pending
            }
        }
    }
}

impl<T> Completer<T> {
    /// Resolve with a successful value.
    pub fn set(self, value: T) {
        self.complete(Ok(value));
    }

    /// Resolve with an error.
    pub fn set_exception(self, err: CoordError) {
        self.complete(Err(err));
    }

    /// Resolve with an operation's outcome.
    pub fn complete(mut self, value: Result<T>) {
        if let Some(shared) = self.shared.take() {
            shared.fill(value);
        }
    }
}

impl<T> Drop for Completer<T> {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.take() {
            shared.fill(Err(CoordError::Cancelled));
        }
    }
}
