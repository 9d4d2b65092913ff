//! Simple cancellation token implementation.
//!
//! An attach operation only ever needs one flat cancellation event: abort
//! the current wait. Nested tokens or hierarchies would be overkill, so in
//! order to avoid any extra dependency, here is a very simple
//! implementation.
//!
//! Cancellation is checked between polling intervals while waiting for the
//! HotSpot socket to appear. Once SIGQUIT has been sent it cannot be
//! rescinded; cancelling only stops the client from waiting.

use std::{
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    task::{Context, Poll, Waker},
};

struct Shared {
    cancelled: AtomicBool,
    wakers: Mutex<Vec<Waker>>,
}

/// The cancellation token.
///
/// Clone it to listen to the same cancellation event.
#[derive(Clone)]
pub struct CancellationToken {
    shared: Arc<Shared>,
}

impl CancellationToken {
    /// Creates a new cancellation token.
    pub fn new() -> Self {
        CancellationToken {
            shared: Arc::new(Shared {
                cancelled: AtomicBool::new(false),
                wakers: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Signals cancellation and wakes up all the waiters.
    pub fn cancel(&self) {
        // The flag must be visible before any waiter runs.
        self.shared.cancelled.store(true, Ordering::SeqCst);

        for waker in self.shared.wakers.lock().unwrap().drain(..) {
            waker.wake();
        }
    }

    /// Checks the cancellation status synchronously.
    pub fn is_cancelled(&self) -> bool {
        self.shared.cancelled.load(Ordering::SeqCst)
    }

    /// Returns a future that completes when cancellation is requested.
    pub fn cancelled(&self) -> impl Future<Output = ()> + Send + 'static {
        Cancelled {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

struct Cancelled {
    shared: Arc<Shared>,
}

impl Future for Cancelled {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.shared.cancelled.load(Ordering::SeqCst) {
            return Poll::Ready(());
        }

        let mut wakers = self.shared.wakers.lock().unwrap();

        // Re-check under the lock: a cancel may have drained the list
        // between the flag read and the lock acquisition.
        if self.shared.cancelled.load(Ordering::SeqCst) {
            return Poll::Ready(());
        }

        let current = cx.waker();
        if !wakers.iter().any(|waker| current.will_wake(waker)) {
            wakers.push(current.clone());
        }

        Poll::Pending
    }
}

#[cfg(test)]
mod tests {
    use futures::executor::block_on;

    use super::*;

    #[test]
    fn test_cancel_wakes_waiter() {
        let token = CancellationToken::new();
        let waiter = token.clone();

        let th1 = std::thread::spawn(move || {
            block_on(async {
                waiter.cancelled().await;
            });
        });

        let th2 = std::thread::spawn(move || {
            token.cancel();
        });

        th1.join().unwrap();
        th2.join().unwrap();
    }

    #[test]
    fn test_is_cancelled() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
        token.cancel();
        assert!(token.is_cancelled());
        // A future created after cancellation completes immediately.
        block_on(token.cancelled());
    }
}
