//! Latching async auto-reset signal
//!
//! [`ResetSignal`] is the handoff primitive between a blocking inference
//! worker and the async consumer of its segments. It behaves like an
//! auto-reset event: a [`set`](ResetSignal::set) with nobody waiting latches
//! until the next wait; a set while a waiter is parked resolves exactly that
//! one wait. Waits consume the signal. The primitive is single-consumer:
//! registering a new waiter replaces any previous one.

use std::task::{Context, Poll, Waker};

use parking_lot::Mutex;

#[derive(Default)]
struct Inner {
    signaled: bool,
    waker: Option<Waker>,
}

#[derive(Default)]
pub struct ResetSignal {
    inner: Mutex<Inner>,
}

impl ResetSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal once. Safe from any thread, including native callback frames.
    pub fn set(&self) {
        let waker = {
            let mut inner = self.inner.lock();
            inner.signaled = true;
            inner.waker.take()
        };
        // Wake outside the lock.
        if let Some(waker) = waker {
            waker.wake();
        }
    }

    /// Poll for a pending signal, consuming it when present. Registers (or
    /// replaces) the waiter's waker otherwise.
    pub fn poll_wait(&self, cx: &mut Context<'_>) -> Poll<()> {
        let mut inner = self.inner.lock();
        if inner.signaled {
            inner.signaled = false;
            inner.waker = None;
            Poll::Ready(())
        } else {
            inner.waker = Some(cx.waker().clone());
            Poll::Pending
        }
    }

    /// Wait until the next signal, consuming it.
    pub async fn wait(&self) {
        futures::future::poll_fn(|cx| self.poll_wait(cx)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::task::noop_waker;

    fn noop_cx() -> Context<'static> {
        // Leaking one waker per test keeps the Context lifetime simple.
        let waker = Box::leak(Box::new(noop_waker()));
        Context::from_waker(waker)
    }

    #[test]
    fn set_before_wait_latches() {
        let signal = ResetSignal::new();
        signal.set();
        assert!(signal.poll_wait(&mut noop_cx()).is_ready());
    }

    #[test]
    fn wait_consumes_the_signal() {
        let signal = ResetSignal::new();
        signal.set();
        let mut cx = noop_cx();
        assert!(signal.poll_wait(&mut cx).is_ready());
        assert!(signal.poll_wait(&mut cx).is_pending());
    }

    #[test]
    fn repeated_sets_collapse_into_one() {
        let signal = ResetSignal::new();
        signal.set();
        signal.set();
        signal.set();
        let mut cx = noop_cx();
        assert!(signal.poll_wait(&mut cx).is_ready());
        assert!(signal.poll_wait(&mut cx).is_pending());
    }

    #[test]
    fn set_resolves_a_parked_waiter() {
        let signal = ResetSignal::new();
        let mut cx = noop_cx();
        assert!(signal.poll_wait(&mut cx).is_pending());
        signal.set();
        assert!(signal.poll_wait(&mut cx).is_ready());
    }

    #[tokio::test]
    async fn wait_wakes_across_tasks() {
        use std::sync::Arc;

        let signal = Arc::new(ResetSignal::new());
        let waiter = {
            let signal = signal.clone();
            tokio::spawn(async move { signal.wait().await })
        };
        tokio::task::yield_now().await;
        signal.set();
        waiter.await.unwrap();
    }
}
