//! Single-settlement completion slot
//!
//! Several independent triggers (a native callback thread, a timer, a
//! cancellation token) race to finish one operation. The first
//! `try_settle` wins the compare-and-set and stores its value; every later
//! attempt returns false and changes nothing.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;

pub struct Settlement<T> {
    settled: AtomicBool,
    value: Mutex<Option<T>>,
    notify: Notify,
}

impl<T: Clone> Settlement<T> {
    pub fn new() -> Self {
        Self {
            settled: AtomicBool::new(false),
            value: Mutex::new(None),
            notify: Notify::new(),
        }
    }

    /// Attempt to settle. Returns true only for the first caller.
    /// Callable from any thread, including non-runtime threads.
    pub fn try_settle(&self, value: T) -> bool {
        if self
            .settled
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        *self.value.lock() = Some(value);
        self.notify.notify_waiters();
        true
    }

    pub fn is_settled(&self) -> bool {
        self.settled.load(Ordering::Acquire)
    }

    /// Settled value, if it is already stored
    pub fn peek(&self) -> Option<T> {
        self.value.lock().clone()
    }

    /// Wait for the settled value
    pub async fn wait(&self) -> T {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before checking so a settle in between is not missed
            notified.as_mut().enable();

            if let Some(value) = self.peek() {
                return value;
            }
            notified.await;
        }
    }
}

impl<T: Clone> Default for Settlement<T> {
    fn default() -> Self {
        Self::new()
    }
}
