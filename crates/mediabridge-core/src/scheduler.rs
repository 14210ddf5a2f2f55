//! UI-affine scheduling
//!
//! Property notifications never run on the thread that delivered the native
//! event. They are handed to a [`UiScheduler`], which runs them on whatever
//! context the UI layer requires. [`DispatchQueue`] is a ready-made scheduler
//! backed by one dedicated thread draining a FIFO queue, which preserves
//! submission order.

use crate::{CoreConfig, Error, Result};
use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc as std_mpsc;
use std::thread::{JoinHandle, ThreadId};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// A unit of work handed to the UI context
pub type UnitOfWork = Box<dyn FnOnce() + Send + 'static>;

/// Runs units of work on the UI-affine execution context.
///
/// Implementations must run work in submission order.
pub trait UiScheduler: Send + Sync {
    fn schedule(&self, work: UnitOfWork);
}

impl<F> UiScheduler for F
where
    F: Fn(UnitOfWork) + Send + Sync,
{
    fn schedule(&self, work: UnitOfWork) {
        self(work)
    }
}

/// Single-consumer queue drained by a dedicated named thread
pub struct DispatchQueue {
    tx: Mutex<Option<mpsc::UnboundedSender<UnitOfWork>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    thread_id: ThreadId,
    name: String,
}

impl DispatchQueue {
    /// Start the queue thread
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(Error::invalid_argument("dispatch thread name is empty"));
        }
        let (tx, mut rx) = mpsc::unbounded_channel::<UnitOfWork>();

        let worker = std::thread::Builder::new().name(name.clone()).spawn(move || {
            while let Some(work) = rx.blocking_recv() {
                if catch_unwind(AssertUnwindSafe(work)).is_err() {
                    warn!("Scheduled work panicked");
                }
            }
        })?;
        let thread_id = worker.thread().id();
        debug!(thread = %name, "Dispatch queue started");

        Ok(Self {
            tx: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(worker)),
            thread_id,
            name,
        })
    }

    /// Start a queue named after the configured dispatch thread
    pub fn from_config(config: &CoreConfig) -> Result<Self> {
        Self::new(config.dispatch_thread_name.clone())
    }

    /// Identity of the queue thread
    pub fn thread_id(&self) -> ThreadId {
        self.thread_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_queue_thread(&self) -> bool {
        std::thread::current().id() == self.thread_id
    }

    /// Block until everything scheduled so far has run. Returns false if
    /// the queue is shut down.
    pub fn flush(&self) -> bool {
        if self.is_queue_thread() {
            return true;
        }
        let (done_tx, done_rx) = std_mpsc::channel();
        let queued = match self.tx.lock().as_ref() {
            Some(tx) => tx
                .send(Box::new(move || {
                    let _ = done_tx.send(());
                }))
                .is_ok(),
            None => false,
        };
        queued && done_rx.recv().is_ok()
    }

    /// Stop accepting work, drain what is queued and join the thread.
    /// Idempotent.
    pub fn shutdown(&self) {
        self.tx.lock().take();
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            // Joining from the queue thread itself would never return
            if self.is_queue_thread() {
                return;
            }
            if worker.join().is_err() {
                warn!(thread = %self.name, "Dispatch queue thread panicked");
            }
            debug!(thread = %self.name, "Dispatch queue stopped");
        }
    }
}

impl UiScheduler for DispatchQueue {
    fn schedule(&self, work: UnitOfWork) {
        let sent = match self.tx.lock().as_ref() {
            Some(tx) => tx.send(work).is_ok(),
            None => false,
        };
        if !sent {
            debug!(thread = %self.name, "Work dropped, dispatch queue is shut down");
        }
    }
}

impl Drop for DispatchQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for DispatchQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchQueue")
            .field("name", &self.name)
            .field("thread_id", &self.thread_id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_runs_in_order_on_queue_thread() {
        let queue = DispatchQueue::new("test-ui").unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for i in 0..50 {
            let seen = seen.clone();
            queue.schedule(Box::new(move || {
                seen.lock().push((i, std::thread::current().id()));
            }));
        }
        assert!(queue.flush());

        let seen = seen.lock();
        assert_eq!(seen.len(), 50);
        assert!(seen.iter().enumerate().all(|(i, (n, _))| i == *n));
        assert!(seen.iter().all(|(_, id)| *id == queue.thread_id()));
        assert_ne!(queue.thread_id(), std::thread::current().id());
    }

    #[test]
    fn test_panicking_work_does_not_stop_queue() {
        let queue = DispatchQueue::new("test-ui").unwrap();
        let ran = Arc::new(Mutex::new(false));
        queue.schedule(Box::new(|| panic!("boom")));
        let flag = ran.clone();
        queue.schedule(Box::new(move || *flag.lock() = true));
        assert!(queue.flush());
        assert!(*ran.lock());
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let queue = DispatchQueue::new("test-ui").unwrap();
        queue.shutdown();
        queue.shutdown();
        assert!(!queue.flush());
        queue.schedule(Box::new(|| {}));
    }

    #[test]
    fn test_closure_scheduler() {
        let inline = |work: UnitOfWork| work();
        let hit = Arc::new(Mutex::new(0));
        let counter = hit.clone();
        inline.schedule(Box::new(move || *counter.lock() += 1));
        assert_eq!(*hit.lock(), 1);
    }

    #[test]
    fn test_empty_name_rejected() {
        assert!(matches!(DispatchQueue::new(""), Err(Error::InvalidArgument(_))));
    }
}
