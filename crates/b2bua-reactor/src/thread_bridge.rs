use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};

use crate::error::ReactorError;
use crate::pacer::Notifier;

/// A closure submitted from a foreign thread, to be run on the
/// dispatcher's owner thread. Boxed as `FnOnce` since each submission
/// runs exactly once (mirrors `callFromThread`'s `dispatchThreadCallback`).
type ThreadCallback = Box<dyn FnOnce() + Send>;

/// The sending half, cloneable and `Send`, handed out to worker threads
/// (RADIUS client callbacks, RTP proxy notification listeners, ...) so
/// they can safely call back into the single-threaded call-control layer.
///
/// Bounded rather than unbounded: a producer that floods the reactor
/// faster than it can drain should block or fail, not grow memory
/// without limit. `spec.md`'s own redesign note calls for exactly this
/// shape.
#[derive(Clone)]
pub struct ThreadBridgeHandle {
    tx: Sender<ThreadCallback>,
    notifier: Option<Notifier>,
}

impl ThreadBridgeHandle {
    /// Enqueue a callback to run on the owner thread. Returns an error
    /// rather than blocking the foreign thread if the queue is full or
    /// the dispatcher has shut down — a foreign thread blocking
    /// indefinitely on a dead reactor is worse than a dropped callback.
    ///
    /// If the bridge was built with a [`Notifier`] (the normal case, when
    /// it's wired into a `Dispatcher`), a sleeping dispatcher is woken
    /// immediately rather than waiting out its current tick.
    pub fn call_from_thread(
        &self,
        callback: impl FnOnce() + Send + 'static,
    ) -> Result<(), ReactorError> {
        match self.tx.try_send(Box::new(callback)) {
            Ok(()) => {
                if let Some(notifier) = &self.notifier {
                    notifier.notify();
                }
                Ok(())
            }
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                Err(ReactorError::BridgeDisconnected)
            }
        }
    }
}

/// Owner-thread side: drains queued callbacks and runs them in arrival
/// order. A callback that panics is caught and logged by the dispatcher
/// rather than poisoning the bridge (see `Dispatcher::run`).
pub struct ThreadBridge {
    rx: Receiver<ThreadCallback>,
    tx: Sender<ThreadCallback>,
    notifier: Option<Notifier>,
}

impl ThreadBridge {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = bounded(capacity);
        Self {
            rx,
            tx,
            notifier: None,
        }
    }

    pub fn with_notifier(capacity: usize, notifier: Notifier) -> Self {
        let (tx, rx) = bounded(capacity);
        Self {
            rx,
            tx,
            notifier: Some(notifier),
        }
    }

    pub fn handle(&self) -> ThreadBridgeHandle {
        ThreadBridgeHandle {
            tx: self.tx.clone(),
            notifier: self.notifier.clone(),
        }
    }

    pub fn receiver(&self) -> &Receiver<ThreadCallback> {
        &self.rx
    }

    /// Run every callback currently queued, without blocking for more.
    pub fn drain(&self) -> Vec<ThreadCallback> {
        let mut out = Vec::new();
        while let Ok(cb) = self.rx.try_recv() {
            out.push(cb);
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn submitted_callbacks_drain_in_order() {
        let bridge = ThreadBridge::new(8);
        let handle = bridge.handle();
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        for i in 0..3 {
            let order = order.clone();
            handle
                .call_from_thread(move || order.lock().unwrap().push(i))
                .unwrap();
        }
        for cb in bridge.drain() {
            cb();
        }
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn full_queue_reports_bridge_disconnected_rather_than_blocking() {
        let bridge = ThreadBridge::new(1);
        let handle = bridge.handle();
        handle.call_from_thread(|| {}).unwrap();
        let err = handle.call_from_thread(|| {}).unwrap_err();
        assert!(matches!(err, ReactorError::BridgeDisconnected));
    }

    #[test]
    fn drain_with_nothing_queued_returns_empty() {
        let bridge = ThreadBridge::new(8);
        assert!(bridge.drain().is_empty());
    }

    #[test]
    fn cross_thread_submission_is_observed_by_owner_thread() {
        let bridge = ThreadBridge::new(8);
        let handle = bridge.handle();
        let counter = Arc::new(AtomicUsize::new(0));
        let c = counter.clone();
        let worker = std::thread::spawn(move || {
            handle
                .call_from_thread(move || {
                    c.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap();
        });
        worker.join().unwrap();
        for cb in bridge.drain() {
            cb();
        }
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
