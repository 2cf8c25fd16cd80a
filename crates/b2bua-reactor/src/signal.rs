use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use b2bua_types::SignalSlotId;
use signal_hook::consts::signal::*;
use signal_hook::flag;
use signal_hook::low_level::{self, SigId};

use crate::error::ReactorError;

/// Async-signal-safe side of signal delivery: a flag per registered
/// signal number that the OS handler may only set, never clear or
/// otherwise act on. `SignalBridge` polls these flags from ordinary
/// (non-handler) code on the owner thread.
///
/// Built on `signal-hook` rather than hand-rolled `sigaction` FFI — the
/// crate already guarantees the handler body only performs
/// async-signal-safe operations.
pub struct SignalBridge {
    flags: HashMap<i32, (Arc<AtomicBool>, SigId)>,
}

impl SignalBridge {
    pub fn new() -> Self {
        Self {
            flags: HashMap::new(),
        }
    }

    /// Arm a flag for `signum`. Calling this twice for the same signal is
    /// a no-op; `SignalService` fans one flag out to many subscribers.
    pub fn arm(&mut self, signum: i32) -> Result<(), ReactorError> {
        if self.flags.contains_key(&signum) {
            return Ok(());
        }
        let flag = Arc::new(AtomicBool::new(false));
        let sig_id =
            flag::register(signum, flag.clone()).map_err(|source| ReactorError::SignalInstall {
                signum,
                source,
            })?;
        self.flags.insert(signum, (flag, sig_id));
        Ok(())
    }

    /// Tear down the handler for `signum` and restore the OS default
    /// disposition. Called once the last subscriber for that signal
    /// unregisters; a no-op if `signum` was never armed.
    pub fn disarm(&mut self, signum: i32) {
        if let Some((_, sig_id)) = self.flags.remove(&signum) {
            low_level::unregister(sig_id);
        }
    }

    /// Drain pending signals, returning every signal number observed set
    /// since the last poll (each one cleared as it's read).
    pub fn poll(&self) -> Vec<i32> {
        let mut pending = Vec::new();
        for (&signum, (flag, _)) in &self.flags {
            if flag.swap(false, Ordering::SeqCst) {
                pending.push(signum);
            }
        }
        pending
    }
}

impl Default for SignalBridge {
    fn default() -> Self {
        Self::new()
    }
}

type SignalCallback = Box<dyn FnMut(i32)>;

struct Subscriber {
    signum: i32,
    callback: SignalCallback,
}

/// Fan-out registry on top of `SignalBridge`: multiple subscribers can
/// listen for the same signal number, mirroring the original's
/// `slisteners` list and its handler-chaining behavior (a later
/// registration does not clobber an earlier one; both fire).
pub struct SignalService {
    bridge: Rc<RefCell<SignalBridge>>,
    subscribers: Rc<RefCell<HashMap<SignalSlotId, Subscriber>>>,
}

impl SignalService {
    pub fn new(bridge: Rc<RefCell<SignalBridge>>) -> Self {
        Self {
            bridge,
            subscribers: Rc::new(RefCell::new(HashMap::new())),
        }
    }

    pub fn register(
        &self,
        signum: i32,
        callback: impl FnMut(i32) + 'static,
    ) -> Result<SignalSlotId, ReactorError> {
        self.bridge.borrow_mut().arm(signum)?;
        let id = SignalSlotId::new();
        self.subscribers.borrow_mut().insert(
            id,
            Subscriber {
                signum,
                callback: Box::new(callback),
            },
        );
        Ok(id)
    }

    /// Drop a subscriber. Once the last subscriber for its signal number
    /// is gone, the OS handler is torn down and the default disposition
    /// restored — a later `register` for that signal arms it afresh.
    pub fn unregister(&self, id: SignalSlotId) {
        let signum = match self.subscribers.borrow_mut().remove(&id) {
            Some(sub) => sub.signum,
            None => return,
        };
        let still_armed = self
            .subscribers
            .borrow()
            .values()
            .any(|s| s.signum == signum);
        if !still_armed {
            self.bridge.borrow_mut().disarm(signum);
        }
    }

    /// Dispatch every pending signal to every subscriber registered for
    /// it, in registration order. Called from the dispatcher's owner
    /// thread only, never from a signal handler.
    pub fn dispatch_pending(&self) {
        let pending = self.bridge.borrow().poll();
        if pending.is_empty() {
            return;
        }
        for signum in pending {
            let ids: Vec<SignalSlotId> = self
                .subscribers
                .borrow()
                .iter()
                .filter(|(_, s)| s.signum == signum)
                .map(|(id, _)| *id)
                .collect();
            for id in ids {
                // Re-borrow per-subscriber so a callback that unregisters
                // another subscriber (or itself, via a later dispatch)
                // doesn't deadlock on the RefCell.
                let mut subs = self.subscribers.borrow_mut();
                if let Some(sub) = subs.get_mut(&id) {
                    let cb = &mut sub.callback;
                    cb(signum);
                }
            }
        }
    }
}

/// Common signal numbers named in the call-map lifecycle contract, kept
/// here so callers don't need a direct `libc` dependency.
pub mod signums {
    pub use signal_hook::consts::signal::{SIGHUP, SIGPROF, SIGTERM, SIGUSR1, SIGUSR2};
}
