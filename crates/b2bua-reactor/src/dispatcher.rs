use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::rc::Rc;
use std::time::Duration;

use b2bua_types::{BandId, MonoTime};
use tracing::{error, warn};

use crate::pacer::{PeriodicPacer, Wake};
use crate::signal::{SignalBridge, SignalService};
use crate::thread_bridge::ThreadBridge;
use crate::timer::{TimerHeap, TimerService};

/// Shared stop flag. `stop()` is the Rust analogue of `breakLoop()` —
/// settable from inside any callback running on the owner thread (a
/// signal handler's dispatched callback, a timer, a thread-bridge
/// submission), checked between every phase of the loop.
#[derive(Clone, Default)]
pub struct StopHandle(Rc<Cell<bool>>);

impl StopHandle {
    pub fn stop(&self) {
        self.0.set(true);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.get()
    }
}

/// Single-threaded cooperative reactor composing a timer heap, an
/// OS-signal bridge, and a cross-thread callback queue onto one owner
/// thread, per the original `EventDispatcher2.loop`.
///
/// Construction wires the thread bridge's wake-up through the pacer's
/// notifier so a cross-thread submission interrupts an idle sleep instead
/// of waiting out the current tick.
pub struct Dispatcher {
    timers: Rc<RefCell<TimerHeap>>,
    signals: SignalService,
    bridge: ThreadBridge,
    pacer: PeriodicPacer,
    /// Bands already registered with the pacer by frequency, so repeated
    /// `run(_, Some(hz))` calls for the same `hz` reuse one band instead
    /// of leaking a fresh one every call.
    known_bands: HashMap<u64, BandId>,
    stop: StopHandle,
    last_ts: MonoTime,
}

impl Dispatcher {
    pub fn new(default_freq_hz: f64, bridge_capacity: usize) -> Self {
        let pacer = PeriodicPacer::new(default_freq_hz);
        let bridge = ThreadBridge::with_notifier(bridge_capacity, pacer.notifier());
        let signal_bridge = Rc::new(RefCell::new(SignalBridge::new()));
        Self {
            timers: Rc::new(RefCell::new(TimerHeap::new())),
            signals: SignalService::new(signal_bridge),
            bridge,
            pacer,
            known_bands: HashMap::new(),
            stop: StopHandle::default(),
            last_ts: MonoTime::now(),
        }
    }

    pub fn timer_service(&self) -> TimerService {
        TimerService::new(self.timers.clone())
    }

    pub fn signal_service(&self) -> &SignalService {
        &self.signals
    }

    pub fn thread_bridge_handle(&self) -> crate::thread_bridge::ThreadBridgeHandle {
        self.bridge.handle()
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn pacer_mut(&mut self) -> &mut PeriodicPacer {
        &mut self.pacer
    }

    /// Run one full iteration: signals, then timers, then queued
    /// thread-bridge callbacks, in that order — matching
    /// `EventDispatcher2.loop`'s `dispatchSignals` → `dispatchTimers`
    /// ordering, with the thread bridge appended since it has no
    /// equivalent phase in the original (there it rides the same
    /// `elperiodic` primitive as the timer wheel).
    ///
    /// Returns `true` if the loop should keep running.
    fn run_once(&mut self) -> bool {
        self.signals.dispatch_pending();
        if self.stop.is_stopped() {
            return false;
        }
        self.last_ts = MonoTime::now();
        self.timers.borrow_mut().dispatch(self.last_ts);
        if self.stop.is_stopped() {
            return false;
        }
        for callback in self.bridge.drain() {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(callback)) {
                error!(?panic, "thread-bridge callback panicked, continuing");
            }
            if self.stop.is_stopped() {
                return false;
            }
        }
        true
    }

    /// Run until `stop_handle().stop()` is called, or `timeout` elapses
    /// (if given) — an elapsed-time deadline computed from `MonoTime`, not
    /// an absolute wall-clock target, so a system clock step never causes
    /// the loop to exit early or run forever.
    ///
    /// `freq`, if given and not already the active band, is registered
    /// (on first use for that frequency) and selected before the loop
    /// starts.
    pub fn run(&mut self, timeout: Option<Duration>, freq: Option<f64>) {
        if let Some(hz) = freq {
            let key = hz.to_bits();
            let band = match self.known_bands.get(&key) {
                Some(&id) => id,
                None => {
                    let id = self.pacer.add_band(hz);
                    self.known_bands.insert(key, id);
                    id
                }
            };
            if self.pacer.current_band() != band {
                self.pacer.use_band(band);
            }
        }
        self.stop.0.set(false);
        let start = MonoTime::now();
        let deadline = timeout.map(|t| start.offset_copy(t));
        loop {
            if !self.run_once() {
                return;
            }
            let now = MonoTime::now();
            if let Some(deadline) = deadline {
                if now >= deadline {
                    return;
                }
            }
            let next = self.timers.borrow().next_deadline();
            match self.pacer.procrastinate(next) {
                Wake::TimerExpired => {}
                Wake::Preempted => {
                    // A cross-thread submission or a programmatic wake
                    // arrived; loop back around immediately to service it.
                }
            }
            if self.stop.is_stopped() {
                return;
            }
        }
    }
}

/// Logs and swallows a callback error unless it's the fatal-exit
/// sentinel (`DomainError::CallbackError { fatal: true, .. }`), in which
/// case the dispatcher is told to stop. Centralizes the "log and
/// swallow, except..." policy so every call site doesn't repeat it.
pub fn handle_callback_error(stop: &StopHandle, err: &b2bua_types::DomainError) {
    warn!(error = %err, "unhandled exception when processing event");
    if err.is_fatal() {
        stop.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn run_stops_when_timeout_elapses_with_nothing_scheduled() {
        let mut d = Dispatcher::new(1000.0, 8);
        let started = MonoTime::now();
        d.run(Some(Duration::from_millis(20)), None);
        assert!(MonoTime::now().since(started) < Duration::from_secs(1));
    }

    #[test]
    fn timer_fires_during_run_loop() {
        let mut d = Dispatcher::new(1000.0, 8);
        let fired = Arc::new(AtomicUsize::new(0));
        let f = fired.clone();
        let svc = d.timer_service();
        svc.schedule_once(Duration::from_millis(5), move |_| {
            f.fetch_add(1, Ordering::SeqCst);
        });
        d.run(Some(Duration::from_millis(200)), None);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn stop_handle_breaks_the_loop_from_inside_a_timer_callback() {
        let mut d = Dispatcher::new(1000.0, 8);
        let stop = d.stop_handle();
        let svc = d.timer_service();
        svc.schedule_once(Duration::from_millis(1), move |_| stop.stop());
        let started = MonoTime::now();
        d.run(Some(Duration::from_secs(5)), None);
        assert!(MonoTime::now().since(started) < Duration::from_secs(1));
    }

    #[test]
    fn thread_bridge_submission_wakes_the_loop_promptly() {
        let mut d = Dispatcher::new(1.0, 8);
        let handle = d.thread_bridge_handle();
        let ran = Arc::new(AtomicUsize::new(0));
        let r = ran.clone();
        let worker = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            handle
                .call_from_thread(move || {
                    r.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap();
        });
        let started = MonoTime::now();
        d.run(Some(Duration::from_millis(500)), None);
        worker.join().unwrap();
        assert_eq!(ran.load(Ordering::SeqCst), 1);
        // With a 1Hz default band, an un-preempted sleep would take ~1s;
        // the submission should cut that short well under the timeout.
        assert!(MonoTime::now().since(started) < Duration::from_millis(900));
    }

    #[test]
    fn panicking_callback_does_not_abort_the_loop() {
        let mut d = Dispatcher::new(1000.0, 8);
        let handle = d.thread_bridge_handle();
        handle
            .call_from_thread(|| panic!("boom"))
            .unwrap();
        let ran = Arc::new(AtomicUsize::new(0));
        let r = ran.clone();
        handle
            .call_from_thread(move || {
                r.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        d.run(Some(Duration::from_millis(50)), None);
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn run_with_freq_registers_and_selects_a_band_once() {
        let mut d = Dispatcher::new(1.0, 8);
        d.run(Some(Duration::from_millis(5)), Some(500.0));
        assert_eq!(d.pacer.current_freq_hz(), 500.0);
        assert_eq!(d.known_bands.len(), 1);
        // Calling again with the same frequency reuses the band instead
        // of registering a second one.
        d.run(Some(Duration::from_millis(5)), Some(500.0));
        assert_eq!(d.known_bands.len(), 1);
    }
}
