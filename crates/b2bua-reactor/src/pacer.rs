use std::collections::HashMap;
use std::time::Duration;

use b2bua_types::{BandId, MonoTime};
use crossbeam_channel::{Receiver, Sender, bounded};

/// One entry in the frequency-band registry. The original's `elperiodic`
/// library lets the loop switch to a higher polling frequency
/// (`elp.addband`/`elp.useband`) and back — used when a call leg needs
/// tighter timer granularity than the idle default.
#[derive(Clone, Copy, Debug, PartialEq)]
struct Band {
    freq_hz: f64,
}

/// A pulse sent to wake a sleeping `PeriodicPacer` ahead of its next
/// scheduled tick. Cloned out to anything that needs to preempt the
/// dispatcher's sleep — most notably `ThreadBridgeHandle::call_from_thread`.
#[derive(Clone)]
pub struct Notifier(Sender<()>);

impl Notifier {
    /// Wake the pacer. Best-effort: if the pulse channel already has a
    /// pending wake queued, this is a no-op — one pulse is as good as
    /// several, since the pacer only cares "has anything happened since
    /// I last checked", not "how many times".
    pub fn notify(&self) {
        let _ = self.0.try_send(());
    }
}

/// Frequency-banded sleep-until-next-tick primitive.
///
/// Sleeps for `1/freq` seconds (or until `next_deadline`, whichever is
/// sooner), but returns immediately if woken via a [`Notifier`] pulse —
/// this is what lets a cross-thread submission or a newly-armed timer cut
/// a long idle sleep short instead of waiting out the whole interval.
pub struct PeriodicPacer {
    bands: HashMap<BandId, Band>,
    default_band: BandId,
    current: BandId,
    wake_rx: Receiver<()>,
    wake_tx: Sender<()>,
}

/// Outcome of one `procrastinate` call, so the dispatcher can log/account
/// for preempted sleeps separately from ordinary tick expiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wake {
    /// Slept the full interval (or until `next_deadline`) without being
    /// preempted.
    TimerExpired,
    /// A `Notifier` pulse cut the sleep short.
    Preempted,
}

impl PeriodicPacer {
    pub fn new(default_freq_hz: f64) -> Self {
        assert!(default_freq_hz > 0.0, "frequency must be positive");
        let (wake_tx, wake_rx) = bounded(1);
        let default_band = BandId::new();
        let mut bands = HashMap::new();
        bands.insert(
            default_band,
            Band {
                freq_hz: default_freq_hz,
            },
        );
        Self {
            bands,
            default_band,
            current: default_band,
            wake_rx,
            wake_tx,
        }
    }

    pub fn notifier(&self) -> Notifier {
        Notifier(self.wake_tx.clone())
    }

    /// Register a new frequency band, returning an id stable until the
    /// pacer is dropped. Mirrors `elp.addband`; does not select it —
    /// call `use_band` to switch.
    pub fn add_band(&mut self, freq_hz: f64) -> BandId {
        assert!(freq_hz > 0.0, "frequency must be positive");
        let id = BandId::new();
        self.bands.insert(id, Band { freq_hz });
        id
    }

    /// Switch the active band. Mirrors `elp.useband`; panics if `id` was
    /// never returned by `add_band` on this pacer.
    pub fn use_band(&mut self, id: BandId) {
        assert!(self.bands.contains_key(&id), "unknown band id");
        self.current = id;
    }

    /// The id of the band installed at construction time, so callers can
    /// fall back to it without tracking the id themselves.
    pub fn default_band(&self) -> BandId {
        self.default_band
    }

    pub fn current_band(&self) -> BandId {
        self.current
    }

    pub fn current_freq_hz(&self) -> f64 {
        self.bands[&self.current].freq_hz
    }

    fn tick_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.current_freq_hz())
    }

    /// Sleep until the earlier of the current band's tick interval and
    /// `next_deadline`, or until preempted by a [`Notifier`] pulse.
    pub fn procrastinate(&self, next_deadline: Option<MonoTime>) -> Wake {
        let now = MonoTime::now();
        let tick_deadline = now.offset_copy(self.tick_interval());
        let deadline = match next_deadline {
            Some(d) if d < tick_deadline => d,
            _ => tick_deadline,
        };
        let budget = deadline.since(now);
        match self.wake_rx.recv_timeout(budget) {
            Ok(()) => Wake::Preempted,
            Err(_) => Wake::TimerExpired,
        }
    }
}
