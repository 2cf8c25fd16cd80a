use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonically increasing generator shared by `TimerId` and
/// `SignalSlotId` so log lines are unambiguous even when both appear
/// interleaved.
static NEXT_ID: AtomicU64 = AtomicU64::new(1);

fn next() -> u64 {
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

/// Handle returned by `TimerService::schedule`, opaque to callers, used
/// only to cancel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

impl TimerId {
    pub fn new() -> Self {
        Self(next())
    }
}

impl Default for TimerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timer#{}", self.0)
    }
}

/// Handle returned by `SignalService::register`, used to unregister a
/// single subscriber without affecting others subscribed to the same
/// signal number.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SignalSlotId(u64);

impl SignalSlotId {
    pub fn new() -> Self {
        Self(next())
    }
}

impl Default for SignalSlotId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SignalSlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sigslot#{}", self.0)
    }
}

/// Handle returned by `PeriodicPacer::add_band`, used to select that band
/// later via `use_band` without re-specifying its frequency.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BandId(u64);

impl BandId {
    pub fn new() -> Self {
        Self(next())
    }
}

impl Default for BandId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "band#{}", self.0)
    }
}
