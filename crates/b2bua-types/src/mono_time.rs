use std::fmt;
use std::time::{Duration, Instant};

/// A monotonic timestamp, immune to wall-clock adjustments (NTP slew, leap
/// seconds, operator `date -s`).
///
/// All scheduling in the reactor is expressed in terms of `MonoTime` so that
/// a clock step never produces a timer that fires immediately or never.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MonoTime(Instant);

impl MonoTime {
    /// The current instant.
    pub fn now() -> Self {
        Self(Instant::now())
    }

    /// A copy of this timestamp offset forward by `interval`.
    pub fn offset_copy(&self, interval: Duration) -> Self {
        Self(self.0 + interval)
    }

    /// A copy of this timestamp offset backward by `interval`, saturating at
    /// the earliest representable instant.
    pub fn offset_copy_neg(&self, interval: Duration) -> Self {
        Self(self.0.checked_sub(interval).unwrap_or(self.0))
    }

    /// Offset this timestamp forward by `interval` in place.
    pub fn offset(&mut self, interval: Duration) {
        self.0 += interval;
    }

    /// Elapsed wall time between `earlier` and `self`. Zero if `self` is not
    /// after `earlier`.
    pub fn since(&self, earlier: MonoTime) -> Duration {
        self.0.saturating_duration_since(earlier.0)
    }

    pub fn into_instant(self) -> Instant {
        self.0
    }
}

impl From<Instant> for MonoTime {
    fn from(i: Instant) -> Self {
        Self(i)
    }
}

impl fmt::Display for MonoTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offset_copy_moves_forward_without_mutating_original() {
        let t0 = MonoTime::now();
        let t1 = t0.offset_copy(Duration::from_secs(5));
        assert!(t1 > t0);
        assert_eq!(t1.since(t0), Duration::from_secs(5));
    }

    #[test]
    fn since_saturates_to_zero_when_not_after() {
        let t0 = MonoTime::now();
        let t1 = t0.offset_copy(Duration::from_secs(5));
        assert_eq!(t0.since(t1), Duration::ZERO);
    }

    #[test]
    fn offset_copy_neg_saturates_at_earliest_instant() {
        let t0 = MonoTime::now();
        let way_back = t0.offset_copy_neg(Duration::from_secs(u64::MAX / 2));
        assert!(way_back <= t0);
    }

    #[test]
    fn ord_matches_chronological_order() {
        let t0 = MonoTime::now();
        let t1 = t0.offset_copy(Duration::from_millis(1));
        let t2 = t0.offset_copy(Duration::from_millis(2));
        let mut v = vec![t2, t0, t1];
        v.sort();
        assert_eq!(v, vec![t0, t1, t2]);
    }
}
