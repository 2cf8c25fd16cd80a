use std::cell::RefCell;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::rc::Rc;
use std::time::Duration;

use b2bua_types::{MonoTime, TimerId};

/// Sequence counter used only to break ties between timers with identical
/// `fire_at`, so the heap ordering (and therefore firing order) is
/// deterministic instead of depending on `BinaryHeap`'s internal layout.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
struct HeapKey {
    fire_at: MonoTime,
    seq: u64,
    id: TimerId,
}

struct TimerEntry {
    callback: Box<dyn FnMut(MonoTime)>,
    /// `None` for a one-shot timer. `Some(None)` for a periodic timer that
    /// repeats forever. `Some(Some(n))` for `n` remaining ticks.
    remaining_ticks: Option<Option<u32>>,
    interval: Option<Duration>,
    /// Jitter fraction `p` in `[0, 1]`, applied to `interval` at each
    /// reschedule via `jittered`. `None` disables jitter entirely.
    jitter: Option<f64>,
}

/// `jittered(x) = x * (1 + p * (1 - 2*U[0,1)))`: spreads a nominal
/// interval by up to `+-p` of itself, so many timers armed at the same
/// moment don't all fire in lockstep.
fn jittered(base: Duration, jitter: Option<f64>) -> Duration {
    match jitter {
        None => base,
        Some(p) => {
            let p = p.clamp(0.0, 1.0);
            let u: f64 = rand::random();
            let factor = (1.0 + p * (1.0 - 2.0 * u)).max(0.0);
            base.mul_f64(factor)
        }
    }
}

/// Min-heap of scheduled timers with lazy tombstone cancellation.
///
/// `cancel` never touches the heap directly — it only removes the entry
/// from `live`, leaving a dead key in the heap. `dispatch` skips dead keys
/// it pops and counts them in `wasted`; once wasted entries are more than
/// half the heap, `compact` rebuilds it from only the live entries. This
/// keeps `cancel` O(log n) instead of O(n) at the cost of bounded,
/// amortized heap bloat.
pub struct TimerHeap {
    heap: BinaryHeap<Reverse<HeapKey>>,
    live: HashMap<TimerId, TimerEntry>,
    wasted: usize,
    next_seq: u64,
}

impl Default for TimerHeap {
    fn default() -> Self {
        Self::new()
    }
}

impl TimerHeap {
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            live: HashMap::new(),
            wasted: 0,
            next_seq: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    fn push_key(&mut self, fire_at: MonoTime, id: TimerId) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Reverse(HeapKey { fire_at, seq, id }));
    }

    pub fn schedule(
        &mut self,
        fire_at: MonoTime,
        interval: Option<Duration>,
        ticks: Option<u32>,
        callback: Box<dyn FnMut(MonoTime)>,
    ) -> TimerId {
        self.schedule_jittered(fire_at, interval, ticks, None, callback)
    }

    /// Like `schedule`, but remembers a jitter fraction that is
    /// reapplied to `interval` at every periodic reschedule (the
    /// `fire_at` passed in here is assumed already jittered by the
    /// caller for the first firing).
    pub fn schedule_jittered(
        &mut self,
        fire_at: MonoTime,
        interval: Option<Duration>,
        ticks: Option<u32>,
        jitter: Option<f64>,
        callback: Box<dyn FnMut(MonoTime)>,
    ) -> TimerId {
        let id = TimerId::new();
        self.live.insert(
            id,
            TimerEntry {
                callback,
                remaining_ticks: interval.map(|_| ticks),
                interval,
                jitter,
            },
        );
        self.push_key(fire_at, id);
        id
    }

    /// Cancel a timer. Idempotent: cancelling an already-fired or
    /// already-cancelled id is a no-op, matching the original's
    /// `cleanup()`-guards-against-double-cancel behavior.
    pub fn cancel(&mut self, id: TimerId) {
        if self.live.remove(&id).is_some() {
            self.wasted += 1;
        }
    }

    /// Fire every timer due at or before `now`, in `fire_at` order,
    /// rescheduling periodic ones. Stops as soon as the heap's earliest
    /// entry is in the future (or the heap is empty) — matches
    /// `dispatchTimers`'s "We've finished" early return.
    pub fn dispatch(&mut self, now: MonoTime) {
        loop {
            let Some(&Reverse(top)) = self.heap.peek() else {
                break;
            };
            if top.fire_at > now {
                break;
            }
            self.heap.pop();
            let Some(mut entry) = self.live.remove(&top.id) else {
                self.wasted = self.wasted.saturating_sub(1);
                continue;
            };
            let reschedule = match &mut entry.remaining_ticks {
                None => false,
                Some(None) => true,
                Some(Some(n)) if *n > 1 => {
                    *n -= 1;
                    true
                }
                Some(Some(_)) => false,
            };
            (entry.callback)(now);
            if reschedule {
                let interval = entry.interval.expect("periodic timer has an interval");
                let next_fire = now.offset_copy(jittered(interval, entry.jitter));
                let id = top.id;
                self.live.insert(id, entry);
                self.push_key(next_fire, id);
            }
            self.maybe_compact();
        }
    }

    /// Next deadline the dispatcher's main loop should sleep until, if any
    /// timer is still live.
    pub fn next_deadline(&self) -> Option<MonoTime> {
        self.heap
            .iter()
            .filter(|Reverse(k)| self.live.contains_key(&k.id))
            .map(|Reverse(k)| k.fire_at)
            .min()
    }

    fn maybe_compact(&mut self) {
        if self.wasted * 2 <= self.heap.len() {
            return;
        }
        self.heap.retain(|Reverse(k)| self.live.contains_key(&k.id));
        // `retain` on `BinaryHeap` preserves heap order, no `heapify` needed.
        self.wasted = 0;
    }
}

/// Handle callers use to schedule/cancel timers without owning the heap.
/// Single-threaded by design (`Rc`, not `Arc`) — only the dispatcher's
/// owner thread ever touches it.
#[derive(Clone)]
pub struct TimerService(Rc<RefCell<TimerHeap>>);

impl TimerService {
    pub fn new(heap: Rc<RefCell<TimerHeap>>) -> Self {
        Self(heap)
    }

    pub fn schedule_once(
        &self,
        after: Duration,
        callback: impl FnMut(MonoTime) + 'static,
    ) -> TimerId {
        self.schedule_once_jittered(after, None, callback)
    }

    /// One-shot timer whose delay is spread by `jitter` (a `p` in `[0, 1]`,
    /// or `None` for no jitter) at arm time.
    pub fn schedule_once_jittered(
        &self,
        after: Duration,
        jitter: Option<f64>,
        callback: impl FnMut(MonoTime) + 'static,
    ) -> TimerId {
        let fire_at = MonoTime::now().offset_copy(jittered(after, jitter));
        self.0
            .borrow_mut()
            .schedule_jittered(fire_at, None, None, jitter, Box::new(callback))
    }

    pub fn schedule_periodic(
        &self,
        interval: Duration,
        ticks: Option<u32>,
        callback: impl FnMut(MonoTime) + 'static,
    ) -> TimerId {
        self.schedule_periodic_jittered(interval, ticks, None, callback)
    }

    /// Periodic timer whose interval is independently re-jittered at arm
    /// time and at every subsequent reschedule.
    pub fn schedule_periodic_jittered(
        &self,
        interval: Duration,
        ticks: Option<u32>,
        jitter: Option<f64>,
        callback: impl FnMut(MonoTime) + 'static,
    ) -> TimerId {
        let fire_at = MonoTime::now().offset_copy(jittered(interval, jitter));
        self.0.borrow_mut().schedule_jittered(
            fire_at,
            Some(interval),
            ticks,
            jitter,
            Box::new(callback),
        )
    }

    /// Register a one-shot timer against an absolute instant rather than
    /// a delay from now. Never jittered: `fire_at` is taken literally.
    pub fn schedule_absolute(
        &self,
        fire_at: MonoTime,
        callback: impl FnMut(MonoTime) + 'static,
    ) -> TimerId {
        self.0
            .borrow_mut()
            .schedule(fire_at, None, None, Box::new(callback))
    }

    pub fn cancel(&self, id: TimerId) {
        self.0.borrow_mut().cancel(id);
    }

    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn one_shot_timer_fires_once_and_is_removed() {
        let mut heap = TimerHeap::new();
        let fired = Rc::new(Cell::new(0));
        let f = fired.clone();
        let now = MonoTime::now();
        heap.schedule(now, None, None, Box::new(move |_| f.set(f.get() + 1)));
        heap.dispatch(now);
        assert_eq!(fired.get(), 1);
        assert!(heap.is_empty());
    }

    #[test]
    fn timer_in_the_future_does_not_fire() {
        let mut heap = TimerHeap::new();
        let fired = Rc::new(Cell::new(0));
        let f = fired.clone();
        let now = MonoTime::now();
        heap.schedule(
            now.offset_copy(Duration::from_secs(10)),
            None,
            None,
            Box::new(move |_| f.set(f.get() + 1)),
        );
        heap.dispatch(now);
        assert_eq!(fired.get(), 0);
        assert_eq!(heap.len(), 1);
    }

    #[test]
    fn periodic_timer_reschedules_with_remaining_ticks_decremented() {
        let mut heap = TimerHeap::new();
        let fired = Rc::new(Cell::new(0));
        let f = fired.clone();
        let mut now = MonoTime::now();
        heap.schedule(
            now,
            Some(Duration::from_millis(1)),
            Some(3),
            Box::new(move |_| f.set(f.get() + 1)),
        );
        for _ in 0..3 {
            now = now.offset_copy(Duration::from_millis(1));
            heap.dispatch(now);
        }
        assert_eq!(fired.get(), 3);
        assert!(heap.is_empty());
    }

    #[test]
    fn infinite_periodic_timer_never_removed_until_cancelled() {
        let mut heap = TimerHeap::new();
        let mut now = MonoTime::now();
        let id = heap.schedule(now, Some(Duration::from_millis(1)), None, Box::new(|_| {}));
        for _ in 0..5 {
            now = now.offset_copy(Duration::from_millis(1));
            heap.dispatch(now);
        }
        assert_eq!(heap.len(), 1);
        heap.cancel(id);
        assert!(heap.is_empty());
    }

    #[test]
    fn cancelling_a_pending_timer_prevents_it_from_firing() {
        let mut heap = TimerHeap::new();
        let fired = Rc::new(Cell::new(false));
        let f = fired.clone();
        let now = MonoTime::now();
        let id = heap.schedule(now, None, None, Box::new(move |_| f.set(true)));
        heap.cancel(id);
        heap.dispatch(now);
        assert!(!fired.get());
    }

    #[test]
    fn cancelling_twice_is_a_harmless_no_op() {
        let mut heap = TimerHeap::new();
        let now = MonoTime::now();
        let id = heap.schedule(now, None, None, Box::new(|_| {}));
        heap.cancel(id);
        heap.cancel(id);
        assert_eq!(heap.wasted, 1);
    }

    #[test]
    fn compaction_kicks_in_once_wasted_exceeds_half_the_heap() {
        let mut heap = TimerHeap::new();
        let now = MonoTime::now();
        let mut ids = Vec::new();
        for _ in 0..10 {
            ids.push(heap.schedule(
                now.offset_copy(Duration::from_secs(1)),
                None,
                None,
                Box::new(|_| {}),
            ));
        }
        for id in &ids[..6] {
            heap.cancel(*id);
        }
        assert_eq!(heap.heap.len(), 10);
        // Dispatch at `now` triggers nothing (all timers are 1s out) but
        // still runs the post-loop compaction check via a zero-length
        // fast path: force it by scheduling and firing a one-shot.
        heap.schedule(now, None, None, Box::new(|_| {}));
        heap.dispatch(now);
        assert_eq!(heap.wasted, 0);
        assert_eq!(heap.heap.len(), 4);
    }

    #[test]
    fn jittered_interval_stays_within_the_configured_fraction() {
        let base = Duration::from_secs(10);
        for _ in 0..50 {
            let d = jittered(base, Some(0.2));
            assert!(d >= Duration::from_secs(8) && d <= Duration::from_secs(12));
        }
    }

    #[test]
    fn no_jitter_returns_the_base_interval_unchanged() {
        assert_eq!(jittered(Duration::from_secs(10), None), Duration::from_secs(10));
    }

    #[test]
    fn periodic_reschedule_carries_jitter_across_ticks() {
        let mut heap = TimerHeap::new();
        let fired = Rc::new(Cell::new(0));
        let f = fired.clone();
        let now = MonoTime::now();
        heap.schedule_jittered(
            now,
            Some(Duration::from_millis(10)),
            Some(2),
            Some(0.5),
            Box::new(move |_| f.set(f.get() + 1)),
        );
        // Even with +-50% jitter, a second tick well past the longest
        // possible reschedule (15ms) must have fired by now.
        heap.dispatch(now.offset_copy(Duration::from_millis(40)));
        assert_eq!(fired.get(), 2);
        assert!(heap.is_empty());
    }

    #[test]
    fn schedule_absolute_fires_at_the_given_instant_regardless_of_jitter() {
        let mut heap = TimerHeap::new();
        let now = MonoTime::now();
        let at = now.offset_copy(Duration::from_millis(5));
        let fired = Rc::new(Cell::new(false));
        let f = fired.clone();
        heap.schedule(at, None, None, Box::new(move |_| f.set(true)));
        heap.dispatch(now);
        assert!(!fired.get());
        heap.dispatch(at);
        assert!(fired.get());
    }

    #[test]
    fn next_deadline_ignores_cancelled_entries() {
        let mut heap = TimerHeap::new();
        let now = MonoTime::now();
        let near = heap.schedule(now, None, None, Box::new(|_| {}));
        heap.schedule(
            now.offset_copy(Duration::from_secs(5)),
            None,
            None,
            Box::new(|_| {}),
        );
        heap.cancel(near);
        assert_eq!(
            heap.next_deadline(),
            Some(now.offset_copy(Duration::from_secs(5)))
        );
    }
}
