/// Append-only log of user-generated "skip" candles, isolated from the
/// immutable historical baseline (spec §4.3).
///
/// Appends take a plain `std::sync::Mutex`, not the async transition
/// mutex: a skip append is a single, fast, non-blocking operation and
/// never awaits anything while holding the lock.
use std::sync::Mutex;

use crate::aggregator::snap_to_boundary;
use crate::model::{Candle, ContaminationLevel, SkipEvent, Timeframe};

pub struct SkipStore {
    events: Mutex<Vec<SkipEvent>>,
    next_id: Mutex<u64>,
}

impl SkipStore {
    pub fn new() -> Self {
        SkipStore { events: Mutex::new(Vec::new()), next_id: Mutex::new(1) }
    }

    /// Appends a new skip event originated at `origin_timeframe`, returning
    /// its assigned id.
    pub fn append(&self, time: i64, origin_timeframe: Timeframe, candle: Candle, created_at: i64) -> u64 {
        let mut next_id = self.next_id.lock().expect("skip store id lock poisoned");
        let id = *next_id;
        *next_id += 1;
        drop(next_id);

        let event = SkipEvent { id, time, origin_timeframe, candle, created_at };
        self.events.lock().expect("skip store lock poisoned").push(event);
        id
    }

    /// Read-only snapshot of every event ever appended, oldest first.
    pub fn snapshot(&self) -> Vec<SkipEvent> {
        self.events.lock().expect("skip store lock poisoned").clone()
    }

    pub fn clear(&self) {
        self.events.lock().expect("skip store lock poisoned").clear();
    }

    /// Per-timeframe contamination, derived from how many events are
    /// visible at `target_tf` (spec §4.3 visibility rule).
    pub fn contamination_level(&self, target_tf: Timeframe) -> ContaminationLevel {
        let count = self.project(target_tf).len();
        ContaminationLevel::from_count(count)
    }

    /// Re-projects every visible skip event onto `target_tf`: only events
    /// whose origin timeframe is coarser-or-equal (`origin.minutes >=
    /// target.minutes`) are visible, each is aligned to the target's
    /// bucket boundary, and duplicate target buckets keep the latest
    /// (highest id) event only.
    pub fn project(&self, target_tf: Timeframe) -> Vec<SkipEvent> {
        let events = self.events.lock().expect("skip store lock poisoned");
        let mut visible: Vec<SkipEvent> = events
            .iter()
            .filter(|e| e.origin_timeframe.minutes() >= target_tf.minutes())
            .map(|e| {
                let aligned_time = snap_to_boundary(e.time, target_tf);
                SkipEvent {
                    id: e.id,
                    time: aligned_time,
                    origin_timeframe: e.origin_timeframe,
                    candle: Candle { time: aligned_time, ..e.candle },
                    created_at: e.created_at,
                }
            })
            .collect();

        visible.sort_by_key(|e| (e.time, e.id));
        let mut out: Vec<SkipEvent> = Vec::with_capacity(visible.len());
        for e in visible.drain(..) {
            if let Some(last) = out.last_mut() {
                if last.time == e.time {
                    *last = e;
                    continue;
                }
            }
            out.push(e);
        }
        out
    }
}

impl Default for SkipStore {
    fn default() -> Self {
        Self::new()
    }
}
