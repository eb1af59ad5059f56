/// Orchestrates the 5-phase transition protocol (PRE, DESTRUCT, LOAD,
/// COMMIT, BROADCAST) for Go-To-Date, Timeframe-Switch, Skip, and
/// Auto-Play (spec §4.2).
///
/// All transitions on a given session are serialized through one
/// `tokio::sync::Mutex`, owned here rather than as process-global state —
/// the direct fix for the "process-wide mutable singletons" redesign flag.
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::aggregator::snap_to_boundary;
use crate::broadcaster::{Broadcaster, ServerMessage};
use crate::candle_store::CandleStore;
use crate::error::ReplayError;
use crate::lifecycle::LifecycleManager;
use crate::model::{Candle, ContaminationLevel, Timeframe};
use crate::skip_store::SkipStore;
use crate::time_cursor::TimeCursor;
use crate::validator::Validator;

pub struct SwitchOutcome {
    pub candles: Vec<Candle>,
    pub timeframe: Timeframe,
    pub needs_recreation: bool,
}

pub struct GotoOutcome {
    pub candles: Vec<Candle>,
    pub timeframe: Timeframe,
    pub target_date: i64,
    pub autoplay_stopped: bool,
}

pub struct SkipOutcome {
    pub candle: Candle,
    pub timeframe: Timeframe,
}

pub struct DebugState {
    pub timeframe: Timeframe,
    pub cursor: i64,
    pub play_mode: bool,
    pub speed: f64,
}

struct Inner {
    cursor: TimeCursor,
    lifecycle: LifecycleManager,
    current_tf: Timeframe,
    auto_play: bool,
    speed: f64,
    last_operation_was_goto: bool,
}

pub struct TransitionCoordinator {
    store: Arc<CandleStore>,
    skip_store: Arc<SkipStore>,
    validator: Validator,
    visible_window_size: usize,
    timeout_normal_ms: u64,
    timeout_after_goto_ms: u64,
    recreation_ack_timeout_ms: u64,
    next_transaction_id: AtomicU64,
    inner: tokio::sync::Mutex<Inner>,
}

impl TransitionCoordinator {
    pub fn new(
        store: Arc<CandleStore>,
        skip_store: Arc<SkipStore>,
        validator: Validator,
        visible_window_size: usize,
        timeout_normal_ms: u64,
        timeout_after_goto_ms: u64,
        initial_tf: Timeframe,
        initial_anchor: i64,
    ) -> Self {
        Self::with_ack_timeout(
            store,
            skip_store,
            validator,
            visible_window_size,
            timeout_normal_ms,
            timeout_after_goto_ms,
            3_000,
            initial_tf,
            initial_anchor,
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub fn with_ack_timeout(
        store: Arc<CandleStore>,
        skip_store: Arc<SkipStore>,
        validator: Validator,
        visible_window_size: usize,
        timeout_normal_ms: u64,
        timeout_after_goto_ms: u64,
        recreation_ack_timeout_ms: u64,
        initial_tf: Timeframe,
        initial_anchor: i64,
    ) -> Self {
        TransitionCoordinator {
            store,
            skip_store,
            validator,
            visible_window_size,
            timeout_normal_ms,
            timeout_after_goto_ms,
            recreation_ack_timeout_ms,
            next_transaction_id: AtomicU64::new(1),
            inner: tokio::sync::Mutex::new(Inner {
                cursor: TimeCursor::anchored_at(initial_anchor),
                lifecycle: LifecycleManager::new(),
                current_tf: initial_tf,
                auto_play: false,
                speed: 1.0,
                last_operation_was_goto: false,
            }),
        }
    }

    fn next_id(&self, kind: &str) -> String {
        let n = self.next_transaction_id.fetch_add(1, Ordering::Relaxed);
        format!("{kind}-{n}")
    }

    fn deadline(&self, after_goto: bool) -> Duration {
        let ms = if after_goto { self.timeout_after_goto_ms } else { self.timeout_normal_ms };
        Duration::from_millis(ms)
    }

    /// DESTRUCT phase: if recreation is needed, send the command and wait
    /// for the client's ack up to `recreation_ack_timeout_ms`. A timeout is
    /// a warning, not a failure (spec §4.2) — the coordinator proceeds
    /// optimistically but reports that no ack was observed, so the caller
    /// can schedule an emergency-recovery broadcast.
    async fn destruct(&self, broadcaster: &Broadcaster, needs_recreation: bool, version: u32) -> bool {
        if !needs_recreation {
            return true;
        }
        let rx = broadcaster.request_recreation(version);
        match tokio::time::timeout(Duration::from_millis(self.recreation_ack_timeout_ms), rx).await {
            Ok(Ok(())) => true,
            Ok(Err(_)) | Err(_) => {
                tracing::warn!("chart_series_recreation ack not observed; continuing optimistically");
                false
            }
        }
    }

    /// LOAD phase body shared by every transition kind: historical slice
    /// ending at `end_time`, merged with the projected skip candles for
    /// `tf`, then sanitized. Falls back to the Aggregator when `tf` has no
    /// CSV of its own but a finer timeframe does (spec §4.4) — not the
    /// common path, since per-tf CSVs are normally loaded directly.
    fn load_window(&self, tf: Timeframe, end_time: i64) -> Result<Vec<Candle>, ReplayError> {
        let historical = if self.store.is_available(tf) {
            let end_index = self.store.find_index(tf, end_time).map(|i| i + 1).unwrap_or(0);
            self.store.slice(tf, end_index, self.visible_window_size)
        } else {
            let rolled = self.rollup_fallback(tf)?;
            let end_index = (find_index_in(&rolled, end_time) + 1).min(rolled.len());
            let start = end_index.saturating_sub(self.visible_window_size);
            rolled[start..end_index].to_vec()
        };

        // Only skip candles at or before the window's right edge are
        // visible here: a skip made while drifting past the data, followed
        // by a Go-To-Date to an earlier `end_time`, must not resurface as
        // the window's last candle (spec §3/§8: a skip's `candle.time`
        // still governs visibility, it doesn't override the requested
        // anchor).
        let skip_candles: Vec<Candle> = self
            .skip_store
            .project(tf)
            .into_iter()
            .map(|e| e.candle)
            .filter(|c| c.time <= end_time)
            .collect();
        let merged = merge_with_skips(historical, &skip_candles);
        let fallback_price = merged.last().map(|c| c.close).unwrap_or(1.0);
        Ok(self.validator.sanitize_or_fallback(&merged, end_time, fallback_price))
    }

    /// Rolls the finest available timeframe that is still coarser-or-equal
    /// in granularity (i.e. has a smaller `minutes()`) than `tf` up into
    /// `tf`. Errors if no candidate timeframe is loaded.
    fn rollup_fallback(&self, tf: Timeframe) -> Result<Vec<Candle>, ReplayError> {
        let base_tf = Timeframe::ALL
            .into_iter()
            .filter(|base| base.minutes() < tf.minutes() && self.store.is_available(*base))
            .max_by_key(|base| base.minutes())
            .ok_or_else(|| ReplayError::TimeframeUnavailable(tf.as_str().to_string()))?;
        let base_series = self.store.series(base_tf).map(|s| s.as_slice()).unwrap_or(&[]);
        Ok(crate::aggregator::rollup(base_series, tf))
    }

    /// Timeframe-Switch. Cursor is not mutated; the load anchor is taken
    /// from whatever the cursor currently reports.
    pub async fn switch_timeframe(
        &self,
        broadcaster: &Broadcaster,
        tf: Timeframe,
        visible_candles: Option<usize>,
    ) -> Result<SwitchOutcome, ReplayError> {
        let _ = visible_candles; // window size is process-wide (spec §6.4); per-call override is not required
        let mut guard = self.inner.lock().await;
        let transaction_id = self.next_id("switch_tf");
        let after_goto = guard.last_operation_was_goto;

        // PRE: snapshot the plan before mutating anything.
        let pre_lifecycle_needs_recreation = guard.lifecycle.needs_recreation();
        let next_version = guard.lifecycle.version() + 1;
        guard.lifecycle.begin_transition();

        // DESTRUCT: ahead of LOAD, per spec §4.2's phase ordering.
        let ack_observed = self.destruct(broadcaster, pre_lifecycle_needs_recreation, next_version).await;

        let end_time = guard.cursor.get_load_anchor();
        let outcome = tokio::time::timeout(self.deadline(after_goto), async { self.load_window(tf, end_time) }).await;

        let candles = match outcome {
            Ok(Ok(candles)) => candles,
            Ok(Err(e)) => {
                guard.lifecycle.complete(false, false);
                if pre_lifecycle_needs_recreation {
                    broadcaster.send(ServerMessage::EmergencyRecoveryRequired);
                }
                return Err(e);
            }
            Err(_) => {
                tracing::warn!(transaction_id, "switch_timeframe exceeded its deadline; continuing");
                match self.load_window(tf, end_time) {
                    Ok(c) => c,
                    Err(e) => {
                        guard.lifecycle.complete(false, false);
                        return Err(e);
                    }
                }
            }
        };

        guard.current_tf = tf;
        guard.last_operation_was_goto = false;
        guard.lifecycle.complete(true, pre_lifecycle_needs_recreation);

        let contamination = self.skip_store.contamination_level(tf);
        broadcaster.send(ServerMessage::BulletproofTimeframeChanged {
            candles: candles.clone(),
            timeframe: tf,
            transaction_id,
            contamination: contamination_label(contamination),
            needs_recreation: pre_lifecycle_needs_recreation,
            clear_cache: false,
            load_anchor: end_time,
        });

        if pre_lifecycle_needs_recreation && !ack_observed {
            broadcaster.send(ServerMessage::EmergencyRecoveryRequired);
        }

        Ok(SwitchOutcome { candles, timeframe: tf, needs_recreation: pre_lifecycle_needs_recreation })
    }

    /// Go-To-Date. Always resets the cursor to `Anchor(target_date)` and
    /// pauses auto-play if it was running (spec §9 Open Question 1).
    pub async fn go_to_date(&self, broadcaster: &Broadcaster, target_date: i64) -> Result<GotoOutcome, ReplayError> {
        let mut guard = self.inner.lock().await;
        let transaction_id = self.next_id("goto");
        let autoplay_stopped = guard.auto_play;
        guard.auto_play = false;

        let pre_lifecycle_needs_recreation = guard.lifecycle.needs_recreation();
        let next_version = guard.lifecycle.version() + 1;
        guard.lifecycle.begin_transition();

        let ack_observed = self.destruct(broadcaster, pre_lifecycle_needs_recreation, next_version).await;

        let tf = guard.current_tf;
        let result = tokio::time::timeout(self.deadline(true), async { self.load_window(tf, target_date) }).await;

        let candles = match result {
            Ok(Ok(c)) => c,
            Ok(Err(e)) => {
                guard.lifecycle.complete(false, false);
                if pre_lifecycle_needs_recreation {
                    broadcaster.send(ServerMessage::EmergencyRecoveryRequired);
                }
                return Err(e);
            }
            Err(_) => {
                tracing::warn!(transaction_id, "go_to_date exceeded its deadline; continuing");
                match self.load_window(tf, target_date) {
                    Ok(c) => c,
                    Err(e) => {
                        guard.lifecycle.complete(false, false);
                        return Err(e);
                    }
                }
            }
        };

        guard.cursor.go_to_date(target_date);
        guard.last_operation_was_goto = true;
        guard.lifecycle.complete(true, pre_lifecycle_needs_recreation);

        broadcaster.send(ServerMessage::GoToDateComplete {
            candles: candles.clone(),
            timeframe: tf,
            target_date,
            clear_cache: true,
            load_anchor: target_date,
            autoplay_stopped,
        });

        if pre_lifecycle_needs_recreation && !ack_observed {
            broadcaster.send(ServerMessage::EmergencyRecoveryRequired);
        }

        Ok(GotoOutcome { candles, timeframe: tf, target_date, autoplay_stopped })
    }

    /// A single skip step on the current timeframe.
    pub async fn skip(&self, broadcaster: &Broadcaster) -> Result<SkipOutcome, ReplayError> {
        let mut guard = self.inner.lock().await;
        let tf = guard.current_tf;

        let new_time = guard.cursor.get_load_anchor() + tf.seconds();
        let aligned = snap_to_boundary(new_time, tf);
        let candle = self
            .store
            .series(tf)
            .and_then(|s| s.get(s.find_index(aligned)))
            .copied()
            .unwrap_or(Candle { time: aligned, open: 0.0, high: 0.0, low: 0.0, close: 0.0, volume: 0.0 });
        let candle = Candle { time: aligned, ..candle };

        self.skip_store.append(aligned, tf, candle, aligned);
        guard.cursor.skip(tf);
        guard.lifecycle.track_skip();
        guard.last_operation_was_goto = false;

        broadcaster.send(ServerMessage::SkipComplete { candle, timeframe: tf });
        Ok(SkipOutcome { candle, timeframe: tf })
    }

    /// One auto-play tick. Returns `Ok(None)` when the series has run out
    /// and auto-play has been stopped and clamped (spec §9 Open
    /// Question 2), instead of advancing past the last candle.
    pub async fn autoplay_tick(&self, broadcaster: &Broadcaster) -> Result<Option<SkipOutcome>, ReplayError> {
        {
            let guard = self.inner.lock().await;
            let tf = guard.current_tf;
            let next_time = guard.cursor.get_load_anchor() + tf.seconds();
            let last_available = self.store.series(tf).and_then(|s| s.last()).map(|c| c.time);
            if let Some(last) = last_available {
                if next_time > last {
                    drop(guard);
                    let mut guard = self.inner.lock().await;
                    guard.auto_play = false;
                    guard.cursor = TimeCursor::Drifting { current_time: last };
                    return Ok(None);
                }
            }
        }
        self.skip(broadcaster).await.map(Some)
    }

    pub async fn toggle_play(&self) -> bool {
        let mut guard = self.inner.lock().await;
        guard.auto_play = !guard.auto_play;
        guard.auto_play
    }

    pub async fn set_speed(&self, speed: f64) -> Result<(), ReplayError> {
        if !(1.0..=15.0).contains(&speed) {
            return Err(ReplayError::InvalidDate(format!("speed {speed} out of range [1,15]")));
        }
        self.inner.lock().await.speed = speed;
        Ok(())
    }

    pub async fn debug_state(&self) -> DebugState {
        let guard = self.inner.lock().await;
        DebugState {
            timeframe: guard.current_tf,
            cursor: guard.cursor.get_load_anchor(),
            play_mode: guard.auto_play,
            speed: guard.speed,
        }
    }

    pub async fn is_auto_playing(&self) -> bool {
        self.inner.lock().await.auto_play
    }
}

fn contamination_label(level: ContaminationLevel) -> String {
    match level {
        ContaminationLevel::Clean => "clean",
        ContaminationLevel::Light => "light",
        ContaminationLevel::Moderate => "moderate",
        ContaminationLevel::Heavy => "heavy",
    }
    .to_string()
}

/// Skip candles override historical candles at identical timestamps; the
/// merge keeps the series strictly increasing by time.
fn merge_with_skips(historical: Vec<Candle>, skip_candles: &[Candle]) -> Vec<Candle> {
    use std::collections::BTreeMap;
    let mut by_time: BTreeMap<i64, Candle> = historical.into_iter().map(|c| (c.time, c)).collect();
    for c in skip_candles {
        by_time.insert(c.time, *c);
    }
    by_time.into_values().collect()
}

/// Same index rule as `CandleSeries::find_index`, for a plain `&[Candle]`
/// that didn't come from the store (the aggregator fallback path).
fn find_index_in(candles: &[Candle], target_time: i64) -> usize {
    if candles.is_empty() {
        return 0;
    }
    let times: Vec<i64> = candles.iter().map(|c| c.time).collect();
    match times.binary_search(&target_time) {
        Ok(i) => i,
        Err(0) => 0,
        Err(i) => i - 1,
    }
}
