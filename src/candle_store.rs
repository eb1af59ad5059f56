/// Loads per-timeframe CSV datasets into memory and indexes them for
/// sub-millisecond date lookups and slice reads (spec §4.1).
///
/// `CandleSeries` is immutable once built: CandleStore exclusively owns it
/// for the process lifetime, per the ownership rules in spec §3.
use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, NaiveDateTime, Utc};

use crate::model::{Candle, Timeframe};

/// One timeframe's immutable, time-ordered candle table.
pub struct CandleSeries {
    candles: Vec<Candle>,
    // Parallel vector of timestamps, kept separate from `candles` purely
    // so `find_index` can binary-search without touching the rest of the
    // struct.
    times: Vec<i64>,
}

impl CandleSeries {
    fn from_sorted_unique(mut candles: Vec<Candle>) -> Self {
        candles.sort_by_key(|c| c.time);
        let times = candles.iter().map(|c| c.time).collect();
        CandleSeries { candles, times }
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn first(&self) -> Option<&Candle> {
        self.candles.first()
    }

    pub fn last(&self) -> Option<&Candle> {
        self.candles.last()
    }

    pub fn get(&self, index: usize) -> Option<&Candle> {
        self.candles.get(index)
    }

    pub fn as_slice(&self) -> &[Candle] {
        &self.candles
    }

    /// Returns the index of the exact match for `target_time`, or the
    /// greatest index whose time is <= target_time. Returns 0 if
    /// `target_time` precedes the first candle — never an arbitrary fixed
    /// offset (the "index 199" bug spec §4.1 forbids).
    pub fn find_index(&self, target_time: i64) -> usize {
        if self.times.is_empty() {
            return 0;
        }
        match self.times.binary_search(&target_time) {
            Ok(i) => i,
            Err(0) => 0,
            Err(i) => i - 1,
        }
    }

    /// Up to `count` candles ending at `end_index_exclusive - 1`.
    pub fn slice(&self, end_index_exclusive: usize, count: usize) -> Vec<Candle> {
        let end = end_index_exclusive.min(self.candles.len());
        let start = end.saturating_sub(count);
        self.candles[start..end].to_vec()
    }

    /// Inclusive on both ends.
    pub fn range(&self, start_time: i64, end_time: i64) -> Vec<Candle> {
        let start_idx = match self.times.binary_search(&start_time) {
            Ok(i) => i,
            Err(i) => i,
        };
        self.candles[start_idx..]
            .iter()
            .take_while(|c| c.time <= end_time)
            .copied()
            .collect()
    }
}

/// Owns every loaded `CandleSeries`, keyed by timeframe. Read-only after
/// `load_all` completes, shared without locking (spec §5).
pub struct CandleStore {
    series: HashMap<Timeframe, CandleSeries>,
}

impl CandleStore {
    pub fn new() -> Self {
        CandleStore {
            series: HashMap::new(),
        }
    }

    /// Loads one CSV per timeframe from `data_path/{tf}.csv`. A missing or
    /// empty file marks that timeframe unavailable without failing the
    /// others (spec §4.1 failure modes).
    pub fn load_all(data_path: &str) -> Self {
        let mut store = CandleStore::new();
        for tf in Timeframe::ALL {
            let path = Path::new(data_path).join(format!("{}.csv", tf.as_str()));
            match load_timeframe_csv(&path) {
                Ok(series) if !series.is_empty() => {
                    tracing::info!(
                        timeframe = tf.as_str(),
                        candles = series.len(),
                        "loaded timeframe"
                    );
                    store.series.insert(tf, series);
                }
                Ok(_) => {
                    tracing::warn!(timeframe = tf.as_str(), "csv present but empty, unavailable");
                }
                Err(e) => {
                    tracing::warn!(timeframe = tf.as_str(), error = %e, "timeframe unavailable");
                }
            }
        }
        store
    }

    pub fn is_available(&self, tf: Timeframe) -> bool {
        self.series.get(&tf).is_some_and(|s| !s.is_empty())
    }

    pub fn available_timeframes(&self) -> Vec<Timeframe> {
        Timeframe::ALL.into_iter().filter(|tf| self.is_available(*tf)).collect()
    }

    pub fn series(&self, tf: Timeframe) -> Option<&CandleSeries> {
        self.series.get(&tf)
    }

    pub fn find_index(&self, tf: Timeframe, target_time: i64) -> Option<usize> {
        self.series.get(&tf).map(|s| s.find_index(target_time))
    }

    pub fn slice(&self, tf: Timeframe, end_index_exclusive: usize, count: usize) -> Vec<Candle> {
        self.series
            .get(&tf)
            .map(|s| s.slice(end_index_exclusive, count))
            .unwrap_or_default()
    }

    pub fn range(&self, tf: Timeframe, start_time: i64, end_time: i64) -> Vec<Candle> {
        self.series
            .get(&tf)
            .map(|s| s.range(start_time, end_time))
            .unwrap_or_default()
    }

    /// Inserts a pre-built series directly, bypassing CSV loading. Used in
    /// tests and by the aggregator fallback path (spec §4.4) when a target
    /// timeframe has no CSV of its own.
    pub fn insert_series(&mut self, tf: Timeframe, candles: Vec<Candle>) {
        self.series.insert(tf, CandleSeries::from_sorted_unique(candles));
    }
}

impl Default for CandleStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Reads one CSV file, tolerating both documented column shapes (spec
/// §4.1/§6.1): epoch-seconds + lowercase OHLCV, or first-column-datetime +
/// capitalized OHLCV. Unparseable rows are skipped, not fatal.
fn load_timeframe_csv(path: &Path) -> Result<CandleSeries, csv::Error> {
    let mut reader = csv::ReaderBuilder::new().has_headers(true).from_path(path)?;

    let headers = reader.headers()?.clone();
    // Epoch layout names its first column "time"; anything else (an
    // unnamed datetime column, or one literally called "Date") is the
    // datetime layout.
    let datetime_layout = !headers.get(0).map(|h| h.eq_ignore_ascii_case("time")).unwrap_or(false);

    let mut candles = Vec::new();
    let mut skipped = 0usize;

    for result in reader.records() {
        let record = match result {
            Ok(r) => r,
            Err(_) => {
                skipped += 1;
                continue;
            }
        };

        let parsed = if datetime_layout {
            parse_datetime_row(&record)
        } else {
            parse_epoch_row(&record)
        };

        match parsed {
            Some(c) => candles.push(c),
            None => skipped += 1,
        }
    }

    if skipped > 0 {
        tracing::debug!(path = %path.display(), skipped, "skipped unparseable csv rows");
    }

    Ok(CandleSeries::from_sorted_unique(dedupe_last_write_wins(candles)))
}

fn dedupe_last_write_wins(mut candles: Vec<Candle>) -> Vec<Candle> {
    candles.sort_by_key(|c| c.time);
    let mut out: Vec<Candle> = Vec::with_capacity(candles.len());
    for c in candles {
        if let Some(last) = out.last_mut() {
            if last.time == c.time {
                *last = c;
                continue;
            }
        }
        out.push(c);
    }
    out
}

fn parse_epoch_row(record: &csv::StringRecord) -> Option<Candle> {
    let time: i64 = record.get(0)?.trim().parse().ok()?;
    let open: f64 = record.get(1)?.trim().parse().ok()?;
    let high: f64 = record.get(2)?.trim().parse().ok()?;
    let low: f64 = record.get(3)?.trim().parse().ok()?;
    let close: f64 = record.get(4)?.trim().parse().ok()?;
    let volume: f64 = record
        .get(5)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(0.0);
    Some(Candle { time, open, high, low, close, volume })
}

fn parse_datetime_row(record: &csv::StringRecord) -> Option<Candle> {
    let raw = record.get(0)?.trim();
    let time = parse_datetime_day_first(raw)?;
    let open: f64 = record.get(1)?.trim().parse().ok()?;
    let high: f64 = record.get(2)?.trim().parse().ok()?;
    let low: f64 = record.get(3)?.trim().parse().ok()?;
    let close: f64 = record.get(4)?.trim().parse().ok()?;
    let volume: f64 = record
        .get(5)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(0.0);
    Some(Candle { time, open, high, low, close, volume })
}

/// Parses a human-readable datetime, day-first where the format is
/// ambiguous (spec §4.1/§6.1), falling back to ISO-8601 when day-first
/// parsing fails outright.
fn parse_datetime_day_first(raw: &str) -> Option<i64> {
    const DAY_FIRST_FORMATS: &[&str] = &["%d/%m/%Y %H:%M:%S", "%d/%m/%Y %H:%M", "%d-%m-%Y %H:%M:%S"];
    for fmt in DAY_FIRST_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc).timestamp());
        }
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Some(DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc).timestamp());
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc).timestamp());
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn series(times: &[i64]) -> CandleSeries {
        let candles = times
            .iter()
            .map(|&t| Candle { time: t, open: 1.0, high: 1.0, low: 1.0, close: 1.0, volume: 0.0 })
            .collect();
        CandleSeries::from_sorted_unique(candles)
    }

    #[test]
    fn find_index_exact_match() {
        let s = series(&[100, 200, 300]);
        assert_eq!(s.find_index(200), 1);
    }

    #[test]
    fn find_index_before_first_returns_zero_never_a_fixed_offset() {
        let s = series(&[100, 200, 300]);
        assert_eq!(s.find_index(0), 0);
    }

    #[test]
    fn find_index_between_returns_greatest_leq() {
        let s = series(&[100, 200, 300]);
        assert_eq!(s.find_index(250), 1);
    }

    #[test]
    fn find_index_after_last_returns_last() {
        let s = series(&[100, 200, 300]);
        assert_eq!(s.find_index(999), 2);
    }

    #[test]
    fn slice_ends_exclusive_and_caps_at_count() {
        let s = series(&[100, 200, 300, 400, 500]);
        let sl = s.slice(4, 2);
        assert_eq!(sl.iter().map(|c| c.time).collect::<Vec<_>>(), vec![300, 400]);
    }

    #[test]
    fn slice_near_start_never_panics() {
        let s = series(&[100, 200, 300]);
        let sl = s.slice(1, 200);
        assert_eq!(sl.len(), 1);
    }

    #[test]
    fn range_is_inclusive_both_ends() {
        let s = series(&[100, 200, 300, 400]);
        let r = s.range(200, 300);
        assert_eq!(r.iter().map(|c| c.time).collect::<Vec<_>>(), vec![200, 300]);
    }

    #[test]
    fn dedupe_keeps_last_write_on_duplicate_timestamps() {
        let candles = vec![
            Candle { time: 100, open: 1.0, high: 1.0, low: 1.0, close: 1.0, volume: 0.0 },
            Candle { time: 100, open: 9.0, high: 9.0, low: 9.0, close: 9.0, volume: 0.0 },
        ];
        let deduped = dedupe_last_write_wins(candles);
        assert_eq!(deduped.len(), 1);
        assert_eq!(deduped[0].open, 9.0);
    }

    #[test]
    fn epoch_layout_parses_lowercase_columns() {
        let mut rec = csv::StringRecord::new();
        rec.push_field("1700000000");
        rec.push_field("1.1");
        rec.push_field("1.2");
        rec.push_field("1.0");
        rec.push_field("1.05");
        rec.push_field("10");
        let c = parse_epoch_row(&rec).unwrap();
        assert_eq!(c.time, 1700000000);
        assert_eq!(c.volume, 10.0);
    }

    #[test]
    fn datetime_layout_parses_day_first() {
        // 03/04/2024 is day-first -> April 3rd, not March 4th.
        let ts = parse_datetime_day_first("03/04/2024 10:00:00").unwrap();
        let dt = DateTime::<Utc>::from_timestamp(ts, 0).unwrap();
        assert_eq!(dt.format("%Y-%m-%d").to_string(), "2024-04-03");
    }

    #[test]
    fn missing_volume_defaults_to_zero() {
        let mut rec = csv::StringRecord::new();
        rec.push_field("1700000000");
        rec.push_field("1.1");
        rec.push_field("1.2");
        rec.push_field("1.0");
        rec.push_field("1.05");
        let c = parse_epoch_row(&rec).unwrap();
        assert_eq!(c.volume, 0.0);
    }
}
