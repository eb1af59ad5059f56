/// Shared rollup logic, used both by `CandleStore`'s missing-timeframe
/// fallback and by `SkipStore`'s cross-timeframe re-projection (spec §4.4).
///
/// Deliberately a single pair of functions rather than two near-duplicates:
/// every caller that needs to turn finer candles into a coarser one goes
/// through `rollup`, and every caller that needs a bucket boundary goes
/// through `snap_to_boundary`.
use crate::model::{Candle, Timeframe};

/// Aligns `time` down to the start of its `tf`-sized bucket:
/// `t - (t mod tf.seconds())`.
pub fn snap_to_boundary(time: i64, tf: Timeframe) -> i64 {
    let span = tf.seconds();
    time - time.rem_euclid(span)
}

/// Folds a time-ordered run of finer candles into one coarser candle. The
/// caller is responsible for ensuring every input candle belongs to the
/// same target bucket; returns `None` on an empty slice.
pub fn merge(candles: &[Candle]) -> Option<Candle> {
    let first = candles.first()?;
    let last = candles.last()?;
    let high = candles.iter().fold(f64::MIN, |acc, c| acc.max(c.high));
    let low = candles.iter().fold(f64::MAX, |acc, c| acc.min(c.low));
    let volume = candles.iter().map(|c| c.volume).sum();
    Some(Candle {
        time: first.time,
        open: first.open,
        high,
        low,
        close: last.close,
        volume,
    })
}

/// Rolls a full base-timeframe series up into `target`, bucketing by
/// `snap_to_boundary` and folding each bucket with `merge`. Input must
/// already be time-ordered; output is time-ordered and has one candle per
/// populated bucket (gaps in the input produce gaps in the output, never
/// synthetic filler — that is the Validator's job).
pub fn rollup(base: &[Candle], target: Timeframe) -> Vec<Candle> {
    let mut out = Vec::new();
    let mut bucket: Vec<Candle> = Vec::new();
    let mut bucket_start: Option<i64> = None;

    for &candle in base {
        let boundary = snap_to_boundary(candle.time, target);
        match bucket_start {
            Some(start) if start == boundary => bucket.push(candle),
            Some(_) => {
                if let Some(merged) = merge(&bucket) {
                    out.push(merged);
                }
                bucket.clear();
                bucket.push(candle);
                bucket_start = Some(boundary);
            }
            None => {
                bucket.push(candle);
                bucket_start = Some(boundary);
            }
        }
    }
    if let Some(merged) = merge(&bucket) {
        out.push(merged);
    }
    out
}
