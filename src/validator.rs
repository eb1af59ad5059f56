/// Enforces OHLC invariants and price sanity bounds on candles before they
/// reach a client (spec §4.5).
///
/// Bounds are configurable (teacher instrument, not hardcoded) so the
/// server can serve symbols other than the one the default `Config` ships
/// with.
use crate::model::Candle;

#[derive(Debug, Clone, Copy)]
pub struct Validator {
    price_min: f64,
    price_max: f64,
}

impl Validator {
    pub fn new(price_min: f64, price_max: f64) -> Self {
        Validator { price_min, price_max }
    }

    /// A candle is well-formed when high is the true max, low is the true
    /// min, and every price is finite and within bounds.
    pub fn is_valid(&self, c: &Candle) -> bool {
        let prices = [c.open, c.high, c.low, c.close];
        if prices.iter().any(|p| !p.is_finite()) {
            return false;
        }
        if prices.iter().any(|&p| p < self.price_min || p > self.price_max) {
            return false;
        }
        if c.high < c.open || c.high < c.close || c.high < c.low {
            return false;
        }
        if c.low > c.open || c.low > c.close {
            return false;
        }
        c.volume.is_finite() && c.volume >= 0.0
    }

    /// Drops invalid candles from a time-ordered slice.
    pub fn sanitize(&self, candles: &[Candle]) -> Vec<Candle> {
        candles.iter().filter(|c| self.is_valid(c)).copied().collect()
    }

    /// Sanitizes `candles`; if that empties the result, substitutes a
    /// single synthetic flat candle anchored at `fallback_time` so callers
    /// never have to special-case an empty series (spec §4.5 edge case).
    pub fn sanitize_or_fallback(&self, candles: &[Candle], fallback_time: i64, fallback_price: f64) -> Vec<Candle> {
        let clean = self.sanitize(candles);
        if clean.is_empty() {
            vec![self.synthetic_candle(fallback_time, fallback_price)]
        } else {
            clean
        }
    }

    fn synthetic_candle(&self, time: i64, price: f64) -> Candle {
        let price = price.clamp(self.price_min, self.price_max);
        Candle { time, open: price, high: price, low: price, close: price, volume: 0.0 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator() -> Validator {
        Validator::new(1.0, 1_000_000.0)
    }

    fn candle(o: f64, h: f64, l: f64, c: f64) -> Candle {
        Candle { time: 0, open: o, high: h, low: l, close: c, volume: 1.0 }
    }

    #[test]
    fn accepts_a_well_formed_candle() {
        assert!(validator().is_valid(&candle(10.0, 12.0, 9.0, 11.0)));
    }

    #[test]
    fn rejects_high_below_open() {
        assert!(!validator().is_valid(&candle(10.0, 9.0, 9.0, 9.5)));
    }

    #[test]
    fn rejects_low_above_close() {
        assert!(!validator().is_valid(&candle(10.0, 12.0, 11.0, 10.5)));
    }

    #[test]
    fn rejects_price_outside_configured_bounds() {
        assert!(!validator().is_valid(&candle(2_000_000.0, 2_000_000.0, 2_000_000.0, 2_000_000.0)));
    }

    #[test]
    fn rejects_non_finite_prices() {
        assert!(!validator().is_valid(&candle(f64::NAN, 1.0, 1.0, 1.0)));
    }

    #[test]
    fn rejects_negative_volume() {
        let mut c = candle(10.0, 11.0, 9.0, 10.0);
        c.volume = -1.0;
        assert!(!validator().is_valid(&c));
    }

    #[test]
    fn sanitize_drops_only_the_bad_candles() {
        let good = candle(10.0, 11.0, 9.0, 10.0);
        let bad = candle(10.0, 9.0, 9.0, 9.5);
        let out = validator().sanitize(&[good, bad, good]);
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn sanitize_or_fallback_substitutes_a_flat_candle_when_everything_is_invalid() {
        let bad = candle(10.0, 9.0, 9.0, 9.5);
        let out = validator().sanitize_or_fallback(&[bad], 999, 50.0);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].time, 999);
        assert_eq!(out[0].open, 50.0);
        assert_eq!(out[0].high, out[0].low);
    }
}
