/// The single authoritative "current time" for a session (spec §3/§4.2).
///
/// Two modes: `Anchor` holds a user-chosen date with no drift yet;
/// `Drifting` tracks a cursor that has moved past the anchor because of
/// skips. Only `TransitionCoordinator` is allowed to call the mutating
/// methods below, inside an active transaction.
use crate::model::Timeframe;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TimeCursor {
    Anchor { anchor_date: i64 },
    Drifting { current_time: i64 },
}

impl TimeCursor {
    pub fn anchored_at(date: i64) -> Self {
        TimeCursor::Anchor { anchor_date: date }
    }

    /// The single value the data plane uses to decide "end of visible
    /// window" — fixes the bug where a timeframe switch reloaded the
    /// original anchor and ignored accumulated skips.
    pub fn get_load_anchor(&self) -> i64 {
        match *self {
            TimeCursor::Anchor { anchor_date } => anchor_date,
            TimeCursor::Drifting { current_time } => current_time,
        }
    }

    /// Go-To-Date always resets to `Anchor`, regardless of current mode.
    pub fn go_to_date(&mut self, date: i64) {
        *self = TimeCursor::Anchor { anchor_date: date };
    }

    /// A skip on `tf` advances the cursor by one timeframe step. From
    /// `Anchor(d)` this flips to `Drifting(d + tf)`; from `Drifting(t)` it
    /// advances to `Drifting(t + tf)`.
    pub fn skip(&mut self, tf: Timeframe) {
        let next = self.get_load_anchor() + tf.seconds();
        *self = TimeCursor::Drifting { current_time: next };
    }

    pub fn is_drifting(&self) -> bool {
        matches!(self, TimeCursor::Drifting { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anchor_skip_transitions_to_drifting_one_step_ahead() {
        let mut cursor = TimeCursor::anchored_at(1000);
        cursor.skip(Timeframe::M5);
        assert_eq!(cursor, TimeCursor::Drifting { current_time: 1000 + 300 });
    }

    #[test]
    fn drifting_skip_keeps_advancing() {
        let mut cursor = TimeCursor::Drifting { current_time: 1000 };
        cursor.skip(Timeframe::M5);
        cursor.skip(Timeframe::M5);
        assert_eq!(cursor, TimeCursor::Drifting { current_time: 1000 + 600 });
    }

    #[test]
    fn go_to_date_resets_from_any_mode() {
        let mut cursor = TimeCursor::Drifting { current_time: 5000 };
        cursor.go_to_date(42);
        assert_eq!(cursor, TimeCursor::Anchor { anchor_date: 42 });
    }

    #[test]
    fn load_anchor_reflects_current_mode() {
        assert_eq!(TimeCursor::anchored_at(10).get_load_anchor(), 10);
        assert_eq!(TimeCursor::Drifting { current_time: 20 }.get_load_anchor(), 20);
    }

    #[test]
    fn n_skips_from_anchor_advance_exactly_n_steps() {
        let mut cursor = TimeCursor::anchored_at(0);
        for _ in 0..7 {
            cursor.skip(Timeframe::M1);
        }
        assert_eq!(cursor.get_load_anchor(), 7 * Timeframe::M1.seconds());
    }
}
