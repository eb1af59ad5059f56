/// Core data types shared across the replay engine.
///
/// These are the wire-safe building blocks described in the data model:
/// candles, timeframes, skip events and the small state-machine types that
/// track where a session currently is.
use serde::{Deserialize, Serialize};

/// One OHLCV bar. `time` is the candle's open timestamp, epoch seconds UTC,
/// aligned to its timeframe's minute boundary.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// The fixed set of supported timeframes. 1m is the base; everything else
/// is an aggregate of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Timeframe {
    M1,
    M2,
    M3,
    M5,
    M15,
    M30,
    H1,
    H4,
}

impl Timeframe {
    pub const ALL: [Timeframe; 8] = [
        Timeframe::M1,
        Timeframe::M2,
        Timeframe::M3,
        Timeframe::M5,
        Timeframe::M15,
        Timeframe::M30,
        Timeframe::H1,
        Timeframe::H4,
    ];

    /// Length of one candle in minutes.
    pub fn minutes(self) -> i64 {
        match self {
            Timeframe::M1 => 1,
            Timeframe::M2 => 2,
            Timeframe::M3 => 3,
            Timeframe::M5 => 5,
            Timeframe::M15 => 15,
            Timeframe::M30 => 30,
            Timeframe::H1 => 60,
            Timeframe::H4 => 240,
        }
    }

    /// Length of one candle in seconds.
    pub fn seconds(self) -> i64 {
        self.minutes() * 60
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Timeframe::M1 => "1m",
            Timeframe::M2 => "2m",
            Timeframe::M3 => "3m",
            Timeframe::M5 => "5m",
            Timeframe::M15 => "15m",
            Timeframe::M30 => "30m",
            Timeframe::H1 => "1h",
            Timeframe::H4 => "4h",
        }
    }

    pub fn parse(s: &str) -> Option<Timeframe> {
        Self::ALL.iter().copied().find(|tf| tf.as_str() == s)
    }
}

impl std::fmt::Display for Timeframe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Serialize for Timeframe {
    // Timeframes travel on the wire as their short string form ("5m"),
    // not as the Rust variant name, so the client never has to learn the
    // enum's internal spelling.
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Timeframe {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Timeframe::parse(&s).ok_or_else(|| serde::de::Error::custom(format!("unknown timeframe: {s}")))
    }
}

/// A user-generated "next candle" event, isolated from the historical
/// baseline. Never mutated once appended.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkipEvent {
    pub id: u64,
    pub time: i64,
    pub origin_timeframe: Timeframe,
    pub candle: Candle,
    pub created_at: i64,
}

/// Per-timeframe contamination level, derived from the skip count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContaminationLevel {
    Clean,
    Light,
    Moderate,
    Heavy,
}

impl ContaminationLevel {
    pub fn from_count(count: usize) -> Self {
        match count {
            0 => ContaminationLevel::Clean,
            1..=2 => ContaminationLevel::Light,
            3..=5 => ContaminationLevel::Moderate,
            _ => ContaminationLevel::Heavy,
        }
    }
}

/// The chart lifecycle's series state, tracked per session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChartSeriesState {
    Clean,
    DataLoaded,
    SkipModified,
    Corrupted,
    Transitioning,
}

/// Kind of user operation driving a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransitionKind {
    Goto,
    SwitchTf,
    Skip,
    AutoplayTick,
}

/// Phase of the 5-phase transition protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransitionPhase {
    Pre,
    Destruct,
    Load,
    Commit,
    Broadcast,
    Done,
    RolledBack,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeframe_round_trips_through_str() {
        for tf in Timeframe::ALL {
            assert_eq!(Timeframe::parse(tf.as_str()), Some(tf));
        }
    }

    #[test]
    fn timeframe_minutes_are_consistent_with_seconds() {
        for tf in Timeframe::ALL {
            assert_eq!(tf.seconds(), tf.minutes() * 60);
        }
    }

    #[test]
    fn unknown_timeframe_string_does_not_parse() {
        assert_eq!(Timeframe::parse("7m"), None);
    }

    #[test]
    fn contamination_level_thresholds() {
        assert_eq!(ContaminationLevel::from_count(0), ContaminationLevel::Clean);
        assert_eq!(ContaminationLevel::from_count(2), ContaminationLevel::Light);
        assert_eq!(ContaminationLevel::from_count(5), ContaminationLevel::Moderate);
        assert_eq!(ContaminationLevel::from_count(6), ContaminationLevel::Heavy);
    }

    #[test]
    fn candle_serializes_as_plain_scalars() {
        let c = Candle {
            time: 1700000000,
            open: 1.0,
            high: 2.0,
            low: 0.5,
            close: 1.5,
            volume: 10.0,
        };
        let json = serde_json::to_value(c).unwrap();
        assert!(json.is_object());
        assert!(json["time"].is_i64());
        assert!(json["volume"].is_f64() || json["volume"].is_i64());
    }
}
