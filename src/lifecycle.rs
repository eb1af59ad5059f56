/// Tracks per-session chart contamination and decides when the client must
/// destroy and re-create its chart series (spec §4.6).
///
/// Grounded in the `PlaybackMode`/`CursorRole` state-machine enums used for
/// session/cursor state elsewhere in the retrieved corpus
/// (`flyingrobots-echo`'s `playback` module): an explicit enum plus a
/// struct that owns the mutation methods, instead of ad-hoc string flags.
use crate::model::ChartSeriesState;

pub struct LifecycleManager {
    state: ChartSeriesState,
    skip_ops_since_clean: u32,
    version: u32,
}

impl LifecycleManager {
    pub fn new() -> Self {
        LifecycleManager {
            state: ChartSeriesState::Clean,
            skip_ops_since_clean: 0,
            version: 0,
        }
    }

    pub fn state(&self) -> ChartSeriesState {
        self.state
    }

    pub fn skip_ops_since_clean(&self) -> u32 {
        self.skip_ops_since_clean
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    /// Records a skip: increments the counter and moves Clean or
    /// DataLoaded into SkipModified.
    pub fn track_skip(&mut self) {
        self.skip_ops_since_clean += 1;
        if matches!(self.state, ChartSeriesState::Clean | ChartSeriesState::DataLoaded) {
            self.state = ChartSeriesState::SkipModified;
        }
    }

    /// Whether the upcoming transition needs the client to destroy and
    /// rebuild its chart series.
    pub fn needs_recreation(&self) -> bool {
        self.skip_ops_since_clean > 0 || self.state == ChartSeriesState::Corrupted
    }

    pub fn begin_transition(&mut self) {
        self.state = ChartSeriesState::Transitioning;
    }

    /// On success: moves to DataLoaded; if recreation happened, resets the
    /// skip counter and bumps `version`. On failure: moves to Corrupted.
    pub fn complete(&mut self, success: bool, recreation_performed: bool) {
        if success {
            self.state = ChartSeriesState::DataLoaded;
            if recreation_performed {
                self.skip_ops_since_clean = 0;
                self.version += 1;
            }
        } else {
            self.state = ChartSeriesState::Corrupted;
        }
    }
}

impl Default for LifecycleManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_manager_starts_clean_and_needs_no_recreation() {
        let lm = LifecycleManager::new();
        assert_eq!(lm.state(), ChartSeriesState::Clean);
        assert!(!lm.needs_recreation());
    }

    #[test]
    fn track_skip_moves_clean_to_skip_modified_and_needs_recreation() {
        let mut lm = LifecycleManager::new();
        lm.track_skip();
        assert_eq!(lm.state(), ChartSeriesState::SkipModified);
        assert!(lm.needs_recreation());
    }

    #[test]
    fn complete_success_with_recreation_resets_counter_and_bumps_version() {
        let mut lm = LifecycleManager::new();
        lm.track_skip();
        lm.track_skip();
        lm.begin_transition();
        lm.complete(true, true);
        assert_eq!(lm.state(), ChartSeriesState::DataLoaded);
        assert_eq!(lm.skip_ops_since_clean(), 0);
        assert_eq!(lm.version(), 1);
    }

    #[test]
    fn complete_success_without_recreation_keeps_counter() {
        let mut lm = LifecycleManager::new();
        lm.begin_transition();
        lm.complete(true, false);
        assert_eq!(lm.state(), ChartSeriesState::DataLoaded);
        assert_eq!(lm.skip_ops_since_clean(), 0);
    }

    #[test]
    fn failed_transition_moves_to_corrupted_and_then_forces_recreation() {
        let mut lm = LifecycleManager::new();
        lm.begin_transition();
        lm.complete(false, false);
        assert_eq!(lm.state(), ChartSeriesState::Corrupted);
        assert!(lm.needs_recreation());
    }
}
