//! Loading progress of a workspace.
//!
//! A load cycle walks the phases `initial → loading-critical → ready →
//! background-loading → complete`. Within one cycle the phase only moves
//! forward and the percentage never decreases; updates stamped with an older
//! cycle generation are rejected.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LoadPhase {
    Initial,
    /// Only the target image is being fetched.
    LoadingCritical,
    /// The target image was attempted; the workspace is usable.
    Ready,
    BackgroundLoading,
    Complete,
}

impl LoadPhase {
    /// Phases reachable directly from `self`.
    ///
    /// `initial → ready` covers a job without images, and `ready →
    /// complete` a job whose only image was the target.
    pub fn valid_transitions(self) -> &'static [LoadPhase] {
        match self {
            Self::Initial => &[Self::LoadingCritical, Self::Ready],
            Self::LoadingCritical => &[Self::Ready],
            Self::Ready => &[Self::BackgroundLoading, Self::Complete],
            Self::BackgroundLoading => &[Self::Complete],
            Self::Complete => &[],
        }
    }

    pub fn can_transition(self, to: LoadPhase) -> bool {
        self.valid_transitions().contains(&to)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initial => "initial",
            Self::LoadingCritical => "loading-critical",
            Self::Ready => "ready",
            Self::BackgroundLoading => "background-loading",
            Self::Complete => "complete",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadingProgress {
    pub phase: LoadPhase,
    pub current: usize,
    pub total: usize,
    pub percentage: u8,
    /// Human-readable description of the current step.
    pub step: String,
}

impl LoadingProgress {
    pub fn initial() -> Self {
        Self {
            phase: LoadPhase::Initial,
            current: 0,
            total: 0,
            percentage: 0,
            step: "Waiting for job".to_string(),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.phase >= LoadPhase::Ready
    }
}

impl Default for LoadingProgress {
    fn default() -> Self {
        Self::initial()
    }
}

/// Completion percentage, clamped to `0..=100`. Nothing to do counts as done.
pub fn percentage(current: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    let pct = current.min(total) * 100 / total;
    pct as u8
}

/// Owns the progress of the current cycle and guards its invariants.
#[derive(Debug, Clone, Default)]
pub struct ProgressTracker {
    generation: u64,
    progress: LoadingProgress,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new cycle, resetting progress to `initial`. Returns the new
    /// generation; updates carrying any earlier one are ignored from now on.
    pub fn begin_cycle(&mut self) -> u64 {
        self.generation += 1;
        self.progress = LoadingProgress::initial();
        self.generation
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_current(&self, generation: u64) -> bool {
        generation == self.generation
    }

    pub fn snapshot(&self) -> &LoadingProgress {
        &self.progress
    }

    /// Move to `phase`. Returns `false` when the update is stale or the
    /// transition would not move forward.
    pub fn advance(&mut self, generation: u64, phase: LoadPhase, step: impl Into<String>) -> bool {
        if !self.is_current(generation) || !self.progress.phase.can_transition(phase) {
            return false;
        }
        self.progress.phase = phase;
        self.progress.step = step.into();
        if phase == LoadPhase::Complete {
            self.progress.current = self.progress.total;
            self.progress.percentage = 100;
        }
        true
    }

    /// Report `current` of `total` items done in the current phase.
    pub fn report(&mut self, generation: u64, current: usize, total: usize, step: impl Into<String>) -> bool {
        if !self.is_current(generation) || self.progress.phase == LoadPhase::Complete {
            return false;
        }
        self.progress.current = current.min(total);
        self.progress.total = total;
        self.progress.percentage = self.progress.percentage.max(percentage(current, total));
        self.progress.step = step.into();
        true
    }

    /// Keep the phase but explain why the cycle stopped.
    pub fn halt(&mut self, generation: u64, step: impl Into<String>) -> bool {
        if !self.is_current(generation) {
            return false;
        }
        self.progress.step = step.into();
        true
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    // -- percentage ---------------------------------------------------------

    #[test]
    fn percentage_of_empty_total_is_complete() {
        assert_eq!(percentage(0, 0), 100);
    }

    #[test]
    fn percentage_rounds_down_and_clamps() {
        assert_eq!(percentage(1, 3), 33);
        assert_eq!(percentage(5, 11), 45);
        assert_eq!(percentage(12, 11), 100);
    }

    // -- transitions --------------------------------------------------------

    #[test]
    fn phases_only_move_forward() {
        assert!(LoadPhase::Initial.can_transition(LoadPhase::LoadingCritical));
        assert!(LoadPhase::Ready.can_transition(LoadPhase::BackgroundLoading));
        assert!(!LoadPhase::Ready.can_transition(LoadPhase::LoadingCritical));
        assert!(!LoadPhase::Complete.can_transition(LoadPhase::Initial));
        assert!(LoadPhase::Complete.valid_transitions().is_empty());
    }

    #[test]
    fn phase_serializes_kebab_case() {
        let json = serde_json::to_value(LoadPhase::BackgroundLoading).unwrap();
        assert_eq!(json, "background-loading");
        assert_eq!(LoadPhase::LoadingCritical.as_str(), "loading-critical");
    }

    // -- tracker ------------------------------------------------------------

    #[test]
    fn tracker_walks_a_full_cycle() {
        let mut tracker = ProgressTracker::new();
        let cycle = tracker.begin_cycle();
        assert!(tracker.advance(cycle, LoadPhase::LoadingCritical, "Loading image"));
        assert!(tracker.advance(cycle, LoadPhase::Ready, "Ready"));
        assert_eq!(tracker.snapshot().percentage, 0);
        assert!(tracker.advance(cycle, LoadPhase::BackgroundLoading, "Loading"));
        assert!(tracker.report(cycle, 5, 11, "5 of 11"));
        assert!(tracker.advance(cycle, LoadPhase::Complete, "Done"));
        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.percentage, 100);
        assert_eq!(snapshot.current, 11);
    }

    #[test]
    fn backwards_transition_rejected() {
        let mut tracker = ProgressTracker::new();
        let cycle = tracker.begin_cycle();
        tracker.advance(cycle, LoadPhase::Ready, "Ready");
        assert!(!tracker.advance(cycle, LoadPhase::LoadingCritical, "again"));
        assert_eq!(tracker.snapshot().phase, LoadPhase::Ready);
    }

    #[test]
    fn percentage_never_decreases() {
        let mut tracker = ProgressTracker::new();
        let cycle = tracker.begin_cycle();
        tracker.advance(cycle, LoadPhase::Ready, "Ready");
        tracker.advance(cycle, LoadPhase::BackgroundLoading, "Loading");
        tracker.report(cycle, 6, 10, "");
        tracker.report(cycle, 3, 10, "");
        assert_eq!(tracker.snapshot().percentage, 60);
    }

    #[test]
    fn stale_generation_is_ignored() {
        let mut tracker = ProgressTracker::new();
        let old = tracker.begin_cycle();
        let new = tracker.begin_cycle();
        assert!(!tracker.advance(old, LoadPhase::LoadingCritical, "stale"));
        assert!(!tracker.report(old, 1, 1, "stale"));
        assert!(!tracker.halt(old, "stale"));
        assert!(tracker.advance(new, LoadPhase::LoadingCritical, "fresh"));
    }

    #[test]
    fn halt_keeps_phase() {
        let mut tracker = ProgressTracker::new();
        let cycle = tracker.begin_cycle();
        assert!(tracker.halt(cycle, "Failed to load job"));
        assert_eq!(tracker.snapshot().phase, LoadPhase::Initial);
        assert_eq!(tracker.snapshot().step, "Failed to load job");
    }

    #[test]
    fn new_cycle_resets_progress() {
        let mut tracker = ProgressTracker::new();
        let cycle = tracker.begin_cycle();
        tracker.advance(cycle, LoadPhase::Ready, "Ready");
        tracker.begin_cycle();
        assert_eq!(tracker.snapshot(), &LoadingProgress::initial());
    }
}
