//! Configuration for the ARC sequence optimizer.

use std::thread;

/// How a [`ConsumedArgToEpilogueReleaseMatcher`](crate::ConsumedArgToEpilogueReleaseMatcher)
/// treats its recorded results after construction.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "cache", derive(serde::Serialize, serde::Deserialize))]
pub enum MatcherMode {
    /// Results never change once recorded. Several consumers can rely on
    /// the same answer even if the dataflow is re-run underneath them.
    #[default]
    Frozen,
    /// Results may be recomputed with
    /// [`refresh`](crate::ConsumedArgToEpilogueReleaseMatcher::refresh).
    Live,
}

/// Options for [`analyze_module`](crate::analyze_module) and the dumper.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArcOptConfig {
    /// Number of worker threads (0 = rayon's global pool, 1 = serial).
    pub jobs: usize,
    /// Whether paths that only reach `unreachable` may drop releases
    /// without degrading the bottom-up state.
    pub allow_leaks: bool,
    /// Mode of the epilogue matchers handed out with the results.
    pub matcher_mode: MatcherMode,
}

impl Default for ArcOptConfig {
    fn default() -> Self {
        Self {
            jobs: 1,
            allow_leaks: true,
            matcher_mode: MatcherMode::Frozen,
        }
    }
}

impl ArcOptConfig {
    /// Create a configuration with the given job count.
    #[must_use]
    pub fn new(jobs: usize) -> Self {
        Self {
            jobs,
            ..Self::default()
        }
    }

    /// Analyze serially on the calling thread.
    #[must_use]
    pub fn serial() -> Self {
        Self::new(1)
    }

    /// Set whether leaking paths are tolerated.
    #[must_use]
    pub fn with_allow_leaks(mut self, allow: bool) -> Self {
        self.allow_leaks = allow;
        self
    }

    /// Set the epilogue matcher mode.
    #[must_use]
    pub fn with_matcher_mode(mut self, mode: MatcherMode) -> Self {
        self.matcher_mode = mode;
        self
    }

    /// Get the effective number of jobs.
    #[must_use]
    pub fn effective_jobs(&self) -> usize {
        if self.jobs == 0 {
            thread::available_parallelism()
                .map(std::num::NonZero::get)
                .unwrap_or(1)
        } else {
            self.jobs
        }
    }
}
