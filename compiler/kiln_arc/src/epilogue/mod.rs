//! Consumed-argument epilogue release matching.
//!
//! A function that takes a parameter `@owned` must release it exactly once
//! on every path out. This module finds those releases: after the
//! bottom-up pass, the epilogue state of each owned argument at the top of
//! the function's entry region is either `Matched(S)`, meaning the releases
//! in `S` are the final disposal of the argument on every path, or
//! anything else, meaning no such set exists.

use kiln_ir::{ArcVarId, InstrId, Ownership};

use crate::config::MatcherMode;
use crate::dataflow::LoopArcSequenceDataflow;
use crate::ref_count_state::{InstSet, RefCountLattice};

/// Outcome for one argument.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "cache", derive(serde::Serialize, serde::Deserialize))]
pub enum EpilogueMatch {
    /// These releases dispose of the argument on every exit path.
    Releases(InstSet),
    /// No safe answer. Consumers must not optimize based on this argument.
    NoMatch,
}

/// Epilogue releases of every parameter of one function.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConsumedArgToEpilogueReleaseMatcher {
    mode: MatcherMode,
    /// One entry per parameter, in parameter order.
    matches: Vec<(ArcVarId, EpilogueMatch)>,
}

impl ConsumedArgToEpilogueReleaseMatcher {
    /// Read the results of a completed dataflow run.
    pub fn new(dataflow: &LoopArcSequenceDataflow<'_>, mode: MatcherMode) -> Self {
        Self {
            mode,
            matches: Self::compute(dataflow),
        }
    }

    fn compute(dataflow: &LoopArcSequenceDataflow<'_>) -> Vec<(ArcVarId, EpilogueMatch)> {
        let ctx = dataflow.context();
        ctx.func
            .params
            .iter()
            .map(|param| {
                let outcome = if param.ownership == Ownership::Owned && ctx.needs_rc(param.var) {
                    match dataflow
                        .epilogue_release_state(ctx.identity(param.var))
                        .and_then(|state| state.state().insts())
                    {
                        Some(releases) if !releases.is_empty() => {
                            EpilogueMatch::Releases(releases.clone())
                        }
                        _ => EpilogueMatch::NoMatch,
                    }
                } else {
                    EpilogueMatch::NoMatch
                };
                (param.var, outcome)
            })
            .collect()
    }

    pub fn mode(&self) -> MatcherMode {
        self.mode
    }

    /// The releases that dispose of `arg`, in program order. Empty if there
    /// is no match or `arg` is not a parameter.
    pub fn releases_for_argument(&self, arg: ArcVarId) -> &[InstrId] {
        match self.lookup(arg) {
            Some(EpilogueMatch::Releases(set)) => set.as_slice(),
            Some(EpilogueMatch::NoMatch) | None => &[],
        }
    }

    pub fn has_match(&self, arg: ArcVarId) -> bool {
        matches!(self.lookup(arg), Some(EpilogueMatch::Releases(_)))
    }

    /// The argument `release` is an epilogue release of, if any.
    pub fn argument_for_release(&self, release: InstrId) -> Option<ArcVarId> {
        self.matches.iter().find_map(|(arg, outcome)| match outcome {
            EpilogueMatch::Releases(set) if set.contains(release) => Some(*arg),
            _ => None,
        })
    }

    /// Parameters that have at least one epilogue release, in parameter
    /// order.
    pub fn matched_arguments(&self) -> impl Iterator<Item = (ArcVarId, &[InstrId])> + '_ {
        self.matches.iter().filter_map(|(arg, outcome)| match outcome {
            EpilogueMatch::Releases(set) => Some((*arg, set.as_slice())),
            EpilogueMatch::NoMatch => None,
        })
    }

    /// Recompute from `dataflow` (normally re-run after the function
    /// changed). A frozen matcher ignores the request.
    ///
    /// Returns `true` if any result changed.
    pub fn refresh(&mut self, dataflow: &LoopArcSequenceDataflow<'_>) -> bool {
        match self.mode {
            MatcherMode::Frozen => {
                tracing::debug!("epilogue matcher is frozen; refresh ignored");
                false
            }
            MatcherMode::Live => {
                let fresh = Self::compute(dataflow);
                let changed = fresh != self.matches;
                self.matches = fresh;
                changed
            }
        }
    }

    fn lookup(&self, arg: ArcVarId) -> Option<&EpilogueMatch> {
        self.matches
            .iter()
            .find(|(var, _)| *var == arg)
            .map(|(_, outcome)| outcome)
    }
}
