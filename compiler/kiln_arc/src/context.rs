//! Per-function analysis context.

use kiln_ir::{ArcFunction, ArcVarId};

use crate::alias::{AliasAnalysis, RcIdentity, TrackedValue};
use crate::region::LoopRegionFunctionInfo;

/// Read-only inputs of one function's sequence dataflow.
///
/// Everything here outlives the dataflow that borrows it and is never
/// mutated while the analysis runs. A context is built per function and
/// dropped with its results; nothing is cached across functions.
#[derive(Clone, Copy)]
pub struct ArcContext<'a> {
    pub func: &'a ArcFunction,
    pub regions: &'a LoopRegionFunctionInfo,
    pub rc_identity: &'a dyn RcIdentity,
    pub alias: &'a dyn AliasAnalysis,
    /// Honor [`allows_leaks`](crate::region::LoopRegion::allows_leaks) when
    /// merging bottom-up states.
    pub allow_leaks: bool,
}

impl<'a> ArcContext<'a> {
    pub fn new(
        func: &'a ArcFunction,
        regions: &'a LoopRegionFunctionInfo,
        rc_identity: &'a dyn RcIdentity,
        alias: &'a dyn AliasAnalysis,
    ) -> Self {
        Self {
            func,
            regions,
            rc_identity,
            alias,
            allow_leaks: true,
        }
    }

    #[must_use]
    pub fn with_allow_leaks(mut self, allow: bool) -> Self {
        self.allow_leaks = allow;
        self
    }

    #[inline]
    pub fn identity(&self, value: ArcVarId) -> TrackedValue {
        self.rc_identity.rc_identity(value)
    }

    #[inline]
    pub fn needs_rc(&self, value: ArcVarId) -> bool {
        self.func.needs_rc(value)
    }
}
