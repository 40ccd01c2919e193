//! ARC sequence optimization analysis for the Kiln optimizer.
//!
//! Earlier lowering inserts an `RcInc`/`RcDec` around every use of a
//! reference-counted value. This crate finds which of those operations are
//! redundant and which releases dispose of the arguments a function owns:
//!
//! - **Region hierarchy** ([`LoopRegionFunctionInfo`]): blocks and natural
//!   loops as a tree, so the dataflow can treat a loop as one node.
//!
//! - **Reference-count lattice** ([`RefCountState`],
//!   [`TopDownRefCountState`], [`BottomUpRefCountState`]): per-object
//!   `Top` / `Matched(instructions)` / `Unknown` states with a strict meet.
//!
//! - **Sequence dataflow** ([`LoopArcSequenceDataflow`]): summarize loops,
//!   one top-down pass, one bottom-up pass. Produces the release→retain and
//!   retain→release maps consumed by the rewrite pass.
//!
//! - **Epilogue matching** ([`ConsumedArgToEpilogueReleaseMatcher`]): the
//!   final release of each `@owned` argument on every path.
//!
//! - **Drivers** ([`analyze_function`], [`analyze_module`],
//!   [`dump_epilogue_releases`]).
//!
//! # Design
//!
//! No loop is ever iterated to a fixpoint. A loop is analyzed once as its
//! own scope (its header starts with no state), and once more as a black
//! box inside its parent: every object any ARC-relevant site in the loop
//! could touch becomes `Unknown`. This loses matches across loop
//! boundaries but never reports a false one.
//!
//! Region states are erased by tombstoning ([`BlotMapVector`]) so entries
//! can be dropped while a pass is walking the map.

use std::sync::Once;

pub mod alias;
pub mod blot_map;
mod config;
mod context;
pub mod dataflow;
pub mod dump;
pub mod epilogue;
pub(crate) mod graph;
pub mod pipeline;
pub mod ref_count_state;
pub mod region;
pub mod region_state;

#[cfg(test)]
mod test_helpers;
#[cfg(test)]
mod tests;

pub use alias::{
    AliasAnalysis, BasicAliasAnalysis, RcIdentity, RcIdentityFunctionInfo, TrackedValue,
};
pub use blot_map::BlotMapVector;
pub use config::{ArcOptConfig, MatcherMode};
pub use context::ArcContext;
pub use dataflow::{
    matching_sets, DecToIncStateMap, IncToDecStateMap, LoopArcSequenceDataflow, MatchingSet,
};
pub use dump::{dump_epilogue_releases, dump_function_epilogue_releases};
pub use epilogue::{ConsumedArgToEpilogueReleaseMatcher, EpilogueMatch};
pub use graph::DominatorTree;
pub use pipeline::{analyze_function, analyze_module, FunctionArcResults, PipelineError};
pub use ref_count_state::{
    BottomUpRefCountState, InstSet, RefCountLattice, RefCountState, TopDownRefCountState,
};
pub use region::{
    LoopRegion, LoopRegionFunctionInfo, NonLocalSucc, RegionError, RegionId, RegionKind,
};
pub use region_state::ArcRegionState;

static TRACING_INIT: Once = Once::new();

/// Initialize tracing for debug output.
///
/// Call this once at startup. Safe to call multiple times.
/// Enable with `RUST_LOG=kiln_arc=debug` or `RUST_LOG=kiln_arc=trace`.
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        use tracing_subscriber::{fmt, prelude::*, EnvFilter};

        // Only initialize if RUST_LOG is set
        if std::env::var("RUST_LOG").is_ok() {
            let filter = EnvFilter::from_default_env();
            tracing_subscriber::registry()
                .with(fmt::layer().with_target(true).with_level(true))
                .with(filter)
                .init();
        }
    });
}
