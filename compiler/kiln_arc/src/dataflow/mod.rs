//! Region-based retain/release sequence dataflow.
//!
//! Three single passes over the loop region hierarchy, no fixpoint:
//!
//! 1. **Summarize**: regions in post-order; each loop collects the
//!    ARC-relevant sites of its children.
//! 2. **Top-down**: for every scope (loops innermost first, then the
//!    function), its children in reverse postorder. Each child merges its
//!    predecessors' exit states, then runs the transfer functions (blocks)
//!    or applies its summary (loops). A release that finds an outstanding
//!    retain of the same object lands in `dec_to_inc`.
//! 3. **Bottom-up**: the mirror, children in post-order, merging
//!    successors. A retain that finds an outstanding release lands in
//!    `inc_to_dec`. At function scope this pass also tracks the epilogue
//!    release of every consumed argument.
//!
//! Every region is visited once per pass regardless of loop trip counts.
//! A loop header starts each pass with no state, so matches found inside a
//! loop scope never span iterations.

use std::mem;

use rustc_hash::FxHashSet;
use smallvec::SmallVec;

use kiln_ir::{ArcFunction, InstrId, Ownership};

use crate::alias::{is_arc_relevant, TrackedValue};
use crate::blot_map::BlotMapVector;
use crate::context::ArcContext;
use crate::ref_count_state::{
    merge_edges, BottomUpRefCountState, InstSet, MergeEdge, TopDownRefCountState,
};
use crate::region::{LoopRegion, LoopRegionFunctionInfo, RegionId};
use crate::region_state::{ArcRegionState, BottomUpMap};

/// Release → top-down state that matched it.
pub type DecToIncStateMap = BlotMapVector<InstrId, TopDownRefCountState>;
/// Retain → bottom-up state that matched it.
pub type IncToDecStateMap = BlotMapVector<InstrId, BottomUpRefCountState>;

/// A group of retains and releases both directions agree pair up exactly.
/// The rewrite pass may delete all of them together.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "cache", derive(serde::Serialize, serde::Deserialize))]
pub struct MatchingSet {
    pub increments: InstSet,
    pub decrements: InstSet,
}

/// Sequence dataflow driver for one function.
pub struct LoopArcSequenceDataflow<'a> {
    ctx: ArcContext<'a>,
    /// Indexed by `RegionId::index()`.
    states: Vec<ArcRegionState>,
    dec_to_inc: DecToIncStateMap,
    inc_to_dec: IncToDecStateMap,
    /// RC identities of owned, reference-counted parameters.
    epilogue_args: Vec<TrackedValue>,
    found_nested_retain: bool,
    found_nested_release: bool,
    ran: bool,
}

impl<'a> LoopArcSequenceDataflow<'a> {
    /// Create the driver and one region state per region.
    pub fn new(ctx: ArcContext<'a>) -> Self {
        let states = ctx.regions.iter().map(ArcRegionState::new).collect();
        let mut epilogue_args = Vec::new();
        for param in &ctx.func.params {
            if param.ownership == Ownership::Owned && ctx.needs_rc(param.var) {
                let tracked = ctx.identity(param.var);
                if !epilogue_args.contains(&tracked) {
                    epilogue_args.push(tracked);
                }
            }
        }
        Self {
            ctx,
            states,
            dec_to_inc: BlotMapVector::new(),
            inc_to_dec: BlotMapVector::new(),
            epilogue_args,
            found_nested_retain: false,
            found_nested_release: false,
            ran: false,
        }
    }

    /// Run all three passes.
    pub fn run(&mut self) {
        if self.ran {
            self.reset();
        }
        self.ran = true;
        self.summarize_loops();
        self.run_top_down();
        self.run_bottom_up();
        tracing::debug!(
            function = ?self.ctx.func.name,
            regions = self.states.len(),
            released = self.dec_to_inc.len(),
            retained = self.inc_to_dec.len(),
            nested_retain = self.found_nested_retain,
            nested_release = self.found_nested_release,
            "ARC sequence dataflow finished"
        );
    }

    /// Pass 1: compute every loop's summary, inner loops first.
    pub fn summarize_loops(&mut self) {
        let regions = self.ctx.regions;
        for region in regions.iter() {
            if !region.is_loop() {
                continue;
            }
            let mut sites = Vec::new();
            for &child in region.children() {
                let child_region = regions.region(child);
                match child_region.block() {
                    Some(block_id) => {
                        let block = self.ctx.func.block(block_id);
                        sites.extend(block.instr_ids().filter(|&id| {
                            block
                                .instr_at(id.index)
                                .is_some_and(|inst| is_arc_relevant(inst, self.ctx.func))
                        }));
                    }
                    None => sites.extend_from_slice(
                        self.states[child.index()].summarized_interesting_insts(),
                    ),
                }
            }
            tracing::trace!(region = %region.id(), sites = sites.len(), "summarized loop");
            self.states[region.id().index()].summarize(sites);
        }
    }

    /// Pass 2. Returns `true` if a nested retain was seen.
    pub fn run_top_down(&mut self) -> bool {
        let regions = self.ctx.regions;
        let func = self.ctx.func;
        let mut nested = false;
        for &scope in regions.scopes() {
            for &child in regions.region(scope).children() {
                self.merge_top_down(child);
                let region = regions.region(child);
                let state = &mut self.states[child.index()];
                match region.block() {
                    Some(block) => {
                        nested |= state.process_block_top_down(
                            func.block(block),
                            &self.ctx,
                            &mut self.dec_to_inc,
                        );
                    }
                    None => state.process_loop_top_down(&self.ctx),
                }
            }
        }
        self.found_nested_retain |= nested;
        nested
    }

    /// Pass 3. Returns `true` if a nested release was seen.
    pub fn run_bottom_up(&mut self) -> bool {
        let regions = self.ctx.regions;
        let func = self.ctx.func;
        let function = regions.function_region();
        let mut nested = false;
        for &scope in regions.scopes() {
            let at_function_scope = scope == function;
            for &child in regions.region(scope).children().iter().rev() {
                self.merge_bottom_up(child, at_function_scope);
                let region = regions.region(child);
                let epilogue_args: &[TrackedValue] = if at_function_scope {
                    &self.epilogue_args
                } else {
                    &[]
                };
                let state = &mut self.states[child.index()];
                match region.block() {
                    Some(block) => {
                        nested |= state.process_block_bottom_up(
                            func.block(block),
                            &self.ctx,
                            &mut self.inc_to_dec,
                            epilogue_args,
                        );
                    }
                    None => state.process_loop_bottom_up(&self.ctx, epilogue_args),
                }
            }
        }
        self.found_nested_release |= nested;
        nested
    }

    /// Replace `child`'s top-down state with the meet of its predecessors'.
    fn merge_top_down(&mut self, child: RegionId) {
        let regions = self.ctx.regions;
        let region = regions.region(child);
        let mut merged = mem::take(self.states[child.index()].top_down_state_mut());
        {
            let mut edges: SmallVec<[MergeEdge<'_, TopDownRefCountState>; 4]> = region
                .preds()
                .iter()
                .map(|pred| MergeEdge::new(self.states[pred.index()].top_down_state()))
                .collect();
            if region.has_nonlocal_preds() {
                edges.push(MergeEdge::nonlocal(false));
            }
            merge_edges(&edges, &mut merged);
        }
        *self.states[child.index()].top_down_state_mut() = merged;
    }

    /// Replace `child`'s bottom-up state (and, at function scope, its
    /// epilogue state) with the meet of its successors'.
    fn merge_bottom_up(&mut self, child: RegionId, with_epilogue: bool) {
        let regions = self.ctx.regions;
        let allow_leaks = self.ctx.allow_leaks;
        let region = regions.region(child);

        let mut merged = mem::take(self.states[child.index()].bottom_up_state_mut());
        merge_edges(
            &bottom_up_edges(
                region,
                regions,
                &self.states,
                ArcRegionState::bottom_up_state,
                allow_leaks,
            ),
            &mut merged,
        );
        *self.states[child.index()].bottom_up_state_mut() = merged;

        if with_epilogue {
            let mut merged = mem::take(self.states[child.index()].epilogue_state_mut());
            merge_edges(
                &bottom_up_edges(
                    region,
                    regions,
                    &self.states,
                    ArcRegionState::epilogue_state,
                    allow_leaks,
                ),
                &mut merged,
            );
            *self.states[child.index()].epilogue_state_mut() = merged;
        }
    }

    /// Forget every region state and both output maps, keeping their
    /// allocations, so the driver can run again.
    pub fn reset(&mut self) {
        for state in &mut self.states {
            state.clear();
        }
        self.dec_to_inc.clear();
        self.inc_to_dec.clear();
        self.found_nested_retain = false;
        self.found_nested_release = false;
        self.ran = false;
    }

    // ── Results ─────────────────────────────────────────────────────

    pub fn function(&self) -> &'a ArcFunction {
        self.ctx.func
    }

    pub fn context(&self) -> &ArcContext<'a> {
        &self.ctx
    }

    pub fn region_state(&self, region: RegionId) -> &ArcRegionState {
        &self.states[region.index()]
    }

    /// Release → the top-down state that matched it to its retains.
    pub fn dec_to_inc_state_map(&self) -> &DecToIncStateMap {
        &self.dec_to_inc
    }

    /// Retain → the bottom-up state that matched it to its releases.
    pub fn inc_to_dec_state_map(&self) -> &IncToDecStateMap {
        &self.inc_to_dec
    }

    /// RC identities of the arguments whose epilogue releases are tracked.
    pub fn epilogue_arguments(&self) -> &[TrackedValue] {
        &self.epilogue_args
    }

    /// Epilogue state of `arg` at the top of the function's entry region.
    pub fn epilogue_release_state(&self, arg: TrackedValue) -> Option<&BottomUpRefCountState> {
        self.states[self.ctx.regions.entry_region().index()]
            .epilogue_state()
            .get(&arg)
    }

    pub fn found_nested_retain(&self) -> bool {
        self.found_nested_retain
    }

    pub fn found_nested_release(&self) -> bool {
        self.found_nested_release
    }

    /// Groups on which both output maps agree.
    pub fn matching_sets(&self) -> Vec<MatchingSet> {
        matching_sets(&self.dec_to_inc, &self.inc_to_dec)
    }

    /// Give up the driver, keeping the two output maps.
    pub fn into_maps(self) -> (DecToIncStateMap, IncToDecStateMap) {
        (self.dec_to_inc, self.inc_to_dec)
    }
}

/// Incoming edges of `region` for a bottom-up merge. Successors that only
/// lead to program termination contribute nothing for absent pointers.
fn bottom_up_edges<'s>(
    region: &LoopRegion,
    regions: &LoopRegionFunctionInfo,
    states: &'s [ArcRegionState],
    select: fn(&ArcRegionState) -> &BottomUpMap,
    allow_leaks: bool,
) -> SmallVec<[MergeEdge<'s, BottomUpRefCountState>; 4]> {
    let mut edges: SmallVec<[MergeEdge<'s, BottomUpRefCountState>; 4]> = region
        .succs()
        .iter()
        .map(|succ| {
            MergeEdge::new(select(&states[succ.index()]))
                .with_allows_leaks(allow_leaks && regions.region(*succ).allows_leaks())
        })
        .collect();
    edges.extend(
        region
            .nonlocal_succs()
            .iter()
            .map(|edge| MergeEdge::nonlocal(allow_leaks && edge.allows_leaks)),
    );
    edges
}

/// Pair up the two output maps.
///
/// A group `(I, D)` is reported when every retain in `I` maps to exactly
/// `D` bottom-up and every release in `D` maps to exactly `I` top-down.
/// Groups appear in the order their first retain was recorded.
pub fn matching_sets(
    dec_to_inc: &DecToIncStateMap,
    inc_to_dec: &IncToDecStateMap,
) -> Vec<MatchingSet> {
    let mut groups = Vec::new();
    let mut seen: FxHashSet<InstrId> = FxHashSet::default();
    for (&inc, state) in inc_to_dec.iter() {
        if seen.contains(&inc) {
            continue;
        }
        let Some(decrements) = state.decrements() else {
            continue;
        };
        let Some(first_dec) = decrements.iter().next() else {
            continue;
        };
        let Some(increments) = dec_to_inc
            .get(&first_dec)
            .and_then(TopDownRefCountState::increments)
        else {
            continue;
        };
        if !increments.contains(inc) {
            continue;
        }
        seen.extend(increments.iter());
        let agrees = increments.iter().all(|i| {
            inc_to_dec
                .get(&i)
                .and_then(BottomUpRefCountState::decrements)
                == Some(decrements)
        }) && decrements.iter().all(|d| {
            dec_to_inc
                .get(&d)
                .and_then(TopDownRefCountState::increments)
                == Some(increments)
        });
        if agrees {
            groups.push(MatchingSet {
                increments: increments.clone(),
                decrements: decrements.clone(),
            });
        }
    }
    groups
}
