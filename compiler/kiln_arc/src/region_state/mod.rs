//! Per-region dataflow state.
//!
//! One [`ArcRegionState`] exists for every region of the hierarchy during a
//! run. It holds the state flowing *out* of its region in each direction:
//! for top-down, the state at the region's exit; for bottom-up, the state
//! at its entry. Neighbouring regions merge from these maps.
//!
//! Block regions apply the transfer functions instruction by instruction.
//! Loop regions apply their summary: a flow-insensitive list of every
//! ARC-relevant site inside the loop. Applying it can only move tracked
//! pointers to `Unknown`, never create a match.

use kiln_ir::{ArcBlock, ArcInstr, InstrId, InstrRef};

use crate::alias::{interferes, touches, uses_identity, TrackedValue};
use crate::blot_map::BlotMapVector;
use crate::context::ArcContext;
use crate::ref_count_state::{BottomUpRefCountState, RefCountLattice, TopDownRefCountState};
use crate::region::{LoopRegion, RegionId, RegionKind};

/// Top-down states keyed by tracked object.
pub type TopDownMap = BlotMapVector<TrackedValue, TopDownRefCountState>;
/// Bottom-up states keyed by tracked object.
pub type BottomUpMap = BlotMapVector<TrackedValue, BottomUpRefCountState>;

/// Dataflow state of one region.
#[derive(Clone, Debug)]
pub struct ArcRegionState {
    region: RegionId,
    kind: RegionKind,
    allows_leaks: bool,
    top_down: TopDownMap,
    bottom_up: BottomUpMap,
    /// Final-release tracking for consumed arguments. Only maintained for
    /// children of the function region.
    epilogue: BottomUpMap,
    /// Loops only: every ARC-relevant site inside, sorted.
    summarized_interesting_insts: Vec<InstrId>,
}

impl ArcRegionState {
    pub fn new(region: &LoopRegion) -> Self {
        Self {
            region: region.id(),
            kind: region.kind(),
            allows_leaks: region.allows_leaks(),
            top_down: BlotMapVector::new(),
            bottom_up: BlotMapVector::new(),
            epilogue: BlotMapVector::new(),
            summarized_interesting_insts: Vec::new(),
        }
    }

    pub fn region(&self) -> RegionId {
        self.region
    }

    pub fn kind(&self) -> RegionKind {
        self.kind
    }

    pub fn allows_leaks(&self) -> bool {
        self.allows_leaks
    }

    pub fn top_down_state(&self) -> &TopDownMap {
        &self.top_down
    }

    pub fn bottom_up_state(&self) -> &BottomUpMap {
        &self.bottom_up
    }

    pub fn epilogue_state(&self) -> &BottomUpMap {
        &self.epilogue
    }

    pub(crate) fn top_down_state_mut(&mut self) -> &mut TopDownMap {
        &mut self.top_down
    }

    pub(crate) fn bottom_up_state_mut(&mut self) -> &mut BottomUpMap {
        &mut self.bottom_up
    }

    pub(crate) fn epilogue_state_mut(&mut self) -> &mut BottomUpMap {
        &mut self.epilogue
    }

    pub fn summarized_interesting_insts(&self) -> &[InstrId] {
        &self.summarized_interesting_insts
    }

    /// Record the loop summary. Sites are sorted and deduplicated.
    pub fn summarize(&mut self, mut insts: Vec<InstrId>) {
        debug_assert!(
            self.kind == RegionKind::Loop,
            "only loop regions are summarized ({})",
            self.region
        );
        insts.sort_unstable();
        insts.dedup();
        self.summarized_interesting_insts = insts;
    }

    /// Forget all state, keeping allocations.
    pub fn clear(&mut self) {
        self.top_down.clear();
        self.bottom_up.clear();
        self.epilogue.clear();
        self.summarized_interesting_insts.clear();
    }

    // ── Top-down ────────────────────────────────────────────────────

    /// Run the top-down transfer functions over `block` in program order.
    ///
    /// Completed matches are recorded in `dec_to_inc`. Returns `true` if a
    /// nested retain was seen.
    pub fn process_block_top_down(
        &mut self,
        block: &ArcBlock,
        ctx: &ArcContext<'_>,
        dec_to_inc: &mut BlotMapVector<InstrId, TopDownRefCountState>,
    ) -> bool {
        debug_assert_eq!(self.kind, RegionKind::Block);
        let mut nested = false;
        for id in block.instr_ids() {
            if let Some(inst) = block.instr_at(id.index) {
                nested |= self.top_down_step(id, inst, ctx, dec_to_inc);
            }
        }
        nested
    }

    fn top_down_step(
        &mut self,
        id: InstrId,
        inst: InstrRef<'_>,
        ctx: &ArcContext<'_>,
        dec_to_inc: &mut BlotMapVector<InstrId, TopDownRefCountState>,
    ) -> bool {
        match inst {
            InstrRef::Instr(ArcInstr::RcInc { var }) if ctx.needs_rc(*var) => {
                let tracked = ctx.identity(*var);
                let nested = self
                    .top_down
                    .get_or_insert_with(tracked, TopDownRefCountState::default)
                    .init_with_increment(id);
                if nested {
                    tracing::trace!(%id, %tracked, "top-down: nested retain");
                }
                nested
            }
            InstrRef::Instr(ArcInstr::RcDec { var }) if ctx.needs_rc(*var) => {
                let tracked = ctx.identity(*var);
                if let Some(matched) = self
                    .top_down
                    .get(&tracked)
                    .and_then(TopDownRefCountState::match_decrement)
                {
                    tracing::trace!(%id, %tracked, state = %matched.state(), "top-down: matched release");
                    dec_to_inc.insert(id, matched);
                    self.top_down.blot(&tracked);
                }
                for (&other, state) in self.top_down.iter_mut() {
                    if other != tracked && ctx.alias.may_alias(*var, other.root()) {
                        state.invalidate();
                    }
                }
                false
            }
            _ => {
                invalidate_interfering(&mut self.top_down, inst, ctx);
                false
            }
        }
    }

    /// Apply this loop's summary to the top-down state.
    pub fn process_loop_top_down(&mut self, ctx: &ArcContext<'_>) {
        debug_assert_eq!(self.kind, RegionKind::Loop);
        apply_summary(&mut self.top_down, &self.summarized_interesting_insts, ctx);
    }

    // ── Bottom-up ───────────────────────────────────────────────────

    /// Run the bottom-up transfer functions over `block` in reverse order.
    ///
    /// Completed matches are recorded in `inc_to_dec`. `epilogue_args` is
    /// non-empty only when the block is a direct child of the function
    /// region. Returns `true` if a nested release was seen.
    pub fn process_block_bottom_up(
        &mut self,
        block: &ArcBlock,
        ctx: &ArcContext<'_>,
        inc_to_dec: &mut BlotMapVector<InstrId, BottomUpRefCountState>,
        epilogue_args: &[TrackedValue],
    ) -> bool {
        debug_assert_eq!(self.kind, RegionKind::Block);
        let mut nested = false;
        for id in block.instr_ids().rev() {
            if let Some(inst) = block.instr_at(id.index) {
                self.epilogue_step(id, inst, ctx, epilogue_args);
                nested |= self.bottom_up_step(id, inst, ctx, inc_to_dec);
            }
        }
        nested
    }

    fn bottom_up_step(
        &mut self,
        id: InstrId,
        inst: InstrRef<'_>,
        ctx: &ArcContext<'_>,
        inc_to_dec: &mut BlotMapVector<InstrId, BottomUpRefCountState>,
    ) -> bool {
        match inst {
            InstrRef::Instr(ArcInstr::RcDec { var }) if ctx.needs_rc(*var) => {
                let tracked = ctx.identity(*var);
                for (&other, state) in self.bottom_up.iter_mut() {
                    if other != tracked && ctx.alias.may_alias(*var, other.root()) {
                        state.invalidate();
                    }
                }
                let nested = self
                    .bottom_up
                    .get_or_insert_with(tracked, BottomUpRefCountState::default)
                    .init_with_decrement(id);
                if nested {
                    tracing::trace!(%id, %tracked, "bottom-up: nested release");
                }
                nested
            }
            InstrRef::Instr(ArcInstr::RcInc { var }) if ctx.needs_rc(*var) => {
                let tracked = ctx.identity(*var);
                if let Some(matched) = self
                    .bottom_up
                    .get(&tracked)
                    .and_then(BottomUpRefCountState::match_increment)
                {
                    tracing::trace!(%id, %tracked, state = %matched.state(), "bottom-up: matched retain");
                    inc_to_dec.insert(id, matched);
                    self.bottom_up.blot(&tracked);
                }
                false
            }
            _ => {
                invalidate_interfering(&mut self.bottom_up, inst, ctx);
                false
            }
        }
    }

    /// Walking backward, the first release of a consumed argument is its
    /// epilogue release; any earlier-seen use of the argument spoils it.
    /// Once an argument has a state it no longer changes within the block.
    fn epilogue_step(
        &mut self,
        id: InstrId,
        inst: InstrRef<'_>,
        ctx: &ArcContext<'_>,
        epilogue_args: &[TrackedValue],
    ) {
        for &arg in epilogue_args {
            if self.epilogue.contains_key(&arg) {
                continue;
            }
            match inst {
                InstrRef::Instr(ArcInstr::RcDec { var }) if ctx.identity(*var) == arg => {
                    let mut state = BottomUpRefCountState::default();
                    state.init_with_decrement(id);
                    self.epilogue.insert(arg, state);
                }
                _ if uses_identity(inst, arg, ctx.rc_identity) => {
                    self.epilogue.insert(arg, BottomUpRefCountState::unknown());
                }
                _ => {}
            }
        }
    }

    /// Apply this loop's summary to the bottom-up (and epilogue) state.
    pub fn process_loop_bottom_up(&mut self, ctx: &ArcContext<'_>, epilogue_args: &[TrackedValue]) {
        debug_assert_eq!(self.kind, RegionKind::Loop);
        apply_summary(&mut self.bottom_up, &self.summarized_interesting_insts, ctx);
        for &arg in epilogue_args {
            if self.epilogue.contains_key(&arg) {
                continue;
            }
            let used = self
                .summarized_interesting_insts
                .iter()
                .filter_map(|&site| ctx.func.instr(site))
                .any(|inst| uses_identity(inst, arg, ctx.rc_identity));
            if used {
                self.epilogue.insert(arg, BottomUpRefCountState::unknown());
            }
        }
    }
}

/// Move every tracked pointer `inst` interferes with to `Unknown`.
fn invalidate_interfering<S: RefCountLattice>(
    map: &mut BlotMapVector<TrackedValue, S>,
    inst: InstrRef<'_>,
    ctx: &ArcContext<'_>,
) {
    for (&tracked, state) in map.iter_mut() {
        if !state.is_unknown() && interferes(inst, tracked, ctx.alias) {
            state.invalidate();
        }
    }
}

/// Move every tracked pointer any summarized site touches to `Unknown`.
fn apply_summary<S: RefCountLattice>(
    map: &mut BlotMapVector<TrackedValue, S>,
    summary: &[InstrId],
    ctx: &ArcContext<'_>,
) {
    for (&tracked, state) in map.iter_mut() {
        if state.is_unknown() {
            continue;
        }
        let touched = summary
            .iter()
            .filter_map(|&site| ctx.func.instr(site))
            .any(|inst| touches(inst, tracked, ctx.alias));
        if touched {
            tracing::trace!(%tracked, "loop summary invalidates");
            state.invalidate();
        }
    }
}
