//! Loop region hierarchy.
//!
//! Decomposes a function's CFG into a tree of regions:
//!
//! - one **block region** per reachable basic block,
//! - one **loop region** per natural loop (all back edges sharing a header
//!   form a single loop), nested by containment,
//! - one **function region** at the root.
//!
//! Each non-root region is a child of exactly one *scope* (its innermost
//! enclosing loop, or the function). Within a scope, children are connected
//! by local predecessor/successor edges; a nested loop appears as a single
//! node. Edges that leave the scope, back edges to the scope's header, and
//! entries into the scope from outside are *nonlocal*: the dataflow treats
//! them as carrying no information.
//!
//! Only reducible control flow is accepted. An edge to an earlier block (in
//! reverse postorder) whose target does not dominate its source is reported
//! as [`RegionError::Irreducible`].

use std::fmt;

use rustc_hash::FxHashSet;
use smallvec::SmallVec;

use kiln_ir::{ArcBlockId, ArcFunction, ArcTerminator};

use crate::graph::{
    block_id, compute_postorder, compute_predecessors, distinct_successors, reverse_postorder,
    DominatorTree,
};

/// Index of a region in [`LoopRegionFunctionInfo`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "cache", derive(serde::Serialize, serde::Deserialize))]
#[repr(transparent)]
pub struct RegionId(u32);

impl RegionId {
    #[inline]
    pub fn new(raw: u32) -> Self {
        Self(raw)
    }

    #[inline]
    pub fn raw(self) -> u32 {
        self.0
    }

    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for RegionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

/// What a region stands for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RegionKind {
    Block,
    Loop,
    Function,
}

/// An edge from a region to a block outside its scope (or back to the
/// scope's header).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NonLocalSucc {
    pub target: ArcBlockId,
    /// Whether the target only leads to program termination. Always `false`
    /// for back edges.
    pub allows_leaks: bool,
}

/// A node of the region tree.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoopRegion {
    id: RegionId,
    kind: RegionKind,
    /// The block itself, the loop header, or the function entry.
    header: ArcBlockId,
    parent: Option<RegionId>,
    /// Direct children in reverse postorder. Empty for blocks.
    children: Vec<RegionId>,
    /// Every block inside this region, ascending.
    blocks: Vec<ArcBlockId>,
    preds: SmallVec<[RegionId; 4]>,
    succs: SmallVec<[RegionId; 4]>,
    has_nonlocal_preds: bool,
    nonlocal_succs: SmallVec<[NonLocalSucc; 2]>,
    allows_leaks: bool,
}

impl LoopRegion {
    pub fn id(&self) -> RegionId {
        self.id
    }

    pub fn kind(&self) -> RegionKind {
        self.kind
    }

    pub fn is_block(&self) -> bool {
        self.kind == RegionKind::Block
    }

    pub fn is_loop(&self) -> bool {
        self.kind == RegionKind::Loop
    }

    pub fn is_function(&self) -> bool {
        self.kind == RegionKind::Function
    }

    /// The basic block of a block region.
    pub fn block(&self) -> Option<ArcBlockId> {
        self.is_block().then_some(self.header)
    }

    pub fn header(&self) -> ArcBlockId {
        self.header
    }

    /// Enclosing scope. `None` only for the function region.
    pub fn parent(&self) -> Option<RegionId> {
        self.parent
    }

    pub fn children(&self) -> &[RegionId] {
        &self.children
    }

    pub fn blocks(&self) -> &[ArcBlockId] {
        &self.blocks
    }

    /// Predecessors within the parent scope.
    pub fn preds(&self) -> &[RegionId] {
        &self.preds
    }

    /// Successors within the parent scope.
    pub fn succs(&self) -> &[RegionId] {
        &self.succs
    }

    /// Entered from outside the parent scope, or by a back edge of it.
    pub fn has_nonlocal_preds(&self) -> bool {
        self.has_nonlocal_preds
    }

    pub fn nonlocal_succs(&self) -> &[NonLocalSucc] {
        &self.nonlocal_succs
    }

    /// `true` if every path out of this region ends in program termination,
    /// so unbalanced retains/releases on those paths are acceptable.
    pub fn allows_leaks(&self) -> bool {
        self.allows_leaks
    }
}

/// Why a function could not be decomposed into regions.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum RegionError {
    #[error("function has no blocks")]
    Empty,
    #[error("block at position {position} is labeled {id}")]
    BlockIdMismatch { position: usize, id: ArcBlockId },
    #[error("{from} jumps to missing block {target}")]
    MissingBlock {
        from: ArcBlockId,
        target: ArcBlockId,
    },
    #[error("irreducible control flow: edge {from} -> {to} re-enters a cycle below its header")]
    Irreducible { from: ArcBlockId, to: ArcBlockId },
}

/// The region tree of one function.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoopRegionFunctionInfo {
    regions: Vec<LoopRegion>,
    function: RegionId,
    entry: RegionId,
    /// Region of each block, `None` for unreachable blocks.
    block_regions: Vec<Option<RegionId>>,
    /// Loops innermost first, then the function.
    scopes: Vec<RegionId>,
}

/// A natural loop found during construction.
struct NaturalLoop {
    header: usize,
    body: Vec<bool>,
    size: usize,
}

impl LoopRegionFunctionInfo {
    /// Build the region tree for `func`.
    pub fn build(func: &ArcFunction) -> Result<Self, RegionError> {
        let num_blocks = func.blocks.len();
        if num_blocks == 0 {
            return Err(RegionError::Empty);
        }
        Self::validate(func)?;

        let rpo = reverse_postorder(func);
        let mut rpo_pos = vec![usize::MAX; num_blocks];
        for (pos, &block_idx) in rpo.iter().enumerate() {
            rpo_pos[block_idx] = pos;
        }
        let preds = compute_predecessors(func);
        let dom = DominatorTree::build(func);

        // Retreating edges must be back edges.
        let mut latches: Vec<Vec<usize>> = vec![Vec::new(); num_blocks];
        let mut back_edges: FxHashSet<(usize, usize)> = FxHashSet::default();
        for &from in &rpo {
            for to in distinct_successors(func, from) {
                if rpo_pos[to] > rpo_pos[from] {
                    continue;
                }
                if !dom.dominates(block_id(to), block_id(from)) {
                    return Err(RegionError::Irreducible {
                        from: block_id(from),
                        to: block_id(to),
                    });
                }
                latches[to].push(from);
                back_edges.insert((from, to));
            }
        }

        let mut loops = Self::natural_loops(&rpo, &rpo_pos, &preds, &latches);
        loops.sort_by_key(|l| (l.size, rpo_pos[l.header]));
        let leaks = Self::block_allows_leaks(func);

        // Region ids: reachable blocks in RPO, then loops innermost first,
        // then the function. That numbering is a valid post-order.
        let num_block_regions = rpo.len();
        let function = region_id(num_block_regions + loops.len());
        let mut block_regions: Vec<Option<RegionId>> = vec![None; num_blocks];
        let mut regions: Vec<LoopRegion> = Vec::with_capacity(function.index() + 1);

        for (i, &block_idx) in rpo.iter().enumerate() {
            let id = region_id(i);
            block_regions[block_idx] = Some(id);
            let parent = loops
                .iter()
                .position(|l| l.body[block_idx])
                .map_or(function, |l| region_id(num_block_regions + l));
            regions.push(LoopRegion {
                id,
                kind: RegionKind::Block,
                header: block_id(block_idx),
                parent: Some(parent),
                children: Vec::new(),
                blocks: vec![block_id(block_idx)],
                preds: SmallVec::new(),
                succs: SmallVec::new(),
                has_nonlocal_preds: false,
                nonlocal_succs: SmallVec::new(),
                allows_leaks: leaks[block_idx],
            });
        }

        for (i, natural) in loops.iter().enumerate() {
            let parent = loops
                .iter()
                .enumerate()
                .find(|(j, outer)| {
                    *j != i && outer.size > natural.size && outer.body[natural.header]
                })
                .map_or(function, |(j, _)| region_id(num_block_regions + j));
            let blocks: Vec<ArcBlockId> = (0..num_blocks)
                .filter(|&b| natural.body[b])
                .map(block_id)
                .collect();
            let mut exits = blocks
                .iter()
                .flat_map(|b| distinct_successors(func, b.index()))
                .filter(|&t| !natural.body[t])
                .peekable();
            let allows_leaks = exits.peek().is_some() && exits.all(|t| leaks[t]);
            regions.push(LoopRegion {
                id: region_id(num_block_regions + i),
                kind: RegionKind::Loop,
                header: block_id(natural.header),
                parent: Some(parent),
                children: Vec::new(),
                blocks,
                preds: SmallVec::new(),
                succs: SmallVec::new(),
                has_nonlocal_preds: false,
                nonlocal_succs: SmallVec::new(),
                allows_leaks,
            });
        }

        let mut reachable: Vec<ArcBlockId> = rpo.iter().copied().map(block_id).collect();
        reachable.sort();
        regions.push(LoopRegion {
            id: function,
            kind: RegionKind::Function,
            header: func.entry,
            parent: None,
            children: Vec::new(),
            blocks: reachable,
            preds: SmallVec::new(),
            succs: SmallVec::new(),
            has_nonlocal_preds: false,
            nonlocal_succs: SmallVec::new(),
            allows_leaks: false,
        });

        // Children in reverse postorder of their headers.
        let mut ordered: Vec<RegionId> = regions
            .iter()
            .filter(|r| !r.is_function())
            .map(LoopRegion::id)
            .collect();
        ordered.sort_by_key(|&r| rpo_pos[regions[r.index()].header.index()]);
        for r in ordered {
            if let Some(parent) = regions[r.index()].parent {
                regions[parent.index()].children.push(r);
            }
        }

        let mut info = Self {
            regions,
            function,
            entry: function,
            block_regions,
            scopes: (num_block_regions..=function.index()).map(region_id).collect(),
        };
        info.entry = info
            .child_of(function, func.entry.index())
            .unwrap_or(function);
        info.connect_scopes(func, &preds, &back_edges, &leaks);

        tracing::debug!(
            regions = info.regions.len(),
            loops = loops.len(),
            "built loop region hierarchy"
        );
        Ok(info)
    }

    fn validate(func: &ArcFunction) -> Result<(), RegionError> {
        for (position, block) in func.blocks.iter().enumerate() {
            if block.id.index() != position {
                return Err(RegionError::BlockIdMismatch {
                    position,
                    id: block.id,
                });
            }
            for target in block.terminator.successors() {
                if target.index() >= func.blocks.len() {
                    return Err(RegionError::MissingBlock {
                        from: block.id,
                        target,
                    });
                }
            }
        }
        Ok(())
    }

    /// One natural loop per header: the header plus everything that reaches
    /// a latch without passing through the header.
    fn natural_loops(
        rpo: &[usize],
        rpo_pos: &[usize],
        preds: &[Vec<usize>],
        latches: &[Vec<usize>],
    ) -> Vec<NaturalLoop> {
        let num_blocks = preds.len();
        let mut loops = Vec::new();
        for &header in rpo {
            if latches[header].is_empty() {
                continue;
            }
            let mut body = vec![false; num_blocks];
            body[header] = true;
            let mut size = 1;
            let mut stack = latches[header].clone();
            while let Some(block) = stack.pop() {
                if body[block] {
                    continue;
                }
                body[block] = true;
                size += 1;
                stack.extend(
                    preds[block]
                        .iter()
                        .copied()
                        .filter(|&p| rpo_pos[p] != usize::MAX && !body[p]),
                );
            }
            loops.push(NaturalLoop { header, body, size });
        }
        loops
    }

    /// A block allows leaks if it ends in `unreachable`, or if it has
    /// successors and every one of them allows leaks. Back edges never do.
    fn block_allows_leaks(func: &ArcFunction) -> Vec<bool> {
        let mut leaks = vec![false; func.blocks.len()];
        // Postorder: forward successors are decided first; back-edge
        // targets are still `false` when consulted.
        for block_idx in compute_postorder(func) {
            leaks[block_idx] = match func.blocks[block_idx].terminator {
                ArcTerminator::Unreachable => true,
                _ => {
                    let succs = distinct_successors(func, block_idx);
                    !succs.is_empty() && succs.iter().all(|&t| t != block_idx && leaks[t])
                }
            };
        }
        leaks
    }

    /// Direct child of `scope` containing `block_idx`, if the block is
    /// inside `scope` at all.
    fn child_of(&self, scope: RegionId, block_idx: usize) -> Option<RegionId> {
        let mut current = (*self.block_regions.get(block_idx)?)?;
        loop {
            let parent = self.regions[current.index()].parent?;
            if parent == scope {
                return Some(current);
            }
            current = parent;
        }
    }

    /// Fill in local and nonlocal edges for every child of every scope.
    fn connect_scopes(
        &mut self,
        func: &ArcFunction,
        preds: &[Vec<usize>],
        back_edges: &FxHashSet<(usize, usize)>,
        leaks: &[bool],
    ) {
        for scope in self.scopes.clone() {
            let scope_header = self.regions[scope.index()]
                .is_loop()
                .then(|| self.regions[scope.index()].header.index());

            for child in self.regions[scope.index()].children.clone() {
                let header = self.regions[child.index()].header.index();
                let mut local_preds: SmallVec<[RegionId; 4]> = SmallVec::new();
                let mut nonlocal_preds = false;
                for &pred in &preds[header] {
                    if self.block_regions[pred].is_none() {
                        continue;
                    }
                    if Some(header) == scope_header {
                        nonlocal_preds = true;
                        continue;
                    }
                    match self.child_of(scope, pred) {
                        Some(d) if d == child => {}
                        Some(d) => {
                            if !local_preds.contains(&d) {
                                local_preds.push(d);
                            }
                        }
                        None => nonlocal_preds = true,
                    }
                }

                let mut local_succs: SmallVec<[RegionId; 4]> = SmallVec::new();
                let mut nonlocal_succs: SmallVec<[NonLocalSucc; 2]> = SmallVec::new();
                for block in self.regions[child.index()].blocks.clone() {
                    for target in distinct_successors(func, block.index()) {
                        let edge = if Some(target) == scope_header {
                            debug_assert!(back_edges.contains(&(block.index(), target)));
                            Some(NonLocalSucc {
                                target: block_id(target),
                                allows_leaks: false,
                            })
                        } else {
                            match self.child_of(scope, target) {
                                Some(d) if d == child => None,
                                Some(d) => {
                                    if !local_succs.contains(&d) {
                                        local_succs.push(d);
                                    }
                                    None
                                }
                                None => Some(NonLocalSucc {
                                    target: block_id(target),
                                    allows_leaks: leaks[target],
                                }),
                            }
                        };
                        if let Some(edge) = edge {
                            if !nonlocal_succs.iter().any(|e| e.target == edge.target) {
                                nonlocal_succs.push(edge);
                            }
                        }
                    }
                }

                let region = &mut self.regions[child.index()];
                region.preds = local_preds;
                region.has_nonlocal_preds = nonlocal_preds;
                region.succs = local_succs;
                region.nonlocal_succs = nonlocal_succs;
            }
        }
    }

    // ── Queries ─────────────────────────────────────────────────────

    pub fn region(&self, id: RegionId) -> &LoopRegion {
        &self.regions[id.index()]
    }

    /// All regions in post-order: every child precedes its parent, inner
    /// loops precede outer loops, the function region is last.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &LoopRegion> + ExactSizeIterator {
        self.regions.iter()
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    /// Never true for a built hierarchy (the function region always exists).
    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    pub fn function_region(&self) -> RegionId {
        self.function
    }

    /// The child of the function region that contains the entry block.
    pub fn entry_region(&self) -> RegionId {
        self.entry
    }

    /// Block region of `block`, `None` if the block is unreachable.
    pub fn block_region(&self, block: ArcBlockId) -> Option<RegionId> {
        self.block_regions.get(block.index()).copied().flatten()
    }

    /// Every loop (innermost first) followed by the function region.
    pub fn scopes(&self) -> &[RegionId] {
        &self.scopes
    }

    pub fn num_loops(&self) -> usize {
        self.scopes.len() - 1
    }
}

#[expect(
    clippy::cast_possible_truncation,
    reason = "region counts are bounded by block counts, which fit in u32"
)]
fn region_id(idx: usize) -> RegionId {
    RegionId::new(idx as u32)
}
