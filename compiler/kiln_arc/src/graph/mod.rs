//! CFG utilities shared by the region builder and the RC-identity analysis.
//!
//! Everything here works on block indices (`usize`) rather than
//! [`ArcBlockId`]s so the results can index plain `Vec`s. Successors that
//! point outside the function are ignored; the region builder rejects such
//! functions before anything else looks at them.

use rustc_hash::FxHashSet;

use kiln_ir::{ArcBlockId, ArcFunction};

/// Compute the predecessor list for each block (deduplicated).
///
/// Returns a vector indexed by block index, where each entry is the list of
/// distinct predecessor block indices in ascending order.
pub(crate) fn compute_predecessors(func: &ArcFunction) -> Vec<Vec<usize>> {
    let num_blocks = func.blocks.len();
    let mut predecessors: Vec<Vec<usize>> = vec![Vec::new(); num_blocks];

    for (block_idx, block) in func.blocks.iter().enumerate() {
        let mut seen = FxHashSet::default();
        for succ_id in block.terminator.successors() {
            let succ_idx = succ_id.index();
            if succ_idx < num_blocks && seen.insert(succ_idx) {
                predecessors[succ_idx].push(block_idx);
            }
        }
    }

    predecessors
}

/// Distinct in-range successors of a block, in terminator order.
pub(crate) fn distinct_successors(func: &ArcFunction, block_idx: usize) -> Vec<usize> {
    let num_blocks = func.blocks.len();
    let mut out = Vec::new();
    for succ_id in func.blocks[block_idx].terminator.successors() {
        let succ_idx = succ_id.index();
        if succ_idx < num_blocks && !out.contains(&succ_idx) {
            out.push(succ_idx);
        }
    }
    out
}

/// Compute a postorder traversal of the CFG starting from the entry block.
///
/// Iterative DFS with an explicit stack. Only visits reachable blocks.
pub(crate) fn compute_postorder(func: &ArcFunction) -> Vec<usize> {
    let num_blocks = func.blocks.len();
    let mut visited = vec![false; num_blocks];
    let mut postorder = Vec::with_capacity(num_blocks);
    if num_blocks == 0 {
        return postorder;
    }

    // (block_index, next successor position to explore)
    let entry = func.entry.index();
    let mut stack: Vec<(usize, usize)> = vec![(entry, 0)];
    visited[entry] = true;

    while let Some(&mut (block_idx, ref mut next)) = stack.last_mut() {
        let succs = func.blocks[block_idx].terminator.successors();
        // Skip successors that are out of range or already visited.
        let mut pushed = None;
        while *next < succs.len() {
            let succ_idx = succs[*next].index();
            *next += 1;
            if succ_idx < num_blocks && !visited[succ_idx] {
                visited[succ_idx] = true;
                pushed = Some(succ_idx);
                break;
            }
        }
        match pushed {
            Some(succ_idx) => stack.push((succ_idx, 0)),
            None => {
                postorder.push(block_idx);
                stack.pop();
            }
        }
    }

    postorder
}

/// Reverse postorder: every block appears before its forward successors.
pub(crate) fn reverse_postorder(func: &ArcFunction) -> Vec<usize> {
    let mut rpo = compute_postorder(func);
    rpo.reverse();
    rpo
}

/// Dominator tree for ARC IR functions.
///
/// Uses the Cooper-Harvey-Kennedy iterative algorithm on reverse postorder.
/// Unreachable blocks have no immediate dominator and are dominated by
/// nothing (not even themselves).
///
/// Reference: Cooper, Harvey, Kennedy: "A Simple, Fast Dominance Algorithm" (2001)
pub struct DominatorTree {
    /// Immediate dominator for each block, indexed by block index.
    /// `idom[entry] == Some(entry)`, unreachable blocks are `None`.
    idom: Vec<Option<usize>>,
}

impl DominatorTree {
    /// Build the dominator tree for a function.
    pub fn build(func: &ArcFunction) -> Self {
        let n = func.blocks.len();
        if n == 0 {
            return Self { idom: vec![] };
        }

        let preds = compute_predecessors(func);
        let rpo = reverse_postorder(func);

        // Map block index → RPO position for O(1) lookup
        let mut rpo_pos = vec![usize::MAX; n];
        for (pos, &block_idx) in rpo.iter().enumerate() {
            rpo_pos[block_idx] = pos;
        }

        let entry = func.entry.index();
        let mut idom: Vec<Option<usize>> = vec![None; n];
        idom[entry] = Some(entry);

        let mut changed = true;
        while changed {
            changed = false;
            for &block_idx in rpo.iter().skip(1) {
                let mut processed = preds[block_idx]
                    .iter()
                    .copied()
                    .filter(|&p| idom[p].is_some());
                let Some(first) = processed.next() else {
                    continue;
                };
                let new_idom =
                    processed.fold(first, |acc, pred| Self::intersect(pred, acc, &idom, &rpo_pos));

                if idom[block_idx] != Some(new_idom) {
                    idom[block_idx] = Some(new_idom);
                    changed = true;
                }
            }
        }

        Self { idom }
    }

    /// Does block `a` dominate block `b`?
    ///
    /// A reachable block dominates itself. The entry dominates every
    /// reachable block.
    pub fn dominates(&self, a: ArcBlockId, b: ArcBlockId) -> bool {
        let a_idx = a.index();
        let mut current = b.index();
        if self.idom.get(current).copied().flatten().is_none() {
            return false;
        }
        loop {
            if current == a_idx {
                return true;
            }
            match self.idom[current] {
                Some(dom) if dom != current => current = dom,
                _ => return false,
            }
        }
    }

    /// Immediate dominator of `block`, `None` for the entry and for
    /// unreachable blocks.
    pub fn immediate_dominator(&self, block: ArcBlockId) -> Option<ArcBlockId> {
        let idx = block.index();
        match self.idom.get(idx).copied().flatten() {
            Some(dom) if dom != idx => Some(block_id(dom)),
            _ => None,
        }
    }

    /// CHK intersect: walk two fingers upward until they meet.
    fn intersect(mut a: usize, mut b: usize, idom: &[Option<usize>], rpo_pos: &[usize]) -> usize {
        while a != b {
            while rpo_pos[a] > rpo_pos[b] {
                let Some(next) = idom[a] else {
                    debug_assert!(false, "intersect: broken idom chain at {a}");
                    return a;
                };
                a = next;
            }
            while rpo_pos[b] > rpo_pos[a] {
                let Some(next) = idom[b] else {
                    debug_assert!(false, "intersect: broken idom chain at {b}");
                    return b;
                };
                b = next;
            }
        }
        a
    }
}

/// Convert a block index back into an [`ArcBlockId`].
#[inline]
#[expect(
    clippy::cast_possible_truncation,
    reason = "ARC IR block counts fit in u32"
)]
pub(crate) fn block_id(idx: usize) -> ArcBlockId {
    ArcBlockId::new(idx as u32)
}

#[cfg(test)]
mod tests;
