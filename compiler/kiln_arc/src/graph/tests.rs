use pretty_assertions::assert_eq;

use crate::test_helpers::{b, block, branch, int, jump, lit, make_func, ret};

use super::*;

/// ```text
///   bb0
///  /   \
/// bb1  bb2
///  \   /
///   bb3
/// ```
fn diamond() -> ArcFunction {
    make_func(
        vec![],
        vec![
            block(0, vec![lit(0, 1)], branch(0, 1, 2)),
            block(1, vec![], jump(3)),
            block(2, vec![], jump(3)),
            block(3, vec![], ret(0)),
        ],
        vec![int()],
    )
}

/// `bb0 -> bb1 <-> bb2`, `bb1 -> bb3`.
fn simple_loop() -> ArcFunction {
    make_func(
        vec![],
        vec![
            block(0, vec![lit(0, 1)], jump(1)),
            block(1, vec![], branch(0, 2, 3)),
            block(2, vec![], jump(1)),
            block(3, vec![], ret(0)),
        ],
        vec![int()],
    )
}

#[test]
fn predecessors_of_diamond() {
    let preds = compute_predecessors(&diamond());
    assert_eq!(preds, vec![vec![], vec![0], vec![0], vec![1, 2]]);
}

#[test]
fn duplicate_successors_collapse() {
    let func = make_func(
        vec![],
        vec![
            block(0, vec![lit(0, 1)], branch(0, 1, 1)),
            block(1, vec![], ret(0)),
        ],
        vec![int()],
    );
    assert_eq!(distinct_successors(&func, 0), vec![1]);
    assert_eq!(compute_predecessors(&func)[1], vec![0]);
}

#[test]
fn postorder_visits_successors_first() {
    let func = diamond();
    assert_eq!(compute_postorder(&func), vec![3, 1, 2, 0]);
    assert_eq!(reverse_postorder(&func), vec![0, 2, 1, 3]);
}

#[test]
fn postorder_skips_unreachable_blocks() {
    let func = make_func(
        vec![],
        vec![
            block(0, vec![lit(0, 1)], ret(0)),
            block(1, vec![], jump(0)),
        ],
        vec![int()],
    );
    assert_eq!(compute_postorder(&func), vec![0]);
    // The unreachable block still shows up as a predecessor.
    assert_eq!(compute_predecessors(&func)[0], vec![1]);
}

#[test]
fn dominators_of_diamond() {
    let dom = DominatorTree::build(&diamond());
    assert_eq!(dom.immediate_dominator(b(0)), None);
    assert_eq!(dom.immediate_dominator(b(1)), Some(b(0)));
    assert_eq!(dom.immediate_dominator(b(3)), Some(b(0)));
    assert!(dom.dominates(b(0), b(3)));
    assert!(dom.dominates(b(3), b(3)));
    assert!(!dom.dominates(b(1), b(3)));
    assert!(!dom.dominates(b(2), b(1)));
}

#[test]
fn loop_header_dominates_body() {
    let dom = DominatorTree::build(&simple_loop());
    assert!(dom.dominates(b(1), b(2)));
    assert!(dom.dominates(b(1), b(3)));
    assert!(!dom.dominates(b(2), b(1)));
    assert_eq!(dom.immediate_dominator(b(2)), Some(b(1)));
}

#[test]
fn unreachable_blocks_are_not_dominated() {
    let func = make_func(
        vec![],
        vec![
            block(0, vec![lit(0, 1)], ret(0)),
            block(1, vec![], jump(0)),
        ],
        vec![int()],
    );
    let dom = DominatorTree::build(&func);
    assert!(!dom.dominates(b(0), b(1)));
    assert!(!dom.dominates(b(1), b(1)));
    assert_eq!(dom.immediate_dominator(b(1)), None);
    assert!(!dom.dominates(b(0), b(9)));
}
