//! End-to-end tests through the crate's public surface.

#![allow(clippy::unwrap_used, clippy::expect_used, reason = "Tests can panic")]

use pretty_assertions::assert_eq;
use proptest::prelude::*;

use kiln_ir::{ArcFunction, ArcInstr, ArcModule, ArcTerminator, InstrId, Name, StringInterner};

use crate::test_helpers::{
    at, block, branch, call, dec, inc, int, jump, klass, lit, make_func, owned_param,
    readonly_call, ret, straight_line, v,
};
use crate::{
    analyze_function, analyze_module, dump_epilogue_releases, init_tracing, ArcOptConfig,
    InstSet, MatcherMode, MatchingSet, RefCountLattice, RefCountState,
};

#[test]
fn straight_line_retain_release_pair() {
    let results = analyze_function(&straight_line(), &ArcOptConfig::default()).unwrap();
    let retain = at(0, 1);
    let release = at(0, 2);
    assert_eq!(
        results.dec_to_inc.get(&release).map(|s| s.state().clone()),
        Some(RefCountState::Matched(InstSet::singleton(retain)))
    );
    assert_eq!(
        results.inc_to_dec.get(&retain).map(|s| s.state().clone()),
        Some(RefCountState::Matched(InstSet::singleton(release)))
    );
}

#[test]
fn epilogue_totality() {
    // One release reachable from every return.
    let joined = make_func(
        vec![owned_param(0)],
        vec![
            block(0, vec![lit(1, 1)], branch(1, 1, 2)),
            block(1, vec![], jump(3)),
            block(2, vec![], jump(3)),
            block(3, vec![dec(0)], ret(1)),
        ],
        vec![klass(), int()],
    );
    let results = analyze_function(&joined, &ArcOptConfig::default()).unwrap();
    assert_eq!(results.epilogue.releases_for_argument(v(0)), &[at(3, 0)]);

    // The same release reachable from one branch only.
    let one_sided = make_func(
        vec![owned_param(0)],
        vec![
            block(0, vec![lit(1, 1)], branch(1, 1, 2)),
            block(1, vec![dec(0)], jump(3)),
            block(2, vec![], jump(3)),
            block(3, vec![], ret(1)),
        ],
        vec![klass(), int()],
    );
    let results = analyze_function(&one_sided, &ArcOptConfig::default()).unwrap();
    assert!(results.epilogue.releases_for_argument(v(0)).is_empty());
}

#[test]
fn dumper_markers_for_function_without_matches() {
    let interner = StringInterner::new();
    let mut func = make_func(
        vec![],
        vec![block(0, vec![lit(0, 0)], ret(0))],
        vec![int()],
    );
    func.name = interner.intern("example");

    let mut out = Vec::new();
    dump_epilogue_releases(
        &ArcModule::new(vec![func]),
        &interner,
        &ArcOptConfig::default(),
        &mut out,
    )
    .unwrap();
    let text = String::from_utf8(out).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines, vec!["START: sil @example", "END: sil @example"]);
}

#[test]
fn whole_module_analysis_is_deterministic() {
    let module = ArcModule::new(vec![
        straight_line(),
        make_func(
            vec![owned_param(0)],
            vec![
                block(0, vec![lit(1, 1), inc(0)], jump(1)),
                block(1, vec![], branch(1, 2, 3)),
                block(2, vec![readonly_call(2, &[0])], jump(1)),
                block(3, vec![dec(0)], ret(1)),
            ],
            vec![klass(), int(), int()],
        ),
    ]);
    let config = ArcOptConfig::default();
    let first = analyze_module(&module, &config).unwrap();
    let second = analyze_module(&module, &config).unwrap();
    assert_eq!(first, second);
    // The loop uses %0, so the retain before it cannot pair with the
    // release after it.
    assert!(first[1].matching_sets.is_empty());
}

#[test]
fn live_matcher_mode_reaches_results() {
    let config = ArcOptConfig::default().with_matcher_mode(MatcherMode::Live);
    let results = analyze_module(&ArcModule::new(vec![straight_line()]), &config).unwrap();
    assert_eq!(results[0].epilogue.mode(), MatcherMode::Live);
}

#[test]
fn config_defaults() {
    let config = ArcOptConfig::default();
    assert_eq!(config.jobs, 1);
    assert!(config.allow_leaks);
    assert_eq!(config.matcher_mode, MatcherMode::Frozen);
    assert_eq!(config.effective_jobs(), 1);
    assert_eq!(ArcOptConfig::new(6).effective_jobs(), 6);
    assert!(ArcOptConfig::new(0).effective_jobs() >= 1);
    assert!(!ArcOptConfig::serial().with_allow_leaks(false).allow_leaks);
}

#[test]
fn init_tracing_is_idempotent() {
    init_tracing();
    init_tracing();
}

// ── Soundness ───────────────────────────────────────────────────────

/// Straight-line operations on the owned argument `%0`.
fn op_strategy() -> impl Strategy<Value = ArcInstr> {
    prop_oneof![
        Just(inc(0)),
        Just(dec(0)),
        Just(readonly_call(2, &[0])),
        Just(call(2, &[])),
        Just(lit(2, 0)),
    ]
}

fn is_inert(instr: &ArcInstr) -> bool {
    matches!(instr, ArcInstr::Let { .. })
}

proptest! {
    /// Every reported pair has nothing but inert instructions between the
    /// retain and the release, in both directions.
    #[test]
    fn matched_pairs_have_no_interference(body in prop::collection::vec(op_strategy(), 0..12)) {
        let mut instrs = vec![lit(1, 0)];
        instrs.extend(body);
        let func = make_func(
            vec![owned_param(0)],
            vec![block(0, instrs.clone(), ret(1))],
            vec![klass(), int(), int()],
        );
        let results = analyze_function(&func, &ArcOptConfig::default()).unwrap();

        let check = |retain: InstrId, release: InstrId| {
            prop_assert!(retain.index < release.index);
            let is_retain = matches!(instrs[retain.index as usize], ArcInstr::RcInc { .. });
            prop_assert!(is_retain, "bb0[{}] is not a retain", retain.index);
            let is_release = matches!(instrs[release.index as usize], ArcInstr::RcDec { .. });
            prop_assert!(is_release, "bb0[{}] is not a release", release.index);
            let between = &instrs[retain.index as usize + 1..release.index as usize];
            prop_assert!(between.iter().all(is_inert), "interference in {:?}", between);
            Ok(())
        };

        for (&release, state) in results.dec_to_inc.iter() {
            for retain in state.increments().into_iter().flat_map(InstSet::iter) {
                check(retain, release)?;
            }
        }
        for (&retain, state) in results.inc_to_dec.iter() {
            for release in state.decrements().into_iter().flat_map(InstSet::iter) {
                check(retain, release)?;
            }
        }
        for set in &results.matching_sets {
            prop_assert_eq!(set.increments.len(), 1);
            prop_assert_eq!(set.decrements.len(), 1);
        }
        prop_assert_eq!(results.name, Name::from_raw(1));
    }
}

// Structured programs over the owned argument %0, lowered to reducible CFGs.

#[derive(Clone, Debug)]
enum Stmt {
    Retain,
    Release,
    Use,
    Opaque,
    Inert,
    Abort,
    If(Vec<Stmt>, Vec<Stmt>),
    Loop(Vec<Stmt>),
}

fn stmt_strategy() -> impl Strategy<Value = Stmt> {
    let leaf = prop_oneof![
        3 => Just(Stmt::Retain),
        3 => Just(Stmt::Release),
        1 => Just(Stmt::Use),
        1 => Just(Stmt::Opaque),
        1 => Just(Stmt::Inert),
        1 => Just(Stmt::Abort),
    ];
    leaf.prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            (
                prop::collection::vec(inner.clone(), 0..4),
                prop::collection::vec(inner.clone(), 0..4),
            )
                .prop_map(|(then_arm, else_arm)| Stmt::If(then_arm, else_arm)),
            prop::collection::vec(inner, 0..4).prop_map(Stmt::Loop),
        ]
    })
}

fn idx(i: usize) -> u32 {
    u32::try_from(i).unwrap()
}

/// Lowers statements into blocks. `%1` is the branch condition and the
/// return value; `%2` receives call results.
struct CfgBuilder {
    blocks: Vec<(Vec<ArcInstr>, Option<ArcTerminator>)>,
    current: usize,
}

impl CfgBuilder {
    fn build(program: &[Stmt]) -> ArcFunction {
        let mut builder = CfgBuilder {
            blocks: vec![(vec![lit(1, 1)], None)],
            current: 0,
        };
        builder.lower(program);
        builder.terminate(ret(1));
        let blocks = builder
            .blocks
            .into_iter()
            .enumerate()
            .map(|(i, (body, term))| {
                block(idx(i), body, term.unwrap_or(ArcTerminator::Unreachable))
            })
            .collect();
        make_func(vec![owned_param(0)], blocks, vec![klass(), int(), int()])
    }

    fn new_block(&mut self) -> usize {
        self.blocks.push((Vec::new(), None));
        self.blocks.len() - 1
    }

    fn terminate(&mut self, term: ArcTerminator) {
        self.blocks[self.current].1 = Some(term);
    }

    fn lower(&mut self, stmts: &[Stmt]) {
        for stmt in stmts {
            let instr = match stmt {
                Stmt::Retain => inc(0),
                Stmt::Release => dec(0),
                Stmt::Use => readonly_call(2, &[0]),
                Stmt::Opaque => call(2, &[]),
                Stmt::Inert => lit(2, 0),
                Stmt::Abort => {
                    self.terminate(ArcTerminator::Unreachable);
                    self.current = self.new_block();
                    continue;
                }
                Stmt::If(then_arm, else_arm) => {
                    let then_block = self.new_block();
                    let else_block = self.new_block();
                    let join = self.new_block();
                    self.terminate(branch(1, idx(then_block), idx(else_block)));
                    for (arm, start) in [(then_arm, then_block), (else_arm, else_block)] {
                        self.current = start;
                        self.lower(arm);
                        self.terminate(jump(idx(join)));
                    }
                    self.current = join;
                    continue;
                }
                Stmt::Loop(body) => {
                    let header = self.new_block();
                    let body_block = self.new_block();
                    let exit = self.new_block();
                    self.terminate(jump(idx(header)));
                    self.current = header;
                    self.terminate(branch(1, idx(body_block), idx(exit)));
                    self.current = body_block;
                    self.lower(body);
                    self.terminate(jump(idx(header)));
                    self.current = exit;
                    continue;
                }
            };
            self.blocks[self.current].0.push(instr);
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Event {
    Retain,
    Release,
    Use,
    Opaque,
}

fn event(instr: &ArcInstr) -> Option<Event> {
    match instr {
        ArcInstr::RcInc { .. } => Some(Event::Retain),
        ArcInstr::RcDec { .. } => Some(Event::Release),
        ArcInstr::Apply { args, .. } if !args.is_empty() => Some(Event::Use),
        ArcInstr::Apply { .. } => Some(Event::Opaque),
        _ => None,
    }
}

const MAX_PATH_BLOCKS: usize = 14;
const MAX_VISITS: usize = 20_000;

/// The events along every path from the entry to a `return` that visits at
/// most `MAX_PATH_BLOCKS` blocks.
fn returning_paths(func: &ArcFunction) -> Vec<Vec<(InstrId, Event)>> {
    fn walk(
        func: &ArcFunction,
        block: usize,
        depth: usize,
        visits: &mut usize,
        path: &mut Vec<(InstrId, Event)>,
        out: &mut Vec<Vec<(InstrId, Event)>>,
    ) {
        if depth == MAX_PATH_BLOCKS || *visits == MAX_VISITS {
            return;
        }
        *visits += 1;
        let blk = &func.blocks[block];
        let mark = path.len();
        for (i, instr) in blk.body.iter().enumerate() {
            if let Some(e) = event(instr) {
                path.push((InstrId::new(blk.id, idx(i)), e));
            }
        }
        if let ArcTerminator::Return { .. } = blk.terminator {
            out.push(path.clone());
        } else {
            for succ in blk.terminator.successors() {
                walk(func, succ.index(), depth + 1, visits, path, out);
            }
        }
        path.truncate(mark);
    }

    let mut out = Vec::new();
    walk(func, 0, 0, &mut 0, &mut Vec::new(), &mut out);
    out
}

/// After each retain of a group, the next event on the path is one of the
/// group's releases.
fn check_pairs(
    sets: &[MatchingSet],
    paths: &[Vec<(InstrId, Event)>],
) -> Result<(), TestCaseError> {
    for set in sets {
        for path in paths {
            for (k, &(id, ev)) in path.iter().enumerate() {
                if ev != Event::Retain || !set.increments.contains(id) {
                    continue;
                }
                let next = path.get(k + 1).copied();
                let released =
                    matches!(next, Some((d, Event::Release)) if set.decrements.contains(d));
                prop_assert!(released, "retain {:?} is followed by {:?} on {:?}", id, next, path);
            }
        }
    }
    Ok(())
}

/// On every returning path the last event touching the argument is one of
/// its epilogue releases.
fn check_epilogue(
    releases: &[InstrId],
    paths: &[Vec<(InstrId, Event)>],
) -> Result<(), TestCaseError> {
    if releases.is_empty() {
        return Ok(());
    }
    for path in paths {
        let last = path.iter().rev().find(|(_, e)| *e != Event::Opaque).copied();
        let released = matches!(last, Some((id, Event::Release)) if releases.contains(&id));
        prop_assert!(released, "path {:?} ends with {:?}", path, last);
    }
    Ok(())
}

proptest! {
    /// Reported pairs and epilogue releases hold on every bounded path
    /// through random reducible CFGs with branches, loops and unreachable
    /// exits.
    #[test]
    fn pairs_and_epilogue_hold_on_every_path(
        program in prop::collection::vec(stmt_strategy(), 0..6),
        allow_leaks in any::<bool>(),
    ) {
        let func = CfgBuilder::build(&program);
        let config = ArcOptConfig::default().with_allow_leaks(allow_leaks);
        let results = analyze_function(&func, &config).unwrap();
        let paths = returning_paths(&func);

        check_pairs(&results.matching_sets, &paths)?;
        check_epilogue(results.epilogue.releases_for_argument(v(0)), &paths)?;
    }
}
