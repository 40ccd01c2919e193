//! Shared test utilities for the ARC sequence analysis.
//!
//! Factory functions used across `graph`, `region`, `alias`,
//! `region_state`, `dataflow`, `epilogue`, `dump` and pipeline tests.
//! Only compiled in test builds.

use kiln_ir::{
    ArcBlock, ArcBlockId, ArcFunction, ArcInstr, ArcParam, ArcTerminator, ArcType, ArcValue,
    ArcVarId, CallEffects, InstrId, LitValue, Name, Ownership,
};

use crate::alias::{BasicAliasAnalysis, RcIdentityFunctionInfo};
use crate::context::ArcContext;
use crate::dataflow::LoopArcSequenceDataflow;
use crate::region::LoopRegionFunctionInfo;

/// Shorthand for `ArcVarId::new(n)`.
pub(crate) fn v(n: u32) -> ArcVarId {
    ArcVarId::new(n)
}

/// Shorthand for `ArcBlockId::new(n)`.
pub(crate) fn b(n: u32) -> ArcBlockId {
    ArcBlockId::new(n)
}

/// Shorthand for the address `bb<block>[index]`.
pub(crate) fn at(block: u32, index: u32) -> InstrId {
    InstrId::new(b(block), index)
}

/// A reference-counted type.
pub(crate) fn klass() -> ArcType {
    ArcType::reference(Name::from_raw(1))
}

/// A scalar type.
pub(crate) fn int() -> ArcType {
    ArcType::scalar(Name::from_raw(2))
}

/// Build an `ArcFunction` with a default name (`Name::from_raw(1)`).
pub(crate) fn make_func(
    params: Vec<ArcParam>,
    blocks: Vec<ArcBlock>,
    var_types: Vec<ArcType>,
) -> ArcFunction {
    ArcFunction::new(Name::from_raw(1), params, blocks, var_types)
}

/// Create an owned parameter.
pub(crate) fn owned_param(var: u32) -> ArcParam {
    ArcParam {
        var: v(var),
        ownership: Ownership::Owned,
    }
}

/// Create a borrowed parameter.
pub(crate) fn borrowed_param(var: u32) -> ArcParam {
    ArcParam {
        var: v(var),
        ownership: Ownership::Borrowed,
    }
}

/// A block without parameters.
pub(crate) fn block(id: u32, body: Vec<ArcInstr>, terminator: ArcTerminator) -> ArcBlock {
    ArcBlock {
        id: b(id),
        params: vec![],
        body,
        terminator,
    }
}

pub(crate) fn inc(var: u32) -> ArcInstr {
    ArcInstr::RcInc { var: v(var) }
}

pub(crate) fn dec(var: u32) -> ArcInstr {
    ArcInstr::RcDec { var: v(var) }
}

/// `dst = opaque(args)` with unknown effects.
pub(crate) fn call(dst: u32, args: &[u32]) -> ArcInstr {
    ArcInstr::Apply {
        dst: v(dst),
        func: Name::from_raw(50),
        args: args.iter().map(|&a| v(a)).collect(),
        effects: CallEffects::Unknown,
    }
}

/// `dst = observe(args)` that only reads memory.
pub(crate) fn readonly_call(dst: u32, args: &[u32]) -> ArcInstr {
    ArcInstr::Apply {
        dst: v(dst),
        func: Name::from_raw(51),
        args: args.iter().map(|&a| v(a)).collect(),
        effects: CallEffects::ReadOnly,
    }
}

/// `dst = integer_literal n`.
pub(crate) fn lit(dst: u32, n: i64) -> ArcInstr {
    ArcInstr::Let {
        dst: v(dst),
        value: ArcValue::Literal(LitValue::Int(n)),
    }
}

/// `dst = copy_value src`.
pub(crate) fn copy(dst: u32, src: u32) -> ArcInstr {
    ArcInstr::Let {
        dst: v(dst),
        value: ArcValue::Var(v(src)),
    }
}

pub(crate) fn ret(var: u32) -> ArcTerminator {
    ArcTerminator::Return { value: v(var) }
}

pub(crate) fn jump(target: u32) -> ArcTerminator {
    ArcTerminator::Jump {
        target: b(target),
        args: vec![],
    }
}

pub(crate) fn branch(cond: u32, then_block: u32, else_block: u32) -> ArcTerminator {
    ArcTerminator::Branch {
        cond: v(cond),
        then_block: b(then_block),
        else_block: b(else_block),
    }
}

/// Build the region hierarchy, panicking on malformed test input.
pub(crate) fn regions_of(func: &ArcFunction) -> LoopRegionFunctionInfo {
    match LoopRegionFunctionInfo::build(func) {
        Ok(regions) => regions,
        Err(e) => panic!("test function has no region hierarchy: {e}"),
    }
}

/// Build all collaborators for `func`, run the dataflow and hand it to `f`.
pub(crate) fn with_dataflow<R>(
    func: &ArcFunction,
    allow_leaks: bool,
    f: impl FnOnce(&mut LoopArcSequenceDataflow<'_>) -> R,
) -> R {
    let regions = regions_of(func);
    let identity = RcIdentityFunctionInfo::new(func);
    let alias = BasicAliasAnalysis::new(func, &identity);
    let ctx = ArcContext::new(func, &regions, &identity, &alias).with_allow_leaks(allow_leaks);
    let mut dataflow = LoopArcSequenceDataflow::new(ctx);
    dataflow.run();
    f(&mut dataflow)
}

/// `fn(%0 : @owned $Klass) { retain %0; release %0; return %1 }` where `%1`
/// is a scalar literal.
pub(crate) fn straight_line() -> ArcFunction {
    make_func(
        vec![owned_param(0)],
        vec![block(0, vec![lit(1, 0), inc(0), dec(0)], ret(1))],
        vec![klass(), int()],
    )
}
