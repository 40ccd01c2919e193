//! RC identity, alias queries and instruction effect predicates.
//!
//! The sequence dataflow tracks one state per reference-counted object, not
//! per SSA value: `%1 = copy_value %0` and `%2 = unchecked_ref_cast %1` all
//! denote the object `%0` points at. [`RcIdentity`] maps a value to that
//! object ([`TrackedValue`]); [`AliasAnalysis`] answers whether two values
//! may point at the same object. Both are traits so a stronger analysis can
//! be plugged in without touching the dataflow.
//!
//! The free functions at the bottom classify what an instruction can do to
//! a tracked object. They are the only place the dataflow inspects
//! instruction kinds besides `RcInc`/`RcDec` themselves.

use std::fmt;

use kiln_ir::{ArcFunction, ArcInstr, ArcTerminator, ArcValue, ArcVarId, CallEffects, InstrRef};

use crate::graph::{compute_predecessors, reverse_postorder};

/// Canonical identity of a reference-counted object: the root value every
/// copy and cast of it traces back to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "cache", derive(serde::Serialize, serde::Deserialize))]
pub struct TrackedValue(ArcVarId);

impl TrackedValue {
    #[inline]
    pub fn new(root: ArcVarId) -> Self {
        Self(root)
    }

    /// The root value.
    #[inline]
    pub fn root(self) -> ArcVarId {
        self.0
    }
}

impl fmt::Display for TrackedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Canonicalizes values to the object they denote.
pub trait RcIdentity {
    fn rc_identity(&self, value: ArcVarId) -> TrackedValue;
}

/// May-alias query between two values.
pub trait AliasAnalysis {
    /// `false` only if `a` and `b` provably never refer to the same object.
    fn may_alias(&self, a: ArcVarId, b: ArcVarId) -> bool;
}

// ── RC identity ─────────────────────────────────────────────────────

/// RC-identity roots for every variable of one function.
///
/// Follows copies (`Let` of a variable) and casts. A block parameter joins
/// its incoming arguments' root when every predecessor jumps to it with an
/// argument whose root is already known and all those roots agree;
/// otherwise (a loop-carried value, or a branch into a parameterized block)
/// the parameter is its own root.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RcIdentityFunctionInfo {
    roots: Vec<ArcVarId>,
}

impl RcIdentityFunctionInfo {
    pub fn new(func: &ArcFunction) -> Self {
        let num_vars = func.num_vars();
        #[expect(
            clippy::cast_possible_truncation,
            reason = "ARC IR variable counts fit in u32"
        )]
        let mut roots: Vec<ArcVarId> = (0..num_vars).map(|i| ArcVarId::new(i as u32)).collect();
        let mut resolved = vec![false; num_vars];
        for param in &func.params {
            if let Some(slot) = resolved.get_mut(param.var.index()) {
                *slot = true;
            }
        }

        let preds = compute_predecessors(func);
        for block_idx in reverse_postorder(func) {
            let block = &func.blocks[block_idx];
            for (position, &param) in block.params.iter().enumerate() {
                if param.index() >= num_vars {
                    continue;
                }
                let incoming = Self::shared_incoming_root(
                    func,
                    &preds[block_idx],
                    block_idx,
                    position,
                    &roots,
                    &resolved,
                );
                if let Some(root) = incoming {
                    roots[param.index()] = root;
                }
                resolved[param.index()] = true;
            }

            for instr in &block.body {
                let Some(dst) = instr.defined_var() else {
                    continue;
                };
                if dst.index() >= num_vars {
                    continue;
                }
                let source = match instr {
                    ArcInstr::Let {
                        value: ArcValue::Var(src),
                        ..
                    }
                    | ArcInstr::Cast { src, .. } => Some(*src),
                    _ => None,
                };
                if let Some(src) = source {
                    if resolved.get(src.index()).copied().unwrap_or(false) {
                        roots[dst.index()] = roots[src.index()];
                    }
                }
                resolved[dst.index()] = true;
            }
        }

        Self { roots }
    }

    /// The common root of the arguments every predecessor passes to
    /// parameter `position` of `block_idx`, if there is one.
    fn shared_incoming_root(
        func: &ArcFunction,
        preds: &[usize],
        block_idx: usize,
        position: usize,
        roots: &[ArcVarId],
        resolved: &[bool],
    ) -> Option<ArcVarId> {
        let mut shared = None;
        for &pred in preds {
            let ArcTerminator::Jump { target, args } = &func.blocks[pred].terminator else {
                return None;
            };
            if target.index() != block_idx {
                return None;
            }
            let arg = *args.get(position)?;
            if !resolved.get(arg.index()).copied().unwrap_or(false) {
                return None;
            }
            let root = roots[arg.index()];
            match shared {
                None => shared = Some(root),
                Some(existing) if existing == root => {}
                Some(_) => return None,
            }
        }
        shared
    }

    /// Root of `value`. Values outside the function are their own root.
    pub fn root(&self, value: ArcVarId) -> ArcVarId {
        self.roots.get(value.index()).copied().unwrap_or(value)
    }
}

impl RcIdentity for RcIdentityFunctionInfo {
    fn rc_identity(&self, value: ArcVarId) -> TrackedValue {
        TrackedValue::new(self.root(value))
    }
}

// ── Alias analysis ──────────────────────────────────────────────────

/// Where a root value comes from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum RootKind {
    /// Function parameter: may be anything the caller passed.
    Argument,
    /// Result of `Construct`: a fresh object nobody else can name yet.
    Allocation,
    /// Anything else (call results, projections, block parameters).
    Opaque,
}

/// Type- and allocation-based alias analysis.
///
/// - Scalars never alias anything.
/// - Values with the same RC root always alias.
/// - Two distinct allocations never alias, and an allocation never aliases
///   a function argument.
/// - Everything else may alias.
pub struct BasicAliasAnalysis<'a> {
    func: &'a ArcFunction,
    identity: &'a RcIdentityFunctionInfo,
    kinds: Vec<RootKind>,
}

impl<'a> BasicAliasAnalysis<'a> {
    pub fn new(func: &'a ArcFunction, identity: &'a RcIdentityFunctionInfo) -> Self {
        let mut kinds = vec![RootKind::Opaque; func.num_vars()];
        for param in &func.params {
            if let Some(kind) = kinds.get_mut(param.var.index()) {
                *kind = RootKind::Argument;
            }
        }
        for block in &func.blocks {
            for instr in &block.body {
                if let ArcInstr::Construct { dst, .. } = instr {
                    if let Some(kind) = kinds.get_mut(dst.index()) {
                        *kind = RootKind::Allocation;
                    }
                }
            }
        }
        Self {
            func,
            identity,
            kinds,
        }
    }

    fn root_kind(&self, root: ArcVarId) -> RootKind {
        self.kinds
            .get(root.index())
            .copied()
            .unwrap_or(RootKind::Opaque)
    }
}

impl AliasAnalysis for BasicAliasAnalysis<'_> {
    fn may_alias(&self, a: ArcVarId, b: ArcVarId) -> bool {
        if !self.func.needs_rc(a) || !self.func.needs_rc(b) {
            return false;
        }
        let (root_a, root_b) = (self.identity.root(a), self.identity.root(b));
        if root_a == root_b {
            return true;
        }
        !matches!(
            (self.root_kind(root_a), self.root_kind(root_b)),
            (RootKind::Allocation, RootKind::Allocation | RootKind::Argument)
                | (RootKind::Argument, RootKind::Allocation)
        )
    }
}

// ── Effect predicates ───────────────────────────────────────────────

/// Calls with unknown effects and stores can release arbitrary objects.
fn may_release_anything(instr: &ArcInstr) -> bool {
    matches!(
        instr,
        ArcInstr::Apply {
            effects: CallEffects::Unknown,
            ..
        } | ArcInstr::Set { .. }
    )
}

/// Can `inst` decrement the reference count of `tracked`?
pub fn may_decrement_ref_count(
    inst: InstrRef<'_>,
    tracked: TrackedValue,
    aa: &dyn AliasAnalysis,
) -> bool {
    match inst {
        InstrRef::Instr(ArcInstr::RcDec { var }) => aa.may_alias(*var, tracked.root()),
        InstrRef::Instr(instr) => may_release_anything(instr),
        InstrRef::Terminator(_) => false,
    }
}

/// Can `inst` use `tracked` in a way that needs it alive?
///
/// Copies, casts and RC operations are not uses.
pub fn may_use_value(inst: InstrRef<'_>, tracked: TrackedValue, aa: &dyn AliasAnalysis) -> bool {
    if let InstrRef::Instr(
        ArcInstr::Let {
            value: ArcValue::Var(_),
            ..
        }
        | ArcInstr::Cast { .. }
        | ArcInstr::RcInc { .. }
        | ArcInstr::RcDec { .. },
    ) = inst
    {
        return false;
    }
    inst.used_vars()
        .iter()
        .any(|&var| aa.may_alias(var, tracked.root()))
}

/// Can `inst` observe the reference count of `tracked`?
pub fn may_check_ref_count(
    inst: InstrRef<'_>,
    tracked: TrackedValue,
    aa: &dyn AliasAnalysis,
) -> bool {
    match inst {
        InstrRef::Instr(ArcInstr::IsShared { var, .. }) => aa.may_alias(*var, tracked.root()),
        InstrRef::Instr(ArcInstr::Apply {
            effects: CallEffects::Unknown,
            ..
        }) => true,
        _ => false,
    }
}

/// Does `inst` invalidate an in-flight match on `tracked`?
pub fn interferes(inst: InstrRef<'_>, tracked: TrackedValue, aa: &dyn AliasAnalysis) -> bool {
    may_decrement_ref_count(inst, tracked, aa)
        || may_use_value(inst, tracked, aa)
        || may_check_ref_count(inst, tracked, aa)
}

/// Does a summarized loop site affect `tracked` at all?
///
/// Same as [`interferes`], plus retains of anything that may alias it.
pub fn touches(inst: InstrRef<'_>, tracked: TrackedValue, aa: &dyn AliasAnalysis) -> bool {
    if let InstrRef::Instr(ArcInstr::RcInc { var }) = inst {
        if aa.may_alias(*var, tracked.root()) {
            return true;
        }
    }
    interferes(inst, tracked, aa)
}

/// Does `inst` use the object `arg` itself (not merely something aliasing
/// it)? Copies and casts do not count.
pub fn uses_identity(inst: InstrRef<'_>, arg: TrackedValue, identity: &dyn RcIdentity) -> bool {
    if let InstrRef::Instr(
        ArcInstr::Let {
            value: ArcValue::Var(_),
            ..
        }
        | ArcInstr::Cast { .. },
    ) = inst
    {
        return false;
    }
    inst.used_vars()
        .iter()
        .any(|&var| identity.rc_identity(var) == arg)
}

/// Can `inst` matter to any reference-counted object of `func`?
///
/// These are the sites a loop summary records.
pub fn is_arc_relevant(inst: InstrRef<'_>, func: &ArcFunction) -> bool {
    match inst {
        InstrRef::Instr(ArcInstr::RcInc { var } | ArcInstr::RcDec { var }) => func.needs_rc(*var),
        InstrRef::Instr(
            ArcInstr::Let {
                value: ArcValue::Var(_),
                ..
            }
            | ArcInstr::Cast { .. },
        ) => false,
        InstrRef::Instr(instr) if may_release_anything(instr) => true,
        _ => inst.used_vars().iter().any(|&var| func.needs_rc(var)),
    }
}
