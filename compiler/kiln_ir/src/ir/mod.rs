//! ARC IR: basic-block intermediate representation for ARC analysis.
//!
//! Reference-count operations (`RcInc`/`RcDec`) are explicit instructions,
//! inserted conservatively by an earlier lowering stage. The ARC optimizer
//! in `kiln_arc` analyzes this IR read-only.
//!
//! # Architecture
//!
//! - **[`ArcModule`]**: every function of a compilation unit
//! - **[`ArcFunction`]**: parameters with ownership, blocks, variable types
//! - **[`ArcBlock`]**: block parameters, body instructions, terminator
//! - **[`ArcInstr`]**: a single instruction (let-binding, call, RC op, ...)
//! - **[`ArcTerminator`]**: block exit (return, throw, jump, branch, ...)
//!
//! Values are named via [`ArcVarId`] (SSA). Instructions are addressed by
//! [`InstrId`]; the terminator of a block is addressed as the position one
//! past the last body instruction, so every program point has an id.

use std::fmt;

use smallvec::{smallvec, SmallVec};

use crate::Name;

// ── ID newtypes ─────────────────────────────────────────────────────

/// Variable ID within an ARC IR function.
///
/// IDs are allocated sequentially starting from 0 and index
/// [`ArcFunction::var_types`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "cache", derive(serde::Serialize, serde::Deserialize))]
#[repr(transparent)]
pub struct ArcVarId(u32);

impl ArcVarId {
    /// Create a new variable ID from a raw index.
    #[inline]
    pub fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Get the raw `u32` value.
    #[inline]
    pub fn raw(self) -> u32 {
        self.0
    }

    /// Get the index as `usize` (for indexing into `Vec`s).
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ArcVarId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

/// Basic block ID within an ARC IR function.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "cache", derive(serde::Serialize, serde::Deserialize))]
#[repr(transparent)]
pub struct ArcBlockId(u32);

impl ArcBlockId {
    /// Create a new block ID from a raw index.
    #[inline]
    pub fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Get the raw `u32` value.
    #[inline]
    pub fn raw(self) -> u32 {
        self.0
    }

    /// Get the index as `usize` (for indexing into `Vec`s).
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ArcBlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bb{}", self.0)
    }
}

/// Address of a program point: a body instruction or a block terminator.
///
/// `index < body.len()` addresses `body[index]`; `index == body.len()`
/// addresses the terminator. Ordering is by block, then position, which
/// gives every analysis result a deterministic iteration order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "cache", derive(serde::Serialize, serde::Deserialize))]
pub struct InstrId {
    /// The containing block.
    pub block: ArcBlockId,
    /// Position within the block.
    pub index: u32,
}

impl InstrId {
    /// Create an instruction address.
    #[inline]
    pub fn new(block: ArcBlockId, index: u32) -> Self {
        Self { block, index }
    }
}

impl fmt::Display for InstrId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.block, self.index)
    }
}

// ── Types ───────────────────────────────────────────────────────────

/// ARC classification for a type.
///
/// Determines whether values of this type are reference counted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "cache", derive(serde::Serialize, serde::Deserialize))]
pub enum ArcClass {
    /// No reference counting. The value is purely stack/register.
    Scalar,
    /// Definitely a reference-counted heap pointer.
    DefiniteRef,
    /// Might contain a reference-counted pointer (unresolved generic).
    /// Conservatively treated as reference counted.
    PossibleRef,
}

impl ArcClass {
    /// Returns `true` for `DefiniteRef` and `PossibleRef`.
    #[inline]
    pub fn needs_rc(self) -> bool {
        self != ArcClass::Scalar
    }
}

/// Type of an IR variable: its printed name plus its ARC classification.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "cache", derive(serde::Serialize, serde::Deserialize))]
pub struct ArcType {
    pub name: Name,
    pub class: ArcClass,
}

impl ArcType {
    /// A non-reference-counted type.
    pub fn scalar(name: Name) -> Self {
        Self {
            name,
            class: ArcClass::Scalar,
        }
    }

    /// A reference-counted type.
    pub fn reference(name: Name) -> Self {
        Self {
            name,
            class: ArcClass::DefiniteRef,
        }
    }
}

// ── Values ──────────────────────────────────────────────────────────

/// Literal value in the ARC IR. Literals are never reference counted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "cache", derive(serde::Serialize, serde::Deserialize))]
pub enum LitValue {
    Int(i64),
    Bool(bool),
    Unit,
}

/// Primitive scalar operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "cache", derive(serde::Serialize, serde::Deserialize))]
pub enum PrimOp {
    Add,
    Sub,
    Mul,
    Eq,
    Lt,
    Not,
}

impl PrimOp {
    /// Builtin name used by the printer.
    pub fn as_str(self) -> &'static str {
        match self {
            PrimOp::Add => "add",
            PrimOp::Sub => "sub",
            PrimOp::Mul => "mul",
            PrimOp::Eq => "cmp_eq",
            PrimOp::Lt => "cmp_lt",
            PrimOp::Not => "not",
        }
    }
}

/// Right-hand side of a `Let` instruction.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "cache", derive(serde::Serialize, serde::Deserialize))]
pub enum ArcValue {
    /// Copy of an existing variable. The copy has the same RC identity.
    Var(ArcVarId),
    /// A literal constant.
    Literal(LitValue),
    /// A primitive operation on scalars.
    PrimOp { op: PrimOp, args: Vec<ArcVarId> },
}

/// What a call is statically known to do to reference counts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "cache", derive(serde::Serialize, serde::Deserialize))]
pub enum CallEffects {
    /// Nothing is known: the callee may retain, release or inspect any
    /// reference-counted object.
    #[default]
    Unknown,
    /// The callee only reads memory; it can observe its arguments but
    /// never releases anything.
    ReadOnly,
    /// The callee does not touch memory at all beyond its arguments.
    ReadNone,
}

// ── Parameters ──────────────────────────────────────────────────────

/// Ownership convention of a function parameter.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "cache", derive(serde::Serialize, serde::Deserialize))]
pub enum Ownership {
    /// The caller keeps ownership; the callee must not release.
    Borrowed,
    /// The callee takes ownership ("consumed") and must release the
    /// reference exactly once on every exit path.
    Owned,
}

/// A function parameter annotated with its ownership convention.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "cache", derive(serde::Serialize, serde::Deserialize))]
pub struct ArcParam {
    /// The variable bound to this parameter.
    pub var: ArcVarId,
    /// Ownership convention.
    pub ownership: Ownership,
}

// ── Instructions ────────────────────────────────────────────────────

/// A single instruction in an ARC IR basic block.
///
/// The set of instructions is closed: analyses match exhaustively, so a
/// new instruction kind has to be classified everywhere before it compiles.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "cache", derive(serde::Serialize, serde::Deserialize))]
pub enum ArcInstr {
    /// Bind a value to a variable: `let dst = value`.
    Let { dst: ArcVarId, value: ArcValue },

    /// Reference cast: `dst` denotes the same object as `src` under a
    /// different type.
    Cast { dst: ArcVarId, src: ArcVarId },

    /// Direct function call: `let dst = func(args...)`.
    Apply {
        dst: ArcVarId,
        func: Name,
        args: Vec<ArcVarId>,
        effects: CallEffects,
    },

    /// Field projection: `let dst = value.field`.
    Project {
        dst: ArcVarId,
        value: ArcVarId,
        field: u32,
    },

    /// Allocate a fresh object from `args`, which are consumed.
    Construct { dst: ArcVarId, args: Vec<ArcVarId> },

    /// Increment reference count (retain).
    RcInc { var: ArcVarId },

    /// Decrement reference count and free if zero (release).
    RcDec { var: ArcVarId },

    /// Test whether `var` is uniquely referenced. Observes the count.
    IsShared { dst: ArcVarId, var: ArcVarId },

    /// In-place field update: `base.field = value`. The previous field
    /// value is released.
    Set {
        base: ArcVarId,
        field: u32,
        value: ArcVarId,
    },
}

impl ArcInstr {
    /// Returns the variable defined by this instruction, if any.
    pub fn defined_var(&self) -> Option<ArcVarId> {
        match self {
            ArcInstr::Let { dst, .. }
            | ArcInstr::Cast { dst, .. }
            | ArcInstr::Apply { dst, .. }
            | ArcInstr::Project { dst, .. }
            | ArcInstr::Construct { dst, .. }
            | ArcInstr::IsShared { dst, .. } => Some(*dst),

            ArcInstr::RcInc { .. } | ArcInstr::RcDec { .. } | ArcInstr::Set { .. } => None,
        }
    }

    /// Returns all variables read by this instruction.
    ///
    /// The `dst` of value-producing instructions is not included.
    pub fn used_vars(&self) -> SmallVec<[ArcVarId; 4]> {
        match self {
            ArcInstr::Let { value, .. } => match value {
                ArcValue::Var(v) => smallvec![*v],
                ArcValue::Literal(_) => SmallVec::new(),
                ArcValue::PrimOp { args, .. } => args.iter().copied().collect(),
            },
            ArcInstr::Apply { args, .. } | ArcInstr::Construct { args, .. } => {
                args.iter().copied().collect()
            }
            ArcInstr::Cast { src, .. } => smallvec![*src],
            ArcInstr::Project { value, .. } => smallvec![*value],
            ArcInstr::RcInc { var } | ArcInstr::RcDec { var } | ArcInstr::IsShared { var, .. } => {
                smallvec![*var]
            }
            ArcInstr::Set { base, value, .. } => smallvec![*base, *value],
        }
    }

    /// Returns `true` for `RcInc` and `RcDec`.
    pub fn is_rc_op(&self) -> bool {
        matches!(self, ArcInstr::RcInc { .. } | ArcInstr::RcDec { .. })
    }
}

// ── Terminators ─────────────────────────────────────────────────────

/// Block terminator: how control leaves a basic block.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "cache", derive(serde::Serialize, serde::Deserialize))]
pub enum ArcTerminator {
    /// Return a value from the function.
    Return { value: ArcVarId },

    /// Leave the function with an error value.
    Throw { value: ArcVarId },

    /// Unconditional jump, passing arguments to the target's parameters.
    Jump {
        target: ArcBlockId,
        args: Vec<ArcVarId>,
    },

    /// Conditional branch on a boolean.
    Branch {
        cond: ArcVarId,
        then_block: ArcBlockId,
        else_block: ArcBlockId,
    },

    /// Multi-way branch on an integer discriminant.
    Switch {
        scrutinee: ArcVarId,
        cases: Vec<(u64, ArcBlockId)>,
        default: ArcBlockId,
    },

    /// Control never reaches the end of this block (the program traps or
    /// a call never returns).
    Unreachable,
}

impl ArcTerminator {
    /// Returns all variables read by this terminator.
    pub fn used_vars(&self) -> SmallVec<[ArcVarId; 4]> {
        match self {
            ArcTerminator::Return { value } | ArcTerminator::Throw { value } => smallvec![*value],
            ArcTerminator::Jump { args, .. } => args.iter().copied().collect(),
            ArcTerminator::Branch { cond, .. } => smallvec![*cond],
            ArcTerminator::Switch { scrutinee, .. } => smallvec![*scrutinee],
            ArcTerminator::Unreachable => SmallVec::new(),
        }
    }

    /// Successor blocks in terminator order (may contain duplicates).
    pub fn successors(&self) -> SmallVec<[ArcBlockId; 4]> {
        match self {
            ArcTerminator::Return { .. }
            | ArcTerminator::Throw { .. }
            | ArcTerminator::Unreachable => SmallVec::new(),
            ArcTerminator::Jump { target, .. } => smallvec![*target],
            ArcTerminator::Branch {
                then_block,
                else_block,
                ..
            } => smallvec![*then_block, *else_block],
            ArcTerminator::Switch { cases, default, .. } => {
                let mut targets = SmallVec::with_capacity(cases.len() + 1);
                for &(_, b) in cases {
                    targets.push(b);
                }
                targets.push(*default);
                targets
            }
        }
    }

    /// Returns `true` if control leaves the function here (return or throw).
    pub fn is_function_exit(&self) -> bool {
        matches!(
            self,
            ArcTerminator::Return { .. } | ArcTerminator::Throw { .. }
        )
    }
}

/// A program point: either a body instruction or a terminator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InstrRef<'a> {
    Instr(&'a ArcInstr),
    Terminator(&'a ArcTerminator),
}

impl InstrRef<'_> {
    /// Variables read at this program point.
    pub fn used_vars(&self) -> SmallVec<[ArcVarId; 4]> {
        match self {
            InstrRef::Instr(instr) => instr.used_vars(),
            InstrRef::Terminator(term) => term.used_vars(),
        }
    }
}

// ── Blocks ──────────────────────────────────────────────────────────

/// A basic block in the ARC IR.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "cache", derive(serde::Serialize, serde::Deserialize))]
pub struct ArcBlock {
    /// This block's identifier. Equals its index in [`ArcFunction::blocks`].
    pub id: ArcBlockId,
    /// Block parameters: values passed from predecessors via `Jump`.
    pub params: Vec<ArcVarId>,
    /// Sequential instructions executed in order.
    pub body: Vec<ArcInstr>,
    /// How control leaves this block.
    pub terminator: ArcTerminator,
}

impl ArcBlock {
    /// Address of this block's terminator.
    pub fn terminator_id(&self) -> InstrId {
        InstrId::new(self.id, self.body_len_u32())
    }

    /// Addresses of every program point in program order, terminator last.
    pub fn instr_ids(&self) -> impl DoubleEndedIterator<Item = InstrId> + '_ {
        (0..=self.body_len_u32()).map(move |i| InstrId::new(self.id, i))
    }

    /// Program point at `index` (`index == body.len()` is the terminator).
    pub fn instr_at(&self, index: u32) -> Option<InstrRef<'_>> {
        let idx = index as usize;
        match idx.cmp(&self.body.len()) {
            std::cmp::Ordering::Less => Some(InstrRef::Instr(&self.body[idx])),
            std::cmp::Ordering::Equal => Some(InstrRef::Terminator(&self.terminator)),
            std::cmp::Ordering::Greater => None,
        }
    }

    fn body_len_u32(&self) -> u32 {
        u32::try_from(self.body.len()).unwrap_or_else(|_| panic!("block body exceeds u32::MAX"))
    }
}

// ── Functions ───────────────────────────────────────────────────────

/// A complete function in the ARC IR.
///
/// A function with no blocks is a declaration (an external symbol with a
/// signature but no body).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "cache", derive(serde::Serialize, serde::Deserialize))]
pub struct ArcFunction {
    /// The function's name.
    pub name: Name,
    /// Function parameters with ownership annotations.
    pub params: Vec<ArcParam>,
    /// Basic blocks in definition order. `blocks[entry.index()]` is the entry.
    pub blocks: Vec<ArcBlock>,
    /// The entry block ID.
    pub entry: ArcBlockId,
    /// Type of each variable, indexed by `ArcVarId::index()`.
    pub var_types: Vec<ArcType>,
}

impl ArcFunction {
    /// Create a function whose entry is `bb0`.
    pub fn new(
        name: Name,
        params: Vec<ArcParam>,
        blocks: Vec<ArcBlock>,
        var_types: Vec<ArcType>,
    ) -> Self {
        Self {
            name,
            params,
            blocks,
            entry: ArcBlockId::new(0),
            var_types,
        }
    }

    /// Create a body-less declaration.
    pub fn declaration(name: Name, params: Vec<ArcParam>, var_types: Vec<ArcType>) -> Self {
        Self::new(name, params, Vec::new(), var_types)
    }

    /// `true` if the function has a body.
    pub fn is_definition(&self) -> bool {
        !self.blocks.is_empty()
    }

    /// Look up the type of a variable.
    ///
    /// # Panics
    ///
    /// Debug-panics if `var` is out of bounds.
    #[inline]
    pub fn var_type(&self, var: ArcVarId) -> ArcType {
        debug_assert!(
            var.index() < self.var_types.len(),
            "ArcVarId {} out of bounds (have {} vars)",
            var.raw(),
            self.var_types.len(),
        );
        self.var_types[var.index()]
    }

    /// `true` if values of `var`'s type are reference counted.
    #[inline]
    pub fn needs_rc(&self, var: ArcVarId) -> bool {
        self.var_types
            .get(var.index())
            .is_some_and(|ty| ty.class.needs_rc())
    }

    /// Look up a block by ID.
    #[inline]
    pub fn block(&self, id: ArcBlockId) -> &ArcBlock {
        &self.blocks[id.index()]
    }

    /// Look up a program point.
    pub fn instr(&self, id: InstrId) -> Option<InstrRef<'_>> {
        self.blocks.get(id.block.index())?.instr_at(id.index)
    }

    /// Number of variables in this function.
    pub fn num_vars(&self) -> usize {
        self.var_types.len()
    }
}

/// All functions of one compilation unit, in definition order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "cache", derive(serde::Serialize, serde::Deserialize))]
pub struct ArcModule {
    pub functions: Vec<ArcFunction>,
}

impl ArcModule {
    /// Create a module from its functions.
    pub fn new(functions: Vec<ArcFunction>) -> Self {
        Self { functions }
    }

    /// Functions that have a body.
    pub fn definitions(&self) -> impl Iterator<Item = &ArcFunction> {
        self.functions.iter().filter(|f| f.is_definition())
    }
}
