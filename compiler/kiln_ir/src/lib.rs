//! Core IR types for the Kiln optimizer.
//!
//! This crate provides:
//!
//! - **Names** ([`Name`], [`StringInterner`]): compact interned identifiers
//!   for functions, types and constructors, shared by every function of a
//!   module.
//!
//! - **ARC IR** ([`ArcModule`], [`ArcFunction`], [`ArcBlock`], [`ArcInstr`],
//!   [`ArcTerminator`]): the basic-block IR with explicit `RcInc`/`RcDec`
//!   operations that the ARC optimizer in `kiln_arc` analyzes.
//!
//! - **Printing** ([`FunctionPrinter`]): the SIL-flavored textual form used
//!   by diagnostic dumps.

mod interner;
pub mod ir;
mod name;
pub mod print;

pub use interner::{InternError, StringInterner};
pub use ir::{
    ArcBlock, ArcBlockId, ArcClass, ArcFunction, ArcInstr, ArcModule, ArcParam, ArcTerminator,
    ArcType, ArcValue, ArcVarId, CallEffects, InstrId, InstrRef, LitValue, Ownership, PrimOp,
};
pub use name::Name;
pub use print::FunctionPrinter;
