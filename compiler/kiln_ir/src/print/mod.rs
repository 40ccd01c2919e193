//! Textual form of ARC IR.
//!
//! The syntax is SIL-flavored (`strong_retain %0 : $Klass`) because the
//! epilogue dumper's output is compared against SIL-style expectations.
//! Printing needs the [`StringInterner`] to resolve function and type names,
//! so every printable item is wrapped in a small display adapter borrowing
//! a [`FunctionPrinter`].

use std::fmt;

use crate::ir::{
    ArcBlock, ArcFunction, ArcInstr, ArcParam, ArcTerminator, ArcValue, ArcVarId, CallEffects,
    InstrId, InstrRef, LitValue, Ownership,
};
use crate::StringInterner;

/// Prints parts of one function.
#[derive(Clone, Copy)]
pub struct FunctionPrinter<'a> {
    func: &'a ArcFunction,
    interner: &'a StringInterner,
}

impl<'a> FunctionPrinter<'a> {
    pub fn new(func: &'a ArcFunction, interner: &'a StringInterner) -> Self {
        Self { func, interner }
    }

    /// The function's name as a string.
    pub fn name(&self) -> &'static str {
        self.interner.lookup(self.func.name)
    }

    /// Textual form of a parameter: `%0 : @owned $Klass`.
    pub fn param(&self, param: &'a ArcParam) -> impl fmt::Display + 'a {
        let printer = *self;
        adapter(move |f| {
            let convention = match param.ownership {
                Ownership::Owned => "@owned",
                Ownership::Borrowed => "@guaranteed",
            };
            write!(f, "{} : {convention} ", param.var)?;
            printer.write_ty(f, param.var)
        })
    }

    /// Textual form of the instruction or terminator at `id`.
    ///
    /// Addresses outside the function print as `<invalid bbN[i]>`.
    pub fn instr(&self, id: InstrId) -> impl fmt::Display + 'a {
        let printer = *self;
        adapter(move |f| match printer.func.instr(id) {
            Some(InstrRef::Instr(instr)) => printer.write_instr(f, instr),
            Some(InstrRef::Terminator(term)) => printer.write_terminator(f, term),
            None => write!(f, "<invalid {id}>"),
        })
    }

    fn write_ty(&self, f: &mut fmt::Formatter<'_>, var: ArcVarId) -> fmt::Result {
        match self.func.var_types.get(var.index()) {
            Some(ty) => write!(f, "${}", self.interner.lookup(ty.name)),
            None => write!(f, "$<unknown>"),
        }
    }

    fn write_operand(&self, f: &mut fmt::Formatter<'_>, var: ArcVarId) -> fmt::Result {
        write!(f, "{var} : ")?;
        self.write_ty(f, var)
    }

    fn write_args(f: &mut fmt::Formatter<'_>, args: &[ArcVarId]) -> fmt::Result {
        write!(f, "(")?;
        for (i, arg) in args.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{arg}")?;
        }
        write!(f, ")")
    }

    fn write_instr(&self, f: &mut fmt::Formatter<'_>, instr: &ArcInstr) -> fmt::Result {
        match instr {
            ArcInstr::Let { dst, value } => match value {
                ArcValue::Var(src) => {
                    write!(f, "{dst} = copy_value ")?;
                    self.write_operand(f, *src)
                }
                ArcValue::Literal(LitValue::Int(n)) => {
                    write!(f, "{dst} = integer_literal ")?;
                    self.write_ty(f, *dst)?;
                    write!(f, ", {n}")
                }
                ArcValue::Literal(LitValue::Bool(b)) => {
                    write!(f, "{dst} = bool_literal ")?;
                    self.write_ty(f, *dst)?;
                    write!(f, ", {b}")
                }
                ArcValue::Literal(LitValue::Unit) => write!(f, "{dst} = tuple ()"),
                ArcValue::PrimOp { op, args } => {
                    write!(f, "{dst} = builtin \"{}\"", op.as_str())?;
                    Self::write_args(f, args)?;
                    write!(f, " : ")?;
                    self.write_ty(f, *dst)
                }
            },
            ArcInstr::Cast { dst, src } => {
                write!(f, "{dst} = unchecked_ref_cast ")?;
                self.write_operand(f, *src)?;
                write!(f, " to ")?;
                self.write_ty(f, *dst)
            }
            ArcInstr::Apply {
                dst,
                func,
                args,
                effects,
            } => {
                write!(f, "{dst} = apply ")?;
                match effects {
                    CallEffects::Unknown => {}
                    CallEffects::ReadOnly => write!(f, "[readonly] ")?,
                    CallEffects::ReadNone => write!(f, "[readnone] ")?,
                }
                write!(f, "@{}", self.interner.lookup(*func))?;
                Self::write_args(f, args)?;
                write!(f, " : ")?;
                self.write_ty(f, *dst)
            }
            ArcInstr::Project { dst, value, field } => {
                write!(f, "{dst} = project ")?;
                self.write_operand(f, *value)?;
                write!(f, ", #{field}")
            }
            ArcInstr::Construct { dst, args } => {
                write!(f, "{dst} = alloc_ref ")?;
                self.write_ty(f, *dst)?;
                Self::write_args(f, args)
            }
            ArcInstr::RcInc { var } => {
                write!(f, "strong_retain ")?;
                self.write_operand(f, *var)
            }
            ArcInstr::RcDec { var } => {
                write!(f, "strong_release ")?;
                self.write_operand(f, *var)
            }
            ArcInstr::IsShared { dst, var } => {
                write!(f, "{dst} = is_unique ")?;
                self.write_operand(f, *var)
            }
            ArcInstr::Set { base, field, value } => {
                write!(f, "store {value} to ")?;
                self.write_operand(f, *base)?;
                write!(f, ", #{field}")
            }
        }
    }

    fn write_terminator(&self, f: &mut fmt::Formatter<'_>, term: &ArcTerminator) -> fmt::Result {
        match term {
            ArcTerminator::Return { value } => {
                write!(f, "return ")?;
                self.write_operand(f, *value)
            }
            ArcTerminator::Throw { value } => {
                write!(f, "throw ")?;
                self.write_operand(f, *value)
            }
            ArcTerminator::Jump { target, args } => {
                write!(f, "br {target}")?;
                if args.is_empty() {
                    Ok(())
                } else {
                    Self::write_args(f, args)
                }
            }
            ArcTerminator::Branch {
                cond,
                then_block,
                else_block,
            } => write!(f, "cond_br {cond}, {then_block}, {else_block}"),
            ArcTerminator::Switch {
                scrutinee,
                cases,
                default,
            } => {
                write!(f, "switch_value {scrutinee}")?;
                for (value, target) in cases {
                    write!(f, ", case {value}: {target}")?;
                }
                write!(f, ", default {default}")
            }
            ArcTerminator::Unreachable => write!(f, "unreachable"),
        }
    }

    fn write_block(&self, f: &mut fmt::Formatter<'_>, block: &ArcBlock) -> fmt::Result {
        write!(f, "{}", block.id)?;
        if !block.params.is_empty() {
            write!(f, "(")?;
            for (i, param) in block.params.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                self.write_operand(f, *param)?;
            }
            write!(f, ")")?;
        }
        writeln!(f, ":")?;
        for id in block.instr_ids() {
            writeln!(f, "  {}", self.instr(id))?;
        }
        Ok(())
    }
}

/// Whole-function listing, used in debug logs and test failure output.
impl fmt::Display for FunctionPrinter<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sil @{} : (", self.name())?;
        for (i, param) in self.func.params.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", self.param(param))?;
        }
        if !self.func.is_definition() {
            return writeln!(f, ")");
        }
        writeln!(f, ") {{")?;
        for block in &self.func.blocks {
            self.write_block(f, block)?;
        }
        writeln!(f, "}}")
    }
}

struct Adapter<F>(F);

fn adapter<F>(write: F) -> Adapter<F>
where
    F: Fn(&mut fmt::Formatter<'_>) -> fmt::Result,
{
    Adapter(write)
}

impl<F> fmt::Display for Adapter<F>
where
    F: Fn(&mut fmt::Formatter<'_>) -> fmt::Result,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        (self.0)(f)
    }
}

#[cfg(test)]
mod tests;
