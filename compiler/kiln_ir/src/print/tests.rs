use pretty_assertions::assert_eq;

use crate::ir::{
    ArcBlock, ArcBlockId, ArcFunction, ArcInstr, ArcParam, ArcTerminator, ArcType, ArcValue,
    ArcVarId, CallEffects, InstrId, LitValue, Ownership,
};
use crate::StringInterner;

use super::FunctionPrinter;

fn v(n: u32) -> ArcVarId {
    ArcVarId::new(n)
}

fn b(n: u32) -> ArcBlockId {
    ArcBlockId::new(n)
}

/// `sil @example : (%0 : @owned $Klass)` with a retain, a call and a release.
fn example(interner: &StringInterner) -> ArcFunction {
    let klass = ArcType::reference(interner.intern("Klass"));
    let int = ArcType::scalar(interner.intern("Int"));
    ArcFunction::new(
        interner.intern("example"),
        vec![ArcParam {
            var: v(0),
            ownership: Ownership::Owned,
        }],
        vec![
            ArcBlock {
                id: b(0),
                params: vec![],
                body: vec![
                    ArcInstr::RcInc { var: v(0) },
                    ArcInstr::Apply {
                        dst: v(1),
                        func: interner.intern("consume"),
                        args: vec![v(0)],
                        effects: CallEffects::ReadOnly,
                    },
                    ArcInstr::Let {
                        dst: v(2),
                        value: ArcValue::Literal(LitValue::Int(7)),
                    },
                ],
                terminator: ArcTerminator::Jump {
                    target: b(1),
                    args: vec![],
                },
            },
            ArcBlock {
                id: b(1),
                params: vec![],
                body: vec![ArcInstr::RcDec { var: v(0) }],
                terminator: ArcTerminator::Return { value: v(2) },
            },
        ],
        vec![klass, int, int],
    )
}

#[test]
fn prints_param_with_convention() {
    let interner = StringInterner::new();
    let func = example(&interner);
    let printer = FunctionPrinter::new(&func, &interner);
    assert_eq!(printer.param(&func.params[0]).to_string(), "%0 : @owned $Klass");
}

#[test]
fn prints_rc_ops() {
    let interner = StringInterner::new();
    let func = example(&interner);
    let printer = FunctionPrinter::new(&func, &interner);
    assert_eq!(
        printer.instr(InstrId::new(b(0), 0)).to_string(),
        "strong_retain %0 : $Klass"
    );
    assert_eq!(
        printer.instr(InstrId::new(b(1), 0)).to_string(),
        "strong_release %0 : $Klass"
    );
}

#[test]
fn prints_calls_literals_and_terminators() {
    let interner = StringInterner::new();
    let func = example(&interner);
    let printer = FunctionPrinter::new(&func, &interner);
    assert_eq!(
        printer.instr(InstrId::new(b(0), 1)).to_string(),
        "%1 = apply [readonly] @consume(%0) : $Int"
    );
    assert_eq!(
        printer.instr(InstrId::new(b(0), 2)).to_string(),
        "%2 = integer_literal $Int, 7"
    );
    assert_eq!(printer.instr(InstrId::new(b(0), 3)).to_string(), "br bb1");
    assert_eq!(
        printer.instr(InstrId::new(b(1), 1)).to_string(),
        "return %2 : $Int"
    );
}

#[test]
fn invalid_address_is_marked() {
    let interner = StringInterner::new();
    let func = example(&interner);
    let printer = FunctionPrinter::new(&func, &interner);
    assert_eq!(
        printer.instr(InstrId::new(b(4), 0)).to_string(),
        "<invalid bb4[0]>"
    );
}

#[test]
fn prints_whole_function() {
    let interner = StringInterner::new();
    let func = example(&interner);
    let text = FunctionPrinter::new(&func, &interner).to_string();
    let expected = "\
sil @example : (%0 : @owned $Klass) {
bb0:
  strong_retain %0 : $Klass
  %1 = apply [readonly] @consume(%0) : $Int
  %2 = integer_literal $Int, 7
  br bb1
bb1:
  strong_release %0 : $Klass
  return %2 : $Int
}
";
    assert_eq!(text, expected);
}

#[test]
fn prints_declaration_without_body() {
    let interner = StringInterner::new();
    let klass = ArcType::reference(interner.intern("Klass"));
    let decl = ArcFunction::declaration(
        interner.intern("external"),
        vec![ArcParam {
            var: v(0),
            ownership: Ownership::Borrowed,
        }],
        vec![klass],
    );
    assert_eq!(
        FunctionPrinter::new(&decl, &interner).to_string(),
        "sil @external : (%0 : @guaranteed $Klass)\n"
    );
}
