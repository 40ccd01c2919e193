//! Epilogue release dump.
//!
//! Textual output for tests and debugging:
//!
//! ```text
//! START: sil @example
//! %0 : @owned $Klass
//! strong_release %0 : $Klass
//! END: sil @example
//! ```
//!
//! Each function definition gets a START/END pair. Between them, every
//! argument with at least one epilogue release is printed, followed by its
//! releases. Declarations are skipped.
//!
//! Arguments without an epilogue match produce no lines at all, not an
//! argument line with an empty release list. A function with no matches
//! prints only its START/END markers.

use std::io::{self, Write};

use kiln_ir::{ArcFunction, ArcModule, FunctionPrinter, StringInterner};

use crate::config::ArcOptConfig;
use crate::pipeline::analyze_function;

/// Dump every definition of `module` in module order.
pub fn dump_epilogue_releases<W: Write>(
    module: &ArcModule,
    interner: &StringInterner,
    config: &ArcOptConfig,
    out: &mut W,
) -> io::Result<()> {
    for func in module.definitions() {
        dump_function_epilogue_releases(func, interner, config, out)?;
    }
    Ok(())
}

/// Dump one function. Writes nothing for a declaration.
///
/// A function whose control flow cannot be decomposed into regions still
/// gets its START/END markers, with nothing in between.
pub fn dump_function_epilogue_releases<W: Write>(
    func: &ArcFunction,
    interner: &StringInterner,
    config: &ArcOptConfig,
    out: &mut W,
) -> io::Result<()> {
    if !func.is_definition() {
        return Ok(());
    }
    let printer = FunctionPrinter::new(func, interner);
    writeln!(out, "START: sil @{}", printer.name())?;
    match analyze_function(func, config) {
        Ok(results) => {
            for param in &func.params {
                let releases = results.epilogue.releases_for_argument(param.var);
                if releases.is_empty() {
                    continue;
                }
                writeln!(out, "{}", printer.param(param))?;
                for &release in releases {
                    writeln!(out, "{}", printer.instr(release))?;
                }
            }
        }
        Err(error) => {
            tracing::warn!(function = printer.name(), %error, "no epilogue releases dumped");
        }
    }
    writeln!(out, "END: sil @{}", printer.name())
}
