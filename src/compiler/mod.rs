use itertools::Itertools;
use log::debug;
use thiserror::Error;

use crate::analyzer::AnalyzeError;
use crate::analyzer::analyze;
use crate::cfg::CfgError;
use crate::cfg::builder::build_program;
use crate::cfg::dump::dump_cfg;
use crate::diagnostics::Diagnostics;
use crate::emitter::EmitError;
use crate::emitter::emit_program;
use crate::parser::errors::ParseError;
use crate::parser::parse_source;

#[derive(Debug, Error)]
pub enum CompilerError {
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),
    #[error("semantic error: {0}")]
    Analyze(#[from] AnalyzeError),
    #[error("control flow error: {0}")]
    Cfg(#[from] CfgError),
    #[error("emit error: {0}")]
    Emit(#[from] EmitError),
}

#[derive(Debug, Clone, Default)]
pub struct CompileOptions {
    /// produce the CFG dump instead of IL
    pub dump_cfg: bool,
}

#[derive(Debug)]
pub struct CompileOutput {
    pub il: String,
    pub cfg_dump: Option<String>,
    pub diagnostics: Diagnostics,
}

/// Runs the whole pipeline on one source text: parse, analyze, build the
/// CFGs, emit IL. All state lives in this call; two compilations never
/// share anything.
pub fn compile_source(
    source: &str,
    options: &CompileOptions,
) -> Result<CompileOutput, CompilerError> {
    let mut diagnostics = Diagnostics::new();

    let program = parse_source(source)?;
    debug!("parsed {} top-level statements", program.statements.len());

    let symbols = analyze(&program, &mut diagnostics)?;
    let graphs = build_program(&program, &symbols, &mut diagnostics)?;

    if options.dump_cfg {
        let dump = graphs.iter().map(dump_cfg).join("\n");
        return Ok(CompileOutput {
            il: String::new(),
            cfg_dump: Some(dump),
            diagnostics,
        });
    }

    let il = emit_program(&graphs, &symbols, &mut diagnostics)?;
    Ok(CompileOutput {
        il,
        cfg_dump: None,
        diagnostics,
    })
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::*;

    fn compile(src: &str) -> CompileOutput {
        compile_source(src, &CompileOptions::default()).expect("compilation failed")
    }

    #[test]
    fn test_minimal_program() {
        let out = compile("PRINT 42\nEND\n");
        assert!(out.il.contains("export function w $main()"));
        assert!(out.il.contains("call $basic_print_int(w 42)"));
        assert!(out.il.contains("call $basic_print_newline()"));
        assert!(out.il.contains("call $basic_runtime_init()"));
        assert!(out.il.contains("ret 0"));
    }

    #[test]
    fn test_string_literal_interned_once() {
        let out = compile("PRINT \"hi\"\nPRINT \"hi\"\nEND\n");
        let data_lines: Vec<&str> = out
            .il
            .lines()
            .filter(|l| l.starts_with("data") && l.contains("\"hi\""))
            .collect();
        assert_eq!(data_lines.len(), 1);
    }

    #[test]
    fn test_function_emitted_before_main() {
        let src = indoc! {"
            FUNCTION Twice&(n AS LONG) AS LONG
                RETURN n * 2
            END FUNCTION
            PRINT Twice&(21)
            END
        "};
        let out = compile(src);
        let func_pos = out.il.find("$TWICE_l").expect("function symbol");
        let main_pos = out.il.find("$main").expect("main symbol");
        assert!(func_pos < main_pos);
        assert!(out.il.contains("export function l $TWICE_l(l %p0)"));
    }

    #[test]
    fn test_cfg_dump_mode() {
        let out = compile_source(
            "PRINT 1\nEND\n",
            &CompileOptions {
                dump_cfg: true,
            },
        )
        .unwrap();
        assert!(out.il.is_empty());
        let dump = out.cfg_dump.unwrap();
        assert!(dump.contains("=== CFG main ==="));
    }

    #[test]
    fn test_parse_error_propagates() {
        assert!(matches!(
            compile_source("FOR WITHOUT ANYTHING\n", &CompileOptions::default()),
            Err(CompilerError::Parse(_))
        ));
    }

    #[test]
    fn test_warnings_do_not_fail() {
        let out = compile("x = 1\nEND\n");
        assert!(out.diagnostics.warnings().count() >= 1);
    }
}
