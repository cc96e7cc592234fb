use core::fmt;
use core::fmt::Write;

use itertools::Itertools;

use crate::cfg::ControlFlowGraph;

/// Human-readable dump for the `-G` driver flag. Blocks appear in id
/// order with their flags, statement keywords, and outgoing typed edges.
pub fn dump_cfg(graph: &ControlFlowGraph) -> String {
    let mut out = String::new();
    render(graph, &mut out).expect("writing to a String cannot fail");
    out
}

fn render(graph: &ControlFlowGraph, out: &mut impl Write) -> fmt::Result {
    match &graph.function {
        Some(meta) => writeln!(
            out,
            "=== CFG {} (function, returns {}) ===",
            graph.name, meta.return_type
        )?,
        None => writeln!(out, "=== CFG {} ===", graph.name)?,
    }
    writeln!(
        out,
        "entry={} exit={} blocks={} edges={}",
        graph.entry,
        graph.exit,
        graph.blocks.len(),
        graph.edges.len()
    )?;
    for block in &graph.blocks {
        let mut flags = Vec::new();
        if block.id == graph.entry {
            flags.push("entry");
        }
        if block.id == graph.exit {
            flags.push("exit");
        }
        if block.is_loop_header {
            flags.push("loop-header");
        }
        if block.is_loop_exit {
            flags.push("loop-exit");
        }
        if block.is_subroutine {
            flags.push("subroutine");
        }
        if block.is_terminator {
            flags.push("terminated");
        }
        write!(out, "[{}] {}", block.id, block.label)?;
        if !flags.is_empty() {
            write!(out, " ({})", flags.join(","))?;
        }
        writeln!(out)?;
        for statement in &block.statements {
            match statement.loc.basic_line {
                Some(n) => writeln!(out, "    {:>5} {}", n, statement.kind.keyword())?,
                None => writeln!(out, "          {}", statement.kind.keyword())?,
            }
        }
        for edge in graph.edges_from(block.id) {
            if edge.label.is_empty() {
                writeln!(out, "    -> {} [{}]", edge.to, edge.kind)?;
            } else {
                writeln!(out, "    -> {} [{} {}]", edge.to, edge.kind, edge.label)?;
            }
        }
    }
    if !graph.line_index.is_empty() {
        let lines = graph
            .line_index
            .iter()
            .map(|(line, block)| format!("{line}->{block}"))
            .join(" ");
        writeln!(out, "line index: {lines}")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::analyze;
    use crate::cfg::builder::build_program;
    use crate::diagnostics::Diagnostics;
    use crate::parser::parse_source;

    #[test]
    fn test_dump_contains_blocks_and_edges() {
        let program = parse_source("WHILE x < 3\n x = x + 1\nWEND\n").unwrap();
        let mut diags = Diagnostics::new();
        let symbols = analyze(&program, &mut diags).unwrap();
        let graphs = build_program(&program, &symbols, &mut diags).unwrap();
        let text = dump_cfg(&graphs[0]);
        assert!(text.contains("=== CFG main ==="));
        assert!(text.contains("loop-header"));
        assert!(text.contains("[Conditional true]"));
        assert!(text.contains("[Conditional false]"));
    }
}
