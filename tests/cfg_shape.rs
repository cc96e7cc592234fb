//! Structural properties of built control-flow graphs: adjacency
//! symmetry, reachability discipline, terminator uniqueness, jump-target
//! uniqueness, and rebuild isomorphism.

use std::collections::HashSet;

use indoc::indoc;

use fasterbasic::analyzer::analyze;
use fasterbasic::cfg::BlockId;
use fasterbasic::cfg::ControlFlowGraph;
use fasterbasic::cfg::builder::build_program;
use fasterbasic::diagnostics::Diagnostics;
use fasterbasic::parser::parse_source;

fn build(src: &str) -> Vec<ControlFlowGraph> {
    let program = parse_source(src).expect("parse failed");
    let mut diags = Diagnostics::new();
    let symbols = analyze(&program, &mut diags).expect("analysis failed");
    build_program(&program, &symbols, &mut diags).expect("CFG construction failed")
}

fn reachable(cfg: &ControlFlowGraph) -> HashSet<BlockId> {
    let mut seen = HashSet::new();
    let mut stack = vec![cfg.entry];
    while let Some(id) = stack.pop() {
        if !seen.insert(id) {
            continue;
        }
        for succ in &cfg.block(id).successors {
            stack.push(*succ);
        }
    }
    seen
}

fn reaches_exit(cfg: &ControlFlowGraph, from: BlockId) -> bool {
    let mut seen = HashSet::new();
    let mut stack = vec![from];
    while let Some(id) = stack.pop() {
        if id == cfg.exit {
            return true;
        }
        if !seen.insert(id) {
            continue;
        }
        for succ in &cfg.block(id).successors {
            stack.push(*succ);
        }
    }
    false
}

const TANGLED: &str = indoc! {"
    10 x = 0
    20 FOR i = 1 TO 10
    30     x = x + i
    40     IF x > 20 THEN 80
    50 NEXT i
    60 PRINT \"fell through\"
    70 GOTO 90
    80 PRINT \"jumped out\"
    90 PRINT x
    END
"};

const STRUCTURED: &str = indoc! {"
    FUNCTION Classify&(n AS LONG) AS LONG
        SELECT CASE n
            CASE IS < 0 : RETURN -1
            CASE 0 : RETURN 0
            CASE ELSE : RETURN 1
        END SELECT
    END FUNCTION
    DO
        INPUT x
        IF x = 0 THEN
            EXIT DO
        END IF
        PRINT Classify&(x)
    LOOP
    END
"};

const SUBROUTINES: &str = indoc! {"
    GOSUB 100
    ON k GOSUB 200, 300
    END
    100 PRINT \"a\"
    RETURN
    200 PRINT \"b\"
    RETURN
    300 PRINT \"c\"
    RETURN
"};

#[test]
fn test_adjacency_lists_mirror_edges() {
    for src in [TANGLED, STRUCTURED, SUBROUTINES] {
        for cfg in build(src) {
            assert!(cfg.validate(), "inconsistent adjacency in {}", cfg.name);
        }
    }
}

#[test]
fn test_reachable_blocks_are_terminated_or_reach_exit() {
    for src in [TANGLED, STRUCTURED, SUBROUTINES] {
        for cfg in build(src) {
            for id in reachable(&cfg) {
                let block = cfg.block(id);
                assert!(
                    block.is_terminator || reaches_exit(&cfg, id),
                    "block {} ({}) neither terminates nor reaches exit",
                    id,
                    block.label
                );
            }
        }
    }
}

#[test]
fn test_no_block_holds_two_terminators() {
    for src in [TANGLED, STRUCTURED, SUBROUTINES] {
        for cfg in build(src) {
            for block in &cfg.blocks {
                let count = block
                    .statements
                    .iter()
                    .filter(|s| s.kind.is_terminator())
                    .count();
                assert!(
                    count <= 1,
                    "block {} holds {} terminators",
                    block.label,
                    count
                );
                if count == 1 {
                    assert!(
                        block
                            .statements
                            .last()
                            .map(|s| s.kind.is_terminator())
                            .unwrap_or(false),
                        "terminator is not the last statement of {}",
                        block.label
                    );
                }
            }
        }
    }
}

#[test]
fn test_jump_target_lines_map_to_unique_blocks() {
    let cfg = &build(TANGLED)[0];
    let mut seen = HashSet::new();
    for (line, block) in &cfg.line_index {
        assert!(seen.insert(*block), "line {line} shares a block");
        // the target block begins that line's statement
        let first = cfg.block(*block).first_line().expect("landing zone holds code");
        assert_eq!(first.basic_line, Some(*line));
    }
}

#[test]
fn test_loop_left_by_goto_still_detected() {
    let cfg = &build(TANGLED)[0];
    assert!(
        cfg.blocks.iter().any(|b| b.is_loop_header),
        "FOR loop header lost despite the escaping GOTO"
    );
}

#[test]
fn test_gosub_targets_marked_subroutine() {
    let cfg = &build(SUBROUTINES)[0];
    let marked = cfg.blocks.iter().filter(|b| b.is_subroutine).count();
    assert_eq!(marked, 3, "each GOSUB/ON GOSUB target is a subroutine");
}

#[test]
fn test_rebuild_is_isomorphic_modulo_ids() {
    for src in [TANGLED, STRUCTURED, SUBROUTINES] {
        let a = build(src);
        let b = build(src);
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b.iter()) {
            assert_eq!(x.blocks.len(), y.blocks.len());
            assert_eq!(x.edges.len(), y.edges.len());
            for (bx, by) in x.blocks.iter().zip(y.blocks.iter()) {
                assert_eq!(bx.label, by.label);
                assert_eq!(bx.predecessors, by.predecessors);
                assert_eq!(bx.successors, by.successors);
                assert_eq!(bx.is_loop_header, by.is_loop_header);
                assert_eq!(bx.is_subroutine, by.is_subroutine);
            }
            for (ex, ey) in x.edges.iter().zip(y.edges.iter()) {
                assert_eq!(ex.kind, ey.kind);
                assert_eq!(ex.label, ey.label);
            }
        }
    }
}
