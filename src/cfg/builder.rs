use std::collections::HashSet;
use std::rc::Rc;

use log::trace;

use crate::analyzer::ProcedureKind;
use crate::analyzer::SymbolTable;
use crate::ast::BinaryOperator;
use crate::ast::CaseClause;
use crate::ast::Expression;
use crate::ast::JumpTarget;
use crate::ast::LValue;
use crate::ast::LoopCondKind;
use crate::ast::Program;
use crate::ast::Statement;
use crate::ast::StatementKind;
use crate::cfg::BlockId;
use crate::cfg::CfgError;
use crate::cfg::ControlFlowGraph;
use crate::cfg::EdgeKind;
use crate::cfg::FunctionMeta;
use crate::cfg::context::ContextChain;
use crate::cfg::context::ContextFrame;
use crate::cfg::context::LoopKind;
use crate::diagnostics::Diagnostics;
use crate::diagnostics::SourceLoc;

/// Builds the program-level CFG plus one CFG per FUNCTION/SUB. DEF FN
/// bodies are single expressions and need no graph.
pub fn build_program(
    program: &Program,
    symbols: &SymbolTable,
    diags: &mut Diagnostics,
) -> Result<Vec<ControlFlowGraph>, CfgError> {
    let main_statements: Vec<Rc<Statement>> = program
        .statements
        .iter()
        .filter(|s| {
            !matches!(
                s.kind,
                StatementKind::Function { .. }
                    | StatementKind::Sub { .. }
                    | StatementKind::DefFn { .. }
            )
        })
        .cloned()
        .collect();
    let mut graphs = vec![build_cfg("main", None, &main_statements, diags)?];
    for func in symbols.functions.values() {
        if func.kind == ProcedureKind::ExprFn {
            continue;
        }
        let meta = FunctionMeta {
            name: func.name.clone(),
            return_type: func.return_type.clone(),
        };
        graphs.push(build_cfg(&func.name, Some(meta), &func.body, diags)?);
    }
    Ok(graphs)
}

/// Builds one CFG by single-pass recursive construction, then runs the
/// deferred-edge, back-edge, and subroutine phases.
pub fn build_cfg(
    name: &str,
    function: Option<FunctionMeta>,
    statements: &[Rc<Statement>],
    diags: &mut Diagnostics,
) -> Result<ControlFlowGraph, CfgError> {
    let in_procedure = function.is_some();
    let mut builder = CfgBuilder {
        graph: ControlFlowGraph::new(name, function),
        current: 0,
        jump_lines: HashSet::new(),
        deferred: Vec::new(),
        current_basic_line: None,
        in_procedure,
        diags,
    };
    builder.current = builder.graph.entry;
    builder.prescan(statements);
    let mut ctx = ContextChain::default();
    builder.build_list(statements, &mut ctx)?;
    if !builder.graph.block(builder.current).is_terminator {
        let exit = builder.graph.exit;
        builder
            .graph
            .add_edge(builder.current, exit, EdgeKind::Fallthrough, "");
    }
    builder.resolve_deferred()?;
    builder.graph.mark_loop_headers();
    builder.graph.mark_subroutines();
    trace!(
        "cfg {}: {} blocks, {} edges",
        builder.graph.name,
        builder.graph.blocks.len(),
        builder.graph.edges.len()
    );
    Ok(builder.graph)
}

struct Deferred {
    from: BlockId,
    target: JumpTarget,
    kind: EdgeKind,
    label: String,
    loc: SourceLoc,
}

struct CfgBuilder<'a> {
    graph: ControlFlowGraph,
    current: BlockId,
    /// every line number any jump mentions; found by the phase-0 pre-scan
    jump_lines: HashSet<u32>,
    deferred: Vec<Deferred>,
    current_basic_line: Option<u32>,
    in_procedure: bool,
    diags: &'a mut Diagnostics,
}

impl CfgBuilder<'_> {
    // ---- phase 0: jump-target pre-scan -----------------------------------

    fn prescan(&mut self, statements: &[Rc<Statement>]) {
        for statement in statements {
            self.prescan_statement(statement);
        }
    }

    fn prescan_statement(&mut self, statement: &Rc<Statement>) {
        let mut note = |target: &JumpTarget| {
            if let JumpTarget::Line(n) = target {
                self.jump_lines.insert(*n);
            }
        };
        match &statement.kind {
            StatementKind::Goto { target }
            | StatementKind::Gosub { target }
            | StatementKind::OnEvent { target, .. } => note(target),
            StatementKind::IfGoto {
                then_target,
                else_target,
                ..
            } => {
                note(then_target);
                if let Some(t) = else_target {
                    note(t);
                }
            }
            StatementKind::OnGoto { targets, .. } | StatementKind::OnGosub { targets, .. } => {
                for t in targets {
                    note(t);
                }
            }
            _ => {}
        }
        match &statement.kind {
            StatementKind::If {
                then_branch,
                else_branch,
                ..
            } => {
                self.prescan(then_branch);
                self.prescan(else_branch);
            }
            StatementKind::For { body, .. }
            | StatementKind::ForIn { body, .. }
            | StatementKind::While { body, .. }
            | StatementKind::Repeat { body, .. }
            | StatementKind::DoLoop { body, .. } => self.prescan(body),
            StatementKind::SelectCase {
                arms, else_body, ..
            } => {
                for arm in arms {
                    self.prescan(&arm.body);
                }
                if let Some(body) = else_body {
                    self.prescan(body);
                }
            }
            StatementKind::Try {
                body,
                catch_body,
                finally_body,
                ..
            } => {
                self.prescan(body);
                self.prescan(catch_body);
                if let Some(fin) = finally_body {
                    self.prescan(fin);
                }
            }
            _ => {}
        }
    }

    // ---- phase 1: construction -------------------------------------------

    fn build_list(
        &mut self,
        statements: &[Rc<Statement>],
        ctx: &mut ContextChain,
    ) -> Result<(), CfgError> {
        for statement in statements {
            self.build_statement(statement, ctx)?;
        }
        Ok(())
    }

    fn build_statement(
        &mut self,
        statement: &Rc<Statement>,
        ctx: &mut ContextChain,
    ) -> Result<(), CfgError> {
        // landing zone: a jump-target line closes the current block
        if statement.loc.basic_line != self.current_basic_line {
            self.current_basic_line = statement.loc.basic_line;
            if let Some(n) = statement.loc.basic_line {
                if self.jump_lines.contains(&n) {
                    let target = self.graph.new_block(format!("target_{n}"));
                    if !self.graph.block(self.current).is_terminator {
                        self.graph
                            .add_edge(self.current, target, EdgeKind::Unconditional, "");
                    }
                    self.graph.line_index.insert(n, target);
                    self.current = target;
                }
            }
        }

        match &statement.kind {
            StatementKind::Label(name) => self.build_label(name),
            StatementKind::If {
                cond,
                then_branch,
                else_branch,
            } => self.build_if(statement, cond, then_branch, else_branch, ctx)?,
            StatementKind::IfGoto {
                then_target,
                else_target,
                ..
            } => self.build_if_goto(statement, then_target, else_target.as_ref()),
            StatementKind::While { cond, body } => {
                self.build_while(statement, cond, body, ctx)?
            }
            StatementKind::For {
                var,
                start,
                end,
                step,
                body,
            } => self.build_for(statement, var, start, end, step.as_ref(), body, ctx)?,
            StatementKind::ForIn { var, array, body } => {
                self.build_for_in(statement, var, array, body, ctx)?
            }
            StatementKind::Repeat { body, until } => {
                self.build_post_test(statement, body, until, LoopKind::Repeat, true, ctx)?
            }
            StatementKind::DoLoop {
                pre_cond,
                post_cond,
                body,
            } => self.build_do(statement, pre_cond, post_cond, body, ctx)?,
            StatementKind::SelectCase {
                selector,
                arms,
                else_body,
            } => self.build_select(statement, selector, arms, else_body, ctx)?,
            StatementKind::Try {
                body,
                catch_var,
                catch_body,
                finally_body,
            } => self.build_try(body, catch_var, catch_body, finally_body, ctx)?,
            StatementKind::Goto { target } => {
                self.ensure_open(statement.loc);
                self.append(statement);
                self.jump_or_defer(target, EdgeKind::Jump, "", statement.loc);
                self.terminate();
            }
            StatementKind::Gosub { target } => {
                self.ensure_open(statement.loc);
                self.append(statement);
                let ret = self.graph.new_block("return_point");
                self.graph.gosub_return_points.push(ret);
                self.jump_or_defer(target, EdgeKind::Call, "call", statement.loc);
                self.graph
                    .add_edge(self.current, ret, EdgeKind::Unconditional, "");
                ctx.push(ContextFrame::Gosub { return_block: ret });
                self.current = ret;
            }
            StatementKind::Return { .. } => {
                self.ensure_open(statement.loc);
                self.append(statement);
                if self.in_procedure {
                    let exit = self.graph.exit;
                    self.graph
                        .add_edge(self.current, exit, EdgeKind::Unconditional, "");
                } else if let Some(ret) = ctx.nearest_gosub_return() {
                    self.graph.add_edge(self.current, ret, EdgeKind::Return, "");
                } else {
                    // RETURN without a GOSUB in flight degrades to END
                    let exit = self.graph.exit;
                    self.graph
                        .add_edge(self.current, exit, EdgeKind::Unconditional, "");
                }
                self.terminate();
            }
            StatementKind::OnGoto { targets, .. } => {
                self.ensure_open(statement.loc);
                self.append(statement);
                for (k, target) in targets.iter().enumerate() {
                    let label = format!("case_{}", k + 1);
                    self.jump_or_defer(target, EdgeKind::Conditional, &label, statement.loc);
                }
                // out-of-range selector falls through
                let next = self.graph.new_block("on_default");
                self.graph
                    .add_edge(self.current, next, EdgeKind::Fallthrough, "default");
                self.current = next;
            }
            StatementKind::OnGosub { targets, .. } => {
                self.ensure_open(statement.loc);
                self.append(statement);
                let ret = self.graph.new_block("return_point");
                self.graph.gosub_return_points.push(ret);
                for (k, target) in targets.iter().enumerate() {
                    let label = format!("case_{}", k + 1);
                    self.jump_or_defer(target, EdgeKind::Call, &label, statement.loc);
                }
                // every subroutine returns to the same point, and an
                // out-of-range selector skips straight to it
                self.graph
                    .add_edge(self.current, ret, EdgeKind::Unconditional, "");
                ctx.push(ContextFrame::Gosub { return_block: ret });
                self.current = ret;
            }
            StatementKind::Exit { kind } => {
                self.ensure_open(statement.loc);
                self.append(statement);
                let target = match kind {
                    crate::ast::ExitKind::Select => ctx.nearest_select(),
                    other => ctx.nearest_loop_for_exit(*other).map(|(_, exit)| exit),
                };
                let Some(target) = target else {
                    return Err(CfgError::ExitOutsideContext {
                        loc: statement.loc,
                        kind: kind.to_string(),
                    });
                };
                self.graph
                    .add_edge(self.current, target, EdgeKind::Unconditional, "");
                self.terminate();
            }
            StatementKind::Continue => {
                self.ensure_open(statement.loc);
                self.append(statement);
                let Some((header, _)) = ctx.nearest_loop() else {
                    return Err(CfgError::ContinueOutsideLoop {
                        loc: statement.loc,
                    });
                };
                self.graph
                    .add_edge(self.current, header, EdgeKind::Unconditional, "");
                self.terminate();
            }
            StatementKind::End => {
                self.ensure_open(statement.loc);
                self.append(statement);
                let exit = self.graph.exit;
                self.graph
                    .add_edge(self.current, exit, EdgeKind::Unconditional, "");
                self.terminate();
            }
            StatementKind::Throw { .. } => {
                self.ensure_open(statement.loc);
                self.append(statement);
                let target = ctx.nearest_catch().unwrap_or(self.graph.exit);
                self.graph.add_edge(self.current, target, EdgeKind::Jump, "");
                self.terminate();
            }
            // handled elsewhere in the pipeline; no control flow here
            StatementKind::Data { .. }
            | StatementKind::TypeDecl { .. }
            | StatementKind::Function { .. }
            | StatementKind::Sub { .. }
            | StatementKind::DefFn { .. }
            | StatementKind::OnEvent { .. } => {}
            _ => {
                self.ensure_open(statement.loc);
                self.append(statement);
            }
        }
        Ok(())
    }

    // ---- dedicated builders ----------------------------------------------

    fn build_label(&mut self, name: &str) {
        let block = self.graph.new_block(name.to_ascii_lowercase());
        if !self.graph.block(self.current).is_terminator {
            self.graph
                .add_edge(self.current, block, EdgeKind::Unconditional, "");
        }
        self.graph.label_index.insert(name.to_string(), block);
        self.current = block;
    }

    fn build_if(
        &mut self,
        statement: &Rc<Statement>,
        _cond: &Expression,
        then_branch: &[Rc<Statement>],
        else_branch: &[Rc<Statement>],
        ctx: &mut ContextChain,
    ) -> Result<(), CfgError> {
        self.ensure_open(statement.loc);
        self.append(statement);
        let head = self.current;
        let then_block = self.graph.new_block("then");
        self.graph
            .add_edge(head, then_block, EdgeKind::Conditional, "true");
        let merge = self.graph.new_block("merge");

        self.current = then_block;
        self.build_list(then_branch, ctx)?;
        if !self.graph.block(self.current).is_terminator {
            self.graph
                .add_edge(self.current, merge, EdgeKind::Unconditional, "");
        }

        if else_branch.is_empty() {
            self.graph
                .add_edge(head, merge, EdgeKind::Conditional, "false");
        } else {
            let else_block = self.graph.new_block("else");
            self.graph
                .add_edge(head, else_block, EdgeKind::Conditional, "false");
            self.current = else_block;
            self.build_list(else_branch, ctx)?;
            if !self.graph.block(self.current).is_terminator {
                self.graph
                    .add_edge(self.current, merge, EdgeKind::Unconditional, "");
            }
        }
        self.current = merge;
        Ok(())
    }

    fn build_if_goto(
        &mut self,
        statement: &Rc<Statement>,
        then_target: &JumpTarget,
        else_target: Option<&JumpTarget>,
    ) {
        self.ensure_open(statement.loc);
        self.append(statement);
        self.jump_or_defer(then_target, EdgeKind::Conditional, "true", statement.loc);
        match else_target {
            Some(target) => {
                self.jump_or_defer(target, EdgeKind::Conditional, "false", statement.loc);
                self.terminate();
            }
            None => {
                let merge = self.graph.new_block("merge");
                self.graph
                    .add_edge(self.current, merge, EdgeKind::Conditional, "false");
                self.current = merge;
            }
        }
    }

    fn build_while(
        &mut self,
        statement: &Rc<Statement>,
        cond: &Expression,
        body: &[Rc<Statement>],
        ctx: &mut ContextChain,
    ) -> Result<(), CfgError> {
        self.ensure_open(statement.loc);
        let header = self.graph.new_block("while_header");
        self.graph
            .add_edge(self.current, header, EdgeKind::Unconditional, "");
        self.append_to(header, condition_marker(statement.loc, cond.clone()));

        let body_block = self.graph.new_block("while_body");
        let exit = self.graph.new_block("while_exit");
        self.graph
            .add_edge(header, body_block, EdgeKind::Conditional, "true");
        self.graph
            .add_edge(header, exit, EdgeKind::Conditional, "false");
        self.graph.block_mut(header).is_loop_header = true;
        self.graph.block_mut(exit).is_loop_exit = true;

        let depth = ctx.depth();
        ctx.push(ContextFrame::Loop {
            header,
            exit,
            kind: LoopKind::While,
            var: None,
        });
        self.current = body_block;
        self.build_list(body, ctx)?;
        ctx.truncate(depth);
        if !self.graph.block(self.current).is_terminator {
            self.graph
                .add_edge(self.current, header, EdgeKind::Unconditional, "");
        }
        self.current = exit;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn build_for(
        &mut self,
        statement: &Rc<Statement>,
        var: &str,
        start: &Expression,
        end: &Expression,
        step: Option<&Expression>,
        body: &[Rc<Statement>],
        ctx: &mut ContextChain,
    ) -> Result<(), CfgError> {
        self.ensure_open(statement.loc);
        let loc = statement.loc;

        // Init: counter = start
        let init = self.graph.new_block("for_init");
        self.graph
            .add_edge(self.current, init, EdgeKind::Unconditional, "");
        self.append_to(
            init,
            assign(loc, var, start.clone()),
        );

        // Header: direction-aware comparison against the end value
        let header = self.graph.new_block("for_header");
        self.graph.add_edge(init, header, EdgeKind::Unconditional, "");
        let counter = Expression::Variable(var.to_string());
        let cond = match step.map(step_direction) {
            None | Some(StepDirection::Up) => Expression::binary(
                BinaryOperator::LessEqual,
                counter.clone(),
                end.clone(),
            ),
            Some(StepDirection::Down) => Expression::binary(
                BinaryOperator::GreaterEqual,
                counter.clone(),
                end.clone(),
            ),
            Some(StepDirection::Dynamic) => {
                let step = step.expect("dynamic direction implies a step");
                // (step >= 0 AND counter <= end) OR (step < 0 AND counter >= end)
                let up = Expression::binary(
                    BinaryOperator::And,
                    Expression::binary(
                        BinaryOperator::GreaterEqual,
                        step.clone(),
                        Expression::IntLiteral(0),
                    ),
                    Expression::binary(
                        BinaryOperator::LessEqual,
                        counter.clone(),
                        end.clone(),
                    ),
                );
                let down = Expression::binary(
                    BinaryOperator::And,
                    Expression::binary(
                        BinaryOperator::Less,
                        step.clone(),
                        Expression::IntLiteral(0),
                    ),
                    Expression::binary(
                        BinaryOperator::GreaterEqual,
                        counter.clone(),
                        end.clone(),
                    ),
                );
                Expression::binary(BinaryOperator::Or, up, down)
            }
        };
        self.append_to(header, condition_marker(loc, cond));

        let body_block = self.graph.new_block("for_body");
        let increment = self.graph.new_block("for_increment");
        let exit = self.graph.new_block("for_exit");
        self.graph
            .add_edge(header, body_block, EdgeKind::Conditional, "true");
        self.graph
            .add_edge(header, exit, EdgeKind::Conditional, "false");
        self.graph.block_mut(header).is_loop_header = true;
        self.graph.block_mut(exit).is_loop_exit = true;

        // CONTINUE re-enters at the increment, not the comparison
        let depth = ctx.depth();
        ctx.push(ContextFrame::Loop {
            header: increment,
            exit,
            kind: LoopKind::For,
            var: Some(var.to_string()),
        });
        self.current = body_block;
        self.build_list(body, ctx)?;
        ctx.truncate(depth);
        if !self.graph.block(self.current).is_terminator {
            self.graph
                .add_edge(self.current, increment, EdgeKind::Unconditional, "");
        }

        let step_expr = step.cloned().unwrap_or(Expression::IntLiteral(1));
        self.append_to(
            increment,
            assign(
                loc,
                var,
                Expression::binary(
                    BinaryOperator::Add,
                    Expression::Variable(var.to_string()),
                    step_expr,
                ),
            ),
        );
        self.graph
            .add_edge(increment, header, EdgeKind::Unconditional, "");
        self.current = exit;
        Ok(())
    }

    /// `FOR v IN a` lowers to an index loop over `LBOUND(a)..UBOUND(a)`
    /// using the hidden counter the analyzer declared for this loop
    /// variable.
    fn build_for_in(
        &mut self,
        statement: &Rc<Statement>,
        var: &str,
        array: &str,
        body: &[Rc<Statement>],
        ctx: &mut ContextChain,
    ) -> Result<(), CfgError> {
        let loc = statement.loc;
        let idx = hidden_index_name(var);
        let bound_call = |f: &str| Expression::Call {
            name: f.to_string(),
            args: vec![Expression::Variable(array.to_string())],
        };

        self.ensure_open(loc);
        let init = self.graph.new_block("forin_init");
        self.graph
            .add_edge(self.current, init, EdgeKind::Unconditional, "");
        self.append_to(init, assign(loc, &idx, bound_call("LBOUND")));

        let header = self.graph.new_block("forin_header");
        self.graph.add_edge(init, header, EdgeKind::Unconditional, "");
        let cond = Expression::binary(
            BinaryOperator::LessEqual,
            Expression::Variable(idx.clone()),
            bound_call("UBOUND"),
        );
        self.append_to(header, condition_marker(loc, cond));

        let body_block = self.graph.new_block("forin_body");
        let increment = self.graph.new_block("forin_increment");
        let exit = self.graph.new_block("forin_exit");
        self.graph
            .add_edge(header, body_block, EdgeKind::Conditional, "true");
        self.graph
            .add_edge(header, exit, EdgeKind::Conditional, "false");
        self.graph.block_mut(header).is_loop_header = true;
        self.graph.block_mut(exit).is_loop_exit = true;

        // v = a(idx) before the user's body
        self.append_to(
            body_block,
            assign(
                loc,
                var,
                Expression::Call {
                    name: array.to_string(),
                    args: vec![Expression::Variable(idx.clone())],
                },
            ),
        );

        let depth = ctx.depth();
        ctx.push(ContextFrame::Loop {
            header: increment,
            exit,
            kind: LoopKind::For,
            var: Some(var.to_string()),
        });
        self.current = body_block;
        self.build_list(body, ctx)?;
        ctx.truncate(depth);
        if !self.graph.block(self.current).is_terminator {
            self.graph
                .add_edge(self.current, increment, EdgeKind::Unconditional, "");
        }
        self.append_to(
            increment,
            assign(
                loc,
                &idx,
                Expression::binary(
                    BinaryOperator::Add,
                    Expression::Variable(idx.clone()),
                    Expression::IntLiteral(1),
                ),
            ),
        );
        self.graph
            .add_edge(increment, header, EdgeKind::Unconditional, "");
        self.current = exit;
        Ok(())
    }

    /// REPEAT..UNTIL and DO..LOOP WHILE/UNTIL: body first, condition at
    /// the bottom. `exit_on_true` is how the condition maps to leaving.
    fn build_post_test(
        &mut self,
        statement: &Rc<Statement>,
        body: &[Rc<Statement>],
        cond: &Expression,
        kind: LoopKind,
        exit_on_true: bool,
        ctx: &mut ContextChain,
    ) -> Result<(), CfgError> {
        self.ensure_open(statement.loc);
        let body_block = self.graph.new_block("loop_body");
        self.graph
            .add_edge(self.current, body_block, EdgeKind::Unconditional, "");
        let cond_block = self.graph.new_block("loop_cond");
        let exit = self.graph.new_block("loop_exit");
        self.graph.block_mut(body_block).is_loop_header = true;
        self.graph.block_mut(exit).is_loop_exit = true;

        let depth = ctx.depth();
        ctx.push(ContextFrame::Loop {
            header: cond_block,
            exit,
            kind,
            var: None,
        });
        self.current = body_block;
        self.build_list(body, ctx)?;
        ctx.truncate(depth);
        if !self.graph.block(self.current).is_terminator {
            self.graph
                .add_edge(self.current, cond_block, EdgeKind::Unconditional, "");
        }

        self.append_to(cond_block, condition_marker(statement.loc, cond.clone()));
        let (on_true, on_false) = if exit_on_true {
            (exit, body_block)
        } else {
            (body_block, exit)
        };
        self.graph
            .add_edge(cond_block, on_true, EdgeKind::Conditional, "true");
        self.graph
            .add_edge(cond_block, on_false, EdgeKind::Conditional, "false");
        self.current = exit;
        Ok(())
    }

    fn build_do(
        &mut self,
        statement: &Rc<Statement>,
        pre_cond: &Option<(LoopCondKind, Expression)>,
        post_cond: &Option<(LoopCondKind, Expression)>,
        body: &[Rc<Statement>],
        ctx: &mut ContextChain,
    ) -> Result<(), CfgError> {
        if let Some((kind, cond)) = post_cond {
            let exit_on_true = *kind == LoopCondKind::Until;
            return self.build_post_test(statement, body, cond, LoopKind::Do, exit_on_true, ctx);
        }
        if let Some((kind, cond)) = pre_cond {
            // pre-test DO mirrors WHILE; DO UNTIL inverts the arms
            self.ensure_open(statement.loc);
            let header = self.graph.new_block("do_header");
            self.graph
                .add_edge(self.current, header, EdgeKind::Unconditional, "");
            self.append_to(header, condition_marker(statement.loc, cond.clone()));
            let body_block = self.graph.new_block("do_body");
            let exit = self.graph.new_block("do_exit");
            let (on_true, on_false) = match kind {
                LoopCondKind::While => (body_block, exit),
                LoopCondKind::Until => (exit, body_block),
            };
            self.graph
                .add_edge(header, on_true, EdgeKind::Conditional, "true");
            self.graph
                .add_edge(header, on_false, EdgeKind::Conditional, "false");
            self.graph.block_mut(header).is_loop_header = true;
            self.graph.block_mut(exit).is_loop_exit = true;

            let depth = ctx.depth();
            ctx.push(ContextFrame::Loop {
                header,
                exit,
                kind: LoopKind::Do,
                var: None,
            });
            self.current = body_block;
            self.build_list(body, ctx)?;
            ctx.truncate(depth);
            if !self.graph.block(self.current).is_terminator {
                self.graph
                    .add_edge(self.current, header, EdgeKind::Unconditional, "");
            }
            self.current = exit;
            return Ok(());
        }

        // plain DO..LOOP: unconditional back edge, EXIT DO is the only way out
        self.ensure_open(statement.loc);
        let body_block = self.graph.new_block("do_body");
        self.graph
            .add_edge(self.current, body_block, EdgeKind::Unconditional, "");
        let exit = self.graph.new_block("do_exit");
        self.graph.block_mut(body_block).is_loop_header = true;
        self.graph.block_mut(exit).is_loop_exit = true;

        let depth = ctx.depth();
        ctx.push(ContextFrame::Loop {
            header: body_block,
            exit,
            kind: LoopKind::Do,
            var: None,
        });
        self.current = body_block;
        self.build_list(body, ctx)?;
        ctx.truncate(depth);
        if !self.graph.block(self.current).is_terminator {
            self.graph
                .add_edge(self.current, body_block, EdgeKind::Unconditional, "");
        }
        self.current = exit;
        Ok(())
    }

    fn build_select(
        &mut self,
        statement: &Rc<Statement>,
        selector: &Expression,
        arms: &[crate::ast::CaseArm],
        else_body: &Option<Vec<Rc<Statement>>>,
        ctx: &mut ContextChain,
    ) -> Result<(), CfgError> {
        self.ensure_open(statement.loc);
        let loc = statement.loc;
        let exit = self.graph.new_block("select_exit");

        let depth = ctx.depth();
        ctx.push(ContextFrame::Select { exit });

        let mut incoming = (self.current, EdgeKind::Unconditional, "");
        for arm in arms {
            let check = self.graph.new_block("case_check");
            self.graph
                .add_edge(incoming.0, check, incoming.1, incoming.2);
            // the selector is deep-cloned into every comparison so the
            // synthesized condition owns its whole tree
            let cond = case_condition(selector, &arm.clauses);
            self.append_to(check, condition_marker(loc, cond));

            let body_block = self.graph.new_block("case_body");
            self.graph
                .add_edge(check, body_block, EdgeKind::Conditional, "true");
            self.current = body_block;
            self.build_list(&arm.body, ctx)?;
            if !self.graph.block(self.current).is_terminator {
                self.graph
                    .add_edge(self.current, exit, EdgeKind::Unconditional, "");
            }
            incoming = (check, EdgeKind::Conditional, "false");
        }

        match else_body {
            Some(body) => {
                let else_block = self.graph.new_block("case_else");
                self.graph
                    .add_edge(incoming.0, else_block, incoming.1, incoming.2);
                self.current = else_block;
                self.build_list(body, ctx)?;
                if !self.graph.block(self.current).is_terminator {
                    self.graph
                        .add_edge(self.current, exit, EdgeKind::Unconditional, "");
                }
            }
            None => {
                self.graph
                    .add_edge(incoming.0, exit, incoming.1, incoming.2);
            }
        }
        ctx.truncate(depth);
        self.current = exit;
        Ok(())
    }

    fn build_try(
        &mut self,
        body: &[Rc<Statement>],
        catch_var: &Option<String>,
        catch_body: &[Rc<Statement>],
        finally_body: &Option<Vec<Rc<Statement>>>,
        ctx: &mut ContextChain,
    ) -> Result<(), CfgError> {
        let try_block = self.graph.new_block("try_body");
        if !self.graph.block(self.current).is_terminator {
            self.graph
                .add_edge(self.current, try_block, EdgeKind::Unconditional, "");
        }
        let catch_block = self.graph.new_block("catch");
        let finally_block = finally_body
            .as_ref()
            .map(|_| self.graph.new_block("finally"));
        let exit = self.graph.new_block("try_exit");
        let after = finally_block.unwrap_or(exit);
        self.graph
            .catch_blocks
            .push((catch_block, catch_var.clone()));

        let depth = ctx.depth();
        ctx.push(ContextFrame::Try { catch: catch_block });
        self.current = try_block;
        self.build_list(body, ctx)?;
        ctx.truncate(depth);
        if !self.graph.block(self.current).is_terminator {
            self.graph
                .add_edge(self.current, after, EdgeKind::Unconditional, "");
        }

        // a THROW inside the catch arm propagates to an outer TRY
        self.current = catch_block;
        self.build_list(catch_body, ctx)?;
        if !self.graph.block(self.current).is_terminator {
            self.graph
                .add_edge(self.current, after, EdgeKind::Unconditional, "");
        }

        if let Some(finally_block) = finally_block {
            self.current = finally_block;
            if let Some(body) = finally_body {
                self.build_list(body, ctx)?;
            }
            if !self.graph.block(self.current).is_terminator {
                self.graph
                    .add_edge(self.current, exit, EdgeKind::Unconditional, "");
            }
        }
        self.current = exit;
        Ok(())
    }

    // ---- phase 2: deferred edges -----------------------------------------

    fn jump_or_defer(&mut self, target: &JumpTarget, kind: EdgeKind, label: &str, loc: SourceLoc) {
        let resolved = match target {
            JumpTarget::Line(n) => self.graph.line_index.get(n).copied(),
            JumpTarget::Label(name) => self.graph.label_index.get(name).copied(),
        };
        match resolved {
            Some(to) => self.graph.add_edge(self.current, to, kind, label),
            None => self.deferred.push(Deferred {
                from: self.current,
                target: target.clone(),
                kind,
                label: label.to_string(),
                loc,
            }),
        }
    }

    fn resolve_deferred(&mut self) -> Result<(), CfgError> {
        let deferred = std::mem::take(&mut self.deferred);
        for edge in deferred {
            let resolved = match &edge.target {
                JumpTarget::Line(n) => self.graph.line_index.get(n).copied(),
                JumpTarget::Label(name) => self.graph.label_index.get(name).copied(),
            };
            let Some(to) = resolved else {
                return Err(CfgError::UnresolvedTarget {
                    loc: edge.loc,
                    target: edge.target.to_string(),
                });
            };
            self.graph.add_edge(edge.from, to, edge.kind, &edge.label);
        }
        Ok(())
    }

    // ---- block plumbing --------------------------------------------------

    /// Statements after a terminator land in a fresh unreachable block.
    fn ensure_open(&mut self, loc: SourceLoc) {
        if self.graph.block(self.current).is_terminator {
            let block = self.graph.new_block("unreachable");
            self.current = block;
            self.diags.warn(Some(loc), "unreachable code");
        }
    }

    fn append(&mut self, statement: &Rc<Statement>) {
        self.graph
            .block_mut(self.current)
            .statements
            .push(statement.clone());
    }

    fn append_to(&mut self, block: BlockId, statement: Rc<Statement>) {
        self.graph.block_mut(block).statements.push(statement);
    }

    fn terminate(&mut self) {
        self.graph.block_mut(self.current).is_terminator = true;
    }
}

enum StepDirection {
    Up,
    Down,
    Dynamic,
}

fn step_direction(step: &Expression) -> StepDirection {
    match step {
        Expression::IntLiteral(n) if *n >= 0 => StepDirection::Up,
        Expression::IntLiteral(_) => StepDirection::Down,
        Expression::FloatLiteral(x) if *x >= 0.0 => StepDirection::Up,
        Expression::FloatLiteral(_) => StepDirection::Down,
        Expression::Unary {
            op: crate::ast::UnaryOperator::Negate,
            ..
        } => StepDirection::Down,
        _ => StepDirection::Dynamic,
    }
}

/// Hidden loop counter backing `FOR v IN a`; the analyzer declares it
/// under the same name.
pub fn hidden_index_name(var: &str) -> String {
    format!("__{var}_INDEX&")
}

/// A condition-only IF carried as a block's last statement: the emitter
/// evaluates the condition and branches along the block's labeled edges.
fn condition_marker(loc: SourceLoc, cond: Expression) -> Rc<Statement> {
    Statement::new(
        loc,
        StatementKind::If {
            cond,
            then_branch: Vec::new(),
            else_branch: Vec::new(),
        },
    )
}

fn assign(loc: SourceLoc, name: &str, value: Expression) -> Rc<Statement> {
    Statement::new(
        loc,
        StatementKind::Let {
            target: LValue::Variable(name.to_string()),
            value,
        },
    )
}

/// Disjunction of one CASE arm's clauses over a cloned selector.
fn case_condition(selector: &Expression, clauses: &[CaseClause]) -> Expression {
    let mut cond: Option<Expression> = None;
    for clause in clauses {
        let test = match clause {
            CaseClause::Value(v) => {
                Expression::binary(BinaryOperator::Equal, selector.clone(), v.clone())
            }
            CaseClause::Range(lo, hi) => Expression::binary(
                BinaryOperator::And,
                Expression::binary(BinaryOperator::GreaterEqual, selector.clone(), lo.clone()),
                Expression::binary(BinaryOperator::LessEqual, selector.clone(), hi.clone()),
            ),
            CaseClause::Is(op, v) => Expression::binary(*op, selector.clone(), v.clone()),
        };
        cond = Some(match cond {
            Some(prev) => Expression::binary(BinaryOperator::Or, prev, test),
            None => test,
        });
    }
    cond.unwrap_or(Expression::IntLiteral(0))
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::*;
    use crate::analyzer::analyze;
    use crate::parser::parse_source;

    fn build(src: &str) -> Vec<ControlFlowGraph> {
        let program = parse_source(src).unwrap();
        let mut diags = Diagnostics::new();
        let symbols = analyze(&program, &mut diags).unwrap();
        build_program(&program, &symbols, &mut diags).unwrap()
    }

    fn main_cfg(src: &str) -> ControlFlowGraph {
        build(src).remove(0)
    }

    #[test]
    fn test_straight_line_program() {
        let cfg = main_cfg("x = 1\ny = 2\nPRINT x + y\n");
        assert!(cfg.validate());
        // everything stays in the entry block, which falls through to exit
        assert_eq!(cfg.block(cfg.entry).statements.len(), 3);
        assert_eq!(cfg.block(cfg.entry).successors, vec![cfg.exit]);
    }

    #[test]
    fn test_if_block_shape() {
        let cfg = main_cfg(indoc! {"
            IF x > 1 THEN
                PRINT 1
            ELSE
                PRINT 2
            END IF
            PRINT 3
        "});
        assert!(cfg.validate());
        let head = cfg.entry;
        assert!(cfg.edge_labeled(head, "true").is_some());
        assert!(cfg.edge_labeled(head, "false").is_some());
        let then_block = cfg.edge_labeled(head, "true").unwrap().to;
        let else_block = cfg.edge_labeled(head, "false").unwrap().to;
        // both arms join a single merge block
        assert_eq!(
            cfg.block(then_block).successors,
            cfg.block(else_block).successors
        );
    }

    #[test]
    fn test_while_loop_back_edge() {
        let cfg = main_cfg(indoc! {"
            WHILE x < 10
                x = x + 1
            WEND
        "});
        assert!(cfg.validate());
        let header = cfg
            .blocks
            .iter()
            .find(|b| b.is_loop_header)
            .expect("loop header marked");
        let body = cfg.edge_labeled(header.id, "true").unwrap().to;
        assert!(cfg.block(body).successors.contains(&header.id));
        let exit = cfg.edge_labeled(header.id, "false").unwrap().to;
        assert!(cfg.block(exit).is_loop_exit);
    }

    #[test]
    fn test_for_loop_blocks() {
        let cfg = main_cfg(indoc! {"
            FOR i = 1 TO 10
                PRINT i
            NEXT i
        "});
        assert!(cfg.validate());
        // init, header, body, increment, exit all present
        assert!(cfg.blocks.iter().any(|b| b.label.starts_with("for_init")));
        assert!(cfg.blocks.iter().any(|b| b.label.starts_with("for_header")));
        assert!(
            cfg.blocks
                .iter()
                .any(|b| b.label.starts_with("for_increment"))
        );
        let header = cfg
            .blocks
            .iter()
            .find(|b| b.label.starts_with("for_header"))
            .unwrap();
        assert!(header.is_loop_header);
    }

    #[test]
    fn test_goto_forward_reference_resolves() {
        let cfg = main_cfg("GOTO 100\nPRINT 1\n100 PRINT 2\n");
        assert!(cfg.validate());
        let target = *cfg.line_index.get(&100).unwrap();
        assert!(cfg.block(cfg.entry).successors.contains(&target));
        // the skipped PRINT sits in an unreachable block
        assert!(cfg.blocks.iter().any(|b| b.label.starts_with("unreachable")));
    }

    #[test]
    fn test_goto_unresolved_target_fails() {
        let program = parse_source("GOTO 999\n").unwrap();
        let mut diags = Diagnostics::new();
        let symbols = analyze(&program, &mut diags).unwrap();
        assert!(matches!(
            build_program(&program, &symbols, &mut diags),
            Err(CfgError::UnresolvedTarget { .. })
        ));
    }

    #[test]
    fn test_gosub_creates_call_edge_and_return_point() {
        let cfg = main_cfg("GOSUB 100\nPRINT 1\nEND\n100 PRINT 2\nRETURN\n");
        assert!(cfg.validate());
        assert_eq!(cfg.gosub_return_points.len(), 1);
        let target = *cfg.line_index.get(&100).unwrap();
        assert!(cfg.block(target).is_subroutine);
        let call_edge = cfg
            .edges
            .iter()
            .find(|e| e.kind == EdgeKind::Call)
            .expect("call edge");
        assert_eq!(call_edge.to, target);
        // the RETURN block flows back to the recorded return point
        let ret_point = cfg.gosub_return_points[0];
        assert!(
            cfg.edges
                .iter()
                .any(|e| e.kind == EdgeKind::Return && e.to == ret_point)
        );
    }

    #[test]
    fn test_on_gosub_multiway_edges() {
        let cfg = main_cfg(indoc! {"
            ON I GOSUB 100, 200
            PRINT 1
            END
            100 RETURN
            200 RETURN
        "});
        assert!(cfg.validate());
        let call_edges: Vec<_> = cfg
            .edges
            .iter()
            .filter(|e| e.kind == EdgeKind::Call)
            .collect();
        assert_eq!(call_edges.len(), 2);
        assert_eq!(call_edges[0].label, "case_1");
        assert_eq!(call_edges[1].label, "case_2");
        // both subroutines return to a single return point
        assert_eq!(cfg.gosub_return_points.len(), 1);
    }

    #[test]
    fn test_select_case_chain() {
        let cfg = main_cfg(indoc! {"
            SELECT CASE i
                CASE 1, 2 : PRINT \"a\"
                CASE IS > 10 : PRINT \"b\"
                CASE ELSE : PRINT \"c\"
            END SELECT
        "});
        assert!(cfg.validate());
        let checks: Vec<_> = cfg
            .blocks
            .iter()
            .filter(|b| b.label.starts_with("case_check"))
            .collect();
        assert_eq!(checks.len(), 2);
        // each check carries a synthesized condition statement
        for check in &checks {
            assert_eq!(check.statements.len(), 1);
            assert!(matches!(
                check.statements[0].kind,
                StatementKind::If { .. }
            ));
        }
    }

    #[test]
    fn test_exit_for_goes_to_loop_exit() {
        let cfg = main_cfg(indoc! {"
            FOR i = 1 TO 10
                IF i = 5 THEN
                    EXIT FOR
                END IF
            NEXT i
        "});
        assert!(cfg.validate());
        let exit = cfg
            .blocks
            .iter()
            .find(|b| b.label.starts_with("for_exit"))
            .unwrap();
        // the EXIT FOR block jumps straight to the loop exit
        assert!(exit.predecessors.len() >= 2);
    }

    #[test]
    fn test_exit_outside_loop_fails() {
        let program = parse_source("EXIT FOR\n").unwrap();
        let mut diags = Diagnostics::new();
        let symbols = analyze(&program, &mut diags).unwrap();
        assert!(matches!(
            build_program(&program, &symbols, &mut diags),
            Err(CfgError::ExitOutsideContext { .. })
        ));
    }

    #[test]
    fn test_try_throw_edges() {
        let cfg = main_cfg(indoc! {"
            TRY
                THROW 1
            CATCH e
                PRINT e
            FINALLY
                PRINT 2
            END TRY
        "});
        assert!(cfg.validate());
        assert_eq!(cfg.catch_blocks.len(), 1);
        let (catch_id, var) = &cfg.catch_blocks[0];
        assert_eq!(var.as_deref(), Some("E"));
        // the THROW block jumps into the catch block
        assert!(
            cfg.edges
                .iter()
                .any(|e| e.kind == EdgeKind::Jump && e.to == *catch_id)
        );
        // catch flows through finally
        let finally = cfg
            .blocks
            .iter()
            .find(|b| b.label.starts_with("finally"))
            .unwrap();
        assert!(cfg.block(*catch_id).successors.contains(&finally.id));
    }

    #[test]
    fn test_function_cfg_return_to_exit() {
        let graphs = build(indoc! {"
            FUNCTION Twice&(n AS LONG) AS LONG
                RETURN n * 2
            END FUNCTION
            PRINT Twice&(21)
        "});
        let func = graphs
            .iter()
            .find(|g| g.function.is_some())
            .expect("function cfg");
        assert!(func.validate());
        assert!(func.block(func.entry).successors.contains(&func.exit));
    }

    #[test]
    fn test_do_without_condition_loops_forever() {
        let cfg = main_cfg(indoc! {"
            DO
                x = x + 1
                IF x > 3 THEN
                    EXIT DO
                END IF
            LOOP
        "});
        assert!(cfg.validate());
        let body = cfg
            .blocks
            .iter()
            .find(|b| b.label.starts_with("do_body"))
            .unwrap();
        assert!(body.is_loop_header);
    }

    #[test]
    fn test_rebuild_is_isomorphic() {
        let src = indoc! {"
            FOR i = 1 TO 3
                ON i GOSUB 100, 200
            NEXT i
            END
            100 PRINT 1
            RETURN
            200 PRINT 2
            RETURN
        "};
        let a = main_cfg(src);
        let b = main_cfg(src);
        assert_eq!(a.blocks.len(), b.blocks.len());
        assert_eq!(a.edges.len(), b.edges.len());
        for (x, y) in a.blocks.iter().zip(b.blocks.iter()) {
            assert_eq!(x.label, y.label);
            assert_eq!(x.successors, y.successors);
            assert_eq!(x.statements.len(), y.statements.len());
        }
    }
}
