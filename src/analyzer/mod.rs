pub mod symbols;

use std::collections::HashMap;
use std::rc::Rc;

use log::trace;
use thiserror::Error;

pub use symbols::DataEntry;
pub use symbols::FunctionInfo;
pub use symbols::ParamInfo;
pub use symbols::ProcedureKind;
pub use symbols::Scope;
pub use symbols::SymbolTable;
pub use symbols::UdtField;
pub use symbols::UdtInfo;
pub use symbols::VariableInfo;

use crate::ast::CaseClause;
use crate::ast::Expression;
use crate::ast::LValue;
use crate::ast::Program;
use crate::ast::Statement;
use crate::ast::StatementKind;
use crate::ast::VarDecl;
use crate::diagnostics::Diagnostics;
use crate::diagnostics::SourceLoc;
use crate::types::BaseType;
use crate::types::TypeDescriptor;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum AnalyzeError {
    #[error("line number {line} used at source lines {first} and {second}")]
    DuplicateLineNumber { line: u32, first: u32, second: u32 },
    #[error("{loc}: {name} is already defined")]
    DuplicateProcedure { loc: SourceLoc, name: String },
    #[error("{loc}: type {name} is already defined")]
    DuplicateType { loc: SourceLoc, name: String },
    #[error("{loc}: unknown type {name}")]
    UnknownType { loc: SourceLoc, name: String },
    #[error("{loc}: procedures cannot be nested")]
    NestedProcedure { loc: SourceLoc },
    #[error("{loc}: ON EVENT handlers are not supported")]
    OnEventUnsupported { loc: SourceLoc },
    #[error("{loc}: SHARED is only allowed inside FUNCTION or SUB")]
    SharedOutsideProcedure { loc: SourceLoc },
}

/// Semantic pass: builds the symbol table (scopes, globals, UDT layouts,
/// procedure signatures, DATA table) and validates program structure that
/// the grammar alone cannot. Expression-level type checking happens later,
/// at emission, where the coercion rules live.
pub fn analyze(program: &Program, diags: &mut Diagnostics) -> Result<SymbolTable, AnalyzeError> {
    let mut analyzer = Analyzer {
        table: SymbolTable::default(),
        next_udt_id: 1,
        line_index: HashMap::new(),
    };
    analyzer.check_line_numbers(&program.statements)?;
    analyzer.collect_types(program)?;
    analyzer.collect_procedures(program)?;
    analyzer.walk_main(program, diags)?;
    analyzer.walk_procedure_bodies(diags)?;
    trace!(
        "analysis: {} main vars, {} procedures, {} UDTs, {} DATA entries, {} global slots",
        analyzer.table.main.variables.len(),
        analyzer.table.functions.len(),
        analyzer.table.udts.len(),
        analyzer.table.data.len(),
        analyzer.table.global_count
    );
    Ok(analyzer.table)
}

struct Analyzer {
    table: SymbolTable,
    next_udt_id: u32,
    /// basic line -> physical line of its first appearance
    line_index: HashMap<u32, u32>,
}

impl Analyzer {
    // ---- structural validation -------------------------------------------

    /// A BASIC line number may label several statements (colon-separated on
    /// its line) but may not reappear on a different physical line.
    fn check_line_numbers(&mut self, statements: &[Rc<Statement>]) -> Result<(), AnalyzeError> {
        for statement in statements {
            if let Some(n) = statement.loc.basic_line {
                match self.line_index.get(&n) {
                    Some(first) if *first != statement.loc.line => {
                        return Err(AnalyzeError::DuplicateLineNumber {
                            line: n,
                            first: *first,
                            second: statement.loc.line,
                        });
                    }
                    None => {
                        self.line_index.insert(n, statement.loc.line);
                    }
                    _ => {}
                }
            }
            for child in child_bodies(&statement.kind) {
                self.check_line_numbers(child)?;
            }
        }
        Ok(())
    }

    // ---- user-defined types ----------------------------------------------

    fn collect_types(&mut self, program: &Program) -> Result<(), AnalyzeError> {
        for statement in &program.statements {
            let StatementKind::TypeDecl { name, fields } = &statement.kind else {
                continue;
            };
            if self.table.udts.contains_key(name) {
                return Err(AnalyzeError::DuplicateType {
                    loc: statement.loc,
                    name: name.clone(),
                });
            }
            let mut offset: u64 = 0;
            let mut align: u64 = 1;
            let mut udt_fields = Vec::with_capacity(fields.len());
            for field in fields {
                let ty = self.resolve_type_name(&field.type_name, statement.loc)?;
                let (size, field_align) = match (&ty.base, &ty.udt) {
                    (BaseType::UserDefined, Some(udt)) => {
                        let info = self
                            .table
                            .udt_by_id(udt.id)
                            .expect("field UDT registered before use");
                        (info.size, info.align)
                    }
                    _ => {
                        let size = ty.size_bytes();
                        (size, size)
                    }
                };
                offset = offset.next_multiple_of(field_align);
                udt_fields.push(UdtField {
                    name: field.name.clone(),
                    ty,
                    offset,
                });
                offset += size;
                align = align.max(field_align);
            }
            let id = self.next_udt_id;
            self.next_udt_id += 1;
            self.table.udts.insert(
                name.clone(),
                UdtInfo {
                    id,
                    name: name.clone(),
                    fields: udt_fields,
                    size: offset.next_multiple_of(align),
                    align,
                },
            );
        }
        Ok(())
    }

    // ---- procedure signatures --------------------------------------------

    fn collect_procedures(&mut self, program: &Program) -> Result<(), AnalyzeError> {
        for statement in &program.statements {
            match &statement.kind {
                StatementKind::Function {
                    name,
                    params,
                    return_type,
                    body,
                } => {
                    let return_type = match return_type {
                        Some(keyword) => self.resolve_type_name(keyword, statement.loc)?,
                        None => type_of_name(name),
                    };
                    self.register_procedure(
                        statement.loc,
                        name,
                        ProcedureKind::Function,
                        params,
                        return_type,
                        body.clone(),
                        None,
                    )?;
                }
                StatementKind::Sub { name, params, body } => {
                    self.register_procedure(
                        statement.loc,
                        name,
                        ProcedureKind::Sub,
                        params,
                        TypeDescriptor::void(),
                        body.clone(),
                        None,
                    )?;
                }
                StatementKind::DefFn { name, params, body } => {
                    // expression functions default to DOUBLE when the name
                    // carries no sigil
                    let return_type = name
                        .chars()
                        .last()
                        .and_then(TypeDescriptor::of_suffix)
                        .unwrap_or_else(TypeDescriptor::double);
                    self.register_procedure(
                        statement.loc,
                        name,
                        ProcedureKind::ExprFn,
                        params,
                        return_type,
                        Vec::new(),
                        Some(body.clone()),
                    )?;
                }
                _ => {}
            }
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn register_procedure(
        &mut self,
        loc: SourceLoc,
        name: &str,
        kind: ProcedureKind,
        params: &[crate::ast::Param],
        return_type: TypeDescriptor,
        body: Vec<Rc<Statement>>,
        expr: Option<Expression>,
    ) -> Result<(), AnalyzeError> {
        if self.table.functions.contains_key(name) {
            return Err(AnalyzeError::DuplicateProcedure {
                loc,
                name: name.to_string(),
            });
        }
        let mut locals = Scope::default();
        let mut param_infos = Vec::with_capacity(params.len());
        for (index, param) in params.iter().enumerate() {
            let ty = match &param.type_name {
                Some(keyword) => self.resolve_type_name(keyword, loc)?,
                None => type_of_name(&param.name),
            };
            // UDT parameters always travel by reference
            let byref = param.byref || ty.base == BaseType::UserDefined;
            param_infos.push(ParamInfo {
                name: param.name.clone(),
                ty: ty.clone(),
                byref,
            });
            let mut info = VariableInfo::local(param.name.clone(), ty);
            info.param_index = Some(index);
            info.byref = byref;
            locals.insert(info);
        }
        if kind == ProcedureKind::Function {
            // result slot, assignable under the function's own name
            locals.insert(VariableInfo::local(name.to_string(), return_type.clone()));
        }
        self.table.functions.insert(
            name.to_string(),
            FunctionInfo {
                name: name.to_string(),
                kind,
                params: param_infos,
                return_type,
                body,
                expr,
                locals,
                shared: Vec::new(),
            },
        );
        Ok(())
    }

    // ---- statement walks -------------------------------------------------

    fn walk_main(&mut self, program: &Program, diags: &mut Diagnostics) -> Result<(), AnalyzeError> {
        for statement in &program.statements {
            self.walk_statement(statement, None, diags)?;
        }
        Ok(())
    }

    fn walk_procedure_bodies(&mut self, diags: &mut Diagnostics) -> Result<(), AnalyzeError> {
        let names: Vec<String> = self.table.functions.keys().cloned().collect();
        for name in names {
            let func = &self.table.functions[&name];
            let body = func.body.clone();
            let expr = func.expr.clone();
            for statement in &body {
                self.walk_statement(statement, Some(&name), diags)?;
            }
            if let Some(expr) = expr {
                self.visit_expression(&expr, Some(&name), SourceLoc::default(), diags);
            }
        }
        Ok(())
    }

    fn walk_statement(
        &mut self,
        statement: &Rc<Statement>,
        scope: Option<&str>,
        diags: &mut Diagnostics,
    ) -> Result<(), AnalyzeError> {
        let loc = statement.loc;
        match &statement.kind {
            StatementKind::Let { target, value } => {
                self.declare_lvalue(target, scope, loc, diags);
                self.visit_expression(value, scope, loc, diags);
            }
            StatementKind::Dim { decls } => {
                for decl in decls {
                    self.declare_explicit(decl, scope, loc, false, diags)?;
                }
            }
            StatementKind::Global { decls } => {
                for decl in decls {
                    self.declare_explicit(decl, scope, loc, true, diags)?;
                }
            }
            StatementKind::Redim { name, bounds, .. } => {
                for bound in bounds {
                    self.visit_expression(bound, scope, loc, diags);
                }
                if self.lookup(scope, name).is_none() {
                    // REDIM can introduce a dynamic array
                    let element = element_type_of_name(name);
                    let ty = TypeDescriptor::array_of(element, vec![-1; bounds.len()]);
                    self.declare(scope, VariableInfo::local(name.clone(), ty));
                }
            }
            StatementKind::Shared { names } => {
                let Some(func_name) = scope else {
                    return Err(AnalyzeError::SharedOutsideProcedure { loc });
                };
                for name in names {
                    // a SHARED name must live in the globals vector so the
                    // procedure can reach it; promote the main-scope
                    // variable if it was stack-allocated
                    if self.table.main.get(name).is_none() {
                        let ty = type_of_name(name);
                        let mut info = VariableInfo::local(name.clone(), ty);
                        info.implicit = true;
                        self.table.main.insert(info);
                    }
                    let var = self.table.main.get_mut(name).expect("just inserted");
                    if var.global_slot.is_none() {
                        var.global_slot = Some(self.table.global_count);
                        self.table.global_count += 1;
                    }
                    let func = self
                        .table
                        .functions
                        .get_mut(func_name)
                        .expect("walking a registered procedure");
                    if !func.shared.iter().any(|s| s == name) {
                        func.shared.push(name.clone());
                    }
                }
            }
            StatementKind::Print { items } => {
                for item in items {
                    self.visit_expression(&item.expr, scope, loc, diags);
                }
            }
            StatementKind::Input { targets, .. } | StatementKind::Read { targets } => {
                for target in targets {
                    self.declare_lvalue(target, scope, loc, diags);
                }
            }
            StatementKind::If {
                cond,
                then_branch,
                else_branch,
            } => {
                self.visit_expression(cond, scope, loc, diags);
                self.walk_body(then_branch, scope, diags)?;
                self.walk_body(else_branch, scope, diags)?;
            }
            StatementKind::IfGoto { cond, .. } => {
                self.visit_expression(cond, scope, loc, diags);
            }
            StatementKind::For {
                var,
                start,
                end,
                step,
                body,
            } => {
                self.visit_expression(start, scope, loc, diags);
                self.visit_expression(end, scope, loc, diags);
                if let Some(step) = step {
                    self.visit_expression(step, scope, loc, diags);
                }
                self.declare_variable(var, scope, loc, diags);
                self.promote_loop_counter(scope, var);
                self.walk_body(body, scope, diags)?;
            }
            StatementKind::ForIn { var, array, body } => {
                self.declare_variable(array, scope, loc, diags);
                if let Some(elem) = self
                    .lookup(scope, array)
                    .and_then(|info| info.ty.element_type().cloned())
                {
                    if self.lookup(scope, var).is_none() {
                        self.declare(scope, VariableInfo::local(var.clone(), elem));
                    }
                } else {
                    self.declare_variable(var, scope, loc, diags);
                }
                // hidden 64-bit counter driving the lowered index loop
                let idx = crate::cfg::builder::hidden_index_name(var);
                if self.lookup(scope, &idx).is_none() {
                    let mut ty = TypeDescriptor::long();
                    ty.attrs.is_hidden = true;
                    self.declare(scope, VariableInfo::local(idx, ty));
                }
                self.walk_body(body, scope, diags)?;
            }
            StatementKind::While { cond, body } => {
                self.visit_expression(cond, scope, loc, diags);
                self.walk_body(body, scope, diags)?;
            }
            StatementKind::Repeat { body, until } => {
                self.walk_body(body, scope, diags)?;
                self.visit_expression(until, scope, loc, diags);
            }
            StatementKind::DoLoop {
                pre_cond,
                post_cond,
                body,
            } => {
                if let Some((_, cond)) = pre_cond {
                    self.visit_expression(cond, scope, loc, diags);
                }
                self.walk_body(body, scope, diags)?;
                if let Some((_, cond)) = post_cond {
                    self.visit_expression(cond, scope, loc, diags);
                }
            }
            StatementKind::SelectCase {
                selector,
                arms,
                else_body,
            } => {
                self.visit_expression(selector, scope, loc, diags);
                for arm in arms {
                    for clause in &arm.clauses {
                        match clause {
                            CaseClause::Value(v) => self.visit_expression(v, scope, loc, diags),
                            CaseClause::Range(lo, hi) => {
                                self.visit_expression(lo, scope, loc, diags);
                                self.visit_expression(hi, scope, loc, diags);
                            }
                            CaseClause::Is(_, v) => self.visit_expression(v, scope, loc, diags),
                        }
                    }
                    self.walk_body(&arm.body, scope, diags)?;
                }
                if let Some(body) = else_body {
                    self.walk_body(body, scope, diags)?;
                }
            }
            StatementKind::Try {
                body,
                catch_var,
                catch_body,
                finally_body,
            } => {
                self.walk_body(body, scope, diags)?;
                if let Some(var) = catch_var {
                    self.declare_variable(var, scope, loc, diags);
                }
                self.walk_body(catch_body, scope, diags)?;
                if let Some(body) = finally_body {
                    self.walk_body(body, scope, diags)?;
                }
            }
            StatementKind::Throw { value } => {
                if let Some(value) = value {
                    self.visit_expression(value, scope, loc, diags);
                }
            }
            StatementKind::OnGoto { selector, .. } | StatementKind::OnGosub { selector, .. } => {
                self.visit_expression(selector, scope, loc, diags);
            }
            StatementKind::OnEvent { .. } => {
                return Err(AnalyzeError::OnEventUnsupported { loc });
            }
            StatementKind::Return { value } => {
                if let Some(value) = value {
                    self.visit_expression(value, scope, loc, diags);
                }
            }
            StatementKind::Call { args, .. } => {
                for arg in args {
                    self.visit_expression(arg, scope, loc, diags);
                }
            }
            StatementKind::Data { values } => {
                for value in values {
                    self.table.data.push(DataEntry {
                        value: value.clone(),
                        basic_line: loc.basic_line,
                    });
                }
            }
            StatementKind::Function { .. }
            | StatementKind::Sub { .. }
            | StatementKind::DefFn { .. } => {
                if scope.is_some() {
                    return Err(AnalyzeError::NestedProcedure { loc });
                }
                // bodies are walked separately with their own scope
            }
            StatementKind::TypeDecl { .. }
            | StatementKind::Goto { .. }
            | StatementKind::Gosub { .. }
            | StatementKind::Exit { .. }
            | StatementKind::Continue
            | StatementKind::End
            | StatementKind::Restore { .. }
            | StatementKind::Label(_) => {}
        }
        Ok(())
    }

    fn walk_body(
        &mut self,
        body: &[Rc<Statement>],
        scope: Option<&str>,
        diags: &mut Diagnostics,
    ) -> Result<(), AnalyzeError> {
        for statement in body {
            self.walk_statement(statement, scope, diags)?;
        }
        Ok(())
    }

    // ---- declarations ----------------------------------------------------

    fn declare_explicit(
        &mut self,
        decl: &VarDecl,
        scope: Option<&str>,
        loc: SourceLoc,
        global: bool,
        diags: &mut Diagnostics,
    ) -> Result<(), AnalyzeError> {
        for bound in &decl.bounds {
            self.visit_expression(bound, scope, loc, diags);
        }
        let scalar_ty = match &decl.type_name {
            Some(keyword) => self.resolve_type_name(keyword, loc)?,
            None => type_of_name(&decl.name),
        };
        let ty = if decl.bounds.is_empty() {
            scalar_ty
        } else {
            let extents = decl
                .bounds
                .iter()
                .map(|b| const_int(b).unwrap_or(-1))
                .collect();
            TypeDescriptor::array_of(scalar_ty, extents)
        };
        let mut info = VariableInfo::local(decl.name.clone(), ty);
        if global {
            info.global_slot = Some(self.table.global_count);
            self.table.global_count += 1;
            // GLOBAL declarations always live in the main scope
            self.table.main.insert(info);
        } else {
            self.declare(scope, info);
        }
        Ok(())
    }

    fn declare_lvalue(
        &mut self,
        target: &LValue,
        scope: Option<&str>,
        loc: SourceLoc,
        diags: &mut Diagnostics,
    ) {
        match target {
            LValue::Variable(name) => self.declare_variable(name, scope, loc, diags),
            LValue::Index { name, indices } => {
                for index in indices {
                    self.visit_expression(index, scope, loc, diags);
                }
                self.declare_variable(name, scope, loc, diags);
            }
            LValue::Member { base, .. } => self.declare_lvalue(base, scope, loc, diags),
        }
    }

    /// Implicit declaration: first use of an unknown name creates it with
    /// the type its sigil implies (default INTEGER) and a warning.
    fn declare_variable(
        &mut self,
        name: &str,
        scope: Option<&str>,
        loc: SourceLoc,
        diags: &mut Diagnostics,
    ) {
        if self.lookup(scope, name).is_some() {
            return;
        }
        if self.table.functions.contains_key(name) {
            // assignment to the enclosing function's name hits the result
            // slot; calls are resolved at emission
            return;
        }
        diags.warn(
            Some(loc),
            format!("variable {name} implicitly declared"),
        );
        let mut info = VariableInfo::local(name.to_string(), type_of_name(name));
        info.implicit = true;
        self.declare(scope, info);
    }

    fn declare(&mut self, scope: Option<&str>, info: VariableInfo) {
        match scope {
            Some(func_name) => {
                self.table
                    .functions
                    .get_mut(func_name)
                    .expect("walking a registered procedure")
                    .locals
                    .insert(info);
            }
            None => self.table.main.insert(info),
        }
    }

    fn lookup(&self, scope: Option<&str>, name: &str) -> Option<&VariableInfo> {
        let func = scope.and_then(|s| self.table.functions.get(s));
        self.table.resolve(func, name)
    }

    /// Integer FOR counters without an explicit type widen to the 64-bit
    /// loop index type.
    fn promote_loop_counter(&mut self, scope: Option<&str>, name: &str) {
        let var = match scope {
            Some(func_name) => self
                .table
                .functions
                .get_mut(func_name)
                .and_then(|f| f.locals.get_mut(name)),
            None => self.table.main.get_mut(name),
        };
        if let Some(var) = var {
            if var.implicit && var.ty.base == BaseType::Integer {
                var.ty = TypeDescriptor::loop_index();
                var.promoted_loop_index = true;
            }
        }
    }

    fn visit_expression(
        &mut self,
        expr: &Expression,
        scope: Option<&str>,
        loc: SourceLoc,
        diags: &mut Diagnostics,
    ) {
        match expr {
            Expression::Variable(name) => self.declare_variable(name, scope, loc, diags),
            Expression::Call { args, .. } => {
                // the callee resolves at emission (array, procedure or
                // builtin); only the arguments can declare variables
                for arg in args {
                    self.visit_expression(arg, scope, loc, diags);
                }
            }
            Expression::Member { base, .. } => self.visit_expression(base, scope, loc, diags),
            Expression::Binary { lhs, rhs, .. } => {
                self.visit_expression(lhs, scope, loc, diags);
                self.visit_expression(rhs, scope, loc, diags);
            }
            Expression::Unary { operand, .. } => self.visit_expression(operand, scope, loc, diags),
            Expression::Iif {
                cond,
                then_value,
                else_value,
            } => {
                self.visit_expression(cond, scope, loc, diags);
                self.visit_expression(then_value, scope, loc, diags);
                self.visit_expression(else_value, scope, loc, diags);
            }
            Expression::IntLiteral(_)
            | Expression::FloatLiteral(_)
            | Expression::StringLiteral(_) => {}
        }
    }

    fn resolve_type_name(
        &self,
        name: &str,
        loc: SourceLoc,
    ) -> Result<TypeDescriptor, AnalyzeError> {
        if let Some(ty) = TypeDescriptor::of_keyword(name) {
            return Ok(ty);
        }
        if let Some(udt) = self.table.udts.get(&name.to_ascii_uppercase()) {
            return Ok(TypeDescriptor::user_defined(udt.id, udt.name.clone()));
        }
        Err(AnalyzeError::UnknownType {
            loc,
            name: name.to_string(),
        })
    }
}

/// Type a bare name implies: its suffix sigil, or INTEGER.
fn type_of_name(name: &str) -> TypeDescriptor {
    name.chars()
        .last()
        .and_then(TypeDescriptor::of_suffix)
        .unwrap_or_else(TypeDescriptor::integer)
}

fn element_type_of_name(name: &str) -> TypeDescriptor {
    type_of_name(name)
}

fn const_int(expr: &Expression) -> Option<i64> {
    match expr {
        Expression::IntLiteral(n) => Some(*n),
        Expression::Unary {
            op: crate::ast::UnaryOperator::Negate,
            operand,
        } => const_int(operand).map(|n| -n),
        _ => None,
    }
}

/// Nested statement lists of one statement, for recursive walks.
fn child_bodies(kind: &StatementKind) -> Vec<&Vec<Rc<Statement>>> {
    match kind {
        StatementKind::If {
            then_branch,
            else_branch,
            ..
        } => vec![then_branch, else_branch],
        StatementKind::For { body, .. }
        | StatementKind::ForIn { body, .. }
        | StatementKind::While { body, .. }
        | StatementKind::DoLoop { body, .. }
        | StatementKind::Function { body, .. }
        | StatementKind::Sub { body, .. } => vec![body],
        StatementKind::Repeat { body, .. } => vec![body],
        StatementKind::SelectCase {
            arms, else_body, ..
        } => {
            let mut bodies: Vec<&Vec<Rc<Statement>>> = arms.iter().map(|a| &a.body).collect();
            if let Some(body) = else_body {
                bodies.push(body);
            }
            bodies
        }
        StatementKind::Try {
            body,
            catch_body,
            finally_body,
            ..
        } => {
            let mut bodies = vec![body, catch_body];
            if let Some(fin) = finally_body {
                bodies.push(fin);
            }
            bodies
        }
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::*;
    use crate::parser::parse_source;

    fn run(src: &str) -> (SymbolTable, Diagnostics) {
        let program = parse_source(src).unwrap();
        let mut diags = Diagnostics::new();
        let table = analyze(&program, &mut diags).unwrap();
        (table, diags)
    }

    #[test]
    fn test_implicit_declaration_warns() {
        let (table, diags) = run("x = 1\n");
        assert!(table.main.get("X").unwrap().implicit);
        assert_eq!(diags.warnings().count(), 1);
    }

    #[test]
    fn test_suffix_types() {
        let (table, _) = run("n& = 1\ns$ = \"hi\"\nd# = 1.5\n");
        assert_eq!(table.main.get("N&").unwrap().ty.base, BaseType::Long);
        assert_eq!(table.main.get("S$").unwrap().ty.base, BaseType::String);
        assert_eq!(table.main.get("D#").unwrap().ty.base, BaseType::Double);
    }

    #[test]
    fn test_global_slot_allocation() {
        let (table, _) = run("GLOBAL a AS INTEGER, b AS DOUBLE\nGLOBAL c$\n");
        assert_eq!(table.main.get("A").unwrap().global_slot, Some(0));
        assert_eq!(table.main.get("B").unwrap().global_slot, Some(1));
        assert_eq!(table.main.get("C$").unwrap().global_slot, Some(2));
        assert_eq!(table.global_count, 3);
    }

    #[test]
    fn test_udt_layout() {
        let src = indoc! {"
            TYPE Point
                x AS DOUBLE
                tag AS BYTE
                y AS DOUBLE
            END TYPE
        "};
        let (table, _) = run(src);
        let udt = table.udts.get("POINT").unwrap();
        assert_eq!(udt.fields[0].offset, 0);
        assert_eq!(udt.fields[1].offset, 8);
        // next double realigns to 8
        assert_eq!(udt.fields[2].offset, 16);
        assert_eq!(udt.size, 24);
    }

    #[test]
    fn test_duplicate_line_number_rejected() {
        let program = parse_source("100 PRINT 1\n100 PRINT 2\n").unwrap();
        let mut diags = Diagnostics::new();
        assert!(matches!(
            analyze(&program, &mut diags),
            Err(AnalyzeError::DuplicateLineNumber { line: 100, .. })
        ));
    }

    #[test]
    fn test_function_signature_and_result_slot() {
        let src = indoc! {"
            FUNCTION TestDiv&(d AS LONG, v AS LONG) AS LONG
                RETURN d \\ v
            END FUNCTION
        "};
        let (table, _) = run(src);
        let func = table.function("TESTDIV&").unwrap();
        assert_eq!(func.return_type.base, BaseType::Long);
        assert_eq!(func.params.len(), 2);
        // params plus the result slot
        assert!(func.locals.get("TESTDIV&").is_some());
        assert_eq!(func.locals.get("D").unwrap().param_index, Some(0));
    }

    #[test]
    fn test_loop_counter_promotion() {
        let (table, _) = run("FOR i = 1 TO 3\nNEXT i\nFOR n& = 1 TO 3\nNEXT\n");
        assert!(table.main.get("I").unwrap().promoted_loop_index);
        assert_eq!(table.main.get("I").unwrap().ty.base, BaseType::LoopIndex);
        // explicitly typed counters keep their type
        assert!(!table.main.get("N&").unwrap().promoted_loop_index);
    }

    #[test]
    fn test_data_collection_with_lines() {
        let (table, _) = run("100 DATA 1, 2\n200 DATA \"x\"\nREAD a\n");
        assert_eq!(table.data.len(), 3);
        assert_eq!(table.data[0].basic_line, Some(100));
        assert_eq!(table.data[2].basic_line, Some(200));
        assert_eq!(table.data_index_for_line(150), Some(2));
    }

    #[test]
    fn test_shared_promotes_to_global() {
        let src = indoc! {"
            x = 5
            SUB Bump()
                SHARED x
                x = x + 1
            END SUB
        "};
        let (table, _) = run(src);
        assert!(table.main.get("X").unwrap().global_slot.is_some());
        assert_eq!(table.function("BUMP").unwrap().shared, vec!["X"]);
    }

    #[test]
    fn test_on_event_rejected() {
        let program = parse_source("ON EVENT timer GOSUB 100\n").unwrap();
        let mut diags = Diagnostics::new();
        assert!(matches!(
            analyze(&program, &mut diags),
            Err(AnalyzeError::OnEventUnsupported { .. })
        ));
    }

    #[test]
    fn test_static_and_dynamic_arrays() {
        let (table, _) = run("DIM a(10) AS INTEGER\nDIM b(n) AS DOUBLE\n");
        let a = &table.main.get("A").unwrap().ty;
        assert!(a.attrs.static_array);
        assert_eq!(a.extents, vec![10]);
        let b = &table.main.get("B").unwrap().ty;
        assert!(b.attrs.dynamic_array);
        assert_eq!(b.extents, vec![-1]);
    }
}
