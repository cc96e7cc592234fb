use core::fmt;
use core::fmt::Display;
use std::rc::Rc;

use strum::Display as StrumDisplay;

use crate::ast::expression::{BinaryOperator, Expression};
use crate::diagnostics::SourceLoc;

/// One statement with its source position. Control-flow blocks reference
/// statements through `Rc`, so a statement may be shared between the AST
/// and several basic blocks without being copied.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub loc: SourceLoc,
    pub kind: StatementKind,
}

impl Statement {
    pub fn new(loc: SourceLoc, kind: StatementKind) -> Rc<Statement> {
        Rc::new(Statement { loc, kind })
    }
}

/// Assignment target.
#[derive(Debug, Clone, PartialEq)]
pub enum LValue {
    Variable(String),
    /// `a(i, j)` — array element or string character slot
    Index {
        name: String,
        indices: Vec<Expression>,
    },
    /// `p.x`, `pts(i).y`
    Member { base: Box<LValue>, field: String },
}

impl LValue {
    /// Name of the root variable this lvalue ultimately writes through.
    pub fn root_name(&self) -> &str {
        match self {
            LValue::Variable(name) => name,
            LValue::Index { name, .. } => name,
            LValue::Member { base, .. } => base.root_name(),
        }
    }
}

/// Jump destination: a BASIC line number or a named label.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum JumpTarget {
    Line(u32),
    Label(String),
}

impl Display for JumpTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JumpTarget::Line(n) => write!(f, "{n}"),
            JumpTarget::Label(name) => write!(f, "{name}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, StrumDisplay)]
pub enum ExitKind {
    #[strum(serialize = "FOR")]
    For,
    #[strum(serialize = "WHILE")]
    While,
    #[strum(serialize = "DO")]
    Do,
    #[strum(serialize = "SELECT")]
    Select,
}

/// Condition attached to a `DO`/`LOOP` head or tail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopCondKind {
    While,
    Until,
}

/// Separator following a PRINT item. An item without a trailing separator
/// ends the statement with a newline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrintSep {
    /// `;` — juxtapose
    Semicolon,
    /// `,` — advance to the next tab stop
    Comma,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PrintItem {
    pub expr: Expression,
    pub sep: Option<PrintSep>,
}

/// Scalar or array declaration as written in `DIM`/`GLOBAL`.
#[derive(Debug, Clone, PartialEq)]
pub struct VarDecl {
    pub name: String,
    /// `AS` type name (builtin keyword or UDT name), if given
    pub type_name: Option<String>,
    /// declared upper bounds; empty for scalars
    pub bounds: Vec<Expression>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub type_name: Option<String>,
    pub byref: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldDecl {
    pub name: String,
    pub type_name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DataValue {
    Int(i64),
    Float(f64),
    Str(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum CaseClause {
    /// `CASE v`
    Value(Expression),
    /// `CASE lo TO hi`
    Range(Expression, Expression),
    /// `CASE IS <op> v`
    Is(BinaryOperator, Expression),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CaseArm {
    pub clauses: Vec<CaseClause>,
    pub body: Vec<Rc<Statement>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StatementKind {
    /// `LET target = value` (LET optional)
    Let { target: LValue, value: Expression },
    Dim {
        decls: Vec<VarDecl>,
    },
    Redim {
        preserve: bool,
        name: String,
        bounds: Vec<Expression>,
    },
    Global {
        decls: Vec<VarDecl>,
    },
    Shared {
        names: Vec<String>,
    },
    Print {
        items: Vec<PrintItem>,
    },
    Input {
        prompt: Option<String>,
        targets: Vec<LValue>,
    },
    /// Block IF; `ELSEIF` chains are desugared into a nested IF in the
    /// else branch during parsing.
    If {
        cond: Expression,
        then_branch: Vec<Rc<Statement>>,
        else_branch: Vec<Rc<Statement>>,
    },
    /// Single-line `IF cond THEN <target> [ELSE <target>]`
    IfGoto {
        cond: Expression,
        then_target: JumpTarget,
        else_target: Option<JumpTarget>,
    },
    For {
        var: String,
        start: Expression,
        end: Expression,
        step: Option<Expression>,
        body: Vec<Rc<Statement>>,
    },
    /// `FOR v IN a` — iterate the elements of array `a`
    ForIn {
        var: String,
        array: String,
        body: Vec<Rc<Statement>>,
    },
    While {
        cond: Expression,
        body: Vec<Rc<Statement>>,
    },
    Repeat {
        body: Vec<Rc<Statement>>,
        until: Expression,
    },
    DoLoop {
        pre_cond: Option<(LoopCondKind, Expression)>,
        post_cond: Option<(LoopCondKind, Expression)>,
        body: Vec<Rc<Statement>>,
    },
    SelectCase {
        selector: Expression,
        arms: Vec<CaseArm>,
        else_body: Option<Vec<Rc<Statement>>>,
    },
    Try {
        body: Vec<Rc<Statement>>,
        catch_var: Option<String>,
        catch_body: Vec<Rc<Statement>>,
        finally_body: Option<Vec<Rc<Statement>>>,
    },
    Throw {
        value: Option<Expression>,
    },
    Goto {
        target: JumpTarget,
    },
    Gosub {
        target: JumpTarget,
    },
    /// Bare `RETURN` returns from a GOSUB (or a procedure); `RETURN expr`
    /// is only meaningful inside a FUNCTION.
    Return {
        value: Option<Expression>,
    },
    OnGoto {
        selector: Expression,
        targets: Vec<JumpTarget>,
    },
    OnGosub {
        selector: Expression,
        targets: Vec<JumpTarget>,
    },
    /// `ON <event> GOSUB <target>`; recognized by the jump pre-scan but
    /// rejected during analysis.
    OnEvent {
        event: String,
        target: JumpTarget,
    },
    Exit {
        kind: ExitKind,
    },
    Continue,
    End,
    /// `DEF FNname(params) = expr`
    DefFn {
        name: String,
        params: Vec<Param>,
        body: Expression,
    },
    Function {
        name: String,
        params: Vec<Param>,
        return_type: Option<String>,
        body: Vec<Rc<Statement>>,
    },
    Sub {
        name: String,
        params: Vec<Param>,
        body: Vec<Rc<Statement>>,
    },
    TypeDecl {
        name: String,
        fields: Vec<FieldDecl>,
    },
    Data {
        values: Vec<DataValue>,
    },
    Read {
        targets: Vec<LValue>,
    },
    Restore {
        target: Option<u32>,
    },
    /// `CALL name(args)` or bare `name args`
    Call {
        name: String,
        args: Vec<Expression>,
    },
    /// `name:` at the start of a line
    Label(String),
}

impl StatementKind {
    /// True when control cannot fall out of this statement.
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            StatementKind::Goto { .. }
                | StatementKind::Return { .. }
                | StatementKind::End
                | StatementKind::Throw { .. }
                | StatementKind::Exit { .. }
        )
    }

    /// Short keyword used by the CFG dump.
    pub fn keyword(&self) -> &'static str {
        match self {
            StatementKind::Let { .. } => "LET",
            StatementKind::Dim { .. } => "DIM",
            StatementKind::Redim { .. } => "REDIM",
            StatementKind::Global { .. } => "GLOBAL",
            StatementKind::Shared { .. } => "SHARED",
            StatementKind::Print { .. } => "PRINT",
            StatementKind::Input { .. } => "INPUT",
            StatementKind::If { .. } | StatementKind::IfGoto { .. } => "IF",
            StatementKind::For { .. } | StatementKind::ForIn { .. } => "FOR",
            StatementKind::While { .. } => "WHILE",
            StatementKind::Repeat { .. } => "REPEAT",
            StatementKind::DoLoop { .. } => "DO",
            StatementKind::SelectCase { .. } => "SELECT",
            StatementKind::Try { .. } => "TRY",
            StatementKind::Throw { .. } => "THROW",
            StatementKind::Goto { .. } => "GOTO",
            StatementKind::Gosub { .. } => "GOSUB",
            StatementKind::Return { .. } => "RETURN",
            StatementKind::OnGoto { .. } => "ON GOTO",
            StatementKind::OnGosub { .. } => "ON GOSUB",
            StatementKind::OnEvent { .. } => "ON EVENT",
            StatementKind::Exit { .. } => "EXIT",
            StatementKind::Continue => "CONTINUE",
            StatementKind::End => "END",
            StatementKind::DefFn { .. } => "DEF FN",
            StatementKind::Function { .. } => "FUNCTION",
            StatementKind::Sub { .. } => "SUB",
            StatementKind::TypeDecl { .. } => "TYPE",
            StatementKind::Data { .. } => "DATA",
            StatementKind::Read { .. } => "READ",
            StatementKind::Restore { .. } => "RESTORE",
            StatementKind::Call { .. } => "CALL",
            StatementKind::Label(_) => "LABEL",
        }
    }
}
