pub mod expression;
pub mod statement;

use std::rc::Rc;

pub use expression::{BinaryOperator, Expression, UnaryOperator};
pub use statement::{
    CaseArm, CaseClause, DataValue, ExitKind, FieldDecl, JumpTarget, LValue, LoopCondKind, Param,
    PrintItem, PrintSep, Statement, StatementKind, VarDecl,
};

/// A parsed, validated program: the flattened top-level statement list.
/// Function and type definitions appear in source order as ordinary
/// statements; each statement's location carries the BASIC line number of
/// the line it came from, which is what jumps refer to.
#[derive(Debug, Clone, Default)]
pub struct Program {
    pub statements: Vec<Rc<Statement>>,
}

impl Program {
    pub fn new(statements: Vec<Rc<Statement>>) -> Self {
        Program { statements }
    }
}
