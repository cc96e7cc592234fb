use strum::Display;

/// Expression tree. Plain owned variants; subtrees are never shared, so a
/// deep `clone()` is always a safe copy (the SELECT CASE lowering relies on
/// this when it duplicates the selector per comparison).
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    IntLiteral(i64),
    FloatLiteral(f64),
    StringLiteral(String),
    /// Variable reference; the name keeps its suffix sigil, so `N%` and
    /// `N$` are distinct names.
    Variable(String),
    /// `name(args)` — array element, string index, builtin, DEF FN or
    /// user function; which one is decided against the symbol table.
    Call { name: String, args: Vec<Expression> },
    /// UDT field access, `p.x` or `pts(i).x`.
    Member {
        base: Box<Expression>,
        field: String,
    },
    Binary {
        op: BinaryOperator,
        lhs: Box<Expression>,
        rhs: Box<Expression>,
    },
    Unary {
        op: UnaryOperator,
        operand: Box<Expression>,
    },
    /// `IIF(cond, a, b)` — lazy two-way select, kept as its own node
    /// because only one arm may be evaluated.
    Iif {
        cond: Box<Expression>,
        then_value: Box<Expression>,
        else_value: Box<Expression>,
    },
}

impl Expression {
    pub fn binary(op: BinaryOperator, lhs: Expression, rhs: Expression) -> Expression {
        Expression::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    pub fn unary(op: UnaryOperator, operand: Expression) -> Expression {
        Expression::Unary {
            op,
            operand: Box::new(operand),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum BinaryOperator {
    #[strum(serialize = "+")]
    Add,
    #[strum(serialize = "-")]
    Subtract,
    #[strum(serialize = "*")]
    Multiply,
    #[strum(serialize = "/")]
    Divide,
    #[strum(serialize = "\\")]
    IntDivide,
    #[strum(serialize = "MOD")]
    Modulo,
    #[strum(serialize = "=")]
    Equal,
    #[strum(serialize = "<>")]
    NotEqual,
    #[strum(serialize = "<")]
    Less,
    #[strum(serialize = "<=")]
    LessEqual,
    #[strum(serialize = ">")]
    Greater,
    #[strum(serialize = ">=")]
    GreaterEqual,
    #[strum(serialize = "AND")]
    And,
    #[strum(serialize = "OR")]
    Or,
    #[strum(serialize = "XOR")]
    Xor,
    #[strum(serialize = "SHL")]
    ShiftLeft,
    #[strum(serialize = "SHR")]
    ShiftRight,
}

impl BinaryOperator {
    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinaryOperator::Equal
                | BinaryOperator::NotEqual
                | BinaryOperator::Less
                | BinaryOperator::LessEqual
                | BinaryOperator::Greater
                | BinaryOperator::GreaterEqual
        )
    }

    pub fn is_bitwise(&self) -> bool {
        matches!(
            self,
            BinaryOperator::And
                | BinaryOperator::Or
                | BinaryOperator::Xor
                | BinaryOperator::ShiftLeft
                | BinaryOperator::ShiftRight
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum UnaryOperator {
    #[strum(serialize = "-")]
    Negate,
    #[strum(serialize = "+")]
    Plus,
    #[strum(serialize = "NOT")]
    Not,
}
