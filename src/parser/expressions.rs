use crate::ast::BinaryOperator;
use crate::ast::Expression;
use crate::ast::UnaryOperator;
use crate::parser::Parser;
use crate::parser::errors::ParseError;
use crate::parser::lexer::Keyword;
use crate::parser::lexer::Token;

/// Expression grammar, loosest to tightest:
/// `OR`/`XOR`, `AND`, `NOT`, comparisons, `SHL`/`SHR`, `+ -`,
/// `* / \ MOD`, unary sign, postfix member access, primary.
impl Parser {
    pub(crate) fn parse_expression(&mut self) -> Result<Expression, ParseError> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Expression, ParseError> {
        let mut lhs = self.parse_and()?;
        loop {
            let op = if self.eat_kw(Keyword::Or) {
                BinaryOperator::Or
            } else if self.eat_kw(Keyword::Xor) {
                BinaryOperator::Xor
            } else {
                return Ok(lhs);
            };
            let rhs = self.parse_and()?;
            lhs = Expression::binary(op, lhs, rhs);
        }
    }

    fn parse_and(&mut self) -> Result<Expression, ParseError> {
        let mut lhs = self.parse_not()?;
        while self.eat_kw(Keyword::And) {
            let rhs = self.parse_not()?;
            lhs = Expression::binary(BinaryOperator::And, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_not(&mut self) -> Result<Expression, ParseError> {
        if self.eat_kw(Keyword::Not) {
            let operand = self.parse_not()?;
            return Ok(Expression::unary(UnaryOperator::Not, operand));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expression, ParseError> {
        let mut lhs = self.parse_shift()?;
        loop {
            let op = if self.eat(&Token::Equal) {
                BinaryOperator::Equal
            } else if self.eat(&Token::NotEqual) {
                BinaryOperator::NotEqual
            } else if self.eat(&Token::Less) {
                BinaryOperator::Less
            } else if self.eat(&Token::LessEqual) {
                BinaryOperator::LessEqual
            } else if self.eat(&Token::Greater) {
                BinaryOperator::Greater
            } else if self.eat(&Token::GreaterEqual) {
                BinaryOperator::GreaterEqual
            } else {
                return Ok(lhs);
            };
            let rhs = self.parse_shift()?;
            lhs = Expression::binary(op, lhs, rhs);
        }
    }

    fn parse_shift(&mut self) -> Result<Expression, ParseError> {
        let mut lhs = self.parse_additive()?;
        loop {
            let op = if self.eat_kw(Keyword::Shl) {
                BinaryOperator::ShiftLeft
            } else if self.eat_kw(Keyword::Shr) {
                BinaryOperator::ShiftRight
            } else {
                return Ok(lhs);
            };
            let rhs = self.parse_additive()?;
            lhs = Expression::binary(op, lhs, rhs);
        }
    }

    fn parse_additive(&mut self) -> Result<Expression, ParseError> {
        let mut lhs = self.parse_term()?;
        loop {
            let op = if self.eat(&Token::Plus) {
                BinaryOperator::Add
            } else if self.eat(&Token::Minus) {
                BinaryOperator::Subtract
            } else {
                return Ok(lhs);
            };
            let rhs = self.parse_term()?;
            lhs = Expression::binary(op, lhs, rhs);
        }
    }

    fn parse_term(&mut self) -> Result<Expression, ParseError> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = if self.eat(&Token::Star) {
                BinaryOperator::Multiply
            } else if self.eat(&Token::Slash) {
                BinaryOperator::Divide
            } else if self.eat(&Token::Backslash) {
                BinaryOperator::IntDivide
            } else if self.eat_kw(Keyword::Mod) {
                BinaryOperator::Modulo
            } else {
                return Ok(lhs);
            };
            let rhs = self.parse_unary()?;
            lhs = Expression::binary(op, lhs, rhs);
        }
    }

    fn parse_unary(&mut self) -> Result<Expression, ParseError> {
        if self.eat(&Token::Minus) {
            let operand = self.parse_unary()?;
            return Ok(Expression::unary(UnaryOperator::Negate, operand));
        }
        if self.eat(&Token::Plus) {
            let operand = self.parse_unary()?;
            return Ok(Expression::unary(UnaryOperator::Plus, operand));
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<Expression, ParseError> {
        let mut expr = self.parse_primary()?;
        while self.eat(&Token::Dot) {
            let field = self.expect_ident("field name")?;
            expr = Expression::Member {
                base: Box::new(expr),
                field,
            };
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<Expression, ParseError> {
        if self.check_kw(Keyword::Iif) {
            return self.parse_iif();
        }
        let tok = match self.peek() {
            Some(t) => t.token.clone(),
            None => return Err(self.unexpected("expression")),
        };
        match tok {
            Token::Int(n) | Token::HexInt(n) | Token::OctalInt(n) => {
                self.advance();
                Ok(Expression::IntLiteral(n))
            }
            Token::Float(x) => {
                self.advance();
                Ok(Expression::FloatLiteral(x))
            }
            Token::Str(s) => {
                self.advance();
                Ok(Expression::StringLiteral(s))
            }
            Token::LeftParen => {
                self.advance();
                let inner = self.parse_expression()?;
                self.expect(&Token::RightParen, "`)`")?;
                Ok(inner)
            }
            Token::Ident(name) => {
                if self.peek().map(|t| t.kw.is_some()).unwrap_or(false) {
                    return Err(self.unexpected("expression"));
                }
                self.advance();
                if self.eat(&Token::LeftParen) {
                    let args = self.parse_argument_list()?;
                    Ok(Expression::Call { name, args })
                } else {
                    Ok(Expression::Variable(name))
                }
            }
            _ => Err(self.unexpected("expression")),
        }
    }

    fn parse_iif(&mut self) -> Result<Expression, ParseError> {
        self.expect_kw(Keyword::Iif, "IIF")?;
        self.expect(&Token::LeftParen, "`(`")?;
        let cond = self.parse_expression()?;
        self.expect(&Token::Comma, "`,`")?;
        let then_value = self.parse_expression()?;
        self.expect(&Token::Comma, "`,`")?;
        let else_value = self.parse_expression()?;
        self.expect(&Token::RightParen, "`)`")?;
        Ok(Expression::Iif {
            cond: Box::new(cond),
            then_value: Box::new(then_value),
            else_value: Box::new(else_value),
        })
    }

    /// Comma-separated expressions up to and including the closing paren.
    pub(crate) fn parse_argument_list(&mut self) -> Result<Vec<Expression>, ParseError> {
        let mut args = Vec::new();
        if self.eat(&Token::RightParen) {
            return Ok(args);
        }
        loop {
            args.push(self.parse_expression()?);
            if self.eat(&Token::Comma) {
                continue;
            }
            self.expect(&Token::RightParen, "`)`")?;
            return Ok(args);
        }
    }
}
