use std::rc::Rc;

use crate::ast::CaseArm;
use crate::ast::CaseClause;
use crate::ast::DataValue;
use crate::ast::ExitKind;
use crate::ast::Expression;
use crate::ast::FieldDecl;
use crate::ast::JumpTarget;
use crate::ast::LValue;
use crate::ast::LoopCondKind;
use crate::ast::Param;
use crate::ast::PrintItem;
use crate::ast::PrintSep;
use crate::ast::Statement;
use crate::ast::StatementKind;
use crate::ast::VarDecl;
use crate::ast::expression::BinaryOperator;
use crate::parser::BlockEnd;
use crate::parser::Parser;
use crate::parser::errors::ParseError;
use crate::parser::lexer::Keyword;
use crate::parser::lexer::Token;

impl Parser {
    /// Parses statements until end of input or one of `ends`. Returns the
    /// closer that stopped the list without consuming it; `None` means end
    /// of input, which is an error for every caller except the program
    /// level.
    pub(crate) fn parse_statement_list(
        &mut self,
        ends: &[BlockEnd],
    ) -> Result<(Vec<Rc<Statement>>, Option<BlockEnd>), ParseError> {
        let mut statements = Vec::new();
        loop {
            self.skip_to_statement()?;
            if self.is_eof() {
                return Ok((statements, None));
            }
            if let Some(end) = self.at_block_end(ends) {
                return Ok((statements, Some(end)));
            }
            let statement = self.parse_statement()?;
            let is_label = matches!(statement.kind, StatementKind::Label(_));
            statements.push(statement);
            if !is_label {
                self.end_statement()?;
            }
        }
    }

    /// Same, but fails with a message naming the expected closer when the
    /// input runs out inside the block.
    fn parse_block(
        &mut self,
        ends: &[BlockEnd],
        closer: &str,
    ) -> Result<(Vec<Rc<Statement>>, BlockEnd), ParseError> {
        match self.parse_statement_list(ends)? {
            (statements, Some(end)) => Ok((statements, end)),
            (_, None) => Err(ParseError::UnexpectedEof {
                expected: closer.to_string(),
            }),
        }
    }

    pub(crate) fn parse_statement(&mut self) -> Result<Rc<Statement>, ParseError> {
        let loc = self.loc();
        let kw = self.peek().and_then(|t| t.kw);
        let kind = match kw {
            Some(Keyword::Let) => {
                self.advance();
                self.parse_assignment()?
            }
            Some(Keyword::Dim) => {
                self.advance();
                StatementKind::Dim {
                    decls: self.parse_var_decls()?,
                }
            }
            Some(Keyword::Redim) => self.parse_redim()?,
            Some(Keyword::Global) => {
                self.advance();
                StatementKind::Global {
                    decls: self.parse_var_decls()?,
                }
            }
            Some(Keyword::Shared) => {
                self.advance();
                let mut names = vec![self.expect_ident("variable name")?];
                while self.eat(&Token::Comma) {
                    names.push(self.expect_ident("variable name")?);
                }
                StatementKind::Shared { names }
            }
            Some(Keyword::Print) => {
                self.advance();
                self.parse_print()?
            }
            Some(Keyword::Input) => {
                self.advance();
                self.parse_input()?
            }
            Some(Keyword::If) => {
                self.advance();
                self.parse_if()?
            }
            Some(Keyword::For) => {
                self.advance();
                self.parse_for()?
            }
            Some(Keyword::While) => {
                self.advance();
                self.parse_while()?
            }
            Some(Keyword::Repeat) => {
                self.advance();
                self.parse_repeat()?
            }
            Some(Keyword::Do) => {
                self.advance();
                self.parse_do()?
            }
            Some(Keyword::Select) => {
                self.advance();
                self.parse_select()?
            }
            Some(Keyword::Try) => {
                self.advance();
                self.parse_try()?
            }
            Some(Keyword::Throw) => {
                self.advance();
                let value = if self.at_statement_boundary() {
                    None
                } else {
                    Some(self.parse_expression()?)
                };
                StatementKind::Throw { value }
            }
            Some(Keyword::Goto) => {
                self.advance();
                StatementKind::Goto {
                    target: self.parse_jump_target()?,
                }
            }
            Some(Keyword::Gosub) => {
                self.advance();
                StatementKind::Gosub {
                    target: self.parse_jump_target()?,
                }
            }
            Some(Keyword::Return) => {
                self.advance();
                let value = if self.at_statement_boundary() {
                    None
                } else {
                    Some(self.parse_expression()?)
                };
                StatementKind::Return { value }
            }
            Some(Keyword::On) => {
                self.advance();
                self.parse_on()?
            }
            Some(Keyword::Exit) => {
                self.advance();
                self.parse_exit()?
            }
            Some(Keyword::Continue) => {
                self.advance();
                StatementKind::Continue
            }
            Some(Keyword::End) => {
                self.advance();
                if let Some(t) = self.peek() {
                    if let Some(k) = t.kw {
                        if matches!(
                            k,
                            Keyword::If
                                | Keyword::Select
                                | Keyword::Try
                                | Keyword::Function
                                | Keyword::Sub
                                | Keyword::Type
                        ) {
                            return Err(ParseError::Message {
                                loc,
                                message: format!(
                                    "END {} without a matching block",
                                    format!("{k:?}").to_uppercase()
                                ),
                            });
                        }
                    }
                }
                StatementKind::End
            }
            Some(Keyword::Def) => {
                self.advance();
                self.parse_def_fn()?
            }
            Some(Keyword::Function) => {
                self.advance();
                self.parse_function()?
            }
            Some(Keyword::Sub) => {
                self.advance();
                self.parse_sub()?
            }
            Some(Keyword::Type) => {
                self.advance();
                self.parse_type_decl()?
            }
            Some(Keyword::Data) => {
                self.advance();
                self.parse_data()?
            }
            Some(Keyword::Read) => {
                self.advance();
                let mut targets = vec![self.parse_lvalue()?];
                while self.eat(&Token::Comma) {
                    targets.push(self.parse_lvalue()?);
                }
                StatementKind::Read { targets }
            }
            Some(Keyword::Restore) => {
                self.advance();
                let target = match self.peek().map(|t| t.token.clone()) {
                    Some(Token::Int(n)) => {
                        self.advance();
                        Some(n as u32)
                    }
                    _ => None,
                };
                StatementKind::Restore { target }
            }
            Some(Keyword::Call) => {
                self.advance();
                let name = self.expect_ident("subroutine name")?;
                let args = if self.eat(&Token::LeftParen) {
                    self.parse_argument_list()?
                } else {
                    Vec::new()
                };
                StatementKind::Call { name, args }
            }
            Some(other) => {
                return Err(ParseError::Message {
                    loc,
                    message: format!(
                        "{} cannot start a statement",
                        format!("{other:?}").to_uppercase()
                    ),
                });
            }
            None => self.parse_ident_statement()?,
        };
        Ok(Statement::new(loc, kind))
    }

    fn at_statement_boundary(&self) -> bool {
        self.is_eof()
            || self.check(&Token::Newline)
            || self.check(&Token::Colon)
            || self.check_kw(Keyword::Else)
    }

    // ---- assignments, calls, labels --------------------------------------

    /// Statement starting with a plain identifier: a label definition, an
    /// assignment, or a call.
    fn parse_ident_statement(&mut self) -> Result<StatementKind, ParseError> {
        // `Name:` defines a label
        if let (Some(Token::Ident(_)), Some(Token::Colon)) = (
            self.peek().map(|t| &t.token),
            self.peek_at(1).map(|t| &t.token),
        ) {
            let name = self.expect_ident("label")?;
            self.advance(); // colon
            return Ok(StatementKind::Label(name));
        }
        self.parse_assignment()
    }

    fn parse_assignment(&mut self) -> Result<StatementKind, ParseError> {
        let target = self.parse_lvalue()?;
        if self.eat(&Token::Equal) {
            let value = self.parse_expression()?;
            return Ok(StatementKind::Let { target, value });
        }
        // no `=`: this was a call after all
        match target {
            LValue::Variable(name) => Ok(StatementKind::Call {
                name,
                args: Vec::new(),
            }),
            LValue::Index { name, indices } => Ok(StatementKind::Call {
                name,
                args: indices,
            }),
            LValue::Member { .. } => Err(self.unexpected("`=`")),
        }
    }

    pub(crate) fn parse_lvalue(&mut self) -> Result<LValue, ParseError> {
        let name = self.expect_ident("variable name")?;
        let mut lvalue = if self.eat(&Token::LeftParen) {
            let indices = self.parse_argument_list()?;
            LValue::Index { name, indices }
        } else {
            LValue::Variable(name)
        };
        while self.eat(&Token::Dot) {
            let field = self.expect_ident("field name")?;
            lvalue = LValue::Member {
                base: Box::new(lvalue),
                field,
            };
        }
        Ok(lvalue)
    }

    // ---- declarations ----------------------------------------------------

    fn parse_var_decls(&mut self) -> Result<Vec<VarDecl>, ParseError> {
        let mut decls = vec![self.parse_var_decl()?];
        while self.eat(&Token::Comma) {
            decls.push(self.parse_var_decl()?);
        }
        Ok(decls)
    }

    fn parse_var_decl(&mut self) -> Result<VarDecl, ParseError> {
        let name = self.expect_ident("variable name")?;
        let bounds = if self.eat(&Token::LeftParen) {
            self.parse_argument_list()?
        } else {
            Vec::new()
        };
        let type_name = if self.eat_kw(Keyword::As) {
            Some(self.expect_ident("type name")?)
        } else {
            None
        };
        Ok(VarDecl {
            name,
            type_name,
            bounds,
        })
    }

    fn parse_redim(&mut self) -> Result<StatementKind, ParseError> {
        self.advance(); // REDIM
        let preserve = self.eat_kw(Keyword::Preserve);
        let name = self.expect_ident("array name")?;
        self.expect(&Token::LeftParen, "`(`")?;
        let bounds = self.parse_argument_list()?;
        Ok(StatementKind::Redim {
            preserve,
            name,
            bounds,
        })
    }

    // ---- I/O -------------------------------------------------------------

    fn parse_print(&mut self) -> Result<StatementKind, ParseError> {
        let mut items = Vec::new();
        while !self.at_statement_boundary() {
            let expr = self.parse_expression()?;
            let sep = if self.eat(&Token::Semicolon) {
                Some(PrintSep::Semicolon)
            } else if self.eat(&Token::Comma) {
                Some(PrintSep::Comma)
            } else {
                None
            };
            let done = sep.is_none();
            items.push(PrintItem { expr, sep });
            if done {
                break;
            }
        }
        Ok(StatementKind::Print { items })
    }

    fn parse_input(&mut self) -> Result<StatementKind, ParseError> {
        let prompt = match self.peek().map(|t| t.token.clone()) {
            Some(Token::Str(s)) => {
                self.advance();
                if !self.eat(&Token::Semicolon) {
                    self.expect(&Token::Comma, "`;` or `,`")?;
                }
                Some(s)
            }
            _ => None,
        };
        let mut targets = vec![self.parse_lvalue()?];
        while self.eat(&Token::Comma) {
            targets.push(self.parse_lvalue()?);
        }
        Ok(StatementKind::Input { prompt, targets })
    }

    // ---- IF --------------------------------------------------------------

    fn parse_if(&mut self) -> Result<StatementKind, ParseError> {
        let cond = self.parse_expression()?;

        // `IF cond GOTO target` without THEN
        if self.eat_kw(Keyword::Goto) {
            let then_target = self.parse_jump_target()?;
            let else_target = if self.eat_kw(Keyword::Else) {
                Some(self.parse_jump_target()?)
            } else {
                None
            };
            return Ok(StatementKind::IfGoto {
                cond,
                then_target,
                else_target,
            });
        }

        self.expect_kw(Keyword::Then, "THEN")?;

        // block form: THEN ends the line
        if self.check(&Token::Newline) {
            return self.parse_if_block(cond);
        }

        // `IF cond THEN 100 [ELSE 200]`
        if let Some(Token::Int(n)) = self.peek().map(|t| t.token.clone()) {
            self.advance();
            let else_target = if self.eat_kw(Keyword::Else) {
                Some(self.parse_jump_target()?)
            } else {
                None
            };
            return Ok(StatementKind::IfGoto {
                cond,
                then_target: JumpTarget::Line(n as u32),
                else_target,
            });
        }

        // single-line form with inline statement lists
        let then_branch = self.parse_inline_statements()?;
        let else_branch = if self.eat_kw(Keyword::Else) {
            self.parse_inline_statements()?
        } else {
            Vec::new()
        };
        Ok(StatementKind::If {
            cond,
            then_branch,
            else_branch,
        })
    }

    /// Statements separated by `:` on the current line, stopping before
    /// `ELSE`, the end of the line, or end of input.
    fn parse_inline_statements(&mut self) -> Result<Vec<Rc<Statement>>, ParseError> {
        let mut statements = Vec::new();
        loop {
            statements.push(self.parse_statement()?);
            if self.check_kw(Keyword::Else) {
                return Ok(statements);
            }
            if self.eat(&Token::Colon) {
                if self.check_kw(Keyword::Else) {
                    return Ok(statements);
                }
                continue;
            }
            if self.is_eof() || self.check(&Token::Newline) {
                return Ok(statements);
            }
            return Err(self.unexpected("`:`, ELSE or end of line"));
        }
    }

    fn parse_if_block(&mut self, cond: Expression) -> Result<StatementKind, ParseError> {
        let (then_branch, end) =
            self.parse_block(&[BlockEnd::EndIf, BlockEnd::ElseIf, BlockEnd::Else], "END IF")?;
        let else_branch = match end {
            BlockEnd::ElseIf => {
                // nested IF in the else arm, sharing the same END IF
                let loc = self.loc();
                self.advance(); // ELSEIF
                let nested_cond = self.parse_expression()?;
                self.expect_kw(Keyword::Then, "THEN")?;
                let nested = self.parse_if_block(nested_cond)?;
                vec![Statement::new(loc, nested)]
            }
            BlockEnd::Else => {
                self.advance(); // ELSE
                let (else_branch, _) = self.parse_block(&[BlockEnd::EndIf], "END IF")?;
                self.advance(); // END
                self.advance(); // IF
                else_branch
            }
            _ => {
                self.advance(); // END
                self.advance(); // IF
                Vec::new()
            }
        };
        Ok(StatementKind::If {
            cond,
            then_branch,
            else_branch,
        })
    }

    // ---- loops -----------------------------------------------------------

    fn parse_for(&mut self) -> Result<StatementKind, ParseError> {
        let var = self.expect_ident("loop variable")?;

        if self.eat_kw(Keyword::In) {
            let array = self.expect_ident("array name")?;
            let body = self.parse_loop_body(&var)?;
            return Ok(StatementKind::ForIn { var, array, body });
        }

        self.expect(&Token::Equal, "`=`")?;
        let start = self.parse_expression()?;
        self.expect_kw(Keyword::To, "TO")?;
        let end = self.parse_expression()?;
        let step = if self.eat_kw(Keyword::Step) {
            Some(self.parse_expression()?)
        } else {
            None
        };
        let body = self.parse_loop_body(&var)?;
        Ok(StatementKind::For {
            var,
            start,
            end,
            step,
            body,
        })
    }

    /// FOR body up to the matching NEXT. A bare NEXT closes the innermost
    /// FOR; `NEXT v` must name this loop's variable.
    fn parse_loop_body(&mut self, var: &str) -> Result<Vec<Rc<Statement>>, ParseError> {
        let (body, _) = self.parse_block(&[BlockEnd::Next], "NEXT")?;
        let loc = self.loc();
        self.advance(); // NEXT
        if let Some(Token::Ident(_)) = self.peek().map(|t| &t.token) {
            if self.peek().map(|t| t.kw.is_none()).unwrap_or(false) {
                let name = self.expect_ident("loop variable")?;
                if name != var {
                    return Err(ParseError::Message {
                        loc,
                        message: format!("NEXT {name} does not match FOR {var}"),
                    });
                }
            }
        }
        Ok(body)
    }

    fn parse_while(&mut self) -> Result<StatementKind, ParseError> {
        let cond = self.parse_expression()?;
        let (body, _) = self.parse_block(&[BlockEnd::Wend], "WEND")?;
        self.advance(); // WEND
        Ok(StatementKind::While { cond, body })
    }

    fn parse_repeat(&mut self) -> Result<StatementKind, ParseError> {
        let (body, _) = self.parse_block(&[BlockEnd::Until], "UNTIL")?;
        self.advance(); // UNTIL
        let until = self.parse_expression()?;
        Ok(StatementKind::Repeat { body, until })
    }

    fn parse_do(&mut self) -> Result<StatementKind, ParseError> {
        let pre_cond = self.parse_loop_condition()?;
        let (body, _) = self.parse_block(&[BlockEnd::Loop], "LOOP")?;
        self.advance(); // LOOP
        let post_cond = self.parse_loop_condition()?;
        if pre_cond.is_some() && post_cond.is_some() {
            return Err(ParseError::Message {
                loc: self.loc(),
                message: "DO loop cannot have both a head and a tail condition".to_string(),
            });
        }
        Ok(StatementKind::DoLoop {
            pre_cond,
            post_cond,
            body,
        })
    }

    fn parse_loop_condition(
        &mut self,
    ) -> Result<Option<(LoopCondKind, Expression)>, ParseError> {
        let kind = if self.eat_kw(Keyword::While) {
            LoopCondKind::While
        } else if self.eat_kw(Keyword::Until) {
            LoopCondKind::Until
        } else {
            return Ok(None);
        };
        Ok(Some((kind, self.parse_expression()?)))
    }

    // ---- SELECT CASE -----------------------------------------------------

    fn parse_select(&mut self) -> Result<StatementKind, ParseError> {
        self.expect_kw(Keyword::Case, "CASE")?;
        let selector = self.parse_expression()?;
        let mut arms = Vec::new();
        let mut else_body = None;
        loop {
            self.skip_to_statement()?;
            if self.is_eof() {
                return Err(ParseError::UnexpectedEof {
                    expected: "END SELECT".to_string(),
                });
            }
            if self.at_block_end(&[BlockEnd::EndSelect]).is_some() {
                self.advance(); // END
                self.advance(); // SELECT
                break;
            }
            self.expect_kw(Keyword::Case, "CASE")?;
            if self.eat_kw(Keyword::Else) {
                self.eat(&Token::Colon);
                let (body, _) =
                    self.parse_block(&[BlockEnd::Case, BlockEnd::EndSelect], "END SELECT")?;
                else_body = Some(body);
                continue;
            }
            let clauses = self.parse_case_clauses()?;
            self.eat(&Token::Colon);
            let (body, _) =
                self.parse_block(&[BlockEnd::Case, BlockEnd::EndSelect], "END SELECT")?;
            arms.push(CaseArm { clauses, body });
        }
        Ok(StatementKind::SelectCase {
            selector,
            arms,
            else_body,
        })
    }

    fn parse_case_clauses(&mut self) -> Result<Vec<CaseClause>, ParseError> {
        let mut clauses = vec![self.parse_case_clause()?];
        while self.eat(&Token::Comma) {
            clauses.push(self.parse_case_clause()?);
        }
        Ok(clauses)
    }

    fn parse_case_clause(&mut self) -> Result<CaseClause, ParseError> {
        if self.eat_kw(Keyword::Is) {
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
                return Err(self.unexpected("comparison operator"));
            };
            let value = self.parse_expression()?;
            return Ok(CaseClause::Is(op, value));
        }
        let value = self.parse_expression()?;
        if self.eat_kw(Keyword::To) {
            let hi = self.parse_expression()?;
            return Ok(CaseClause::Range(value, hi));
        }
        Ok(CaseClause::Value(value))
    }

    // ---- TRY -------------------------------------------------------------

    fn parse_try(&mut self) -> Result<StatementKind, ParseError> {
        let (body, end) = self.parse_block(
            &[BlockEnd::Catch, BlockEnd::Finally, BlockEnd::EndTry],
            "CATCH",
        )?;
        let mut catch_var = None;
        let mut catch_body = Vec::new();
        let mut finally_body = None;
        let mut end = end;
        if end == BlockEnd::Catch {
            self.advance(); // CATCH
            if let Some(Token::Ident(_)) = self.peek().map(|t| &t.token) {
                if self.peek().map(|t| t.kw.is_none()).unwrap_or(false) {
                    catch_var = Some(self.expect_ident("variable name")?);
                }
            }
            let (parsed, next_end) =
                self.parse_block(&[BlockEnd::Finally, BlockEnd::EndTry], "END TRY")?;
            catch_body = parsed;
            end = next_end;
        }
        if end == BlockEnd::Finally {
            self.advance(); // FINALLY
            let (parsed, _) = self.parse_block(&[BlockEnd::EndTry], "END TRY")?;
            finally_body = Some(parsed);
        }
        self.advance(); // END
        self.advance(); // TRY
        Ok(StatementKind::Try {
            body,
            catch_var,
            catch_body,
            finally_body,
        })
    }

    // ---- jumps -----------------------------------------------------------

    fn parse_jump_target(&mut self) -> Result<JumpTarget, ParseError> {
        match self.peek().map(|t| t.token.clone()) {
            Some(Token::Int(n)) => {
                self.advance();
                Ok(JumpTarget::Line(n as u32))
            }
            Some(Token::Ident(_)) => {
                let name = self.expect_ident("label")?;
                Ok(JumpTarget::Label(name))
            }
            _ => Err(self.unexpected("line number or label")),
        }
    }

    fn parse_on(&mut self) -> Result<StatementKind, ParseError> {
        if self.eat_kw(Keyword::Event) {
            let event = self.expect_ident("event name")?;
            if !self.eat_kw(Keyword::Gosub) {
                self.expect_kw(Keyword::Goto, "GOSUB or GOTO")?;
            }
            let target = self.parse_jump_target()?;
            return Ok(StatementKind::OnEvent { event, target });
        }
        let selector = self.parse_expression()?;
        let is_gosub = if self.eat_kw(Keyword::Gosub) {
            true
        } else {
            self.expect_kw(Keyword::Goto, "GOTO or GOSUB")?;
            false
        };
        let mut targets = vec![self.parse_jump_target()?];
        while self.eat(&Token::Comma) {
            targets.push(self.parse_jump_target()?);
        }
        Ok(if is_gosub {
            StatementKind::OnGosub { selector, targets }
        } else {
            StatementKind::OnGoto { selector, targets }
        })
    }

    fn parse_exit(&mut self) -> Result<StatementKind, ParseError> {
        let kind = if self.eat_kw(Keyword::For) {
            ExitKind::For
        } else if self.eat_kw(Keyword::While) {
            ExitKind::While
        } else if self.eat_kw(Keyword::Do) {
            ExitKind::Do
        } else if self.eat_kw(Keyword::Select) {
            ExitKind::Select
        } else if self.eat_kw(Keyword::Function) || self.eat_kw(Keyword::Sub) {
            return Ok(StatementKind::Return { value: None });
        } else {
            return Err(self.unexpected("FOR, WHILE, DO, SELECT, FUNCTION or SUB"));
        };
        Ok(StatementKind::Exit { kind })
    }

    // ---- procedures and types --------------------------------------------

    fn parse_def_fn(&mut self) -> Result<StatementKind, ParseError> {
        let name = self.expect_ident("function name")?;
        self.expect(&Token::LeftParen, "`(`")?;
        let params = self.parse_params()?;
        self.expect(&Token::Equal, "`=`")?;
        let body = self.parse_expression()?;
        Ok(StatementKind::DefFn { name, params, body })
    }

    fn parse_function(&mut self) -> Result<StatementKind, ParseError> {
        let name = self.expect_ident("function name")?;
        self.expect(&Token::LeftParen, "`(`")?;
        let params = self.parse_params()?;
        let return_type = if self.eat_kw(Keyword::As) {
            Some(self.expect_ident("type name")?)
        } else {
            None
        };
        let (body, _) = self.parse_block(&[BlockEnd::EndFunction], "END FUNCTION")?;
        self.advance(); // END
        self.advance(); // FUNCTION
        Ok(StatementKind::Function {
            name,
            params,
            return_type,
            body,
        })
    }

    fn parse_sub(&mut self) -> Result<StatementKind, ParseError> {
        let name = self.expect_ident("subroutine name")?;
        let params = if self.eat(&Token::LeftParen) {
            self.parse_params()?
        } else {
            Vec::new()
        };
        let (body, _) = self.parse_block(&[BlockEnd::EndSub], "END SUB")?;
        self.advance(); // END
        self.advance(); // SUB
        Ok(StatementKind::Sub { name, params, body })
    }

    fn parse_params(&mut self) -> Result<Vec<Param>, ParseError> {
        let mut params = Vec::new();
        if self.eat(&Token::RightParen) {
            return Ok(params);
        }
        loop {
            let byref = if self.eat_kw(Keyword::ByRef) {
                true
            } else {
                self.eat_kw(Keyword::ByVal);
                false
            };
            let name = self.expect_ident("parameter name")?;
            let type_name = if self.eat_kw(Keyword::As) {
                Some(self.expect_ident("type name")?)
            } else {
                None
            };
            params.push(Param {
                name,
                type_name,
                byref,
            });
            if self.eat(&Token::Comma) {
                continue;
            }
            self.expect(&Token::RightParen, "`)`")?;
            return Ok(params);
        }
    }

    fn parse_type_decl(&mut self) -> Result<StatementKind, ParseError> {
        let name = self.expect_ident("type name")?;
        let mut fields = Vec::new();
        loop {
            self.skip_to_statement()?;
            if self.is_eof() {
                return Err(ParseError::UnexpectedEof {
                    expected: "END TYPE".to_string(),
                });
            }
            if self.at_block_end(&[BlockEnd::EndType]).is_some() {
                self.advance(); // END
                self.advance(); // TYPE
                break;
            }
            let field_name = self.expect_ident("field name")?;
            self.expect_kw(Keyword::As, "AS")?;
            let type_name = self.expect_ident("type name")?;
            fields.push(FieldDecl {
                name: field_name,
                type_name,
            });
            self.end_statement()?;
        }
        Ok(StatementKind::TypeDecl { name, fields })
    }

    // ---- DATA ------------------------------------------------------------

    fn parse_data(&mut self) -> Result<StatementKind, ParseError> {
        let mut values = vec![self.parse_data_value()?];
        while self.eat(&Token::Comma) {
            values.push(self.parse_data_value()?);
        }
        Ok(StatementKind::Data { values })
    }

    fn parse_data_value(&mut self) -> Result<DataValue, ParseError> {
        let negative = self.eat(&Token::Minus);
        match self.peek().map(|t| t.token.clone()) {
            Some(Token::Int(n) | Token::HexInt(n) | Token::OctalInt(n)) => {
                self.advance();
                Ok(DataValue::Int(if negative { -n } else { n }))
            }
            Some(Token::Float(x)) => {
                self.advance();
                Ok(DataValue::Float(if negative { -x } else { x }))
            }
            Some(Token::Str(s)) if !negative => {
                self.advance();
                Ok(DataValue::Str(s))
            }
            _ => Err(self.unexpected("DATA literal")),
        }
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use crate::ast::JumpTarget;
    use crate::ast::LValue;
    use crate::ast::StatementKind;
    use crate::parser::parse_source;

    #[test]
    fn test_parse_assignment_and_print() {
        let program = parse_source("LET x = 1 + 2\nPRINT x; \"done\"\n").unwrap();
        assert_eq!(program.statements.len(), 2);
        assert!(matches!(
            &program.statements[0].kind,
            StatementKind::Let {
                target: LValue::Variable(name),
                ..
            } if name == "X"
        ));
        assert!(matches!(
            &program.statements[1].kind,
            StatementKind::Print { items } if items.len() == 2
        ));
    }

    #[test]
    fn test_parse_line_numbers() {
        let program = parse_source("100 PRINT 1: RETURN\n200 END\n").unwrap();
        assert_eq!(program.statements[0].loc.basic_line, Some(100));
        assert_eq!(program.statements[1].loc.basic_line, Some(100));
        assert_eq!(program.statements[2].loc.basic_line, Some(200));
    }

    #[test]
    fn test_parse_if_block_with_elseif() {
        let src = indoc! {"
            IF x > 10 THEN
                PRINT 1
            ELSEIF x > 5 THEN
                PRINT 2
            ELSE
                PRINT 3
            END IF
        "};
        let program = parse_source(src).unwrap();
        let StatementKind::If { else_branch, .. } = &program.statements[0].kind else {
            panic!("expected IF");
        };
        // ELSEIF desugars to a nested IF in the else arm
        assert_eq!(else_branch.len(), 1);
        assert!(matches!(&else_branch[0].kind, StatementKind::If { .. }));
    }

    #[test]
    fn test_parse_single_line_if_goto() {
        let program = parse_source("IF x = 0 THEN 100 ELSE 200\n").unwrap();
        assert!(matches!(
            &program.statements[0].kind,
            StatementKind::IfGoto {
                then_target: JumpTarget::Line(100),
                else_target: Some(JumpTarget::Line(200)),
                ..
            }
        ));
    }

    #[test]
    fn test_parse_for_next_matching() {
        let src = indoc! {"
            FOR i = 1 TO 10
                FOR j = 1 TO 5
                NEXT j
            NEXT i
        "};
        assert!(parse_source(src).is_ok());

        let bad = indoc! {"
            FOR i = 1 TO 10
            NEXT j
        "};
        assert!(parse_source(bad).is_err());
    }

    #[test]
    fn test_parse_select_case() {
        let src = indoc! {"
            SELECT CASE i
                CASE 2, 4, 6, 8 : PRINT \"Even\"
                CASE 1 TO 9 : PRINT \"Odd\"
                CASE IS > 100 : PRINT \"Big\"
                CASE ELSE
                    PRINT \"Other\"
            END SELECT
        "};
        let program = parse_source(src).unwrap();
        let StatementKind::SelectCase {
            arms, else_body, ..
        } = &program.statements[0].kind
        else {
            panic!("expected SELECT CASE");
        };
        assert_eq!(arms.len(), 3);
        assert_eq!(arms[0].clauses.len(), 4);
        assert!(else_body.is_some());
    }

    #[test]
    fn test_parse_do_loop_forms() {
        assert!(parse_source("DO WHILE x < 3\n x = x + 1\nLOOP\n").is_ok());
        assert!(parse_source("DO\n x = x + 1\nLOOP UNTIL x = 3\n").is_ok());
        assert!(parse_source("DO\n x = x + 1\nLOOP\n").is_ok());
        assert!(parse_source("DO WHILE x < 3\n x = x + 1\nLOOP UNTIL x = 5\n").is_err());
    }

    #[test]
    fn test_parse_function_definition() {
        let src = indoc! {"
            FUNCTION TestDiv&(d AS LONG, v AS LONG) AS LONG
                RETURN
            END FUNCTION
        "};
        let program = parse_source(src).unwrap();
        let StatementKind::Function {
            name,
            params,
            return_type,
            ..
        } = &program.statements[0].kind
        else {
            panic!("expected FUNCTION");
        };
        assert_eq!(name, "TESTDIV&");
        assert_eq!(params.len(), 2);
        assert_eq!(return_type.as_deref(), Some("LONG"));
    }

    #[test]
    fn test_parse_on_gosub() {
        let program = parse_source("ON I GOSUB 100, 200, 300\n").unwrap();
        let StatementKind::OnGosub { targets, .. } = &program.statements[0].kind else {
            panic!("expected ON GOSUB");
        };
        assert_eq!(targets.len(), 3);
    }

    #[test]
    fn test_parse_try_catch_finally() {
        let src = indoc! {"
            TRY
                THROW 42
            CATCH e
                PRINT e
            FINALLY
                PRINT \"cleanup\"
            END TRY
        "};
        let program = parse_source(src).unwrap();
        let StatementKind::Try {
            catch_var,
            finally_body,
            ..
        } = &program.statements[0].kind
        else {
            panic!("expected TRY");
        };
        assert_eq!(catch_var.as_deref(), Some("E"));
        assert!(finally_body.is_some());
    }

    #[test]
    fn test_parse_data_and_read() {
        let program = parse_source("DATA 1, -2.5, \"three\"\nREAD a, b$, c\n").unwrap();
        let StatementKind::Data { values } = &program.statements[0].kind else {
            panic!("expected DATA");
        };
        assert_eq!(values.len(), 3);
        let StatementKind::Read { targets } = &program.statements[1].kind else {
            panic!("expected READ");
        };
        assert_eq!(targets.len(), 3);
    }

    #[test]
    fn test_parse_label_and_goto_label() {
        let program = parse_source("Top:\nGOTO Top\n").unwrap();
        assert!(matches!(
            &program.statements[0].kind,
            StatementKind::Label(name) if name == "TOP"
        ));
        assert!(matches!(
            &program.statements[1].kind,
            StatementKind::Goto { target: JumpTarget::Label(name) } if name == "TOP"
        ));
    }
}
