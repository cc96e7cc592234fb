pub mod errors;
pub mod expressions;
pub mod lexer;
pub mod statements;

use core::str::FromStr;

use logos::Logos;

use crate::ast::Program;
use crate::diagnostics::SourceLoc;
use crate::parser::errors::ParseError;
use crate::parser::lexer::Keyword;
use crate::parser::lexer::Token;

/// Token with its physical source line and, for identifier tokens, the
/// keyword it names (classified once here so the parser never re-parses
/// strings).
#[derive(Debug, Clone)]
pub struct SpannedToken {
    pub token: Token,
    pub kw: Option<Keyword>,
    pub line: u32,
}

/// Parses a whole source file into a program.
pub fn parse_source(source: &str) -> Result<Program, ParseError> {
    let tokens = collect_tokens(source)?;
    Parser::new(tokens).parse_program()
}

/// Runs the lexer over the source, attaching line numbers, classifying
/// keywords, and dropping `REM` comments (the REM word and everything up
/// to the end of its line).
fn collect_tokens(source: &str) -> Result<Vec<SpannedToken>, ParseError> {
    let mut out = Vec::new();
    let mut line: u32 = 1;
    let mut skipping_rem = false;
    for item in Token::lexer(source) {
        let token = item.map_err(|_| ParseError::Lex {
            loc: SourceLoc::new(line),
        })?;
        if token == Token::Newline {
            skipping_rem = false;
            out.push(SpannedToken {
                token,
                kw: None,
                line,
            });
            line += 1;
            continue;
        }
        if skipping_rem {
            continue;
        }
        let kw = match &token {
            Token::Ident(name) => Keyword::from_str(name).ok(),
            _ => None,
        };
        if matches!(&token, Token::Ident(name) if name == "REM") {
            skipping_rem = true;
            continue;
        }
        out.push(SpannedToken { token, kw, line });
    }
    Ok(out)
}

/// Recursive-descent parser over the collected token stream. The grammar
/// is line-oriented: a physical line may start with a BASIC line number,
/// holds `:`-separated statements, and block constructs span lines until
/// their closing keyword.
pub struct Parser {
    tokens: Vec<SpannedToken>,
    pos: usize,
    /// BASIC line number of the line currently being parsed, if any
    basic_line: Option<u32>,
    /// true between a newline and the first token of the next line
    at_line_start: bool,
}

/// Closing markers a statement list can stop at. The caller that opened
/// the block decides which of these are legal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockEnd {
    EndIf,
    ElseIf,
    Else,
    Next,
    Wend,
    Until,
    Loop,
    Case,
    EndSelect,
    Catch,
    Finally,
    EndTry,
    EndFunction,
    EndSub,
    EndType,
}

impl Parser {
    pub fn new(tokens: Vec<SpannedToken>) -> Self {
        Parser {
            tokens,
            pos: 0,
            basic_line: None,
            at_line_start: true,
        }
    }

    pub fn parse_program(mut self) -> Result<Program, ParseError> {
        let statements = self.parse_statement_list(&[])?.0;
        Ok(Program::new(statements))
    }

    // ---- token cursor ----------------------------------------------------

    pub(crate) fn peek(&self) -> Option<&SpannedToken> {
        self.tokens.get(self.pos)
    }

    pub(crate) fn peek_at(&self, offset: usize) -> Option<&SpannedToken> {
        self.tokens.get(self.pos + offset)
    }

    pub(crate) fn advance(&mut self) -> Option<SpannedToken> {
        let tok = self.tokens.get(self.pos).cloned();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    pub(crate) fn loc(&self) -> SourceLoc {
        let line = self
            .peek()
            .map(|t| t.line)
            .unwrap_or_else(|| self.tokens.last().map(|t| t.line).unwrap_or(1));
        SourceLoc {
            line,
            basic_line: self.basic_line,
        }
    }

    pub(crate) fn is_eof(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    pub(crate) fn check(&self, token: &Token) -> bool {
        self.peek().map(|t| &t.token == token).unwrap_or(false)
    }

    pub(crate) fn check_kw(&self, kw: Keyword) -> bool {
        self.peek().map(|t| t.kw == Some(kw)).unwrap_or(false)
    }

    pub(crate) fn check_kw_at(&self, offset: usize, kw: Keyword) -> bool {
        self.peek_at(offset)
            .map(|t| t.kw == Some(kw))
            .unwrap_or(false)
    }

    pub(crate) fn eat(&mut self, token: &Token) -> bool {
        if self.check(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    pub(crate) fn eat_kw(&mut self, kw: Keyword) -> bool {
        if self.check_kw(kw) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    pub(crate) fn expect(&mut self, token: &Token, expected: &str) -> Result<(), ParseError> {
        if self.eat(token) {
            Ok(())
        } else {
            Err(self.unexpected(expected))
        }
    }

    pub(crate) fn expect_kw(&mut self, kw: Keyword, expected: &str) -> Result<(), ParseError> {
        if self.eat_kw(kw) {
            Ok(())
        } else {
            Err(self.unexpected(expected))
        }
    }

    /// Consumes and returns an identifier token's name.
    pub(crate) fn expect_ident(&mut self, expected: &str) -> Result<String, ParseError> {
        match self.peek() {
            Some(SpannedToken {
                token: Token::Ident(name),
                kw: None,
                ..
            }) => {
                let name = name.clone();
                self.pos += 1;
                Ok(name)
            }
            _ => Err(self.unexpected(expected)),
        }
    }

    pub(crate) fn unexpected(&self, expected: &str) -> ParseError {
        match self.peek() {
            Some(t) => ParseError::Unexpected {
                loc: SourceLoc {
                    line: t.line,
                    basic_line: self.basic_line,
                },
                found: describe_token(&t.token),
                expected: expected.to_string(),
            },
            None => ParseError::UnexpectedEof {
                expected: expected.to_string(),
            },
        }
    }

    // ---- line structure --------------------------------------------------

    /// Consumes newlines and, at the start of each fresh line, a leading
    /// integer line-number label. Returns when positioned at a real token
    /// or at end of input.
    pub(crate) fn skip_to_statement(&mut self) -> Result<(), ParseError> {
        loop {
            match self.peek().map(|t| t.token.clone()) {
                Some(Token::Newline) => {
                    self.pos += 1;
                    self.at_line_start = true;
                    self.basic_line = None;
                }
                Some(Token::Int(n)) if self.at_line_start => {
                    if n < 0 || n > u32::MAX as i64 {
                        return Err(ParseError::Message {
                            loc: self.loc(),
                            message: format!("line number {n} out of range"),
                        });
                    }
                    self.pos += 1;
                    self.at_line_start = false;
                    self.basic_line = Some(n as u32);
                }
                _ => {
                    self.at_line_start = false;
                    return Ok(());
                }
            }
        }
    }

    /// After a statement: a colon continues the line, a newline (or end of
    /// input, or a block-closing keyword peeked by the caller) ends it.
    pub(crate) fn end_statement(&mut self) -> Result<(), ParseError> {
        if self.eat(&Token::Colon) {
            return Ok(());
        }
        if self.is_eof() || self.check(&Token::Newline) {
            return Ok(());
        }
        Err(self.unexpected("end of statement"))
    }

    /// Peeks whether the cursor sits on one of the given block closers.
    pub(crate) fn at_block_end(&self, ends: &[BlockEnd]) -> Option<BlockEnd> {
        for end in ends {
            let hit = match end {
                BlockEnd::EndIf => self.check_kw(Keyword::End) && self.check_kw_at(1, Keyword::If),
                BlockEnd::ElseIf => self.check_kw(Keyword::ElseIf),
                BlockEnd::Else => self.check_kw(Keyword::Else),
                BlockEnd::Next => self.check_kw(Keyword::Next),
                BlockEnd::Wend => self.check_kw(Keyword::Wend),
                BlockEnd::Until => self.check_kw(Keyword::Until),
                BlockEnd::Loop => self.check_kw(Keyword::Loop),
                BlockEnd::Case => self.check_kw(Keyword::Case),
                BlockEnd::EndSelect => {
                    self.check_kw(Keyword::End) && self.check_kw_at(1, Keyword::Select)
                }
                BlockEnd::Catch => self.check_kw(Keyword::Catch),
                BlockEnd::Finally => self.check_kw(Keyword::Finally),
                BlockEnd::EndTry => {
                    self.check_kw(Keyword::End) && self.check_kw_at(1, Keyword::Try)
                }
                BlockEnd::EndFunction => {
                    self.check_kw(Keyword::End) && self.check_kw_at(1, Keyword::Function)
                }
                BlockEnd::EndSub => {
                    self.check_kw(Keyword::End) && self.check_kw_at(1, Keyword::Sub)
                }
                BlockEnd::EndType => {
                    self.check_kw(Keyword::End) && self.check_kw_at(1, Keyword::Type)
                }
            };
            if hit {
                return Some(*end);
            }
        }
        None
    }
}

pub(crate) fn describe_token(token: &Token) -> String {
    match token {
        Token::Newline => "end of line".to_string(),
        Token::Ident(name) => format!("`{name}`"),
        Token::Int(n) => format!("`{n}`"),
        Token::HexInt(n) => format!("`&H{n:X}`"),
        Token::OctalInt(n) => format!("`&O{n:o}`"),
        Token::Float(x) => format!("`{x}`"),
        Token::Str(s) => format!("\"{s}\""),
        Token::LeftParen => "`(`".to_string(),
        Token::RightParen => "`)`".to_string(),
        Token::Comma => "`,`".to_string(),
        Token::Semicolon => "`;`".to_string(),
        Token::Colon => "`:`".to_string(),
        Token::Dot => "`.`".to_string(),
        Token::Equal => "`=`".to_string(),
        Token::NotEqual => "`<>`".to_string(),
        Token::Less => "`<`".to_string(),
        Token::LessEqual => "`<=`".to_string(),
        Token::Greater => "`>`".to_string(),
        Token::GreaterEqual => "`>=`".to_string(),
        Token::Plus => "`+`".to_string(),
        Token::Minus => "`-`".to_string(),
        Token::Star => "`*`".to_string(),
        Token::Slash => "`/`".to_string(),
        Token::Backslash => "`\\`".to_string(),
    }
}
