use thiserror::Error;

use crate::diagnostics::SourceLoc;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ParseError {
    #[error("{loc}: unrecognized character")]
    Lex { loc: SourceLoc },
    #[error("{loc}: unexpected {found}, expected {expected}")]
    Unexpected {
        loc: SourceLoc,
        found: String,
        expected: String,
    },
    #[error("unexpected end of input, expected {expected}")]
    UnexpectedEof { expected: String },
    #[error("{loc}: {message}")]
    Message { loc: SourceLoc, message: String },
}
