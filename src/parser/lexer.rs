use logos::Lexer;
use logos::Logos;
use strum::EnumString;

fn lex_int(lex: &mut Lexer<Token>) -> Option<i64> {
    lex.slice().parse().ok()
}

fn lex_hex(lex: &mut Lexer<Token>) -> Option<i64> {
    i64::from_str_radix(&lex.slice()[2..], 16).ok()
}

fn lex_octal(lex: &mut Lexer<Token>) -> Option<i64> {
    i64::from_str_radix(&lex.slice()[2..], 8).ok()
}

fn lex_float(lex: &mut Lexer<Token>) -> Option<f64> {
    lex.slice().parse().ok()
}

/// Strips the surrounding quotes and collapses doubled quotes.
fn lex_string(lex: &mut Lexer<Token>) -> String {
    let slice = lex.slice();
    slice[1..slice.len() - 1].replace("\"\"", "\"")
}

/// Identifiers are case-insensitive; names are normalized to upper case so
/// `count`, `Count` and `COUNT` are the same variable. A trailing type
/// sigil stays part of the name (`N%` and `N$` are distinct).
fn lex_ident(lex: &mut Lexer<Token>) -> String {
    lex.slice().to_ascii_uppercase()
}

/// Token set for the BASIC dialect. The grammar is line-oriented, so
/// newlines are real tokens; `'` comments are skipped here, `REM` is
/// recognized as an identifier and dropped with the rest of its line when
/// the token stream is collected (a skip regex would also swallow names
/// that merely start with REM).
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\f]+")]
#[logos(skip r"'[^\n]*")]
#[rustfmt::skip]
pub enum Token {
    #[token("\n")] Newline,

    #[token("(")] LeftParen,
    #[token(")")] RightParen,
    #[token(",")] Comma,
    #[token(";")] Semicolon,
    #[token(":")] Colon,
    #[token(".")] Dot,

    #[token("=")] Equal,
    #[token("<>")] NotEqual,
    #[token("<")] Less,
    #[token("<=")] LessEqual,
    #[token(">")] Greater,
    #[token(">=")] GreaterEqual,

    #[token("+")] Plus,
    #[token("-")] Minus,
    #[token("*")] Star,
    #[token("/")] Slash,
    #[token("\\")] Backslash,

    #[regex(r"[0-9]+", lex_int)]
    Int(i64),
    #[regex(r"&[Hh][0-9A-Fa-f]+", lex_hex)]
    HexInt(i64),
    #[regex(r"&[Oo][0-7]+", lex_octal)]
    OctalInt(i64),
    #[regex(r"([0-9]+\.[0-9]*|\.[0-9]+)([eE][+-]?[0-9]+)?|[0-9]+[eE][+-]?[0-9]+", lex_float)]
    Float(f64),
    #[regex(r#""([^"\n]|"")*""#, lex_string)]
    Str(String),

    #[regex(r"[A-Za-z_][A-Za-z0-9_]*[%&!#$@^]?", lex_ident)]
    Ident(String),
}

/// Reserved words. Identifier tokens are classified against this set when
/// the token stream is collected; a name with a type sigil is never a
/// keyword.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString)]
#[strum(ascii_case_insensitive)]
pub enum Keyword {
    Let,
    Dim,
    Redim,
    Preserve,
    Global,
    Shared,
    Print,
    Input,
    If,
    Then,
    Else,
    ElseIf,
    End,
    For,
    To,
    Step,
    Next,
    In,
    While,
    Wend,
    Repeat,
    Until,
    Do,
    Loop,
    Select,
    Case,
    Is,
    Try,
    Catch,
    Finally,
    Throw,
    Goto,
    Gosub,
    Return,
    On,
    Event,
    Exit,
    Continue,
    Def,
    Function,
    Sub,
    Type,
    As,
    ByRef,
    ByVal,
    Data,
    Read,
    Restore,
    Call,
    Mod,
    And,
    Or,
    Xor,
    Not,
    Shl,
    Shr,
    Iif,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(src: &str) -> Vec<Token> {
        Token::lexer(src).map(|t| t.expect("lex error")).collect()
    }

    #[test]
    fn test_lex_numbers() {
        assert_eq!(
            tokens("42 &HFF &O17 3.25 1e3 .5"),
            vec![
                Token::Int(42),
                Token::HexInt(255),
                Token::OctalInt(15),
                Token::Float(3.25),
                Token::Float(1000.0),
                Token::Float(0.5),
            ]
        );
    }

    #[test]
    fn test_lex_idents_preserve_sigils() {
        assert_eq!(
            tokens("count N% s$ x# flag@"),
            vec![
                Token::Ident("COUNT".into()),
                Token::Ident("N%".into()),
                Token::Ident("S$".into()),
                Token::Ident("X#".into()),
                Token::Ident("FLAG@".into()),
            ]
        );
    }

    #[test]
    fn test_lex_strings_with_doubled_quotes() {
        assert_eq!(
            tokens(r#""hello" "say ""hi""""#),
            vec![Token::Str("hello".into()), Token::Str("say \"hi\"".into())]
        );
    }

    #[test]
    fn test_lex_comments() {
        assert_eq!(
            tokens("PRINT 1 ' trailing\nPRINT 2"),
            vec![
                Token::Ident("PRINT".into()),
                Token::Int(1),
                Token::Newline,
                Token::Ident("PRINT".into()),
                Token::Int(2),
            ]
        );
    }

    #[test]
    fn test_lex_operators() {
        assert_eq!(
            tokens("a <= b <> c \\ 2"),
            vec![
                Token::Ident("A".into()),
                Token::LessEqual,
                Token::Ident("B".into()),
                Token::NotEqual,
                Token::Ident("C".into()),
                Token::Backslash,
                Token::Int(2),
            ]
        );
    }

    #[test]
    fn test_keyword_classification() {
        use core::str::FromStr;
        assert_eq!(Keyword::from_str("print").unwrap(), Keyword::Print);
        assert_eq!(Keyword::from_str("ELSEIF").unwrap(), Keyword::ElseIf);
        assert_eq!(Keyword::from_str("byref").unwrap(), Keyword::ByRef);
        assert!(Keyword::from_str("COUNT").is_err());
    }
}
