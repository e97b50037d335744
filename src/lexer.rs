//! Tokenizer for the Reflex surface syntax.
//!
//! Token recognizers for numbers and identifiers are nom combinators over
//! the remaining input; the driver feeds them and maintains line/column
//! state for the positions every token carries. String literals are
//! scanned by hand so escape errors can be reported precisely.

use crate::position::Pos;
use crate::Error;
use nom::{
    branch::alt,
    bytes::complete::take_while,
    character::complete::{char, digit1, satisfy},
    combinator::{map, opt, recognize},
    sequence::pair,
    IResult, Parser as NomParser,
};
use std::fmt;
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    LParen,
    RParen,
    Dot,
    Eq,
    Comma,
    Plus,
    Minus,
    Slash,
    Star,
    Colon,
    Question,
    Lt,
    Gt,
    Percent,
    /// `^`
    Parent,
    /// `@`
    SelfRef,
    /// `!`
    Unwrap,
    /// `<-`
    Arrow,
    /// `:=`
    Assign,
    EqEq,
    Le,
    Ge,
    Ne,
    OrOr,
    AndAnd,
    /// `^^`
    Ancestor,
    Int,
    Float,
    Str,
    Ident,
    Eof,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            TokenKind::LBrace => "{",
            TokenKind::RBrace => "}",
            TokenKind::LBracket => "[",
            TokenKind::RBracket => "]",
            TokenKind::LParen => "(",
            TokenKind::RParen => ")",
            TokenKind::Dot => ".",
            TokenKind::Eq => "=",
            TokenKind::Comma => ",",
            TokenKind::Plus => "+",
            TokenKind::Minus => "-",
            TokenKind::Slash => "/",
            TokenKind::Star => "*",
            TokenKind::Colon => ":",
            TokenKind::Question => "?",
            TokenKind::Lt => "<",
            TokenKind::Gt => ">",
            TokenKind::Percent => "%",
            TokenKind::Parent => "PARENT",
            TokenKind::SelfRef => "SELF",
            TokenKind::Unwrap => "UNWRAP",
            TokenKind::Arrow => "<-",
            TokenKind::Assign => ":=",
            TokenKind::EqEq => "==",
            TokenKind::Le => "<=",
            TokenKind::Ge => ">=",
            TokenKind::Ne => "!=",
            TokenKind::OrOr => "||",
            TokenKind::AndAnd => "&&",
            TokenKind::Ancestor => "ANCESTOR",
            TokenKind::Int => "INT",
            TokenKind::Float => "FLOAT",
            TokenKind::Str => "STRING",
            TokenKind::Ident => "IDENT",
            TokenKind::Eof => "EOF",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    pub pos: Pos,
}

const DOUBLES: [(&str, TokenKind); 9] = [
    ("<-", TokenKind::Arrow),
    (":=", TokenKind::Assign),
    ("==", TokenKind::EqEq),
    ("<=", TokenKind::Le),
    (">=", TokenKind::Ge),
    ("!=", TokenKind::Ne),
    ("||", TokenKind::OrOr),
    ("&&", TokenKind::AndAnd),
    ("^^", TokenKind::Ancestor),
];

/// Token kinds after which a `-` must be the binary operator.
fn ends_operand(kind: Option<TokenKind>) -> bool {
    matches!(
        kind,
        Some(
            TokenKind::Int
                | TokenKind::Float
                | TokenKind::Str
                | TokenKind::Ident
                | TokenKind::RParen
                | TokenKind::RBracket
                | TokenKind::RBrace
                | TokenKind::Unwrap
                | TokenKind::SelfRef
                | TokenKind::Parent
        )
    )
}

fn single(c: char) -> Option<TokenKind> {
    Some(match c {
        '{' => TokenKind::LBrace,
        '}' => TokenKind::RBrace,
        '[' => TokenKind::LBracket,
        ']' => TokenKind::RBracket,
        '(' => TokenKind::LParen,
        ')' => TokenKind::RParen,
        '.' => TokenKind::Dot,
        '=' => TokenKind::Eq,
        ',' => TokenKind::Comma,
        '+' => TokenKind::Plus,
        '-' => TokenKind::Minus,
        '/' => TokenKind::Slash,
        '*' => TokenKind::Star,
        ':' => TokenKind::Colon,
        '?' => TokenKind::Question,
        '<' => TokenKind::Lt,
        '>' => TokenKind::Gt,
        '%' => TokenKind::Percent,
        '^' => TokenKind::Parent,
        '@' => TokenKind::SelfRef,
        '!' => TokenKind::Unwrap,
        _ => return None,
    })
}

/// A float is `-?digits.digits`; a bare `-?digits` is an int. The order
/// matters so `3.str` stays an int followed by an access.
fn lex_number(input: &str) -> IResult<&str, (TokenKind, &str)> {
    alt((
        map(
            recognize((opt(char('-')), digit1, char('.'), digit1)),
            |s| (TokenKind::Float, s),
        ),
        map(recognize(pair(opt(char('-')), digit1)), |s| {
            (TokenKind::Int, s)
        }),
    ))
    .parse(input)
}

fn lex_ident(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        satisfy(|c: char| c.is_alphabetic() || c == '_'),
        take_while(|c: char| c.is_alphanumeric() || c == '_'),
    ))
    .parse(input)
}

fn lex_comment(input: &str) -> IResult<&str, &str> {
    recognize(pair(char('#'), take_while(|c| c != '\n'))).parse(input)
}

struct Tokenizer<'a> {
    rest: &'a str,
    file: Rc<str>,
    line: u32,
    col: u32,
}

impl<'a> Tokenizer<'a> {
    fn new(file: &str, src: &'a str) -> Self {
        Tokenizer {
            rest: src,
            file: file.into(),
            line: 1,
            col: 1,
        }
    }

    fn pos(&self) -> Pos {
        Pos {
            file: self.file.clone(),
            line: self.line,
            col: self.col,
        }
    }

    /// Consume `text` (a prefix of `rest`), updating line/column state.
    fn advance(&mut self, text: &str) {
        for c in text.chars() {
            if c == '\n' {
                self.line += 1;
                self.col = 1;
            } else {
                self.col += 1;
            }
        }
        self.rest = &self.rest[text.len()..];
    }

    fn tokens(mut self) -> Result<Vec<Token>, Error> {
        let mut out = Vec::new();
        while let Some(c) = self.rest.chars().next() {
            if " \t\r\n".contains(c) {
                let ws: String = c.to_string();
                self.advance(&ws);
                continue;
            }
            if c == '#' {
                if let Ok((_, comment)) = lex_comment(self.rest) {
                    let comment = comment.to_string();
                    self.advance(&comment);
                }
                continue;
            }
            if let Some(tok) = self.double_token() {
                out.push(tok);
                continue;
            }
            // A minus followed by a digit starts a literal only where an
            // operand cannot end, so `i-1` stays a subtraction while
            // `x = -3` and `(-3)` stay literals.
            let minus_literal =
                c == '-' && self.next_is_digit() && !ends_operand(out.last().map(|t| t.kind));
            if c.is_ascii_digit() || minus_literal {
                out.push(self.number_token()?);
                continue;
            }
            if let Some(kind) = single(c) {
                let pos = self.pos();
                let text = c.to_string();
                self.advance(&text);
                out.push(Token { kind, text, pos });
                continue;
            }
            if c == '"' || c == '\'' {
                out.push(self.string_token()?);
                continue;
            }
            if c.is_alphabetic() || c == '_' {
                out.push(self.ident_token()?);
                continue;
            }
            return Err(Error::lex(format!("unexpected character {c:?}"), self.pos()));
        }
        out.push(Token {
            kind: TokenKind::Eof,
            text: String::new(),
            pos: self.pos(),
        });
        Ok(out)
    }

    fn next_is_digit(&self) -> bool {
        self.rest
            .chars()
            .nth(1)
            .is_some_and(|c| c.is_ascii_digit())
    }

    fn double_token(&mut self) -> Option<Token> {
        for (text, kind) in DOUBLES {
            if self.rest.starts_with(text) {
                let pos = self.pos();
                self.advance(text);
                return Some(Token {
                    kind,
                    text: text.to_string(),
                    pos,
                });
            }
        }
        None
    }

    fn number_token(&mut self) -> Result<Token, Error> {
        let pos = self.pos();
        match lex_number(self.rest) {
            Ok((_, (kind, text))) => {
                let text = text.to_string();
                self.advance(&text);
                Ok(Token { kind, text, pos })
            }
            Err(_) => Err(Error::lex("malformed number literal", pos)),
        }
    }

    fn ident_token(&mut self) -> Result<Token, Error> {
        let pos = self.pos();
        match lex_ident(self.rest) {
            Ok((_, text)) => {
                let text = text.to_string();
                self.advance(&text);
                Ok(Token {
                    kind: TokenKind::Ident,
                    text,
                    pos,
                })
            }
            Err(_) => Err(Error::lex("malformed identifier", pos)),
        }
    }

    /// Either quote style; escapes `\n \t \r \\ \" \'`, anything else
    /// keeps the backslash verbatim. A bare newline ends the literal with
    /// an error.
    fn string_token(&mut self) -> Result<Token, Error> {
        let start = self.pos();
        let mut chars = self.rest.char_indices();
        let quote = match chars.next() {
            Some((_, q)) => q,
            None => return Err(Error::lex("unterminated string", start)),
        };
        let mut buf = String::new();
        loop {
            match chars.next() {
                None => return Err(Error::lex("unterminated string", start)),
                Some((_, '\\')) => match chars.next() {
                    None => return Err(Error::lex("unterminated string", start)),
                    Some((_, 'n')) => buf.push('\n'),
                    Some((_, 't')) => buf.push('\t'),
                    Some((_, 'r')) => buf.push('\r'),
                    Some((_, '\\')) => buf.push('\\'),
                    Some((_, '"')) => buf.push('"'),
                    Some((_, '\'')) => buf.push('\''),
                    Some((_, other)) => {
                        buf.push('\\');
                        buf.push(other);
                    }
                },
                Some((i, c)) if c == quote => {
                    let consumed = self.rest[..i + c.len_utf8()].to_string();
                    self.advance(&consumed);
                    return Ok(Token {
                        kind: TokenKind::Str,
                        text: buf,
                        pos: start,
                    });
                }
                Some((_, '\n')) => return Err(Error::lex("unterminated string", start)),
                Some((_, c)) => buf.push(c),
            }
        }
    }
}

/// Tokenize a whole source file. The returned stream always ends with a
/// single EOF token.
pub fn tokenize(file: &str, src: &str) -> Result<Vec<Token>, Error> {
    Tokenizer::new(file, src).tokens()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        tokenize("test", src)
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    fn texts(src: &str) -> Vec<String> {
        tokenize("test", src)
            .unwrap()
            .into_iter()
            .map(|t| t.text)
            .collect()
    }

    #[test]
    fn test_token_kinds_table() {
        use TokenKind::*;
        let cases: Vec<(&str, Vec<TokenKind>)> = vec![
            ("x = 3", vec![Ident, Eq, Int, Eof]),
            ("x = -3", vec![Ident, Eq, Int, Eof]),
            ("x = 3.5", vec![Ident, Eq, Float, Eof]),
            ("x = -3.0 + 5.0", vec![Ident, Eq, Float, Plus, Float, Eof]),
            // A dot followed by a non-digit is an access, not a float.
            ("3.str", vec![Int, Dot, Ident, Eof]),
            ("a.b!", vec![Ident, Dot, Ident, Unwrap, Eof]),
            ("a != b", vec![Ident, Ne, Ident, Eof]),
            ("^^.name", vec![Ancestor, Dot, Ident, Eof]),
            ("^.^.x", vec![Parent, Dot, Parent, Dot, Ident, Eof]),
            ("@(f:=f+1)!", vec![
                SelfRef, LParen, Ident, Assign, Ident, Plus, Int, RParen, Unwrap, Eof,
            ]),
            ("y[b<-a]", vec![Ident, LBracket, Ident, Arrow, Ident, RBracket, Eof]),
            ("a && b || c", vec![Ident, AndAnd, Ident, OrOr, Ident, Eof]),
            ("a <= b >= c == d", vec![Ident, Le, Ident, Ge, Ident, EqEq, Ident, Eof]),
            ("x ? 1 : 2", vec![Ident, Question, Int, Colon, Int, Eof]),
            ("a = 1, b = 2", vec![Ident, Eq, Int, Comma, Ident, Eq, Int, Eof]),
            ("x % 2", vec![Ident, Percent, Int, Eof]),
            // Minus is the operator after an operand, a literal sign
            // elsewhere.
            ("i-1", vec![Ident, Minus, Int, Eof]),
            ("3-1", vec![Int, Minus, Int, Eof]),
            ("x = (-3)", vec![Ident, Eq, LParen, Int, RParen, Eof]),
            ("a = 1-2", vec![Ident, Eq, Int, Minus, Int, Eof]),
            ("# a comment\nx = 1", vec![Ident, Eq, Int, Eof]),
        ];
        for (src, expected) in cases {
            assert_eq!(kinds(src), expected, "source: {src}");
        }
    }

    #[test]
    fn test_string_literals_and_escapes() {
        assert_eq!(texts("\"hi\"")[0], "hi");
        assert_eq!(texts("'hi'")[0], "hi");
        assert_eq!(texts("\"a\\nb\"")[0], "a\nb");
        assert_eq!(texts("\"a\\tb\"")[0], "a\tb");
        assert_eq!(texts("\"q\\\"q\"")[0], "q\"q");
        assert_eq!(texts("\"b\\\\b\"")[0], "b\\b");
        assert_eq!(texts("'it\\'s'")[0], "it's");
        // Unknown escapes keep the backslash.
        assert_eq!(texts("\"a\\zb\"")[0], "a\\zb");
    }

    #[test]
    fn test_positions() {
        let toks = tokenize("f", "x = 1\n  y = 2").unwrap();
        assert_eq!((toks[0].pos.line, toks[0].pos.col), (1, 1));
        assert_eq!((toks[2].pos.line, toks[2].pos.col), (1, 5));
        assert_eq!((toks[3].pos.line, toks[3].pos.col), (2, 3)); // y
        assert_eq!(toks[3].text, "y");
    }

    #[test]
    fn test_lex_errors() {
        let err = tokenize("f", "x = \"oops").unwrap_err();
        assert!(err.to_string().contains("unterminated string"));
        let err = tokenize("f", "x = \"oops\nmore\"").unwrap_err();
        assert!(err.to_string().contains("unterminated string"));
        let err = tokenize("f", "x = $").unwrap_err();
        assert!(err.to_string().contains("unexpected character"));
    }
}
