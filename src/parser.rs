//! Recursive-descent parser: token stream → AST.
//!
//! Definition lists are shared between modules, blocks, overrides, and
//! calls; only the bracket form admits aliases (`<-`) and only the paren
//! form admits eager bindings (`:=`). Commas between definitions are
//! optional delimiters. Binary operators parse by precedence climbing and
//! the ternary is right-associative at top level.

use crate::ast::Ast;
use crate::lexer::{Token, TokenKind};
use crate::Error;

/// Precedence and operator-method name for each binary operator token.
fn binary_op(kind: TokenKind) -> Option<(u8, &'static str)> {
    Some(match kind {
        TokenKind::OrOr => (3, "logical_or"),
        TokenKind::AndAnd => (4, "logical_and"),
        TokenKind::EqEq => (5, "eq"),
        TokenKind::Ne => (5, "ne"),
        TokenKind::Lt => (7, "lt"),
        TokenKind::Gt => (7, "gt"),
        TokenKind::Le => (7, "le"),
        TokenKind::Ge => (7, "ge"),
        TokenKind::Plus => (10, "add"),
        TokenKind::Minus => (10, "sub"),
        TokenKind::Star => (20, "mul"),
        TokenKind::Slash => (20, "div"),
        TokenKind::Percent => (20, "mod"),
        _ => return None,
    })
}

/// The three definition forms a definition list can hold.
#[derive(Default)]
struct Defs {
    defs: Vec<(String, Ast)>,
    aliases: Vec<(String, String)>,
    eager: Vec<(String, Ast)>,
}

impl Defs {
    fn contains(&self, name: &str) -> bool {
        self.defs.iter().any(|(n, _)| n == name)
            || self.aliases.iter().any(|(n, _)| n == name)
            || self.eager.iter().any(|(n, _)| n == name)
    }
}

pub struct Parser {
    toks: Vec<Token>,
    k: usize,
}

/// Parse a full token stream into the module's AST.
pub fn parse(toks: Vec<Token>) -> Result<Ast, Error> {
    Parser::new(toks).parse_module()
}

impl Parser {
    pub fn new(toks: Vec<Token>) -> Self {
        debug_assert!(matches!(
            toks.last().map(|t| t.kind),
            Some(TokenKind::Eof)
        ));
        Parser { toks, k: 0 }
    }

    fn peek(&self) -> &Token {
        self.toks.get(self.k).unwrap_or_else(|| {
            // The stream always ends with EOF; running past it means a
            // parser bug, not bad input.
            panic!("parser ran past end of token stream")
        })
    }

    fn advance(&mut self) -> Token {
        let tok = self.peek().clone();
        if tok.kind != TokenKind::Eof {
            self.k += 1;
        }
        tok
    }

    fn matches(&mut self, kind: TokenKind) -> Option<Token> {
        if self.peek().kind == kind {
            Some(self.advance())
        } else {
            None
        }
    }

    fn expect(&mut self, kinds: &[TokenKind]) -> Result<Token, Error> {
        if kinds.contains(&self.peek().kind) {
            return Ok(self.advance());
        }
        let names: Vec<String> = kinds.iter().map(|k| format!("{k}")).collect();
        Err(Error::parse(
            format!(
                "expected {} but got {}",
                names.join(" or "),
                self.peek().kind
            ),
            self.peek().pos.clone(),
        ))
    }

    fn consume_delims(&mut self) {
        while self.matches(TokenKind::Comma).is_some() {}
    }

    pub fn parse_module(&mut self) -> Result<Ast, Error> {
        let pos = self.peek().pos.clone();
        let defs = self.parse_defs_until(TokenKind::Eof, false, false)?;
        self.expect(&[TokenKind::Eof])?;
        Ok(Ast::Block {
            pos,
            defs: defs.defs,
        })
    }

    fn parse_defs_until(
        &mut self,
        stop: TokenKind,
        allow_aliases: bool,
        allow_eager: bool,
    ) -> Result<Defs, Error> {
        let mut out = Defs::default();
        self.consume_delims();
        while self.peek().kind != stop {
            let name_tok = self.expect(&[TokenKind::Ident])?;
            let name = name_tok.text;
            if out.contains(&name) {
                return Err(Error::parse(
                    format!("redefinition of {name:?}"),
                    name_tok.pos,
                ));
            }
            let bind = self.peek().clone();
            match bind.kind {
                TokenKind::Eq => {
                    self.advance();
                    out.defs.push((name, self.parse_expr()?));
                }
                TokenKind::Arrow if allow_aliases => {
                    self.advance();
                    let src = self.expect(&[TokenKind::Ident])?;
                    out.aliases.push((name, src.text));
                }
                TokenKind::Assign if allow_eager => {
                    self.advance();
                    out.eager.push((name, self.parse_expr()?));
                }
                other => {
                    return Err(Error::parse(
                        format!("unexpected token {other} inside definition"),
                        bind.pos,
                    ));
                }
            }
            self.consume_delims();
        }
        Ok(out)
    }

    fn parse_expr(&mut self) -> Result<Ast, Error> {
        let node = self.parse_binary(0)?;
        if let Some(q) = self.matches(TokenKind::Question) {
            let if_true = self.parse_expr()?;
            self.expect(&[TokenKind::Colon])?;
            let if_false = self.parse_expr()?;
            return Ok(Ast::Ternary {
                pos: q.pos,
                cond: Box::new(node),
                if_true: Box::new(if_true),
                if_false: Box::new(if_false),
            });
        }
        Ok(node)
    }

    fn parse_binary(&mut self, min_prec: u8) -> Result<Ast, Error> {
        let mut node = self.parse_postfix()?;
        loop {
            let tok = self.peek().clone();
            let Some((prec, op)) = binary_op(tok.kind) else {
                break;
            };
            if prec < min_prec {
                break;
            }
            self.advance();
            let rhs = self.parse_binary(prec + 1)?;
            node = Ast::Binary {
                pos: tok.pos,
                op,
                x: Box::new(node),
                y: Box::new(rhs),
            };
        }
        Ok(node)
    }

    fn parse_postfix(&mut self) -> Result<Ast, Error> {
        let mut node = self.parse_primary()?;
        loop {
            if let Some(dot) = self.matches(TokenKind::Dot) {
                if self.matches(TokenKind::Parent).is_some() {
                    match node {
                        Ast::Parent { pos, depth } => {
                            node = Ast::Parent {
                                pos,
                                depth: depth + 1,
                            };
                        }
                        _ => {
                            return Err(Error::parse("invalid parent chaining", dot.pos));
                        }
                    }
                    continue;
                }
                let attr = self.expect(&[TokenKind::Ident])?;
                node = Ast::Access {
                    pos: attr.pos,
                    base: Box::new(node),
                    attr: attr.text,
                };
            } else if let Some(uw) = self.matches(TokenKind::Unwrap) {
                node = Ast::Access {
                    pos: uw.pos,
                    base: Box::new(node),
                    attr: "result".into(),
                };
            } else if let Some(open) = self.matches(TokenKind::LBracket) {
                let defs = self.parse_defs_until(TokenKind::RBracket, true, false)?;
                self.expect(&[TokenKind::RBracket])?;
                node = Ast::Override {
                    pos: open.pos,
                    base: Box::new(node),
                    defs: defs.defs,
                    aliases: defs.aliases,
                };
            } else if let Some(open) = self.matches(TokenKind::LParen) {
                let defs = self.parse_defs_until(TokenKind::RParen, false, true)?;
                self.expect(&[TokenKind::RParen])?;
                node = Ast::Call {
                    pos: open.pos,
                    base: Box::new(node),
                    defs: defs.defs,
                    eager: defs.eager,
                };
            } else {
                break;
            }
        }
        Ok(node)
    }

    fn parse_primary(&mut self) -> Result<Ast, Error> {
        let tok = self.expect(&[
            TokenKind::LBrace,
            TokenKind::Int,
            TokenKind::Float,
            TokenKind::Str,
            TokenKind::SelfRef,
            TokenKind::Parent,
            TokenKind::Ancestor,
            TokenKind::Ident,
            TokenKind::LParen,
            TokenKind::Minus,
        ])?;
        match tok.kind {
            TokenKind::LBrace => {
                let defs = self.parse_defs_until(TokenKind::RBrace, false, false)?;
                self.expect(&[TokenKind::RBrace])?;
                Ok(Ast::Block {
                    pos: tok.pos,
                    defs: defs.defs,
                })
            }
            TokenKind::Int => {
                let value: i64 = tok.text.parse().map_err(|e| {
                    Error::parse(format!("invalid int literal: {e}"), tok.pos.clone())
                })?;
                Ok(Ast::Int {
                    pos: tok.pos,
                    value,
                })
            }
            TokenKind::Float => {
                let value: f64 = tok.text.parse().map_err(|e| {
                    Error::parse(format!("invalid float literal: {e}"), tok.pos.clone())
                })?;
                Ok(Ast::Float {
                    pos: tok.pos,
                    value,
                })
            }
            TokenKind::Str => Ok(Ast::Str {
                pos: tok.pos,
                value: tok.text,
            }),
            TokenKind::SelfRef => Ok(Ast::SelfRef { pos: tok.pos }),
            TokenKind::Parent => Ok(Ast::Parent {
                pos: tok.pos,
                depth: 1,
            }),
            TokenKind::Ancestor => {
                self.expect(&[TokenKind::Dot])?;
                let name = self.expect(&[TokenKind::Ident])?;
                Ok(Ast::Ancestor {
                    pos: tok.pos,
                    name: name.text,
                })
            }
            TokenKind::Ident => Ok(Ast::Ident {
                pos: tok.pos,
                name: tok.text,
            }),
            TokenKind::LParen => {
                let expr = self.parse_expr()?;
                self.expect(&[TokenKind::RParen])?;
                Ok(expr)
            }
            TokenKind::Minus => {
                // Unary minus desugars to the receiver's `neg` operator.
                let operand = self.parse_postfix()?;
                Ok(Ast::Access {
                    pos: tok.pos,
                    base: Box::new(operand),
                    attr: "neg".into(),
                })
            }
            _ => unreachable!("expect() only admits primary starters"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::tokenize;

    fn parse_src(src: &str) -> Result<Ast, Error> {
        parse(tokenize("test", src)?)
    }

    fn module_defs(ast: &Ast) -> &Vec<(String, Ast)> {
        match ast {
            Ast::Block { defs, .. } => defs,
            _ => panic!("module is not a block"),
        }
    }

    #[test]
    fn test_module_structure() {
        let ast = parse_src("x = 3\ny = { z = ^.x }\nresult = y.z").unwrap();
        let defs = module_defs(&ast);
        assert_eq!(defs.len(), 3);
        assert_eq!(defs[0].0, "x");
        assert!(matches!(defs[0].1, Ast::Int { value: 3, .. }));
        assert!(matches!(defs[1].1, Ast::Block { .. }));
        assert!(matches!(defs[2].1, Ast::Access { .. }));
    }

    #[test]
    fn test_commas_are_optional() {
        let a = parse_src("a = 1, b = 2").unwrap();
        let b = parse_src("a = 1  b = 2").unwrap();
        assert_eq!(module_defs(&a).len(), 2);
        assert_eq!(module_defs(&b).len(), 2);
    }

    #[test]
    fn test_override_and_call_forms() {
        let ast = parse_src("result = y(a=1, b:=2)[c<-a]").unwrap();
        let defs = module_defs(&ast);
        match &defs[0].1 {
            Ast::Override { base, aliases, .. } => {
                assert_eq!(aliases, &vec![("c".to_string(), "a".to_string())]);
                match &**base {
                    Ast::Call { defs, eager, .. } => {
                        assert_eq!(defs.len(), 1);
                        assert_eq!(eager.len(), 1);
                        assert_eq!(eager[0].0, "b");
                    }
                    _ => panic!("expected call under override"),
                }
            }
            _ => panic!("expected override"),
        }
    }

    #[test]
    fn test_unwrap_is_result_access() {
        let ast = parse_src("result = y!").unwrap();
        match &module_defs(&ast)[0].1 {
            Ast::Access { attr, .. } => assert_eq!(attr, "result"),
            _ => panic!("expected access"),
        }
    }

    #[test]
    fn test_ternary_is_right_associative() {
        let ast = parse_src("result = a ? 1 : b ? 2 : 3").unwrap();
        match &module_defs(&ast)[0].1 {
            Ast::Ternary { if_false, .. } => {
                assert!(matches!(**if_false, Ast::Ternary { .. }))
            }
            _ => panic!("expected ternary"),
        }
    }

    #[test]
    fn test_binary_precedence_shape() {
        // 1 + 2 * 3 parses as 1 + (2 * 3).
        let ast = parse_src("result = 1 + 2 * 3").unwrap();
        match &module_defs(&ast)[0].1 {
            Ast::Binary { op, y, .. } => {
                assert_eq!(*op, "add");
                assert!(matches!(&**y, Ast::Binary { op: "mul", .. }));
            }
            _ => panic!("expected binary"),
        }
    }

    #[test]
    fn test_parent_chaining() {
        let ast = parse_src("result = ^.^.x").unwrap();
        match &module_defs(&ast)[0].1 {
            Ast::Access { base, .. } => {
                assert!(matches!(**base, Ast::Parent { depth: 2, .. }))
            }
            _ => panic!("expected access on chained parent"),
        }
        assert!(parse_src("result = x.^")
            .unwrap_err()
            .to_string()
            .contains("invalid parent chaining"));
    }

    #[test]
    fn test_parse_errors_table() {
        let cases = [
            ("a = 1 a = 2", "redefinition"),
            // Aliases are bracket-only, eager bindings are paren-only.
            ("result = y(a<-b)", "unexpected token"),
            ("result = y[a:=1]", "unexpected token"),
            ("a = ", "expected"),
            ("a", "unexpected token"),
            ("result = y[", "expected"),
            ("= 3", "expected IDENT"),
            ("result = a ? 1 2", "expected :"),
        ];
        for (src, needle) in cases {
            let err = parse_src(src).unwrap_err().to_string();
            assert!(
                err.contains(needle),
                "error for {src:?} should contain {needle:?}, got {err}"
            );
        }
    }
}
