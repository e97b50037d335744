//! Reflex - a block-based lazy language and its evaluator.
//!
//! The single semantic primitive is the **block**: a lazily-evaluated,
//! named lookup table of expressions. Literals are blocks exposing
//! operator sub-blocks; computation is overriding named entries of a
//! block and accessing entries to trigger evaluation. Control flow
//! (ternary, binary operators, short-circuit logic, recursion) is
//! expressed entirely through overrides and attribute access.
//!
//! The crate couples a cyclic reference graph with on-demand
//! copy-on-write: every node tracks the set of scope ids reachable
//! through back edges inside it, and the cloning engine shares whole
//! sub-graphs whose interior a rewrite cannot affect. Without that
//! short-circuit a recursive program allocates quadratically in depth.
//!
//! ## Modules
//!
//! - `lexer` / `parser` / `ast`: surface syntax to node graph
//! - `node` / `defmap` / `backedge`: the graph, lazy definition maps,
//!   and hash-consed back-edge sets
//! - `builtins`: the coroutine protocol behind every operator
//! - `evaluator`: the iterative reducer
//! - `context` / `stdlib`: process-wide state, literal prototypes,
//!   imports, and the embedded standard library
//! - `gc`: the advisory flattening signal

use std::fmt;

use position::Pos;

pub mod ast;
pub mod attr;
pub mod backedge;
pub mod builtins;
pub mod context;
pub mod defmap;
pub mod evaluator;
pub mod gc;
pub mod lexer;
pub mod node;
pub mod parser;
pub mod position;
pub mod stdlib;

/// Error type for the whole pipeline, one variant per failure family.
/// Evaluation errors are wrapped exactly once into `Interpreter`, which
/// carries the position trace leading to the failure.
#[derive(Debug)]
pub enum Error {
    /// Tokenizer failures: unterminated string, unexpected character.
    Lex { msg: String, pos: Pos },
    /// Parser failures: unexpected or missing tokens, redefinitions.
    Parse { msg: String, pos: Pos },
    /// AST lowering failures: parent access beyond the top scope,
    /// ancestor lookup with no defining scope.
    Ast { msg: String, pos: Pos },
    /// A built-in operation rejected its input (type mismatch,
    /// out-of-range index, user panic, import failure).
    Op { msg: String, pos: Pos },
    /// Evaluation failures: missing attribute, access against a
    /// non-block, alias without a source.
    Eval { msg: String },
    /// An evaluation error decorated with the trace of positions the
    /// evaluator visited; the middle is elided for deep recursions.
    Interpreter { inner: Box<Error>, trace: Vec<Pos> },
}

impl Error {
    pub fn lex(msg: impl Into<String>, pos: Pos) -> Self {
        Error::Lex {
            msg: msg.into(),
            pos,
        }
    }

    pub fn parse(msg: impl Into<String>, pos: Pos) -> Self {
        Error::Parse {
            msg: msg.into(),
            pos,
        }
    }

    pub fn ast(msg: impl Into<String>, pos: Pos) -> Self {
        Error::Ast {
            msg: msg.into(),
            pos,
        }
    }

    pub fn op(msg: impl Into<String>, pos: Pos) -> Self {
        Error::Op {
            msg: msg.into(),
            pos,
        }
    }

    pub fn eval(msg: impl Into<String>) -> Self {
        Error::Eval { msg: msg.into() }
    }

    pub fn interpreter(inner: Error, trace: Vec<Pos>) -> Self {
        Error::Interpreter {
            inner: Box::new(inner),
            trace,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Lex { msg, pos } => write!(f, "{msg} at {pos}"),
            Error::Parse { msg, pos } => write!(f, "{msg} at {pos}"),
            Error::Ast { msg, pos } => write!(f, "{msg} at {pos}"),
            Error::Op { msg, pos } => write!(f, "{msg} at {pos}"),
            Error::Eval { msg } => write!(f, "{msg}"),
            Error::Interpreter { inner, trace } => {
                write!(f, "{inner} at")?;
                for (depth, pos) in trace.iter().enumerate() {
                    write!(f, "\n{}", "  ".repeat(depth))?;
                    if pos.is_elision() {
                        write!(f, "... trace is truncated ...")?;
                    } else {
                        write!(f, "{pos}")?;
                    }
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for Error {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_position() {
        let err = Error::lex("unterminated string", Pos::new("file.rfx", 3, 7));
        assert_eq!(err.to_string(), "unterminated string at file.rfx:3:7");
    }

    #[test]
    fn test_interpreter_display_marks_elision() {
        let trace = vec![Pos::new("f", 1, 1), Pos::default(), Pos::new("f", 9, 9)];
        let err = Error::interpreter(Error::eval("boom"), trace);
        let text = err.to_string();
        assert!(text.starts_with("boom at"));
        assert!(text.contains("f:1:1"));
        assert!(text.contains("... trace is truncated ..."));
        assert!(text.contains("f:9:9"));
    }
}
