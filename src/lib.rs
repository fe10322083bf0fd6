//! Schemelet - an embeddable Scheme-like interpreter with actors
//!
//! This crate tokenizes Scheme source text, parses it into an expression tree and
//! evaluates that tree directly against lexically scoped environments. Besides the
//! usual special forms it offers a small actor primitive: a message-passing unit that
//! runs its handlers on a dedicated thread and receives messages through a rendezvous
//! channel.
//!
//! ```scheme
//! (define (square x) (* x x))        ; => square
//! (square 12)                        ; => 144
//! (let ((x 1) (y 2)) (+ x y))        ; => 3
//! (do ((i 0 (+ i 1))) ((= i 3) 'done))
//!
//! (define printer
//!   (actor (("show" v) (set! last-seen v))))
//! (printer start)
//! (printer ! "show" 42)
//! ```
//!
//! ## Semantics in brief
//!
//! - Integers only (`i64`), with overflow and division-by-zero reported as errors
//! - Only `#f` is false; every other value (including `()`) is true
//! - `define` returns the defined name, `set!` returns `#<undef>`
//! - Closures capture the scope they were created in; each call gets a fresh scope
//!
//! ## Modules
//!
//! - `lexer`: token scanner over source text
//! - `parser`: recursive-descent parser with special-form recognition
//! - `ast`: the [`ast::Value`] sum type, rendering and equality
//! - `environment`: reference-counted scopes and symbol interning
//! - `evaluator`: expression evaluation and special forms
//! - `builtinops`: built-in subroutines and first-class syntax forms
//! - `actor`: the actor primitive
//! - `interpreter`: session driver used by embedders and the REPL

use std::sync::Once;

use crate::builtinops::Arity;

/// Default maximum evaluation depth.
/// Deep recursion beyond this limit is reported as an error rather than
/// exhausting the native stack.
pub const MAX_EVAL_DEPTH: usize = 10_000;

/// Maximum nesting of parentheses and quotes accepted by the parser
pub const MAX_PARSE_DEPTH: usize = 1024;

/// Error types for the interpreter.
///
/// The rendered messages carry the prefixes expected by Scheme users
/// (`Compile Error: ...`, `Unbound variable: ...`) so that
/// [`interpreter::Interpreter::evaluate_source`] can show them verbatim.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    /// Lexical problems such as an unterminated string or quote
    #[error("{0}")]
    ParseError(String),
    /// Malformed special form
    #[error("Compile Error: syntax-error: {0}")]
    SyntaxError(String),
    /// A form that could never succeed, e.g. an improper argument list
    #[error("Compile Error: {0}")]
    CompileError(String),
    #[error("Compile Error: {}", arity_message(.name, .expected, .got))]
    ArityError {
        name: String,
        expected: Arity,
        got: usize,
    },
    #[error("Compile Error: {expected} required, but got {got}")]
    TypeError { expected: &'static str, got: String },
    #[error("Unbound variable: {0}")]
    UnboundVariable(String),
    #[error("{0}")]
    RuntimeError(String),
}

impl Error {
    /// Create a TypeError citing the rendered offending value
    pub fn type_error(expected: &'static str, got: &ast::Value) -> Self {
        Error::TypeError {
            expected,
            got: got.to_string(),
        }
    }

    pub fn arity_error(name: impl Into<String>, expected: Arity, got: usize) -> Self {
        Error::ArityError {
            name: name.into(),
            expected,
            got,
        }
    }
}

fn arity_message(name: &str, expected: &Arity, got: &usize) -> String {
    match expected {
        Arity::AtLeast(n) => format!("procedure requires at least {n} argument"),
        Arity::Exact(n) => {
            format!("wrong number of arguments: {name} requires {n}, but got {got}")
        }
        Arity::Any => format!("wrong number of arguments: {name} got {got}"),
    }
}

static TRACING_INIT: Once = Once::new();

/// Initialize tracing for debugging.
///
/// Honours `RUST_LOG` (e.g. `RUST_LOG=schemelet=debug`). Does nothing when the
/// variable is unset, and only the first call has any effect.
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        use tracing_subscriber::{EnvFilter, fmt, prelude::*};

        if std::env::var("RUST_LOG").is_ok() {
            let filter = EnvFilter::from_default_env();
            tracing_subscriber::registry()
                .with(fmt::layer().with_target(true).with_level(true))
                .with(filter)
                .init();
        }
    });
}

pub mod actor;
pub mod ast;
pub mod builtinops;
pub mod environment;
pub mod evaluator;
pub mod interpreter;
pub mod lexer;
pub mod parser;

pub use ast::Value;
pub use interpreter::{Interpreter, InterpreterConfig, indent_level};
