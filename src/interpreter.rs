//! Session driver: one global environment plus the evaluation settings.

use std::path::Path;

use tracing::debug;

use crate::ast::Value;
use crate::builtinops::{create_global_env, load_path};
use crate::environment::Environment;
use crate::evaluator::Frame;
use crate::lexer::Lexer;
use crate::parser::Parser;
use crate::{Error, MAX_EVAL_DEPTH};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterpreterConfig {
    /// Nesting depth at which evaluation fails instead of recursing further
    pub max_eval_depth: usize,
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        InterpreterConfig {
            max_eval_depth: MAX_EVAL_DEPTH,
        }
    }
}

/// An interpreter session.
///
/// ```
/// use schemelet::Interpreter;
///
/// let interp = Interpreter::new();
/// let results = interp.evaluate_source("(define x 2) (* x 21) (car ())");
/// assert_eq!(results[0], "x");
/// assert_eq!(results[1], "42");
/// assert!(results[2].starts_with("*** ERROR: "));
/// ```
pub struct Interpreter {
    env: Environment,
    config: InterpreterConfig,
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl Interpreter {
    pub fn new() -> Self {
        Self::with_config(InterpreterConfig::default())
    }

    pub fn with_config(config: InterpreterConfig) -> Self {
        Interpreter {
            env: create_global_env(),
            config,
        }
    }

    pub fn environment(&self) -> &Environment {
        &self.env
    }

    pub fn config(&self) -> &InterpreterConfig {
        &self.config
    }

    fn frame(&self) -> Frame<'_> {
        Frame::new(&self.env, self.env.toplevel(), self.config.max_eval_depth)
    }

    /// Parse every toplevel form of `source`, failing on the first error
    pub fn parse(&self, source: &str) -> Result<Vec<Value>, Error> {
        let mut parser = Parser::new(source, self.env.symbols());
        let mut exprs = Vec::new();
        while let Some(expr) = parser.parse()? {
            exprs.push(expr);
        }
        Ok(exprs)
    }

    /// Evaluate a parsed expression in the toplevel scope
    pub fn eval(&self, expr: &Value) -> Result<Value, Error> {
        self.frame().eval(expr)
    }

    /// Evaluate all forms of `source`, returning the last value.
    /// Stops at the first error.
    pub fn eval_str(&self, source: &str) -> Result<Value, Error> {
        let mut parser = Parser::new(source, self.env.symbols());
        let mut result = Value::Undefined;
        while let Some(expr) = parser.parse()? {
            result = self.eval(&expr)?;
        }
        Ok(result)
    }

    /// Evaluate all forms of `source`, rendering one result per form.
    ///
    /// A failing form renders as `*** ERROR: <message>` and evaluation carries on
    /// with the next form.
    pub fn evaluate_source(&self, source: &str) -> Vec<String> {
        let mut parser = Parser::new(source, self.env.symbols());
        let mut results = Vec::new();
        loop {
            let outcome = match parser.parse() {
                Ok(Some(expr)) => {
                    debug!(form = %expr, "evaluating");
                    self.eval(&expr)
                }
                Ok(None) => break,
                Err(e) => Err(e),
            };
            results.push(match outcome {
                Ok(value) => value.to_string(),
                Err(e) => {
                    debug!(error = %e, "form failed");
                    format!("*** ERROR: {e}")
                }
            });
        }
        results
    }

    /// Evaluate a source file in the toplevel scope, as `(load "path")` would
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<Value, Error> {
        load_path(&self.frame(), path.as_ref())
    }

    /// Toplevel bindings sorted by name
    pub fn bindings(&self) -> Vec<(String, Value)> {
        self.env.toplevel().bindings()
    }
}

/// Unmatched `(` minus `)` in `source`; positive means the input is incomplete
pub fn indent_level(source: &str) -> isize {
    Lexer::new(source).indent_level()
}

#[cfg(test)]
#[expect(clippy::unwrap_used)] // test code OK
mod tests {
    use super::*;
    use crate::ast::val;

    #[test]
    fn test_evaluate_source_continues_after_errors() {
        let interp = Interpreter::new();
        let results = interp.evaluate_source("1 (car ()) (define) 2 hello");
        assert_eq!(
            results,
            vec![
                "1",
                "*** ERROR: Compile Error: pair required, but got ()",
                "*** ERROR: Compile Error: syntax-error: malformed define: (define)",
                "2",
                "*** ERROR: Unbound variable: hello",
            ]
        );
    }

    #[test]
    fn test_eval_str_and_parse() {
        let interp = Interpreter::new();
        assert_eq!(interp.eval_str("(define x 5) (* x x)").unwrap(), val(25));
        assert_eq!(interp.eval_str("").unwrap(), Value::Undefined);
        assert!(interp.eval_str("(car ()) 1").is_err());

        let exprs = interp.parse("1 (+ 1 2) 'a").unwrap();
        assert_eq!(exprs.len(), 3);
        assert_eq!(interp.eval(&exprs[1]).unwrap(), val(3));
        assert!(interp.parse("1 (quote)").is_err());
    }

    #[test]
    fn test_configured_depth_limit() {
        let interp = Interpreter::with_config(InterpreterConfig { max_eval_depth: 20 });
        interp
            .eval_str("(define (count n) (if (= n 0) 0 (+ 1 (count (- n 1)))))")
            .unwrap();
        assert_eq!(interp.eval_str("(count 2)").unwrap(), val(2));
        let err = interp.eval_str("(count 50)").unwrap_err();
        assert!(err.to_string().contains("max: 20"));
        assert_eq!(interp.config().max_eval_depth, 20);
    }

    #[test]
    fn test_bindings_include_user_definitions() {
        let interp = Interpreter::new();
        interp.eval_str("(define zzz 1)").unwrap();
        let bindings = interp.bindings();
        assert!(bindings.iter().any(|(name, value)| name == "zzz" && *value == val(1)));
        assert!(bindings.iter().any(|(name, _)| name == "car"));
        assert!(bindings.windows(2).all(|w| w[0].0 <= w[1].0));
    }

    #[test]
    fn test_indent_level() {
        assert_eq!(indent_level("(define (f x)"), 2);
        assert_eq!(indent_level("(f x)"), 0);
        assert_eq!(indent_level("))"), -2);
        assert_eq!(indent_level("\"(\""), 0);
    }
}
