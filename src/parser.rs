//! Recursive-descent parser producing evaluator-ready expression trees.
//!
//! Special-form keywords are recognized here and turned into dedicated nodes;
//! `let`, `let*` and `letrec` are desugared into lambda applications. Quoted data is
//! read with [`Parser::parse_datum`] into plain pairs and symbols.
//!
//! The parser is lenient about a missing closing parenthesis at the end of input
//! and skips stray closing parentheses between toplevel forms. After an error it
//! resumes at the end of the offending toplevel form.

use std::sync::Arc;

use tracing::warn;

use crate::Error;
use crate::MAX_PARSE_DEPTH;
use crate::ast::{
    ActorForm, Application, Assignment, CondClause, Conditional, Definition, DoIterator, DoLoop,
    HandlerForm, Lambda, Macro, NumberType, Symbol, SymbolTable, Value,
};
use crate::builtinops::QUOTE_FORM;
use crate::lexer::{Lexer, Token, TokenKind, unescape_string};

/// Stack headroom below which parsing switches to a fresh segment
const RED_ZONE: usize = 64 * 1024;
const STACK_GROWTH: usize = 1024 * 1024;

/// Wrap a datum so that evaluating it yields the datum itself
pub fn quote_application(datum: Value) -> Value {
    Value::Application(Arc::new(Application {
        operator: Value::Syntax(&QUOTE_FORM),
        arguments: vec![datum],
    }))
}

fn improper_application() -> Error {
    Error::CompileError("proper list required for function application or macro use".into())
}

pub struct Parser<'a> {
    lexer: Lexer<'a>,
    symbols: SymbolTable,
    depth: usize,
}

impl<'a> Parser<'a> {
    /// Identifiers are interned in `symbols`
    pub fn new(source: &'a str, symbols: &SymbolTable) -> Self {
        Parser {
            lexer: Lexer::new(source),
            symbols: symbols.clone(),
            depth: 0,
        }
    }

    /// Parse the next toplevel form; `None` at end of input
    pub fn parse(&mut self) -> Result<Option<Value>, Error> {
        loop {
            let token = match self.lexer.peek() {
                Ok(token) => token,
                Err(e) => {
                    // skips the offending input
                    let _ = self.lexer.advance();
                    return Err(e);
                }
            };
            match token.kind {
                TokenKind::Eof => return Ok(None),
                TokenKind::Close => {
                    warn!(offset = token.offset, "ignoring unexpected ')'");
                    self.lexer.advance()?;
                }
                _ => {
                    self.depth = 0;
                    return match self.parse_expression() {
                        Ok(expr) => Ok(Some(expr)),
                        Err(e) => {
                            let end = self.form_end(token.offset);
                            self.lexer.seek(end);
                            Err(e)
                        }
                    };
                }
            }
        }
    }

    /// Read one datum: lists become pairs, identifiers become symbols
    pub fn parse_datum(&mut self) -> Result<Value, Error> {
        let token = self.lexer.advance()?;
        self.nested(|parser| parser.datum_from(token))
    }

    /// Offset just past the form starting at `start`
    fn form_end(&self, start: usize) -> usize {
        let mut cursor = self.lexer.clone();
        cursor.seek(start);
        let mut depth: usize = 0;
        loop {
            match cursor.advance() {
                Ok(token) => match token.kind {
                    TokenKind::Eof => break,
                    TokenKind::Open => depth += 1,
                    TokenKind::Close => {
                        depth = depth.saturating_sub(1);
                        if depth == 0 {
                            break;
                        }
                    }
                    TokenKind::Quote => {}
                    _ if depth == 0 => break,
                    _ => {}
                },
                Err(_) if depth == 0 => break,
                Err(_) => {}
            }
        }
        cursor.position()
    }

    fn form_text(&self, start: usize) -> String {
        let end = self.form_end(start);
        self.lexer
            .source()
            .get(start..end)
            .unwrap_or_default()
            .trim()
            .to_owned()
    }

    fn malformed(&self, keyword: &str, start: usize) -> Error {
        Error::SyntaxError(format!("malformed {keyword}: {}", self.form_text(start)))
    }

    fn nested<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T, Error>) -> Result<T, Error> {
        if self.depth >= MAX_PARSE_DEPTH {
            return Err(Error::ParseError(format!(
                "nesting too deep (max: {MAX_PARSE_DEPTH})"
            )));
        }
        self.depth += 1;
        let result = stacker::maybe_grow(RED_ZONE, STACK_GROWTH, || f(self));
        self.depth -= 1;
        result
    }

    /// Consume a `)` if it comes next. End of input also counts as closing.
    fn at_close(&mut self) -> Result<bool, Error> {
        match self.lexer.peek()?.kind {
            TokenKind::Close => {
                self.lexer.advance()?;
                Ok(true)
            }
            TokenKind::Eof => Ok(true),
            _ => Ok(false),
        }
    }

    fn expect_open(&mut self, keyword: &str, start: usize) -> Result<(), Error> {
        match self.lexer.peek()?.kind {
            TokenKind::Open => {
                self.lexer.advance()?;
                Ok(())
            }
            _ => Err(self.malformed(keyword, start)),
        }
    }

    fn expect_identifier(&mut self, keyword: &str, start: usize) -> Result<Symbol, Error> {
        let token = self.lexer.peek()?;
        if token.kind != TokenKind::Identifier {
            return Err(self.malformed(keyword, start));
        }
        self.lexer.advance()?;
        Ok(self.symbols.intern(token.text))
    }

    fn parse_expression(&mut self) -> Result<Value, Error> {
        let token = self.lexer.advance()?;
        self.nested(|parser| parser.expression_from(token))
    }

    fn expression_from(&mut self, token: Token<'a>) -> Result<Value, Error> {
        match token.kind {
            TokenKind::Open => self.parse_block(token.offset),
            TokenKind::Quote => Ok(quote_application(self.parse_quoted()?)),
            TokenKind::Integer => parse_integer(token.text),
            TokenKind::Identifier => Ok(Value::Variable(self.symbols.intern(token.text))),
            TokenKind::Boolean => Ok(Value::Boolean(token.text == "#t")),
            TokenKind::String => Ok(Value::from(unescape_string(token.text))),
            TokenKind::Dot => Err(improper_application()),
            TokenKind::Close => Err(Error::ParseError("unexpected ')'".into())),
            TokenKind::Eof => Err(Error::ParseError("unexpected end of input".into())),
        }
    }

    fn parse_quoted(&mut self) -> Result<Value, Error> {
        if self.lexer.peek()?.kind == TokenKind::Eof {
            return Err(Error::ParseError("unterminated quote".into()));
        }
        self.parse_datum()
    }

    fn datum_from(&mut self, token: Token<'a>) -> Result<Value, Error> {
        match token.kind {
            TokenKind::Open => self.parse_datum_list(),
            TokenKind::Quote => {
                let quoted = self.parse_quoted()?;
                Ok(Value::list(vec![
                    Value::Symbol(self.symbols.intern("quote")),
                    quoted,
                ]))
            }
            TokenKind::Integer => parse_integer(token.text),
            TokenKind::Identifier => Ok(Value::Symbol(self.symbols.intern(token.text))),
            TokenKind::Boolean => Ok(Value::Boolean(token.text == "#t")),
            TokenKind::String => Ok(Value::from(unescape_string(token.text))),
            TokenKind::Eof => Err(Error::ParseError("unterminated quote".into())),
            TokenKind::Close => Err(Error::ParseError("unexpected ')'".into())),
            TokenKind::Dot => Err(Error::ParseError("unexpected '.'".into())),
        }
    }

    fn parse_datum_list(&mut self) -> Result<Value, Error> {
        let mut elements = Vec::new();
        loop {
            let token = self.lexer.peek()?;
            match token.kind {
                TokenKind::Close => {
                    self.lexer.advance()?;
                    return Ok(Value::list(elements));
                }
                TokenKind::Eof => return Ok(Value::list(elements)),
                TokenKind::Dot if !elements.is_empty() => {
                    self.lexer.advance()?;
                    let tail = self.parse_datum()?;
                    if !self.at_close()? {
                        return Err(Error::ParseError("bad dotted list".into()));
                    }
                    return Ok(Value::list_with_tail(elements, tail));
                }
                _ => elements.push(self.parse_datum()?),
            }
        }
    }

    /// Expressions up to the closing parenthesis
    fn parse_body(&mut self) -> Result<Vec<Value>, Error> {
        let mut exprs = Vec::new();
        while !self.at_close()? {
            exprs.push(self.parse_expression()?);
        }
        Ok(exprs)
    }

    fn parse_required_body(&mut self, keyword: &str, start: usize) -> Result<Vec<Value>, Error> {
        let body = self.parse_body()?;
        if body.is_empty() {
            return Err(self.malformed(keyword, start));
        }
        Ok(body)
    }

    /// Parameter names up to the closing parenthesis; the `(` is already consumed
    fn parse_param_tail(&mut self, keyword: &str, start: usize) -> Result<Vec<Symbol>, Error> {
        let mut params: Vec<Symbol> = Vec::new();
        while !self.at_close()? {
            let param = self.expect_identifier(keyword, start)?;
            if params.contains(&param) {
                return Err(Error::SyntaxError(format!(
                    "duplicate parameter {param} in {}",
                    self.form_text(start)
                )));
            }
            params.push(param);
        }
        Ok(params)
    }

    fn parse_block(&mut self, start: usize) -> Result<Value, Error> {
        let token = self.lexer.peek()?;
        match token.kind {
            TokenKind::Close => {
                self.lexer.advance()?;
                return Ok(Value::Null);
            }
            TokenKind::Eof => return Ok(Value::Null),
            TokenKind::Identifier => {
                let parse_form: Option<fn(&mut Self, usize) -> Result<Value, Error>> =
                    match token.text {
                        "quote" => Some(Self::parse_quote),
                        "define" => Some(Self::parse_define),
                        "define-macro" => Some(Self::parse_define_macro),
                        "lambda" => Some(Self::parse_lambda),
                        "let" => Some(Self::parse_let),
                        "let*" => Some(Self::parse_let_star),
                        "letrec" => Some(Self::parse_letrec),
                        "set!" => Some(Self::parse_set),
                        "if" => Some(Self::parse_if),
                        "cond" => Some(Self::parse_cond),
                        "and" => Some(Self::parse_and),
                        "or" => Some(Self::parse_or),
                        "begin" => Some(Self::parse_begin),
                        "do" => Some(Self::parse_do),
                        "actor" => Some(Self::parse_actor),
                        _ => None,
                    };
                if let Some(parse_form) = parse_form {
                    self.lexer.advance()?;
                    return parse_form(self, start);
                }
            }
            _ => {}
        }
        self.parse_application()
    }

    fn parse_application(&mut self) -> Result<Value, Error> {
        let operator = self.parse_expression()?;
        let mut arguments = Vec::new();
        while !self.at_close()? {
            if self.lexer.peek()?.kind == TokenKind::Dot {
                return Err(improper_application());
            }
            arguments.push(self.parse_expression()?);
        }
        Ok(Value::Application(Arc::new(Application {
            operator,
            arguments,
        })))
    }

    fn parse_quote(&mut self, start: usize) -> Result<Value, Error> {
        if self.at_close()? {
            return Err(self.malformed("quote", start));
        }
        let datum = self.parse_datum()?;
        if !self.at_close()? {
            return Err(self.malformed("quote", start));
        }
        Ok(quote_application(datum))
    }

    /// `(define name expr)` or `(define (name params...) body...)`
    fn parse_define(&mut self, start: usize) -> Result<Value, Error> {
        let token = self.lexer.peek()?;
        match token.kind {
            TokenKind::Open => {
                self.lexer.advance()?;
                let name = self.expect_identifier("define", start)?;
                let params = self.parse_param_tail("define", start)?;
                let body = self.parse_required_body("define", start)?;
                let lambda = Lambda {
                    name: Some(name.clone()),
                    params,
                    body,
                };
                Ok(Value::Definition(Arc::new(Definition {
                    name,
                    value: Value::Lambda(Arc::new(lambda)),
                })))
            }
            TokenKind::Identifier => {
                let name = self.expect_identifier("define", start)?;
                let value = self.parse_single_operand("define", start)?;
                Ok(Value::Definition(Arc::new(Definition { name, value })))
            }
            _ => Err(self.malformed("define", start)),
        }
    }

    /// Exactly one expression followed by `)`
    fn parse_single_operand(&mut self, keyword: &str, start: usize) -> Result<Value, Error> {
        if self.at_close()? {
            return Err(self.malformed(keyword, start));
        }
        let value = self.parse_expression()?;
        if !self.at_close()? {
            return Err(self.malformed(keyword, start));
        }
        Ok(value)
    }

    fn parse_define_macro(&mut self, start: usize) -> Result<Value, Error> {
        self.expect_open("define-macro", start)?;
        let name = self.expect_identifier("define-macro", start)?;
        let params = self.parse_param_tail("define-macro", start)?;
        let body = self.parse_required_body("define-macro", start)?;
        Ok(Value::MacroDefinition(Arc::new(Macro { name, params, body })))
    }

    fn parse_lambda(&mut self, start: usize) -> Result<Value, Error> {
        self.expect_open("lambda", start)?;
        let params = self.parse_param_tail("lambda", start)?;
        let body = self.parse_required_body("lambda", start)?;
        Ok(Value::Lambda(Arc::new(Lambda {
            name: None,
            params,
            body,
        })))
    }

    /// `((name init) ...)`
    fn parse_bindings(&mut self, keyword: &str, start: usize) -> Result<Vec<(Symbol, Value)>, Error> {
        self.expect_open(keyword, start)?;
        let mut bindings = Vec::new();
        while !self.at_close()? {
            self.expect_open(keyword, start)?;
            let name = self.expect_identifier(keyword, start)?;
            let init = self.parse_single_operand(keyword, start)?;
            bindings.push((name, init));
        }
        Ok(bindings)
    }

    /// `(let ((x a) (y b)) body...)` becomes `((lambda (x y) body...) a b)`
    fn parse_let(&mut self, start: usize) -> Result<Value, Error> {
        let bindings = self.parse_bindings("let", start)?;
        let body = self.parse_required_body("let", start)?;
        let (params, arguments): (Vec<_>, Vec<_>) = bindings.into_iter().unzip();
        if has_duplicates(&params) {
            return Err(Error::SyntaxError(format!(
                "duplicate binding in {}",
                self.form_text(start)
            )));
        }
        Ok(lambda_application(params, body, arguments))
    }

    /// `(let* ((x a) (y b)) body...)` nests one single-binding `let` per binding
    fn parse_let_star(&mut self, start: usize) -> Result<Value, Error> {
        let bindings = self.parse_bindings("let*", start)?;
        let mut body = self.parse_required_body("let*", start)?;
        if bindings.is_empty() {
            return Ok(lambda_application(Vec::new(), body, Vec::new()));
        }
        for (name, init) in bindings.into_iter().rev() {
            body = vec![lambda_application(vec![name], body, vec![init])];
        }
        Ok(body.remove(0))
    }

    /// `(letrec ((x a)) body...)` becomes `((lambda () (define x a) body...))`
    fn parse_letrec(&mut self, start: usize) -> Result<Value, Error> {
        let bindings = self.parse_bindings("letrec", start)?;
        let body = self.parse_required_body("letrec", start)?;
        let names: Vec<Symbol> = bindings.iter().map(|(name, _)| name.clone()).collect();
        if has_duplicates(&names) {
            return Err(Error::SyntaxError(format!(
                "duplicate binding in {}",
                self.form_text(start)
            )));
        }

        let mut exprs: Vec<Value> = bindings
            .into_iter()
            .map(|(name, value)| Value::Definition(Arc::new(Definition { name, value })))
            .collect();
        exprs.extend(body);
        Ok(lambda_application(Vec::new(), exprs, Vec::new()))
    }

    fn parse_set(&mut self, start: usize) -> Result<Value, Error> {
        let name = self.expect_identifier("set!", start)?;
        let value = self.parse_single_operand("set!", start)?;
        Ok(Value::Set(Arc::new(Assignment { name, value })))
    }

    fn parse_if(&mut self, start: usize) -> Result<Value, Error> {
        let mut parts = self.parse_body()?;
        if !(2..=3).contains(&parts.len()) {
            return Err(self.malformed("if", start));
        }
        let alternative = (parts.len() == 3).then(|| parts.pop()).flatten();
        let consequent = parts.pop().unwrap_or(Value::Undefined);
        let test = parts.pop().unwrap_or(Value::Undefined);
        Ok(Value::If(Arc::new(Conditional {
            test,
            consequent,
            alternative,
        })))
    }

    fn parse_cond(&mut self, start: usize) -> Result<Value, Error> {
        let mut clauses: Vec<CondClause> = Vec::new();
        while !self.at_close()? {
            if clauses.last().is_some_and(|clause| clause.test.is_none()) {
                return Err(self.cond_error("'else' clause followed by more clauses", start));
            }
            if self.lexer.peek()?.kind != TokenKind::Open {
                return Err(self.cond_error("bad clause in cond", start));
            }
            self.lexer.advance()?;
            if self.at_close()? {
                return Err(self.cond_error("bad clause in cond", start));
            }

            let token = self.lexer.peek()?;
            let test = if token.kind == TokenKind::Identifier && token.text == "else" {
                self.lexer.advance()?;
                None
            } else {
                Some(self.parse_expression()?)
            };
            let body = self.parse_body()?;
            clauses.push(CondClause { test, body });
        }

        if clauses.is_empty() {
            return Err(self.cond_error("at least one clause is required for cond", start));
        }
        Ok(Value::Cond(Arc::new(clauses)))
    }

    fn cond_error(&self, message: &str, start: usize) -> Error {
        Error::SyntaxError(format!("{message}: {}", self.form_text(start)))
    }

    fn parse_and(&mut self, _start: usize) -> Result<Value, Error> {
        Ok(Value::And(Arc::new(self.parse_body()?)))
    }

    fn parse_or(&mut self, _start: usize) -> Result<Value, Error> {
        Ok(Value::Or(Arc::new(self.parse_body()?)))
    }

    fn parse_begin(&mut self, _start: usize) -> Result<Value, Error> {
        Ok(Value::Begin(Arc::new(self.parse_body()?)))
    }

    /// `(do ((var init step)...) (test result...) command...)`
    fn parse_do(&mut self, start: usize) -> Result<Value, Error> {
        self.expect_open("do", start)?;
        let mut iterators = Vec::new();
        while !self.at_close()? {
            self.expect_open("do", start)?;
            let variable = self.expect_identifier("do", start)?;
            if self.at_close()? {
                return Err(self.malformed("do", start));
            }
            let init = self.parse_expression()?;
            let step = if self.at_close()? {
                None
            } else {
                let step = self.parse_expression()?;
                if !self.at_close()? {
                    return Err(self.malformed("do", start));
                }
                Some(step)
            };
            iterators.push(DoIterator {
                variable,
                init,
                step,
            });
        }

        self.expect_open("do", start)?;
        if self.at_close()? {
            return Err(self.malformed("do", start));
        }
        let test = self.parse_expression()?;
        let result = self.parse_body()?;
        let commands = self.parse_body()?;
        Ok(Value::Do(Arc::new(DoLoop {
            iterators,
            test,
            result,
            commands,
        })))
    }

    /// `(actor (("tag" params...) body...) ...)`
    fn parse_actor(&mut self, start: usize) -> Result<Value, Error> {
        let mut handlers = Vec::new();
        while !self.at_close()? {
            self.expect_open("actor", start)?;
            self.expect_open("actor", start)?;
            let token = self.lexer.peek()?;
            if token.kind != TokenKind::String {
                return Err(self.malformed("actor", start));
            }
            self.lexer.advance()?;
            let tag: Arc<str> = unescape_string(token.text).into();
            let params = self.parse_param_tail("actor", start)?;
            let body = self.parse_body()?;
            handlers.push(HandlerForm { tag, params, body });
        }
        Ok(Value::ActorDefinition(Arc::new(ActorForm { handlers })))
    }
}

fn parse_integer(text: &str) -> Result<Value, Error> {
    text.parse::<NumberType>()
        .map(Value::Number)
        .map_err(|_| Error::ParseError(format!("integer literal out of range: {text}")))
}

fn has_duplicates(names: &[Symbol]) -> bool {
    names
        .iter()
        .enumerate()
        .any(|(i, name)| names[..i].contains(name))
}

fn lambda_application(params: Vec<Symbol>, body: Vec<Value>, arguments: Vec<Value>) -> Value {
    let lambda = Value::Lambda(Arc::new(Lambda {
        name: None,
        params,
        body,
    }));
    Value::Application(Arc::new(Application {
        operator: lambda,
        arguments,
    }))
}
