use std::sync::Arc;

use crate::Error;
use crate::actor::Actor;
use crate::ast::{Application, Closure, CondClause, DoLoop, Symbol, Value};
use crate::builtinops::{Arity, QUOTE_FORM};
use crate::environment::{Environment, Scope};
use crate::parser::Parser;

/// Stack headroom below which evaluation switches to a fresh segment
const RED_ZONE: usize = 128 * 1024;
const STACK_GROWTH: usize = 2 * 1024 * 1024;

/// Evaluation context: the session environment, the current scope and the
/// nesting depth reached so far.
#[derive(Clone)]
pub struct Frame<'a> {
    env: &'a Environment,
    scope: Scope,
    depth: usize,
    max_depth: usize,
}

impl<'a> Frame<'a> {
    pub fn new(env: &'a Environment, scope: &Scope, max_depth: usize) -> Self {
        Frame {
            env,
            scope: scope.clone(),
            depth: 0,
            max_depth,
        }
    }

    pub fn env(&self) -> &'a Environment {
        self.env
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Same depth, different scope
    fn enter(&self, scope: Scope) -> Frame<'a> {
        Frame { scope, ..*self }
    }

    fn deeper(&self) -> Result<Frame<'a>, Error> {
        if self.depth >= self.max_depth {
            return Err(Error::RuntimeError(format!(
                "evaluation depth limit exceeded (max: {})",
                self.max_depth
            )));
        }
        Ok(Frame {
            env: self.env,
            scope: self.scope.clone(),
            depth: self.depth + 1,
            max_depth: self.max_depth,
        })
    }

    /// Evaluate an expression in this frame's scope
    pub fn eval(&self, expr: &Value) -> Result<Value, Error> {
        let frame = self.deeper()?;
        stacker::maybe_grow(RED_ZONE, STACK_GROWTH, || frame.eval_node(expr))
    }

    fn eval_node(&self, expr: &Value) -> Result<Value, Error> {
        match expr {
            // Self-evaluating data and runtime objects
            Value::Number(_)
            | Value::Boolean(_)
            | Value::String(_)
            | Value::Symbol(_)
            | Value::Null
            | Value::Pair(_)
            | Value::Closure(_)
            | Value::Subroutine(_)
            | Value::Syntax(_)
            | Value::Macro(_)
            | Value::Actor(_)
            | Value::Undefined => Ok(expr.clone()),

            Value::Variable(name) => self.scope.resolve(name),

            Value::Application(app) => self.eval_application(app),

            Value::Lambda(lambda) => Ok(Value::Closure(Arc::new(Closure {
                lambda: Arc::clone(lambda),
                scope: self.scope.clone(),
            }))),

            Value::Definition(def) => self.define(&def.name, &def.value),

            Value::MacroDefinition(m) => {
                self.scope
                    .define(m.name.clone(), Value::Macro(Arc::clone(m)));
                Ok(Value::Symbol(m.name.clone()))
            }

            Value::Set(set) => self.assign(&set.name, &set.value),

            Value::If(cond) => self.eval_if(&cond.test, &cond.consequent, cond.alternative.as_ref()),

            Value::Cond(clauses) => self.eval_cond(clauses),

            Value::And(exprs) => self.eval_and(exprs),

            Value::Or(exprs) => self.eval_or(exprs),

            Value::Begin(exprs) => self.eval_body(exprs),

            Value::Do(do_loop) => self.eval_do(do_loop),

            Value::ActorDefinition(form) => Ok(Value::Actor(Actor::new(self, Arc::clone(form)))),
        }
    }

    /// Evaluate a sequence and return the last value; `#<undef>` when empty
    pub fn eval_body(&self, body: &[Value]) -> Result<Value, Error> {
        let mut result = Value::Undefined;
        for expr in body {
            result = self.eval(expr)?;
        }
        Ok(result)
    }

    /// Evaluate arguments left to right
    pub fn eval_args(&self, args: &[Value]) -> Result<Vec<Value>, Error> {
        args.iter().map(|arg| self.eval(arg)).collect()
    }

    fn eval_application(&self, app: &Application) -> Result<Value, Error> {
        let operator = self.eval(&app.operator)?;
        match operator {
            Value::Subroutine(subr) => {
                subr.arity.validate(&subr.name, app.arguments.len())?;
                let args = self.eval_args(&app.arguments)?;
                (subr.func)(self, &args)
            }
            // Syntax forms see their arguments unevaluated
            Value::Syntax(form) => (form.func)(self, &app.arguments),
            Value::Actor(actor) => actor.invoke(self, &app.arguments),
            Value::Macro(m) => Err(Error::RuntimeError(format!(
                "macro expansion is not supported: {}",
                m.name
            ))),
            callee => {
                let args = self.eval_args(&app.arguments)?;
                self.apply(&callee, &args)
            }
        }
    }

    /// Apply a procedure to already-evaluated arguments
    pub fn apply(&self, callee: &Value, args: &[Value]) -> Result<Value, Error> {
        match callee {
            Value::Closure(closure) => self.call_closure(closure, args),
            Value::Subroutine(subr) => {
                subr.arity.validate(&subr.name, args.len())?;
                (subr.func)(self, args)
            }
            _ => Err(Error::RuntimeError("invalid application".into())),
        }
    }

    fn call_closure(&self, closure: &Arc<Closure>, args: &[Value]) -> Result<Value, Error> {
        let params = &closure.lambda.params;
        if params.len() != args.len() {
            let name = Value::Closure(Arc::clone(closure)).to_string();
            return Err(Error::arity_error(name, Arity::Exact(params.len()), args.len()));
        }

        let scope = self.env.new_scope(&closure.scope);
        for (param, arg) in params.iter().zip(args) {
            scope.define(param.clone(), arg.clone());
        }
        let result = self.enter(scope.clone()).eval_body(&closure.lambda.body);
        scope.release();
        result
    }

    /// Bind in the current scope; returns the name
    fn define(&self, name: &Symbol, expr: &Value) -> Result<Value, Error> {
        let value = self.eval(expr)?;
        self.scope.define(name.clone(), value);
        Ok(Value::Symbol(name.clone()))
    }

    fn assign(&self, name: &Symbol, expr: &Value) -> Result<Value, Error> {
        let value = self.eval(expr)?;
        self.scope.set(name, value)?;
        Ok(Value::Undefined)
    }

    fn eval_if(
        &self,
        test: &Value,
        consequent: &Value,
        alternative: Option<&Value>,
    ) -> Result<Value, Error> {
        if self.eval(test)?.is_true() {
            self.eval(consequent)
        } else {
            match alternative {
                Some(expr) => self.eval(expr),
                None => Ok(Value::Undefined),
            }
        }
    }

    /// First clause whose test is true wins. A clause without body yields the
    /// test value; an `else` clause without body yields `#<undef>`.
    pub fn eval_cond(&self, clauses: &[CondClause]) -> Result<Value, Error> {
        for clause in clauses {
            let Some(test) = &clause.test else {
                return self.eval_body(&clause.body);
            };
            let value = self.eval(test)?;
            if value.is_true() {
                if clause.body.is_empty() {
                    return Ok(value);
                }
                return self.eval_body(&clause.body);
            }
        }
        Ok(Value::Undefined)
    }

    pub fn eval_and(&self, exprs: &[Value]) -> Result<Value, Error> {
        let mut result = Value::Boolean(true);
        for expr in exprs {
            result = self.eval(expr)?;
            if !result.is_true() {
                break;
            }
        }
        Ok(result)
    }

    pub fn eval_or(&self, exprs: &[Value]) -> Result<Value, Error> {
        for expr in exprs {
            let result = self.eval(expr)?;
            if result.is_true() {
                return Ok(result);
            }
        }
        Ok(Value::Boolean(false))
    }

    /// Iterator inits are evaluated in the enclosing scope, the loop itself runs
    /// in a fresh child scope. Steps are computed before any variable is updated.
    pub fn eval_do(&self, do_loop: &DoLoop) -> Result<Value, Error> {
        let scope = self.env.new_scope(&self.scope);
        let result = self.run_do(&scope, do_loop);
        scope.release();
        result
    }

    fn run_do(&self, scope: &Scope, do_loop: &DoLoop) -> Result<Value, Error> {
        for iterator in &do_loop.iterators {
            let init = self.eval(&iterator.init)?;
            scope.define(iterator.variable.clone(), init);
        }

        let inner = self.enter(scope.clone());
        loop {
            let test = inner.eval(&do_loop.test)?;
            if test.is_true() {
                if do_loop.result.is_empty() {
                    return Ok(test);
                }
                return inner.eval_body(&do_loop.result);
            }

            inner.eval_body(&do_loop.commands)?;

            let mut steps = Vec::with_capacity(do_loop.iterators.len());
            for iterator in &do_loop.iterators {
                if let Some(step) = &iterator.step {
                    steps.push((iterator.variable.clone(), inner.eval(step)?));
                }
            }
            for (variable, value) in steps {
                scope.define(variable, value);
            }
        }
    }
}

/// Evaluate `expr` in `scope` with the default depth limit
pub fn eval(expr: &Value, env: &Environment, scope: &Scope) -> Result<Value, Error> {
    Frame::new(env, scope, crate::MAX_EVAL_DEPTH).eval(expr)
}

//
// First-class syntax form handlers. Arguments arrive unevaluated.
//

fn render_form(keyword: &str, args: &[Value]) -> String {
    let mut text = format!("({keyword}");
    for arg in args {
        text.push(' ');
        text.push_str(&arg.to_string());
    }
    text.push(')');
    text
}

pub(crate) fn syntax_quote(frame: &Frame<'_>, args: &[Value]) -> Result<Value, Error> {
    match args {
        [datum] => quoted_datum(frame, datum),
        _ => Err(Error::SyntaxError(format!(
            "malformed quote: {}",
            render_form("quote", args)
        ))),
    }
}

/// The datum denoted by a quoted expression
fn quoted_datum(frame: &Frame<'_>, expr: &Value) -> Result<Value, Error> {
    match expr {
        Value::Variable(name) => Ok(Value::Symbol(name.clone())),
        Value::Number(_)
        | Value::Boolean(_)
        | Value::String(_)
        | Value::Symbol(_)
        | Value::Null
        | Value::Pair(_) => Ok(expr.clone()),
        // 'x inside a quoted form stays a (quote x) list
        Value::Application(app)
            if matches!(&app.operator, Value::Syntax(form) if std::ptr::eq(*form, &QUOTE_FORM)) =>
        {
            match app.arguments.as_slice() {
                [datum] => Ok(Value::list(vec![
                    Value::Symbol(frame.env().intern("quote")),
                    quoted_datum(frame, datum)?,
                ])),
                _ => Err(Error::SyntaxError(format!(
                    "malformed quote: {}",
                    render_form("quote", &app.arguments)
                ))),
            }
        }
        // Syntax nodes are read back from their source rendering
        other => Parser::new(&other.to_string(), frame.env().symbols()).parse_datum(),
    }
}

pub(crate) fn syntax_define(frame: &Frame<'_>, args: &[Value]) -> Result<Value, Error> {
    match args {
        [Value::Variable(name), expr] => frame.define(name, expr),
        _ => Err(Error::SyntaxError(format!(
            "malformed define: {}",
            render_form("define", args)
        ))),
    }
}

pub(crate) fn syntax_set(frame: &Frame<'_>, args: &[Value]) -> Result<Value, Error> {
    match args {
        [Value::Variable(name), expr] => frame.assign(name, expr),
        _ => Err(Error::SyntaxError(format!(
            "malformed set!: {}",
            render_form("set!", args)
        ))),
    }
}

pub(crate) fn syntax_if(frame: &Frame<'_>, args: &[Value]) -> Result<Value, Error> {
    match args {
        [test, consequent] => frame.eval_if(test, consequent, None),
        [test, consequent, alternative] => frame.eval_if(test, consequent, Some(alternative)),
        _ => Err(Error::SyntaxError(format!(
            "malformed if: {}",
            render_form("if", args)
        ))),
    }
}

pub(crate) fn syntax_and(frame: &Frame<'_>, args: &[Value]) -> Result<Value, Error> {
    frame.eval_and(args)
}

pub(crate) fn syntax_or(frame: &Frame<'_>, args: &[Value]) -> Result<Value, Error> {
    frame.eval_or(args)
}

pub(crate) fn syntax_begin(frame: &Frame<'_>, args: &[Value]) -> Result<Value, Error> {
    frame.eval_body(args)
}

pub(crate) fn syntax_cond(frame: &Frame<'_>, args: &[Value]) -> Result<Value, Error> {
    let clauses = cond_clauses(args)?;
    frame.eval_cond(&clauses)
}

/// Rebuild cond clauses from forms that were parsed as applications
fn cond_clauses(forms: &[Value]) -> Result<Vec<CondClause>, Error> {
    let cond_error = |message: &str| {
        Error::SyntaxError(format!("{message}: {}", render_form("cond", forms)))
    };
    if forms.is_empty() {
        return Err(cond_error("at least one clause is required for cond"));
    }

    let mut clauses = Vec::with_capacity(forms.len());
    let mut seen_else = false;
    for form in forms {
        if seen_else {
            return Err(cond_error("'else' clause followed by more clauses"));
        }
        let Value::Application(app) = form else {
            return Err(cond_error("bad clause in cond"));
        };
        seen_else = matches!(&app.operator, Value::Variable(name) if name.name() == "else");
        clauses.push(CondClause {
            test: (!seen_else).then(|| app.operator.clone()),
            body: app.arguments.clone(),
        });
    }
    Ok(clauses)
}

#[cfg(test)]
#[expect(clippy::unwrap_used)] // test code OK
mod tests {
    use super::*;
    use crate::Error;
    use crate::ast::{nil, val};
    use crate::builtinops::create_global_env;

    /// Test result variants for comprehensive testing
    #[derive(Debug)]
    enum TestResult {
        EvalResult(Value),           // Evaluation should succeed with this value
        Rendered(&'static str),      // Evaluation should succeed with this rendering
        SpecificError(&'static str), // Evaluation should fail with error containing this string
        Error,                       // Evaluation should fail (any error)
    }
    use TestResult::*;

    /// Test environment containing test cases that share state
    struct TestEnvironment(Vec<(&'static str, TestResult)>);

    fn success<T: Into<Value>>(value: T) -> TestResult {
        EvalResult(val(value))
    }

    /// Run tests in isolated environments with shared state
    fn run_tests_in_environment(test_environments: Vec<TestEnvironment>) {
        for (env_idx, TestEnvironment(test_cases)) in test_environments.iter().enumerate() {
            let env = create_global_env();

            for (test_idx, (input, expected)) in test_cases.iter().enumerate() {
                let test_id = format!("Environment #{} test #{}", env_idx + 1, test_idx + 1);
                execute_test_case(input, expected, &env, &test_id);
            }
        }
    }

    /// Parse and evaluate every form of `input`; the last result counts
    fn eval_source(input: &str, env: &Environment) -> Result<Value, Error> {
        let mut parser = Parser::new(input, env.symbols());
        let mut result = Value::Undefined;
        while let Some(expr) = parser.parse()? {
            result = eval(&expr, env, env.toplevel())?;
        }
        Ok(result)
    }

    fn execute_test_case(input: &str, expected: &TestResult, env: &Environment, test_id: &str) {
        match (eval_source(input, env), expected) {
            (Ok(actual), EvalResult(expected_val)) => {
                assert!(
                    actual == *expected_val,
                    "{test_id}: '{input}' expected {expected_val:?}, got {actual:?}"
                );
            }
            (Ok(actual), Rendered(expected_text)) => {
                assert_eq!(actual.to_string(), *expected_text, "{test_id}: '{input}'");
            }
            (Err(_), Error) => {}
            (Err(e), SpecificError(expected_text)) => {
                let error_msg = format!("{e}");
                assert!(
                    error_msg.contains(expected_text),
                    "{test_id}: '{input}' error should contain '{expected_text}', got: {error_msg}"
                );
            }
            (Ok(actual), Error | SpecificError(_)) => {
                panic!("{test_id}: '{input}' expected error {expected:?}, got {actual:?}");
            }
            (Err(err), EvalResult(_) | Rendered(_)) => {
                panic!("{test_id}: '{input}' expected {expected:?}, got error {err:?}");
            }
        }
    }

    fn run_comprehensive_tests(test_cases: Vec<(&'static str, TestResult)>) {
        for (i, (input, expected)) in test_cases.iter().enumerate() {
            let env = create_global_env();
            let test_id = format!("#{}", i + 1);
            execute_test_case(input, expected, &env, &test_id);
        }
    }

    #[test]
    #[expect(clippy::too_many_lines)] // Comprehensive test coverage is intentionally thorough
    fn test_comprehensive_operations_data_driven() {
        let test_cases = vec![
            // === SELF-EVALUATING FORMS ===
            ("42", success(42)),
            ("-271", success(-271)),
            ("9223372036854775807", success(i64::MAX)),
            ("#t", success(true)),
            ("#f", success(false)),
            ("\"hello\"", Rendered("\"hello\"")),
            ("()", EvalResult(nil())),
            // === ARITHMETIC ===
            ("(+ 1 2 3)", success(6)),
            ("(+)", success(0)),
            ("(- 1)", success(1)),
            ("(- 3 (- 2 3) (+ 3 0))", success(1)),
            ("(*)", success(1)),
            ("(* 2 3 4)", success(24)),
            ("(/ 1)", success(1)),
            ("(/ 100 5 2)", success(10)),
            ("(+ 9223372036854775807 1)", SpecificError("overflow")),
            ("(* 4611686018427387904 2)", SpecificError("overflow")),
            ("(/ 1 0)", SpecificError("division by zero")),
            ("(-)", SpecificError("procedure requires at least 1 argument")),
            ("(/)", SpecificError("procedure requires at least 1 argument")),
            ("(+ 1 #t)", SpecificError("number required, but got #t")),
            ("(* ())", SpecificError("number required, but got ()")),
            ("(/ '(1 2 3))", SpecificError("number required, but got (1 2 3)")),
            // === COMPARISON ===
            ("(= 1 1 1)", success(true)),
            ("(< 1 2 3)", success(true)),
            ("(< 1 3 2)", success(false)),
            ("(>= 3 3 1)", success(true)),
            ("(> 1)", SpecificError("at least 2 argument")),
            // === QUOTE ===
            ("'a", Rendered("a")),
            ("'( 1 ( 2 3 ) )", Rendered("(1 (2 3))")),
            ("(quote (a . b))", Rendered("(a . b)")),
            ("''a", Rendered("(quote a)")),
            ("(quote)", SpecificError("malformed quote")),
            // === LISTS ===
            ("(cons 1 2)", Rendered("(1 . 2)")),
            ("(cons (cons 1 2) 3)", Rendered("((1 . 2) . 3)")),
            ("(car '(1 2))", success(1)),
            ("(cdr '(1 2))", Rendered("(2)")),
            ("(car ())", SpecificError("pair required, but got ()")),
            ("(length (cons 1 2))", SpecificError("proper list required")),
            ("(memq 'a (cons 'a 'b))", Rendered("(a . b)")),
            ("(memq 'a '(a b c) 1)", SpecificError("memq requires 2, but got 3")),
            ("(append '(1) '(2) '(3 4))", Rendered("(1 2 3 4)")),
            ("(last ())", SpecificError("pair required: ()")),
            // === PREDICATES ===
            ("(null? ())", success(true)),
            ("(null? 1 2)", SpecificError("null? requires 1, but got 2")),
            ("(procedure? car)", success(true)),
            ("(procedure? (lambda (x) x))", success(true)),
            ("(procedure? 'car)", success(false)),
            ("(symbol? 'a)", success(true)),
            ("(not ())", success(false)),
            ("(eq? 'a 'a)", success(true)),
            ("(eq? \"foo\" \"foo\")", success(false)),
            ("(equal? '(1 (2)) '(1 (2)))", success(true)),
            // === STRINGS AND SYMBOLS ===
            ("(string-append \"a\" \"b\")", Rendered("\"ab\"")),
            ("(symbol->string 'abc)", Rendered("\"abc\"")),
            ("(eq? (string->symbol \"abc\") 'abc)", success(true)),
            ("(number->string 42)", Rendered("\"42\"")),
            // === LAMBDA ===
            ("(lambda (x) x)", Rendered("#<closure #f>")),
            ("((lambda (x) (* x x)) 7)", success(49)),
            ("((lambda () 1))", success(1)),
            ("((lambda (x) (define x 3) x) 2)", success(3)),
            ("((lambda (x y) x) 1)", SpecificError("requires 2, but got 1")),
            // === CONDITIONALS ===
            ("(if #t 1 2)", success(1)),
            ("(if #f 1 2)", success(2)),
            ("(if () 1 2)", success(1)),
            ("(if (null? 3) 1)", EvalResult(Value::Undefined)),
            ("(if (number? 3) 'num)", Rendered("num")),
            ("(cond (#f 1) ((number? 3) 'num))", Rendered("num")),
            ("(cond (#t))", success(true)),
            ("(cond (()))", EvalResult(nil())),
            ("(cond (else))", EvalResult(Value::Undefined)),
            ("(cond (#f 1) (else 2))", success(2)),
            ("(cond (#f 1))", EvalResult(Value::Undefined)),
            ("(cond)", SpecificError("at least one clause is required for cond")),
            ("(cond ())", SpecificError("bad clause in cond")),
            ("(cond (#t) (else) ())", SpecificError("'else' clause followed by more clauses")),
            ("(and)", success(true)),
            ("(and #t 3)", success(3)),
            ("(and #f (car ()))", success(false)),
            ("(or)", success(false)),
            ("(or #f 3 #f)", success(3)),
            ("(or (number? #f) (boolean? 3))", success(false)),
            ("(or 1 (car ()))", success(1)),
            ("(begin)", EvalResult(Value::Undefined)),
            ("(begin 1 2 3)", success(3)),
            // === LET FAMILY ===
            ("(let ((x 1)) x)", success(1)),
            ("(let ((x 1) (y 2)) (+ x y))", success(3)),
            ("(let* ((x 1) (y (+ x 2))) y)", success(3)),
            ("(let* () 5)", success(5)),
            ("(letrec ((x 1)) x)", success(1)),
            (
                "(letrec ((even? (lambda (n) (if (= n 0) #t (odd? (- n 1))))) (odd? (lambda (n) (if (= n 0) #f (even? (- n 1)))))) (even? 10))",
                success(true),
            ),
            // === DO ===
            ("(do () (#t))", success(true)),
            ("(do ((i 1) (j 1)) (#t))", success(true)),
            ("(do ((i 0 (+ i 1)) (acc 0 (+ acc i))) ((= i 5) acc))", success(10)),
            ("(do () ())", SpecificError("malformed do")),
            // === ERRORS ===
            ("(1)", SpecificError("invalid application")),
            ("(\"f\" 1)", SpecificError("invalid application")),
            ("hello", SpecificError("Unbound variable: hello")),
            ("(set! undefined-var 1)", SpecificError("Unbound variable: undefined-var")),
            ("(define)", SpecificError("malformed define")),
            ("(set! x 1 1)", SpecificError("malformed set!")),
            ("(car)", Error),
            ("(lambda)", Error),
            ("(if)", Error),
        ];

        run_comprehensive_tests(test_cases);
    }

    #[test]
    fn test_stateful_environments() {
        let environments = vec![
            TestEnvironment(vec![
                ("(define x 1)", Rendered("x")),
                ("x", success(1)),
                ("(set! x 3)", EvalResult(Value::Undefined)),
                ("x", success(3)),
            ]),
            TestEnvironment(vec![
                ("(define x 4)", Rendered("x")),
                ("((lambda (x) (set! x 3) x) 2)", success(3)),
                ("x", success(4)),
            ]),
            TestEnvironment(vec![
                ("((lambda (x) (define y 1) 1) 1)", success(1)),
                ("y", SpecificError("Unbound variable: y")),
            ]),
            TestEnvironment(vec![
                ("(begin (define x 2) (set! x 3) x)", success(3)),
                ("x", success(3)),
            ]),
            TestEnvironment(vec![
                ("(define x 1)", Rendered("x")),
                ("(define (f) x)", Rendered("f")),
                ("(define (g x) (f))", Rendered("g")),
                ("(g 2)", success(1)),
                ("(let ((x 2) (y x)) y)", success(1)),
            ]),
            TestEnvironment(vec![
                ("(define (fact n) (if (= n 0) 1 (* n (fact (- n 1)))))", Rendered("fact")),
                ("fact", Rendered("#<closure fact>")),
                ("(fact 10)", success(3_628_800)),
            ]),
            TestEnvironment(vec![
                (
                    "(define (make-counter) (define n 0) (lambda () (set! n (+ n 1)) n))",
                    Rendered("make-counter"),
                ),
                ("(define c1 (make-counter))", Rendered("c1")),
                ("(define c2 (make-counter))", Rendered("c2")),
                ("(c1)", success(1)),
                ("(c1)", success(2)),
                ("(c2)", success(1)),
            ]),
            TestEnvironment(vec![
                ("(define p (cons 3 2))", Rendered("p")),
                ("(set-car! p 1)", EvalResult(Value::Undefined)),
                ("(set-cdr! p '(2))", EvalResult(Value::Undefined)),
                ("p", Rendered("(1 2)")),
            ]),
            TestEnvironment(vec![
                ("(define s \"\")", Rendered("s")),
                (
                    "(do ((i 1 (+ i 1)) (j 1 i)) ((> i 3)) (set! s (string-append s (number->string j) (number->string i))))",
                    success(true),
                ),
                ("s", Rendered("\"111223\"")),
            ]),
            // Syntax forms are first-class values
            TestEnvironment(vec![
                ("(define my-if if)", Rendered("my-if")),
                ("my-if", Rendered("#<syntax if>")),
                ("(my-if #t 1 (car ()))", success(1)),
                ("(define my-quote quote)", Rendered("my-quote")),
                ("(my-quote (a b))", Rendered("(a b)")),
                ("(my-quote (lambda (x) x))", Rendered("(lambda (x) x)")),
                ("(my-quote 'a)", Rendered("(quote a)")),
                ("(my-quote (lambda (x) 'a))", Rendered("(lambda (x) (quote a))")),
                ("(eq? (car (my-quote 'a)) 'quote)", success(true)),
                ("((if #t + *) 2 3)", success(5)),
                ("(define my-cond cond)", Rendered("my-cond")),
                ("(my-cond (#f 1) (else 2))", success(2)),
                ("(my-cond)", SpecificError("at least one clause is required for cond: (cond)")),
                ("(my-cond 1)", SpecificError("bad clause in cond: (cond 1)")),
                ("(define my-define define)", Rendered("my-define")),
                ("(my-define z 10)", Rendered("z")),
                ("z", success(10)),
                ("((if #f and or) #f 7)", success(7)),
                ("((if #t begin and) 1 2)", success(2)),
            ]),
            TestEnvironment(vec![
                ("(define-macro (swap a b) (list b a))", Rendered("swap")),
                ("swap", Rendered("#<macro swap>")),
                ("(swap 1 2)", SpecificError("macro expansion is not supported: swap")),
            ]),
        ];

        run_tests_in_environment(environments);
    }

    #[test]
    fn test_depth_limit() {
        let env = create_global_env();
        let mut parser = Parser::new(
            "(define (loop n) (if (= n 0) 0 (+ 1 (loop (- n 1)))))",
            env.symbols(),
        );
        let def = parser.parse().unwrap().unwrap();
        eval(&def, &env, env.toplevel()).unwrap();

        let call = Parser::new("(loop 100)", env.symbols()).parse().unwrap().unwrap();
        let shallow = Frame::new(&env, env.toplevel(), 50);
        let err = shallow.eval(&call).unwrap_err();
        assert!(
            err.to_string().contains("evaluation depth limit exceeded (max: 50)"),
            "got {err}"
        );

        let deep = Frame::new(&env, env.toplevel(), 10_000);
        assert_eq!(deep.eval(&call).unwrap(), val(100));
    }

    #[test]
    fn test_activation_scopes_are_reclaimed() {
        let env = create_global_env();
        let before = env.scope_count();
        let programs = [
            "(define (id x) x)",
            "(do ((i 0 (+ i 1))) ((= i 500)) (id i))",
            "(define (inner-loop) (define (go n) (if (= n 0) 0 (go (- n 1)))) (go 3))",
            "(do ((i 0 (+ i 1))) ((= i 500)) (inner-loop))",
            "(do ((i 0 (+ i 1))) ((= i 10)) (define (local) i) (local))",
        ];
        for program in programs {
            eval_source(program, &env).unwrap();
            assert_eq!(env.scope_count(), before, "after {program}");
        }

        // A returned closure pins exactly the scope it was created in
        eval_source("(define (adder n) (lambda (m) (+ n m)))", &env).unwrap();
        eval_source("(define add2 (adder 2))", &env).unwrap();
        assert_eq!(eval_source("(add2 3)", &env).unwrap(), val(5));
        assert_eq!(env.scope_count(), before + 1);
        eval_source("(set! add2 #f)", &env).unwrap();
        assert_eq!(env.scope_count(), before);
    }

    #[test]
    fn test_apply_with_evaluated_arguments() {
        let env = create_global_env();
        let frame = Frame::new(&env, env.toplevel(), crate::MAX_EVAL_DEPTH);
        let plus = env.toplevel().resolve(&env.intern("+")).unwrap();
        assert_eq!(frame.apply(&plus, &[val(1), val(2)]).unwrap(), val(3));
        assert!(frame.apply(&val(1), &[]).is_err());
    }
}
