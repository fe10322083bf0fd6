//! Built-in subroutines and first-class syntax forms.
//!
//! Subroutines are ordinary procedures: the evaluator checks their [`Arity`] against
//! the call site, evaluates the arguments left to right and hands them over. Syntax
//! forms receive their arguments unevaluated, which is what lets `(define my-if if)`
//! work.
//!
//! ```scheme
//! (+ 1 2 3)                  ; => 6
//! (memq 'b '(a b c))         ; => (b c)
//! (string-append "a" "b")    ; => "ab"
//! ((if #t + *) 2 3)          ; => 5
//! ```
//!
//! ## Adding New Operations
//!
//! 1. **Implement the function** with the [`SubroutineFn`] signature
//! 2. **Add it to BUILTIN_SUBROUTINES** with its Scheme name and arity
//! 3. **Add tests** covering the error cases as well as the happy path
//!
//! Embedders can register additional subroutines at runtime through
//! [`Environment::register_subroutine`].

use std::fmt;
use std::path::Path;
use std::sync::{Arc, LazyLock};

use crate::Error;
use crate::ast::{NumberType, Value};
use crate::environment::Environment;
use crate::evaluator::{
    Frame, syntax_and, syntax_begin, syntax_cond, syntax_define, syntax_if, syntax_or,
    syntax_quote, syntax_set,
};
use crate::parser::Parser;

/// Expected number of arguments of a subroutine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exact(usize),
    AtLeast(usize),
    Any,
}

impl Arity {
    pub fn validate(&self, name: &str, got: usize) -> Result<(), Error> {
        let ok = match *self {
            Arity::Exact(n) => got == n,
            Arity::AtLeast(n) => got >= n,
            Arity::Any => true,
        };
        if ok {
            Ok(())
        } else {
            Err(Error::arity_error(name, *self, got))
        }
    }
}

/// Signature of a built-in procedure; receives evaluated arguments
pub type SubroutineFn = fn(&Frame<'_>, &[Value]) -> Result<Value, Error>;

/// Signature of a syntax form; receives unevaluated arguments
pub type SyntaxFn = fn(&Frame<'_>, &[Value]) -> Result<Value, Error>;

pub struct Subroutine {
    pub name: String,
    pub arity: Arity,
    pub func: SubroutineFn,
}

impl fmt::Debug for Subroutine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Subroutine({}, {:?})", self.name, self.arity)
    }
}

pub struct SyntaxForm {
    pub name: &'static str,
    pub func: SyntaxFn,
}

impl fmt::Debug for SyntaxForm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SyntaxForm({})", self.name)
    }
}

pub static QUOTE_FORM: SyntaxForm = SyntaxForm {
    name: "quote",
    func: syntax_quote,
};

static AND_FORM: SyntaxForm = SyntaxForm {
    name: "and",
    func: syntax_and,
};

static BEGIN_FORM: SyntaxForm = SyntaxForm {
    name: "begin",
    func: syntax_begin,
};

static COND_FORM: SyntaxForm = SyntaxForm {
    name: "cond",
    func: syntax_cond,
};

static DEFINE_FORM: SyntaxForm = SyntaxForm {
    name: "define",
    func: syntax_define,
};

static IF_FORM: SyntaxForm = SyntaxForm {
    name: "if",
    func: syntax_if,
};

static OR_FORM: SyntaxForm = SyntaxForm {
    name: "or",
    func: syntax_or,
};

static SET_FORM: SyntaxForm = SyntaxForm {
    name: "set!",
    func: syntax_set,
};

/// Syntax forms bound in the toplevel scope
pub static SYNTAX_FORMS: [&SyntaxForm; 8] = [
    &AND_FORM,
    &BEGIN_FORM,
    &COND_FORM,
    &DEFINE_FORM,
    &IF_FORM,
    &OR_FORM,
    &QUOTE_FORM,
    &SET_FORM,
];

pub fn find_syntax_form(name: &str) -> Option<&'static SyntaxForm> {
    SYNTAX_FORMS.iter().copied().find(|form| form.name == name)
}

//
// Argument helpers
//

fn number(value: &Value) -> Result<NumberType, Error> {
    match value {
        Value::Number(n) => Ok(*n),
        other => Err(Error::type_error("number", other)),
    }
}

fn string(value: &Value) -> Result<&str, Error> {
    match value {
        Value::String(s) => Ok(&s[..]),
        other => Err(Error::type_error("string", other)),
    }
}

fn improper_list() -> Error {
    Error::CompileError("proper list required for function application or macro use".into())
}

fn proper_list(value: &Value) -> Result<Vec<Value>, Error> {
    value.list_elements().ok_or_else(improper_list)
}

//
// Builtin Subroutine Implementations
//

fn builtin_add(_frame: &Frame<'_>, args: &[Value]) -> Result<Value, Error> {
    let mut sum: NumberType = 0;
    for arg in args {
        sum = sum
            .checked_add(number(arg)?)
            .ok_or_else(|| Error::RuntimeError("integer overflow in addition".into()))?;
    }
    Ok(Value::Number(sum))
}

fn builtin_mul(_frame: &Frame<'_>, args: &[Value]) -> Result<Value, Error> {
    let mut product: NumberType = 1;
    for arg in args {
        product = product
            .checked_mul(number(arg)?)
            .ok_or_else(|| Error::RuntimeError("integer overflow in multiplication".into()))?;
    }
    Ok(Value::Number(product))
}

/// `(- a b c)` is `a - b - c`; a single argument is returned unchanged
fn builtin_sub(_frame: &Frame<'_>, args: &[Value]) -> Result<Value, Error> {
    let Some((first, rest)) = args.split_first() else {
        return Err(Error::arity_error("-", Arity::AtLeast(1), 0));
    };
    let mut result = number(first)?;
    for arg in rest {
        result = result
            .checked_sub(number(arg)?)
            .ok_or_else(|| Error::RuntimeError("integer overflow in subtraction".into()))?;
    }
    Ok(Value::Number(result))
}

/// Integer quotient, truncating toward zero
fn builtin_div(_frame: &Frame<'_>, args: &[Value]) -> Result<Value, Error> {
    let Some((first, rest)) = args.split_first() else {
        return Err(Error::arity_error("/", Arity::AtLeast(1), 0));
    };
    let mut result = number(first)?;
    for arg in rest {
        let divisor = number(arg)?;
        if divisor == 0 {
            return Err(Error::RuntimeError("division by zero".into()));
        }
        result = result
            .checked_div(divisor)
            .ok_or_else(|| Error::RuntimeError("integer overflow in division".into()))?;
    }
    Ok(Value::Number(result))
}

// Macro to generate chained numeric comparisons
macro_rules! numeric_comparison {
    ($name:ident, $op:tt) => {
        fn $name(_frame: &Frame<'_>, args: &[Value]) -> Result<Value, Error> {
            let numbers = args.iter().map(number).collect::<Result<Vec<_>, _>>()?;
            Ok(Value::Boolean(numbers.windows(2).all(|w| w[0] $op w[1])))
        }
    };
}

numeric_comparison!(builtin_num_eq, ==);
numeric_comparison!(builtin_lt, <);
numeric_comparison!(builtin_le, <=);
numeric_comparison!(builtin_gt, >);
numeric_comparison!(builtin_ge, >=);

// Macro to generate single-argument type predicates
macro_rules! type_predicate {
    ($name:ident, $scheme_name:literal, $check:expr) => {
        fn $name(_frame: &Frame<'_>, args: &[Value]) -> Result<Value, Error> {
            let check: fn(&Value) -> bool = $check;
            match args {
                [value] => Ok(Value::Boolean(check(value))),
                _ => Err(Error::arity_error($scheme_name, Arity::Exact(1), args.len())),
            }
        }
    };
}

type_predicate!(builtin_is_number, "number?", |v| matches!(v, Value::Number(_)));
type_predicate!(builtin_is_null, "null?", |v| matches!(v, Value::Null));
type_predicate!(builtin_is_procedure, "procedure?", Value::is_procedure);
type_predicate!(builtin_is_boolean, "boolean?", |v| matches!(v, Value::Boolean(_)));
type_predicate!(builtin_is_pair, "pair?", |v| matches!(v, Value::Pair(_)));
type_predicate!(builtin_is_list, "list?", Value::is_list);
type_predicate!(builtin_is_symbol, "symbol?", |v| matches!(v, Value::Symbol(_)));
type_predicate!(builtin_is_string, "string?", |v| matches!(v, Value::String(_)));
type_predicate!(builtin_not, "not", |v| !v.is_true());

fn builtin_cons(_frame: &Frame<'_>, args: &[Value]) -> Result<Value, Error> {
    match args {
        [car, cdr] => Ok(Value::cons(car.clone(), cdr.clone())),
        _ => Err(Error::arity_error("cons", Arity::Exact(2), args.len())),
    }
}

fn builtin_car(_frame: &Frame<'_>, args: &[Value]) -> Result<Value, Error> {
    match args {
        [Value::Pair(pair)] => Ok(pair.car()),
        [other] => Err(Error::type_error("pair", other)),
        _ => Err(Error::arity_error("car", Arity::Exact(1), args.len())),
    }
}

fn builtin_cdr(_frame: &Frame<'_>, args: &[Value]) -> Result<Value, Error> {
    match args {
        [Value::Pair(pair)] => Ok(pair.cdr()),
        [other] => Err(Error::type_error("pair", other)),
        _ => Err(Error::arity_error("cdr", Arity::Exact(1), args.len())),
    }
}

fn builtin_set_car(_frame: &Frame<'_>, args: &[Value]) -> Result<Value, Error> {
    match args {
        [Value::Pair(pair), value] => {
            pair.set_car(value.clone());
            Ok(Value::Undefined)
        }
        [other, _] => Err(Error::type_error("pair", other)),
        _ => Err(Error::arity_error("set-car!", Arity::Exact(2), args.len())),
    }
}

fn builtin_set_cdr(_frame: &Frame<'_>, args: &[Value]) -> Result<Value, Error> {
    match args {
        [Value::Pair(pair), value] => {
            pair.set_cdr(value.clone());
            Ok(Value::Undefined)
        }
        [other, _] => Err(Error::type_error("pair", other)),
        _ => Err(Error::arity_error("set-cdr!", Arity::Exact(2), args.len())),
    }
}

fn builtin_list(_frame: &Frame<'_>, args: &[Value]) -> Result<Value, Error> {
    Ok(Value::list(args.to_vec()))
}

fn builtin_length(_frame: &Frame<'_>, args: &[Value]) -> Result<Value, Error> {
    match args {
        [list] => {
            let length = list.list_length().ok_or_else(improper_list)?;
            NumberType::try_from(length)
                .map(Value::Number)
                .map_err(|_| Error::RuntimeError("list too long".into()))
        }
        _ => Err(Error::arity_error("length", Arity::Exact(1), args.len())),
    }
}

/// First sublist whose car is `eq?` to the key, or `#f`
fn builtin_memq(_frame: &Frame<'_>, args: &[Value]) -> Result<Value, Error> {
    let [key, list] = args else {
        return Err(Error::arity_error("memq", Arity::Exact(2), args.len()));
    };
    let mut current = list.clone();
    while let Value::Pair(pair) = &current {
        if pair.car().is_identical(key) {
            return Ok(current);
        }
        let next = pair.cdr();
        current = next;
    }
    Ok(Value::Boolean(false))
}

fn builtin_last(_frame: &Frame<'_>, args: &[Value]) -> Result<Value, Error> {
    match args {
        [list @ Value::Pair(_)] => proper_list(list)?
            .pop()
            .ok_or_else(|| Error::RuntimeError(format!("pair required: {list}"))),
        [other] => Err(Error::RuntimeError(format!("pair required: {other}"))),
        _ => Err(Error::arity_error("last", Arity::Exact(1), args.len())),
    }
}

/// All arguments but the last must be proper lists; the last becomes the tail
fn builtin_append(_frame: &Frame<'_>, args: &[Value]) -> Result<Value, Error> {
    let Some((tail, prefixes)) = args.split_last() else {
        return Ok(Value::Null);
    };
    let mut elements = Vec::new();
    for list in prefixes {
        elements.extend(proper_list(list)?);
    }
    Ok(Value::list_with_tail(elements, tail.clone()))
}

fn builtin_string_append(_frame: &Frame<'_>, args: &[Value]) -> Result<Value, Error> {
    let mut result = String::new();
    for arg in args {
        result.push_str(string(arg)?);
    }
    Ok(Value::from(result))
}

fn builtin_symbol_to_string(_frame: &Frame<'_>, args: &[Value]) -> Result<Value, Error> {
    match args {
        [Value::Symbol(symbol)] => Ok(Value::from(symbol.name())),
        [other] => Err(Error::type_error("symbol", other)),
        _ => Err(Error::arity_error("symbol->string", Arity::Exact(1), args.len())),
    }
}

fn builtin_string_to_symbol(frame: &Frame<'_>, args: &[Value]) -> Result<Value, Error> {
    match args {
        [value] => Ok(Value::Symbol(frame.env().intern(string(value)?))),
        _ => Err(Error::arity_error("string->symbol", Arity::Exact(1), args.len())),
    }
}

fn builtin_number_to_string(_frame: &Frame<'_>, args: &[Value]) -> Result<Value, Error> {
    match args {
        [value] => Ok(Value::from(number(value)?.to_string())),
        _ => Err(Error::arity_error("number->string", Arity::Exact(1), args.len())),
    }
}

/// `#f` when the text is not an integer literal
fn builtin_string_to_number(_frame: &Frame<'_>, args: &[Value]) -> Result<Value, Error> {
    match args {
        [value] => Ok(string(value)?
            .parse::<NumberType>()
            .map_or(Value::Boolean(false), Value::Number)),
        _ => Err(Error::arity_error("string->number", Arity::Exact(1), args.len())),
    }
}

fn builtin_eq(_frame: &Frame<'_>, args: &[Value]) -> Result<Value, Error> {
    match args {
        [a, b] => Ok(Value::Boolean(a.is_identical(b))),
        _ => Err(Error::arity_error("eq?", Arity::Exact(2), args.len())),
    }
}

fn builtin_neq(_frame: &Frame<'_>, args: &[Value]) -> Result<Value, Error> {
    match args {
        [a, b] => Ok(Value::Boolean(!a.is_identical(b))),
        _ => Err(Error::arity_error("neq?", Arity::Exact(2), args.len())),
    }
}

fn builtin_equal(_frame: &Frame<'_>, args: &[Value]) -> Result<Value, Error> {
    match args {
        [a, b] => Ok(Value::Boolean(a.is_equal(b))),
        _ => Err(Error::arity_error("equal?", Arity::Exact(2), args.len())),
    }
}

fn builtin_load(frame: &Frame<'_>, args: &[Value]) -> Result<Value, Error> {
    match args {
        [path] => load_path(frame, Path::new(string(path)?)),
        _ => Err(Error::arity_error("load", Arity::Exact(1), args.len())),
    }
}

/// Evaluate every form of a file in the frame's scope.
///
/// Stops at the first failing form; bindings made before it are kept.
pub fn load_path(frame: &Frame<'_>, path: &Path) -> Result<Value, Error> {
    let source = std::fs::read_to_string(path)
        .map_err(|_| Error::RuntimeError(format!("cannot find \"{}\"", path.display())))?;
    tracing::debug!(path = %path.display(), "loading source file");

    let mut parser = Parser::new(&source, frame.env().symbols());
    while let Some(expr) = parser.parse()? {
        frame.eval(&expr)?;
    }
    Ok(Value::Boolean(true))
}

fn subroutine(name: &str, arity: Arity, func: SubroutineFn) -> Arc<Subroutine> {
    Arc::new(Subroutine {
        name: name.to_owned(),
        arity,
        func,
    })
}

/// Global registry of built-in subroutines
static BUILTIN_SUBROUTINES: LazyLock<Vec<Arc<Subroutine>>> = LazyLock::new(|| {
    vec![
        subroutine("+", Arity::Any, builtin_add),
        subroutine("-", Arity::AtLeast(1), builtin_sub),
        subroutine("*", Arity::Any, builtin_mul),
        subroutine("/", Arity::AtLeast(1), builtin_div),
        subroutine("=", Arity::AtLeast(2), builtin_num_eq),
        subroutine("<", Arity::AtLeast(2), builtin_lt),
        subroutine("<=", Arity::AtLeast(2), builtin_le),
        subroutine(">", Arity::AtLeast(2), builtin_gt),
        subroutine(">=", Arity::AtLeast(2), builtin_ge),
        subroutine("number?", Arity::Exact(1), builtin_is_number),
        subroutine("null?", Arity::Exact(1), builtin_is_null),
        subroutine("procedure?", Arity::Exact(1), builtin_is_procedure),
        subroutine("boolean?", Arity::Exact(1), builtin_is_boolean),
        subroutine("pair?", Arity::Exact(1), builtin_is_pair),
        subroutine("list?", Arity::Exact(1), builtin_is_list),
        subroutine("symbol?", Arity::Exact(1), builtin_is_symbol),
        subroutine("string?", Arity::Exact(1), builtin_is_string),
        subroutine("not", Arity::Exact(1), builtin_not),
        subroutine("cons", Arity::Exact(2), builtin_cons),
        subroutine("car", Arity::Exact(1), builtin_car),
        subroutine("cdr", Arity::Exact(1), builtin_cdr),
        subroutine("set-car!", Arity::Exact(2), builtin_set_car),
        subroutine("set-cdr!", Arity::Exact(2), builtin_set_cdr),
        subroutine("list", Arity::Any, builtin_list),
        subroutine("length", Arity::Exact(1), builtin_length),
        subroutine("memq", Arity::Exact(2), builtin_memq),
        subroutine("last", Arity::Exact(1), builtin_last),
        subroutine("append", Arity::Any, builtin_append),
        subroutine("string-append", Arity::Any, builtin_string_append),
        subroutine("symbol->string", Arity::Exact(1), builtin_symbol_to_string),
        subroutine("string->symbol", Arity::Exact(1), builtin_string_to_symbol),
        subroutine("number->string", Arity::Exact(1), builtin_number_to_string),
        subroutine("string->number", Arity::Exact(1), builtin_string_to_number),
        subroutine("eq?", Arity::Exact(2), builtin_eq),
        subroutine("neq?", Arity::Exact(2), builtin_neq),
        subroutine("equal?", Arity::Exact(2), builtin_equal),
        subroutine("load", Arity::Exact(1), builtin_load),
    ]
});

pub fn get_builtin_subroutines() -> &'static [Arc<Subroutine>] {
    &BUILTIN_SUBROUTINES
}

pub fn find_subroutine(name: &str) -> Option<&'static Arc<Subroutine>> {
    BUILTIN_SUBROUTINES.iter().find(|subr| subr.name == name)
}

/// Create an environment whose toplevel binds every builtin subroutine and
/// syntax form
pub fn create_global_env() -> Environment {
    let env = Environment::new();
    for subr in get_builtin_subroutines() {
        let name = env.intern(&subr.name);
        env.toplevel().define(name, Value::Subroutine(Arc::clone(subr)));
    }
    for form in SYNTAX_FORMS {
        let name = env.intern(form.name);
        env.toplevel().define(name, Value::Syntax(form));
    }
    env
}

#[cfg(test)]
#[expect(clippy::unwrap_used)] // test code OK
mod tests {
    use super::*;
    use crate::ast::{nil, sym, val};

    fn call(name: &str, args: &[Value]) -> Result<Value, Error> {
        let env = create_global_env();
        let frame = Frame::new(&env, env.toplevel(), crate::MAX_EVAL_DEPTH);
        let subr = find_subroutine(name).unwrap();
        subr.arity.validate(&subr.name, args.len())?;
        (subr.func)(&frame, args)
    }

    #[test]
    fn test_registry_lookup() {
        assert!(find_subroutine("+").is_some());
        assert!(find_subroutine("string->symbol").is_some());
        assert!(find_subroutine("if").is_none());
        assert_eq!(find_syntax_form("quote").map(|f| f.name), Some("quote"));
        assert!(find_syntax_form("lambda").is_none());

        let env = create_global_env();
        let plus = env.toplevel().resolve(&env.intern("+")).unwrap();
        assert_eq!(plus.to_string(), "#<subr +>");
        let if_form = env.toplevel().resolve(&env.intern("if")).unwrap();
        assert_eq!(if_form.to_string(), "#<syntax if>");
    }

    #[test]
    fn test_arity_validation() {
        assert!(Arity::Exact(2).validate("cons", 2).is_ok());
        assert!(Arity::AtLeast(1).validate("-", 3).is_ok());
        assert!(Arity::Any.validate("+", 0).is_ok());

        let err = Arity::Exact(1).validate("null?", 2).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Compile Error: wrong number of arguments: null? requires 1, but got 2"
        );
        let err = Arity::AtLeast(1).validate("/", 0).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Compile Error: procedure requires at least 1 argument"
        );
    }

    #[test]
    fn test_builtin_calls_data_driven() {
        let cases: Vec<(&str, Vec<Value>, Result<Value, &str>)> = vec![
            ("+", vec![], Ok(val(0))),
            ("+", vec![val(1), val(20), val(300), val(4000)], Ok(val(4321))),
            ("+", vec![val(1), val(true)], Err("number required, but got #t")),
            ("+", vec![val(i64::MAX), val(1)], Err("overflow")),
            ("-", vec![val(1)], Ok(val(1))),
            ("-", vec![val(10), val(3), val(2)], Ok(val(5))),
            ("-", vec![], Err("at least 1 argument")),
            ("*", vec![], Ok(val(1))),
            ("*", vec![nil()], Err("number required, but got ()")),
            ("/", vec![val(1)], Ok(val(1))),
            ("/", vec![val(100), val(2)], Ok(val(50))),
            ("/", vec![val(7), val(2)], Ok(val(3))),
            ("/", vec![val(1), val(0)], Err("division by zero")),
            ("/", vec![val(i64::MIN), val(-1)], Err("overflow")),
            ("<", vec![val(1), val(2), val(3)], Ok(val(true))),
            ("<", vec![val(1), val(2), val(1)], Ok(val(false))),
            (">=", vec![val(1), val(1), val(1)], Ok(val(true))),
            ("=", vec![val(2), val(1)], Ok(val(false))),
            ("=", vec![val(1)], Err("at least 2 argument")),
            ("not", vec![val(false)], Ok(val(true))),
            ("not", vec![val(1)], Ok(val(false))),
            ("not", vec![nil()], Ok(val(false))),
            ("null?", vec![nil()], Ok(val(true))),
            ("null?", vec![val(1), val(2)], Err("null? requires 1, but got 2")),
            ("list?", vec![nil()], Ok(val(true))),
            ("list?", vec![Value::cons(val(1), val(2))], Ok(val(false))),
            ("pair?", vec![nil()], Ok(val(false))),
            ("symbol?", vec![sym("a")], Ok(val(true))),
            ("string?", vec![val("")], Ok(val(true))),
            ("boolean?", vec![val(false)], Ok(val(true))),
            ("cons", vec![val(1), val(2)], Ok(Value::cons(val(1), val(2)))),
            ("car", vec![val([1, 2])], Ok(val(1))),
            ("cdr", vec![val([1])], Ok(nil())),
            ("car", vec![nil()], Err("pair required, but got ()")),
            ("cdr", vec![nil()], Err("pair required, but got ()")),
            ("list", vec![], Ok(nil())),
            ("list", vec![val(1), val(2), val(3)], Ok(val([1, 2, 3]))),
            ("length", vec![nil()], Ok(val(0))),
            ("length", vec![val([1, 2])], Ok(val(2))),
            ("length", vec![Value::cons(val(1), val(2))], Err("proper list required")),
            ("last", vec![val([1, 2, 3])], Ok(val(3))),
            ("last", vec![nil()], Err("pair required: ()")),
            ("append", vec![], Ok(nil())),
            ("append", vec![val([1])], Ok(val([1]))),
            ("append", vec![val([1, 2]), val([3, 4])], Ok(val([1, 2, 3, 4]))),
            ("append", vec![nil(), val(1), nil()], Err("proper list required")),
            ("string-append", vec![], Ok(val(""))),
            ("string-append", vec![val("a"), val(" "), val("b")], Ok(val("a b"))),
            ("string-append", vec![val(false)], Err("string required, but got #f")),
            ("symbol->string", vec![sym("a")], Ok(val("a"))),
            ("symbol->string", vec![val("")], Err("symbol required, but got \"\"")),
            ("string->symbol", vec![val("a")], Ok(sym("a"))),
            ("string->symbol", vec![sym("hello")], Err("string required, but got hello")),
            ("number->string", vec![val(1)], Ok(val("1"))),
            ("number->string", vec![val("1")], Err("number required, but got \"1\"")),
            ("string->number", vec![val("1")], Ok(val(1))),
            ("string->number", vec![val("-42")], Ok(val(-42))),
            ("string->number", vec![val("abc")], Ok(val(false))),
            ("string->number", vec![val(1)], Err("string required, but got 1")),
            ("eq?", vec![val(1), val(1)], Ok(val(true))),
            ("eq?", vec![val(1), val(false)], Ok(val(false))),
            ("eq?", vec![val("foo"), val("foo")], Ok(val(false))),
            ("neq?", vec![val(1), val(2)], Ok(val(true))),
            ("equal?", vec![val([1, 2]), val([1, 2])], Ok(val(true))),
            ("equal?", vec![val([1, 1]), val([1, 2])], Ok(val(false))),
            ("equal?", vec![val("foo"), val("foo")], Ok(val(false))),
            ("load", vec![val("/nonexistent/file.scm")], Err("cannot find \"/nonexistent/file.scm\"")),
        ];

        for (name, args, expected) in cases {
            let result = call(name, &args);
            match (result, expected) {
                (Ok(actual), Ok(expected)) => {
                    assert_eq!(actual, expected, "({name} {args:?})");
                }
                (Err(err), Err(fragment)) => {
                    let msg = err.to_string();
                    assert!(
                        msg.contains(fragment),
                        "({name} {args:?}): error should contain '{fragment}', got: {msg}"
                    );
                }
                (actual, expected) => {
                    panic!("({name} {args:?}): expected {expected:?}, got {actual:?}");
                }
            }
        }
    }

    #[test]
    fn test_memq_returns_sublist() {
        let env = create_global_env();
        let a = Value::Symbol(env.intern("a"));
        let b = Value::Symbol(env.intern("b"));
        let c = Value::Symbol(env.intern("c"));
        let list = Value::list(vec![a.clone(), b.clone(), c.clone()]);

        let found = call("memq", &[b.clone(), list.clone()]).unwrap();
        assert_eq!(found.to_string(), "(b c)");
        let dotted = Value::cons(a.clone(), b);
        assert_eq!(call("memq", &[a, dotted]).unwrap().to_string(), "(a . b)");

        let d = Value::Symbol(env.intern("d"));
        assert_eq!(call("memq", &[d, list]).unwrap(), val(false));
    }

    #[test]
    fn test_set_car_and_cdr_mutate_in_place() {
        let pair = Value::cons(val(3), val(2));
        assert_eq!(
            call("set-car!", &[pair.clone(), val(1)]).unwrap(),
            Value::Undefined
        );
        assert_eq!(pair.to_string(), "(1 . 2)");
        call("set-cdr!", &[pair.clone(), val(9)]).unwrap();
        assert_eq!(pair.to_string(), "(1 . 9)");
        assert!(call("set-car!", &[val(1), val(2)]).is_err());
    }
}
