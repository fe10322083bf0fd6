//! This module defines the core value and syntax-tree types of the interpreter.
//! The main enum, [`Value`], is a closed sum type covering runtime data (numbers,
//! strings, symbols, pairs), procedures (closures, subroutines, first-class syntax
//! forms, actors) and the parsed special-form nodes the evaluator walks. Helper
//! functions such as [`val`], [`sym`] and [`nil`] make it easy to build data in code
//! and tests. Rendering follows Scheme conventions so that data round-trips through
//! the reader, and equality is structural for data and by identity for everything
//! else.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashSet;

use crate::actor::Actor;
use crate::builtinops::{Subroutine, SyntaxForm};
use crate::environment::Scope;

/// Type alias for number values in interpreter
pub type NumberType = i64;

/// An interned identifier.
///
/// Symbols produced by the same [`SymbolTable`] share one allocation per name, which
/// is what `eq?` compares. Hashing and `==` look at the text only.
#[derive(Clone)]
pub struct Symbol(Arc<str>);

impl Symbol {
    pub fn name(&self) -> &str {
        &self.0
    }

    /// Identity comparison, used by `eq?` and `memq`
    pub fn ptr_eq(&self, other: &Symbol) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl PartialEq for Symbol {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other) || self.0 == other.0
    }
}

impl Eq for Symbol {}

impl Hash for Symbol {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}

/// Creates a symbol outside of any table. Mostly useful in tests and for
/// building data that is compared with `equal?`.
impl From<&str> for Symbol {
    fn from(name: &str) -> Self {
        Symbol(Arc::from(name))
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{}", self.0)
    }
}

/// Per-session symbol interning.
///
/// Cloning the table yields another handle onto the same set, so actor threads
/// intern into the same table as the interpreter that spawned them.
#[derive(Clone, Default)]
pub struct SymbolTable {
    names: Arc<Mutex<FxHashSet<Arc<str>>>>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern(&self, name: &str) -> Symbol {
        let mut names = self.names.lock();
        if let Some(existing) = names.get(name) {
            return Symbol(Arc::clone(existing));
        }
        let fresh: Arc<str> = Arc::from(name);
        names.insert(Arc::clone(&fresh));
        Symbol(fresh)
    }

    pub fn len(&self) -> usize {
        self.names.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A mutable cons cell
pub struct Pair {
    car: RwLock<Value>,
    cdr: RwLock<Value>,
}

impl Pair {
    pub fn new(car: Value, cdr: Value) -> Self {
        Pair {
            car: RwLock::new(car),
            cdr: RwLock::new(cdr),
        }
    }

    pub fn car(&self) -> Value {
        self.car.read().clone()
    }

    pub fn cdr(&self) -> Value {
        self.cdr.read().clone()
    }

    pub fn set_car(&self, value: Value) {
        *self.car.write() = value;
    }

    pub fn set_cdr(&self, value: Value) {
        *self.cdr.write() = value;
    }
}

/// Unlinks the cdr chain one cell at a time, so dropping a long list does not
/// recurse once per element.
impl Drop for Pair {
    fn drop(&mut self) {
        let mut tail = std::mem::replace(self.cdr.get_mut(), Value::Null);
        while let Value::Pair(pair) = tail {
            match Arc::try_unwrap(pair) {
                Ok(mut next) => tail = std::mem::replace(next.cdr.get_mut(), Value::Null),
                // Still shared; whoever else holds it drops the rest
                Err(_) => break,
            }
        }
    }
}

/// A parsed `lambda` (also produced by `define` sugar and `let` desugaring)
#[derive(Debug)]
pub struct Lambda {
    /// Set when the lambda was introduced by `(define (name ...) ...)`
    pub name: Option<Symbol>,
    pub params: Vec<Symbol>,
    pub body: Vec<Value>,
}

/// A lambda paired with the scope it was evaluated in
#[derive(Debug)]
pub struct Closure {
    pub lambda: Arc<Lambda>,
    pub scope: Scope,
}

impl Closure {
    pub fn name(&self) -> Option<&Symbol> {
        self.lambda.name.as_ref()
    }
}

#[derive(Debug)]
pub struct Application {
    pub operator: Value,
    pub arguments: Vec<Value>,
}

#[derive(Debug)]
pub struct Definition {
    pub name: Symbol,
    pub value: Value,
}

#[derive(Debug)]
pub struct Assignment {
    pub name: Symbol,
    pub value: Value,
}

#[derive(Debug)]
pub struct Conditional {
    pub test: Value,
    pub consequent: Value,
    pub alternative: Option<Value>,
}

/// One `cond` clause; `test` is `None` for the `else` clause
#[derive(Debug)]
pub struct CondClause {
    pub test: Option<Value>,
    pub body: Vec<Value>,
}

#[derive(Debug)]
pub struct DoIterator {
    pub variable: Symbol,
    pub init: Value,
    pub step: Option<Value>,
}

#[derive(Debug)]
pub struct DoLoop {
    pub iterators: Vec<DoIterator>,
    pub test: Value,
    pub result: Vec<Value>,
    pub commands: Vec<Value>,
}

/// A message handler declared inside an `actor` form
#[derive(Debug)]
pub struct HandlerForm {
    pub tag: Arc<str>,
    pub params: Vec<Symbol>,
    pub body: Vec<Value>,
}

#[derive(Debug)]
pub struct ActorForm {
    pub handlers: Vec<HandlerForm>,
}

/// Placeholder bound by `define-macro`; expansion is not supported
#[derive(Debug)]
pub struct Macro {
    pub name: Symbol,
    pub params: Vec<Symbol>,
    pub body: Vec<Value>,
}

/// Core value type of the interpreter.
///
/// Data variants are self-evaluating. Syntax variants are produced by the parser
/// and consumed by the evaluator; they can only reach user code through `quote`
/// of a first-class syntax form, where they render back to source text.
#[derive(Clone)]
pub enum Value {
    /// Numbers (integers only)
    Number(NumberType),
    Boolean(bool),
    /// String literals; identity is the allocation
    String(Arc<str>),
    /// Quoted identifiers
    Symbol(Symbol),
    /// The empty list
    Null,
    Pair(Arc<Pair>),
    /// Reference to a binding, resolved at evaluation time
    Variable(Symbol),
    Closure(Arc<Closure>),
    Subroutine(Arc<Subroutine>),
    Syntax(&'static SyntaxForm),
    Macro(Arc<Macro>),
    Actor(Arc<Actor>),
    Application(Arc<Application>),
    Lambda(Arc<Lambda>),
    Definition(Arc<Definition>),
    MacroDefinition(Arc<Macro>),
    Set(Arc<Assignment>),
    If(Arc<Conditional>),
    Cond(Arc<Vec<CondClause>>),
    And(Arc<Vec<Value>>),
    Or(Arc<Vec<Value>>),
    Begin(Arc<Vec<Value>>),
    Do(Arc<DoLoop>),
    ActorDefinition(Arc<ActorForm>),
    /// Result of forms with no useful value, such as `set!`
    Undefined,
}

impl Value {
    /// Only `#f` is false
    pub fn is_true(&self) -> bool {
        !matches!(self, Value::Boolean(false))
    }

    pub fn cons(car: Value, cdr: Value) -> Value {
        Value::Pair(Arc::new(Pair::new(car, cdr)))
    }

    /// Build a proper list from elements
    pub fn list(elements: Vec<Value>) -> Value {
        Self::list_with_tail(elements, Value::Null)
    }

    /// Build a list whose final cdr is `tail` (improper unless `tail` is a list)
    pub fn list_with_tail(elements: Vec<Value>, tail: Value) -> Value {
        elements
            .into_iter()
            .rev()
            .fold(tail, |acc, element| Value::cons(element, acc))
    }

    /// Elements of a proper list, or `None` for anything else
    pub fn list_elements(&self) -> Option<Vec<Value>> {
        let mut elements = Vec::new();
        let mut current = self.clone();
        loop {
            match current {
                Value::Null => return Some(elements),
                Value::Pair(pair) => {
                    elements.push(pair.car());
                    current = pair.cdr();
                }
                _ => return None,
            }
        }
    }

    pub fn is_list(&self) -> bool {
        self.list_length().is_some()
    }

    pub fn list_length(&self) -> Option<usize> {
        let mut length = 0;
        let mut current = self.clone();
        loop {
            match current {
                Value::Null => return Some(length),
                Value::Pair(pair) => {
                    length += 1;
                    current = pair.cdr();
                }
                _ => return None,
            }
        }
    }

    pub fn is_procedure(&self) -> bool {
        matches!(self, Value::Closure(_) | Value::Subroutine(_))
    }

    /// Identity as seen by `eq?`: numbers and booleans compare by value, symbols by
    /// interned identity, everything else by allocation.
    pub fn is_identical(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Symbol(a), Value::Symbol(b)) => a.ptr_eq(b),
            (Value::Null, Value::Null) | (Value::Undefined, Value::Undefined) => true,
            (Value::String(a), Value::String(b)) => Arc::ptr_eq(a, b),
            (Value::Syntax(a), Value::Syntax(b)) => std::ptr::eq(*a, *b),
            _ => self.same_allocation(other),
        }
    }

    /// Equivalence as seen by `equal?`: pairs are compared element-wise, leaves
    /// with [`Value::is_identical`].
    pub fn is_equal(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Pair(_), Value::Pair(_)) => self.spine_eq(other, Value::is_equal),
            _ => self.is_identical(other),
        }
    }

    /// Compare two lists cell by cell along the cdr chain, applying `same` to the
    /// cars and to the final tails. Only the cars recurse.
    fn spine_eq(&self, other: &Value, same: impl Fn(&Value, &Value) -> bool) -> bool {
        let mut left = self.clone();
        let mut right = other.clone();
        loop {
            let (next_left, next_right) = match (&left, &right) {
                (Value::Pair(a), Value::Pair(b)) => {
                    if Arc::ptr_eq(a, b) {
                        return true;
                    }
                    if !same(&a.car(), &b.car()) {
                        return false;
                    }
                    (a.cdr(), b.cdr())
                }
                _ => return same(&left, &right),
            };
            left = next_left;
            right = next_right;
        }
    }

    fn same_allocation(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Pair(a), Value::Pair(b)) => Arc::ptr_eq(a, b),
            (Value::Closure(a), Value::Closure(b)) => Arc::ptr_eq(a, b),
            (Value::Subroutine(a), Value::Subroutine(b)) => Arc::ptr_eq(a, b),
            (Value::Macro(a), Value::Macro(b)) => Arc::ptr_eq(a, b),
            (Value::Actor(a), Value::Actor(b)) => Arc::ptr_eq(a, b),
            (Value::Application(a), Value::Application(b)) => Arc::ptr_eq(a, b),
            (Value::Lambda(a), Value::Lambda(b)) => Arc::ptr_eq(a, b),
            (Value::Definition(a), Value::Definition(b)) => Arc::ptr_eq(a, b),
            (Value::MacroDefinition(a), Value::MacroDefinition(b)) => Arc::ptr_eq(a, b),
            (Value::Set(a), Value::Set(b)) => Arc::ptr_eq(a, b),
            (Value::If(a), Value::If(b)) => Arc::ptr_eq(a, b),
            (Value::Cond(a), Value::Cond(b)) => Arc::ptr_eq(a, b),
            (Value::And(a), Value::And(b))
            | (Value::Or(a), Value::Or(b))
            | (Value::Begin(a), Value::Begin(b)) => Arc::ptr_eq(a, b),
            (Value::Do(a), Value::Do(b)) => Arc::ptr_eq(a, b),
            (Value::ActorDefinition(a), Value::ActorDefinition(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

/// Structural for data, identity for procedures and syntax nodes
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Symbol(a), Value::Symbol(b)) | (Value::Variable(a), Value::Variable(b)) => {
                a == b
            }
            (Value::Null, Value::Null) | (Value::Undefined, Value::Undefined) => true,
            (Value::Pair(_), Value::Pair(_)) => self.spine_eq(other, |a, b| a == b),
            _ => self.is_identical(other),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(Arc::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(Arc::from(s))
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<NumberType> for Value {
    fn from(n: NumberType) -> Self {
        Value::Number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(NumberType::from(n))
    }
}

impl From<Symbol> for Value {
    fn from(s: Symbol) -> Self {
        Value::Symbol(s)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::list(v.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>, const N: usize> From<[T; N]> for Value {
    fn from(arr: [T; N]) -> Self {
        Value::list(arr.into_iter().map(Into::into).collect())
    }
}

/// Helper function for creating values
pub fn val<T: Into<Value>>(value: T) -> Value {
    value.into()
}

/// Helper function for creating (uninterned) symbols
pub fn sym(name: &str) -> Value {
    Value::Symbol(Symbol::from(name))
}

/// Helper function for the empty list
pub fn nil() -> Value {
    Value::Null
}

fn write_string_literal(f: &mut fmt::Formatter<'_>, s: &str) -> fmt::Result {
    f.write_str("\"")?;
    for c in s.chars() {
        match c {
            '"' => f.write_str("\\\"")?,
            '\\' => f.write_str("\\\\")?,
            '\n' => f.write_str("\\n")?,
            '\t' => f.write_str("\\t")?,
            '\r' => f.write_str("\\r")?,
            other => write!(f, "{other}")?,
        }
    }
    f.write_str("\"")
}

/// Renders a subexpression. Unlike the toplevel rendering, a nested `'x` keeps
/// its quote as `(quote x)`, so the text reads back to the same tree.
struct Nested<'a>(&'a Value);

impl fmt::Display for Nested<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Value::Application(app) => match (&app.operator, app.arguments.as_slice()) {
                (Value::Syntax(form), [datum]) if form.name == "quote" => {
                    write!(f, "(quote {})", Nested(datum))
                }
                _ => fmt::Display::fmt(self.0, f),
            },
            other => fmt::Display::fmt(other, f),
        }
    }
}

fn write_spaced(f: &mut fmt::Formatter<'_>, items: &[Value]) -> fmt::Result {
    for item in items {
        write!(f, " {}", Nested(item))?;
    }
    Ok(())
}

fn write_params(f: &mut fmt::Formatter<'_>, params: &[Symbol]) -> fmt::Result {
    f.write_str("(")?;
    for (i, param) in params.iter().enumerate() {
        if i > 0 {
            f.write_str(" ")?;
        }
        write!(f, "{param}")?;
    }
    f.write_str(")")
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Number(n) => write!(f, "{n}"),
            Value::Boolean(true) => f.write_str("#t"),
            Value::Boolean(false) => f.write_str("#f"),
            Value::String(s) => write_string_literal(f, s),
            Value::Symbol(s) | Value::Variable(s) => write!(f, "{s}"),
            Value::Null => f.write_str("()"),
            Value::Pair(pair) => {
                write!(f, "({}", pair.car())?;
                let mut tail = pair.cdr();
                loop {
                    match tail {
                        Value::Null => break,
                        Value::Pair(next) => {
                            write!(f, " {}", next.car())?;
                            tail = next.cdr();
                        }
                        other => {
                            write!(f, " . {other}")?;
                            break;
                        }
                    }
                }
                f.write_str(")")
            }
            Value::Closure(closure) => match closure.name() {
                Some(name) => write!(f, "#<closure {name}>"),
                None => f.write_str("#<closure #f>"),
            },
            Value::Subroutine(subr) => write!(f, "#<subr {}>", subr.name),
            Value::Syntax(form) => write!(f, "#<syntax {}>", form.name),
            Value::Macro(m) => write!(f, "#<macro {}>", m.name),
            Value::Actor(_) => f.write_str("#<actor #f>"),
            Value::Application(app) => match (&app.operator, app.arguments.as_slice()) {
                // 'x renders as its datum
                (Value::Syntax(form), [datum]) if form.name == "quote" => write!(f, "{datum}"),
                (operator, arguments) => {
                    write!(f, "({}", Nested(operator))?;
                    write_spaced(f, arguments)?;
                    f.write_str(")")
                }
            },
            Value::Lambda(lambda) => {
                f.write_str("(lambda ")?;
                write_params(f, &lambda.params)?;
                write_spaced(f, &lambda.body)?;
                f.write_str(")")
            }
            Value::Definition(def) => write!(f, "(define {} {})", def.name, Nested(&def.value)),
            Value::MacroDefinition(m) => {
                write!(f, "(define-macro ({}", m.name)?;
                for param in &m.params {
                    write!(f, " {param}")?;
                }
                f.write_str(")")?;
                write_spaced(f, &m.body)?;
                f.write_str(")")
            }
            Value::Set(set) => write!(f, "(set! {} {})", set.name, Nested(&set.value)),
            Value::If(cond) => {
                write!(f, "(if {} {}", Nested(&cond.test), Nested(&cond.consequent))?;
                if let Some(alternative) = &cond.alternative {
                    write!(f, " {}", Nested(alternative))?;
                }
                f.write_str(")")
            }
            Value::Cond(clauses) => {
                f.write_str("(cond")?;
                for clause in clauses.iter() {
                    match &clause.test {
                        Some(test) => write!(f, " ({}", Nested(test))?,
                        None => f.write_str(" (else")?,
                    }
                    write_spaced(f, &clause.body)?;
                    f.write_str(")")?;
                }
                f.write_str(")")
            }
            Value::And(exprs) => {
                f.write_str("(and")?;
                write_spaced(f, exprs)?;
                f.write_str(")")
            }
            Value::Or(exprs) => {
                f.write_str("(or")?;
                write_spaced(f, exprs)?;
                f.write_str(")")
            }
            Value::Begin(exprs) => {
                f.write_str("(begin")?;
                write_spaced(f, exprs)?;
                f.write_str(")")
            }
            Value::Do(do_loop) => {
                f.write_str("(do (")?;
                for (i, iterator) in do_loop.iterators.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    write!(f, "({} {}", iterator.variable, Nested(&iterator.init))?;
                    if let Some(step) = &iterator.step {
                        write!(f, " {}", Nested(step))?;
                    }
                    f.write_str(")")?;
                }
                write!(f, ") ({}", Nested(&do_loop.test))?;
                write_spaced(f, &do_loop.result)?;
                f.write_str(")")?;
                write_spaced(f, &do_loop.commands)?;
                f.write_str(")")
            }
            Value::ActorDefinition(form) => {
                f.write_str("(actor")?;
                for handler in &form.handlers {
                    f.write_str(" ((")?;
                    write_string_literal(f, &handler.tag)?;
                    for param in &handler.params {
                        write!(f, " {param}")?;
                    }
                    f.write_str(")")?;
                    write_spaced(f, &handler.body)?;
                    f.write_str(")")?;
                }
                f.write_str(")")
            }
            Value::Undefined => f.write_str("#<undef>"),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Number(n) => write!(f, "Number({n})"),
            Value::Boolean(b) => write!(f, "Boolean({b})"),
            Value::String(s) => write!(f, "String({s:?})"),
            Value::Symbol(s) => write!(f, "Symbol({s})"),
            Value::Variable(s) => write!(f, "Variable({s})"),
            Value::Null => write!(f, "Null"),
            Value::Pair(_) => write!(f, "List{self}"),
            Value::Undefined => write!(f, "Undefined"),
            other => write!(f, "{other}"),
        }
    }
}
