//! Lexical scopes.
//!
//! A [`Scope`] is a shared handle onto one frame of bindings plus a link to the
//! enclosing scope, so the chain from any scope is finite and ends at the toplevel.
//! Closures keep the scope they were created in alive; calling one creates a fresh
//! child of that scope, which is freed once nothing refers to it any more.
//!
//! Each scope sits behind its own lock because actors evaluate on their own threads.
//! A lock is held for one lookup or insert at a time, never across evaluation.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::Error;
use crate::ast::{Symbol, SymbolTable, Value};
use crate::builtinops::{Arity, Subroutine, SubroutineFn};

struct ScopeFrame {
    bindings: RwLock<FxHashMap<Symbol, Value>>,
    parent: Option<Scope>,
    live: Arc<AtomicUsize>,
}

impl Drop for ScopeFrame {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Handle to a scope. Clones refer to the same bindings.
#[derive(Clone)]
pub struct Scope(Arc<ScopeFrame>);

impl Scope {
    fn with_parent(parent: Option<Scope>, live: &Arc<AtomicUsize>) -> Self {
        live.fetch_add(1, Ordering::Relaxed);
        Scope(Arc::new(ScopeFrame {
            bindings: RwLock::new(FxHashMap::default()),
            parent,
            live: Arc::clone(live),
        }))
    }

    pub fn parent(&self) -> Option<&Scope> {
        self.0.parent.as_ref()
    }

    pub fn ptr_eq(&self, other: &Scope) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Bind `name` in this scope itself, replacing any existing binding here
    pub fn define(&self, name: Symbol, value: Value) {
        let previous = self.0.bindings.write().insert(name, value);
        drop(previous);
    }

    /// Overwrite the nearest binding of `name` visible from this scope.
    /// Never creates a binding.
    pub fn set(&self, name: &Symbol, value: Value) -> Result<(), Error> {
        let mut current = Some(self);
        while let Some(scope) = current {
            let mut bindings = scope.0.bindings.write();
            if let Some(slot) = bindings.get_mut(name) {
                let previous = std::mem::replace(slot, value);
                drop(bindings);
                drop(previous);
                return Ok(());
            }
            current = scope.parent();
        }
        Err(Error::UnboundVariable(name.to_string()))
    }

    /// Look up the nearest binding of `name` visible from this scope
    pub fn resolve(&self, name: &Symbol) -> Result<Value, Error> {
        let mut current = Some(self);
        while let Some(scope) = current {
            if let Some(value) = scope.0.bindings.read().get(name) {
                return Ok(value.clone());
            }
            current = scope.parent();
        }
        Err(Error::UnboundVariable(name.to_string()))
    }

    /// All bindings visible from this scope, innermost first wins, sorted by name
    pub fn bindings(&self) -> Vec<(String, Value)> {
        let mut visible: FxHashMap<String, Value> = FxHashMap::default();
        let mut current = Some(self);
        while let Some(scope) = current {
            for (name, value) in scope.0.bindings.read().iter() {
                visible
                    .entry(name.to_string())
                    .or_insert_with(|| value.clone());
            }
            current = scope.parent();
        }

        let mut result: Vec<_> = visible.into_iter().collect();
        result.sort_by(|a, b| a.0.cmp(&b.0));
        result
    }

    /// Give up this handle at the end of an activation.
    ///
    /// Closures defined inside the scope point back at it, so a scope whose only
    /// other holders are such closures (each bound here and nowhere else) would
    /// never be freed. In that case its bindings are cleared to break the cycle.
    pub fn release(self) {
        let mut bindings = self.0.bindings.write();
        let mut captured = 0;
        for value in bindings.values() {
            if let Value::Closure(closure) = value
                && closure.scope.ptr_eq(&self)
            {
                if Arc::strong_count(closure) != 1 {
                    return;
                }
                captured += 1;
            }
        }
        if Arc::strong_count(&self.0) == 1 + captured {
            let cleared = std::mem::take(&mut *bindings);
            drop(bindings);
            drop(cleared);
        }
    }

    fn clear(&self) {
        let cleared = std::mem::take(&mut *self.0.bindings.write());
        drop(cleared);
    }
}

impl PartialEq for Scope {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Scope").field(&Arc::as_ptr(&self.0)).finish()
    }
}

struct Session {
    toplevel: Scope,
    symbols: SymbolTable,
    live: Arc<AtomicUsize>,
}

/// Toplevel closures refer back to the toplevel scope; clearing it on the way out
/// releases everything they keep alive.
impl Drop for Session {
    fn drop(&mut self) {
        self.toplevel.clear();
    }
}

/// Handle to a session's toplevel scope and symbol table. Clones share state.
#[derive(Clone)]
pub struct Environment {
    session: Arc<Session>,
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}

impl Environment {
    /// An environment holding only an empty toplevel scope.
    /// Use [`crate::builtinops::create_global_env`] for one with the builtins bound.
    pub fn new() -> Self {
        let live = Arc::new(AtomicUsize::new(0));
        Environment {
            session: Arc::new(Session {
                toplevel: Scope::with_parent(None, &live),
                symbols: SymbolTable::new(),
                live,
            }),
        }
    }

    pub fn toplevel(&self) -> &Scope {
        &self.session.toplevel
    }

    pub fn symbols(&self) -> &SymbolTable {
        &self.session.symbols
    }

    pub fn intern(&self, name: &str) -> Symbol {
        self.session.symbols.intern(name)
    }

    pub fn new_scope(&self, parent: &Scope) -> Scope {
        Scope::with_parent(Some(parent.clone()), &self.session.live)
    }

    /// Number of scopes of this session that are still alive
    pub fn scope_count(&self) -> usize {
        self.session.live.load(Ordering::Relaxed)
    }

    /// Register a custom builtin in the toplevel scope.
    ///
    /// # Example
    /// ```
    /// use schemelet::Error;
    /// use schemelet::ast::Value;
    /// use schemelet::builtinops::{Arity, create_global_env};
    /// use schemelet::evaluator::Frame;
    ///
    /// fn answer(_frame: &Frame<'_>, _args: &[Value]) -> Result<Value, Error> {
    ///     Ok(Value::Number(42))
    /// }
    ///
    /// let env = create_global_env();
    /// env.register_subroutine("answer", Arity::Exact(0), answer);
    /// // Now (answer) can be called from evaluated expressions
    /// ```
    pub fn register_subroutine(&self, name: &str, arity: Arity, func: SubroutineFn) {
        let subr = Subroutine {
            name: name.to_owned(),
            arity,
            func,
        };
        let symbol = self.intern(name);
        self.toplevel()
            .define(symbol, Value::Subroutine(Arc::new(subr)));
    }
}
