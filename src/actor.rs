//! The actor primitive.
//!
//! ```scheme
//! (define counter
//!   (actor (("add" n) (set! total (+ total n)))
//!          (("reset") (set! total 0))))
//! (counter start)
//! (counter ! "add" 5)
//! ```
//!
//! An actor owns a scope (child of the scope it was created in, with `self` bound to
//! the actor) and a rendezvous mailbox. `start` runs the receive loop on a dedicated
//! thread; `!` blocks until that loop has taken the message.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;

use crossbeam::channel::{Receiver, Sender, bounded};
use rustc_hash::FxHashMap;
use tracing::{debug, error, warn};

use crate::Error;
use crate::ast::{ActorForm, HandlerForm, Value};
use crate::builtinops::Arity;
use crate::environment::{Environment, Scope};
use crate::evaluator::Frame;

static NEXT_ACTOR_ID: AtomicUsize = AtomicUsize::new(1);

pub struct Actor {
    id: usize,
    form: Arc<ActorForm>,
    handlers: FxHashMap<Arc<str>, usize>,
    scope: Scope,
    sender: Sender<Vec<Value>>,
    receiver: Receiver<Vec<Value>>,
    started: AtomicBool,
}

impl std::fmt::Debug for Actor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Actor")
            .field("id", &self.id)
            .field("scope", &self.scope)
            .field("started", &self.is_started())
            .finish_non_exhaustive()
    }
}

impl Actor {
    /// Create an actor for `form` under the frame's current scope
    pub fn new(frame: &Frame<'_>, form: Arc<ActorForm>) -> Arc<Actor> {
        let env = frame.env();
        let scope = env.new_scope(frame.scope());
        let self_name = env.intern("self");
        let (sender, receiver) = bounded(0);
        let handlers = form
            .handlers
            .iter()
            .enumerate()
            .map(|(index, handler)| (Arc::clone(&handler.tag), index))
            .collect();

        let actor = Arc::new(Actor {
            id: NEXT_ACTOR_ID.fetch_add(1, Ordering::Relaxed),
            form,
            handlers,
            scope: scope.clone(),
            sender,
            receiver,
            started: AtomicBool::new(false),
        });
        scope.define(self_name, Value::Actor(Arc::clone(&actor)));
        actor
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    /// Handle `(actor method args...)`; `args` are unevaluated
    pub fn invoke(self: &Arc<Self>, frame: &Frame<'_>, args: &[Value]) -> Result<Value, Error> {
        let Some((method, rest)) = args.split_first() else {
            return Err(Error::arity_error("actor", Arity::AtLeast(1), 0));
        };
        match method {
            Value::Variable(name) if name.name() == "start" => {
                self.start(frame.env().clone(), frame.max_depth())?;
                Ok(Value::Undefined)
            }
            Value::Variable(name) if name.name() == "!" => {
                let message = frame.eval_args(rest)?;
                self.send(message)?;
                Ok(Value::Undefined)
            }
            other => Err(Error::RuntimeError(format!(
                "unexpected method for actor: {other}"
            ))),
        }
    }

    fn start(self: &Arc<Self>, env: Environment, max_depth: usize) -> Result<(), Error> {
        if self.started.swap(true, Ordering::AcqRel) {
            warn!(actor = self.id, "actor already started");
            return Ok(());
        }

        let actor = Arc::clone(self);
        thread::Builder::new()
            .name(format!("actor-{}", self.id))
            .spawn(move || actor.run(&env, max_depth))
            .map(|_| ())
            .map_err(|e| {
                self.started.store(false, Ordering::Release);
                Error::RuntimeError(format!("cannot start actor: {e}"))
            })
    }

    /// Block until the receive loop takes `message`
    pub fn send(&self, message: Vec<Value>) -> Result<(), Error> {
        debug!(actor = self.id, len = message.len(), "sending message");
        self.sender
            .send(message)
            .map_err(|_| Error::RuntimeError("actor mailbox closed".into()))
    }

    fn run(&self, env: &Environment, max_depth: usize) {
        debug!(actor = self.id, "actor loop started");
        let frame = Frame::new(env, &self.scope, max_depth);
        while let Ok(message) = self.receiver.recv() {
            if let Err(e) = self.dispatch(&frame, &message) {
                error!(actor = self.id, error = %e, "actor handler failed");
            }
        }
    }

    fn dispatch(&self, frame: &Frame<'_>, message: &[Value]) -> Result<(), Error> {
        let Some((tag, args)) = message.split_first() else {
            return Ok(());
        };
        let Value::String(tag) = tag else {
            return Err(Error::type_error("string", tag));
        };
        let handler = self
            .handlers
            .get(tag)
            .and_then(|&index| self.form.handlers.get(index))
            .ok_or_else(|| Error::RuntimeError(format!("no handler for message: \"{tag}\"")))?;

        self.call_handler(frame, handler, args)?;
        Ok(())
    }

    fn call_handler(
        &self,
        frame: &Frame<'_>,
        handler: &HandlerForm,
        args: &[Value],
    ) -> Result<Value, Error> {
        if handler.params.len() != args.len() {
            return Err(Error::arity_error(
                format!("handler \"{}\"", handler.tag),
                Arity::Exact(handler.params.len()),
                args.len(),
            ));
        }

        let env = frame.env();
        let scope = env.new_scope(&self.scope);
        for (param, arg) in handler.params.iter().zip(args) {
            scope.define(param.clone(), arg.clone());
        }
        let result = Frame::new(env, &scope, frame.max_depth()).eval_body(&handler.body);
        scope.release();
        result
    }
}
