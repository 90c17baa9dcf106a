//! Engine state owned by a context's worker thread.
//!
//! [`Engine`] is created, used and dropped on one thread only. Operations run
//! through a [`Scope`], which is either taken from the engine directly (a
//! queued request) or recovered from the active frame while a host function
//! is running (a re-entrant call from that host function).

use boa_engine::{Context, JsError, JsString, JsValue, Script, Source, context::ContextBuilder};
use jsbridge_common::{BridgeError, CreateError, EvalError, Value};
use std::cell::RefCell;
use std::ptr::NonNull;
use std::rc::Rc;

use crate::resource_limits::ResourceLimits;
use crate::runtime::bindings::{self, HostFn, Registry};
use crate::runtime::conversions::{js_to_value, value_to_js};

pub(crate) struct Engine {
    js: Context,
    registry: Rc<RefCell<Registry>>,
    limits: ResourceLimits,
}

impl Engine {
    pub(crate) fn new(limits: &ResourceLimits) -> Result<Self, CreateError> {
        let mut js = ContextBuilder::new()
            .build()
            .map_err(|e| CreateError::ResourceExhausted(format!("engine allocation failed: {e}")))?;

        if let Some(limit) = limits.loop_iteration_limit {
            js.runtime_limits_mut().set_loop_iteration_limit(limit);
        }
        if let Some(limit) = limits.recursion_limit {
            js.runtime_limits_mut().set_recursion_limit(limit);
        }

        Ok(Self {
            js,
            registry: Rc::new(RefCell::new(Registry::default())),
            limits: limits.clone(),
        })
    }

    pub(crate) fn scope(&mut self) -> Scope<'_> {
        Scope {
            js: &mut self.js,
            registry: Rc::clone(&self.registry),
            limits: self.limits.clone(),
        }
    }
}

/// Exclusive access to one engine for the duration of an operation.
pub(crate) struct Scope<'a> {
    js: &'a mut Context,
    registry: Rc<RefCell<Registry>>,
    limits: ResourceLimits,
}

impl Scope<'_> {
    /// Compile `script`, run it to completion and marshal its completion
    /// value. Nothing runs when compilation fails.
    pub(crate) fn eval(&mut self, script: &str) -> Result<Value, EvalError> {
        let parsed = Script::parse(Source::from_bytes(script), None, self.js)
            .map_err(|e| EvalError::Compile(e.to_string()))?;

        let completion = parsed.evaluate(self.js).map_err(|e| self.runtime_error(e))?;

        Ok(js_to_value(&completion, self.js, &self.limits)?)
    }

    /// Call the global function `name` with host arguments.
    pub(crate) fn call(&mut self, name: &str, args: &[Value]) -> Result<Value, EvalError> {
        let target = self
            .js
            .global_object()
            .get(JsString::from(name), self.js)
            .map_err(|e| self.runtime_error(e))?;

        let Some(function) = target.as_callable() else {
            return Err(EvalError::NotCallable(name.to_owned()));
        };

        let mut js_args = Vec::with_capacity(args.len());
        for arg in args {
            js_args.push(value_to_js(arg, self.js, &self.limits)?);
        }

        let result = function
            .call(&JsValue::undefined(), &js_args, self.js)
            .map_err(|e| self.runtime_error(e))?;

        Ok(js_to_value(&result, self.js, &self.limits)?)
    }

    pub(crate) fn add_func(&mut self, name: String, func: Box<HostFn>) -> Result<(), BridgeError> {
        bindings::install_host_function(self.js, &self.registry, &self.limits, name, func)
    }

    pub(crate) fn registered_functions(&self) -> Vec<String> {
        self.registry.borrow().names()
    }

    /// Marshal a thrown value, falling back to its string description when
    /// it has no `Value` form.
    fn runtime_error(&mut self, err: JsError) -> EvalError {
        let message = err.to_string();
        let value = err
            .as_opaque()
            .and_then(|thrown| js_to_value(thrown, self.js, &self.limits).ok())
            .unwrap_or_else(|| Value::String(message.clone()));

        EvalError::Runtime { message, value }
    }
}

#[derive(Clone)]
struct ActiveFrame {
    js: NonNull<Context>,
    registry: Rc<RefCell<Registry>>,
    limits: ResourceLimits,
}

thread_local! {
    /// Engine currently running a host function on this thread.
    static ACTIVE: RefCell<Option<ActiveFrame>> = const { RefCell::new(None) };
}

/// Publishes an engine as active while a host function runs, restoring the
/// previous frame on drop (including during unwinding).
pub(crate) struct ActiveGuard {
    previous: Option<ActiveFrame>,
}

impl ActiveGuard {
    pub(crate) fn enter(js: &mut Context, registry: &Rc<RefCell<Registry>>, limits: &ResourceLimits) -> Self {
        let frame = ActiveFrame {
            js: NonNull::from(js),
            registry: Rc::clone(registry),
            limits: limits.clone(),
        };
        let previous = ACTIVE.with(|active| active.replace(Some(frame)));
        Self { previous }
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        let previous = self.previous.take();
        ACTIVE.with(|active| *active.borrow_mut() = previous);
    }
}

/// Run `f` against the engine that is currently inside a host function on
/// this thread. Returns `None` when no host function is running.
pub(crate) fn with_active<R>(f: impl FnOnce(&mut Scope<'_>) -> R) -> Option<R> {
    let frame = ACTIVE.with(|active| active.borrow().clone())?;

    // SAFETY: the pointer was taken from the `&mut Context` the engine
    // passed to the trampoline, which does not touch it again until its
    // `ActiveGuard` is dropped. That guard outlives this call (we are running
    // inside the host function it wraps), and the frame never leaves the
    // engine's own thread, so this is the only live access to the engine.
    let js = unsafe { &mut *frame.js.as_ptr() };

    let mut scope = Scope {
        js,
        registry: frame.registry,
        limits: frame.limits,
    };
    Some(f(&mut scope))
}
