//! Host function bridge
//!
//! This module exposes host closures to script code as global functions.
//! Each registered closure is wrapped in a trampoline that:
//!
//! 1. Marshals every script argument into a [`Value`], in call order
//! 2. Invokes the host closure with exactly those arguments
//! 3. Marshals the closure's result back into a script value
//!
//! Failures never unwind into the engine. A marshalling failure becomes a
//! script `TypeError`, a closure returning `Err(HostError)` becomes a script
//! `Error` carrying its message, and a panicking closure is caught and
//! reported as an `Error` as well. Script can catch all of them.
//!
//! The closure and the registry handle are held by a [`HostBinding`]
//! captured by the engine's function object, so they live exactly as long as
//! that object does.

use boa_engine::{
    Context,
    JsNativeError,
    JsResult,
    JsString,
    native_function::NativeFunction,
    object::FunctionObjectBuilder,
    property::Attribute,
    value::JsValue,
};
use boa_gc::{Finalize, Trace};
use jsbridge_common::{BridgeError, HostError, Value};
use std::cell::RefCell;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

use crate::resource_limits::ResourceLimits;
use crate::runtime::conversions::{js_to_value, value_to_js};
use crate::runtime::engine::ActiveGuard;

/// Signature of a host function callable from script.
///
/// The closure receives the script call's arguments in order, with no
/// padding for missing ones, and returns the call's result or a failure.
pub type HostFn = dyn Fn(&[Value]) -> Result<Value, HostError> + Send + 'static;

/// Words that cannot name a global binding.
const RESERVED_WORDS: &[&str] = &[
    "await", "break", "case", "catch", "class", "const", "continue", "debugger",
    "default", "delete", "do", "else", "enum", "export", "extends", "false",
    "finally", "for", "function", "if", "implements", "import", "in", "instanceof",
    "interface", "let", "new", "null", "package", "private", "protected", "public",
    "return", "static", "super", "switch", "this", "throw", "true", "try",
    "typeof", "var", "void", "while", "with", "yield",
];

/// Host functions registered in one context, by global name.
#[derive(Default)]
pub(crate) struct Registry {
    functions: HashMap<String, Rc<HostFn>>,
}

impl Registry {
    pub(crate) fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    pub(crate) fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.functions.keys().cloned().collect();
        names.sort();
        names
    }
}

/// Check that `name` can be used as a global function name in script.
pub(crate) fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };

    if !(first == '$' || first == '_' || first.is_alphabetic()) {
        return false;
    }

    let rest_ok = chars.all(|c| {
        c == '$' || c == '_' || c == '\u{200C}' || c == '\u{200D}' || c.is_alphanumeric()
    });

    rest_ok && !RESERVED_WORDS.contains(&name)
}

/// Install `func` as the global function `name`.
///
/// # Errors
///
/// - `BridgeError::InvalidName` if `name` is not a usable identifier
/// - `BridgeError::DuplicateName` if `name` is already registered here
/// - `BridgeError::Engine` if the engine refuses the global binding (for
///   example a non-configurable `var` of the same name declared by script)
pub(crate) fn install_host_function(
    ctx: &mut Context,
    registry: &Rc<RefCell<Registry>>,
    limits: &ResourceLimits,
    name: String,
    func: Box<HostFn>,
) -> Result<(), BridgeError> {
    if !is_valid_identifier(&name) {
        return Err(BridgeError::InvalidName(name));
    }

    if registry.borrow().contains(&name) {
        return Err(BridgeError::DuplicateName(name));
    }

    let func: Rc<HostFn> = Rc::from(func);
    let binding = HostBinding {
        name: name.clone(),
        func: Rc::clone(&func),
        registry: Rc::clone(registry),
        limits: limits.clone(),
    };

    let native = NativeFunction::from_copy_closure_with_captures(
        |_this, args: &[JsValue], binding: &HostBinding, ctx| binding.invoke(args, ctx),
        binding,
    );

    let function = FunctionObjectBuilder::new(ctx.realm(), native)
        .name(JsString::from(name.as_str()))
        .length(0)
        .build();

    ctx.register_global_property(
        JsString::from(name.as_str()),
        function,
        Attribute::WRITABLE | Attribute::CONFIGURABLE,
    )
    .map_err(|e| BridgeError::Engine(e.to_string()))?;

    tracing::debug!(function = %name, "host function registered");
    registry.borrow_mut().functions.insert(name, func);
    Ok(())
}

/// State captured by a host function's script-side trampoline.
#[derive(Trace, Finalize)]
// SAFETY: no field holds a garbage-collected engine value.
#[boa_gc(unsafe_empty_trace)]
struct HostBinding {
    name: String,
    func: Rc<HostFn>,
    registry: Rc<RefCell<Registry>>,
    limits: ResourceLimits,
}

impl HostBinding {
    fn invoke(&self, args: &[JsValue], ctx: &mut Context) -> JsResult<JsValue> {
        let name = &self.name;

        let mut values = Vec::with_capacity(args.len());
        for (i, arg) in args.iter().enumerate() {
            let value = js_to_value(arg, ctx, &self.limits).map_err(|e| {
                JsNativeError::typ().with_message(format!("{name}: argument {i}: {e}"))
            })?;
            values.push(value);
        }

        // The guard publishes this engine so the closure may re-enter the
        // same context from this thread.
        let outcome = {
            let _active = ActiveGuard::enter(ctx, &self.registry, &self.limits);
            panic::catch_unwind(AssertUnwindSafe(|| (self.func)(&values)))
        };

        match outcome {
            Ok(Ok(result)) => {
                let result = value_to_js(&result, ctx, &self.limits).map_err(|e| {
                    JsNativeError::typ().with_message(format!("{name}: return value: {e}"))
                })?;
                Ok(result)
            }
            Ok(Err(err)) => Err(JsNativeError::error().with_message(err.message().to_owned()).into()),
            Err(_) => {
                tracing::warn!(function = %name, "host function panicked");
                Err(JsNativeError::error()
                    .with_message(format!("host function '{name}' panicked"))
                    .into())
            }
        }
    }
}
