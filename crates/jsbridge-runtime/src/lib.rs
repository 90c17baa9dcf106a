//! jsbridge Runtime
//!
//! This crate embeds the Boa JavaScript engine behind a small, thread-safe
//! surface: create a [`Context`], register host functions with
//! [`Context::add_func`], and run script with [`Context::eval`]. Everything
//! crossing the boundary is a [`Value`] deep copy.
//!
//! # Components
//!
//! - [`runtime::context`] - the `Context` handle and its request dispatch
//! - [`runtime::lifecycle`] - process-wide one-time runtime initialization
//! - [`resource_limits`] - per-context marshalling and engine limits
//!
//! # Example
//!
//! ```
//! use jsbridge_runtime::{Context, Value};
//!
//! let ctx = Context::new().unwrap();
//! ctx.add_func("echo", |args| Ok(Value::from(args))).unwrap();
//!
//! let echoed = ctx.eval(r#"echo(10, "x")"#).unwrap();
//! assert_eq!(echoed, Value::from(vec![Value::from(10), Value::from("x")]));
//! ```

pub mod resource_limits;
pub mod runtime;

pub use jsbridge_common::{Array, BridgeError, CreateError, EvalError, HostError, MarshalError, Object, Value};
pub use resource_limits::ResourceLimits;
pub use runtime::{Context, HostFn, Runtime, ensure_initialized};
