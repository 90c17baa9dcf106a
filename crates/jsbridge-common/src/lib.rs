//! jsbridge Common Types
//!
//! This crate provides the boundary value model and error taxonomy shared by
//! the jsbridge runtime and the programs embedding it.
//!
//! # Overview
//!
//! jsbridge embeds a JavaScript engine in a Rust program. Everything that
//! crosses between host and script is expressed as a [`Value`], a closed
//! tagged union of the script data model. Failures are explicit results:
//!
//! - [`EvalError`] - compiling or running a script
//! - [`BridgeError`] - registering a host function
//! - [`MarshalError`] - converting a value across the boundary
//! - [`CreateError`] - allocating a new context
//! - [`HostError`] - a host function reporting failure back to script
//!
//! # Example
//!
//! ```
//! use jsbridge_common::Value;
//! use serde_json::json;
//!
//! let args: Value = vec![Value::from(10), Value::from("x")].into();
//! assert_eq!(args.to_json(), json!([10, "x"]));
//!
//! let point = Value::from(json!({"x": 1.5, "y": null}));
//! assert_eq!(point.get("x"), Some(&Value::Number(1.5)));
//! assert!(point.get("y").unwrap().is_null());
//! ```

pub mod protocol;

pub use protocol::*;
