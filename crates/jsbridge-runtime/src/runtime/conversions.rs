//! Value <-> JavaScript Value Conversions
//!
//! This module provides the bidirectional marshaller between the boundary
//! [`Value`] and Boa's `JsValue`. It is used for:
//!
//! - Returning script completion values and thrown values to the host
//! - Passing script call arguments into host functions
//! - Returning host function results back into script
//!
//! # Type Mapping
//!
//! | Value | JavaScript Type |
//! |-------|-----------------|
//! | Undefined | undefined |
//! | Null | null |
//! | Boolean | Boolean |
//! | Number | Number |
//! | String | String |
//! | Array | Array |
//! | Object | ordinary Object |
//!
//! # Limitations
//!
//! - Symbol keys in JavaScript objects are skipped during conversion
//! - Functions, symbols, bigints and objects with internal state (`Map`,
//!   `Date`, `Promise`, typed arrays, proxies...) are rejected
//! - Both directions stop at `max_marshal_depth` nested arrays/objects, which
//!   also rejects cyclic script objects
//! - Both directions stop after `max_marshal_elements` values, checked before
//!   anything is allocated for an array

use boa_engine::{
    Context,
    JsValue,
    js_string,
    object::{JsObject, builtins::JsArray},
    property::PropertyKey,
};
use jsbridge_common::{MarshalError, Value};

use crate::resource_limits::ResourceLimits;

/// Preallocation cap for arrays; lengths come from script.
const MAX_PREALLOCATED: usize = 1024;

/// Remaining allowance of one conversion.
struct Budget {
    max_depth: usize,
    max_elements: usize,
    remaining: usize,
}

impl Budget {
    fn new(limits: &ResourceLimits) -> Self {
        Self {
            max_depth: limits.max_marshal_depth,
            max_elements: limits.max_marshal_elements,
            remaining: limits.max_marshal_elements,
        }
    }

    fn enter(&self, depth: usize) -> Result<(), MarshalError> {
        if depth >= self.max_depth {
            return Err(MarshalError::DepthExceeded(self.max_depth));
        }
        Ok(())
    }

    /// Reserve room for `count` more values.
    fn reserve(&mut self, count: usize) -> Result<(), MarshalError> {
        if count > self.remaining {
            return Err(MarshalError::TooLarge(self.max_elements));
        }
        self.remaining -= count;
        Ok(())
    }
}

/// Convert a Boa `JsValue` into a host [`Value`].
///
/// Arrays and objects are copied eagerly and recursively; the result holds
/// no reference into the engine.
///
/// # Errors
///
/// - `MarshalError::Encoding` if a string (or key) holds an unpaired surrogate
/// - `MarshalError::UnsupportedType` for functions, symbols, bigints and
///   non-ordinary objects, naming the type
/// - `MarshalError::DepthExceeded` past `max_marshal_depth` levels of nesting
/// - `MarshalError::TooLarge` past `max_marshal_elements` values
pub fn js_to_value(value: &JsValue, ctx: &mut Context, limits: &ResourceLimits) -> Result<Value, MarshalError> {
    let mut budget = Budget::new(limits);
    budget.reserve(1)?;
    to_host(value, ctx, &mut budget, 0)
}

fn to_host(value: &JsValue, ctx: &mut Context, budget: &mut Budget, depth: usize) -> Result<Value, MarshalError> {
    if value.is_undefined() {
        return Ok(Value::Undefined);
    }

    if value.is_null() {
        return Ok(Value::Null);
    }

    if let Some(b) = value.as_boolean() {
        return Ok(Value::Boolean(b));
    }

    if let Some(n) = value.as_number() {
        return Ok(Value::Number(n));
    }

    if let Some(s) = value.as_string() {
        return s
            .to_std_string()
            .map(Value::String)
            .map_err(|e| MarshalError::Encoding(format!("invalid UTF-16 in string: {e}")));
    }

    if value.is_symbol() {
        return Err(MarshalError::UnsupportedType("symbol".into()));
    }

    if value.is_bigint() {
        return Err(MarshalError::UnsupportedType("bigint".into()));
    }

    let Some(obj) = value.as_object() else {
        return Err(MarshalError::UnsupportedType("unknown".into()));
    };

    if obj.is_callable() {
        return Err(MarshalError::UnsupportedType("function".into()));
    }

    if obj.is_array() {
        budget.enter(depth)?;

        let array = JsArray::from_object(obj.clone()).map_err(|e| engine_fault("array", e))?;
        let length = array.length(ctx).map_err(|e| engine_fault("array length", e))?;
        let length = usize::try_from(length).unwrap_or(usize::MAX);
        budget.reserve(length)?;

        let mut items = Vec::with_capacity(length.min(MAX_PREALLOCATED));
        for i in 0..length {
            let elem = array.get(i, ctx).map_err(|e| engine_fault("array element", e))?;
            items.push(to_host(&elem, ctx, budget, depth + 1)?);
        }
        return Ok(Value::Array(items));
    }

    if !obj.is_ordinary() {
        return Err(MarshalError::UnsupportedType(class_name(&obj, ctx)));
    }

    budget.enter(depth)?;

    // Plain object: copy its own string-keyed properties.
    let keys = obj.own_property_keys(ctx).map_err(|e| engine_fault("object keys", e))?;
    budget.reserve(keys.len())?;

    let mut fields = jsbridge_common::Object::new();
    for key in keys {
        let name = match &key {
            PropertyKey::String(s) => s.to_std_string().map_err(|e| {
                MarshalError::Encoding(format!("invalid UTF-16 in property key: {e}"))
            })?,
            PropertyKey::Index(i) => i.get().to_string(),
            PropertyKey::Symbol(_) => continue,
        };

        let field = obj.get(key.clone(), ctx).map_err(|e| engine_fault("property", e))?;
        fields.insert(name, to_host(&field, ctx, budget, depth + 1)?);
    }

    Ok(Value::Object(fields))
}

/// Name of an object's constructor, for error messages.
fn class_name(obj: &JsObject, ctx: &mut Context) -> String {
    obj.get(js_string!("constructor"), ctx)
        .ok()
        .and_then(|ctor| ctor.as_object().and_then(|ctor| ctor.get(js_string!("name"), ctx).ok()))
        .and_then(|name| name.as_string().map(|name| name.to_std_string_escaped()))
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "object".to_string())
}

/// Convert a host [`Value`] into a Boa `JsValue`.
///
/// Arrays become fresh `Array` instances and objects fresh plain objects
/// with `Object.prototype`.
///
/// # Errors
///
/// - `MarshalError::DepthExceeded` past `max_marshal_depth` levels of nesting
/// - `MarshalError::TooLarge` past `max_marshal_elements` values
pub fn value_to_js(value: &Value, ctx: &mut Context, limits: &ResourceLimits) -> Result<JsValue, MarshalError> {
    let mut budget = Budget::new(limits);
    budget.reserve(1)?;
    to_engine(value, ctx, &mut budget, 0)
}

fn to_engine(value: &Value, ctx: &mut Context, budget: &mut Budget, depth: usize) -> Result<JsValue, MarshalError> {
    match value {
        Value::Undefined => Ok(JsValue::undefined()),
        Value::Null => Ok(JsValue::null()),
        Value::Boolean(b) => Ok(JsValue::new(*b)),
        Value::Number(n) => Ok(JsValue::new(*n)),
        Value::String(s) => Ok(JsValue::new(js_string!(s.as_str()))),
        Value::Array(items) => {
            budget.enter(depth)?;
            budget.reserve(items.len())?;
            let js_array = JsArray::new(ctx);
            for item in items {
                let js_value = to_engine(item, ctx, budget, depth + 1)?;
                js_array.push(js_value, ctx).map_err(|e| engine_fault("array push", e))?;
            }
            Ok(js_array.into())
        }
        Value::Object(fields) => {
            budget.enter(depth)?;
            budget.reserve(fields.len())?;
            let js_obj = JsObject::with_object_proto(ctx.intrinsics());
            for (key, field) in fields {
                let js_value = to_engine(field, ctx, budget, depth + 1)?;
                js_obj
                    .create_data_property_or_throw(js_string!(key.as_str()), js_value, ctx)
                    .map_err(|e| engine_fault("property", e))?;
            }
            Ok(js_obj.into())
        }
    }
}

/// A getter or proxy trap threw while the value was being copied.
fn engine_fault(what: &str, err: boa_engine::JsError) -> MarshalError {
    MarshalError::UnsupportedType(format!("{what} could not be read ({err})"))
}
