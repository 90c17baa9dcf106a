// Integration tests for jsbridge-runtime
//
// These tests drive a real context through its public surface: evaluating
// script, registering host functions, and exchanging values both ways.

use jsbridge_runtime::{Context, EvalError, HostError, MarshalError, ResourceLimits, Value};
use serde_json::json;

// ============================================================================
// Test Helpers
// ============================================================================

const JS_FIB: &str = r#"
    function fib(n) {
        var f = 0,
            n1 = 1,
            n2 = 0;
        if (n <= 1) {
            return n;
        }
        for (var i = 1; i < n; i++) {
            f = n1 + n2;
            n2 = n1;
            n1 = f;
        }
        return f;
    }
"#;

/// Expected Fibonacci numbers, as produced by double arithmetic.
const FIBS: [(u32, u64); 4] = [
    (20, 6_765),
    (50, 12_586_269_025),
    (60, 1_548_008_755_920),
    (80, 23_416_728_348_467_684),
];

fn host_fib(n: u32) -> u64 {
    if n <= 1 {
        return u64::from(n);
    }
    let (mut n1, mut n2, mut v) = (1u64, 0u64, 0u64);
    for _ in 1..n {
        v = n1 + n2;
        n2 = n1;
        n1 = v;
    }
    v
}

fn as_u64(value: &Value) -> u64 {
    value.as_f64().expect("expected a number") as u64
}

// ============================================================================
// Eval
// ============================================================================

#[test]
fn test_eval_script() {
    let ctx = Context::new().unwrap();
    let res = ctx.eval("var a = 10; a").unwrap();
    assert_eq!(res, Value::Number(10.0));
}

#[test]
fn test_eval_fib_in_script() {
    let ctx = Context::new().unwrap();
    ctx.eval(JS_FIB).unwrap();

    for (n, expected) in FIBS {
        let res = ctx.eval(&format!("fib({n})")).unwrap();
        assert_eq!(as_u64(&res), expected, "fib({n})");
    }
}

#[test]
fn test_eval_returns_structured_data() {
    let ctx = Context::new().unwrap();
    let res = ctx
        .eval("({ id: 1, tags: ['a', 'b'], meta: { ok: true, missing: null } })")
        .unwrap();
    assert_eq!(
        res.to_json(),
        json!({"id": 1, "tags": ["a", "b"], "meta": {"ok": true, "missing": null}})
    );
}

#[test]
fn test_eval_distinguishes_null_and_undefined() {
    let ctx = Context::new().unwrap();
    assert_eq!(ctx.eval("null").unwrap(), Value::Null);
    assert_eq!(ctx.eval("undefined").unwrap(), Value::Undefined);
    assert_eq!(ctx.eval("var x;").unwrap(), Value::Undefined);
}

#[test]
fn test_eval_rejects_cyclic_result() {
    let ctx = Context::new().unwrap();
    let err = ctx.eval("var o = { name: 'loop' }; o.self = o; o").unwrap_err();
    assert!(matches!(err, EvalError::Marshal(MarshalError::DepthExceeded(_))), "got {err:?}");
}

#[test]
fn test_custom_marshal_depth() {
    let ctx = Context::with_limits(ResourceLimits::new().with_max_marshal_depth(2)).unwrap();
    assert!(ctx.eval("[[1]]").is_ok());
    assert_eq!(
        ctx.eval("[[[1]]]"),
        Err(EvalError::Marshal(MarshalError::DepthExceeded(2)))
    );
}

// ============================================================================
// Host Functions
// ============================================================================

#[test]
fn test_add_func() {
    let ctx = Context::new().unwrap();
    ctx.add_func("_testFunc", |args| {
        assert_eq!(args.len(), 2, "unexpected number of arguments");
        assert_eq!(args[0], Value::Number(10.0));
        assert_eq!(args[1], Value::from("Test string"));
        Ok(Value::from("testFunc return value"))
    })
    .unwrap();

    let res = ctx.eval(r#"_testFunc(10, "Test string");"#).unwrap();
    assert_eq!(res, Value::from("testFunc return value"));
}

#[test]
fn test_add_func_return_array_args() {
    let ctx = Context::new().unwrap();
    ctx.add_func("testHostFunc", |args| Ok(Value::from(args))).unwrap();

    let res = ctx.eval(r#"testHostFunc(10, "Test string");"#).unwrap();
    let items = res.as_array().expect("expected an array");
    assert_eq!(items.len(), 2);
    assert_eq!(items[0], Value::Number(10.0));
    assert_eq!(items[1], Value::from("Test string"));
}

#[test]
fn test_add_func_return_object() {
    let ctx = Context::new().unwrap();
    ctx.add_func("testFunc", |args| {
        let arg0 = args.first().and_then(Value::as_i64).ok_or("arg0 must be an integer")?;
        let arg1 = args.get(1).and_then(Value::as_str).ok_or("arg1 must be a string")?;
        Ok([("arg0", Value::from(arg0)), ("arg1", Value::from(arg1))]
            .into_iter()
            .collect())
    })
    .unwrap();

    let res = ctx.eval(r#"testFunc(10, "something").arg0"#).unwrap();
    assert_eq!(res, Value::from(10));

    let res = ctx.eval(r#"testFunc(10, "something")"#).unwrap();
    assert_eq!(res.get("arg0"), Some(&Value::from(10)));
    assert_eq!(res.get("arg1"), Some(&Value::from("something")));
}

#[test]
fn test_host_values_are_fresh_copies() {
    let ctx = Context::new().unwrap();
    ctx.add_func("config", |_| Ok(Value::from(json!({"retries": 3}))))
        .unwrap();

    let res = ctx
        .eval("var a = config(); a.retries = 99; var b = config(); [a.retries, b.retries]")
        .unwrap();
    assert_eq!(res, Value::from(vec![Value::from(99), Value::from(3)]));
}

#[test]
fn test_host_failure_is_catchable_in_script() {
    let ctx = Context::new().unwrap();
    ctx.add_func("lookup", |args| match args.first().and_then(Value::as_str) {
        Some("known") => Ok(Value::from(1)),
        Some(other) => Err(HostError::new(format!("unknown key: {other}"))),
        None => Err(HostError::new("missing key")),
    })
    .unwrap();

    let res = ctx
        .eval("var out = []; for (var k of ['known', 'other']) { try { out.push(lookup(k)) } catch (e) { out.push(e.message) } } out")
        .unwrap();
    assert_eq!(res, Value::from(vec![Value::from(1), Value::from("unknown key: other")]));
}

#[test]
fn test_call_roundtrip() {
    let ctx = Context::new().unwrap();
    ctx.eval("function describe(p) { return p.name + ' is ' + p.age; }").unwrap();

    let person = Value::from(json!({"name": "Ada", "age": 36}));
    assert_eq!(ctx.call("describe", vec![person]).unwrap(), Value::from("Ada is 36"));
}

// ============================================================================
// Recursion across the boundary
// ============================================================================

#[test]
fn test_host_fib_callback() {
    let ctx = Context::new().unwrap();
    ctx.add_func("hostFib", |args| {
        let n = args.first().and_then(Value::as_i64).ok_or("n must be an integer")?;
        Ok(Value::from(host_fib(n as u32)))
    })
    .unwrap();

    for (n, expected) in FIBS {
        let res = ctx.eval(&format!("hostFib({n});")).unwrap();
        assert_eq!(as_u64(&res), expected, "hostFib({n})");
    }
}

#[test]
fn test_alternating_recursive_fib() {
    // fib(n) in script calls hostFib(n - 1) and hostFib(n - 2), each of which
    // evaluates fib(...) on the same context again.
    let ctx = Context::new().unwrap();
    let handle = ctx.clone();
    ctx.add_func("hostFib", move |args| {
        let n = args.first().and_then(Value::as_i64).ok_or("n must be an integer")?;
        handle
            .eval(&format!("fib({n})"))
            .map_err(|e| HostError::new(e.to_string()))
    })
    .unwrap();
    ctx.eval("function fib(n) { return n <= 1 ? n : hostFib(n - 1) + hostFib(n - 2); }")
        .unwrap();

    let res = ctx.eval("fib(20)").unwrap();
    assert_eq!(as_u64(&res), 6_765);
    ctx.release();
}

#[test]
fn test_alternating_linear_fib() {
    // One host hop per step: step(n, a, b) in script hands off to the host,
    // which evaluates the next step on the same context.
    let ctx = Context::new().unwrap();
    let handle = ctx.clone();
    ctx.add_func("hostStep", move |args| {
        let n = args[0].as_i64().ok_or("n must be an integer")?;
        let (a, b) = (args[1].as_f64().unwrap_or(0.0), args[2].as_f64().unwrap_or(0.0));
        if n == 0 {
            return Ok(Value::from(a));
        }
        handle
            .call("step", vec![Value::from(n - 1), Value::from(b), Value::from(a + b)])
            .map_err(|e| HostError::new(e.to_string()))
    })
    .unwrap();
    ctx.eval("function step(n, a, b) { return hostStep(n, a, b); }").unwrap();

    for (n, expected) in FIBS {
        let res = ctx.eval(&format!("step({n}, 0, 1)")).unwrap();
        assert_eq!(as_u64(&res), expected, "step({n})");
        assert_eq!(expected, host_fib(n));
    }
    ctx.release();
}

// ============================================================================
// Marshalling limits
// ============================================================================

fn nesting_of(value: Option<&Value>) -> usize {
    let mut depth = 0;
    let mut current = value;
    while let Some(Value::Array(items)) = current {
        depth += 1;
        current = items.first();
    }
    depth
}

#[test]
fn test_huge_sparse_array_fails_cleanly() {
    let ctx = Context::new().unwrap();
    ctx.eval("var a = []; a.length = 4294967295;").unwrap();

    assert_eq!(
        ctx.eval("a"),
        Err(EvalError::Marshal(MarshalError::TooLarge(1 << 20)))
    );

    // Through a host function the failure is a catchable TypeError.
    ctx.add_func("size", |args| Ok(Value::from(args.len()))).unwrap();
    let res = ctx
        .eval("try { size(a) } catch (e) { (e instanceof TypeError) + ': ' + e.message }")
        .unwrap();
    let text = res.as_str().unwrap();
    assert!(text.starts_with("true: size: argument 0"), "got {text}");

    // The context is still healthy.
    assert_eq!(ctx.eval("a.length").unwrap(), Value::from(4_294_967_295u32));
}

#[test]
fn test_oversized_host_result_fails_cleanly() {
    let limits = ResourceLimits::new().with_max_marshal_elements(100);
    let ctx = Context::with_limits(limits).unwrap();
    ctx.add_func("many", |_| Ok(Value::Array(vec![Value::Null; 1000]))).unwrap();

    let res = ctx.eval("try { many() } catch (e) { e instanceof TypeError }").unwrap();
    assert_eq!(res, Value::Boolean(true));
}

#[test]
fn test_engine_objects_are_rejected_by_name() {
    let ctx = Context::new().unwrap();

    for (src, name) in [("new Map([[1, 2]])", "Map"), ("Promise.resolve(5)", "Promise"), ("new Date(0)", "Date")] {
        assert_eq!(
            ctx.eval(src),
            Err(EvalError::Marshal(MarshalError::UnsupportedType(name.into()))),
            "{src}"
        );
    }

    ctx.add_func("take", |_| Ok(Value::Null)).unwrap();
    let res = ctx.eval("try { take(new Map()) } catch (e) { e.message }").unwrap();
    assert!(res.as_str().unwrap().contains("Map"), "got {res}");
}

#[test]
fn test_deepest_allowed_nesting_fits_worker_stack() {
    let limits = ResourceLimits::new().with_max_marshal_depth(4096);
    let limits = limits.clone().with_worker_stack_size(limits.min_worker_stack_size());
    let ctx = Context::with_limits(limits).unwrap();

    ctx.add_func("depthOf", |args| Ok(Value::from(nesting_of(args.first()))))
        .unwrap();
    ctx.add_func("nest", |args| {
        let n = args.first().and_then(Value::as_i64).ok_or("n must be an integer")?;
        let mut value = Value::from(0);
        for _ in 0..n {
            value = Value::Array(vec![value]);
        }
        Ok(value)
    })
    .unwrap();

    // script -> host
    let res = ctx.eval("var v = 0; for (var i = 0; i < 4000; i++) v = [v]; depthOf(v)").unwrap();
    assert_eq!(res, Value::from(4000));

    // host -> script
    let res = ctx
        .eval("var w = nest(4000), d = 0; while (Array.isArray(w)) { w = w[0]; d++; } d")
        .unwrap();
    assert_eq!(res, Value::from(4000));

    // Past the bound is an ordinary failure, not a stack overflow.
    let res = ctx
        .eval("var u = 0; for (var i = 0; i < 5000; i++) u = [u]; try { depthOf(u) } catch (e) { e instanceof TypeError }")
        .unwrap();
    assert_eq!(res, Value::Boolean(true));
}
