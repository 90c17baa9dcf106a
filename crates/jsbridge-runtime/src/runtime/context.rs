use crossbeam_channel::Sender;
use jsbridge_common::{BridgeError, CreateError, EvalError, HostError, Value};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, ThreadId};

use crate::resource_limits::ResourceLimits;
use crate::runtime::bindings::HostFn;
use crate::runtime::engine;
use crate::runtime::lifecycle;
use crate::runtime::worker::{self, Job, Request, Worker};

/// An isolated JavaScript execution environment plus its host functions.
///
/// A `Context` is a handle: cloning it yields another handle to the same
/// environment (useful for host functions that evaluate more script), never
/// a copy of the engine.
///
/// # Thread Safety
///
/// The engine lives on a worker thread owned by the context. Calls from any
/// other thread are queued and executed one at a time, so concurrent
/// `eval` calls on one context never interleave. A host function runs on
/// the worker thread itself; when it calls back into the same context the
/// operation runs inline against the engine that invoked it, which is what
/// lets script call host call script without deadlocking. The same holds
/// across contexts: a host function of A may call into B, whose host
/// function calls back into A, and that inner call runs on A's blocked
/// engine.
///
/// Separate contexts share nothing and run in parallel.
///
/// # Lifetime
///
/// [`Context::release`] destroys the engine and every registered host
/// function. Dropping the last handle releases as well. A host function
/// that captures a handle to its own context keeps that context alive until
/// `release` is called explicitly.
///
/// # Example
///
/// ```
/// use jsbridge_runtime::{Context, Value};
///
/// let ctx = Context::new().unwrap();
/// ctx.add_func("add", |args| {
///     let sum = args.iter().filter_map(Value::as_f64).sum::<f64>();
///     Ok(Value::from(sum))
/// }).unwrap();
///
/// assert_eq!(ctx.eval("add(1, 2, 3)").unwrap(), Value::from(6));
/// ctx.release();
/// ```
#[derive(Clone)]
pub struct Context {
    inner: Arc<Inner>,
}

struct Inner {
    id: u64,
    released: Arc<AtomicBool>,
    worker: Mutex<Option<Worker>>,
    worker_thread: ThreadId,
}

/// Why a request never reached the engine.
enum Undelivered {
    Released,
    WorkerLost,
}

impl Undelivered {
    fn into_eval(self) -> EvalError {
        match self {
            Undelivered::Released => EvalError::UseAfterRelease,
            Undelivered::WorkerLost => EvalError::WorkerLost,
        }
    }

    fn into_bridge(self) -> BridgeError {
        match self {
            Undelivered::Released => BridgeError::UseAfterRelease,
            Undelivered::WorkerLost => BridgeError::WorkerLost,
        }
    }
}

impl Context {
    /// Create a context with default [`ResourceLimits`].
    ///
    /// # Errors
    ///
    /// `CreateError::ResourceExhausted` if the engine or its worker thread
    /// cannot be allocated.
    pub fn new() -> Result<Self, CreateError> {
        Self::with_limits(ResourceLimits::default())
    }

    /// Create a context with explicit limits.
    ///
    /// # Errors
    ///
    /// - `CreateError::InvalidLimits` if `limits` fails validation
    /// - `CreateError::ResourceExhausted` if the engine or its worker thread
    ///   cannot be allocated
    pub fn with_limits(limits: ResourceLimits) -> Result<Self, CreateError> {
        limits.validate().map_err(CreateError::InvalidLimits)?;

        let runtime = lifecycle::ensure_initialized();
        let id = runtime.next_context_id();
        let released = Arc::new(AtomicBool::new(false));

        let worker = worker::spawn(id, limits, Arc::clone(&released))?;
        runtime.context_created(id);
        tracing::debug!(context = id, "context created");

        Ok(Self {
            inner: Arc::new(Inner {
                id,
                released,
                worker_thread: worker.thread,
                worker: Mutex::new(Some(worker)),
            }),
        })
    }

    /// Process-unique identifier of this context.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Whether [`Context::release`] has run on this context.
    pub fn is_released(&self) -> bool {
        self.inner.released.load(Ordering::Acquire)
    }

    /// Compile and run `script`, returning the value of its last expression
    /// statement (`Undefined` if there is none).
    ///
    /// # Errors
    ///
    /// - `EvalError::Compile` on a syntax error; nothing was executed
    /// - `EvalError::Runtime` if the script threw; side effects made before
    ///   the throw are kept
    /// - `EvalError::Marshal` if the completion value has no `Value` form
    /// - `EvalError::UseAfterRelease` after [`Context::release`]
    pub fn eval(&self, script: &str) -> Result<Value, EvalError> {
        if self.is_released() {
            return Err(EvalError::UseAfterRelease);
        }

        if self.on_worker_thread() {
            return engine::with_active(|scope| scope.eval(script)).unwrap_or(Err(EvalError::UseAfterRelease));
        }

        tracing::debug!(context = self.inner.id, len = script.len(), "dispatching eval");
        self.dispatch(|reply| Request::Eval { script: script.to_owned(), reply })
            .unwrap_or_else(|e| Err(e.into_eval()))
    }

    /// Call the global script function `name` with `args`.
    ///
    /// # Errors
    ///
    /// - `EvalError::NotCallable` if no callable global `name` exists
    /// - `EvalError::Marshal` if an argument or the result cannot be converted
    /// - `EvalError::Runtime` if the function threw
    /// - `EvalError::UseAfterRelease` after [`Context::release`]
    pub fn call(&self, name: &str, args: Vec<Value>) -> Result<Value, EvalError> {
        if self.is_released() {
            return Err(EvalError::UseAfterRelease);
        }

        if self.on_worker_thread() {
            return engine::with_active(|scope| scope.call(name, &args)).unwrap_or(Err(EvalError::UseAfterRelease));
        }

        tracing::debug!(context = self.inner.id, function = name, "dispatching call");
        self.dispatch(|reply| Request::Call { function: name.to_owned(), args, reply })
            .unwrap_or_else(|e| Err(e.into_eval()))
    }

    /// Expose `func` to script as the global function `name`.
    ///
    /// The closure receives exactly the arguments of each script call, in
    /// order. Returning `Err` throws an `Error` with that message in script.
    /// The closure is kept alive until the context is released.
    ///
    /// # Errors
    ///
    /// - `BridgeError::InvalidName` if `name` is empty, not an identifier, or
    ///   a reserved word
    /// - `BridgeError::DuplicateName` if `name` is already registered
    /// - `BridgeError::Engine` if script already owns a non-configurable
    ///   global of that name
    /// - `BridgeError::UseAfterRelease` after [`Context::release`]
    pub fn add_func<F>(&self, name: impl Into<String>, func: F) -> Result<(), BridgeError>
    where
        F: Fn(&[Value]) -> Result<Value, HostError> + Send + 'static,
    {
        if self.is_released() {
            return Err(BridgeError::UseAfterRelease);
        }

        let name = name.into();
        let func: Box<HostFn> = Box::new(func);

        if self.on_worker_thread() {
            return engine::with_active(|scope| scope.add_func(name, func))
                .unwrap_or(Err(BridgeError::UseAfterRelease));
        }

        self.dispatch(|reply| Request::AddFunc { name, func, reply })
            .unwrap_or_else(|e| Err(e.into_bridge()))
    }

    /// Names of the registered host functions, sorted.
    pub fn registered_functions(&self) -> Result<Vec<String>, EvalError> {
        if self.is_released() {
            return Err(EvalError::UseAfterRelease);
        }

        if self.on_worker_thread() {
            return engine::with_active(|scope| scope.registered_functions())
                .ok_or(EvalError::UseAfterRelease);
        }

        self.dispatch(|reply| Request::Functions { reply })
            .unwrap_or_else(|e| Err(e.into_eval()))
    }

    /// Destroy the engine and its host functions. Values already returned
    /// stay valid. Calling this again is a no-op.
    ///
    /// Waits for a request that is currently executing to finish; requests
    /// still queued fail with `UseAfterRelease`.
    pub fn release(&self) {
        self.inner.release();
    }

    fn on_worker_thread(&self) -> bool {
        thread::current().id() == self.inner.worker_thread
    }

    /// Queue a request and wait for the worker's answer.
    ///
    /// When this context is already blocked further up the current call
    /// path, the request goes to its nested inbox and runs inline there.
    fn dispatch<T>(&self, request: impl FnOnce(Sender<T>) -> Request) -> Result<T, Undelivered> {
        let nested = worker::in_call_chain(self.inner.id);
        let inbox = self
            .inner
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|worker| if nested { worker.nested.clone() } else { worker.requests.clone() })
            .ok_or(Undelivered::Released)?;

        let (reply, response) = crossbeam_channel::bounded(1);
        inbox
            .send(Job::new(request(reply)))
            .map_err(|_| Undelivered::WorkerLost)?;
        // Only the context itself may keep the worker's inbox open.
        drop(inbox);

        worker::await_reply(&response).map_err(|_| Undelivered::WorkerLost)
    }
}

impl Inner {
    fn release(&self) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }

        let worker = self.worker.lock().unwrap_or_else(PoisonError::into_inner).take();

        if let Some(Worker { requests, handle, .. }) = worker {
            // Closing the inbox lets the worker drain and exit.
            drop(requests);

            // Released from one of its own host functions, directly or from
            // a context it is waiting on: the worker exits once the running
            // request unwinds, so there is nothing to join.
            let inside = thread::current().id() == self.worker_thread || worker::in_call_chain(self.id);
            if !inside && handle.join().is_err() {
                tracing::warn!(context = self.id, "context worker panicked");
            }
        }

        lifecycle::ensure_initialized().context_released(self.id);
        tracing::debug!(context = self.id, "context released");
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("id", &self.inner.id)
            .field("released", &self.is_released())
            .finish()
    }
}
