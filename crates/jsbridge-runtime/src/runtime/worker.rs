//! Context worker thread.
//!
//! Boa's heap is thread-local, so each context's engine lives on a dedicated
//! thread for its whole life. Callers on other threads send [`Job`]s and
//! block on a reply channel. The worker runs one job at a time, to
//! completion, which is what serializes concurrent callers of one context.
//!
//! # Nested calls across contexts
//!
//! Every job carries the chain of contexts whose work led to it. A worker
//! blocked inside a host function, waiting on another context, keeps serving
//! its own nested inbox. A request for a context that is already on the
//! chain goes to that inbox instead of the main queue. It then runs inline
//! on the blocked engine, so A -> B -> A completes instead of deadlocking.

use crossbeam_channel::{Receiver, RecvError, Sender};
use jsbridge_common::{BridgeError, CreateError, EvalError, Value};
use std::cell::RefCell;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle, ThreadId};

use crate::resource_limits::ResourceLimits;
use crate::runtime::bindings::HostFn;
use crate::runtime::engine::{self, Engine, Scope};

pub(crate) enum Request {
    Eval {
        script: String,
        reply: Sender<Result<Value, EvalError>>,
    },
    Call {
        function: String,
        args: Vec<Value>,
        reply: Sender<Result<Value, EvalError>>,
    },
    AddFunc {
        name: String,
        func: Box<HostFn>,
        reply: Sender<Result<(), BridgeError>>,
    },
    Functions {
        reply: Sender<Result<Vec<String>, EvalError>>,
    },
}

impl Request {
    fn run(self, scope: &mut Scope<'_>) {
        // A send error only means the caller stopped waiting.
        match self {
            Request::Eval { script, reply } => {
                let _ = reply.send(scope.eval(&script));
            }
            Request::Call { function, args, reply } => {
                let _ = reply.send(scope.call(&function, &args));
            }
            Request::AddFunc { name, func, reply } => {
                let _ = reply.send(scope.add_func(name, func));
            }
            Request::Functions { reply } => {
                let _ = reply.send(Ok(scope.registered_functions()));
            }
        }
    }

    /// Answer without touching the engine: the context was released while
    /// this request was queued.
    fn reject(self) {
        match self {
            Request::Eval { reply, .. } | Request::Call { reply, .. } => {
                let _ = reply.send(Err(EvalError::UseAfterRelease));
            }
            Request::AddFunc { reply, .. } => {
                let _ = reply.send(Err(BridgeError::UseAfterRelease));
            }
            Request::Functions { reply } => {
                let _ = reply.send(Err(EvalError::UseAfterRelease));
            }
        }
    }
}

/// A request plus the contexts active on the caller's path.
pub(crate) struct Job {
    chain: Vec<u64>,
    request: Request,
}

impl Job {
    pub(crate) fn new(request: Request) -> Self {
        let chain = CALL_CHAIN.with(|chain| chain.borrow().clone());
        Self { chain, request }
    }
}

pub(crate) struct Worker {
    pub(crate) requests: Sender<Job>,
    pub(crate) nested: Sender<Job>,
    pub(crate) handle: JoinHandle<()>,
    pub(crate) thread: ThreadId,
}

/// Identity of the context owned by the current worker thread.
#[derive(Clone)]
struct Owner {
    id: u64,
    nested: Receiver<Job>,
    released: Arc<AtomicBool>,
}

thread_local! {
    /// Contexts whose jobs are executing on this thread's call path,
    /// outermost first. Empty on threads that are not context workers.
    static CALL_CHAIN: RefCell<Vec<u64>> = const { RefCell::new(Vec::new()) };

    static OWNER: RefCell<Option<Owner>> = const { RefCell::new(None) };
}

/// Whether context `id` is blocked somewhere up the current call path.
pub(crate) fn in_call_chain(id: u64) -> bool {
    CALL_CHAIN.with(|chain| chain.borrow().contains(&id))
}

/// Restores the previous call chain on drop.
struct ChainGuard {
    previous: Vec<u64>,
}

impl ChainGuard {
    fn enter(mut chain: Vec<u64>, id: u64) -> Self {
        chain.push(id);
        let previous = CALL_CHAIN.with(|current| current.replace(chain));
        Self { previous }
    }
}

impl Drop for ChainGuard {
    fn drop(&mut self) {
        let previous = std::mem::take(&mut self.previous);
        CALL_CHAIN.with(|current| *current.borrow_mut() = previous);
    }
}

/// Start the worker for context `id` and wait until its engine exists.
///
/// # Errors
///
/// `CreateError::ResourceExhausted` if the thread cannot be spawned or the
/// engine cannot be built.
pub(crate) fn spawn(id: u64, limits: ResourceLimits, released: Arc<AtomicBool>) -> Result<Worker, CreateError> {
    let (requests, inbox) = crossbeam_channel::unbounded();
    let (nested, nested_inbox) = crossbeam_channel::unbounded();
    let (ready_tx, ready_rx) = crossbeam_channel::bounded(1);

    let handle = thread::Builder::new()
        .name(format!("jsbridge-ctx-{id}"))
        .stack_size(limits.worker_stack_size)
        .spawn(move || {
            let mut engine = match Engine::new(&limits) {
                Ok(engine) => engine,
                Err(err) => {
                    let _ = ready_tx.send(Err(err));
                    return;
                }
            };

            OWNER.with(|owner| {
                *owner.borrow_mut() = Some(Owner {
                    id,
                    nested: nested_inbox,
                    released: Arc::clone(&released),
                })
            });
            let _ = ready_tx.send(Ok(()));

            serve(id, &mut engine, inbox, &released);

            drop(engine);
            tracing::debug!(context = id, "engine destroyed");
        })
        .map_err(|e| CreateError::ResourceExhausted(format!("failed to spawn context thread: {e}")))?;

    let thread = handle.thread().id();

    match ready_rx.recv() {
        Ok(Ok(())) => Ok(Worker { requests, nested, handle, thread }),
        Ok(Err(err)) => {
            let _ = handle.join();
            Err(err)
        }
        Err(_) => {
            let _ = handle.join();
            Err(CreateError::ResourceExhausted("context thread exited during startup".into()))
        }
    }
}

/// Run jobs until every sender is gone.
fn serve(id: u64, engine: &mut Engine, inbox: Receiver<Job>, released: &AtomicBool) {
    for Job { chain, request } in inbox {
        if released.load(Ordering::Acquire) {
            request.reject();
            continue;
        }

        let _chain = ChainGuard::enter(chain, id);
        request.run(&mut engine.scope());
    }
}

/// Wait for a reply. On a worker thread, nested jobs for this thread's own
/// context are run while waiting.
pub(crate) fn await_reply<T>(response: &Receiver<T>) -> Result<T, RecvError> {
    let Some(owner) = OWNER.with(|owner| owner.borrow().clone()) else {
        return response.recv();
    };

    loop {
        crossbeam_channel::select! {
            recv(response) -> reply => return reply,
            recv(owner.nested) -> job => match job {
                Ok(job) => run_nested(&owner, job),
                Err(_) => return response.recv(),
            },
        }
    }
}

fn run_nested(owner: &Owner, Job { chain, request }: Job) {
    if owner.released.load(Ordering::Acquire) {
        request.reject();
        return;
    }

    let _chain = ChainGuard::enter(chain, owner.id);
    // Dropping an unserved request closes its reply channel, so the caller
    // sees `WorkerLost` rather than hanging.
    if engine::with_active(move |scope| request.run(scope)).is_none() {
        tracing::warn!(context = owner.id, "nested request arrived outside a host function");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_guard_restores_previous_chain() {
        assert!(!in_call_chain(7));
        {
            let _outer = ChainGuard::enter(Vec::new(), 7);
            assert!(in_call_chain(7));
            {
                let _inner = ChainGuard::enter(vec![7], 9);
                assert!(in_call_chain(7) && in_call_chain(9));
            }
            assert!(!in_call_chain(9));
        }
        assert!(!in_call_chain(7));
    }

    #[test]
    fn test_job_captures_current_chain() {
        let (reply, _response) = crossbeam_channel::bounded(1);
        let _guard = ChainGuard::enter(vec![1], 2);
        let job = Job::new(Request::Functions { reply });
        assert_eq!(job.chain, vec![1, 2]);
    }

    #[test]
    fn test_await_reply_off_worker_is_plain_recv() {
        let (tx, rx) = crossbeam_channel::bounded(1);
        tx.send(5).unwrap();
        assert_eq!(await_reply(&rx), Ok(5));
    }
}
