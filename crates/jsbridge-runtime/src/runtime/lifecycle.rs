//! Process-wide runtime lifecycle.
//!
//! Every context shares one [`Runtime`], created the first time any context
//! is created. Boa keeps no global platform state that needs an explicit
//! shutdown, so teardown only logs when the last live context goes away.

use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

static RUNTIME: OnceLock<Runtime> = OnceLock::new();

/// Shared state of the embedded engine platform.
#[derive(Debug)]
pub struct Runtime {
    next_context_id: AtomicU64,
    live_contexts: AtomicUsize,
}

/// Initialize the runtime if needed and return it.
///
/// Safe to call from any number of threads at once; initialization runs
/// exactly once.
pub fn ensure_initialized() -> &'static Runtime {
    RUNTIME.get_or_init(|| {
        tracing::info!(engine = "boa", "JavaScript runtime initialized");
        Runtime {
            next_context_id: AtomicU64::new(1),
            live_contexts: AtomicUsize::new(0),
        }
    })
}

/// Whether [`ensure_initialized`] has run in this process.
pub fn is_initialized() -> bool {
    RUNTIME.get().is_some()
}

impl Runtime {
    /// Number of contexts created and not yet released.
    pub fn live_contexts(&self) -> usize {
        self.live_contexts.load(Ordering::Acquire)
    }

    pub(crate) fn next_context_id(&self) -> u64 {
        self.next_context_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn context_created(&self, id: u64) {
        let live = self.live_contexts.fetch_add(1, Ordering::AcqRel) + 1;
        tracing::debug!(context = id, live, "context registered with runtime");
    }

    pub(crate) fn context_released(&self, id: u64) {
        let previous = self.live_contexts.fetch_sub(1, Ordering::AcqRel);
        if previous == 1 {
            tracing::debug!(context = id, "last live context released; runtime idle");
        }
    }
}
