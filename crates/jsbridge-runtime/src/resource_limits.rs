//! Resource limits for JavaScript contexts.
//!
//! This module provides the per-context configuration bounding what a
//! script can consume: marshalling depth and size, engine loop and recursion
//! limits, and the stack reserved for the context's worker thread.

/// Default bound on nested arrays/objects crossing the boundary.
pub const DEFAULT_MAX_MARSHAL_DEPTH: usize = 128;

/// Default bound on values copied by one conversion.
pub const DEFAULT_MAX_MARSHAL_ELEMENTS: usize = 1 << 20;

/// Default stack for a context's worker thread (16 MiB).
pub const DEFAULT_WORKER_STACK_SIZE: usize = 16 * 1024 * 1024;

const MAX_MARSHAL_DEPTH_CEILING: usize = 4096;

/// Stack kept for the engine itself, below any marshalling recursion.
const WORKER_STACK_BASE: usize = 1024 * 1024;

/// Worker stack reserved per level of `max_marshal_depth`.
pub const STACK_PER_MARSHAL_LEVEL: usize = 16 * 1024;

/// Resource limits for a JavaScript context.
///
/// # Fields
///
/// - `max_marshal_depth` - Deepest array/object nesting converted in either
///   direction (default: 128). Cyclic script objects fail at this bound.
/// - `max_marshal_elements` - Most values one conversion may produce,
///   counting every array element and object field (default: 1 Mi). Checked
///   before an array is copied, so a huge sparse `length` fails cheaply.
/// - `loop_iteration_limit` - Engine limit on iterations of a single loop
///   (default: none)
/// - `recursion_limit` - Engine limit on script call depth (default: engine
///   default)
/// - `worker_stack_size` - Stack size of the worker thread that owns the
///   engine (default: 16 MiB). Deep host/script recursion needs room here,
///   and at least 1 MiB plus [`STACK_PER_MARSHAL_LEVEL`] per level of
///   `max_marshal_depth` is required.
///
/// Exceeding an engine limit surfaces as `EvalError::Runtime`.
///
/// # Example
///
/// ```
/// use jsbridge_runtime::ResourceLimits;
///
/// let limits = ResourceLimits::new()
///     .with_max_marshal_depth(32)
///     .with_loop_iteration_limit(1_000_000);
/// assert!(limits.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceLimits {
    pub max_marshal_depth: usize,
    pub max_marshal_elements: usize,
    pub loop_iteration_limit: Option<u64>,
    pub recursion_limit: Option<usize>,
    pub worker_stack_size: usize,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_marshal_depth: DEFAULT_MAX_MARSHAL_DEPTH,
            max_marshal_elements: DEFAULT_MAX_MARSHAL_ELEMENTS,
            loop_iteration_limit: None,
            recursion_limit: None,
            worker_stack_size: DEFAULT_WORKER_STACK_SIZE,
        }
    }
}

impl ResourceLimits {
    /// Creates a new ResourceLimits with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the deepest nesting of arrays/objects that is marshalled.
    pub fn with_max_marshal_depth(mut self, depth: usize) -> Self {
        self.max_marshal_depth = depth;
        self
    }

    /// Sets the most values a single conversion may produce.
    pub fn with_max_marshal_elements(mut self, elements: usize) -> Self {
        self.max_marshal_elements = elements;
        self
    }

    /// Sets the engine's per-loop iteration limit.
    pub fn with_loop_iteration_limit(mut self, limit: u64) -> Self {
        self.loop_iteration_limit = Some(limit);
        self
    }

    /// Sets the engine's script recursion limit.
    pub fn with_recursion_limit(mut self, limit: usize) -> Self {
        self.recursion_limit = Some(limit);
        self
    }

    /// Sets the stack size, in bytes, of the context's worker thread.
    pub fn with_worker_stack_size(mut self, bytes: usize) -> Self {
        self.worker_stack_size = bytes;
        self
    }

    /// Validates the resource limits configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `max_marshal_depth` is zero or above 4096
    /// - `max_marshal_elements` is zero
    /// - `loop_iteration_limit` or `recursion_limit` is zero
    /// - `worker_stack_size` is too small for `max_marshal_depth`
    pub fn validate(&self) -> Result<(), String> {
        if self.max_marshal_depth == 0 {
            return Err("max marshal depth must be greater than zero".to_string());
        }

        if self.max_marshal_depth > MAX_MARSHAL_DEPTH_CEILING {
            return Err(format!(
                "max marshal depth must be <= {} (got {})",
                MAX_MARSHAL_DEPTH_CEILING, self.max_marshal_depth
            ));
        }

        if self.max_marshal_elements == 0 {
            return Err("max marshal elements must be greater than zero".to_string());
        }

        if self.loop_iteration_limit == Some(0) {
            return Err("loop iteration limit must be greater than zero".to_string());
        }

        if self.recursion_limit == Some(0) {
            return Err("recursion limit must be greater than zero".to_string());
        }

        let min_stack = self.min_worker_stack_size();
        if self.worker_stack_size < min_stack {
            return Err(format!(
                "worker stack size must be >= {} bytes for max marshal depth {} (got {})",
                min_stack, self.max_marshal_depth, self.worker_stack_size
            ));
        }

        Ok(())
    }

    /// Smallest worker stack that fits `max_marshal_depth`.
    pub fn min_worker_stack_size(&self) -> usize {
        WORKER_STACK_BASE + self.max_marshal_depth.saturating_mul(STACK_PER_MARSHAL_LEVEL)
    }
}
