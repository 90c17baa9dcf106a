use thiserror::Error;

use crate::protocol::value::Value;

/// Failure converting between a [`Value`] and an engine-native value.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MarshalError {
    #[error("Encoding error: {0}")]
    Encoding(String),

    #[error("Unsupported type: {0} has no boundary representation")]
    UnsupportedType(String),

    #[error("Depth exceeded: value nests deeper than {0} levels")]
    DepthExceeded(usize),

    #[error("Too large: value holds more than {0} elements")]
    TooLarge(usize),
}

/// Failure of `Context::eval` and `Context::call`.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvalError {
    #[error("Compile error: {0}")]
    Compile(String),

    /// The script threw. `value` is the thrown value, or its string
    /// description when it could not be marshalled.
    #[error("Runtime error: {message}")]
    Runtime { message: String, value: Value },

    #[error("Marshal error: {0}")]
    Marshal(#[from] MarshalError),

    #[error("Not callable: global '{0}' is not a function")]
    NotCallable(String),

    #[error("Context used after release")]
    UseAfterRelease,

    #[error("Context worker terminated unexpectedly")]
    WorkerLost,
}

impl EvalError {
    /// The thrown value for [`EvalError::Runtime`].
    pub fn thrown(&self) -> Option<&Value> {
        match self {
            EvalError::Runtime { value, .. } => Some(value),
            _ => None,
        }
    }
}

/// Failure registering a host function.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BridgeError {
    #[error("Duplicate name: '{0}' is already registered")]
    DuplicateName(String),

    #[error("Invalid name: {0:?} is not a valid script identifier")]
    InvalidName(String),

    #[error("Engine rejected registration: {0}")]
    Engine(String),

    #[error("Context used after release")]
    UseAfterRelease,

    #[error("Context worker terminated unexpectedly")]
    WorkerLost,
}

/// Failure creating a context.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CreateError {
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("Invalid resource limits: {0}")]
    InvalidLimits(String),
}

/// Failure signalled by a host function. Raised in script as an `Error`
/// carrying the message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct HostError {
    message: String,
}

impl HostError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<String> for HostError {
    fn from(message: String) -> Self {
        Self { message }
    }
}

impl From<&str> for HostError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<MarshalError> for HostError {
    fn from(err: MarshalError) -> Self {
        Self { message: err.to_string() }
    }
}

pub type Result<T, E = EvalError> = std::result::Result<T, E>;
