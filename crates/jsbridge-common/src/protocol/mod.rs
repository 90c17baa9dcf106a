pub mod error;
pub mod value;


pub use error::{BridgeError, CreateError, EvalError, HostError, MarshalError, Result};
pub use value::{Array, Object, Value};
