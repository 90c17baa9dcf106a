pub mod context;
pub mod lifecycle;

mod bindings;
mod conversions;
mod engine;
mod worker;


pub use bindings::HostFn;
pub use context::Context;
pub use lifecycle::{Runtime, ensure_initialized};
