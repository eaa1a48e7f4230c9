//! Twine template evaluator.
//!
//! One evaluator backs both [`Template::render`] and [`Template::render_async`].
//! Deferred values are represented by [`ThenableValue`], a promise-like cell
//! that runs handlers synchronously whenever its value is already known, so a
//! synchronous render that never touches a pending value takes the same code
//! path as an asynchronous one and finishes without a scheduler.
//!
//! Errors raised by templates and extensions are `Error` values carried by
//! rejections and propagate with Rust's `?` operator.

mod bridge;
mod collect;
mod error;
mod interpreter;
mod loader;
mod mode;
mod registry;
mod sequence;
mod thenable;
mod value;

pub mod ast;
pub mod builtins;

pub use bridge::{Settled, TaskThenable};
pub use collect::all;
pub use error::{Error, ExtensionKind};
pub use interpreter::{Environment, EnvironmentBuilder, EnvironmentOptions, Template};
pub use loader::{Loader, MemoryLoader};
pub use mode::{and_then, EvalMode};
pub use registry::{FilterFn, FunctionFn, Registry, TestFn};
pub use sequence::run;
pub use thenable::{is_thenable, Callback, OnFulfilled, OnRejected, Resolver, Thenable, ThenableValue};
pub use value::{ThenableRef, Value, ValueMap};

/// Result type for evaluator operations.
pub type Result<T> = std::result::Result<T, Error>;
