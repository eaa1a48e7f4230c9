//! The evaluation mode threaded through every evaluator entry point.
//!
//! One evaluator serves both rendering APIs. Each entry point takes an
//! [`EvalMode`], passes it unchanged to nested calls, and hands its result
//! back through [`EvalMode::finish`]:
//!
//! - `Async` entry points always return a [`Value::Thenable`], wrapping
//!   immediate results and turning errors into rejections.
//! - `Sync` entry points always return a plain value. Results built from the
//!   thenable primitives are read off their synchronous fast path.
//!
//! Extensions (filters, functions, tests, loaders) may hand back thenables
//! that a synchronous render cannot wait for. Their results pass through
//! [`EvalMode::accept`], which fails with [`Error::Unsettled`] rather than
//! letting an incomplete value through.

use crate::error::Error;
use crate::thenable::ThenableValue;
use crate::value::Value;
use crate::Result;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EvalMode {
    /// Produce plain values immediately.
    #[default]
    Sync,
    /// Produce thenables that may settle later.
    Async,
}

impl EvalMode {
    pub fn is_async(self) -> bool {
        self == EvalMode::Async
    }

    /// Hand `result` back in the shape this mode promises.
    pub fn finish(self, result: Result<Value>, what: &str) -> Result<Value> {
        match self {
            EvalMode::Async => Ok(ThenableValue::from_result(result).into()),
            EvalMode::Sync => match result? {
                Value::Thenable(thenable) => ThenableValue::resolve(Value::Thenable(thenable))
                    .into_settled(what),
                plain => Ok(plain),
            },
        }
    }

    /// Check a value returned by an extension named by `what`.
    ///
    /// In sync mode a thenable is accepted only if it has already settled.
    pub fn accept(self, value: Value, what: &str) -> Result<Value> {
        match (self, value) {
            (EvalMode::Sync, Value::Thenable(thenable)) => {
                ThenableValue::resolve(Value::Thenable(thenable)).into_settled(what)
            }
            (_, value) => Ok(value),
        }
    }
}

/// Applies `f` to `value` now if it is plain, or once it settles.
pub fn and_then<F>(value: Value, f: F) -> Result<Value>
where
    F: FnOnce(Value) -> Result<Value> + 'static,
{
    match value {
        Value::Thenable(_) => Ok(ThenableValue::resolve(value).then(f).into()),
        plain => f(plain),
    }
}
