//! Error types for the Twine evaluator.

use std::fmt;

use thiserror::Error;

use crate::value::Value;

/// The kind of named extension a failed lookup was for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtensionKind {
    Filter,
    Function,
    Test,
    Template,
}

impl fmt::Display for ExtensionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ExtensionKind::Filter => "Filter",
            ExtensionKind::Function => "Function",
            ExtensionKind::Test => "Test",
            ExtensionKind::Template => "Template",
        })
    }
}

/// Errors that can occur during evaluation.
///
/// This is also the rejection reason carried by every thenable. Reasons
/// raised by user code travel as [`Error::Exception`] and are never rewritten
/// on their way to the caller.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    /// An opaque reason raised by an extension or an executor.
    #[error("Exception: {}", .0.to_string_value())]
    Exception(Value),
    /// No filter, function, test or template is registered under this name.
    #[error("{kind} `{name}` is not defined")]
    NotFound { kind: ExtensionKind, name: String },
    /// A variable or attribute is missing and strict variables are on.
    #[error("Variable `{0}` does not exist")]
    Undefined(String),
    /// An operand had the wrong shape.
    #[error("Type error: {0}")]
    Type(String),
    /// Synchronous rendering met a value that has not settled yet.
    #[error("{0} did not settle synchronously; use asynchronous rendering")]
    Unsettled(String),
    /// Template source could not be turned into a node tree.
    #[error("Template error: {0}")]
    Template(String),
    /// Includes nested deeper than the configured limit.
    #[error("Include depth limit of {0} exceeded")]
    IncludeDepth(usize),
}

impl Error {
    /// Wrap an arbitrary value as a rejection reason.
    pub fn exception(reason: impl Into<Value>) -> Self {
        Error::Exception(reason.into())
    }

    pub(crate) fn not_found(kind: ExtensionKind, name: &str) -> Self {
        Error::NotFound {
            kind,
            name: name.to_string(),
        }
    }

    /// The user-supplied reason, if this is an exception.
    pub fn reason(&self) -> Option<&Value> {
        match self {
            Error::Exception(value) => Some(value),
            _ => None,
        }
    }
}
