//! Named extension tables owned by an [`Environment`](crate::Environment).

use std::rc::Rc;

use indexmap::IndexMap;

use crate::error::{Error, ExtensionKind};
use crate::value::Value;
use crate::Result;

/// A filter receives the filtered value and its arguments.
pub type FilterFn = Rc<dyn Fn(Value, Vec<Value>) -> Result<Value>>;

/// A function receives its call arguments.
pub type FunctionFn = Rc<dyn Fn(Vec<Value>) -> Result<Value>>;

/// A test receives the tested value and its arguments; the result's
/// truthiness is the answer.
pub type TestFn = Rc<dyn Fn(Value, Vec<Value>) -> Result<Value>>;

/// A typed lookup table from identifier to callable.
pub struct Registry<F> {
    kind: ExtensionKind,
    entries: IndexMap<String, F>,
}

impl<F> Registry<F> {
    pub fn new(kind: ExtensionKind) -> Self {
        Self {
            kind,
            entries: IndexMap::new(),
        }
    }

    /// Registers `entry` under `name`, returning the entry it replaced.
    pub fn insert(&mut self, name: impl Into<String>, entry: F) -> Option<F> {
        self.entries.insert(name.into(), entry)
    }

    /// Looks up `name`, failing with [`Error::NotFound`] when it is missing.
    pub fn get(&self, name: &str) -> Result<&F> {
        self.entries
            .get(name)
            .ok_or_else(|| Error::not_found(self.kind, name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn kind(&self) -> ExtensionKind {
        self.kind
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<F: Clone> Clone for Registry<F> {
    fn clone(&self) -> Self {
        Self {
            kind: self.kind,
            entries: self.entries.clone(),
        }
    }
}
