//! Template source loading.

use indexmap::IndexMap;

use crate::error::{Error, ExtensionKind};
use crate::value::Value;
use crate::Result;

/// Fetches template source by name.
///
/// The returned value is the JSON node list as a string, or a thenable that
/// fulfills with one. Returning a pending thenable restricts the template to
/// asynchronous rendering.
pub trait Loader {
    fn load(&self, name: &str) -> Result<Value>;
}

impl<F> Loader for F
where
    F: Fn(&str) -> Result<Value>,
{
    fn load(&self, name: &str) -> Result<Value> {
        self(name)
    }
}

/// Serves templates from memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryLoader {
    templates: IndexMap<String, String>,
}

impl MemoryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a template, builder style.
    pub fn with_template(mut self, name: impl Into<String>, source: impl Into<String>) -> Self {
        self.insert(name, source);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, source: impl Into<String>) {
        self.templates.insert(name.into(), source.into());
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

impl Loader for MemoryLoader {
    fn load(&self, name: &str) -> Result<Value> {
        self.templates
            .get(name)
            .map(|source| Value::String(source.clone()))
            .ok_or_else(|| Error::not_found(ExtensionKind::Template, name))
    }
}
