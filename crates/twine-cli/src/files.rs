//! Loading included templates from the filesystem.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use twine_eval::{Error, ExtensionKind, Loader, TaskThenable, Value};

/// Resolves include names to files.
///
/// Explicit aliases win; otherwise the name is taken as a path relative to the
/// base directory, which is the root template's directory for every include
/// depth. Names that are absolute or step outside the base directory with
/// `..` do not resolve. A deferred loader reads through `tokio::fs` on the current
/// `LocalSet`, which only asynchronous renders can wait for.
#[derive(Debug, Clone, Default)]
pub struct FileLoader {
    base_dir: Option<PathBuf>,
    aliases: HashMap<String, PathBuf>,
    deferred: bool,
}

impl FileLoader {
    pub fn new(base_dir: Option<PathBuf>) -> Self {
        Self {
            base_dir,
            ..Self::default()
        }
    }

    pub fn alias(mut self, name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        self.aliases.insert(name.into(), path.into());
        self
    }

    pub fn deferred(mut self, deferred: bool) -> Self {
        self.deferred = deferred;
        self
    }

    /// The file `name` refers to, if any.
    pub fn resolve(&self, name: &str) -> Option<PathBuf> {
        if let Some(path) = self.aliases.get(name) {
            return Some(path.clone());
        }
        let relative = Path::new(name);
        if !relative
            .components()
            .all(|component| matches!(component, Component::Normal(_) | Component::CurDir))
        {
            return None;
        }
        self.base_dir
            .as_ref()
            .map(|dir| dir.join(relative))
            .filter(|path| path.is_file())
    }
}

impl Loader for FileLoader {
    fn load(&self, name: &str) -> twine_eval::Result<Value> {
        let path = self.resolve(name).ok_or_else(|| Error::NotFound {
            kind: ExtensionKind::Template,
            name: name.to_string(),
        })?;
        tracing::debug!(template = name, path = %path.display(), deferred = self.deferred, "loading include");

        if !self.deferred {
            return fs::read_to_string(&path)
                .map(Value::from)
                .map_err(|e| read_error(&path, e));
        }

        let task = TaskThenable::spawn(async move {
            tokio::fs::read_to_string(&path)
                .await
                .map(Value::from)
                .map_err(|e| read_error(&path, e))
        });
        Ok(task.into())
    }
}

fn read_error(path: &Path, err: io::Error) -> Error {
    Error::Template(format!("failed to read {}: {err}", path.display()))
}
