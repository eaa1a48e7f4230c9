//! Render driver: ties files on disk to a twine-eval environment.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use twine_eval::{Environment, EnvironmentOptions, Template, Value};

use crate::files::FileLoader;

/// Options for a single render.
#[derive(Debug, Clone)]
pub struct RenderOptions {
    /// JSON node-list template to render
    pub input: PathBuf,
    /// JSON file holding the render context
    pub context: Option<PathBuf>,
    /// Include names mapped to template files
    pub includes: Vec<(String, PathBuf)>,
    pub strict_variables: bool,
    pub max_include_depth: Option<usize>,
}

impl RenderOptions {
    pub fn new(input: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            context: None,
            includes: Vec::new(),
            strict_variables: false,
            max_include_depth: None,
        }
    }

    pub fn context(mut self, path: impl Into<PathBuf>) -> Self {
        self.context = Some(path.into());
        self
    }

    pub fn include(mut self, name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        self.includes.push((name.into(), path.into()));
        self
    }

    pub fn strict_variables(mut self, strict: bool) -> Self {
        self.strict_variables = strict;
        self
    }

    pub fn max_include_depth(mut self, depth: usize) -> Self {
        self.max_include_depth = Some(depth);
        self
    }

    fn environment_options(&self) -> EnvironmentOptions {
        let options = EnvironmentOptions::new().strict_variables(self.strict_variables);
        match self.max_include_depth {
            Some(depth) => options.max_include_depth(depth),
            None => options,
        }
    }
}

/// Renders the template described by [`RenderOptions`].
pub struct Renderer {
    options: RenderOptions,
}

impl Renderer {
    pub fn new(options: RenderOptions) -> Self {
        Self { options }
    }

    /// Render synchronously, reading includes with blocking I/O.
    pub fn render(&self) -> Result<String> {
        let (template, context) = self.prepare(false)?;
        template
            .render(context)
            .map_err(|e| anyhow!("failed to render `{}`: {e}", template.name()))
    }

    /// Render asynchronously, reading includes through `tokio::fs`.
    ///
    /// Must be driven inside a `tokio::task::LocalSet`.
    pub async fn render_async(&self) -> Result<String> {
        let (template, context) = self.prepare(true)?;
        let output = template
            .render_async(context)
            .await
            .map_err(|e| anyhow!("failed to render `{}`: {e}", template.name()))?;
        Ok(output.to_string_value())
    }

    fn prepare(&self, deferred: bool) -> Result<(Template, Value)> {
        let input = &self.options.input;
        let source = fs::read_to_string(input)
            .with_context(|| format!("failed to read template {}", input.display()))?;
        let context = self.load_context()?;

        let env = Environment::builder()
            .options(self.options.environment_options())
            .loader(self.loader(deferred))
            .build();
        let template = env
            .compile(&template_name(input), &source)
            .map_err(|e| anyhow!("{e}"))?;
        tracing::info!(template = template.name(), deferred, "rendering");
        Ok((template, context))
    }

    fn load_context(&self) -> Result<Value> {
        let Some(path) = &self.options.context else {
            return Ok(Value::Null);
        };
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read context {}", path.display()))?;
        let json: serde_json::Value = serde_json::from_str(&text)
            .with_context(|| format!("invalid JSON in context {}", path.display()))?;
        Ok(Value::from(json))
    }

    fn loader(&self, deferred: bool) -> FileLoader {
        let base_dir = self.options.input.parent().map(Path::to_path_buf);
        self.options
            .includes
            .iter()
            .fold(FileLoader::new(base_dir), |loader, (name, path)| {
                loader.alias(name.as_str(), path.as_path())
            })
            .deferred(deferred)
    }
}

fn template_name(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
