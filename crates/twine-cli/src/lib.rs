/// Twine renderer
///
/// Loads a JSON template and context from disk and renders them with
/// `twine-eval`, either synchronously or on a tokio `LocalSet`.

pub mod driver;
pub mod files;

pub use driver::{RenderOptions, Renderer};
pub use files::FileLoader;
