/// Twine renderer CLI

use std::fs;
use std::path::PathBuf;
use std::process;

use anyhow::Context;
use clap::Parser;
use tokio::task::LocalSet;
use tracing_subscriber::EnvFilter;
use twine_eval::EnvironmentOptions;
use twine_cli::{RenderOptions, Renderer};

#[derive(Parser, Debug)]
#[command(name = "twine")]
#[command(about = "Twine renderer - renders JSON node-list templates")]
#[command(version)]
struct Args {
    /// Template file (a JSON node list)
    #[arg(value_name = "FILE")]
    input: PathBuf,

    /// JSON file with the render context
    #[arg(short, long, value_name = "FILE")]
    context: Option<PathBuf>,

    /// Map an include name to a template file
    #[arg(short = 'I', long = "include", value_name = "NAME=PATH", value_parser = parse_include)]
    includes: Vec<(String, PathBuf)>,

    /// Fail on undefined variables instead of rendering them empty
    #[arg(long)]
    strict_variables: bool,

    /// Maximum include nesting depth
    #[arg(long, value_name = "N", default_value_t = EnvironmentOptions::default().max_include_depth)]
    max_include_depth: usize,

    /// Render asynchronously, reading includes without blocking
    #[arg(long = "async")]
    async_mode: bool,

    /// Write the output here instead of stdout
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    if let Err(e) = run(args) {
        eprintln!("Render failed: {e:#}");
        process::exit(1);
    }
}

fn run(args: Args) -> anyhow::Result<()> {
    let mut options = RenderOptions::new(args.input)
        .strict_variables(args.strict_variables)
        .max_include_depth(args.max_include_depth);
    if let Some(context) = args.context {
        options = options.context(context);
    }
    for (name, path) in args.includes {
        options = options.include(name, path);
    }

    let renderer = Renderer::new(options);
    let output = if args.async_mode {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context("failed to start the async runtime")?;
        LocalSet::new().block_on(&runtime, renderer.render_async())?
    } else {
        renderer.render()?
    };

    match args.output {
        Some(path) => {
            fs::write(&path, &output)
                .with_context(|| format!("failed to write {}", path.display()))?;
            tracing::info!(path = %path.display(), bytes = output.len(), "wrote output");
        }
        None => print!("{output}"),
    }
    Ok(())
}

fn parse_include(raw: &str) -> Result<(String, PathBuf), String> {
    match raw.split_once('=') {
        Some((name, path)) if !name.is_empty() && !path.is_empty() => {
            Ok((name.to_string(), PathBuf::from(path)))
        }
        _ => Err(format!("expected NAME=PATH, got `{raw}`")),
    }
}
