use std::path::Path;

use anyhow::{Context, Result};
use halconfig::EngineConfig;
use rendercore::{Args, ShaderManager};
use shaderprep::PreprocessOptions;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Command, ShaderOptions};
use crate::{inspect, trace, watch};

pub fn run(cli: Cli) -> Result<()> {
    initialise_tracing();

    let config = load_config(cli.config.as_deref())?;
    match cli.command {
        Command::Preprocess(args) => inspect::preprocess(&config, &args),
        Command::Check(args) => inspect::check(&config, &args),
        Command::Watch(args) => watch::watch(&config, &args),
        Command::Trace(args) => trace::trace(&config, &args),
    }
}

fn initialise_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    match path {
        Some(path) => EngineConfig::from_path(path)
            .with_context(|| format!("failed to load configuration {}", path.display())),
        None => Ok(EngineConfig::default()),
    }
}

/// Configuration merged with command-line overrides.
pub fn preprocess_options(config: &EngineConfig, options: &ShaderOptions) -> PreprocessOptions {
    let mut merged = config.preprocess_options();
    merged
        .include
        .search_paths
        .extend(options.include.iter().cloned());
    if let Some(glsl) = options.glsl {
        merged.glsl_capability = glsl;
    }
    if options.no_engine_uniforms {
        merged.engine_uniforms = false;
    }
    merged
}

pub fn macro_args(options: &ShaderOptions) -> Args {
    let mut args = Args::new();
    for (name, value) in &options.defines {
        args.set_macro(name.as_str(), value);
    }
    args
}

pub fn shader_manager(config: &EngineConfig, options: &ShaderOptions) -> ShaderManager {
    ShaderManager::new(preprocess_options(config, options))
        .with_policy(config.shaders.failure_policy)
        .with_preprocess_cache(config.shaders.cache_preprocessed)
}
