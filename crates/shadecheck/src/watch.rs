use std::fs;
use std::path::PathBuf;
use std::thread;
use std::time::SystemTime;

use anyhow::Result;
use halconfig::EngineConfig;
use rendercore::{NagaBackend, Shader, ShaderError};
use tracing::{info, warn};

use crate::cli::WatchArgs;
use crate::run::{macro_args, shader_manager};

type Stamps = Vec<(PathBuf, Option<SystemTime>)>;

fn modification_times(paths: Vec<PathBuf>) -> Stamps {
    paths
        .into_iter()
        .map(|path| {
            let modified = fs::metadata(&path).and_then(|meta| meta.modified()).ok();
            (path, modified)
        })
        .collect()
}

/// Polls the shader's files and recompiles every cached variant on change.
///
/// A failed reload keeps the previous program and logs the remapped
/// compiler output; the next change tries again.
pub fn watch(config: &EngineConfig, args: &WatchArgs) -> Result<()> {
    let mut shaders = shader_manager(config, &args.shader);
    let id = shaders.load(Shader::from_files(&args.files)?);
    let mut backend = NagaBackend::new();
    let macros = macro_args(&args.shader);

    if let Err(err) = shaders.resolve(id, &macros, &mut backend) {
        warn!("{err}");
    }

    let interval = config.shaders.reload_poll_interval;
    let mut stamps = modification_times(shaders.source_paths());
    info!(files = stamps.len(), interval = ?interval, "watching shader sources");

    let mut reloads = 0;
    while args.max_reloads.map_or(true, |max| reloads < max) {
        thread::sleep(interval);
        let current = modification_times(shaders.source_paths());
        if current == stamps {
            continue;
        }
        stamps = current;
        reloads += 1;

        if shaders.variant_count(id) == 0 {
            shaders.reload(id, &mut backend)?;
            match shaders.resolve(id, &macros, &mut backend) {
                Ok(_) => info!("shader compiled"),
                Err(err) => warn!("{err}"),
            }
            continue;
        }
        match shaders.reload_all(&mut backend) {
            Ok(report) if report.is_clean() => {
                println!("reloaded {} variant(s)", report.recompiled);
            }
            Ok(report) => {
                for (shader, log) in &report.failures {
                    eprintln!("{shader}: reload failed\n{log}");
                }
            }
            Err(ShaderError::Aborted(name)) => {
                info!(shader = %name, "reload aborted, leaving watch");
                break;
            }
            Err(err) => eprintln!("reload failed, keeping previous programs\n{err}"),
        }
    }
    Ok(())
}
