use anyhow::{anyhow, bail, Context, Result};
use halconfig::EngineConfig;
use rendercore::shader::ShaderError;
use rendercore::{NagaBackend, Shader};
use shaderprep::{preprocess_stages, Diagnostics, ShaderStage, StageSources};
use tracing::{info, warn};

use crate::cli::{CheckArgs, PreprocessArgs};
use crate::run::{macro_args, preprocess_options, shader_manager};

/// Prints the assembled code for one stage file.
pub fn preprocess(config: &EngineConfig, args: &PreprocessArgs) -> Result<()> {
    let stage = ShaderStage::from_path(&args.file)
        .with_context(|| format!("cannot infer a shader stage from {}", args.file.display()))?;
    let mut sources = StageSources::new();
    sources.set_file(stage, &args.file)?;

    let options = preprocess_options(config, &args.shader);
    let preprocessed = preprocess_stages(&sources, &options);
    for message in preprocessed.diagnostics.messages() {
        warn!(file = %args.file.display(), "{message}");
    }

    let loaded = preprocessed
        .stage(stage)
        .ok_or_else(|| anyhow!("{} produced no {stage} stage", args.file.display()))?;
    let macros = macro_args(&args.shader);
    let mut diagnostics = Diagnostics::new();
    let code = preprocessed
        .assemble(loaded, &macros.preamble_and_macro_string(), &macros, &options, &mut diagnostics)
        .ok_or_else(|| anyhow!("failed to preprocess {}:\n{diagnostics}", args.file.display()))?;
    print!("{code}");
    Ok(())
}

/// Compiles the shader formed by the given stage files.
pub fn check(config: &EngineConfig, args: &CheckArgs) -> Result<()> {
    let shader = Shader::from_files(&args.files)?;
    let name = shader.name().to_string();
    let mut shaders = shader_manager(config, &args.shader);
    let id = shaders.load(shader);
    let mut backend = NagaBackend::new();

    match shaders.resolve(id, &macro_args(&args.shader), &mut backend) {
        Ok(program) => {
            info!(
                shader = %name,
                uniforms = program.uniforms().len(),
                attributes = program.attributes().len(),
                "shader compiled"
            );
            println!("{name}: ok");
            Ok(())
        }
        Err(ShaderError::Compile { shader, log }) => {
            eprint!("{log}");
            bail!("shader {shader} failed to compile")
        }
        Err(err) => Err(err.into()),
    }
}
