use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "shadecheck",
    author,
    version,
    about = "Preprocess, compile, hot-reload and trace GLSL shaders without a GPU"
)]
pub struct Cli {
    /// Engine configuration TOML; can also be supplied via the `SHADECHECK_CONFIG` env var.
    #[arg(long, global = true, env = "SHADECHECK_CONFIG", value_name = "PATH")]
    pub config: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the final code of one stage file after every directive is expanded.
    Preprocess(PreprocessArgs),
    /// Compile a shader from its stage files and report diagnostics.
    Check(CheckArgs),
    /// Recompile a shader whenever one of its files changes.
    Watch(WatchArgs),
    /// Run a scripted frame against a recording device and print its native calls.
    Trace(TraceArgs),
}

/// Options shared by every command that preprocesses shaders.
#[derive(Parser, Debug, Default, Clone)]
pub struct ShaderOptions {
    /// Define a macro for the `for` and `expect` directives (`NAME` or `NAME=VALUE`).
    #[arg(short = 'D', long = "define", value_name = "NAME[=VALUE]", value_parser = parse_define)]
    pub defines: Vec<(String, String)>,

    /// Additional include search directory.
    #[arg(short = 'I', long = "include", value_name = "DIR")]
    pub include: Vec<PathBuf>,

    /// Highest GLSL version the target accepts (overrides the configuration).
    #[arg(long, value_name = "VERSION")]
    pub glsl: Option<u32>,

    /// Do not declare the engine matrix uniforms in graphics stages.
    #[arg(long)]
    pub no_engine_uniforms: bool,
}

#[derive(Parser, Debug)]
pub struct PreprocessArgs {
    /// Stage source; the stage is inferred from the extension.
    #[arg(value_name = "FILE")]
    pub file: PathBuf,
    #[command(flatten)]
    pub shader: ShaderOptions,
}

#[derive(Parser, Debug)]
pub struct CheckArgs {
    /// Stage sources forming one shader.
    #[arg(value_name = "FILES", required = true)]
    pub files: Vec<PathBuf>,
    #[command(flatten)]
    pub shader: ShaderOptions,
}

#[derive(Parser, Debug)]
pub struct WatchArgs {
    /// Stage sources forming one shader.
    #[arg(value_name = "FILES", required = true)]
    pub files: Vec<PathBuf>,
    #[command(flatten)]
    pub shader: ShaderOptions,
    /// Stop after this many reloads (runs until interrupted when omitted).
    #[arg(long, value_name = "COUNT")]
    pub max_reloads: Option<usize>,
}

#[derive(Parser, Debug)]
pub struct TraceArgs {
    /// Surface size (e.g. `1280x720`).
    #[arg(long, value_name = "WIDTHxHEIGHT", default_value = "640x480", value_parser = parse_surface_size)]
    pub size: (u32, u32),
    /// Pretty-print the JSON output.
    #[arg(long)]
    pub pretty: bool,
}

pub fn parse() -> Cli {
    Cli::parse()
}

pub fn parse_define(value: &str) -> Result<(String, String), String> {
    let (name, value) = match value.split_once('=') {
        Some((name, value)) => (name.trim(), value.trim()),
        None => (value.trim(), "1"),
    };
    if name.is_empty() {
        return Err("macro name must not be empty".to_string());
    }
    if !name.chars().all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
        || name.starts_with(|ch: char| ch.is_ascii_digit())
    {
        return Err(format!("'{name}' is not a valid macro name"));
    }
    Ok((name.to_string(), value.to_string()))
}

pub fn parse_surface_size(value: &str) -> Result<(u32, u32), String> {
    let trimmed = value.trim();
    let (width, height) = trimmed
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("invalid size '{trimmed}'; expected WIDTHxHEIGHT"))?;
    let width: u32 = width
        .parse()
        .map_err(|_| format!("invalid width in '{trimmed}'"))?;
    let height: u32 = height
        .parse()
        .map_err(|_| format!("invalid height in '{trimmed}'"))?;
    if width == 0 || height == 0 {
        return Err("surface dimensions must be greater than zero".to_string());
    }
    Ok((width, height))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defines_default_to_one() {
        assert_eq!(parse_define("FAST"), Ok(("FAST".into(), "1".into())));
        assert_eq!(parse_define("LIGHTS=4"), Ok(("LIGHTS".into(), "4".into())));
        assert!(parse_define("=3").is_err());
        assert!(parse_define("2X=1").is_err());
    }

    #[test]
    fn parses_surface_sizes() {
        assert_eq!(parse_surface_size("1280x720"), Ok((1280, 720)));
        assert!(parse_surface_size("0x10").is_err());
        assert!(parse_surface_size("wide").is_err());
    }

    #[test]
    fn parses_check_arguments() {
        let cli = Cli::try_parse_from(["shadecheck", "check", "a.frag", "-D", "N=2", "-I", "inc"])
            .expect("parse");
        match cli.command {
            Command::Check(args) => {
                assert_eq!(args.files, vec![PathBuf::from("a.frag")]);
                assert_eq!(args.shader.defines, vec![("N".to_string(), "2".to_string())]);
                assert_eq!(args.shader.include, vec![PathBuf::from("inc")]);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
