use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rendercore::{FailurePolicy, StackOptions};
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use shaderprep::{IncludeOptions, PreprocessOptions, VALID_GLSL_VERSIONS};
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read configuration {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct EngineConfig {
    pub version: u32,
    #[serde(default)]
    pub shaders: ShaderSettings,
    #[serde(default)]
    pub state: StateSettings,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ShaderSettings {
    pub failure_policy: FailurePolicy,
    /// Highest GLSL version the driver accepts.
    pub glsl_version: u32,
    pub include_paths: Vec<PathBuf>,
    pub include_once: bool,
    pub max_include_depth: usize,
    /// Extra `#extension` lines placed ahead of every stage.
    pub extensions: Vec<String>,
    pub engine_uniforms: bool,
    pub cache_preprocessed: bool,
    #[serde(deserialize_with = "deserialize_duration", serialize_with = "serialize_duration")]
    pub reload_poll_interval: Duration,
}

impl Default for ShaderSettings {
    fn default() -> Self {
        Self {
            failure_policy: FailurePolicy::default(),
            glsl_version: 450,
            include_paths: Vec::new(),
            include_once: true,
            max_include_depth: 32,
            extensions: Vec::new(),
            engine_uniforms: true,
            cache_preprocessed: true,
            reload_poll_interval: default_poll_interval(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct StateSettings {
    pub track_stats: bool,
    pub max_stack_depth: usize,
}

impl Default for StateSettings {
    fn default() -> Self {
        Self {
            track_stats: true,
            max_stack_depth: 64,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            version: 1,
            shaders: ShaderSettings::default(),
            state: StateSettings::default(),
        }
    }
}

fn default_poll_interval() -> Duration {
    Duration::from_millis(500)
}

fn serialize_duration<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_str(&humantime::format_duration(*value).to_string())
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    struct Visitor;
    impl<'de> de::Visitor<'de> for Visitor {
        type Value = Duration;

        fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
            formatter.write_str("a duration as number of seconds or human-readable string")
        }

        fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            humantime::parse_duration(v).map_err(|err| E::custom(format!("invalid duration '{v}': {err}")))
        }

        fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(Duration::from_secs(v))
        }

        fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            if v < 0 {
                return Err(E::custom("duration must be non-negative"));
            }
            Ok(Duration::from_secs(v as u64))
        }

        fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Duration::try_from_secs_f64(v).map_err(|err| E::custom(format!("invalid duration {v}: {err}")))
        }
    }

    deserializer.deserialize_any(Visitor)
}

impl EngineConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let raw: EngineConfig = toml::from_str(input)?;
        raw.validate()?;
        Ok(raw)
    }

    /// Loads `path`; relative include paths are taken relative to the
    /// directory holding the file.
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let input = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_toml_str(&input)?;
        if let Some(base) = path.parent() {
            for include in &mut config.shaders.include_paths {
                if include.is_relative() {
                    *include = base.join(&*include);
                }
            }
        }
        debug!(
            path = %path.display(),
            policy = %config.shaders.failure_policy,
            glsl = config.shaders.glsl_version,
            "loaded engine configuration"
        );
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.version != 1 {
            return Err(ConfigError::Invalid(format!(
                "unsupported config version {}; expected 1",
                self.version
            )));
        }

        let shaders = &self.shaders;
        if !VALID_GLSL_VERSIONS.contains(&shaders.glsl_version) {
            return Err(ConfigError::Invalid(format!(
                "shaders.glsl_version {} is not a GLSL version",
                shaders.glsl_version
            )));
        }

        if shaders.include_paths.iter().any(|path| path.as_os_str().is_empty()) {
            return Err(ConfigError::Invalid(
                "shaders.include_paths may not contain empty entries".into(),
            ));
        }

        if shaders.max_include_depth == 0 {
            return Err(ConfigError::Invalid(
                "shaders.max_include_depth must be greater than zero".into(),
            ));
        }

        for line in &shaders.extensions {
            if !line.trim_start().starts_with("#extension") {
                return Err(ConfigError::Invalid(format!(
                    "shaders.extensions entry '{line}' is not an #extension directive"
                )));
            }
        }

        if shaders.reload_poll_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "shaders.reload_poll_interval must be greater than zero".into(),
            ));
        }

        if self.state.max_stack_depth == 0 {
            return Err(ConfigError::Invalid(
                "state.max_stack_depth must be greater than zero".into(),
            ));
        }

        Ok(())
    }

    pub fn preprocess_options(&self) -> PreprocessOptions {
        PreprocessOptions {
            include: IncludeOptions {
                search_paths: self.shaders.include_paths.clone(),
                include_once: self.shaders.include_once,
                max_depth: self.shaders.max_include_depth,
            },
            glsl_capability: self.shaders.glsl_version,
            default_extensions: self.shaders.extensions.clone(),
            engine_uniforms: self.shaders.engine_uniforms,
        }
    }

    pub fn stack_options(&self) -> StackOptions {
        StackOptions {
            max_depth: self.state.max_stack_depth,
            track_stats: self.state.track_stats,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r##"
version = 1

[shaders]
failure_policy = "prompt"
glsl_version = 330
include_paths = ["shaders/include", "/usr/share/hal"]
extensions = ["#extension GL_ARB_separate_shader_objects : enable"]
cache_preprocessed = false
reload_poll_interval = "250ms"

[state]
track_stats = false
max_stack_depth = 16
"##;

    #[test]
    fn parses_sample_config() {
        let config = EngineConfig::from_toml_str(SAMPLE).expect("parse config");
        assert_eq!(config.shaders.failure_policy, FailurePolicy::Prompt);
        assert_eq!(config.shaders.glsl_version, 330);
        assert_eq!(config.shaders.include_paths.len(), 2);
        assert!(!config.shaders.cache_preprocessed);
        assert_eq!(config.shaders.reload_poll_interval, Duration::from_millis(250));
        assert_eq!(
            config.stack_options(),
            StackOptions {
                max_depth: 16,
                track_stats: false
            }
        );
    }

    #[test]
    fn minimal_config_matches_default() {
        let config = EngineConfig::from_toml_str("version = 1\n").expect("parse config");
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn durations_accept_plain_seconds() {
        let config = EngineConfig::from_toml_str("version = 1\n[shaders]\nreload_poll_interval = 2\n")
            .expect("parse config");
        assert_eq!(config.shaders.reload_poll_interval, Duration::from_secs(2));
    }

    #[test]
    fn rejects_unrepresentable_durations() {
        for value in ["-0.5", "1e300", "inf", "nan"] {
            let input = format!("version = 1\n[shaders]\nreload_poll_interval = {value}\n");
            let err = EngineConfig::from_toml_str(&input).unwrap_err();
            assert!(matches!(err, ConfigError::Parse(_)), "{value}");
        }
        let config = EngineConfig::from_toml_str("version = 1\n[shaders]\nreload_poll_interval = 0.25\n")
            .expect("parse config");
        assert_eq!(config.shaders.reload_poll_interval, Duration::from_millis(250));
    }

    #[test]
    fn accepts_glsl_460() {
        let config = EngineConfig::from_toml_str("version = 1\n[shaders]\nglsl_version = 460\n")
            .expect("parse config");
        assert_eq!(config.preprocess_options().glsl_capability, 460);
    }

    #[test]
    fn rejects_unknown_version() {
        let err = EngineConfig::from_toml_str("version = 2\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_bad_glsl_version() {
        let err = EngineConfig::from_toml_str("version = 1\n[shaders]\nglsl_version = 335\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_unknown_policy() {
        let err = EngineConfig::from_toml_str("version = 1\n[shaders]\nfailure_policy = \"loud\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn rejects_malformed_extension_lines() {
        let err = EngineConfig::from_toml_str("version = 1\n[shaders]\nextensions = [\"GL_foo : enable\"]\n")
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn maps_onto_preprocess_options() {
        let config = EngineConfig::from_toml_str(SAMPLE).expect("parse config");
        let options = config.preprocess_options();
        assert_eq!(options.glsl_capability, 330);
        assert_eq!(options.default_extensions.len(), 1);
        assert_eq!(options.include.search_paths[1], PathBuf::from("/usr/share/hal"));
        assert!(options.include.include_once);
        assert_eq!(options.include.max_depth, 32);
    }
}
