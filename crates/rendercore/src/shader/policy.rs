use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::error;

/// What happens when a shader variant fails to compile.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Log at debug level. A reload keeps the stale program and only lists
    /// the failure in its report; a first compile still returns the error.
    Silent,
    /// Log a warning and return the error, from reloads too.
    #[default]
    Error,
    /// Ask the installed [`RecoveryPrompt`] what to do.
    Prompt,
}

impl FromStr for FailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "silent" => Ok(FailurePolicy::Silent),
            "error" => Ok(FailurePolicy::Error),
            "prompt" => Ok(FailurePolicy::Prompt),
            other => Err(format!(
                "unknown failure policy '{other}' (expected silent, error or prompt)"
            )),
        }
    }
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FailurePolicy::Silent => "silent",
            FailurePolicy::Error => "error",
            FailurePolicy::Prompt => "prompt",
        })
    }
}

/// Answer to a failed compile under [`FailurePolicy::Prompt`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RecoveryAction {
    /// Re-read this shader's sources and compile again.
    Retry,
    /// Reload every shader, then compile this one again. Inside
    /// [`crate::shader::ShaderManager::reload_all`] this acts like `Retry`.
    Reload,
    /// Give up with [`crate::shader::ShaderError::Aborted`].
    Abort,
    /// Return the compile error as if the policy were `Error`.
    Ignore,
}

/// Decides how to recover from a compile failure.
pub trait RecoveryPrompt: Send {
    /// `log` is the remapped compiler output for `shader`.
    fn on_failure(&mut self, shader: &str, log: &str) -> RecoveryAction;
}

/// Prompt without a user: logs the failure and ignores it.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggedPrompt;

impl RecoveryPrompt for LoggedPrompt {
    fn on_failure(&mut self, shader: &str, log: &str) -> RecoveryAction {
        error!(shader = %shader, "shader compilation failed:\n{log}");
        RecoveryAction::Ignore
    }
}

impl<F> RecoveryPrompt for F
where
    F: FnMut(&str, &str) -> RecoveryAction + Send,
{
    fn on_failure(&mut self, shader: &str, log: &str) -> RecoveryAction {
        self(shader, log)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_policy_names() {
        assert_eq!("Prompt".parse::<FailurePolicy>(), Ok(FailurePolicy::Prompt));
        assert_eq!(FailurePolicy::default(), FailurePolicy::Error);
        assert!("loud".parse::<FailurePolicy>().is_err());
        assert_eq!(FailurePolicy::Silent.to_string(), "silent");
    }

    #[test]
    fn closures_act_as_prompts() {
        let mut calls = 0;
        let mut prompt = |_: &str, _: &str| {
            calls += 1;
            RecoveryAction::Abort
        };
        assert_eq!(prompt.on_failure("sky", "0(1) : error"), RecoveryAction::Abort);
        drop(prompt);
        assert_eq!(calls, 1);
    }
}
