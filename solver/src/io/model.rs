//! Language model backends.
//!
//! The [`LanguageModel`] trait decouples stages from the actual model client.
//! An empty response is a valid outcome meaning "no usable output"; backends
//! log their failures instead of returning errors.

use std::process::Command;
use std::time::Duration;

use tracing::{debug, instrument, warn};

use crate::io::config::ModelConfig;
use crate::io::process::{Exit, Limits, run_bounded};

const MODEL_PLACEHOLDER: &str = "{model}";

pub trait LanguageModel {
    fn name(&self) -> &str;

    /// Send `prompt` and return the response text (empty when unavailable).
    fn generate(&self, prompt: &str) -> String;
}

/// Model backed by an external CLI that reads the prompt from stdin.
#[derive(Debug, Clone)]
pub struct CommandModel {
    model: String,
    command: Vec<String>,
    limits: Limits,
}

impl CommandModel {
    pub fn new(model: impl Into<String>, config: &ModelConfig) -> Self {
        Self {
            model: model.into(),
            command: config.command.clone(),
            limits: Limits {
                timeout: Duration::from_secs(config.timeout_secs),
                output_bytes: config.output_limit_bytes,
            },
        }
    }

    fn argv(&self) -> Vec<String> {
        self.command
            .iter()
            .map(|arg| arg.replace(MODEL_PLACEHOLDER, &self.model))
            .collect()
    }
}

impl LanguageModel for CommandModel {
    fn name(&self) -> &str {
        &self.model
    }

    #[instrument(skip_all, fields(model = %self.model, prompt_bytes = prompt.len()))]
    fn generate(&self, prompt: &str) -> String {
        let argv = self.argv();
        let Some((program, args)) = argv.split_first() else {
            warn!("model command is empty");
            return String::new();
        };
        let mut cmd = Command::new(program);
        cmd.args(args);

        let output = match run_bounded(cmd, Some(prompt.as_bytes()), self.limits) {
            Ok(output) => output,
            Err(err) => {
                warn!(err = format!("{err:#}"), "error while prompting model");
                return String::new();
            }
        };

        match output.exit {
            Exit::TimedOut => {
                warn!(timeout_secs = self.limits.timeout.as_secs(), "model timed out");
                return String::new();
            }
            Exit::Finished(status) if !status.success() => {
                warn!(
                    exit_code = ?status.code(),
                    stderr = %output.stderr.text(),
                    "model command failed"
                );
                return String::new();
            }
            Exit::Finished(_) => {}
        }

        let response = output.stdout.text();
        debug!(response_bytes = response.len(), "model responded");
        response
    }
}
