//! Sandboxed execution of generated code against a single input.
//!
//! Every call writes the code and the input to fresh temporary files that are
//! removed when the call returns, whatever the outcome. Timeouts and launch
//! failures collapse to [`ExecutionResult::unavailable`]; callers own any
//! retry policy.

use std::io::Write;
use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tempfile::NamedTempFile;
use tracing::{debug, info, instrument, warn};

use crate::core::decision::ExecutionResult;
use crate::io::config::SandboxConfig;
use crate::io::process::{Exit, Limits, run_bounded};

/// Abstraction over code execution so debugging can be tested without processes.
pub trait CodeRunner {
    fn run(&self, code: &str, input: &str) -> ExecutionResult;
}

/// Runs code through an interpreter as `<interpreter...> <code file> <input file>`.
#[derive(Debug, Clone)]
pub struct Sandbox {
    interpreter: Vec<String>,
    code_suffix: String,
    limits: Limits,
    scratch_dir: Option<PathBuf>,
}

impl Sandbox {
    pub fn new(config: &SandboxConfig) -> Self {
        Self {
            interpreter: config.interpreter.clone(),
            code_suffix: config.code_suffix.clone(),
            limits: Limits {
                timeout: Duration::from_secs(config.timeout_secs),
                output_bytes: config.output_limit_bytes,
            },
            scratch_dir: None,
        }
    }

    /// Place temporary artifacts under `dir` instead of the system temp dir.
    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = Some(dir.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.limits.timeout = timeout;
        self
    }

    fn temp_file(&self, suffix: &str, contents: &str) -> Result<NamedTempFile> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("solver-").suffix(suffix);
        let mut file = match &self.scratch_dir {
            Some(dir) => builder.tempfile_in(dir),
            None => builder.tempfile(),
        }
        .context("create temp file")?;
        file.write_all(contents.as_bytes())
            .context("write temp file")?;
        file.flush().context("flush temp file")?;
        Ok(file)
    }

    fn try_run(&self, code: &str, input: &str) -> Result<ExecutionResult> {
        let (program, args) = self
            .interpreter
            .split_first()
            .ok_or_else(|| anyhow!("sandbox interpreter is empty"))?;

        // Both handles live until the end of this function; dropping them
        // deletes the files on every exit path.
        let code_file = self.temp_file(&self.code_suffix, code)?;
        let input_file = self.temp_file(".txt", input)?;
        debug!(
            code = %code_file.path().display(),
            input = %input_file.path().display(),
            "wrote sandbox artifacts"
        );

        let mut cmd = Command::new(program);
        cmd.args(args).arg(code_file.path()).arg(input_file.path());

        let output = run_bounded(cmd, None, self.limits).context("run generated code")?;
        let Exit::Finished(status) = output.exit else {
            warn!(timeout_secs = self.limits.timeout.as_secs(), "generated code timed out");
            return Ok(ExecutionResult::unavailable());
        };

        let stdout = output.stdout.text();
        let stderr = output.stderr.text();
        debug!(exit_code = ?status.code(), %stdout, %stderr, "generated code finished");
        Ok(ExecutionResult {
            stdout: Some(stdout),
            stderr: (!stderr.is_empty()).then_some(stderr),
        })
    }
}

impl CodeRunner for Sandbox {
    #[instrument(skip_all, fields(timeout_secs = self.limits.timeout.as_secs()))]
    fn run(&self, code: &str, input: &str) -> ExecutionResult {
        info!("running generated code");
        match self.try_run(code, input) {
            Ok(result) => result,
            Err(err) => {
                warn!(err = format!("{err:#}"), "could not execute generated code");
                ExecutionResult::unavailable()
            }
        }
    }
}
