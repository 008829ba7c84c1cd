//! Solver configuration stored under `.solver/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::budget::AttemptCaps;
use crate::core::similarity::FieldWeights;

pub const DEFAULT_CONFIG_PATH: &str = ".solver/config.toml";

/// Solver configuration (TOML).
///
/// Missing fields default to the values the pipeline was tuned with.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SolverConfig {
    /// The orchestrator stops once debug attempts exceed this.
    pub max_debug_attempts: u32,

    /// Fixes the debugging stage may apply to code directly.
    pub max_code_fixes: u32,

    /// Suggestions the debugging stage may hand back to coding.
    pub max_delegations: u32,

    /// Retries for malformed model output within one stage invocation.
    pub max_response_retries: u32,

    /// Candidate plans generated per planning pass.
    pub plan_count: u32,

    /// Similar puzzles (and solutions per puzzle) fetched by retrieval.
    pub retrieval_limit: usize,

    /// JSON file holding reference puzzles and solutions.
    pub store_path: PathBuf,

    /// Per-field weights for puzzle similarity.
    pub similarity_weights: FieldWeights,

    pub sandbox: SandboxConfig,

    pub model: ModelConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SandboxConfig {
    /// Command used to run generated code, e.g. `["python3"]`.
    pub interpreter: Vec<String>,

    /// File suffix for the temporary code artifact.
    pub code_suffix: String,

    /// Language named in coding prompts; must match `interpreter`.
    pub language: String,

    /// Wall-clock limit per execution.
    pub timeout_secs: u64,

    pub output_limit_bytes: usize,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            interpreter: vec!["python3".to_string()],
            code_suffix: ".py".to_string(),
            language: "Python 3".to_string(),
            timeout_secs: 5,
            output_limit_bytes: 100_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ModelConfig {
    /// Model used by stages without an explicit override.
    pub default: String,

    /// Model CLI; every `{model}` argument is replaced by the model name.
    /// The prompt is written to stdin and the response read from stdout.
    pub command: Vec<String>,

    pub timeout_secs: u64,

    pub output_limit_bytes: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            default: "gemini-2.0-flash".to_string(),
            command: vec!["llm".to_string(), "-m".to_string(), "{model}".to_string()],
            timeout_secs: 300,
            output_limit_bytes: 1_000_000,
        }
    }
}

impl Default for SolverConfig {
    fn default() -> Self {
        let caps = AttemptCaps::default();
        Self {
            max_debug_attempts: caps.max_debug_attempts,
            max_code_fixes: caps.max_code_fixes,
            max_delegations: caps.max_delegations,
            max_response_retries: 3,
            plan_count: 3,
            retrieval_limit: 3,
            store_path: PathBuf::from(".solver/puzzles.json"),
            similarity_weights: FieldWeights::default(),
            sandbox: SandboxConfig::default(),
            model: ModelConfig::default(),
        }
    }
}

impl SolverConfig {
    pub fn caps(&self) -> AttemptCaps {
        AttemptCaps {
            max_debug_attempts: self.max_debug_attempts,
            max_code_fixes: self.max_code_fixes,
            max_delegations: self.max_delegations,
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.caps().validate()?;
        if self.max_response_retries == 0 {
            return Err(anyhow!("max_response_retries must be > 0"));
        }
        if self.plan_count == 0 {
            return Err(anyhow!("plan_count must be > 0"));
        }
        if self.retrieval_limit == 0 {
            return Err(anyhow!("retrieval_limit must be > 0"));
        }
        if self.store_path.as_os_str().is_empty() {
            return Err(anyhow!("store_path must not be empty"));
        }
        let w = &self.similarity_weights;
        if [w.description, w.problem_statement, w.concepts, w.keywords]
            .iter()
            .any(|weight| !weight.is_finite() || *weight < 0.0)
        {
            return Err(anyhow!("similarity_weights must be finite and >= 0"));
        }
        if w.description + w.problem_statement + w.concepts + w.keywords <= 0.0 {
            return Err(anyhow!("similarity_weights must not all be zero"));
        }
        if self.sandbox.interpreter.is_empty() || self.sandbox.interpreter[0].trim().is_empty() {
            return Err(anyhow!("sandbox.interpreter must be a non-empty array"));
        }
        if self.sandbox.language.trim().is_empty() {
            return Err(anyhow!("sandbox.language must not be empty"));
        }
        if self.sandbox.timeout_secs == 0 {
            return Err(anyhow!("sandbox.timeout_secs must be > 0"));
        }
        if self.sandbox.output_limit_bytes == 0 {
            return Err(anyhow!("sandbox.output_limit_bytes must be > 0"));
        }
        if self.model.default.trim().is_empty() {
            return Err(anyhow!("model.default must not be empty"));
        }
        if self.model.command.is_empty() || self.model.command[0].trim().is_empty() {
            return Err(anyhow!("model.command must be a non-empty array"));
        }
        if self.model.timeout_secs == 0 {
            return Err(anyhow!("model.timeout_secs must be > 0"));
        }
        if self.model.output_limit_bytes == 0 {
            return Err(anyhow!("model.output_limit_bytes must be > 0"));
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `SolverConfig::default()`.
pub fn load_config(path: &Path) -> Result<SolverConfig> {
    if !path.exists() {
        let cfg = SolverConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: SolverConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &SolverConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

/// Write `contents` to a sibling temp file and rename it over `path`.
pub(crate) fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let mut tmp_path = path.as_os_str().to_owned();
    tmp_path.push(".tmp");
    let tmp_path = PathBuf::from(tmp_path);
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp file {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}
