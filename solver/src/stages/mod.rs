//! Pipeline stages and the contract the orchestrator drives them through.
//!
//! A stage receives the record by value and returns the next version. It may
//! keep private settings and counters across invocations, but never the
//! record itself. Malformed model output is retried inside the stage; only
//! unrecoverable failures surface as errors.

use anyhow::{Result, anyhow};
use clap::ValueEnum;
use tracing::{debug, warn};

use crate::core::record::PipelineRecord;
use crate::io::model::LanguageModel;

pub mod coding;
pub mod debugging;
pub mod planning;
pub mod preprocess;
pub mod retrieval;

pub trait Stage {
    fn name(&self) -> &str;

    fn process(&mut self, record: PipelineRecord) -> Result<PipelineRecord>;
}

/// The fixed pipeline positions, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum)]
pub enum StageKind {
    Preprocess,
    Retrieval,
    Planning,
    Coding,
    Debugging,
}

impl StageKind {
    pub const ALL: [StageKind; 5] = [
        StageKind::Preprocess,
        StageKind::Retrieval,
        StageKind::Planning,
        StageKind::Coding,
        StageKind::Debugging,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            StageKind::Preprocess => "preprocess",
            StageKind::Retrieval => "retrieval",
            StageKind::Planning => "planning",
            StageKind::Coding => "coding",
            StageKind::Debugging => "debugging",
        }
    }
}

/// Prompt `model` until `parse` accepts a response, at most `attempts` times.
///
/// Returns the last parse error once the attempts are spent.
pub(crate) fn request_with_retries<T>(
    model: &dyn LanguageModel,
    prompt: &str,
    attempts: u32,
    mut parse: impl FnMut(&str) -> Result<T>,
) -> Result<T> {
    let mut last_err = anyhow!("no attempts made");
    for attempt in 1..=attempts {
        let response = model.generate(prompt);
        match parse(&response) {
            Ok(value) => {
                debug!(model = model.name(), attempt, "model response accepted");
                return Ok(value);
            }
            Err(err) => {
                warn!(
                    model = model.name(),
                    attempt,
                    attempts,
                    err = format!("{err:#}"),
                    "unusable model response"
                );
                last_err = err;
            }
        }
    }
    Err(last_err)
}
