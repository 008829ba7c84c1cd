//! The `solver solve` command: build the pipeline, run it, report.

use std::path::Path;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::core::decision::{Verdict, evaluate};
use crate::core::record::{PipelineRecord, Puzzle};
use crate::io::config::{SolverConfig, write_atomic};
use crate::io::sandbox::CodeRunner;
use crate::orchestrator::{SolveOutcome, SolveStop};
use crate::pipeline::{Collaborators, PipelineOptions, build_pipeline};
use crate::stages::StageKind;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SolveRequest {
    pub puzzle: Puzzle,
    pub options: PipelineOptions,
}

/// Solve one puzzle end to end.
///
/// When the debugging stage is disabled but the answer is known, the final
/// code is checked once against the puzzle input so a correct program is
/// still reported as solved.
pub fn run_solve(
    cfg: &SolverConfig,
    request: &SolveRequest,
    collaborators: &dyn Collaborators,
) -> Result<SolveOutcome> {
    let mut orchestrator = build_pipeline(cfg, &request.options, collaborators)?;
    info!(
        year = request.puzzle.year,
        day = request.puzzle.day,
        disabled = ?request.options.disabled,
        "solving puzzle"
    );

    let mut outcome = orchestrator.solve(PipelineRecord::new(request.puzzle.clone()))?;

    if !outcome.solved()
        && !request.options.is_enabled(StageKind::Debugging)
        && let Some(expected) = &request.options.expected_output
    {
        let runner = collaborators.runner();
        verify_once(
            &mut outcome,
            runner.as_ref(),
            &request.options.puzzle_input,
            expected,
        );
    }
    Ok(outcome)
}

fn verify_once(outcome: &mut SolveOutcome, runner: &dyn CodeRunner, input: &str, expected: &str) {
    let Some(code) = outcome.record.generated_code.clone() else {
        warn!("no generated code to verify");
        return;
    };
    let result = runner.run(&code, input);
    if evaluate(expected, &result) == Verdict::Passed && outcome.record.mark_solved() {
        info!("generated code reproduces the expected output");
        outcome
            .record
            .log_activity("verification", "expected output reproduced");
        outcome.stop = SolveStop::Solved;
    } else {
        warn!("generated code does not reproduce the expected output");
    }
}

/// Write the final record as pretty JSON with a trailing newline.
pub fn write_record(path: &Path, record: &PipelineRecord) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(record).context("serialize record")?;
    buf.push('\n');
    write_atomic(path, &buf)
}
