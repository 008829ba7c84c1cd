//! Runs the stage list over one record, honouring backtrack requests.

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::core::backtrack::rewind_target;
use crate::core::budget::{AttemptCaps, attempts_exhausted};
use crate::core::record::PipelineRecord;
use crate::stages::Stage;

/// Per-position switches for a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageSettings {
    /// Disabled stages are skipped without being invoked.
    pub enabled: bool,
    /// Only these stages may move the pipeline backwards.
    pub can_backtrack: bool,
}

impl Default for StageSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            can_backtrack: false,
        }
    }
}

pub struct PipelineStage {
    pub stage: Box<dyn Stage>,
    pub settings: StageSettings,
}

impl PipelineStage {
    /// An enabled stage that always moves forward.
    pub fn forward(stage: impl Stage + 'static) -> Self {
        Self {
            stage: Box::new(stage),
            settings: StageSettings::default(),
        }
    }

    /// An enabled stage whose backtrack requests are honoured.
    pub fn backtracking(stage: impl Stage + 'static) -> Self {
        Self {
            stage: Box::new(stage),
            settings: StageSettings {
                enabled: true,
                can_backtrack: true,
            },
        }
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.settings.enabled = enabled;
        self
    }
}

/// Reason why [`Orchestrator::solve`] stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SolveStop {
    /// A stage marked the record solved.
    Solved,
    /// The debug attempt budget ran out first.
    AttemptsExhausted {
        debug_attempts: u32,
        max_debug_attempts: u32,
    },
    /// Every stage ran to the end of the list without a solution.
    PipelineExhausted,
}

/// Summary of one solve.
#[derive(Debug, Clone, PartialEq)]
pub struct SolveOutcome {
    pub record: PipelineRecord,
    pub stop: SolveStop,
    /// Stage invocations, not counting skipped stages.
    pub steps: u32,
}

impl SolveOutcome {
    pub fn solved(&self) -> bool {
        self.stop == SolveStop::Solved
    }
}

pub struct Orchestrator {
    stages: Vec<PipelineStage>,
    caps: AttemptCaps,
}

impl Orchestrator {
    pub fn new(stages: Vec<PipelineStage>, caps: AttemptCaps) -> Result<Self> {
        caps.validate()?;
        Ok(Self { stages, caps })
    }

    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.stage.name()).collect()
    }

    /// Drive `record` through the pipeline until it is solved, the attempt
    /// budget runs out, or the last stage completes.
    ///
    /// The budget is checked after every stage and again right after each
    /// backtracking attempt is counted, so an exhausted budget never buys one
    /// more pass through the rewound stages.
    ///
    /// Stage errors are returned as-is with a `stage <name>` context frame.
    pub fn solve(&mut self, mut record: PipelineRecord) -> Result<SolveOutcome> {
        let enabled: Vec<bool> = self.stages.iter().map(|s| s.settings.enabled).collect();
        let caps = self.caps;
        let mut index = 0;
        let mut steps = 0u32;

        while let Some(entry) = self.stages.get_mut(index) {
            let name = entry.stage.name().to_string();
            if !entry.settings.enabled {
                debug!(stage = %name, "stage disabled, skipping");
                index += 1;
                continue;
            }

            steps += 1;
            info!(stage = %name, step = steps, attempts = record.debug_attempts, "running stage");
            record.current_step = Some(name.clone());
            record = entry
                .stage
                .process(record)
                .with_context(|| format!("stage {name}"))?;
            let requested = record.take_backtrack();

            if record.is_solved() {
                info!(stage = %name, steps, "puzzle solved");
                return Ok(SolveOutcome {
                    record,
                    stop: SolveStop::Solved,
                    steps,
                });
            }
            if let Some(stop) = exhausted(&record, &caps) {
                return Ok(SolveOutcome { record, stop, steps });
            }

            if !entry.settings.can_backtrack {
                if requested > 0 {
                    warn!(stage = %name, requested, "stage may not backtrack, request ignored");
                }
                index += 1;
                continue;
            }

            record.debug_attempts += 1;
            if let Some(stop) = exhausted(&record, &caps) {
                return Ok(SolveOutcome { record, stop, steps });
            }
            let rewind = rewind_target(&enabled, index, requested);
            if rewind.clamped {
                warn!(stage = %name, requested, "backtrack past first stage, restarting pipeline");
            }
            debug!(from = index, to = rewind.index, requested, "rewinding");
            index = rewind.index;
        }

        info!(steps, "pipeline finished without a solution");
        Ok(SolveOutcome {
            record,
            stop: SolveStop::PipelineExhausted,
            steps,
        })
    }
}

fn exhausted(record: &PipelineRecord, caps: &AttemptCaps) -> Option<SolveStop> {
    if !attempts_exhausted(record.debug_attempts, caps) {
        return None;
    }
    warn!(
        debug_attempts = record.debug_attempts,
        max = caps.max_debug_attempts,
        "debug attempt budget exhausted"
    );
    Some(SolveStop::AttemptsExhausted {
        debug_attempts: record.debug_attempts,
        max_debug_attempts: caps.max_debug_attempts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    use crate::test_support::{ScriptedStage, sample_record};

    fn caps(max_debug_attempts: u32) -> AttemptCaps {
        AttemptCaps {
            max_debug_attempts,
            ..AttemptCaps::default()
        }
    }

    #[test]
    fn runs_stages_in_order_without_solution() {
        let first = ScriptedStage::new("first", |record, _| {
            record.log_activity("first", "ran");
            Ok(())
        });
        let second = ScriptedStage::new("second", |record, _| {
            record.log_activity("second", "ran");
            Ok(())
        });
        let mut orchestrator = Orchestrator::new(
            vec![PipelineStage::forward(first), PipelineStage::forward(second)],
            caps(5),
        )
        .expect("orchestrator");

        let outcome = orchestrator.solve(sample_record()).expect("solve");

        assert_eq!(outcome.stop, SolveStop::PipelineExhausted);
        assert_eq!(outcome.steps, 2);
        let stages: Vec<&str> = outcome
            .record
            .activity_log()
            .iter()
            .map(|e| e.stage.as_str())
            .collect();
        assert_eq!(stages, ["first", "second"]);
        assert_eq!(outcome.record.current_step.as_deref(), Some("second"));
    }

    #[test]
    fn stops_as_soon_as_solved() {
        let solver = ScriptedStage::new("solver", |record, _| {
            record.generated_code = Some("print(1)".to_string());
            record.mark_solved();
            Ok(())
        });
        let after = ScriptedStage::passthrough("after");
        let after_calls = after.call_counter();
        let mut orchestrator = Orchestrator::new(
            vec![PipelineStage::forward(solver), PipelineStage::forward(after)],
            caps(5),
        )
        .expect("orchestrator");

        let outcome = orchestrator.solve(sample_record()).expect("solve");

        assert!(outcome.solved());
        assert_eq!(outcome.record.final_code(), Some("print(1)"));
        assert_eq!(after_calls.get(), 0);
    }

    #[test]
    fn backtrack_reruns_earlier_stage_until_solved() {
        let coder = ScriptedStage::new("coder", |record, call| {
            record.generated_code = Some(format!("v{call}"));
            Ok(())
        });
        let coder_calls = coder.call_counter();
        let checker = ScriptedStage::new("checker", |record, _| {
            if record.generated_code.as_deref() == Some("v3") {
                record.mark_solved();
            } else {
                record.request_backtrack(1);
            }
            Ok(())
        });
        let mut orchestrator = Orchestrator::new(
            vec![
                PipelineStage::forward(coder),
                PipelineStage::backtracking(checker),
            ],
            caps(5),
        )
        .expect("orchestrator");

        let outcome = orchestrator.solve(sample_record()).expect("solve");

        assert!(outcome.solved());
        assert_eq!(coder_calls.get(), 3);
        assert_eq!(outcome.record.debug_attempts, 2);
        assert_eq!(outcome.record.backtracking_step(), 0);
        assert_eq!(outcome.steps, 6);
    }

    #[test]
    fn attempt_budget_terminates_endless_backtracking() {
        let coder = ScriptedStage::passthrough("coder");
        let coder_calls = coder.call_counter();
        let checker = ScriptedStage::new("checker", |record, _| {
            record.request_backtrack(1);
            Ok(())
        });
        let checker_calls = checker.call_counter();
        let mut orchestrator = Orchestrator::new(
            vec![
                PipelineStage::forward(coder),
                PipelineStage::backtracking(checker),
            ],
            caps(3),
        )
        .expect("orchestrator");

        let outcome = orchestrator.solve(sample_record()).expect("solve");

        assert_eq!(
            outcome.stop,
            SolveStop::AttemptsExhausted {
                debug_attempts: 4,
                max_debug_attempts: 3,
            }
        );
        assert_eq!(checker_calls.get(), 4);
        // The exhausting attempt does not rewind into the coder again.
        assert_eq!(coder_calls.get(), 4);
        assert_eq!(outcome.steps, 8);
        assert!(!outcome.record.is_solved());
    }

    #[test]
    fn zero_step_request_reruns_backtracking_stage() {
        let checker = ScriptedStage::new("checker", |record, call| {
            if call == 3 {
                record.generated_code = Some("done".to_string());
                record.mark_solved();
            }
            Ok(())
        });
        let checker_calls = checker.call_counter();
        let mut orchestrator =
            Orchestrator::new(vec![PipelineStage::backtracking(checker)], caps(5))
                .expect("orchestrator");

        let outcome = orchestrator.solve(sample_record()).expect("solve");

        assert!(outcome.solved());
        assert_eq!(checker_calls.get(), 3);
    }

    #[test]
    fn forward_stage_backtrack_requests_are_ignored() {
        let first = ScriptedStage::passthrough("first");
        let first_calls = first.call_counter();
        let second = ScriptedStage::new("second", |record, _| {
            record.request_backtrack(1);
            Ok(())
        });
        let third = ScriptedStage::new("third", |record, _| {
            assert_eq!(record.backtracking_step(), 0);
            Ok(())
        });
        let mut orchestrator = Orchestrator::new(
            vec![
                PipelineStage::forward(first),
                PipelineStage::forward(second),
                PipelineStage::forward(third),
            ],
            caps(5),
        )
        .expect("orchestrator");

        let outcome = orchestrator.solve(sample_record()).expect("solve");

        assert_eq!(outcome.stop, SolveStop::PipelineExhausted);
        assert_eq!(first_calls.get(), 1);
        assert_eq!(outcome.record.debug_attempts, 0);
    }

    #[test]
    fn disabled_stages_are_skipped_and_not_counted_by_backtracks() {
        let first = ScriptedStage::passthrough("first");
        let first_calls = first.call_counter();
        let disabled = ScriptedStage::passthrough("disabled");
        let disabled_calls = disabled.call_counter();
        let checker = ScriptedStage::new("checker", |record, call| {
            if call == 2 {
                record.generated_code = Some("x".to_string());
                record.mark_solved();
            } else {
                record.request_backtrack(1);
            }
            Ok(())
        });
        let mut orchestrator = Orchestrator::new(
            vec![
                PipelineStage::forward(first),
                PipelineStage::forward(disabled).enabled(false),
                PipelineStage::backtracking(checker),
            ],
            caps(5),
        )
        .expect("orchestrator");

        let outcome = orchestrator.solve(sample_record()).expect("solve");

        assert!(outcome.solved());
        assert_eq!(disabled_calls.get(), 0);
        assert_eq!(first_calls.get(), 2);
    }

    #[test]
    fn overshooting_backtrack_restarts_from_first_stage() {
        let first = ScriptedStage::passthrough("first");
        let first_calls = first.call_counter();
        let checker = ScriptedStage::new("checker", |record, call| {
            if call == 2 {
                record.generated_code = Some("x".to_string());
                record.mark_solved();
            } else {
                record.request_backtrack(10);
            }
            Ok(())
        });
        let mut orchestrator = Orchestrator::new(
            vec![
                PipelineStage::forward(first),
                PipelineStage::backtracking(checker),
            ],
            caps(5),
        )
        .expect("orchestrator");

        let outcome = orchestrator.solve(sample_record()).expect("solve");

        assert!(outcome.solved());
        assert_eq!(first_calls.get(), 2);
    }

    #[test]
    fn stage_errors_propagate_with_stage_name() {
        let failing = ScriptedStage::new("broken", |_, _| Err(anyhow!("model exploded")));
        let mut orchestrator =
            Orchestrator::new(vec![PipelineStage::forward(failing)], caps(5))
                .expect("orchestrator");

        let err = orchestrator.solve(sample_record()).unwrap_err();

        assert_eq!(format!("{err:#}"), "stage broken: model exploded");
    }

    #[test]
    fn zero_attempt_budget_is_rejected() {
        assert!(Orchestrator::new(Vec::new(), caps(0)).is_err());
    }

    #[test]
    fn empty_pipeline_returns_record_untouched() {
        let mut orchestrator = Orchestrator::new(Vec::new(), caps(5)).expect("orchestrator");
        let outcome = orchestrator.solve(sample_record()).expect("solve");
        assert_eq!(outcome.record, sample_record());
        assert_eq!(outcome.steps, 0);
    }
}
