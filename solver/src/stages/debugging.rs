//! Validates generated code and decides how to recover from failures.
//!
//! With a known expected answer the code runs once against the real puzzle
//! input. Otherwise every example test case must pass; the first failing case
//! is analysed and the run stops there. Failures with no output at all
//! abandon the current plan without consulting the judge.

use anyhow::{Result, bail};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::core::budget::{AttemptCaps, RemedyCounters};
use crate::core::decision::{Decision, ExecutionResult, JudgementResponse, Verdict, evaluate};
use crate::core::record::{PipelineRecord, TestCase};
use crate::core::remedy::{Remedy, apply_decision, cycle_plan};
use crate::core::response::ResponseSchema;
use crate::io::model::LanguageModel;
use crate::io::prompt::{PromptEngine, PromptKind};
use crate::io::sandbox::CodeRunner;
use crate::stages::{Stage, StageKind, request_with_retries};

const DEBUG_JUDGEMENT_SCHEMA: &str = include_str!("../../schemas/debug_judgement.schema.json");

/// Everything the judge sees about one failing test case.
#[derive(Debug, Serialize)]
pub struct JudgeRequest<'a> {
    pub problem_statement: Option<&'a str>,
    pub code: &'a str,
    pub test_input: &'a str,
    pub actual_output: Option<&'a str>,
    pub expected_output: &'a str,
    pub error_message: Option<&'a str>,
    pub plan: Option<&'a str>,
}

/// Classifies a failing run into a [`Decision`].
pub trait Judge {
    fn judge(&self, request: &JudgeRequest<'_>) -> Decision;
}

/// Judge backed by a language model.
pub struct ModelJudge {
    model: Box<dyn LanguageModel>,
    prompts: PromptEngine,
    schema: ResponseSchema,
    max_retries: u32,
}

impl ModelJudge {
    pub fn new(model: Box<dyn LanguageModel>, max_retries: u32) -> Result<Self> {
        Ok(Self {
            model,
            prompts: PromptEngine::new(),
            schema: ResponseSchema::new("debug_judgement", DEBUG_JUDGEMENT_SCHEMA)?,
            max_retries,
        })
    }
}

impl Judge for ModelJudge {
    fn judge(&self, request: &JudgeRequest<'_>) -> Decision {
        let prompt = match self.prompts.render_json(PromptKind::Debug, request) {
            Ok(prompt) => prompt,
            Err(err) => {
                warn!(err = format!("{err:#}"), "could not render judgement prompt");
                return Decision::CyclePlan;
            }
        };
        match request_with_retries(self.model.as_ref(), &prompt, self.max_retries, |text| {
            self.schema.parse::<JudgementResponse>(text)
        }) {
            Ok(response) => {
                info!(
                    decision = ?response.decision,
                    reason = response.reason.as_deref().unwrap_or(""),
                    "failure judged"
                );
                Decision::from(response)
            }
            Err(err) => {
                warn!(err = format!("{err:#}"), "no usable judgement, cycling plan");
                Decision::CyclePlan
            }
        }
    }
}

pub struct DebuggingStage {
    runner: Box<dyn CodeRunner>,
    judge: Box<dyn Judge>,
    puzzle_input: String,
    expected_output: Option<String>,
    caps: AttemptCaps,
    counters: RemedyCounters,
}

impl DebuggingStage {
    pub fn new(
        runner: Box<dyn CodeRunner>,
        judge: Box<dyn Judge>,
        puzzle_input: impl Into<String>,
        expected_output: Option<String>,
        caps: AttemptCaps,
    ) -> Result<Self> {
        let puzzle_input = puzzle_input.into();
        if puzzle_input.trim().is_empty() {
            bail!("debugging requires a non-empty puzzle input");
        }
        Ok(Self {
            runner,
            judge,
            puzzle_input,
            expected_output,
            caps,
            counters: RemedyCounters::default(),
        })
    }

    pub fn counters(&self) -> RemedyCounters {
        self.counters
    }

    /// Analyse one failed case and apply the resulting remedy.
    fn recover(
        &mut self,
        record: &mut PipelineRecord,
        code: &str,
        case: &TestCase,
        result: &ExecutionResult,
        verdict: Verdict,
    ) {
        let remedy = if verdict == Verdict::Unrecoverable {
            warn!("generated code produced no output, cycling plan");
            cycle_plan(record)
        } else {
            let decision = self.judge.judge(&JudgeRequest {
                problem_statement: record.problem_statement.as_deref(),
                code,
                test_input: &case.input,
                actual_output: result.stdout.as_deref(),
                expected_output: &case.expected_output,
                error_message: result.stderr.as_deref(),
                plan: record.selected_plan.as_ref().map(|p| p.plan.as_str()),
            });
            apply_decision(record, &mut self.counters, &self.caps, decision)
        };

        let stage = StageKind::Debugging.as_str();
        match remedy {
            Remedy::FixApplied => {
                info!(fixes = self.counters.code_fixes, "applied fix");
                record.log_activity(stage, "applied fix to generated code");
            }
            Remedy::Delegated => {
                info!(delegations = self.counters.delegations, "delegated to coding");
                record.log_activity(stage, "delegated suggestion to coding");
            }
            Remedy::PlanCycled => {
                info!("cycled to next plan");
                record.log_activity(stage, "cycled to next plan");
            }
            Remedy::NoPlansLeft => {
                error!("no generated plans left, recoding the current plan");
                record.log_error(stage, "no alternative plan left, recoding the current plan");
                record.request_backtrack(1);
            }
        }
    }
}

impl Stage for DebuggingStage {
    fn name(&self) -> &str {
        StageKind::Debugging.as_str()
    }

    fn process(&mut self, mut record: PipelineRecord) -> Result<PipelineRecord> {
        let Some(code) = record.generated_code.clone() else {
            warn!("no generated code to debug, returning to coding");
            record.request_backtrack(1);
            return Ok(record);
        };

        let cases = match &self.expected_output {
            Some(expected) => vec![TestCase::new(self.puzzle_input.clone(), expected.clone())],
            None => record.test_cases.clone(),
        };
        if cases.is_empty() {
            warn!("no test cases to run");
            record.log_error(self.name(), "no test cases and no expected output to check against");
            return Ok(record);
        }

        for (index, case) in cases.iter().enumerate() {
            let result = self.runner.run(&code, &case.input);
            let verdict = evaluate(&case.expected_output, &result);
            if verdict == Verdict::Passed {
                info!(case = index, "test case passed");
                continue;
            }
            info!(
                case = index,
                ?verdict,
                actual = result.stdout.as_deref().unwrap_or(""),
                expected = %case.expected_output,
                "test case failed"
            );
            self.recover(&mut record, &code, case, &result, verdict);
            return Ok(record);
        }

        if record.mark_solved() {
            info!(cases = cases.len(), "all test cases passed, puzzle solved");
            record.log_activity(self.name(), "solved");
        }
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{
        ScriptedJudge, ScriptedModel, ScriptedRunner, json_reply, record_with_plans,
    };

    const INPUT: &str = "1\n2\n3";

    fn stage(
        runner: &ScriptedRunner,
        judge: &ScriptedJudge,
        expected: Option<&str>,
    ) -> DebuggingStage {
        DebuggingStage::new(
            runner.boxed(),
            judge.boxed(),
            INPUT,
            expected.map(str::to_string),
            AttemptCaps::default(),
        )
        .expect("stage")
    }

    fn coded(plans: &[&str], code: &str) -> PipelineRecord {
        let mut record = record_with_plans(plans);
        record.generated_code = Some(code.to_string());
        record
    }

    fn selected(record: &PipelineRecord) -> Option<&str> {
        record.selected_plan.as_ref().map(|p| p.plan.as_str())
    }

    #[test]
    fn empty_puzzle_input_is_a_configuration_error() {
        let result = DebuggingStage::new(
            ScriptedRunner::default().boxed(),
            ScriptedJudge::default().boxed(),
            "  ",
            None,
            AttemptCaps::default(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn missing_code_backtracks_to_coding() {
        let runner = ScriptedRunner::default();
        let judge = ScriptedJudge::default();
        let record = stage(&runner, &judge, Some("6"))
            .process(record_with_plans(&["a"]))
            .expect("process");

        assert_eq!(record.backtracking_step(), 1);
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn exact_match_on_known_answer_solves() {
        let runner = ScriptedRunner::new([ExecutionResult::completed("6", None)]);
        let judge = ScriptedJudge::default();
        let record = stage(&runner, &judge, Some(" 6\n"))
            .process(coded(&["a"], "print(6)"))
            .expect("process");

        assert!(record.is_solved());
        assert_eq!(record.final_code(), record.generated_code.as_deref());
        assert_eq!(runner.calls(), vec![("print(6)".to_string(), INPUT.to_string())]);
        assert_eq!(judge.calls(), 0);
    }

    #[test]
    fn timeout_cycles_plan_without_judging() {
        let runner = ScriptedRunner::new([ExecutionResult::unavailable()]);
        let judge = ScriptedJudge::default();
        let record = stage(&runner, &judge, Some("6"))
            .process(coded(&["a", "b"], "while True: pass"))
            .expect("process");

        assert_eq!(selected(&record), Some("b"));
        assert_eq!(record.backtracking_step(), 1);
        assert_eq!(judge.calls(), 0);
        assert!(!record.is_solved());
    }

    #[test]
    fn wrong_output_is_judged() {
        let runner = ScriptedRunner::new([ExecutionResult::completed("5", None)]);
        let judge = ScriptedJudge::new([Decision::Delegate {
            suggestion: "off by one".to_string(),
        }]);
        let record = stage(&runner, &judge, Some("6"))
            .process(coded(&["a"], "print(5)"))
            .expect("process");

        assert_eq!(judge.calls(), 1);
        assert_eq!(record.debug_suggestions(), ["off by one"]);
        assert_eq!(record.backtracking_step(), 1);
    }

    #[test]
    fn fix_cap_escalates_to_delegation() {
        let fix = |code: &str| Decision::FixMyself {
            code: code.to_string(),
            suggestion: format!("use {code}"),
        };
        let runner = ScriptedRunner::new(vec![ExecutionResult::completed("0", None); 3]);
        let judge = ScriptedJudge::new([fix("v1"), fix("v2"), fix("v3")]);
        let mut stage = stage(&runner, &judge, Some("6"));

        let record = stage.process(coded(&["a"], "v0")).expect("first");
        assert_eq!(record.generated_code.as_deref(), Some("v1"));
        let record = stage.process(record).expect("second");
        assert_eq!(record.generated_code.as_deref(), Some("v2"));
        assert_eq!(stage.counters().code_fixes, 2);

        let record = stage.process(record).expect("third");
        assert_eq!(record.generated_code.as_deref(), Some("v2"));
        assert_eq!(record.debug_suggestions(), ["use v3"]);
        assert_eq!(record.backtracking_step(), 1);
    }

    #[test]
    fn all_examples_passing_solves_without_judge() {
        let runner = ScriptedRunner::new([
            ExecutionResult::completed("3", None),
            ExecutionResult::completed("7", None),
        ]);
        let judge = ScriptedJudge::default();
        let mut record = coded(&["a"], "print(sum)");
        record.test_cases = vec![TestCase::new("1 2", "3"), TestCase::new("3 4", "7")];

        let record = stage(&runner, &judge, None).process(record).expect("process");

        assert!(record.is_solved());
        assert_eq!(record.final_code(), Some("print(sum)"));
        assert_eq!(judge.calls(), 0);
        assert_eq!(runner.calls().len(), 2);
    }

    #[test]
    fn first_failing_example_short_circuits() {
        let runner = ScriptedRunner::new([
            ExecutionResult::completed("3", None),
            ExecutionResult::completed("", Some("Traceback".to_string())),
        ]);
        let judge = ScriptedJudge::new([Decision::CyclePlan]);
        let mut record = coded(&["a", "b"], "code");
        record.test_cases = vec![
            TestCase::new("1 2", "3"),
            TestCase::new("3 4", "7"),
            TestCase::new("5 6", "11"),
        ];

        let record = stage(&runner, &judge, None).process(record).expect("process");

        assert_eq!(runner.calls().len(), 2);
        assert_eq!(judge.judged_inputs(), vec!["3 4".to_string()]);
        assert_eq!(selected(&record), Some("b"));
        assert!(!record.is_solved());
    }

    #[test]
    fn no_examples_and_no_answer_records_why() {
        let runner = ScriptedRunner::default();
        let judge = ScriptedJudge::default();
        let before = coded(&["a"], "code");

        let after = stage(&runner, &judge, None).process(before.clone()).expect("process");

        assert!(runner.calls().is_empty());
        assert_eq!(after.generated_code, before.generated_code);
        assert_eq!(after.backtracking_step(), 0);
        assert!(!after.is_solved());
        assert_eq!(after.errors().len(), 1);
        assert_eq!(after.errors()[0].stage, "debugging");
    }

    #[test]
    fn no_plans_left_recodes_current_plan() {
        let runner = ScriptedRunner::new([ExecutionResult::unavailable()]);
        let judge = ScriptedJudge::default();
        let before = coded(&["only"], "code");

        let after = stage(&runner, &judge, Some("6")).process(before.clone()).expect("process");

        assert_eq!(selected(&after), Some("only"));
        assert_eq!(after.generated_plans, before.generated_plans);
        assert_eq!(after.generated_code.as_deref(), Some("code"));
        assert_eq!(after.backtracking_step(), 1);
        assert_eq!(after.errors().len(), 1);
        assert!(after.errors()[0].message.contains("no alternative plan"));
        assert_eq!(judge.calls(), 0);
    }

    #[test]
    fn model_judge_parses_decisions_and_degrades_to_cycle() {
        let request = JudgeRequest {
            problem_statement: Some("sum"),
            code: "print(5)",
            test_input: INPUT,
            actual_output: Some("5"),
            expected_output: "6",
            error_message: None,
            plan: None,
        };

        let model = ScriptedModel::new([json_reply(
            r#"{"decision": "fix_myself", "reason": "typo", "fix": "print(6)"}"#,
        )]);
        let judge = ModelJudge::new(model.boxed(), 3).expect("judge");
        assert_eq!(
            judge.judge(&request),
            Decision::FixMyself {
                code: "print(6)".to_string(),
                suggestion: String::new(),
            }
        );
        assert!(model.prompts()[0].contains("print(5)"));

        let model = ScriptedModel::new([
            json_reply(r#"{"decision": "delegate"}"#),
            "prose only".to_string(),
        ]);
        let judge = ModelJudge::new(model.boxed(), 2).expect("judge");
        assert_eq!(judge.judge(&request), Decision::CyclePlan);
        assert_eq!(model.calls(), 2);
    }
}
