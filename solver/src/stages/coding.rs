//! Turns the selected plan into a program.

use anyhow::Result;
use minijinja::context;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::core::record::{PipelineRecord, TestCase};
use crate::core::response::ResponseSchema;
use crate::io::model::LanguageModel;
use crate::io::prompt::{PromptEngine, PromptKind};
use crate::stages::{Stage, StageKind, request_with_retries};

const CODING_SCHEMA: &str = include_str!("../../schemas/coding_output.schema.json");

const NO_PLAN: &str = "No plan for this puzzle. Solve it without one.";

#[derive(Debug, Serialize)]
struct CodingInput<'a> {
    problem_statement: Option<&'a str>,
    full_description: &'a str,
    underlying_concepts: &'a [String],
    keywords: &'a [String],
    input_format: Option<&'a str>,
    output_format: Option<&'a str>,
    constraints: &'a [String],
    example_solutions: Vec<ExampleCode<'a>>,
    test_cases: &'a [TestCase],
    plan: &'a str,
}

#[derive(Debug, Serialize)]
struct ExampleCode<'a> {
    plan: &'a str,
    code: &'a str,
}

#[derive(Debug, Deserialize)]
struct CodingOutput {
    code: String,
}

pub struct CodingStage {
    model: Box<dyn LanguageModel>,
    prompts: PromptEngine,
    schema: ResponseSchema,
    language: String,
    max_retries: u32,
}

impl CodingStage {
    pub fn new(
        model: Box<dyn LanguageModel>,
        language: impl Into<String>,
        max_retries: u32,
    ) -> Result<Self> {
        Ok(Self {
            model,
            prompts: PromptEngine::new(),
            schema: ResponseSchema::new("coding", CODING_SCHEMA)?,
            language: language.into(),
            max_retries,
        })
    }

    fn prompt(&self, record: &PipelineRecord) -> Result<String> {
        let plan = match &record.selected_plan {
            Some(plan) if !plan.plan.trim().is_empty() => plan.plan.as_str(),
            _ => {
                info!("no plan selected, coding without one");
                NO_PLAN
            }
        };
        let input = CodingInput {
            problem_statement: record.problem_statement.as_deref(),
            full_description: &record.puzzle().description,
            underlying_concepts: &record.concepts,
            keywords: &record.keywords,
            input_format: record.input_format.as_deref(),
            output_format: record.output_format.as_deref(),
            constraints: &record.constraints,
            example_solutions: record
                .references
                .iter()
                .map(|r| ExampleCode {
                    plan: &r.plan,
                    code: &r.puzzle.solution,
                })
                .collect(),
            test_cases: &record.test_cases,
            plan,
        };
        self.prompts.render_json_with(
            PromptKind::Code,
            &input,
            context! {
                language => self.language.as_str(),
                suggestions => record.debug_suggestions(),
            },
        )
    }
}

impl Stage for CodingStage {
    fn name(&self) -> &str {
        StageKind::Coding.as_str()
    }

    fn process(&mut self, mut record: PipelineRecord) -> Result<PipelineRecord> {
        let prompt = self.prompt(&record)?;
        let generated =
            request_with_retries(self.model.as_ref(), &prompt, self.max_retries, |text| {
                self.schema.parse::<CodingOutput>(text)
            });

        match generated {
            Ok(output) => {
                info!(code_bytes = output.code.len(), "code generated");
                record.generated_code = Some(output.code);
                record.log_activity(self.name(), "generated code");
            }
            Err(err) => {
                // Previous code, if any, stays in place.
                record.log_error(self.name(), format!("code generation failed: {err:#}"));
            }
        }
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ScriptedModel, json_reply, record_with_plans, sample_record};

    fn code_reply(code: &str) -> String {
        json_reply(&serde_json::json!({ "code": code }).to_string())
    }

    fn stage(model: &ScriptedModel) -> CodingStage {
        CodingStage::new(model.boxed(), "Python 3", 3).expect("stage")
    }

    #[test]
    fn stores_generated_code() {
        let model = ScriptedModel::new([code_reply("print(6)")]);
        let record = stage(&model)
            .process(record_with_plans(&["sum the lines"]))
            .expect("process");

        assert_eq!(record.generated_code.as_deref(), Some("print(6)"));
        let prompt = &model.prompts()[0];
        assert!(prompt.contains("sum the lines"));
        assert!(prompt.contains("Python 3"));
    }

    #[test]
    fn missing_plan_is_stated_explicitly() {
        let model = ScriptedModel::new([code_reply("print(1)")]);
        stage(&model).process(sample_record()).expect("process");
        assert!(model.prompts()[0].contains(NO_PLAN));
    }

    #[test]
    fn prompt_carries_debug_suggestions() {
        let model = ScriptedModel::new([code_reply("print(2)")]);
        let mut record = record_with_plans(&["plan"]);
        record.push_suggestion("strip trailing newline");

        stage(&model).process(record).expect("process");

        assert!(model.prompts()[0].contains("- strip trailing newline"));
    }

    #[test]
    fn exhausted_retries_keep_previous_code() {
        let model = ScriptedModel::new(["nope", "```json\n{\"code\": \"\"}\n```", "still nope"]);
        let mut record = record_with_plans(&["plan"]);
        record.generated_code = Some("old".to_string());

        let record = stage(&model).process(record).expect("process");

        assert_eq!(model.calls(), 3);
        assert_eq!(record.generated_code.as_deref(), Some("old"));
        assert_eq!(record.errors().len(), 1);
        assert_eq!(record.errors()[0].stage, "coding");
    }
}
