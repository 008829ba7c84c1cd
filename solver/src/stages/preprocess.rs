//! Extracts the structure of a puzzle (statement, formats, concepts, examples).

use anyhow::Result;
use minijinja::context;
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::core::record::{PipelineRecord, TestCase};
use crate::core::response::ResponseSchema;
use crate::io::model::LanguageModel;
use crate::io::prompt::{PromptEngine, PromptKind};
use crate::stages::{Stage, StageKind, request_with_retries};

const PREPROCESS_SCHEMA: &str = include_str!("../../schemas/preprocess_output.schema.json");

#[derive(Debug, Deserialize)]
struct PreprocessOutput {
    problem_statement: Option<String>,
    input_format: Option<String>,
    output_format: Option<String>,
    constraints: Option<Vec<String>>,
    keywords: Option<Vec<String>>,
    underlying_concepts: Option<Vec<String>>,
    test_cases: Option<Vec<RawTestCase>>,
}

#[derive(Debug, Deserialize)]
struct RawTestCase {
    input: String,
    output: Value,
}

impl RawTestCase {
    // Models often answer numeric outputs as JSON numbers.
    fn into_test_case(self) -> TestCase {
        let expected = match self.output {
            Value::String(s) => s,
            other => other.to_string(),
        };
        TestCase::new(self.input, expected)
    }
}

pub struct PreprocessStage {
    model: Box<dyn LanguageModel>,
    prompts: PromptEngine,
    schema: ResponseSchema,
    max_retries: u32,
}

impl PreprocessStage {
    pub fn new(model: Box<dyn LanguageModel>, max_retries: u32) -> Result<Self> {
        Ok(Self {
            model,
            prompts: PromptEngine::new(),
            schema: ResponseSchema::new("preprocess", PREPROCESS_SCHEMA)?,
            max_retries,
        })
    }
}

fn apply_field<T>(slot: &mut T, value: Option<T>, field: &str) {
    match value {
        Some(value) => *slot = value,
        None => warn!(field, "preprocess response missing field"),
    }
}

impl Stage for PreprocessStage {
    fn name(&self) -> &str {
        StageKind::Preprocess.as_str()
    }

    fn process(&mut self, mut record: PipelineRecord) -> Result<PipelineRecord> {
        let prompt = self.prompts.render(
            PromptKind::Preprocess,
            context! { puzzle => record.puzzle().description.as_str() },
        )?;

        let output: PreprocessOutput =
            match request_with_retries(self.model.as_ref(), &prompt, self.max_retries, |text| {
                self.schema.parse(text)
            }) {
                Ok(output) => output,
                Err(err) => {
                    record.log_error(self.name(), format!("preprocessing failed: {err:#}"));
                    return Ok(record);
                }
            };

        apply_field(
            &mut record.problem_statement,
            output.problem_statement.map(Some),
            "problem_statement",
        );
        apply_field(
            &mut record.input_format,
            output.input_format.map(Some),
            "input_format",
        );
        apply_field(
            &mut record.output_format,
            output.output_format.map(Some),
            "output_format",
        );
        apply_field(&mut record.constraints, output.constraints, "constraints");
        apply_field(&mut record.keywords, output.keywords, "keywords");
        apply_field(
            &mut record.concepts,
            output.underlying_concepts,
            "underlying_concepts",
        );
        apply_field(
            &mut record.test_cases,
            output
                .test_cases
                .map(|cases| cases.into_iter().map(RawTestCase::into_test_case).collect()),
            "test_cases",
        );

        info!(
            test_cases = record.test_cases.len(),
            concepts = record.concepts.len(),
            "puzzle preprocessed"
        );
        let summary = format!("extracted {} test cases", record.test_cases.len());
        record.log_activity(self.name(), summary);
        Ok(record)
    }
}
