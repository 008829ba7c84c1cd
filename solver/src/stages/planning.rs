//! Generates candidate solution plans and selects the most confident one.

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::core::record::{PipelineRecord, SolutionPlan, TestCase};
use crate::core::response::{ResponseSchema, extract_markdown_blocks};
use crate::io::model::LanguageModel;
use crate::io::prompt::{PromptEngine, PromptKind};
use crate::stages::{Stage, StageKind, request_with_retries};

const PLAN_CONFIDENCE_SCHEMA: &str = include_str!("../../schemas/plan_confidence.schema.json");

#[derive(Debug, Clone, Serialize)]
struct PlanInput<'a> {
    problem_statement: Option<&'a str>,
    full_description: &'a str,
    underlying_concepts: &'a [String],
    keywords: &'a [String],
    constraints: &'a [String],
    test_cases: &'a [TestCase],
    #[serde(skip_serializing_if = "Option::is_none")]
    example_solutions: Option<Vec<ExampleSolution<'a>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    plan: Option<&'a str>,
}

#[derive(Debug, Clone, Serialize)]
struct ExampleSolution<'a> {
    puzzle: &'a str,
    plan: &'a str,
    code: &'a str,
}

#[derive(Debug, Deserialize)]
struct ConfidenceOutput {
    confidence: f64,
}

pub struct PlanningStage {
    model: Box<dyn LanguageModel>,
    prompts: PromptEngine,
    schema: ResponseSchema,
    plan_count: u32,
    max_retries: u32,
}

impl PlanningStage {
    pub fn new(model: Box<dyn LanguageModel>, plan_count: u32, max_retries: u32) -> Result<Self> {
        if plan_count == 0 {
            bail!("plan count must be > 0");
        }
        Ok(Self {
            model,
            prompts: PromptEngine::new(),
            schema: ResponseSchema::new("plan_confidence", PLAN_CONFIDENCE_SCHEMA)?,
            plan_count,
            max_retries,
        })
    }

    fn generate_plan(&self, prompt: &str, input: &PlanInput<'_>) -> Result<SolutionPlan> {
        let response = self.model.generate(prompt);
        if response.trim().is_empty() {
            warn!("planning response is empty");
            return Ok(SolutionPlan::new("", 0.0));
        }
        // Without a fenced block the whole response is taken as the plan.
        let plan = extract_markdown_blocks(&response)
            .into_iter()
            .next()
            .unwrap_or(response);
        let confidence = self.confidence(input, &plan)?;
        Ok(SolutionPlan::new(plan, confidence))
    }

    /// Score `plan`; any unusable answer scores 0.
    fn confidence(&self, input: &PlanInput<'_>, plan: &str) -> Result<f64> {
        let scoring_input = PlanInput {
            example_solutions: None,
            plan: Some(plan),
            ..input.clone()
        };
        let prompt = self
            .prompts
            .render_json(PromptKind::PlanConfidence, &scoring_input)?;
        let scored = request_with_retries(self.model.as_ref(), &prompt, self.max_retries, |text| {
            self.schema.parse::<ConfidenceOutput>(text)
        });
        Ok(match scored {
            Ok(output) => output.confidence,
            Err(err) => {
                warn!(err = format!("{err:#}"), "no usable confidence, scoring 0");
                0.0
            }
        })
    }
}

impl Stage for PlanningStage {
    fn name(&self) -> &str {
        StageKind::Planning.as_str()
    }

    fn process(&mut self, mut record: PipelineRecord) -> Result<PipelineRecord> {
        let examples = record
            .references
            .iter()
            .map(|r| ExampleSolution {
                puzzle: &r.puzzle.description,
                plan: &r.plan,
                code: &r.puzzle.solution,
            })
            .collect();
        let input = PlanInput {
            problem_statement: record.problem_statement.as_deref(),
            full_description: &record.puzzle().description,
            underlying_concepts: &record.concepts,
            keywords: &record.keywords,
            constraints: &record.constraints,
            test_cases: &record.test_cases,
            example_solutions: Some(examples),
            plan: None,
        };
        let prompt = self.prompts.render_json(PromptKind::Plan, &input)?;

        let mut plans = Vec::new();
        let mut best: Option<SolutionPlan> = None;
        for i in 1..=self.plan_count {
            info!(plan = i, of = self.plan_count, "generating plan");
            let plan = self.generate_plan(&prompt, &input)?;
            debug!(confidence = plan.confidence, "plan scored");
            if best
                .as_ref()
                .is_none_or(|current| plan.confidence >= current.confidence)
            {
                best = Some(plan.clone());
            }
            plans.push(plan);
        }

        let summary = format!(
            "generated {} plans, best confidence {:.2}",
            plans.len(),
            best.as_ref().map_or(0.0, |p| p.confidence)
        );
        record.selected_plan = best;
        record.generated_plans = plans.into();
        record.log_activity(self.name(), summary);
        Ok(record)
    }
}
