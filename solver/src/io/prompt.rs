//! Prompt rendering for the model-backed stages.

use anyhow::{Context, Result};
use minijinja::{Environment, Value, context};
use serde::Serialize;

const PREPROCESS_TEMPLATE: &str = include_str!("prompts/preprocess.md");
const RANK_SOLUTIONS_TEMPLATE: &str = include_str!("prompts/rank_solutions.md");
const PLAN_TEMPLATE: &str = include_str!("prompts/plan.md");
const PLAN_CONFIDENCE_TEMPLATE: &str = include_str!("prompts/plan_confidence.md");
const CODE_TEMPLATE: &str = include_str!("prompts/code.md");
const DEBUG_TEMPLATE: &str = include_str!("prompts/debug.md");

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptKind {
    Preprocess,
    RankSolutions,
    Plan,
    PlanConfidence,
    Code,
    Debug,
}

impl PromptKind {
    fn template_name(self) -> &'static str {
        match self {
            PromptKind::Preprocess => "preprocess",
            PromptKind::RankSolutions => "rank_solutions",
            PromptKind::Plan => "plan",
            PromptKind::PlanConfidence => "plan_confidence",
            PromptKind::Code => "code",
            PromptKind::Debug => "debug",
        }
    }
}

/// Template engine wrapper around minijinja.
pub struct PromptEngine {
    env: Environment<'static>,
}

impl Default for PromptEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl PromptEngine {
    pub fn new() -> Self {
        let mut env = Environment::new();
        for (name, source) in [
            ("preprocess", PREPROCESS_TEMPLATE),
            ("rank_solutions", RANK_SOLUTIONS_TEMPLATE),
            ("plan", PLAN_TEMPLATE),
            ("plan_confidence", PLAN_CONFIDENCE_TEMPLATE),
            ("code", CODE_TEMPLATE),
            ("debug", DEBUG_TEMPLATE),
        ] {
            env.add_template(name, source)
                .expect("bundled prompt templates should be valid");
        }
        Self { env }
    }

    /// Render `kind` with `input` serialized as pretty JSON under `json_input`.
    pub fn render_json<S: Serialize>(&self, kind: PromptKind, input: &S) -> Result<String> {
        self.render_json_with(kind, input, context! {})
    }

    /// Like [`Self::render_json`] with extra template variables merged in.
    pub fn render_json_with<S: Serialize>(
        &self,
        kind: PromptKind,
        input: &S,
        extra: Value,
    ) -> Result<String> {
        let json_input = serde_json::to_string_pretty(input).context("serialize prompt input")?;
        self.render(kind, context! { json_input => json_input, ..extra })
    }

    pub fn render(&self, kind: PromptKind, ctx: Value) -> Result<String> {
        let template = self
            .env
            .get_template(kind.template_name())
            .with_context(|| format!("load {} template", kind.template_name()))?;
        template
            .render(ctx)
            .with_context(|| format!("render {} prompt", kind.template_name()))
    }
}
