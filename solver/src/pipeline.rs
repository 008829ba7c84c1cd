//! Assembles the five-stage pipeline from configuration.

use std::collections::HashMap;

use anyhow::Result;
use tracing::debug;

use crate::core::budget::AttemptCaps;
use crate::io::config::SolverConfig;
use crate::io::model::{CommandModel, LanguageModel};
use crate::io::sandbox::{CodeRunner, Sandbox};
use crate::io::store::{JsonPuzzleStore, PuzzleStore};
use crate::orchestrator::{Orchestrator, PipelineStage};
use crate::stages::StageKind;
use crate::stages::coding::CodingStage;
use crate::stages::debugging::{DebuggingStage, ModelJudge};
use crate::stages::planning::PlanningStage;
use crate::stages::preprocess::PreprocessStage;
use crate::stages::retrieval::RetrievalStage;

/// Per-solve choices that come from the command line rather than the config file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineOptions {
    pub puzzle_input: String,
    /// Known answer for the real puzzle input, if any.
    pub expected_output: Option<String>,
    pub disabled: Vec<StageKind>,
    /// Overrides `model.default` from the config.
    pub default_model: Option<String>,
    pub stage_models: HashMap<StageKind, String>,
}

impl PipelineOptions {
    pub fn is_enabled(&self, kind: StageKind) -> bool {
        !self.disabled.contains(&kind)
    }

    /// Stage override, then the command-line default, then the config default.
    pub fn model_for(&self, kind: StageKind, cfg: &SolverConfig) -> String {
        self.stage_models
            .get(&kind)
            .or(self.default_model.as_ref())
            .unwrap_or(&cfg.model.default)
            .clone()
    }
}

/// Factories for the external collaborators the stages talk to.
pub trait Collaborators {
    fn model(&self, stage: StageKind, name: &str) -> Box<dyn LanguageModel>;

    fn store(&self) -> Result<Box<dyn PuzzleStore>>;

    fn runner(&self) -> Box<dyn CodeRunner>;
}

/// Collaborators backed by the model CLI, the JSON store and the sandbox.
pub struct ConfiguredCollaborators<'a> {
    cfg: &'a SolverConfig,
}

impl<'a> ConfiguredCollaborators<'a> {
    pub fn new(cfg: &'a SolverConfig) -> Self {
        Self { cfg }
    }
}

impl Collaborators for ConfiguredCollaborators<'_> {
    fn model(&self, _stage: StageKind, name: &str) -> Box<dyn LanguageModel> {
        Box::new(CommandModel::new(name, &self.cfg.model))
    }

    fn store(&self) -> Result<Box<dyn PuzzleStore>> {
        let store = JsonPuzzleStore::open(&self.cfg.store_path)?
            .with_weights(self.cfg.similarity_weights);
        Ok(Box::new(store))
    }

    fn runner(&self) -> Box<dyn CodeRunner> {
        Box::new(Sandbox::new(&self.cfg.sandbox))
    }
}

/// Build the orchestrator for one solve.
///
/// Every stage is constructed, enabled or not, so configuration errors
/// surface before any model is called.
pub fn build_pipeline(
    cfg: &SolverConfig,
    options: &PipelineOptions,
    collaborators: &dyn Collaborators,
) -> Result<Orchestrator> {
    let retries = cfg.max_response_retries;
    let caps: AttemptCaps = cfg.caps();
    let model = |kind: StageKind| {
        let name = options.model_for(kind, cfg);
        debug!(stage = kind.as_str(), model = %name, "stage model");
        collaborators.model(kind, &name)
    };

    let stages = vec![
        PipelineStage::forward(PreprocessStage::new(model(StageKind::Preprocess), retries)?),
        PipelineStage::forward(RetrievalStage::new(
            model(StageKind::Retrieval),
            collaborators.store()?,
            cfg.retrieval_limit,
            retries,
        )?),
        PipelineStage::forward(PlanningStage::new(
            model(StageKind::Planning),
            cfg.plan_count,
            retries,
        )?),
        PipelineStage::forward(CodingStage::new(
            model(StageKind::Coding),
            cfg.sandbox.language.clone(),
            retries,
        )?),
        PipelineStage::backtracking(DebuggingStage::new(
            collaborators.runner(),
            Box::new(ModelJudge::new(model(StageKind::Debugging), retries)?),
            options.puzzle_input.clone(),
            options.expected_output.clone(),
            caps,
        )?),
    ];

    let stages = stages
        .into_iter()
        .zip(StageKind::ALL)
        .map(|(stage, kind)| stage.enabled(options.is_enabled(kind)))
        .collect();
    Orchestrator::new(stages, caps)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> PipelineOptions {
        PipelineOptions {
            puzzle_input: "1\n2\n".to_string(),
            ..PipelineOptions::default()
        }
    }

    #[test]
    fn model_resolution_prefers_stage_override() {
        let cfg = SolverConfig::default();
        let mut opts = options();
        assert_eq!(opts.model_for(StageKind::Coding, &cfg), cfg.model.default);

        opts.default_model = Some("fast".to_string());
        assert_eq!(opts.model_for(StageKind::Coding, &cfg), "fast");

        opts.stage_models.insert(StageKind::Coding, "smart".to_string());
        assert_eq!(opts.model_for(StageKind::Coding, &cfg), "smart");
        assert_eq!(opts.model_for(StageKind::Planning, &cfg), "fast");
    }

    #[test]
    fn builds_stages_in_fixed_order() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = SolverConfig {
            store_path: temp.path().join("puzzles.json"),
            ..SolverConfig::default()
        };

        let orchestrator =
            build_pipeline(&cfg, &options(), &ConfiguredCollaborators::new(&cfg)).expect("build");

        assert_eq!(
            orchestrator.stage_names(),
            ["preprocess", "retrieval", "planning", "coding", "debugging"]
        );
    }

    #[test]
    fn missing_puzzle_input_fails_before_running() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = SolverConfig {
            store_path: temp.path().join("puzzles.json"),
            ..SolverConfig::default()
        };
        let opts = PipelineOptions::default();

        let err = build_pipeline(&cfg, &opts, &ConfiguredCollaborators::new(&cfg))
            .err()
            .expect("error");

        assert!(err.to_string().contains("puzzle input"));
    }
}
