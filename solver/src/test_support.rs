//! Scripted collaborators and record builders for tests.
//!
//! Doubles share their state through `Rc` so a test can hand one clone to a
//! stage and keep another to inspect calls afterwards.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::rc::Rc;

use anyhow::Result;

use crate::core::decision::{Decision, ExecutionResult};
use crate::core::record::{PipelineRecord, Puzzle, SolutionPlan};
use crate::io::model::LanguageModel;
use crate::io::sandbox::CodeRunner;
use crate::io::store::{JsonPuzzleStore, PuzzleStore};
use crate::pipeline::Collaborators;
use crate::stages::{Stage, StageKind};
use crate::stages::debugging::{Judge, JudgeRequest};

/// Record for puzzle 2024 day 1 with nothing but identity populated.
pub fn sample_record() -> PipelineRecord {
    PipelineRecord::new(Puzzle {
        description: "--- Day 1: Sample ---\nAdd up every number in the input.".to_string(),
        year: 2024,
        day: 1,
    })
}

/// Sample record whose first plan is selected and whose queue holds all `plans`.
pub fn record_with_plans(plans: &[&str]) -> PipelineRecord {
    let mut record = sample_record();
    let plans: Vec<SolutionPlan> = plans.iter().map(|p| SolutionPlan::new(*p, 0.5)).collect();
    record.selected_plan = plans.first().cloned();
    record.generated_plans = plans.into();
    record
}

#[derive(Debug, Default)]
struct ModelScript {
    responses: VecDeque<String>,
    prompts: Vec<String>,
}

/// Model that replays canned responses in order, then answers `""`.
#[derive(Debug, Clone, Default)]
pub struct ScriptedModel {
    script: Rc<RefCell<ModelScript>>,
}

impl ScriptedModel {
    pub fn new<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let model = Self::default();
        model.script.borrow_mut().responses = responses.into_iter().map(Into::into).collect();
        model
    }

    pub fn push(&self, response: impl Into<String>) {
        self.script.borrow_mut().responses.push_back(response.into());
    }

    /// Prompts received so far, oldest first.
    pub fn prompts(&self) -> Vec<String> {
        self.script.borrow().prompts.clone()
    }

    pub fn calls(&self) -> usize {
        self.script.borrow().prompts.len()
    }

    pub fn boxed(&self) -> Box<dyn LanguageModel> {
        Box::new(self.clone())
    }
}

impl LanguageModel for ScriptedModel {
    fn name(&self) -> &str {
        "scripted"
    }

    fn generate(&self, prompt: &str) -> String {
        let mut script = self.script.borrow_mut();
        script.prompts.push(prompt.to_string());
        script.responses.pop_front().unwrap_or_default()
    }
}

/// Wrap `body` in a fenced `json` block the way models answer.
pub fn json_reply(body: &str) -> String {
    format!("Here you go:\n```json\n{body}\n```\n")
}

#[derive(Debug, Default)]
struct RunnerScript {
    results: VecDeque<ExecutionResult>,
    calls: Vec<(String, String)>,
}

/// Code runner that replays results; once drained every run is unavailable.
#[derive(Debug, Clone, Default)]
pub struct ScriptedRunner {
    script: Rc<RefCell<RunnerScript>>,
}

impl ScriptedRunner {
    pub fn new(results: impl IntoIterator<Item = ExecutionResult>) -> Self {
        let runner = Self::default();
        runner.script.borrow_mut().results = results.into_iter().collect();
        runner
    }

    /// `(code, input)` pairs in call order.
    pub fn calls(&self) -> Vec<(String, String)> {
        self.script.borrow().calls.clone()
    }

    pub fn boxed(&self) -> Box<dyn CodeRunner> {
        Box::new(self.clone())
    }
}

impl CodeRunner for ScriptedRunner {
    fn run(&self, code: &str, input: &str) -> ExecutionResult {
        let mut script = self.script.borrow_mut();
        script.calls.push((code.to_string(), input.to_string()));
        script
            .results
            .pop_front()
            .unwrap_or_else(ExecutionResult::unavailable)
    }
}

#[derive(Debug, Default)]
struct JudgeScript {
    decisions: VecDeque<Decision>,
    inputs: Vec<String>,
}

/// Judge that replays decisions; once drained it always cycles the plan.
#[derive(Debug, Clone, Default)]
pub struct ScriptedJudge {
    script: Rc<RefCell<JudgeScript>>,
}

impl ScriptedJudge {
    pub fn new(decisions: impl IntoIterator<Item = Decision>) -> Self {
        let judge = Self::default();
        judge.script.borrow_mut().decisions = decisions.into_iter().collect();
        judge
    }

    pub fn calls(&self) -> usize {
        self.script.borrow().inputs.len()
    }

    /// Test inputs of the failures that were judged.
    pub fn judged_inputs(&self) -> Vec<String> {
        self.script.borrow().inputs.clone()
    }

    pub fn boxed(&self) -> Box<dyn Judge> {
        Box::new(self.clone())
    }
}

impl Judge for ScriptedJudge {
    fn judge(&self, request: &JudgeRequest<'_>) -> Decision {
        let mut script = self.script.borrow_mut();
        script.inputs.push(request.test_input.to_string());
        script.decisions.pop_front().unwrap_or(Decision::CyclePlan)
    }
}

type StageAction = Box<dyn FnMut(&mut PipelineRecord, u32) -> Result<()>>;

/// Stage driven by a closure that receives the record and its 1-based call number.
pub struct ScriptedStage {
    name: String,
    calls: Rc<Cell<u32>>,
    action: StageAction,
}

impl ScriptedStage {
    pub fn new(
        name: &str,
        action: impl FnMut(&mut PipelineRecord, u32) -> Result<()> + 'static,
    ) -> Self {
        Self {
            name: name.to_string(),
            calls: Rc::new(Cell::new(0)),
            action: Box::new(action),
        }
    }

    /// A stage that only counts its invocations.
    pub fn passthrough(name: &str) -> Self {
        Self::new(name, |_, _| Ok(()))
    }

    /// Shared invocation counter; stays readable after the stage is boxed.
    pub fn call_counter(&self) -> Rc<Cell<u32>> {
        Rc::clone(&self.calls)
    }
}

impl Stage for ScriptedStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn process(&mut self, mut record: PipelineRecord) -> Result<PipelineRecord> {
        let call = self.calls.get() + 1;
        self.calls.set(call);
        (self.action)(&mut record, call)?;
        Ok(record)
    }
}

/// One scripted model per stage, a scripted runner and a JSON store on disk.
pub struct ScriptedCollaborators {
    models: HashMap<StageKind, ScriptedModel>,
    runner: ScriptedRunner,
    store_path: PathBuf,
}

impl ScriptedCollaborators {
    pub fn new(store_path: impl Into<PathBuf>) -> Self {
        Self {
            models: StageKind::ALL
                .into_iter()
                .map(|kind| (kind, ScriptedModel::default()))
                .collect(),
            runner: ScriptedRunner::default(),
            store_path: store_path.into(),
        }
    }

    pub fn with_runner(mut self, runner: ScriptedRunner) -> Self {
        self.runner = runner;
        self
    }

    /// The model handed to `kind`; push responses onto it before solving.
    pub fn scripted(&self, kind: StageKind) -> &ScriptedModel {
        &self.models[&kind]
    }
}

impl Collaborators for ScriptedCollaborators {
    fn model(&self, stage: StageKind, _name: &str) -> Box<dyn LanguageModel> {
        self.scripted(stage).boxed()
    }

    fn store(&self) -> Result<Box<dyn PuzzleStore>> {
        Ok(Box::new(JsonPuzzleStore::open(&self.store_path)?))
    }

    fn runner(&self) -> Box<dyn CodeRunner> {
        self.runner.boxed()
    }
}
