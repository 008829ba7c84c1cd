//! Shared pipeline record threaded through every stage.
//!
//! The record is handed to each stage by value and returned as a new version.
//! Identity fields are fixed at construction; append-only logs and the solve
//! state are only reachable through methods so their invariants hold:
//!
//! - `final_code` is `Some` exactly when the record is solved.
//! - `backtracking_step` is read-and-reset by [`PipelineRecord::take_backtrack`].
//! - debug suggestions, activity and error logs only grow.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// Puzzle identity: source text plus calendar position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Puzzle {
    pub description: String,
    pub year: u16,
    pub day: u8,
}

/// Example input paired with the output the solution must print.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCase {
    pub input: String,
    pub expected_output: String,
}

impl TestCase {
    pub fn new(input: impl Into<String>, expected_output: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            expected_output: expected_output.into(),
        }
    }
}

/// Natural-language solution plan with a confidence score in `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolutionPlan {
    pub plan: String,
    pub confidence: f64,
}

impl SolutionPlan {
    /// Build a plan, clamping confidence into `[0, 1]` (NaN becomes 0).
    pub fn new(plan: impl Into<String>, confidence: f64) -> Self {
        let confidence = if confidence.is_nan() {
            0.0
        } else {
            confidence.clamp(0.0, 1.0)
        };
        Self {
            plan: plan.into(),
            confidence,
        }
    }
}

/// A previously solved puzzle pulled from the reference store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferencePuzzle {
    pub year: u16,
    pub day: u8,
    pub description: String,
    pub solution: String,
}

/// Reference puzzle together with the plan extracted from its best solution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    pub puzzle: ReferencePuzzle,
    pub plan: String,
}

/// One line of stage bookkeeping (activity or error).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub stage: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineRecord {
    puzzle: Puzzle,

    pub problem_statement: Option<String>,
    pub input_format: Option<String>,
    pub output_format: Option<String>,
    pub constraints: Vec<String>,
    pub keywords: Vec<String>,
    pub concepts: Vec<String>,
    pub test_cases: Vec<TestCase>,

    /// Relevance-ordered, not deduplicated.
    pub references: Vec<Reference>,

    pub selected_plan: Option<SolutionPlan>,
    /// Candidate queue; only planning refills it, debugging pops from the head.
    pub generated_plans: VecDeque<SolutionPlan>,

    pub generated_code: Option<String>,

    debug_suggestions: Vec<String>,
    pub debug_attempts: u32,
    backtracking_step: u32,
    final_code: Option<String>,

    pub current_step: Option<String>,
    activity_log: Vec<LogEntry>,
    errors: Vec<LogEntry>,
}

impl PipelineRecord {
    /// Create a record with only the identity populated.
    pub fn new(puzzle: Puzzle) -> Self {
        Self {
            puzzle,
            problem_statement: None,
            input_format: None,
            output_format: None,
            constraints: Vec::new(),
            keywords: Vec::new(),
            concepts: Vec::new(),
            test_cases: Vec::new(),
            references: Vec::new(),
            selected_plan: None,
            generated_plans: VecDeque::new(),
            generated_code: None,
            debug_suggestions: Vec::new(),
            debug_attempts: 0,
            backtracking_step: 0,
            final_code: None,
            current_step: None,
            activity_log: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn puzzle(&self) -> &Puzzle {
        &self.puzzle
    }

    pub fn year(&self) -> u16 {
        self.puzzle.year
    }

    pub fn day(&self) -> u8 {
        self.puzzle.day
    }

    pub fn debug_suggestions(&self) -> &[String] {
        &self.debug_suggestions
    }

    pub fn push_suggestion(&mut self, suggestion: impl Into<String>) {
        self.debug_suggestions.push(suggestion.into());
    }

    pub fn backtracking_step(&self) -> u32 {
        self.backtracking_step
    }

    /// Ask the orchestrator to jump back `steps` stages after this one returns.
    pub fn request_backtrack(&mut self, steps: u32) {
        self.backtracking_step = steps;
    }

    /// Read the pending backtrack request and reset it to zero.
    pub fn take_backtrack(&mut self) -> u32 {
        std::mem::take(&mut self.backtracking_step)
    }

    pub fn is_solved(&self) -> bool {
        self.final_code.is_some()
    }

    pub fn final_code(&self) -> Option<&str> {
        self.final_code.as_deref()
    }

    /// Accept the current generated code as the solution.
    ///
    /// Returns `false` (and leaves the record untouched) when there is no code
    /// or the record is already solved.
    pub fn mark_solved(&mut self) -> bool {
        if self.final_code.is_some() {
            return false;
        }
        match &self.generated_code {
            Some(code) => {
                self.final_code = Some(code.clone());
                true
            }
            None => false,
        }
    }

    pub fn activity_log(&self) -> &[LogEntry] {
        &self.activity_log
    }

    pub fn log_activity(&mut self, stage: &str, message: impl Into<String>) {
        self.activity_log.push(LogEntry {
            stage: stage.to_string(),
            message: message.into(),
        });
    }

    pub fn errors(&self) -> &[LogEntry] {
        &self.errors
    }

    pub fn log_error(&mut self, stage: &str, message: impl Into<String>) {
        self.errors.push(LogEntry {
            stage: stage.to_string(),
            message: message.into(),
        });
    }
}
