//! Validation of execution results and the judgement vocabulary.

use serde::{Deserialize, Serialize};

/// What the sandbox observed when running generated code.
///
/// `stdout == None` means the code could not be evaluated (timeout or launch
/// failure); `Some("")` means it ran and printed nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub stdout: Option<String>,
    pub stderr: Option<String>,
}

impl ExecutionResult {
    /// The `(None, None)` result used for timeouts and launch failures.
    pub fn unavailable() -> Self {
        Self::default()
    }

    pub fn completed(stdout: impl Into<String>, stderr: Option<String>) -> Self {
        Self {
            stdout: Some(stdout.into()),
            stderr,
        }
    }

    pub fn is_unavailable(&self) -> bool {
        self.stdout.is_none() && self.stderr.is_none()
    }

    fn has_output(&self) -> bool {
        self.stdout
            .as_deref()
            .is_some_and(|out| !out.trim().is_empty())
    }

    fn has_errors(&self) -> bool {
        self.stderr
            .as_deref()
            .is_some_and(|err| !err.trim().is_empty())
    }
}

/// Outcome of comparing one execution against its expected output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Trimmed output equals the trimmed expectation.
    Passed,
    /// Nothing was printed and nothing went to stderr: abandon the plan.
    Unrecoverable,
    /// Wrong output or an error trace: ask the judgement step.
    NeedsJudgement,
}

pub fn evaluate(expected_output: &str, result: &ExecutionResult) -> Verdict {
    if let Some(stdout) = &result.stdout
        && stdout.trim() == expected_output.trim()
    {
        return Verdict::Passed;
    }
    if !result.has_output() && !result.has_errors() {
        return Verdict::Unrecoverable;
    }
    Verdict::NeedsJudgement
}

/// Classification produced by the judgement step for a failing test case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// The judge rewrote the code itself.
    FixMyself { code: String, suggestion: String },
    /// The judge hands a suggestion back to the coding stage.
    Delegate { suggestion: String },
    /// The current plan is unsalvageable; move to the next one.
    CyclePlan,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionKind {
    FixMyself,
    Delegate,
    Plan,
}

/// Wire shape of a judgement response (validated by `debug_judgement` schema).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JudgementResponse {
    pub decision: DecisionKind,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub fix: Option<String>,
    #[serde(default)]
    pub suggestion: Option<String>,
}

impl From<JudgementResponse> for Decision {
    fn from(resp: JudgementResponse) -> Self {
        let suggestion = resp
            .suggestion
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        match resp.decision {
            DecisionKind::FixMyself => match resp.fix.filter(|code| !code.trim().is_empty()) {
                Some(code) => Decision::FixMyself {
                    code,
                    suggestion: suggestion.unwrap_or_default(),
                },
                None => Decision::CyclePlan,
            },
            DecisionKind::Delegate => match suggestion {
                Some(suggestion) => Decision::Delegate { suggestion },
                None => Decision::CyclePlan,
            },
            DecisionKind::Plan => Decision::CyclePlan,
        }
    }
}
