//! Turn a judgement [`Decision`] into record changes and a backtrack request.
//!
//! Remedies degrade deterministically when a cap is reached:
//! fix -> delegate -> cycle plan. Nothing here touches I/O; callers log the
//! returned [`Remedy`].

use crate::core::budget::{AttemptCaps, RemedyCounters};
use crate::core::decision::Decision;
use crate::core::record::PipelineRecord;

/// What was actually done to the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Remedy {
    /// Generated code replaced; the debugging stage re-runs (backtrack 0).
    FixApplied,
    /// Suggestion queued for coding; backtrack 1.
    Delegated,
    /// Next candidate plan promoted; backtrack 1.
    PlanCycled,
    /// No alternative plan left; record untouched.
    NoPlansLeft,
}

pub fn apply_decision(
    record: &mut PipelineRecord,
    counters: &mut RemedyCounters,
    caps: &AttemptCaps,
    decision: Decision,
) -> Remedy {
    match decision {
        Decision::FixMyself { code, suggestion } => {
            apply_fix(record, counters, caps, code, suggestion)
        }
        Decision::Delegate { suggestion } => delegate(record, counters, caps, suggestion),
        Decision::CyclePlan => cycle_plan(record),
    }
}

fn apply_fix(
    record: &mut PipelineRecord,
    counters: &mut RemedyCounters,
    caps: &AttemptCaps,
    code: String,
    suggestion: String,
) -> Remedy {
    // An identical "fix" would re-run the same failure, so treat it like a
    // spent fix budget.
    let unchanged = record.generated_code.as_deref() == Some(code.as_str());
    if !counters.can_fix(caps) || unchanged {
        return delegate(record, counters, caps, suggestion);
    }
    record.generated_code = Some(code);
    counters.code_fixes += 1;
    record.request_backtrack(0);
    Remedy::FixApplied
}

fn delegate(
    record: &mut PipelineRecord,
    counters: &mut RemedyCounters,
    caps: &AttemptCaps,
    suggestion: String,
) -> Remedy {
    if !counters.can_delegate(caps) {
        return cycle_plan(record);
    }
    if !suggestion.trim().is_empty() {
        record.push_suggestion(suggestion);
    }
    counters.delegations += 1;
    record.request_backtrack(1);
    Remedy::Delegated
}

/// Promote the next queued plan that differs from the selected one.
///
/// Plans ahead of it (duplicates of the current selection) are discarded.
/// With no alternative left the record is returned unchanged.
pub fn cycle_plan(record: &mut PipelineRecord) -> Remedy {
    let next = record
        .generated_plans
        .iter()
        .position(|plan| Some(plan) != record.selected_plan.as_ref());
    let Some(next) = next else {
        return Remedy::NoPlansLeft;
    };
    record.generated_plans.drain(..next);
    let Some(plan) = record.generated_plans.pop_front() else {
        return Remedy::NoPlansLeft;
    };
    record.selected_plan = Some(plan);
    record.request_backtrack(1);
    Remedy::PlanCycled
}
