//! Retry caps shared by the orchestrator and the debugging stage.

use anyhow::{Result, anyhow};

/// Attempt caps in effect for one solve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptCaps {
    /// Orchestrator terminates once `debug_attempts` exceeds this.
    pub max_debug_attempts: u32,
    /// Fixes the debugging stage may apply directly.
    pub max_code_fixes: u32,
    /// Suggestions the debugging stage may hand back to coding.
    pub max_delegations: u32,
}

impl Default for AttemptCaps {
    fn default() -> Self {
        Self {
            max_debug_attempts: 5,
            max_code_fixes: 2,
            max_delegations: 2,
        }
    }
}

impl AttemptCaps {
    pub fn validate(&self) -> Result<()> {
        if self.max_debug_attempts == 0 {
            return Err(anyhow!("max_debug_attempts must be > 0"));
        }
        Ok(())
    }
}

/// Returns true once the attempt counter has gone past its cap.
pub fn attempts_exhausted(debug_attempts: u32, caps: &AttemptCaps) -> bool {
    debug_attempts > caps.max_debug_attempts
}

/// Per-instance counters for the debugging stage's private retry policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemedyCounters {
    pub code_fixes: u32,
    pub delegations: u32,
}

impl RemedyCounters {
    pub fn can_fix(&self, caps: &AttemptCaps) -> bool {
        self.code_fixes < caps.max_code_fixes
    }

    pub fn can_delegate(&self, caps: &AttemptCaps) -> bool {
        self.delegations < caps.max_delegations
    }
}
