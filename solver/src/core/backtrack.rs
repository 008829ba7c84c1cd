//! Pure index arithmetic for backtrack requests.

/// Where the orchestrator continues after a backtrack request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rewind {
    /// Index of the stage to run next.
    pub index: usize,
    /// True when the request reached past the first enabled stage.
    pub clamped: bool,
}

/// Resolve a backtrack of `steps` from `current`.
///
/// Steps count *enabled* stages only, so a disabled stage between the caller
/// and its target never absorbs a step. `steps == 0` re-runs the current
/// stage. A request that reaches past the first enabled stage clamps to it
/// (the pipeline restarts from its first enabled stage).
pub fn rewind_target(enabled: &[bool], current: usize, steps: u32) -> Rewind {
    if steps == 0 {
        return Rewind {
            index: current,
            clamped: false,
        };
    }

    let mut remaining = steps;
    let mut index = current;
    while index > 0 {
        index -= 1;
        if !enabled.get(index).copied().unwrap_or(false) {
            continue;
        }
        remaining -= 1;
        if remaining == 0 {
            return Rewind {
                index,
                clamped: false,
            };
        }
    }

    Rewind {
        index: first_enabled(enabled).unwrap_or(0),
        clamped: true,
    }
}

fn first_enabled(enabled: &[bool]) -> Option<usize> {
    enabled.iter().position(|on| *on)
}
