//! Stable exit codes for solver CLI commands.

/// The command ran to completion, whether or not the puzzle was solved.
pub const OK: i32 = 0;
/// Invalid arguments, configuration, or store contents, or an I/O failure.
pub const INVALID: i32 = 1;
