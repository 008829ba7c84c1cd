//! Multi-stage LLM pipeline that writes programs for daily programming puzzles.
//!
//! A puzzle flows through five stages (preprocess, retrieval, planning,
//! coding, debugging) that share one [`core::record::PipelineRecord`]. The
//! [`orchestrator`] runs them in order and rewinds when the debugging stage
//! asks for it, until the code reproduces the known answer or the attempt
//! budget runs out.
//!
//! - **[`core`]**: Pure logic (record, budgets, verdicts, remedies, similarity).
//!   No I/O, fully testable in isolation.
//! - **[`io`]**: Model calls, sandboxed execution, config, and the puzzle store.
//! - **[`stages`]**: The five pipeline stages.
//!
//! [`solve`] and [`catalog`] wire these together for the CLI commands.

pub mod catalog;
pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod orchestrator;
pub mod pipeline;
pub mod solve;
pub mod stages;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
