//! Deterministic, pure logic shared by the solver.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod backtrack;
pub mod budget;
pub mod decision;
pub mod record;
pub mod remedy;
pub mod response;
pub mod similarity;
