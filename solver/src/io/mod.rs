//! Process, filesystem, and model I/O used by the pipeline stages.

pub mod config;
pub mod model;
pub mod process;
pub mod prompt;
pub mod sandbox;
pub mod store;
