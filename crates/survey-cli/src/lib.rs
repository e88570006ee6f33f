//! Command-line front end for the survey analysis engine.
//!
//! Handles everything around an analysis run: configuration, CSV ingestion,
//! the previous-run state file, output artefacts and report rendering.

/// Output files and state persistence
pub mod artifacts;
/// Command-line arguments
pub mod cli;
/// CSV ingestion
pub mod ingest;
/// Report rendering
pub mod report;
/// Run orchestration
pub mod workflow;

pub use cli::Cli;
pub use workflow::{RunOptions, RunOutcome, execute, run};
