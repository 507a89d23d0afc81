//! Run orchestration and reporting.

pub mod orchestrator;
pub mod report;

pub use orchestrator::{Orchestrator, RunOptions};
pub use report::{MessageReport, RunReport, TaskReport};
