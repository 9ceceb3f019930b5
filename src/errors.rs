//! Fatal error taxonomy for the validation pipeline.
//!
//! Only failures that abort a run live here. Per-task execution failures and
//! per-image cleanup failures are isolated where they happen and surface
//! through the run report, never through this enum.
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    /// The task description is missing required fields. Detected before any
    /// container or network activity; nothing is written to disk.
    #[error("task description missing required field(s): {}", .missing.join(", "))]
    Schema { missing: Vec<String> },

    /// An orchestration invariant was violated before the run started.
    #[error("precondition violated: {0}")]
    Precondition(String),

    /// Report synthesis found no persisted artifacts to grade.
    #[error("no run artifacts found for run {run_id} under {}", .searched.display())]
    ReportAbsence { run_id: String, searched: PathBuf },
}

impl ValidationError {
    pub fn schema(missing: Vec<String>) -> Self {
        Self::Schema { missing }
    }
}
