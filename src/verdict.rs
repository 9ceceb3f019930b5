//! Reduction of a run report to the final verdict.
use crate::harness::RunReport;

/// Exit status for a run that completed but resolved nothing. Distinct from
/// the generic failure status so callers can tell "patch judged
/// insufficient" from "pipeline broke".
pub const EXIT_UNRESOLVED: u8 = 2;

/// The run-level outcome handed back to the calling process.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Verdict {
    /// At least one instance resolved.
    Success { resolved: usize },
    /// The run completed with zero resolved instances. Carries the per-task
    /// log path of the first task, when one exists, as the place to look.
    Failure { log_path: Option<String> },
}

/// Apply the resolution predicate: the verdict depends on the resolved count
/// and nothing else.
pub fn resolve_verdict(report: &RunReport) -> Verdict {
    let resolved = report.resolved_count();
    if resolved > 0 {
        Verdict::Success { resolved }
    } else {
        Verdict::Failure {
            log_path: report
                .instances
                .values()
                .next()
                .map(|outcome| outcome.log_path.clone()),
        }
    }
}

impl Verdict {
    pub fn exit_code(&self) -> u8 {
        match self {
            Verdict::Success { .. } => 0,
            Verdict::Failure { .. } => EXIT_UNRESOLVED,
        }
    }
}
