//! Execution harness collaborators.
//!
//! The orchestrator talks to two collaborators through the traits below: an
//! [`InstanceExecutor`] that builds images and runs each task's test subset,
//! and a [`ReportSynthesizer`] that folds the persisted per-task artifacts
//! into one [`RunReport`]. Any conforming implementation may stand behind the
//! traits without changing orchestration behavior; [`DockerHarness`] is the
//! shipped one, backed by the local docker CLI.
mod build;
mod grade;
mod report;
mod run;

use crate::cache::CacheLevel;
use crate::datapoint::TaskRecord;
use crate::docker::DockerClient;
use crate::paths::RunPaths;
use crate::predictions::Prediction;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

pub const RUN_REPORT_SCHEMA_VERSION: u32 = 1;
pub const INSTANCE_REPORT_SCHEMA_VERSION: u32 = 1;

/// Everything the orchestrator supplies for one execution pass.
pub struct ExecutionRequest<'a> {
    pub dataset: &'a [TaskRecord],
    pub predictions: &'a BTreeMap<String, Prediction>,
    pub paths: &'a RunPaths,
    pub cache_level: CacheLevel,
    pub clean: bool,
    pub force_rebuild: bool,
    pub max_workers: usize,
    pub timeout: Duration,
    pub instance_image_tag: &'a str,
    pub env_image_tag: &'a str,
}

/// Inputs for report synthesis over an already-persisted run namespace.
pub struct ReportRequest<'a> {
    pub dataset: &'a [TaskRecord],
    pub predictions: &'a BTreeMap<String, Prediction>,
    pub paths: &'a RunPaths,
}

/// Executes every task in the request independently: one task's build or run
/// failure must not prevent siblings from being attempted. Results are
/// persisted under the request's run namespace, discoverable by the
/// synthesizer with no further input.
pub trait InstanceExecutor {
    fn run_instances(&self, request: &ExecutionRequest<'_>) -> Result<()>;
}

/// Aggregates per-task artifacts into a run report and persists it.
pub trait ReportSynthesizer {
    fn synthesize_report(&self, request: &ReportRequest<'_>) -> Result<RunReport>;
}

/// Final status of one task instance within a run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    /// All FAIL_TO_PASS tests now pass and all PASS_TO_PASS tests still pass.
    Resolved,
    /// Execution completed but the test sets did not reach their expected
    /// post-patch status.
    Unresolved,
    /// Execution never produced a gradeable result for this task.
    Error,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InstanceOutcome {
    pub instance_id: String,
    pub status: InstanceStatus,
    /// Per-task artifact directory within the run namespace.
    pub log_dir: String,
    /// The detailed per-task execution log.
    pub log_path: String,
}

/// One run's structured outcome, keyed by task identifier. Produced once by
/// the synthesizer, read once by the resolver, never mutated afterwards.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunReport {
    pub schema_version: u32,
    pub generated_at_epoch_ms: u128,
    pub run_id: String,
    pub model_name: String,
    pub total_instances: usize,
    pub submitted_instances: usize,
    pub completed_ids: Vec<String>,
    pub resolved_ids: Vec<String>,
    pub unresolved_ids: Vec<String>,
    pub error_ids: Vec<String>,
    pub instances: BTreeMap<String, InstanceOutcome>,
}

impl RunReport {
    pub fn resolved_count(&self) -> usize {
        self.resolved_ids.len()
    }
}

/// Per-task grading record, written beside the task's logs by the executor
/// and folded into the run report by the synthesizer.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InstanceReport {
    pub schema_version: u32,
    pub instance_id: String,
    pub model_name: String,
    pub patch_applied: bool,
    pub timed_out: bool,
    pub resolved: bool,
    pub fail_to_pass: TestGroupReport,
    pub pass_to_pass: TestGroupReport,
}

/// Pass/fail split of one expected test set.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TestGroupReport {
    pub passed: Vec<String>,
    pub not_passed: Vec<String>,
}

/// The shipped harness: builds and runs task environments with the local
/// docker CLI and grades pytest-style output.
pub struct DockerHarness {
    client: DockerClient,
    prebuild_env: bool,
    test_argv: Vec<String>,
}

/// Default in-container test runner; test identifiers are appended per task.
const DEFAULT_TEST_ARGV: [&str; 7] = [
    "python",
    "-m",
    "pytest",
    "-rA",
    "--tb=no",
    "-p",
    "no:cacheprovider",
];

impl DockerHarness {
    /// `test_cmd` overrides the in-container test runner; it is parsed
    /// shell-style and receives the task's test identifiers as trailing
    /// arguments.
    pub fn new(client: DockerClient, prebuild_env: bool, test_cmd: Option<&str>) -> Result<Self> {
        let test_argv = match test_cmd {
            Some(cmd) => {
                let argv = shell_words::split(cmd)
                    .with_context(|| format!("parse test command {cmd:?}"))?;
                if argv.is_empty() {
                    anyhow::bail!("test command must not be empty");
                }
                argv
            }
            None => DEFAULT_TEST_ARGV.iter().map(|arg| (*arg).to_string()).collect(),
        };
        Ok(Self {
            client,
            prebuild_env,
            test_argv,
        })
    }
}

impl InstanceExecutor for DockerHarness {
    fn run_instances(&self, request: &ExecutionRequest<'_>) -> Result<()> {
        run::run_instances(&self.client, &self.test_argv, self.prebuild_env, request)
    }
}

impl ReportSynthesizer for DockerHarness {
    fn synthesize_report(&self, request: &ReportRequest<'_>) -> Result<RunReport> {
        report::synthesize_report(request)
    }
}

/// Synthesizer over already-persisted artifacts. Needs no runtime handle, so
/// reports can be re-derived without docker present.
pub struct ArtifactReportSynthesizer;

impl ReportSynthesizer for ArtifactReportSynthesizer {
    fn synthesize_report(&self, request: &ReportRequest<'_>) -> Result<RunReport> {
        report::synthesize_report(request)
    }
}
