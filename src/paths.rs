//! Deterministic layout of run artifacts.
//!
//! Everything one run writes lives under `{log_root}/{run_id}/{model}/` with
//! one directory per task instance, so the synthesizer and the resolver can
//! locate artifacts from the namespace alone.
use std::path::{Path, PathBuf};

pub const INSTANCE_LOG_FILE: &str = "run_instance.log";
pub const TEST_OUTPUT_FILE: &str = "test_output.txt";
pub const PATCH_FILE: &str = "patch.diff";
pub const INSTANCE_REPORT_FILE: &str = "report.json";

/// Path owner for one run's artifact namespace.
#[derive(Clone, Debug)]
pub struct RunPaths {
    log_root: PathBuf,
    report_dir: PathBuf,
    run_id: String,
    model_name: String,
}

impl RunPaths {
    pub fn new(
        log_root: impl Into<PathBuf>,
        report_dir: impl Into<PathBuf>,
        run_id: impl Into<String>,
        model_name: impl Into<String>,
    ) -> Self {
        Self {
            log_root: log_root.into(),
            report_dir: report_dir.into(),
            run_id: run_id.into(),
            model_name: model_name.into(),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    pub fn report_dir(&self) -> &Path {
        &self.report_dir
    }

    /// Root of this run's per-task artifacts: `{log_root}/{run_id}/{model}`.
    pub fn run_root(&self) -> PathBuf {
        self.log_root.join(&self.run_id).join(&self.model_name)
    }

    pub fn instance_dir(&self, instance_id: &str) -> PathBuf {
        self.run_root().join(instance_id)
    }

    pub fn instance_log(&self, instance_id: &str) -> PathBuf {
        self.instance_dir(instance_id).join(INSTANCE_LOG_FILE)
    }

    pub fn test_output(&self, instance_id: &str) -> PathBuf {
        self.instance_dir(instance_id).join(TEST_OUTPUT_FILE)
    }

    pub fn applied_patch(&self, instance_id: &str) -> PathBuf {
        self.instance_dir(instance_id).join(PATCH_FILE)
    }

    pub fn instance_report(&self, instance_id: &str) -> PathBuf {
        self.instance_dir(instance_id).join(INSTANCE_REPORT_FILE)
    }

    /// The synthesized run report: `{report_dir}/{model}.{run_id}.json`.
    pub fn run_report(&self) -> PathBuf {
        self.report_dir
            .join(format!("{}.{}.json", self.model_name, self.run_id))
    }
}
