//! Validation run orchestration.
//!
//! One run turns a dataset plus its predictions into a synthesized run
//! report, in a fixed order: ensure the report directory, snapshot the
//! existing images, hand the dataset to the instance executor (skipped
//! entirely when the dataset is empty), evict images per cache policy, then
//! synthesize the report. The snapshot is taken strictly before any build
//! activity and cleanup always runs between the executor and synthesis, so
//! cache state never influences report content.
//!
//! Collaborators are taken as trait objects; any conforming executor and
//! synthesizer may stand in without changing the sequence. The caller must
//! have generated and checked the run identifier and applied process resource
//! limits before constructing the runtime handle (see `run_id` and
//! `limits::init_process_limits`).
use crate::cache::{self, CacheLevel};
use crate::datapoint::TaskRecord;
use crate::docker::ContainerRuntime;
use crate::harness::{
    ExecutionRequest, InstanceExecutor, ReportRequest, ReportSynthesizer, RunReport,
};
use crate::paths::RunPaths;
use crate::predictions::Prediction;
use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

/// The full configuration surface of one validation run.
#[derive(Clone, Debug)]
pub struct RunSettings {
    pub model_name: String,
    pub max_workers: usize,
    pub cache_level: CacheLevel,
    pub clean: bool,
    pub force_rebuild: bool,
    pub open_file_limit: u64,
    pub timeout: Duration,
    pub instance_image_tag: String,
    pub env_image_tag: String,
    pub report_dir: PathBuf,
    pub log_root: PathBuf,
}

/// The collaborators one run is wired to.
pub struct ValidationHooks<'a> {
    pub runtime: &'a dyn ContainerRuntime,
    pub executor: &'a dyn InstanceExecutor,
    pub synthesizer: &'a dyn ReportSynthesizer,
}

/// Execute one validation run to completion and return its report.
///
/// Per-task execution failures and per-image cleanup failures are isolated by
/// the collaborators and surface only through the report; errors returned
/// here are fatal to the run as a whole.
pub fn run_validation(
    hooks: &ValidationHooks<'_>,
    dataset: &[TaskRecord],
    predictions: &BTreeMap<String, Prediction>,
    run_id: &str,
    settings: &RunSettings,
) -> Result<RunReport> {
    let paths = RunPaths::new(
        &settings.log_root,
        &settings.report_dir,
        run_id,
        &settings.model_name,
    );
    std::fs::create_dir_all(&settings.report_dir).with_context(|| {
        format!(
            "create report directory {}",
            settings.report_dir.display()
        )
    })?;

    let existing_images = hooks
        .runtime
        .list_images()
        .context("snapshot existing images")?;
    info!(
        run_id = %run_id,
        existing = existing_images.len(),
        "starting validation run"
    );

    if dataset.is_empty() {
        info!("no instances to run");
    } else {
        hooks.executor.run_instances(&ExecutionRequest {
            dataset,
            predictions,
            paths: &paths,
            cache_level: settings.cache_level,
            clean: settings.clean,
            force_rebuild: settings.force_rebuild,
            max_workers: settings.max_workers,
            timeout: settings.timeout,
            instance_image_tag: &settings.instance_image_tag,
            env_image_tag: &settings.env_image_tag,
        })?;
    }

    let removed = cache::clean_images(
        hooks.runtime,
        &existing_images,
        settings.cache_level,
        settings.clean,
    );
    if removed > 0 {
        info!(removed, "evicted images after run");
    }

    hooks.synthesizer.synthesize_report(&ReportRequest {
        dataset,
        predictions,
        paths: &paths,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datapoint::parse_datapoint;
    use crate::harness::{InstanceOutcome, InstanceStatus, RUN_REPORT_SCHEMA_VERSION};
    use crate::predictions::package_predictions;
    use std::collections::BTreeSet;
    use std::sync::Mutex;

    struct Recording {
        events: Mutex<Vec<String>>,
    }

    impl Recording {
        fn new() -> Self {
            Self {
                events: Mutex::new(Vec::new()),
            }
        }

        fn push(&self, event: &str) {
            self.events
                .lock()
                .expect("record event")
                .push(event.to_string());
        }

        fn events(&self) -> Vec<String> {
            self.events.lock().expect("read events").clone()
        }
    }

    struct FakeRuntime<'a> {
        recording: &'a Recording,
        images: BTreeSet<String>,
    }

    impl ContainerRuntime for FakeRuntime<'_> {
        fn list_images(&self) -> Result<BTreeSet<String>> {
            self.recording.push("list_images");
            Ok(self.images.clone())
        }

        fn remove_image(&self, image: &str) -> Result<()> {
            self.recording.push(&format!("remove_image {image}"));
            Ok(())
        }
    }

    struct FakeExecutor<'a> {
        recording: &'a Recording,
    }

    impl InstanceExecutor for FakeExecutor<'_> {
        fn run_instances(&self, request: &ExecutionRequest<'_>) -> Result<()> {
            self.recording
                .push(&format!("run_instances {}", request.dataset.len()));
            Ok(())
        }
    }

    struct FakeSynthesizer<'a> {
        recording: &'a Recording,
        resolved: Vec<String>,
    }

    impl ReportSynthesizer for FakeSynthesizer<'_> {
        fn synthesize_report(&self, request: &ReportRequest<'_>) -> Result<RunReport> {
            self.recording.push("synthesize_report");
            let mut instances = BTreeMap::new();
            for record in request.dataset {
                let resolved = self.resolved.contains(&record.instance_id);
                instances.insert(
                    record.instance_id.clone(),
                    InstanceOutcome {
                        instance_id: record.instance_id.clone(),
                        status: if resolved {
                            InstanceStatus::Resolved
                        } else {
                            InstanceStatus::Unresolved
                        },
                        log_dir: format!("logs/{}", record.instance_id),
                        log_path: format!("logs/{}/run_instance.log", record.instance_id),
                    },
                );
            }
            Ok(RunReport {
                schema_version: RUN_REPORT_SCHEMA_VERSION,
                generated_at_epoch_ms: 0,
                run_id: request.paths.run_id().to_string(),
                model_name: request.paths.model_name().to_string(),
                total_instances: request.dataset.len(),
                submitted_instances: request.predictions.len(),
                completed_ids: request
                    .dataset
                    .iter()
                    .map(|record| record.instance_id.clone())
                    .collect(),
                resolved_ids: self.resolved.clone(),
                unresolved_ids: Vec::new(),
                error_ids: Vec::new(),
                instances,
            })
        }
    }

    fn record(instance_id: &str) -> TaskRecord {
        parse_datapoint(
            &serde_json::json!({
                "instance_id": instance_id,
                "repo": "org/repo",
                "base_commit": "abc",
                "problem_statement": "desc",
                "patch": "diff",
                "test_patch": "test diff",
                "environment_setup_commit": "def",
                "FAIL_TO_PASS": ["t1"],
                "PASS_TO_PASS": ["t2"],
            })
            .to_string(),
        )
        .expect("parse")
    }

    fn settings(temp: &std::path::Path) -> RunSettings {
        RunSettings {
            model_name: "candidate".to_string(),
            max_workers: 1,
            cache_level: CacheLevel::Env,
            clean: false,
            force_rebuild: false,
            open_file_limit: 1700,
            timeout: Duration::from_secs(30),
            instance_image_tag: "latest".to_string(),
            env_image_tag: "latest".to_string(),
            report_dir: temp.join("reports"),
            log_root: temp.join("logs"),
        }
    }

    #[test]
    fn snapshot_executor_cleanup_synthesis_run_in_order() {
        let temp = tempfile::tempdir().expect("tempdir");
        let recording = Recording::new();
        let runtime = FakeRuntime {
            recording: &recording,
            images: BTreeSet::new(),
        };
        let executor = FakeExecutor {
            recording: &recording,
        };
        let synthesizer = FakeSynthesizer {
            recording: &recording,
            resolved: vec!["task-a".to_string()],
        };
        let dataset = vec![record("task-a")];
        let predictions = package_predictions(&dataset, "candidate");

        let report = run_validation(
            &ValidationHooks {
                runtime: &runtime,
                executor: &executor,
                synthesizer: &synthesizer,
            },
            &dataset,
            &predictions,
            "run_test",
            &settings(temp.path()),
        )
        .expect("run");

        assert_eq!(report.resolved_count(), 1);
        // Two enumerations: the pre-run snapshot and the cleanup pass.
        assert_eq!(
            recording.events(),
            vec![
                "list_images".to_string(),
                "run_instances 1".to_string(),
                "list_images".to_string(),
                "synthesize_report".to_string(),
            ]
        );
    }

    #[test]
    fn empty_dataset_skips_executor_but_still_cleans_and_synthesizes() {
        let temp = tempfile::tempdir().expect("tempdir");
        let recording = Recording::new();
        let runtime = FakeRuntime {
            recording: &recording,
            images: BTreeSet::new(),
        };
        let executor = FakeExecutor {
            recording: &recording,
        };
        let synthesizer = FakeSynthesizer {
            recording: &recording,
            resolved: Vec::new(),
        };

        let report = run_validation(
            &ValidationHooks {
                runtime: &runtime,
                executor: &executor,
                synthesizer: &synthesizer,
            },
            &[],
            &BTreeMap::new(),
            "run_test",
            &settings(temp.path()),
        )
        .expect("run");

        assert_eq!(report.resolved_count(), 0);
        let events = recording.events();
        assert!(!events.iter().any(|event| event.starts_with("run_instances")));
        assert!(events.contains(&"synthesize_report".to_string()));
    }

    #[test]
    fn snapshot_images_survive_cleanup_without_clean() {
        let temp = tempfile::tempdir().expect("tempdir");
        let recording = Recording::new();
        let runtime = FakeRuntime {
            recording: &recording,
            images: ["patchval.eval.x86_64.task:latest".to_string()]
                .into_iter()
                .collect(),
        };
        let executor = FakeExecutor {
            recording: &recording,
        };
        let synthesizer = FakeSynthesizer {
            recording: &recording,
            resolved: Vec::new(),
        };
        let dataset = vec![record("task-a")];
        let predictions = package_predictions(&dataset, "candidate");

        run_validation(
            &ValidationHooks {
                runtime: &runtime,
                executor: &executor,
                synthesizer: &synthesizer,
            },
            &dataset,
            &predictions,
            "run_test",
            &settings(temp.path()),
        )
        .expect("run");

        assert!(!recording
            .events()
            .iter()
            .any(|event| event.starts_with("remove_image")));
    }

    #[test]
    fn report_directory_is_created() {
        let temp = tempfile::tempdir().expect("tempdir");
        let recording = Recording::new();
        let runtime = FakeRuntime {
            recording: &recording,
            images: BTreeSet::new(),
        };
        let executor = FakeExecutor {
            recording: &recording,
        };
        let synthesizer = FakeSynthesizer {
            recording: &recording,
            resolved: Vec::new(),
        };
        let settings = settings(temp.path());

        run_validation(
            &ValidationHooks {
                runtime: &runtime,
                executor: &executor,
                synthesizer: &synthesizer,
            },
            &[],
            &BTreeMap::new(),
            "run_test",
            &settings,
        )
        .expect("run");
        assert!(settings.report_dir.is_dir());
    }
}
