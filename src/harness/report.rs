//! Run report synthesis from persisted per-task artifacts.
use super::{
    InstanceOutcome, InstanceReport, InstanceStatus, ReportRequest, RunReport,
    RUN_REPORT_SCHEMA_VERSION,
};
use crate::errors::ValidationError;
use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::warn;

/// Fold every task's persisted grading record into one run report and write
/// it under the report directory. Tasks without a readable per-task report
/// are carried as errors; a run namespace with no artifacts at all is a
/// [`ValidationError::ReportAbsence`].
pub(super) fn synthesize_report(request: &ReportRequest<'_>) -> Result<RunReport> {
    let paths = request.paths;
    let run_root = paths.run_root();

    if !request.dataset.is_empty() && !run_root.is_dir() {
        return Err(ValidationError::ReportAbsence {
            run_id: paths.run_id().to_string(),
            searched: run_root,
        }
        .into());
    }

    let mut report = RunReport {
        schema_version: RUN_REPORT_SCHEMA_VERSION,
        generated_at_epoch_ms: crate::util::now_epoch_ms()?,
        run_id: paths.run_id().to_string(),
        model_name: paths.model_name().to_string(),
        total_instances: request.dataset.len(),
        submitted_instances: request.predictions.len(),
        completed_ids: Vec::new(),
        resolved_ids: Vec::new(),
        unresolved_ids: Vec::new(),
        error_ids: Vec::new(),
        instances: BTreeMap::new(),
    };

    let mut any_artifacts = false;
    for record in request.dataset {
        let instance_id = &record.instance_id;
        let instance_dir = paths.instance_dir(instance_id);
        if instance_dir.is_dir() {
            any_artifacts = true;
        }

        let status = match load_instance_report(&paths.instance_report(instance_id)) {
            Ok(Some(instance_report)) => {
                report.completed_ids.push(instance_id.clone());
                if instance_report.resolved {
                    report.resolved_ids.push(instance_id.clone());
                    InstanceStatus::Resolved
                } else {
                    report.unresolved_ids.push(instance_id.clone());
                    InstanceStatus::Unresolved
                }
            }
            Ok(None) => {
                report.error_ids.push(instance_id.clone());
                InstanceStatus::Error
            }
            Err(err) => {
                warn!(
                    instance_id = %instance_id,
                    "unreadable instance report, counting as error: {err:#}"
                );
                report.error_ids.push(instance_id.clone());
                InstanceStatus::Error
            }
        };

        report.instances.insert(
            instance_id.clone(),
            InstanceOutcome {
                instance_id: instance_id.clone(),
                status,
                log_dir: instance_dir.display().to_string(),
                log_path: paths.instance_log(instance_id).display().to_string(),
            },
        );
    }

    if !request.dataset.is_empty() && !any_artifacts {
        return Err(ValidationError::ReportAbsence {
            run_id: paths.run_id().to_string(),
            searched: run_root,
        }
        .into());
    }

    std::fs::create_dir_all(paths.report_dir()).with_context(|| {
        format!("create report directory {}", paths.report_dir().display())
    })?;
    let report_path = paths.run_report();
    let json = serde_json::to_string_pretty(&report).context("serialize run report")?;
    std::fs::write(&report_path, json)
        .with_context(|| format!("write run report {}", report_path.display()))?;

    Ok(report)
}

fn load_instance_report(path: &Path) -> Result<Option<InstanceReport>> {
    if !path.is_file() {
        return Ok(None);
    }
    let bytes =
        std::fs::read(path).with_context(|| format!("read instance report {}", path.display()))?;
    let report = serde_json::from_slice(&bytes)
        .with_context(|| format!("parse instance report {}", path.display()))?;
    Ok(Some(report))
}
