//! Command layer for the validation workflow.
//!
//! Owns the strict ordering of one run: load and validate the task
//! description, package the prediction, generate and check the run
//! identifier, raise process limits, construct the execution client, hand off
//! to the run orchestration, and reduce its report to an exit status. Schema
//! and precondition failures abort here before any container activity, and
//! before resource limits are touched.
use crate::cli::{ReportArgs, RunArgs};
use crate::datapoint::load_datapoint;
use crate::docker::DockerClient;
use crate::errors::ValidationError;
use crate::harness::{
    ArtifactReportSynthesizer, DockerHarness, ReportRequest, ReportSynthesizer, RunReport,
};
use crate::limits;
use crate::paths::RunPaths;
use crate::predictions::package_predictions;
use crate::run_id::generate_run_id;
use crate::validation::{run_validation, RunSettings, ValidationHooks};
use crate::verdict::{resolve_verdict, Verdict};
use anyhow::Result;
use std::path::Path;
use std::time::Duration;

pub fn run_run(args: RunArgs) -> Result<u8> {
    let record = load_datapoint(&args.datapoint)?;
    if args.verbose {
        eprintln!("loaded task {} ({})", record.instance_id, record.repo);
    }
    let dataset = vec![record];
    let predictions = package_predictions(&dataset, &args.model_name);

    let settings = RunSettings {
        model_name: args.model_name,
        max_workers: args.max_workers,
        cache_level: args.cache_level,
        clean: args.clean,
        force_rebuild: args.force_rebuild,
        open_file_limit: args.open_file_limit,
        timeout: Duration::from_secs(args.timeout),
        instance_image_tag: args.instance_image_tag,
        env_image_tag: args.env_image_tag,
        report_dir: args.report_dir,
        log_root: args.log_root,
    };

    let run_id = generate_run_id()?;
    if run_id.is_empty() {
        return Err(
            ValidationError::Precondition("run identifier must be non-empty".to_string()).into(),
        );
    }

    // Limits next: the client handle and the worker pool both operate under
    // the raised ceiling.
    limits::init_process_limits(settings.open_file_limit)?;
    let client = DockerClient::connect()?;
    let harness = DockerHarness::new(client.clone(), args.prebuild_env, args.test_cmd.as_deref())?;

    let report = run_validation(
        &ValidationHooks {
            runtime: &client,
            executor: &harness,
            synthesizer: &harness,
        },
        &dataset,
        &predictions,
        &run_id,
        &settings,
    )?;
    if args.verbose {
        eprintln!(
            "run {} complete: {}/{} resolved",
            report.run_id,
            report.resolved_count(),
            report.total_instances
        );
    }

    let report_path = RunPaths::new(
        &settings.log_root,
        &settings.report_dir,
        &report.run_id,
        &settings.model_name,
    )
    .run_report();
    Ok(announce_verdict(&report, &report_path))
}

pub fn run_report(args: ReportArgs) -> Result<u8> {
    let record = load_datapoint(&args.datapoint)?;
    let dataset = vec![record];
    let predictions = package_predictions(&dataset, &args.model_name);
    let paths = RunPaths::new(
        &args.log_root,
        &args.report_dir,
        &args.run_id,
        &args.model_name,
    );
    if args.verbose {
        eprintln!(
            "re-synthesizing report for {} from {}",
            args.run_id,
            paths.run_root().display()
        );
    }
    let report = ArtifactReportSynthesizer.synthesize_report(&ReportRequest {
        dataset: &dataset,
        predictions: &predictions,
        paths: &paths,
    })?;
    Ok(announce_verdict(&report, &paths.run_report()))
}

fn announce_verdict(report: &RunReport, report_path: &Path) -> u8 {
    let verdict = resolve_verdict(report);
    match &verdict {
        Verdict::Success { resolved } => {
            println!("validation succeeded: {resolved} resolved instance(s)");
            println!("report: {}", report_path.display());
        }
        Verdict::Failure { log_path } => {
            println!("validation failed: no resolved instances");
            match log_path {
                Some(path) => println!("see {path}"),
                None => println!("report: {}", report_path.display()),
            }
        }
    }
    verdict.exit_code()
}
