//! The shipped instance executor.
//!
//! Drains the task queue with a bounded pool of worker threads. Every task is
//! attempted independently: a build or run failure is recorded in that task's
//! log and the queue keeps draining. A task that exceeds the per-task timeout
//! is recorded as timed out for that task only; siblings are unaffected.
//! Containers are removed as each task finishes, but images never are: all
//! image eviction belongs to the post-run cleanup pass, which holds the
//! pre-run snapshot.
use super::build;
use super::grade::{grade_instance, parse_test_statuses};
use super::{ExecutionRequest, InstanceReport};
use crate::datapoint::TaskRecord;
use crate::docker::{DockerClient, ExecOutput};
use crate::util::truncate_string;
use anyhow::{Context, Result};
use std::collections::{BTreeMap, VecDeque};
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{error, info, warn};

const BUILD_LOG_FILE: &str = "build.log";
const TEST_PATCH_FILE: &str = "test_patch.diff";
const ENV_BUILD_LOG_FILE: &str = "env_build.log";
const CONTAINER_WORKDIR: &str = "/testbed";
const CONTAINER_PATCH_PATH: &str = "/tmp/patch.diff";
const CONTAINER_TEST_PATCH_PATH: &str = "/tmp/test_patch.diff";
const APPLY_TIMEOUT: Duration = Duration::from_secs(120);
const LOG_SNIPPET_BYTES: usize = 4096;

struct InstanceRunContext<'a> {
    client: &'a DockerClient,
    test_argv: &'a [String],
    request: &'a ExecutionRequest<'a>,
    record: &'a TaskRecord,
    model_name: &'a str,
    container: &'a str,
}

pub(super) fn run_instances(
    client: &DockerClient,
    test_argv: &[String],
    prebuild_env: bool,
    request: &ExecutionRequest<'_>,
) -> Result<()> {
    std::fs::create_dir_all(request.paths.run_root()).with_context(|| {
        format!(
            "create run directory {}",
            request.paths.run_root().display()
        )
    })?;

    if prebuild_env {
        prebuild_environment_images(client, request);
    }

    info!(
        instances = request.dataset.len(),
        max_workers = request.max_workers,
        cache_level = ?request.cache_level,
        clean = request.clean,
        force_rebuild = request.force_rebuild,
        "executing instances"
    );
    drain_queue(request.dataset, request.max_workers, |record| {
        if let Err(err) = run_one_instance(client, test_argv, request, record) {
            error!(
                instance_id = %record.instance_id,
                "task execution failed: {err:#}"
            );
            append_log_line(
                &request.paths.instance_log(&record.instance_id),
                &format!("error: {err:#}"),
            );
        }
    });
    Ok(())
}

/// Run `task_fn` over every record with at most `max_workers` worker threads.
/// With a bound of one, executions are strictly serialized.
pub(super) fn drain_queue<'a>(
    dataset: &'a [TaskRecord],
    max_workers: usize,
    task_fn: impl Fn(&'a TaskRecord) + Sync,
) {
    let workers = max_workers.clamp(1, dataset.len().max(1));
    let queue: Mutex<VecDeque<&TaskRecord>> = Mutex::new(dataset.iter().collect());

    std::thread::scope(|scope| {
        for _ in 0..workers {
            scope.spawn(|| loop {
                let record = {
                    let mut queue = match queue.lock() {
                        Ok(queue) => queue,
                        Err(poisoned) => poisoned.into_inner(),
                    };
                    queue.pop_front()
                };
                let Some(record) = record else {
                    break;
                };
                task_fn(record);
            });
        }
    });
}

// Best-effort: environment images shared by several tasks get built once up
// front instead of on first use. Failures fall through to the on-demand path,
// where they are recorded per task.
fn prebuild_environment_images(client: &DockerClient, request: &ExecutionRequest<'_>) {
    let build_log = request.paths.run_root().join(ENV_BUILD_LOG_FILE);
    let mut by_image: BTreeMap<String, &TaskRecord> = BTreeMap::new();
    for record in request.dataset {
        by_image
            .entry(build::env_image_name(record, request.env_image_tag))
            .or_insert(record);
    }
    info!(count = by_image.len(), "prebuilding environment images");
    for (image, record) in by_image {
        if let Err(err) = build::ensure_env_image(
            client,
            record,
            request.env_image_tag,
            request.force_rebuild,
            &build_log,
        ) {
            warn!(image = %image, "environment prebuild failed: {err:#}");
        }
    }
}

fn run_one_instance(
    client: &DockerClient,
    test_argv: &[String],
    request: &ExecutionRequest<'_>,
    record: &TaskRecord,
) -> Result<()> {
    let Some(prediction) = request.predictions.get(&record.instance_id) else {
        info!(
            instance_id = %record.instance_id,
            "no prediction for task; skipping"
        );
        return Ok(());
    };

    let paths = request.paths;
    let instance_dir = paths.instance_dir(&record.instance_id);
    std::fs::create_dir_all(&instance_dir)
        .with_context(|| format!("create instance directory {}", instance_dir.display()))?;
    let mut log = InstanceLog::create(&paths.instance_log(&record.instance_id))?;
    log.line(&format!(
        "instance {} (run {})",
        record.instance_id,
        paths.run_id()
    ));

    let patch_path = paths.applied_patch(&record.instance_id);
    std::fs::write(&patch_path, &prediction.patch).context("write candidate patch")?;
    let test_patch_path = instance_dir.join(TEST_PATCH_FILE);
    std::fs::write(&test_patch_path, &record.test_patch).context("write test patch")?;

    let build_log = instance_dir.join(BUILD_LOG_FILE);
    let env_image = build::ensure_env_image(
        client,
        record,
        request.env_image_tag,
        request.force_rebuild,
        &build_log,
    )?;
    let instance_image = build::ensure_instance_image(
        client,
        record,
        &env_image,
        request.instance_image_tag,
        request.force_rebuild,
        &build_log,
    )?;

    let container = container_name(record, paths.run_id());
    client.run_detached(&container, &instance_image)?;
    log.line(&format!(
        "started container {container} from {instance_image}"
    ));

    let context = InstanceRunContext {
        client,
        test_argv,
        request,
        record,
        model_name: prediction.model_name.as_str(),
        container: &container,
    };
    let graded = execute_in_container(&context, &patch_path, &test_patch_path, &mut log);

    if let Err(err) = client.remove_container(&container) {
        warn!(container = %container, "failed to remove container: {err:#}");
    }

    let report = graded?;
    let report_path = paths.instance_report(&record.instance_id);
    let json = serde_json::to_string_pretty(&report).context("serialize instance report")?;
    std::fs::write(&report_path, json)
        .with_context(|| format!("write instance report {}", report_path.display()))?;
    log.line(&format!(
        "graded: resolved={} (report {})",
        report.resolved,
        report_path.display()
    ));
    Ok(())
}

fn execute_in_container(
    context: &InstanceRunContext<'_>,
    patch_path: &Path,
    test_patch_path: &Path,
    log: &mut InstanceLog,
) -> Result<InstanceReport> {
    let client = context.client;
    let record = context.record;
    client.copy_into(context.container, test_patch_path, CONTAINER_TEST_PATCH_PATH)?;
    client.copy_into(context.container, patch_path, CONTAINER_PATCH_PATH)?;

    for (label, container_path) in [
        ("test patch", CONTAINER_TEST_PATCH_PATH),
        ("candidate patch", CONTAINER_PATCH_PATH),
    ] {
        let apply = client.exec(
            context.container,
            CONTAINER_WORKDIR,
            &git_apply_argv(container_path),
            APPLY_TIMEOUT,
        )?;
        if !exec_succeeded(&apply) {
            log.line(&format!(
                "{label} failed to apply: {}",
                truncate_string(apply.stderr.trim(), LOG_SNIPPET_BYTES)
            ));
            let statuses = BTreeMap::new();
            return Ok(grade_instance(
                record,
                context.model_name,
                &statuses,
                false,
                false,
            ));
        }
        log.line(&format!("{label} applied"));
    }

    let mut argv = context.test_argv.to_vec();
    argv.extend(record.fail_to_pass.iter().cloned());
    argv.extend(record.pass_to_pass.iter().cloned());
    log.line(&format!("running tests: {}", shell_words::join(&argv)));

    let output = client.exec(
        context.container,
        CONTAINER_WORKDIR,
        &argv,
        context.request.timeout,
    )?;
    if output.timed_out {
        log.line(&format!(
            "test run exceeded timeout of {}s",
            context.request.timeout.as_secs()
        ));
    }

    let combined = combine_output(&output);
    let test_output_path = context.request.paths.test_output(&record.instance_id);
    std::fs::write(&test_output_path, &combined)
        .with_context(|| format!("write test output {}", test_output_path.display()))?;

    let statuses = parse_test_statuses(&combined)?;
    Ok(grade_instance(
        record,
        context.model_name,
        &statuses,
        true,
        output.timed_out,
    ))
}

fn git_apply_argv(container_path: &str) -> Vec<String> {
    ["git", "apply", "-v", container_path]
        .iter()
        .map(|arg| (*arg).to_string())
        .collect()
}

fn exec_succeeded(output: &ExecOutput) -> bool {
    !output.timed_out && output.exit_code == Some(0)
}

fn combine_output(output: &ExecOutput) -> String {
    if output.stderr.is_empty() {
        output.stdout.clone()
    } else {
        format!("{}\n{}", output.stdout, output.stderr)
    }
}

fn container_name(record: &TaskRecord, run_id: &str) -> String {
    format!("patchval.{}.{run_id}", record.instance_id.to_lowercase())
}

fn append_log_line(path: &Path, message: &str) {
    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    if let Ok(mut file) = File::options().create(true).append(true).open(path) {
        let _ = writeln!(file, "{message}");
    }
}

struct InstanceLog {
    file: File,
}

impl InstanceLog {
    fn create(path: &Path) -> Result<Self> {
        let file = File::options()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("open instance log {}", path.display()))?;
        Ok(Self { file })
    }

    // Log writes are best effort; losing a line must not fail the task.
    fn line(&mut self, message: &str) {
        let _ = writeln!(self.file, "{message}");
    }
}
