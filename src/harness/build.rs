//! Environment and instance image builds.
//!
//! Two tiers: a shared environment image per (repository, setup revision)
//! pair, named by digest so unrelated tasks converge on the same image, and a
//! per-task instance image layered on top of it. Builds stage a generated
//! dockerfile in a temporary context directory and hand it to the runtime.
use crate::cache::{ENV_IMAGE_PREFIX, INSTANCE_IMAGE_PREFIX};
use crate::datapoint::TaskRecord;
use crate::docker::DockerClient;
use anyhow::{Context, Result};
use sha2::Digest;
use std::path::Path;
use tracing::{debug, info};

const ENV_DIGEST_CHARS: usize = 12;

pub(super) fn env_image_name(record: &TaskRecord, tag: &str) -> String {
    let digest = sha256_hex(
        format!("{}\n{}", record.repo, record.environment_setup_commit).as_bytes(),
    );
    format!(
        "{ENV_IMAGE_PREFIX}{}.{}:{tag}",
        std::env::consts::ARCH,
        &digest[..ENV_DIGEST_CHARS]
    )
}

pub(super) fn instance_image_name(record: &TaskRecord, tag: &str) -> String {
    format!(
        "{INSTANCE_IMAGE_PREFIX}{}.{}:{tag}",
        std::env::consts::ARCH,
        record.instance_id.to_lowercase()
    )
}

/// Build (or reuse) the shared environment image for a task. Concurrent
/// workers may race on the same name; the runtime's own locking arbitrates,
/// and the orchestrator does not add locking of its own.
pub(super) fn ensure_env_image(
    client: &DockerClient,
    record: &TaskRecord,
    tag: &str,
    force_rebuild: bool,
    build_log: &Path,
) -> Result<String> {
    let image = env_image_name(record, tag);
    if !force_rebuild && client.image_exists(&image)? {
        debug!(image = %image, "reusing environment image");
        return Ok(image);
    }
    info!(image = %image, repo = %record.repo, "building environment image");
    build_from_dockerfile(client, &image, &env_dockerfile(record), build_log)?;
    Ok(image)
}

/// Build (or reuse) the per-task instance image on top of `env_image`.
pub(super) fn ensure_instance_image(
    client: &DockerClient,
    record: &TaskRecord,
    env_image: &str,
    tag: &str,
    force_rebuild: bool,
    build_log: &Path,
) -> Result<String> {
    let image = instance_image_name(record, tag);
    if !force_rebuild && client.image_exists(&image)? {
        debug!(image = %image, "reusing instance image");
        return Ok(image);
    }
    info!(image = %image, instance_id = %record.instance_id, "building instance image");
    build_from_dockerfile(client, &image, &instance_dockerfile(record, env_image), build_log)?;
    Ok(image)
}

fn build_from_dockerfile(
    client: &DockerClient,
    image: &str,
    dockerfile: &str,
    build_log: &Path,
) -> Result<()> {
    let context_dir = tempfile::tempdir().context("create build context")?;
    std::fs::write(context_dir.path().join("Dockerfile"), dockerfile)
        .context("write dockerfile")?;
    client
        .build_image(image, context_dir.path(), build_log)
        .with_context(|| format!("build image {image}"))
}

fn env_dockerfile(record: &TaskRecord) -> String {
    format!(
        "FROM python:3.11-bookworm\n\
         ENV DEBIAN_FRONTEND=noninteractive PIP_NO_INPUT=1\n\
         RUN apt-get update \\\n    \
             && apt-get install -y --no-install-recommends git build-essential \\\n    \
             && rm -rf /var/lib/apt/lists/*\n\
         RUN git clone https://github.com/{repo}.git /testbed\n\
         WORKDIR /testbed\n\
         RUN git checkout {commit}\n\
         RUN pip install --no-cache-dir -e . || pip install --no-cache-dir .\n",
        repo = record.repo,
        commit = record.environment_setup_commit,
    )
}

fn instance_dockerfile(record: &TaskRecord, env_image: &str) -> String {
    format!(
        "FROM {env_image}\n\
         WORKDIR /testbed\n\
         RUN git checkout {commit} || (git fetch origin && git checkout {commit})\n\
         RUN pip install --no-cache-dir -e . || pip install --no-cache-dir . || true\n",
        commit = record.base_commit,
    )
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = sha2::Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datapoint::parse_datapoint;

    fn record() -> TaskRecord {
        parse_datapoint(
            &serde_json::json!({
                "instance_id": "Astropy__astropy-11693",
                "repo": "astropy/astropy",
                "base_commit": "abc123",
                "problem_statement": "desc",
                "patch": "diff",
                "test_patch": "test diff",
                "environment_setup_commit": "def456",
                "FAIL_TO_PASS": ["t1"],
                "PASS_TO_PASS": ["t2"],
            })
            .to_string(),
        )
        .expect("parse")
    }

    #[test]
    fn env_image_names_are_stable_per_repo_and_setup_revision() {
        let record = record();
        let first = env_image_name(&record, "latest");
        let second = env_image_name(&record, "latest");
        assert_eq!(first, second);
        assert!(first.starts_with(ENV_IMAGE_PREFIX));
        assert!(first.ends_with(":latest"));
    }

    #[test]
    fn instance_image_names_are_lowercased_for_the_registry() {
        let name = instance_image_name(&record(), "latest");
        assert!(name.contains("astropy__astropy-11693"));
        assert_eq!(name, name.to_lowercase());
    }

    #[test]
    fn dockerfiles_pin_the_expected_revisions() {
        let record = record();
        assert!(env_dockerfile(&record).contains("git checkout def456"));
        let instance = instance_dockerfile(&record, "patchval.env.x.y:latest");
        assert!(instance.starts_with("FROM patchval.env.x.y:latest"));
        assert!(instance.contains("git checkout abc123"));
    }
}
