//! Execution client for the local container runtime.
//!
//! The handle wraps the `docker` CLI resolved from PATH. It holds no daemon
//! connection: every operation is an independent subprocess, so the handle is
//! cheap to clone and safe to share across worker threads. Image reuse under
//! concurrent builds is coordinated by the runtime's own locking.
use crate::util::truncate_string;
use anyhow::{anyhow, Context, Result};
use std::collections::BTreeSet;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

const ERROR_SNIPPET_BYTES: usize = 2048;
const EXEC_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// The narrow runtime surface the orchestrator itself consumes: the
/// existing-images snapshot and post-run eviction. The shipped harness uses
/// the concrete [`DockerClient`] underneath the same handle.
pub trait ContainerRuntime {
    fn list_images(&self) -> Result<BTreeSet<String>>;
    fn remove_image(&self, image: &str) -> Result<()>;
}

/// Handle to the local docker CLI.
#[derive(Clone, Debug)]
pub struct DockerClient {
    program: PathBuf,
}

/// Outcome of one in-container command execution.
#[derive(Debug)]
pub struct ExecOutput {
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    pub stdout: String,
    pub stderr: String,
}

impl DockerClient {
    /// Resolve the docker binary. Performs no daemon I/O.
    pub fn connect() -> Result<Self> {
        let program = which::which("docker")
            .context("resolve docker binary (is docker installed and on PATH?)")?;
        Ok(Self { program })
    }

    fn command(&self) -> Command {
        Command::new(&self.program)
    }

    pub fn image_exists(&self, image: &str) -> Result<bool> {
        let output = self
            .command()
            .args(["image", "inspect", image])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .context("spawn docker image inspect")?;
        Ok(output.success())
    }

    /// Build `context_dir` into `tag`, appending build output to `build_log`.
    pub fn build_image(&self, tag: &str, context_dir: &Path, build_log: &Path) -> Result<()> {
        let log = File::options()
            .create(true)
            .append(true)
            .open(build_log)
            .with_context(|| format!("open build log {}", build_log.display()))?;
        let log_err = log.try_clone().context("clone build log handle")?;
        let status = self
            .command()
            .args(["build", "-t", tag])
            .arg(context_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_err))
            .status()
            .context("spawn docker build")?;
        if !status.success() {
            return Err(anyhow!(
                "docker build of {tag} failed (status {status}); see {}",
                build_log.display()
            ));
        }
        Ok(())
    }

    /// Start a long-lived idle container from `image`.
    pub fn run_detached(&self, name: &str, image: &str) -> Result<()> {
        self.run_checked(
            &["run", "-d", "--name", name, image, "tail", "-f", "/dev/null"],
            "run container",
        )
        .map(|_| ())
    }

    pub fn copy_into(&self, name: &str, source: &Path, dest: &str) -> Result<()> {
        let source = source
            .to_str()
            .ok_or_else(|| anyhow!("copy source path is not valid UTF-8"))?;
        self.run_checked(&["cp", source, &format!("{name}:{dest}")], "copy into container")
            .map(|_| ())
    }

    /// Execute `argv` inside a running container, killing the client process
    /// once `timeout` elapses. A kill only detaches the client; the caller is
    /// expected to remove the container afterwards, which reaps whatever was
    /// still running inside it.
    pub fn exec(
        &self,
        name: &str,
        workdir: &str,
        argv: &[String],
        timeout: Duration,
    ) -> Result<ExecOutput> {
        let mut stdout_file = tempfile::tempfile().context("create exec stdout spool")?;
        let mut stderr_file = tempfile::tempfile().context("create exec stderr spool")?;

        let mut cmd = self.command();
        cmd.args(["exec", "-w", workdir, name]);
        cmd.args(argv);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::from(
            stdout_file.try_clone().context("clone stdout spool")?,
        ));
        cmd.stderr(Stdio::from(
            stderr_file.try_clone().context("clone stderr spool")?,
        ));

        let mut child = cmd.spawn().context("spawn docker exec")?;
        let started = Instant::now();
        let mut exit_status = None;
        loop {
            if let Some(status) = child.try_wait().context("poll docker exec")? {
                exit_status = Some(status);
                break;
            }
            if started.elapsed() >= timeout {
                break;
            }
            std::thread::sleep(EXEC_POLL_INTERVAL);
        }
        let timed_out = exit_status.is_none();
        if timed_out {
            let _ = child.kill();
            let _ = child.wait();
        }

        Ok(ExecOutput {
            exit_code: exit_status.and_then(|status| status.code()),
            timed_out,
            stdout: read_spool(&mut stdout_file).context("read exec stdout")?,
            stderr: read_spool(&mut stderr_file).context("read exec stderr")?,
        })
    }

    /// Force-remove a container. Missing containers are not an error.
    pub fn remove_container(&self, name: &str) -> Result<()> {
        let output = self
            .command()
            .args(["rm", "-f", name])
            .output()
            .context("spawn docker rm")?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.contains("No such container") {
            return Ok(());
        }
        Err(anyhow!(
            "docker rm of {name} failed: {}",
            truncate_string(stderr.trim(), ERROR_SNIPPET_BYTES)
        ))
    }

    fn run_checked(&self, args: &[&str], action: &str) -> Result<String> {
        let output = self
            .command()
            .args(args)
            .output()
            .with_context(|| format!("spawn docker {action}"))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!(
                "docker {action} failed (status {}): {}",
                output.status,
                truncate_string(stderr.trim(), ERROR_SNIPPET_BYTES)
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

impl ContainerRuntime for DockerClient {
    /// Enumerate images currently present, as `repository:tag` names.
    fn list_images(&self) -> Result<BTreeSet<String>> {
        let stdout = self.run_checked(
            &["images", "--format", "{{.Repository}}:{{.Tag}}"],
            "list images",
        )?;
        Ok(stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.contains("<none>"))
            .map(str::to_string)
            .collect())
    }

    fn remove_image(&self, image: &str) -> Result<()> {
        self.run_checked(&["rmi", "-f", image], "remove image")
            .map(|_| ())
    }
}

fn read_spool(file: &mut File) -> Result<String> {
    file.seek(SeekFrom::Start(0)).context("rewind spool")?;
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes).context("read spool")?;
    Ok(String::from_utf8_lossy(&bytes).to_string())
}
