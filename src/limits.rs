//! Process-wide resource limits.
//!
//! Concurrent image builds and container runs hold many file descriptors at
//! once, so the default per-process ceiling is raised before any container
//! activity starts.
use anyhow::{anyhow, Result};

/// Whether this platform exposes a per-process open-file-descriptor ceiling.
pub fn supports_fd_limit() -> bool {
    cfg!(unix)
}

/// Raise the soft and hard open-file ceilings to `open_file_limit`.
///
/// Call exactly once, before the execution client is constructed and before
/// the executor's worker pool starts; the change is process-wide and lasts
/// for the process lifetime. Repeating the call with the same value is
/// harmless. On platforms without the control this is a successful no-op.
pub fn init_process_limits(open_file_limit: u64) -> Result<()> {
    if !supports_fd_limit() {
        return Ok(());
    }
    raise_open_file_limit(open_file_limit)
}

#[cfg(unix)]
fn raise_open_file_limit(limit: u64) -> Result<()> {
    let rlimit = libc::rlimit {
        rlim_cur: limit as libc::rlim_t,
        rlim_max: limit as libc::rlim_t,
    };
    let rc = unsafe { libc::setrlimit(libc::RLIMIT_NOFILE, &rlimit) };
    if rc != 0 {
        let err = std::io::Error::last_os_error();
        return Err(anyhow!("set open file limit to {limit}: {err}"));
    }
    tracing::debug!(limit, "raised open file limit");
    Ok(())
}

#[cfg(not(unix))]
fn raise_open_file_limit(_limit: u64) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capability_matches_platform() {
        assert_eq!(supports_fd_limit(), cfg!(unix));
    }

    #[cfg(unix)]
    #[test]
    fn raising_within_the_current_hard_limit_succeeds() {
        let mut current = libc::rlimit {
            rlim_cur: 0,
            rlim_max: 0,
        };
        let rc = unsafe { libc::getrlimit(libc::RLIMIT_NOFILE, &mut current) };
        assert_eq!(rc, 0);
        // Re-applying the existing hard limit needs no privilege.
        init_process_limits(current.rlim_max as u64).expect("raise");
    }
}
