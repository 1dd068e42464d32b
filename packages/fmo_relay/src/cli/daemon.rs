use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// How long `stop` waits for the daemon to exit after SIGTERM.
const STOP_TIMEOUT: Duration = Duration::from_secs(10);
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    #[error("relay is not running")]
    NotRunning,

    #[error("relay is already running (PID {0})")]
    AlreadyRunning(u32),

    #[error("relay (PID {0}) did not exit within {timeout}s", timeout = STOP_TIMEOUT.as_secs())]
    StopTimeout(u32),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Check if a relay is already running by reading the PID file and verifying the process.
///
/// A PID file pointing at a dead process is removed.
pub fn check_daemon(pid_path: &Path) -> Option<u32> {
    let pid_str = std::fs::read_to_string(pid_path).ok()?;
    let pid: u32 = pid_str.trim().parse().ok()?;

    if !process_alive(pid) {
        let _ = std::fs::remove_file(pid_path);
        return None;
    }

    Some(pid)
}

fn process_alive(pid: u32) -> bool {
    // kill with signal 0 = check existence
    #[cfg(unix)]
    {
        use nix::sys::signal;
        use nix::unistd::Pid;
        signal::kill(Pid::from_raw(pid as i32), None).is_ok()
    }
    #[cfg(not(unix))]
    {
        let _ = pid;
        true
    }
}

/// Start a detached relay process and return its PID.
///
/// The child re-runs this executable with `start --detached`, which makes it
/// write the PID file itself and skip forking again.
pub fn start_daemon(config_path: &Path, pid_path: &Path) -> Result<u32, DaemonError> {
    if let Some(pid) = check_daemon(pid_path) {
        return Err(DaemonError::AlreadyRunning(pid));
    }

    let exe = std::env::current_exe().context("Failed to determine current executable")?;

    let mut cmd = std::process::Command::new(&exe);
    cmd.arg("--config")
        .arg(absolute(config_path))
        .arg("start")
        .arg("--detached")
        .arg("--pid-file")
        .arg(absolute(pid_path))
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null());

    // On Unix, create a new session so the relay doesn't die with the terminal
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        unsafe {
            cmd.pre_exec(|| {
                nix::libc::setsid();
                Ok(())
            });
        }
    }

    let child = cmd.spawn().context("Failed to spawn relay process")?;
    Ok(child.id())
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Send SIGTERM to the running relay and wait for it to exit.
pub async fn stop_daemon(pid_path: &Path) -> Result<u32, DaemonError> {
    let pid = check_daemon(pid_path).ok_or(DaemonError::NotRunning)?;

    #[cfg(unix)]
    {
        use nix::sys::signal::{self, Signal};
        use nix::unistd::Pid;
        signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM)
            .with_context(|| format!("Failed to signal PID {pid}"))?;
    }

    let start = std::time::Instant::now();
    while process_alive(pid) {
        if start.elapsed() > STOP_TIMEOUT {
            return Err(DaemonError::StopTimeout(pid));
        }
        tokio::time::sleep(STOP_POLL_INTERVAL).await;
    }

    // The relay removes its own PID file on a clean exit.
    cleanup_pid_file(pid_path);
    Ok(pid)
}

/// Write the PID file, creating its directory if needed.
pub fn write_pid_file(pid_path: &Path, pid: u32) -> Result<()> {
    if let Some(dir) = pid_path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }
    std::fs::write(pid_path, pid.to_string())
        .with_context(|| format!("Failed to write PID file {}", pid_path.display()))?;
    Ok(())
}

pub fn cleanup_pid_file(pid_path: &Path) {
    let _ = std::fs::remove_file(pid_path);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pid_path() -> (PathBuf, tempfile::TempDir) {
        let tmp = tempfile::tempdir().unwrap();
        (tmp.path().join("run/fmo_relay.pid"), tmp)
    }

    /// PID of a process that has already exited and been reaped.
    fn dead_pid() -> u32 {
        let mut child = std::process::Command::new("true").spawn().unwrap();
        let pid = child.id();
        child.wait().unwrap();
        pid
    }

    // -- DaemonError display --

    #[test]
    fn error_display() {
        assert_eq!(DaemonError::NotRunning.to_string(), "relay is not running");
        assert_eq!(
            DaemonError::AlreadyRunning(42).to_string(),
            "relay is already running (PID 42)"
        );
        assert_eq!(
            DaemonError::StopTimeout(42).to_string(),
            "relay (PID 42) did not exit within 10s"
        );
    }

    #[test]
    fn other_display_is_transparent() {
        let err: DaemonError = anyhow::anyhow!("boom").into();
        assert!(matches!(err, DaemonError::Other(_)));
        assert_eq!(err.to_string(), "boom");
    }

    // -- PID file handling --

    #[test]
    fn write_creates_parent_directory() {
        let (path, _tmp) = pid_path();
        write_pid_file(&path, 1234).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "1234");
    }

    #[test]
    fn check_returns_none_without_file() {
        let (path, _tmp) = pid_path();
        assert_eq!(check_daemon(&path), None);
    }

    #[test]
    fn check_finds_live_process() {
        let (path, _tmp) = pid_path();
        let pid = std::process::id();
        write_pid_file(&path, pid).unwrap();
        assert_eq!(check_daemon(&path), Some(pid));
        assert!(path.exists());
    }

    #[test]
    fn check_ignores_garbage() {
        let (path, _tmp) = pid_path();
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "not a pid").unwrap();
        assert_eq!(check_daemon(&path), None);
    }

    #[cfg(unix)]
    #[test]
    fn check_removes_stale_file() {
        let (path, _tmp) = pid_path();
        write_pid_file(&path, dead_pid()).unwrap();
        assert_eq!(check_daemon(&path), None);
        assert!(!path.exists(), "stale PID file should be removed");
    }

    #[test]
    fn cleanup_is_idempotent() {
        let (path, _tmp) = pid_path();
        write_pid_file(&path, 1).unwrap();
        cleanup_pid_file(&path);
        cleanup_pid_file(&path);
        assert!(!path.exists());
    }

    // -- start / stop --

    #[test]
    fn start_refuses_when_already_running() {
        let (path, _tmp) = pid_path();
        let pid = std::process::id();
        write_pid_file(&path, pid).unwrap();

        let err = start_daemon(Path::new("config.toml"), &path).unwrap_err();
        assert!(matches!(err, DaemonError::AlreadyRunning(p) if p == pid));
    }

    #[tokio::test]
    async fn stop_without_daemon_is_not_running() {
        let (path, _tmp) = pid_path();
        assert!(matches!(
            stop_daemon(&path).await,
            Err(DaemonError::NotRunning)
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn stop_terminates_process() {
        let (path, _tmp) = pid_path();
        let mut child = std::process::Command::new("sleep").arg("30").spawn().unwrap();
        write_pid_file(&path, child.id()).unwrap();

        // Reap in the background so the child doesn't linger as a zombie.
        let reaper = std::thread::spawn(move || child.wait());

        let pid = stop_daemon(&path).await.unwrap();
        assert!(pid > 0);
        assert!(!path.exists());
        reaper.join().unwrap().unwrap();
    }
}
