//! Pidfile handling for the background watcher

use std::fs::{self, File};
use std::io::{Read, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use anyhow::{anyhow, Context, Result};
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tracing::{error, info};

const PIDFILE_NAME: &str = "clipkeep.pid";

/// Get the path for the pidfile
pub fn get_pidfile_path() -> Result<PathBuf> {
    let uid = nix::unistd::getuid();

    // Try XDG_RUNTIME_DIR first (modern Linux)
    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        return Ok(PathBuf::from(runtime_dir).join(PIDFILE_NAME));
    }

    // Try /var/run/user/<uid>/ (systemd systems)
    let var_run_user = PathBuf::from(format!("/var/run/user/{}", uid));
    if var_run_user.exists() {
        return Ok(var_run_user.join(PIDFILE_NAME));
    }

    let home = dirs::home_dir().ok_or_else(|| anyhow!("Could not determine home directory"))?;
    Ok(home.join(".local").join("run").join(PIDFILE_NAME))
}

/// Write PID to pidfile
pub fn write_pidfile(pid: u32) -> Result<()> {
    write_pidfile_at(&get_pidfile_path()?, pid)
}

pub fn write_pidfile_at(path: &Path, pid: u32) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).context("Failed to create pidfile directory")?;
    }

    let mut file =
        File::create(path).with_context(|| format!("Failed to create pidfile: {:?}", path))?;
    write!(file, "{}", pid)?;

    // Owner read/write only
    let mut permissions = file.metadata()?.permissions();
    permissions.set_mode(0o600);
    fs::set_permissions(path, permissions)?;

    info!("Wrote PID {} to {:?}", pid, path);
    Ok(())
}

/// Read PID from pidfile
pub fn read_pidfile() -> Result<Option<u32>> {
    read_pidfile_at(&get_pidfile_path()?)
}

pub fn read_pidfile_at(path: &Path) -> Result<Option<u32>> {
    if !path.exists() {
        return Ok(None);
    }

    let mut contents = String::new();
    File::open(path)?.read_to_string(&mut contents)?;

    let pid = contents
        .trim()
        .parse::<u32>()
        .with_context(|| format!("Invalid PID in pidfile: {}", contents))?;
    Ok(Some(pid))
}

/// Remove pidfile
pub fn remove_pidfile() -> Result<()> {
    remove_pidfile_at(&get_pidfile_path()?)
}

pub fn remove_pidfile_at(path: &Path) -> Result<()> {
    if path.exists() {
        fs::remove_file(path).with_context(|| format!("Failed to remove pidfile: {:?}", path))?;
        info!("Removed pidfile: {:?}", path);
    }
    Ok(())
}

/// Check if a process with the given PID is running
pub fn is_process_running(pid: u32) -> bool {
    // Signal 0 only checks that the process exists
    signal::kill(Pid::from_raw(pid as i32), None).is_ok()
}

/// Check if the watcher is already running, clearing a stale pidfile
pub fn is_daemon_running() -> Result<bool> {
    match read_pidfile()? {
        Some(pid) if is_process_running(pid) => Ok(true),
        Some(pid) => {
            info!("Found stale pidfile for PID {}, removing", pid);
            remove_pidfile()?;
            Ok(false)
        }
        None => Ok(false),
    }
}

/// Start the watcher as a detached child process
///
/// The child runs `watch` in the foreground and writes its own pidfile.
pub fn spawn_background(config: Option<&Path>) -> Result<u32> {
    let exe = std::env::current_exe().context("Failed to locate the clipkeep executable")?;

    let mut command = Command::new(exe);
    if let Some(config) = config {
        command.arg("--config").arg(config);
    }
    let child = command
        .arg("watch")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .context("Failed to start background watcher")?;

    info!("Started background watcher with PID {}", child.id());
    Ok(child.id())
}

/// Stop the running watcher
pub fn stop_daemon() -> Result<()> {
    let Some(pid) = read_pidfile()? else {
        info!("Watcher is not running (no pidfile)");
        return Ok(());
    };

    if !is_process_running(pid) {
        info!("Watcher is not running (stale pidfile)");
        return remove_pidfile();
    }

    info!("Sending SIGTERM to watcher with PID {}", pid);
    signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM)?;

    for _ in 0..10 {
        std::thread::sleep(std::time::Duration::from_millis(100));
        if !is_process_running(pid) {
            info!("Watcher stopped successfully");
            return Ok(());
        }
    }

    error!("Watcher did not stop gracefully, sending SIGKILL");
    signal::kill(Pid::from_raw(pid as i32), Signal::SIGKILL)?;
    std::thread::sleep(std::time::Duration::from_millis(100));

    if is_process_running(pid) {
        return Err(anyhow!("Failed to stop watcher"));
    }
    remove_pidfile()?;
    info!("Watcher forcefully stopped");
    Ok(())
}

/// Resolve once SIGTERM or Ctrl-C arrives
pub async fn wait_for_shutdown() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    tokio::select! {
        _ = sigterm.recv() => info!("Received SIGTERM, shutting down gracefully"),
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for Ctrl-C")?;
            info!("Received Ctrl-C, shutting down");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_pidfile_lifecycle() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("run").join(PIDFILE_NAME);

        assert_eq!(read_pidfile_at(&path).unwrap(), None);

        write_pidfile_at(&path, 4242).unwrap();
        assert_eq!(read_pidfile_at(&path).unwrap(), Some(4242));
        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);

        remove_pidfile_at(&path).unwrap();
        assert!(!path.exists());
        remove_pidfile_at(&path).unwrap();
    }

    #[test]
    fn test_invalid_pidfile() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(PIDFILE_NAME);
        fs::write(&path, "not a pid").unwrap();
        assert!(read_pidfile_at(&path).is_err());
    }

    #[test]
    fn test_current_process_is_running() {
        assert!(is_process_running(std::process::id()));
    }
}
