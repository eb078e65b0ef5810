//! Background process control
//!
//! The daemon records its PID and version under the runtime directory. The
//! CLI uses those files to control and inspect it.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

use eyre::{Context, Result, eyre};
use serde::Serialize;
use tracing::{debug, info, warn};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// How long `stop --force` waits after SIGTERM before sending SIGKILL
const FORCE_TIMEOUT: Duration = Duration::from_secs(30);
const STOP_POLL: Duration = Duration::from_millis(100);
/// Interval between "still waiting" log lines during a graceful stop
const STOP_NOTICE: Duration = Duration::from_secs(10);

/// Directory holding the PID and version files
fn runtime_dir() -> PathBuf {
    dirs::runtime_dir()
        .or_else(dirs::data_local_dir)
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("vigilant")
}

#[derive(Debug)]
pub struct DaemonManager {
    pid_file: PathBuf,
    version_file: PathBuf,
}

impl Default for DaemonManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of the daemon for `vg daemon status`
#[derive(Debug, Serialize)]
pub struct DaemonStatus {
    pub running: bool,
    pub pid: Option<i32>,
    pub version: Option<String>,
    pub version_matches: bool,
    pub pid_file: PathBuf,
}

impl DaemonManager {
    pub fn new() -> Self {
        Self::with_pid_file(runtime_dir().join("vigilant.pid"))
    }

    /// Manager rooted at a custom PID file; the version file sits next to it
    pub fn with_pid_file(pid_file: PathBuf) -> Self {
        debug!(?pid_file, "DaemonManager::with_pid_file: called");
        let version_file = pid_file.with_extension("version");
        Self { pid_file, version_file }
    }

    pub fn pid_file(&self) -> &Path {
        &self.pid_file
    }

    /// PID of the live daemon, if the PID file names a running process
    ///
    /// Anything but a positive PID is ignored: 0 and negative values would
    /// address a process group rather than one process.
    pub fn running_pid(&self) -> Option<i32> {
        let pid = parse_pid(&read_trimmed(&self.pid_file)?)?;
        let alive = is_process_running(pid);
        debug!(pid, alive, "DaemonManager::running_pid: checked");
        alive.then_some(pid)
    }

    pub fn is_running(&self) -> bool {
        self.running_pid().is_some()
    }

    pub fn read_version(&self) -> Option<String> {
        read_trimmed(&self.version_file)
    }

    pub fn version_matches(&self) -> bool {
        self.read_version().is_some_and(|v| v == VERSION)
    }

    /// Spawn a detached `vg run-daemon` and record its PID
    ///
    /// `args` are passed through ahead of the subcommand, e.g. `--config`.
    pub fn start(&self, args: &[String]) -> Result<i32> {
        debug!(?args, "DaemonManager::start: called");
        if let Some(pid) = self.running_pid() {
            return Err(eyre!("Daemon already running with PID {}", pid));
        }

        let exe = std::env::current_exe().context("Failed to get current executable")?;
        let child = Command::new(&exe)
            .args(args)
            .arg("run-daemon")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .context("Failed to spawn daemon process")?;

        let pid = i32::try_from(child.id()).context("Daemon PID out of range")?;
        write_file(&self.pid_file, &pid.to_string()).context("Failed to write PID file")?;
        info!(pid, ?exe, "Daemon started");
        Ok(pid)
    }

    /// SIGTERM the daemon and wait for it to exit
    ///
    /// A cycle in progress runs to completion first, so this waits as long
    /// as that takes. With `force`, the daemon is SIGKILLed if it is still
    /// running after [`FORCE_TIMEOUT`].
    pub fn stop(&self, force: bool) -> Result<()> {
        let pid = self.running_pid().ok_or_else(|| eyre!("Daemon is not running"))?;
        info!(pid, force, "Stopping daemon");
        send_signal(pid, Signal::Terminate)?;

        let mut waited = Duration::ZERO;
        while is_process_running(pid) && !(force && waited >= FORCE_TIMEOUT) {
            std::thread::sleep(STOP_POLL);
            waited += STOP_POLL;
            if waited.as_millis() % STOP_NOTICE.as_millis() == 0 {
                info!(pid, ?waited, "Waiting for the running cycle to finish");
            }
        }
        debug!(pid, ?waited, "DaemonManager::stop: wait finished");

        if is_process_running(pid) {
            warn!(pid, "Daemon did not stop within the force timeout, sending SIGKILL");
            if let Err(e) = send_signal(pid, Signal::Kill) {
                warn!(pid, error = %e, "SIGKILL failed, daemon may have exited");
            }
        }

        self.unregister()?;
        info!(pid, "Daemon stopped");
        Ok(())
    }

    /// Ask the running daemon for an immediate cycle (SIGUSR1)
    pub fn trigger(&self) -> Result<i32> {
        let pid = self.running_pid().ok_or_else(|| eyre!("Daemon is not running"))?;
        send_signal(pid, Signal::Trigger)?;
        info!(pid, "Sent trigger to daemon");
        Ok(pid)
    }

    /// Record the current process as the daemon
    pub fn register_self(&self) -> Result<()> {
        let pid = std::process::id();
        write_file(&self.pid_file, &pid.to_string()).context("Failed to write PID file")?;
        write_file(&self.version_file, VERSION).context("Failed to write version file")?;
        info!(pid, version = VERSION, "Daemon registered");
        Ok(())
    }

    /// Remove the PID and version files
    pub fn unregister(&self) -> Result<()> {
        for path in [&self.pid_file, &self.version_file] {
            if path.exists() {
                fs::remove_file(path).with_context(|| format!("Failed to remove {}", path.display()))?;
                debug!(?path, "DaemonManager::unregister: removed");
            }
        }
        Ok(())
    }

    pub fn status(&self) -> DaemonStatus {
        let pid = self.running_pid();
        DaemonStatus {
            running: pid.is_some(),
            pid,
            version: self.read_version(),
            version_matches: self.version_matches(),
            pid_file: self.pid_file.clone(),
        }
    }
}

/// A PID that names exactly one process
fn parse_pid(s: &str) -> Option<i32> {
    s.parse::<i32>().ok().filter(|pid| *pid > 0)
}

fn read_trimmed(path: &Path) -> Option<String> {
    let contents = fs::read_to_string(path).ok()?;
    Some(contents.trim().to_string())
}

fn write_file(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, contents)?;
    debug!(?path, "write_file: wrote");
    Ok(())
}

#[derive(Debug, Clone, Copy)]
enum Signal {
    Terminate,
    Kill,
    Trigger,
}

#[cfg(unix)]
fn send_signal(pid: i32, kind: Signal) -> Result<()> {
    use nix::sys::signal::{self, kill};
    use nix::unistd::Pid;

    let sig = match kind {
        Signal::Terminate => signal::Signal::SIGTERM,
        Signal::Kill => signal::Signal::SIGKILL,
        Signal::Trigger => signal::Signal::SIGUSR1,
    };
    debug!(pid, ?sig, "send_signal: called");
    kill(Pid::from_raw(pid), sig).with_context(|| format!("Failed to send {:?} to {}", sig, pid))
}

#[cfg(not(unix))]
fn send_signal(pid: i32, kind: Signal) -> Result<()> {
    match kind {
        Signal::Terminate | Signal::Kill => {
            Command::new("taskkill")
                .args(["/PID", &pid.to_string(), "/F"])
                .output()
                .context("Failed to kill process")?;
            Ok(())
        }
        Signal::Trigger => Err(eyre!("Triggering a running daemon requires a unix platform")),
    }
}

#[cfg(unix)]
fn is_process_running(pid: i32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;
    // Signal 0 probes for existence only
    kill(Pid::from_raw(pid), None).is_ok()
}

#[cfg(not(unix))]
fn is_process_running(pid: i32) -> bool {
    Command::new("tasklist")
        .args(["/FI", &format!("PID eq {}", pid), "/NH"])
        .output()
        .map(|o| !o.stdout.is_empty() && !String::from_utf8_lossy(&o.stdout).contains("No tasks"))
        .unwrap_or(false)
}
