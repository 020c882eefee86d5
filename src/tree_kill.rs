//! Spawning into a killable process tree and terminating that tree.
//!
//! On Unix every launch becomes the leader of its own process group, so one signal
//! reaches the shell, the interpreter it starts, and any workers those fork. On
//! Windows the launch gets a new process group and `taskkill /T` walks the tree.

use std::path::Path;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, warn};

#[cfg(unix)]
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// How a tree termination ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminateOutcome {
    /// The graceful signal was delivered (or the tree was already gone).
    Graceful,
    /// Graceful termination failed or timed out and the tree was force-killed.
    Forced,
    /// Even the forceful kill could not be delivered.
    Failed(String),
}

/// Builds a command that runs `line` through a shell in a fresh process group.
///
/// `shell` overrides the platform default (`sh` on Unix, `cmd` on Windows).
pub fn shell_command(line: &str, shell: Option<&Path>) -> Command {
    #[cfg(unix)]
    {
        let mut command = Command::new(shell.unwrap_or(Path::new("sh")));
        command.arg("-c").arg(line);
        unsafe {
            command.pre_exec(|| {
                let _ = libc::setpgid(0, 0);
                Ok(())
            });
        }
        command
    }

    #[cfg(windows)]
    {
        use windows_sys::Win32::System::Threading::CREATE_NEW_PROCESS_GROUP;
        let mut command = Command::new(shell.unwrap_or(Path::new("cmd")));
        command.arg("/C").raw_arg(line);
        command.creation_flags(CREATE_NEW_PROCESS_GROUP);
        command
    }
}

/// Terminates the tree rooted at `pid`: graceful first, forceful on failure or after `timeout`.
pub async fn terminate_tree(pid: u32, timeout: Duration) -> TerminateOutcome {
    match graceful(pid, timeout).await {
        Ok(true) => TerminateOutcome::Graceful,
        Ok(false) => {
            debug!(pid, "tree still alive after graceful signal, forcing");
            force(pid).await
        }
        Err(err) => {
            warn!(pid, error = %err, "graceful termination failed, forcing");
            force(pid).await
        }
    }
}

async fn force(pid: u32) -> TerminateOutcome {
    match force_tree(pid).await {
        Ok(()) => TerminateOutcome::Forced,
        Err(err) => {
            warn!(pid, error = %err, "forceful termination failed");
            TerminateOutcome::Failed(err.to_string())
        }
    }
}

#[cfg(unix)]
async fn graceful(pid: u32, timeout: Duration) -> std::io::Result<bool> {
    match signal_tree(pid, libc::SIGTERM) {
        Ok(()) => {}
        Err(err) if err.raw_os_error() == Some(libc::ESRCH) => return Ok(true),
        Err(err) => return Err(err),
    }
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if !tree_alive(pid) {
            return Ok(true);
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
    Ok(!tree_alive(pid))
}

#[cfg(unix)]
async fn force_tree(pid: u32) -> std::io::Result<()> {
    match signal_tree(pid, libc::SIGKILL) {
        Err(err) if err.raw_os_error() != Some(libc::ESRCH) => Err(err),
        _ => Ok(()),
    }
}

/// Force-kills the tree rooted at `pid` without waiting for the outcome.
#[cfg(unix)]
pub fn kill_tree_now(pid: u32) {
    if let Err(err) = signal_tree(pid, libc::SIGKILL) {
        debug!(pid, error = %err, "kill on exit not delivered");
    }
}

// Signals the process group, then the leader itself in case it never got its own group.
#[cfg(unix)]
fn signal_tree(pid: u32, signal: libc::c_int) -> std::io::Result<()> {
    let pid = pid as libc::pid_t;
    let group = unsafe { libc::kill(-pid, signal) };
    let group_err = std::io::Error::last_os_error();
    let leader = unsafe { libc::kill(pid, signal) };
    if group == 0 || leader == 0 {
        Ok(())
    } else {
        Err(group_err)
    }
}

#[cfg(unix)]
fn tree_alive(pid: u32) -> bool {
    match signal_tree(pid, 0) {
        Ok(()) => true,
        Err(err) => err.raw_os_error() == Some(libc::EPERM),
    }
}

#[cfg(windows)]
async fn graceful(pid: u32, _timeout: Duration) -> std::io::Result<bool> {
    let status = Command::new("taskkill")
        .args(["/T", "/PID", &pid.to_string()])
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .await?;
    Ok(status.success())
}

#[cfg(windows)]
async fn force_tree(pid: u32) -> std::io::Result<()> {
    let status = Command::new("taskkill")
        .args(["/F", "/T", "/PID", &pid.to_string()])
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .await?;
    if status.success() {
        Ok(())
    } else {
        Err(std::io::Error::other(format!(
            "taskkill /F exited with {}",
            status.code().unwrap_or(-1)
        )))
    }
}

/// Force-kills the tree rooted at `pid` without waiting for the outcome.
#[cfg(windows)]
pub fn kill_tree_now(pid: u32) {
    let spawned = std::process::Command::new("taskkill")
        .args(["/F", "/T", "/PID", &pid.to_string()])
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .spawn();
    if let Err(err) = spawned {
        debug!(pid, error = %err, "kill on exit not delivered");
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::process::Stdio;

    #[tokio::test]
    async fn terminates_shell_and_its_children() {
        let mut child = shell_command("sleep 30 & sleep 30; wait", None)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .unwrap();
        let pid = child.id().unwrap();
        let waiter = tokio::spawn(async move { child.wait().await });
        tokio::time::sleep(Duration::from_millis(100)).await;

        // Orphaned zombies may linger without a reaping init, which shows up as Forced.
        let outcome = terminate_tree(pid, Duration::from_millis(500)).await;
        assert!(!matches!(outcome, TerminateOutcome::Failed(_)));
        let status = waiter.await.unwrap().unwrap();
        assert!(!status.success());
    }

    #[tokio::test]
    async fn escalates_when_sigterm_is_ignored() {
        let mut child = shell_command("trap '' TERM; while true; do sleep 0.05; done", None)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .unwrap();
        let pid = child.id().unwrap();
        let waiter = tokio::spawn(async move { child.wait().await });
        tokio::time::sleep(Duration::from_millis(100)).await;

        let outcome = terminate_tree(pid, Duration::from_millis(300)).await;
        assert_eq!(outcome, TerminateOutcome::Forced);
        waiter.await.unwrap().unwrap();
    }
}
