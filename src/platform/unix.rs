use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

use nix::errno::Errno;
use nix::sys::signal::{kill, killpg, Signal};
use nix::unistd::Pid;

/// No-op handle on Unix. Process group cleanup uses killpg with the child PID.
pub struct ProcessGroupHandle;

/// Return the user's default shell from `$SHELL`, falling back to `sh`.
fn user_shell() -> String {
    std::env::var("SHELL").unwrap_or_else(|_| "sh".to_string())
}

/// Human-readable description of the shell for log messages.
pub fn shell_name() -> String {
    let shell = user_shell();
    format!("{} -lc", shell)
}

pub fn shell_command(command: &str) -> Command {
    let shell = user_shell();
    let mut cmd = Command::new(&shell);
    // Login shell (-l) sources the user's profile/rc files so that
    // PATH and other environment customisations are available.
    cmd.arg("-l").arg("-c").arg(command);
    cmd
}

pub fn configure_process_group(cmd: &mut Command) {
    cmd.process_group(0);
}

pub fn post_spawn_setup(_child_pid: Option<u32>) -> Option<ProcessGroupHandle> {
    // On Unix, process group is configured before spawn via process_group(0).
    None
}

pub async fn terminate_child(
    child: &mut tokio::process::Child,
    child_pid: Option<u32>,
    _group_handle: Option<&ProcessGroupHandle>,
    grace: Duration,
) -> bool {
    let Some(pid) = child_pid else {
        let _ = child.kill().await;
        return true;
    };

    let pgid = Pid::from_raw(pid as i32);
    match killpg(pgid, Signal::SIGTERM) {
        Ok(()) => {
            debug!(pid, "sent SIGTERM to process group");
        }
        Err(Errno::ESRCH) => {
            debug!(pid, "process group already exited");
            let _ = child.wait().await;
            return false;
        }
        Err(e) => {
            warn!(pid, error = %e, "killpg(SIGTERM) failed, falling back to kill");
            let _ = child.kill().await;
            return true;
        }
    }

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(Ok(_status)) => {
            debug!(pid, "child exited after SIGTERM");
            // Reap any stragglers left in the group.
            let _ = killpg(pgid, Signal::SIGKILL);
            false
        }
        _ => {
            warn!(pid, grace_ms = grace.as_millis() as u64, "child did not exit in time, sending SIGKILL");
            let _ = killpg(pgid, Signal::SIGKILL);
            let _ = child.kill().await;
            let _ = child.wait().await;
            true
        }
    }
}

pub fn kill_pid(pid: u32) -> anyhow::Result<()> {
    let target = Pid::from_raw(pid as i32);
    // Processes we spawned lead their own group; take the whole tree down
    // when that is still the case.
    if killpg(target, Signal::SIGKILL).is_ok() {
        debug!(pid, "killed process group");
        return Ok(());
    }
    match kill(target, Signal::SIGKILL) {
        Ok(()) => Ok(()),
        Err(Errno::ESRCH) => anyhow::bail!("no such process {}", pid),
        Err(e) => anyhow::bail!("failed to kill process {}: {}", pid, e),
    }
}

pub fn is_process_alive(pid: u32) -> bool {
    kill(Pid::from_raw(pid as i32), None).is_ok()
}

#[cfg(target_os = "linux")]
pub fn port_owner(port: u16) -> Option<(u32, String)> {
    use std::collections::HashSet;

    const TCP_LISTEN: &str = "0A";
    let port_hex = format!("{:04X}", port);

    let mut inodes: HashSet<String> = HashSet::new();
    for table in ["/proc/net/tcp", "/proc/net/tcp6"] {
        let Ok(content) = std::fs::read_to_string(table) else {
            continue;
        };
        for line in content.lines().skip(1) {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 10 || fields[3] != TCP_LISTEN {
                continue;
            }
            let local_port = fields[1].rsplit(':').next();
            if local_port == Some(port_hex.as_str()) && fields[9] != "0" {
                inodes.insert(format!("socket:[{}]", fields[9]));
            }
        }
    }

    if inodes.is_empty() {
        return None;
    }

    let proc_dir = std::fs::read_dir("/proc").ok()?;
    for entry in proc_dir.flatten() {
        let pid_str = entry.file_name().to_string_lossy().to_string();
        let Ok(pid) = pid_str.parse::<u32>() else {
            continue;
        };
        let Ok(fds) = std::fs::read_dir(format!("/proc/{}/fd", pid)) else {
            continue;
        };
        for fd_entry in fds.flatten() {
            if let Ok(link) = std::fs::read_link(fd_entry.path()) {
                if inodes.contains(link.to_string_lossy().as_ref()) {
                    return Some((pid, process_command_line(pid)));
                }
            }
        }
    }

    None
}

#[cfg(target_os = "linux")]
fn process_command_line(pid: u32) -> String {
    let cmdline = std::fs::read_to_string(format!("/proc/{}/cmdline", pid))
        .map(|c| c.replace('\0', " ").trim().to_string())
        .unwrap_or_default();
    if !cmdline.is_empty() {
        return cmdline;
    }
    std::fs::read_to_string(format!("/proc/{}/comm", pid))
        .map(|c| c.trim().to_string())
        .unwrap_or_default()
}

#[cfg(not(target_os = "linux"))]
pub fn port_owner(port: u16) -> Option<(u32, String)> {
    // `lsof` exits non-zero when nothing listens; that is the common case.
    let output = std::process::Command::new("lsof")
        .args(["-nP", "-t", &format!("-iTCP:{}", port), "-sTCP:LISTEN"])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let pid: u32 = String::from_utf8_lossy(&output.stdout)
        .lines()
        .next()?
        .trim()
        .parse()
        .ok()?;

    let command = std::process::Command::new("ps")
        .args(["-p", &pid.to_string(), "-o", "command="])
        .output()
        .ok()
        .map(|o| String::from_utf8_lossy(&o.stdout).trim().to_string())
        .unwrap_or_default();
    Some((pid, command))
}
