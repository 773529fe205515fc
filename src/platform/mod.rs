use std::path::PathBuf;
use std::time::Duration;
use tokio::process::Command;

#[cfg(unix)]
mod unix;
#[cfg(windows)]
mod windows;

#[cfg(unix)]
use unix as imp;
#[cfg(windows)]
use windows as imp;

pub use imp::ProcessGroupHandle;

/// Create a platform-appropriate shell command.
/// Unix: `$SHELL -l -c <command>`, Windows: `cmd.exe /C <command>`
pub fn shell_command(command: &str) -> Command {
    imp::shell_command(command)
}

/// Configure the command to run in a new process group.
/// Unix: `process_group(0)`, Windows: `CREATE_NEW_PROCESS_GROUP`
pub fn configure_process_group(cmd: &mut Command) {
    imp::configure_process_group(cmd)
}

/// Perform any post-spawn setup (e.g., Job Object on Windows).
/// Returns a handle that must be kept alive for the process lifetime.
pub fn post_spawn_setup(child_pid: Option<u32>) -> Option<ProcessGroupHandle> {
    imp::post_spawn_setup(child_pid)
}

/// Gracefully terminate a child process and its descendants: polite signal
/// first, forced kill once `grace` elapses. Returns `true` when the forced
/// kill was needed.
pub async fn terminate_child(
    child: &mut tokio::process::Child,
    child_pid: Option<u32>,
    group_handle: Option<&ProcessGroupHandle>,
    grace: Duration,
) -> bool {
    imp::terminate_child(child, child_pid, group_handle, grace).await
}

/// Forcefully kill a process we hold no handle for (an orphan from a previous
/// session, or whatever sits on a port).
pub fn kill_pid(pid: u32) -> anyhow::Result<()> {
    if pid == 0 {
        anyhow::bail!("refusing to kill pid 0");
    }
    imp::kill_pid(pid)
}

/// Check if a process with the given PID is still alive.
pub fn is_process_alive(pid: u32) -> bool {
    imp::is_process_alive(pid)
}

/// Find the process listening on a TCP port: its pid and command line.
pub fn port_owner(port: u16) -> Option<(u32, String)> {
    imp::port_owner(port)
}

/// Get the current user's home directory.
pub fn home_dir() -> Option<PathBuf> {
    dirs::home_dir()
}

/// Expand leading `~` or `$HOME` in a path string to the actual home directory.
///
/// Returns the original string unchanged when no home directory is available
/// or the string doesn't start with `~` or `$HOME`.
pub fn expand_home(path: &str) -> String {
    if let Some(home) = std::env::var_os("HOME").or_else(|| std::env::var_os("USERPROFILE")) {
        let home = home.to_string_lossy();
        if path == "~" || path == "$HOME" {
            return home.to_string();
        }
        if let Some(rest) = path.strip_prefix('~') {
            if rest.starts_with('/') || rest.starts_with('\\') {
                return format!("{}{}", home, rest);
            }
        }
        if path.starts_with("$HOME/") || path.starts_with("$HOME\\") {
            return format!("{}{}", home, &path[5..]);
        }
    }
    path.to_string()
}

/// Shell name for log messages.
pub fn shell_name() -> String {
    imp::shell_name()
}
