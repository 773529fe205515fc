use std::collections::BTreeMap;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncReadExt;

use crate::platform;

/// How long to keep reading a command's pipes after it exited. Start
/// commands that background a daemon leave the pipes open in the daemon.
const PIPE_LINGER: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub success: bool,
    pub code: Option<i32>,
    /// stdout followed by stderr, trimmed.
    pub output: String,
}

impl CommandOutput {
    /// Exit description plus output, for error messages.
    pub fn describe(&self) -> String {
        let exit = match self.code {
            Some(code) => format!("exit code {code}"),
            None => "terminated by signal".to_string(),
        };
        if self.output.is_empty() {
            exit
        } else {
            format!("{exit}: {}", self.output)
        }
    }
}

/// Run `command` through the user's shell with extra environment, capturing
/// combined output. `kill_on_drop` is for commands run under a timeout.
pub async fn run_shell(
    command: &str,
    env: &BTreeMap<String, String>,
    kill_on_drop: bool,
) -> std::io::Result<CommandOutput> {
    let mut cmd = platform::shell_command(command);
    cmd.envs(env);
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    cmd.kill_on_drop(kill_on_drop);

    let mut child = cmd.spawn()?;
    let mut stdout = child.stdout.take();
    let mut stderr = child.stderr.take();

    let out_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(out) = stdout.as_mut() {
            let _ = out.read_to_end(&mut buf).await;
        }
        buf
    });
    let err_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(err) = stderr.as_mut() {
            let _ = err.read_to_end(&mut buf).await;
        }
        buf
    });

    let status = child.wait().await?;

    let mut combined = Vec::new();
    if let Ok(Ok(out)) = tokio::time::timeout(PIPE_LINGER, out_task).await {
        combined.extend(out);
    }
    if let Ok(Ok(err)) = tokio::time::timeout(PIPE_LINGER, err_task).await {
        combined.extend(err);
    }

    Ok(CommandOutput {
        success: status.success(),
        code: status.code(),
        output: String::from_utf8_lossy(&combined).trim().to_string(),
    })
}
