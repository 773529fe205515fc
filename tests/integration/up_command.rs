#![cfg(all(unix, feature = "integration"))]
use std::time::Duration;

use crate::common::*;
use tokio::process::Command;

#[tokio::test]
async fn up_runs_until_interrupted() {
    let port = free_port();
    let env = TestEnv::new(&format!(
        r#"
[proxy]
enabled = false

[[projects]]
name = "web"
path = "{dir}"
type = "python"
port = {port}
auto_start = true
scripts = {{ dev = "python3 -m http.server $PORT" }}
"#,
        dir = std::env::temp_dir().display(),
    ));

    let mut child = Command::new(env!("CARGO_BIN_EXE_devhost"))
        .env_remove("DEVHOST_CONFIG")
        .args(["-f", env.config_path.to_str().unwrap(), "up"])
        .kill_on_drop(true)
        .spawn()
        .expect("failed to start devhost");

    assert!(
        wait_for_port(port, Duration::from_secs(15)).await,
        "project did not become reachable on port {port}"
    );

    let pid = child.id().unwrap();
    nix::sys::signal::kill(
        nix::unistd::Pid::from_raw(pid as i32),
        nix::sys::signal::Signal::SIGINT,
    )
    .ok();

    let status = tokio::time::timeout(Duration::from_secs(20), child.wait())
        .await
        .expect("devhost did not exit in time")
        .expect("failed to wait on devhost");
    assert!(status.success());

    assert!(
        wait_for_port_release(port, Duration::from_secs(5)).await,
        "port {port} was not released after shutdown"
    );
}
