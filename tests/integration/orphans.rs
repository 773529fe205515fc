#![cfg(unix)]
use std::os::unix::process::CommandExt;
use std::sync::Arc;
use std::time::Duration;

use crate::common::*;
use devhost::domain::Status;
use devhost::store::{JsonStore, ProjectRepository};
use tempfile::TempDir;

#[tokio::test]
async fn orphan_from_previous_session_is_killed() {
    let dir = TempDir::new().unwrap();
    let state = dir.path().join("state");
    let config = parse_config("");

    let mut orphan = std::process::Command::new("sleep")
        .arg("30")
        .process_group(0)
        .spawn()
        .unwrap();

    {
        let store = JsonStore::open(&state).unwrap();
        let mut project = native_project("web", dir.path(), "sleep 30");
        project.pid = orphan.id();
        project.status = Status::Running;
        store.save(&project).unwrap();
    }

    let store: Arc<dyn ProjectRepository> = Arc::new(JsonStore::open(&state).unwrap());
    let orch = orchestrator_with_store(&config, &state, store);
    let report = orch.reconcile_orphans().await.unwrap();
    assert_eq!(report.cleaned, vec!["web".to_string()]);

    let exited = wait_until(Duration::from_secs(5), || {
        matches!(orphan.try_wait(), Ok(Some(_)))
    })
    .await;
    assert!(exited, "orphan survived reconciliation");

    let reopened = JsonStore::open(&state).unwrap();
    let project = reopened.get("web").unwrap();
    assert_eq!(project.pid, 0);
    assert_eq!(project.status, Status::Stopped);
}

#[tokio::test]
async fn stale_pid_resets_without_error() {
    let dir = TempDir::new().unwrap();
    let config = parse_config("");
    let mut gone = std::process::Command::new("true").spawn().unwrap();
    let pid = gone.id();
    gone.wait().unwrap();

    let mut project = native_project("web", dir.path(), "sleep 30");
    project.pid = pid;
    project.status = Status::Running;
    let orch = orchestrator(&config, dir.path(), vec![project]);

    let report = orch.reconcile_orphans().await.unwrap();
    assert_eq!(report.cleaned, vec!["web".to_string()]);
    let stored = orch.store().get("web").unwrap();
    assert_eq!(stored.pid, 0);
    assert_eq!(stored.status, Status::Stopped);
}

#[tokio::test]
async fn stop_falls_back_to_stored_pid() {
    let dir = TempDir::new().unwrap();
    let config = parse_config("");
    let mut orphan = std::process::Command::new("sleep")
        .arg("30")
        .process_group(0)
        .spawn()
        .unwrap();

    let mut project = native_project("web", dir.path(), "sleep 30");
    project.pid = orphan.id();
    project.status = Status::Running;
    let orch = orchestrator(&config, dir.path(), vec![project]);

    orch.stop("web").await.unwrap();
    let exited = wait_until(Duration::from_secs(5), || {
        matches!(orphan.try_wait(), Ok(Some(_)))
    })
    .await;
    assert!(exited);
    let stored = orch.store().get("web").unwrap();
    assert_eq!(stored.pid, 0);
    assert_eq!(stored.status, Status::Stopped);
}
