#![cfg(unix)]
use crate::common::*;
use devhost::domain::Status;
use devhost::orchestrator::OrchestratorError;
use devhost::runner::ProjectRunner;
use tempfile::TempDir;

#[tokio::test]
async fn second_start_is_rejected_without_spawning() {
    let dir = TempDir::new().unwrap();
    let config = parse_config("");
    let orch = orchestrator(
        &config,
        dir.path(),
        vec![native_project("web", dir.path(), "sleep 30")],
    );

    orch.start("web").await.unwrap();
    let first = orch.native().pid_of("web").await.unwrap();

    let err = orch.start("web").await.unwrap_err();
    assert!(matches!(err, OrchestratorError::AlreadyRunning(_)), "{err}");
    assert_eq!(orch.native().pid_of("web").await, Some(first));
    assert_eq!(orch.native().running_projects().await, vec!["web".to_string()]);

    orch.shutdown().await;
}

#[tokio::test]
async fn stop_of_untracked_project_mutates_nothing() {
    let dir = TempDir::new().unwrap();
    let config = parse_config("");
    let orch = orchestrator(
        &config,
        dir.path(),
        vec![native_project("web", dir.path(), "sleep 30")],
    );
    let before = orch.store().get("web").unwrap();

    let err = orch.stop("web").await.unwrap_err();
    assert!(matches!(err, OrchestratorError::NotRunning(_)), "{err}");
    assert_eq!(orch.store().get("web").unwrap(), before);
    assert!(orch.proxy().routes().is_empty());
    assert!(!orch.proxy().routes_path().exists());
}

#[tokio::test]
async fn start_stop_start_uses_a_new_process() {
    let dir = TempDir::new().unwrap();
    let config = parse_config("");
    let orch = orchestrator(
        &config,
        dir.path(),
        vec![native_project("web", dir.path(), "sleep 30")],
    );

    orch.start("web").await.unwrap();
    let first = orch.store().get("web").unwrap().pid;
    assert!(first > 0);

    orch.stop("web").await.unwrap();
    let stopped = orch.store().get("web").unwrap();
    assert_eq!(stopped.status, Status::Stopped);
    assert_eq!(stopped.pid, 0);

    orch.start("web").await.unwrap();
    let second = orch.store().get("web").unwrap();
    assert_eq!(second.status, Status::Running);
    assert_ne!(second.pid, first);
    assert_eq!(orch.native().pid_of("web").await, Some(second.pid));

    orch.shutdown().await;
}

#[tokio::test]
async fn restart_replaces_the_process() {
    let dir = TempDir::new().unwrap();
    let config = parse_config("");
    let orch = orchestrator(
        &config,
        dir.path(),
        vec![native_project("web", dir.path(), "sleep 30")],
    );

    orch.start("web").await.unwrap();
    let first = orch.native().pid_of("web").await.unwrap();
    orch.restart("web").await.unwrap();
    let second = orch.native().pid_of("web").await.unwrap();
    assert_ne!(first, second);

    orch.shutdown().await;
}

#[tokio::test]
async fn output_reaches_buffer_and_store() {
    let dir = TempDir::new().unwrap();
    let config = parse_config("");
    let orch = orchestrator(
        &config,
        dir.path(),
        vec![native_project("web", dir.path(), "echo ready-marker; sleep 30")],
    );

    orch.start("web").await.unwrap();
    let seen = wait_until(std::time::Duration::from_secs(10), || {
        orch.native()
            .buffer()
            .entries("web", None)
            .iter()
            .any(|e| e.message.contains("ready-marker"))
    })
    .await;
    assert!(seen);
    let live = orch.get_logs("web", None).await.unwrap();
    assert!(live.iter().any(|e| e.message.contains("ready-marker")));

    orch.stop("web").await.unwrap();
    let stored = orch.get_logs("web", None).await.unwrap();
    assert!(stored.iter().any(|e| e.message.contains("ready-marker")));
    assert!(orch.native().logs("web", None).await.len() >= live.len());
}

#[tokio::test]
async fn spawn_failure_marks_error() {
    let dir = TempDir::new().unwrap();
    let config = parse_config("");
    let missing = dir.path().join("does-not-exist");
    let orch = orchestrator(
        &config,
        dir.path(),
        vec![native_project("web", &missing, "sleep 30")],
    );
    // Give the project a manifest-free dev script but a missing directory.
    let err = orch.start("web").await.unwrap_err();
    assert!(matches!(err, OrchestratorError::Process(_)), "{err}");

    let stored = orch.store().get("web").unwrap();
    assert_eq!(stored.status, Status::Error);
    assert!(stored.last_error.is_some());
    let logs = orch.store().logs("web", None).unwrap();
    assert!(logs.iter().any(|e| e.message.contains("failed to start")));
}
