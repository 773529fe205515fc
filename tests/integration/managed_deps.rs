#![cfg(unix)]
use std::time::Duration;

use crate::common::*;
use devhost::domain::Status;
use devhost::runner::ProjectRunner;
use devhost::orchestrator::OrchestratorError;
use tempfile::TempDir;

fn deps_config(dir: &TempDir, health: bool) -> String {
    let installs = dir.path().join("installs.log");
    let starts = dir.path().join("starts.log");
    let stops = dir.path().join("stops.log");
    let mut config = format!(
        r#"
[managed_dependencies.cache]
probe_command = "false"
install_command = "echo installed >> {installs}"
start_command = "echo started >> {starts}"
stop_command = "echo stopped >> {stops}"
"#,
        installs = installs.display(),
        starts = starts.display(),
        stops = stops.display(),
    );
    if health {
        config.push_str(
            r#"
[managed_dependencies.cache.health_check]
command = "false"
interval = "100ms"
timeout = "2s"
"#,
        );
    }
    config
}

fn with_cache(project: devhost::domain::Project) -> devhost::domain::Project {
    let mut project = project;
    project
        .dependencies
        .push(devhost::domain::Dependency::new("cache", "", true));
    project
}

#[tokio::test]
async fn shared_dependency_is_installed_once() {
    let dir = TempDir::new().unwrap();
    let config = parse_config(&deps_config(&dir, false));
    let orch = orchestrator(
        &config,
        dir.path(),
        vec![
            with_cache(native_project("a", dir.path(), "sleep 30")),
            with_cache(native_project("b", dir.path(), "sleep 30")),
        ],
    );

    orch.start("a").await.unwrap();
    orch.start("b").await.unwrap();
    assert_eq!(count_lines(&dir.path().join("installs.log")), 1);
    assert_eq!(count_lines(&dir.path().join("starts.log")), 1);

    orch.shutdown().await;
}

#[tokio::test]
async fn release_is_reference_counted() {
    let dir = TempDir::new().unwrap();
    let config = parse_config(&deps_config(&dir, false));
    let orch = orchestrator(
        &config,
        dir.path(),
        vec![
            with_cache(native_project("a", dir.path(), "sleep 30")),
            with_cache(native_project("b", dir.path(), "sleep 30")),
        ],
    );

    orch.start("a").await.unwrap();
    orch.start("b").await.unwrap();

    orch.stop("a").await.unwrap();
    assert!(orch.dependencies().is_running("cache").await);
    assert_eq!(count_lines(&dir.path().join("stops.log")), 0);

    orch.stop("b").await.unwrap();
    assert!(!orch.dependencies().is_running("cache").await);
    assert_eq!(count_lines(&dir.path().join("stops.log")), 1);
}

#[tokio::test]
async fn no_health_probe_after_release() {
    let dir = TempDir::new().unwrap();
    let config = parse_config(&deps_config(&dir, true));
    let orch = orchestrator(
        &config,
        dir.path(),
        vec![with_cache(native_project("a", dir.path(), "sleep 30"))],
    );

    orch.start("a").await.unwrap();
    assert!(orch.dependencies().health_check_active("cache").await);

    orch.stop("a").await.unwrap();
    assert!(!orch.dependencies().health_check_active("cache").await);

    let after_release = orch.dependencies().health_failures("cache").await;
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(orch.dependencies().health_failures("cache").await, after_release);
}

#[tokio::test]
async fn stop_after_crash_releases_dependencies() {
    let dir = TempDir::new().unwrap();
    let config = parse_config(&deps_config(&dir, true));
    let orch = orchestrator(
        &config,
        dir.path(),
        vec![with_cache(native_project("a", dir.path(), "exit 1"))],
    );

    orch.start("a").await.unwrap();
    assert!(
        wait_until(Duration::from_secs(5), || {
            let p = orch.store().get("a").unwrap();
            p.status == Status::Error && p.pid == 0
        })
        .await
    );
    assert!(orch.dependencies().is_running("cache").await);
    let before = orch.store().get("a").unwrap();

    let err = orch.stop("a").await.unwrap_err();
    assert!(matches!(err, OrchestratorError::NotRunning(_)), "{err}");
    assert!(!orch.dependencies().is_running("cache").await);
    assert!(!orch.dependencies().health_check_active("cache").await);
    assert_eq!(count_lines(&dir.path().join("stops.log")), 1);
    assert_eq!(orch.store().get("a").unwrap(), before);
}

#[tokio::test]
async fn stop_after_crash_keeps_dependency_shared_with_running_project() {
    let dir = TempDir::new().unwrap();
    let config = parse_config(&deps_config(&dir, false));
    let orch = orchestrator(
        &config,
        dir.path(),
        vec![
            with_cache(native_project("a", dir.path(), "exit 1")),
            with_cache(native_project("b", dir.path(), "sleep 30")),
        ],
    );

    orch.start("b").await.unwrap();
    orch.start("a").await.unwrap();
    assert!(
        wait_until(Duration::from_secs(5), || {
            orch.store().get("a").unwrap().status == Status::Error
        })
        .await
    );

    assert!(orch.stop("a").await.is_err());
    assert!(orch.dependencies().is_running("cache").await);
    assert_eq!(count_lines(&dir.path().join("stops.log")), 0);

    orch.stop("b").await.unwrap();
    assert_eq!(count_lines(&dir.path().join("stops.log")), 1);
}

#[tokio::test]
async fn failed_install_aborts_start() {
    let dir = TempDir::new().unwrap();
    let config = parse_config(
        r#"
[managed_dependencies.cache]
probe_command = "false"
install_command = "echo no-such-package >&2; exit 1"
start_command = "true"
"#,
    );
    let orch = orchestrator(
        &config,
        dir.path(),
        vec![with_cache(native_project("a", dir.path(), "sleep 30"))],
    );

    let err = orch.start("a").await.unwrap_err();
    assert!(err.to_string().contains("no-such-package"), "{err}");
    assert!(!orch.native().is_running("a").await);
    assert!(!orch.dependencies().is_running("cache").await);
    let logs = orch.store().logs("a", None).unwrap();
    assert!(logs
        .iter()
        .any(|e| e.message.contains("failed to start managed dependencies")));
}
