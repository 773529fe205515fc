#![cfg(target_os = "linux")]
use std::net::TcpListener;

use crate::common::*;
use devhost::domain::Status;
use devhost::runner::ProjectRunner;
use devhost::orchestrator::ports::check_port;
use devhost::orchestrator::OrchestratorError;
use tempfile::TempDir;

#[tokio::test]
async fn occupied_port_blocks_start() {
    let dir = TempDir::new().unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let mut project = native_project("web", dir.path(), "sleep 30");
    project.port = Some(port);
    let config = parse_config("");
    let orch = orchestrator(&config, dir.path(), vec![project]);

    let err = orch.start("web").await.unwrap_err();
    match err {
        OrchestratorError::PortInUse(conflict) => {
            assert_eq!(conflict.port, port);
            assert_eq!(conflict.pid, std::process::id());
        }
        other => panic!("expected a port conflict, got {other}"),
    }
    assert!(!orch.native().is_running("web").await);
    assert_eq!(orch.store().get("web").unwrap().status, Status::Stopped);
    let logs = orch.store().logs("web", None).unwrap();
    assert!(logs.iter().any(|e| e.message.contains(&port.to_string())));

    drop(listener);
    assert_eq!(check_port(port), None);
}
