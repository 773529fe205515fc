use assert_cmd::Command;
use predicates::prelude::*;

use crate::common::*;

fn devhost(env: &TestEnv) -> Command {
    let mut cmd = Command::cargo_bin("devhost").unwrap();
    cmd.env_remove("DEVHOST_CONFIG")
        .arg("-f")
        .arg(&env.config_path);
    cmd
}

#[test]
fn ps_without_projects() {
    let env = TestEnv::new("");
    devhost(&env)
        .arg("ps")
        .assert()
        .success()
        .stdout(predicate::str::contains("No projects registered"));
    assert!(env.state_dir().join("logs").is_dir());
}

#[test]
fn config_file_from_environment() {
    let env = TestEnv::new("");
    Command::cargo_bin("devhost")
        .unwrap()
        .env("DEVHOST_CONFIG", &env.config_path)
        .arg("ps")
        .assert()
        .success();
    assert!(env.state_dir().is_dir());
}

#[test]
fn missing_config_file_fails() {
    Command::cargo_bin("devhost")
        .unwrap()
        .env_remove("DEVHOST_CONFIG")
        .args(["-f", "/definitely/not/here.toml", "ps"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Config file not found"));
}

#[test]
fn logs_of_unknown_project_fails() {
    let env = TestEnv::new("");
    devhost(&env)
        .args(["logs", "ghost"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("project 'ghost' not found"));
}

#[test]
fn reconcile_with_empty_store() {
    let env = TestEnv::new("");
    devhost(&env)
        .arg("reconcile")
        .assert()
        .success()
        .stdout(predicate::str::contains("Nothing to clean up"));
}

#[test]
fn deps_lists_configured_dependencies() {
    let env = TestEnv::new(
        r#"
[managed_dependencies.cache]
start_command = "true"
"#,
    );
    devhost(&env)
        .arg("deps")
        .assert()
        .success()
        .stdout(predicate::str::contains("cache"));
}
