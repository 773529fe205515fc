//! Live service-manager probes for well-known managed dependencies.

use std::time::Duration;

use tokio::process::Command;

const LOCALSTACK_HEALTH_URL: &str = "http://localhost:4566/_localstack/health";

/// Ask the host whether a well-known service is up. `None` means "no
/// authoritative answer": the name is not well known, or the service
/// manager could not be queried.
pub async fn probe_service(name: &str) -> Option<bool> {
    match name {
        "localstack" => Some(localstack_healthy().await),
        "postgres" | "redis" | "mongodb" => service_manager_reports_started(name).await,
        _ => None,
    }
}

async fn localstack_healthy() -> bool {
    let Ok(client) = reqwest::Client::builder()
        .timeout(Duration::from_secs(2))
        .build()
    else {
        return false;
    };
    match client.get(LOCALSTACK_HEALTH_URL).send().await {
        Ok(resp) => resp.status().is_success(),
        Err(_) => false,
    }
}

#[cfg(target_os = "macos")]
async fn service_manager_reports_started(name: &str) -> Option<bool> {
    let formula = match name {
        "postgres" => "postgresql@16",
        "redis" => "redis",
        "mongodb" => "mongodb-community",
        _ => return None,
    };
    let output = Command::new("brew")
        .args(["services", "list"])
        .output()
        .await
        .ok()?;
    if !output.status.success() {
        return None;
    }
    Some(brew_lists_started(&String::from_utf8_lossy(&output.stdout), formula))
}

#[cfg(not(target_os = "macos"))]
async fn service_manager_reports_started(name: &str) -> Option<bool> {
    let unit = match name {
        "postgres" => "postgresql",
        "redis" => "redis-server",
        "mongodb" => "mongod",
        _ => return None,
    };
    let output = Command::new("systemctl")
        .args(["is-active", unit])
        .output()
        .await
        .ok()?;
    // is-active prints the state even when it exits non-zero.
    let state = String::from_utf8_lossy(&output.stdout).trim().to_string();
    match state.as_str() {
        "active" => Some(true),
        "inactive" | "failed" | "activating" | "deactivating" => Some(false),
        _ => None,
    }
}

#[cfg_attr(not(target_os = "macos"), allow(dead_code))]
fn brew_lists_started(listing: &str, formula: &str) -> bool {
    listing
        .lines()
        .any(|line| line.split_whitespace().next() == Some(formula) && line.contains("started"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn brew_listing_parsing() {
        let listing = "\
Name              Status  User File
postgresql@16     started dev  ~/Library/LaunchAgents/homebrew.mxcl.postgresql@16.plist
redis             none
mongodb-community error   dev  ~/Library/LaunchAgents/homebrew.mxcl.mongodb-community.plist
";
        assert!(brew_lists_started(listing, "postgresql@16"));
        assert!(!brew_lists_started(listing, "redis"));
        assert!(!brew_lists_started(listing, "mongodb-community"));
        assert!(!brew_lists_started(listing, "memcached"));
    }

    #[tokio::test]
    async fn unknown_service_has_no_answer() {
        assert_eq!(probe_service("my-custom-thing").await, None);
    }
}
