use anyhow::Result;
use std::path::Path;

use super::{describe, Session};

pub async fn run(config_file: Option<&Path>) -> Result<()> {
    let session = Session::open(config_file)?;
    let report = session
        .orchestrator
        .reconcile_orphans()
        .await
        .map_err(describe)?;

    if report.cleaned.is_empty() {
        println!("Nothing to clean up.");
        return Ok(());
    }
    for (project, pid) in &report.killed {
        println!("  killed pid {pid} ({project})");
    }
    for (project, reason) in &report.failures {
        println!("  {project}: {reason}");
    }
    println!("Reset {} project(s).", report.cleaned.len());
    Ok(())
}
