use anyhow::Result;
use std::path::Path;

use super::{describe, Session};

pub async fn run(config_file: Option<&Path>, project: &str) -> Result<()> {
    let session = Session::open(config_file)?;
    session
        .orchestrator
        .stop(project)
        .await
        .map_err(describe)?;
    println!("Stopped {project}.");
    Ok(())
}
