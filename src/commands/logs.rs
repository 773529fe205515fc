use anyhow::Result;
use std::path::Path;

use crate::ui::logs::print_entries;

use super::{describe, Session};

pub async fn run(config_file: Option<&Path>, project: &str, tail: Option<usize>) -> Result<()> {
    let session = Session::open(config_file)?;
    let entries = session
        .orchestrator
        .get_logs(project, tail)
        .await
        .map_err(describe)?;
    if entries.is_empty() {
        println!("No logs for {project}.");
        return Ok(());
    }
    print_entries(&entries);
    Ok(())
}
