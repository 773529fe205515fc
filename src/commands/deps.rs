use anyhow::Result;
use std::path::Path;

use crate::ui::summary::print_dependency_table;

use super::Session;

pub async fn run(config_file: Option<&Path>) -> Result<()> {
    let session = Session::open(config_file)?;
    let services = session.orchestrator.dependencies().statuses().await;
    print_dependency_table(&services);
    Ok(())
}
