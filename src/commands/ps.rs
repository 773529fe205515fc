use anyhow::Result;
use std::path::Path;

use crate::domain::Status;
use crate::platform::is_process_alive;
use crate::ui::summary::print_project_table;

use super::Session;

pub fn run(config_file: Option<&Path>) -> Result<()> {
    let session = Session::open(config_file)?;
    let mut projects = session.orchestrator.store().list()?;
    projects.sort_by(|a, b| a.id.cmp(&b.id));

    // A record may claim a pid from a session that has since died.
    for project in &mut projects {
        if project.pid > 0 && !is_process_alive(project.pid) {
            project.status = Status::Unknown;
        }
    }
    print_project_table(&projects);
    Ok(())
}
