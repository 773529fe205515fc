use comfy_table::modifiers::UTF8_ROUND_CORNERS;
use comfy_table::presets::UTF8_FULL_CONDENSED;
use comfy_table::{Cell, CellAlignment, ContentArrangement, Table};
use is_terminal::IsTerminal;
use owo_colors::OwoColorize;

use crate::deps::ServiceInfo;
use crate::domain::{Project, Status};
use crate::orchestrator::Summary;

fn new_table(headers: &[&str]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(
        headers
            .iter()
            .map(|h| Cell::new(h).set_alignment(CellAlignment::Left))
            .collect::<Vec<_>>(),
    );
    table
}

fn print_indented(table: &Table) {
    for line in table.to_string().lines() {
        println!("  {}", line);
    }
}

fn status_text(status: Status, use_color: bool) -> String {
    if !use_color {
        return format!("\u{25cf} {}", status);
    }
    match status {
        Status::Running => format!("{} {}", "\u{25cf}".green(), "running".green()),
        Status::Starting => format!("{} {}", "\u{25cf}".yellow(), "starting".yellow()),
        Status::Error => format!("{} {}", "\u{25cf}".red(), "error".red()),
        other => format!("\u{25cf} {}", other),
    }
}

fn project_url(project: &Project) -> String {
    if !project.domain.is_empty() {
        format!("http://{}", project.domain)
    } else if let Some(port) = project.port {
        format!("http://localhost:{}", port)
    } else {
        "-".to_string()
    }
}

/// Table of every known project, for `devhost ps`.
pub fn print_project_table(projects: &[Project]) {
    if projects.is_empty() {
        println!("No projects registered.");
        println!("Declare projects in the config file and run `devhost up`.");
        return;
    }
    let use_color = std::io::stdout().is_terminal();
    let mut table = new_table(&["Project", "Type", "URL", "PID", "Status"]);
    for project in projects {
        let pid = if project.pid > 0 {
            project.pid.to_string()
        } else {
            "-".to_string()
        };
        let mut status = status_text(project.status, use_color);
        if let Some(err) = &project.last_error {
            if project.status == Status::Error {
                status = format!("{status} ({err})");
            }
        }
        table.add_row(vec![
            Cell::new(&project.id),
            Cell::new(project.project_type),
            Cell::new(project_url(project)),
            Cell::new(pid),
            Cell::new(status),
        ]);
    }
    print_indented(&table);
}

/// Live status of managed dependencies, for `devhost deps`.
pub fn print_dependency_table(services: &[ServiceInfo]) {
    if services.is_empty() {
        println!("No managed dependencies configured.");
        return;
    }
    let use_color = std::io::stdout().is_terminal();
    let mut table = new_table(&["Dependency", "Status"]);
    for service in services {
        let status = if service.running {
            Status::Running
        } else {
            Status::Stopped
        };
        table.add_row(vec![
            Cell::new(&service.name),
            Cell::new(status_text(status, use_color)),
        ]);
    }
    print_indented(&table);
}

pub fn print_startup_summary(projects: &[Project], summary: &Summary, proxy_port: u16) {
    let use_color = std::io::stdout().is_terminal();

    println!();
    let proxy = if summary.proxy_running {
        format!("proxy on :{proxy_port}")
    } else {
        "proxy off".to_string()
    };
    if use_color {
        println!(
            "  {} {} running, {} stopped, {} failed ({})",
            "devhost".bold(),
            summary.running.green(),
            summary.stopped,
            summary.error.red(),
            proxy.dimmed()
        );
    } else {
        println!(
            "  devhost {} running, {} stopped, {} failed ({})",
            summary.running, summary.stopped, summary.error, proxy
        );
    }
    println!();
    print_project_table(projects);

    println!();
    if use_color {
        println!("  Press {} to stop", "Ctrl+C".bold());
    } else {
        println!("  Press Ctrl+C to stop");
    }
    println!();
}
