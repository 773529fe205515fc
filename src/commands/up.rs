use std::collections::HashSet;
use std::path::Path;

use anyhow::{bail, Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::domain::slugify;
use crate::ui::logs::LogWriter;
use crate::ui::summary::print_startup_summary;

use super::{describe, Session};

/// Project ids to start: the named ones, or every `auto_start` project.
fn select_targets(session: &Session, registered: &[String], requested: &[String]) -> Vec<String> {
    if requested.is_empty() {
        return session
            .config
            .projects
            .iter()
            .filter(|p| p.auto_start)
            .map(|p| slugify(&p.name))
            .collect();
    }
    requested
        .iter()
        .map(|name| {
            if registered.contains(name) {
                name.clone()
            } else {
                slugify(name)
            }
        })
        .collect()
}

pub async fn run(config_file: Option<&Path>, requested: Vec<String>) -> Result<()> {
    let session = Session::open(config_file)?;
    let orch = &session.orchestrator;

    let report = orch.reconcile_orphans().await.map_err(describe)?;
    if !report.cleaned.is_empty() {
        info!(projects = ?report.cleaned, "cleaned up after previous session");
    }
    let registered = orch
        .register_projects(&session.config.projects, &session.config.global_scripts)
        .map_err(describe)?;

    let targets = select_targets(&session, &registered, &requested);
    if targets.is_empty() {
        bail!("no projects to start; name them or set auto_start = true in the config");
    }

    if session.config.proxy.enabled {
        if let Err(e) = orch.proxy().start().await {
            warn!(error = %e, "reverse proxy not started, continuing without it");
        }
    }

    let cancel = CancellationToken::new();
    let writer = LogWriter::new(
        orch.native().subscribe(),
        Some(targets.iter().cloned().collect::<HashSet<_>>()),
    );
    let writer_task = tokio::spawn(writer.run(cancel.clone()));

    let mut started = 0usize;
    for id in &targets {
        match orch.start(id).await {
            Ok(()) => started += 1,
            Err(e) => eprintln!("  {id}: {:#}", describe(e)),
        }
    }

    let mut projects = orch.store().list().map_err(|e| describe(e.into()))?;
    projects.retain(|p| targets.contains(&p.id));
    let summary = orch.summary().await.map_err(describe)?;
    print_startup_summary(&projects, &summary, orch.proxy().http_port());

    if started > 0 {
        tokio::signal::ctrl_c()
            .await
            .context("waiting for Ctrl+C")?;
        info!("shutting down");
    }

    orch.shutdown().await;
    cancel.cancel();
    let _ = writer_task.await;

    if started == 0 {
        bail!("no project could be started");
    }
    Ok(())
}
