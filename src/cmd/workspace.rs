//! Workspace inspection and maintenance: `mare status`, `mare cleanup`,
//! `mare archive`.

use anyhow::{Context, Result};
use console::style;
use std::path::Path;

use mare::config::Config;
use mare::ledger::ExecutionLedger;
use mare::mare_config::CliOverrides;
use mare::workspace::ArtifactRepository;

fn open_workspace(project_dir: &Path) -> Result<(Config, ArtifactRepository, ExecutionLedger)> {
    let config = Config::load(project_dir, &CliOverrides::default())?;
    let repo = ArtifactRepository::open(&config.workspace_dir)
        .context("Failed to open workspace")?;
    let ledger = ExecutionLedger::new(repo.db().clone());
    Ok((config, repo, ledger))
}

pub async fn cmd_status(
    project_dir: &Path,
    history: bool,
    limit: usize,
    execution: Option<&str>,
) -> Result<()> {
    use mare::init::is_initialized;
    use mare::ui::{render_history, render_stats, render_summary};

    if !is_initialized(project_dir) {
        println!("Project: not initialized");
        println!();
        println!("Run 'mare init' to initialize the project.");
        return Ok(());
    }

    let (config, repo, ledger) = open_workspace(project_dir)?;

    if history {
        let records = ledger.history(limit).await?;
        print!("{}", render_history(&records));
        return Ok(());
    }

    println!("Project: {}", style(config.project_name()).bold());
    println!("Domain:  {}", config.domain());
    println!();

    let target = match execution {
        Some(id) => {
            if ledger.get(id).await?.is_none() {
                anyhow::bail!("Unknown execution: {}", id);
            }
            Some(id.to_string())
        }
        None => ledger.latest().await?.map(|r| r.execution_id),
    };

    match target {
        Some(id) => {
            let record = ledger
                .get(&id)
                .await?
                .with_context(|| format!("Execution {} disappeared", id))?;
            println!(
                "Last run: {} ({}, score {:.1}, {} iteration(s))",
                record.execution_id, record.status, record.quality_score, record.iteration_count
            );
            if let Some(err) = &record.error_message {
                println!("  error: {}", style(err).red());
            }
            print!("{}", render_summary(&repo.execution_summary(&id).await?));
        }
        None => println!("No runs recorded yet. Run 'mare run' to start one."),
    }

    println!();
    print!("{}", render_stats(&repo.stats().await?));
    println!("Runs recorded: {}", ledger.count().await?);
    Ok(())
}

pub async fn cmd_cleanup(project_dir: &Path, days: Option<u32>) -> Result<()> {
    let (config, repo, _) = open_workspace(project_dir)?;
    let days = days.unwrap_or(config.settings.workspace.retention_days);

    let report = repo
        .sweep_archived(chrono::Duration::days(i64::from(days)))
        .await?;
    let orphans = repo.reclaim_orphan_blobs().await?;

    println!(
        "Removed {} archived artifact(s) older than {} day(s)",
        report.deleted, days
    );
    if report.skipped_referenced > 0 {
        println!(
            "  kept {} still referenced by newer versions",
            report.skipped_referenced
        );
    }
    if orphans > 0 {
        println!("Reclaimed {} orphaned content blob(s)", orphans);
    }
    Ok(())
}

pub async fn cmd_archive(project_dir: &Path, execution_id: &str) -> Result<()> {
    let (_, repo, _) = open_workspace(project_dir)?;
    let changed = repo.archive_execution(execution_id).await?;
    if changed == 0 {
        println!("No unarchived artifacts found for execution {}", execution_id);
    } else {
        println!(
            "Archived {} artifact(s) of execution {}",
            changed, execution_id
        );
    }
    Ok(())
}
