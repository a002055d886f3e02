//! Artifact export: `mare export`.

use anyhow::{Context, Result};
use std::path::Path;

pub async fn cmd_export(
    project_dir: &Path,
    format: &str,
    execution: Option<&str>,
    output: Option<&Path>,
    include_metadata: bool,
) -> Result<()> {
    use mare::config::Config;
    use mare::export::{ExportFormat, collect, render};
    use mare::ledger::ExecutionLedger;
    use mare::mare_config::CliOverrides;
    use mare::workspace::ArtifactRepository;

    let format: ExportFormat = format.parse().map_err(anyhow::Error::msg)?;
    let config = Config::load(project_dir, &CliOverrides::default())?;
    let repo =
        ArtifactRepository::open(&config.workspace_dir).context("Failed to open workspace")?;
    let ledger = ExecutionLedger::new(repo.db().clone());

    let bundle = collect(&repo, &ledger, execution).await?;
    let rendered = render(&bundle, format, include_metadata)?;

    match output {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
            std::fs::write(path, &rendered)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!(
                "Exported execution {} ({}) to {}",
                bundle.execution_id,
                format,
                path.display()
            );
        }
        None => print!("{}", rendered),
    }
    Ok(())
}
