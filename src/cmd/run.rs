//! Pipeline execution: `mare run`.

use anyhow::{Context, Result};
use console::{Term, style};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default)]
pub struct RunArgs {
    pub phase: Option<String>,
    pub interactive: bool,
    pub input: Option<PathBuf>,
    pub max_iterations: Option<u32>,
    pub timeout: Option<u64>,
    pub fresh: bool,
    pub offline: bool,
    pub json: bool,
}

fn parse_stop_phase(raw: Option<&str>) -> Result<Option<mare::pipeline::Phase>> {
    use mare::pipeline::Phase;

    let Some(raw) = raw else {
        return Ok(None);
    };
    let phase: Phase = raw.parse().map_err(anyhow::Error::msg)?;
    match phase {
        Phase::Elicitation | Phase::Modeling | Phase::Verification | Phase::Specification => {
            Ok(Some(phase))
        }
        other => anyhow::bail!(
            "cannot stop after '{}': choose elicitation, modeling, verification or specification",
            other
        ),
    }
}

pub async fn cmd_run(project_dir: &Path, args: RunArgs) -> Result<()> {
    use mare::config::Config;
    use mare::mare_config::{CliOverrides, RoleBackend};
    use mare::pipeline::{DocumentKind, ExecuteOptions, PipelineExecutor};
    use mare::roles::RoleSet;
    use mare::ui::{RunSpinner, render_result};
    use mare::workspace::RunStatus;

    let stop_after = parse_stop_phase(args.phase.as_deref())?;

    let overrides = CliOverrides {
        max_iterations: args.max_iterations,
        timeout_secs: args.timeout,
        offline: args.offline,
        fresh: args.fresh,
    };
    let config = Config::load(project_dir, &overrides)?;
    config.ensure_directories()?;

    let roles = RoleSet::from_settings(
        &config.settings.roles,
        &config.project_dir,
        Some(&config.transcript_dir),
    )?;
    let timeout = Duration::from_secs(config.settings.pipeline.timeout_secs);
    let output_document = config.output_document();
    let project_name = config.project_name();
    let offline = config.settings.roles.backend == RoleBackend::Offline;
    let executor = PipelineExecutor::new(config, roles)?;

    let opts = ExecuteOptions {
        input_file: args.input.clone(),
        interactive: args.interactive,
        max_iterations: args.max_iterations,
        timeout: Some(timeout),
        reuse_recent: !args.fresh,
        stop_after,
    };

    let show_spinner = !args.interactive && !args.json && Term::stderr().is_term();
    let spinner = RunSpinner::new(&project_name, show_spinner);
    if offline {
        spinner.set_message("running requirements pipeline with offline roles");
    }
    let result = match executor.execute(opts).await {
        Ok(result) => result,
        Err(e) => {
            spinner.abandon();
            return Err(e.into());
        }
    };
    spinner.finish(result.status);

    if args.json {
        let json = serde_json::to_string_pretty(&result).context("Failed to serialize result")?;
        println!("{}", json);
    } else {
        print!("{}", render_result(&result));
        if result.status == RunStatus::Completed && !result.reused {
            let label = match result.document_kind {
                Some(DocumentKind::QualityReport) => "Quality report",
                _ => "Specification",
            };
            println!();
            println!("{} written to {}", label, style(output_document.display()).cyan());
        }
    }

    if result.status == RunStatus::Failed {
        anyhow::bail!(
            "run {} failed: {}",
            result.execution_id,
            result.error_message.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}
