use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cmd;

#[derive(Parser)]
#[command(name = "mare")]
#[command(version, about = "Multi-agent requirements engineering pipeline")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Project directory (defaults to the current directory)
    #[arg(short = 'C', long, global = true)]
    pub project_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new mare project
    Init {
        /// Project template: basic, web_app, mobile_app, enterprise
        #[arg(short, long, default_value = "basic")]
        template: String,

        /// Project name (defaults to the directory name)
        #[arg(short, long)]
        name: Option<String>,
    },
    /// Run the requirements pipeline
    Run {
        /// Stop after this phase completes (elicitation, modeling, verification)
        #[arg(short, long)]
        phase: Option<String>,

        /// Answer clarification questions yourself
        #[arg(short, long)]
        interactive: bool,

        /// Read the system idea from this file
        #[arg(long)]
        input: Option<PathBuf>,

        /// Maximum elicitation/modeling/verification cycles
        #[arg(long)]
        max_iterations: Option<u32>,

        /// Wall-clock limit for the whole run, in seconds
        #[arg(long)]
        timeout: Option<u64>,

        /// Never reuse a recent run with identical inputs
        #[arg(long)]
        fresh: bool,

        /// Use built-in scripted roles instead of the configured command
        #[arg(long)]
        offline: bool,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show recent runs and workspace state
    Status {
        /// List past runs instead of the latest one
        #[arg(long)]
        history: bool,

        /// Number of runs to list with --history
        #[arg(long, default_value = "10")]
        limit: usize,

        /// Show one execution in detail
        #[arg(short, long)]
        execution: Option<String>,
    },
    /// Render the latest artifacts of an execution
    Export {
        /// Output format: markdown or json
        #[arg(short, long, default_value = "markdown")]
        format: String,

        /// Execution to export (defaults to the most recent run)
        #[arg(short, long)]
        execution: Option<String>,

        /// Write to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Include run and artifact metadata
        #[arg(long)]
        metadata: bool,
    },
    /// Delete old archived artifacts and orphaned content blobs
    Cleanup {
        /// Retention in days (defaults to workspace.retention_days)
        #[arg(long)]
        days: Option<u32>,
    },
    /// Archive every artifact of an execution
    Archive {
        execution_id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    dotenvy::dotenv().ok();

    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    let log_dir = project_dir.join(mare::config::MARE_DIR).join("logs");
    let _log_guard = mare::logging::init(
        cli.verbose,
        mare::init::is_initialized(&project_dir).then_some(log_dir.as_path()),
    )?;

    match &cli.command {
        Commands::Init { template, name } => {
            cmd::cmd_init(&project_dir, template, name.as_deref())?;
        }
        Commands::Run {
            phase,
            interactive,
            input,
            max_iterations,
            timeout,
            fresh,
            offline,
            json,
        } => {
            let args = cmd::RunArgs {
                phase: phase.clone(),
                interactive: *interactive,
                input: input.clone(),
                max_iterations: *max_iterations,
                timeout: *timeout,
                fresh: *fresh,
                offline: *offline,
                json: *json,
            };
            cmd::cmd_run(&project_dir, args).await?;
        }
        Commands::Status {
            history,
            limit,
            execution,
        } => {
            cmd::cmd_status(&project_dir, *history, *limit, execution.as_deref()).await?;
        }
        Commands::Export {
            format,
            execution,
            output,
            metadata,
        } => {
            cmd::cmd_export(
                &project_dir,
                format,
                execution.as_deref(),
                output.as_deref(),
                *metadata,
            )
            .await?;
        }
        Commands::Cleanup { days } => cmd::cmd_cleanup(&project_dir, *days).await?,
        Commands::Archive { execution_id } => cmd::cmd_archive(&project_dir, execution_id).await?,
    }

    Ok(())
}
