//! Project bootstrapping for `mare init`.
//!
//! ```text
//! <project>/
//! ├── .mare/
//! │   ├── mare.toml        # Project configuration
//! │   ├── workspace/       # Artifact database and content blobs
//! │   └── logs/            # Rolling log files and role transcripts
//! ├── input/
//! │   └── requirements.md  # The system idea the pipeline starts from
//! └── output/              # Final specification of the last completed run
//! ```
//!
//! Running init again fills in anything missing and never overwrites
//! existing files.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::config::MARE_DIR;
use crate::mare_config::{CONFIG_FILE, MareToml, ProjectTemplate};

#[derive(Debug)]
pub struct InitResult {
    pub mare_dir: PathBuf,
    /// False when the project was already initialized.
    pub created: bool,
    /// Files written by this call.
    pub files_written: Vec<PathBuf>,
}

/// Initialize a mare project in `project_dir`.
pub fn init_project(
    project_dir: &Path,
    template: ProjectTemplate,
    name: Option<&str>,
) -> Result<InitResult> {
    let mare_dir = project_dir.join(MARE_DIR);
    let created = !mare_dir.exists();

    for dir in [
        mare_dir.clone(),
        mare_dir.join("workspace"),
        mare_dir.join("logs"),
        project_dir.join("input"),
        project_dir.join("output"),
    ] {
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
    }

    let mut files_written = Vec::new();

    let config_path = mare_dir.join(CONFIG_FILE);
    if !config_path.exists() {
        let mut config = MareToml::default();
        config.project.template = template;
        config.project.name = name.map(str::to_string).or_else(|| {
            project_dir
                .canonicalize()
                .ok()
                .and_then(|p| p.file_name().map(|n| n.to_string_lossy().to_string()))
        });
        config.save(&config_path)?;
        files_written.push(config_path);
    }

    let input_path = project_dir.join("input").join("requirements.md");
    if !input_path.exists() {
        std::fs::write(&input_path, example_input(template))
            .with_context(|| format!("Failed to write {}", input_path.display()))?;
        files_written.push(input_path);
    }

    Ok(InitResult {
        mare_dir,
        created,
        files_written,
    })
}

pub fn is_initialized(project_dir: &Path) -> bool {
    project_dir.join(MARE_DIR).is_dir()
}

fn example_input(template: ProjectTemplate) -> String {
    let idea = match template {
        ProjectTemplate::Basic => {
            "A personal task tracker. Users create tasks with a title, due date and \
             priority, mark them done, and see what is overdue."
        }
        ProjectTemplate::WebApp => {
            "A web application where small teams share a task board. Members create \
             and assign tasks, comment on them, and get email reminders before due dates."
        }
        ProjectTemplate::MobileApp => {
            "A mobile app for a shared household grocery list that syncs between \
             phones and works offline in the store."
        }
        ProjectTemplate::Enterprise => {
            "An internal expense reporting system. Employees submit receipts, managers \
             approve them, and finance exports approved expenses to the accounting system."
        }
    };
    format!(
        "# System Idea\n\n{}\n\n\
         Replace this text with a description of the system you want to specify.\n",
        idea
    )
}
