use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::errors::PipelineError;
use crate::mare_config::{CliOverrides, MareToml};

/// Name of the per-project state directory.
pub const MARE_DIR: &str = ".mare";

/// Runtime configuration: resolved project paths plus the layered settings.
#[derive(Debug, Clone)]
pub struct Config {
    pub project_dir: PathBuf,
    pub mare_dir: PathBuf,
    pub workspace_dir: PathBuf,
    pub log_dir: PathBuf,
    pub transcript_dir: PathBuf,
    pub input_file: PathBuf,
    pub output_dir: PathBuf,
    pub settings: MareToml,
}

impl Config {
    /// Resolve paths under `project_dir` with the given settings as-is.
    pub fn with_settings(project_dir: &Path, settings: MareToml) -> Self {
        let mare_dir = project_dir.join(MARE_DIR);
        Self {
            project_dir: project_dir.to_path_buf(),
            workspace_dir: mare_dir.join("workspace"),
            log_dir: mare_dir.join("logs"),
            transcript_dir: mare_dir.join("logs").join("roles"),
            input_file: project_dir.join("input").join("requirements.md"),
            output_dir: project_dir.join("output"),
            mare_dir,
            settings,
        }
    }

    /// Load settings for an initialized project: `mare.toml`, then the
    /// environment, then `cli`. The result is validated.
    pub fn load(project_dir: &Path, cli: &CliOverrides) -> Result<Self, PipelineError> {
        let project_dir = project_dir.canonicalize().map_err(|e| {
            PipelineError::Configuration(format!(
                "cannot resolve project directory {}: {}",
                project_dir.display(),
                e
            ))
        })?;
        let mare_dir = project_dir.join(MARE_DIR);
        if !mare_dir.is_dir() {
            return Err(PipelineError::Configuration(
                "project not initialized, run 'mare init' first".to_string(),
            ));
        }

        let mut settings = MareToml::load_or_default(&mare_dir)
            .map_err(|e| PipelineError::Configuration(format!("{:#}", e)))?;
        settings.apply_env()?;
        settings.apply_cli(cli);
        settings.validate()?;

        Ok(Self::with_settings(&project_dir, settings))
    }

    pub fn is_initialized(&self) -> bool {
        self.mare_dir.is_dir()
    }

    pub fn ensure_directories(&self) -> Result<()> {
        std::fs::create_dir_all(&self.workspace_dir)
            .context("Failed to create workspace directory")?;
        std::fs::create_dir_all(&self.log_dir).context("Failed to create log directory")?;
        std::fs::create_dir_all(&self.output_dir).context("Failed to create output directory")?;
        Ok(())
    }

    /// Configured project name, else the project directory name.
    pub fn project_name(&self) -> String {
        self.settings
            .project
            .name
            .clone()
            .filter(|n| !n.trim().is_empty())
            .or_else(|| {
                self.project_dir
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
            })
            .unwrap_or_else(|| "project".to_string())
    }

    /// Configured domain, else the one implied by the project template.
    pub fn domain(&self) -> String {
        self.settings
            .project
            .domain
            .clone()
            .filter(|d| !d.trim().is_empty())
            .unwrap_or_else(|| self.settings.project.template.default_domain().to_string())
    }

    /// Where the final document of a completed run is copied.
    pub fn output_document(&self) -> PathBuf {
        self.output_dir.join("requirements_specification.md")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mare_config::{ENV_MUTEX, ProjectTemplate, RoleBackend};
    use tempfile::tempdir;

    #[test]
    fn test_paths_live_under_mare_dir() {
        let dir = tempdir().unwrap();
        let config = Config::with_settings(dir.path(), MareToml::default());
        assert_eq!(config.workspace_dir, dir.path().join(".mare/workspace"));
        assert_eq!(config.log_dir, dir.path().join(".mare/logs"));
        assert_eq!(config.input_file, dir.path().join("input/requirements.md"));
        assert_eq!(
            config.output_document(),
            dir.path().join("output/requirements_specification.md")
        );
    }

    #[test]
    fn test_load_requires_initialized_project() {
        let _guard = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
        let dir = tempdir().unwrap();
        let err = Config::load(dir.path(), &CliOverrides::default()).unwrap_err();
        assert!(matches!(err, PipelineError::Configuration(ref m) if m.contains("not initialized")));
    }

    #[test]
    fn test_load_applies_cli_and_validates() {
        let _guard = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(MARE_DIR)).unwrap();
        let config = Config::load(
            dir.path(),
            &CliOverrides {
                offline: true,
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(config.settings.roles.backend, RoleBackend::Offline);

        let err = Config::load(
            dir.path(),
            &CliOverrides {
                max_iterations: Some(0),
                ..Default::default()
            },
        )
        .unwrap_err();
        assert!(matches!(err, PipelineError::Configuration(_)));
    }

    #[test]
    fn test_project_name_and_domain_fallbacks() {
        let dir = tempdir().unwrap();
        let project = dir.path().join("grocery-app");
        let mut settings = MareToml::default();
        settings.project.template = ProjectTemplate::MobileApp;
        let config = Config::with_settings(&project, settings);
        assert_eq!(config.project_name(), "grocery-app");
        assert_eq!(config.domain(), "mobile application development");

        let mut settings = MareToml::default();
        settings.project.name = Some("Groceries".into());
        settings.project.domain = Some("retail".into());
        let config = Config::with_settings(&project, settings);
        assert_eq!(config.project_name(), "Groceries");
        assert_eq!(config.domain(), "retail");
    }
}
