//! Project configuration read from `.mare/mare.toml`.
//!
//! Values are layered file → environment → CLI. Every field has a default,
//! so an empty or missing file is a valid configuration.
//!
//! # Configuration File Format
//!
//! ```toml
//! [project]
//! name = "task-tracker"
//! domain = "web application development"
//! template = "web_app"
//!
//! [pipeline]
//! max_iterations = 5
//! quality_threshold = 8.0
//! timeout_secs = 300
//! reuse_recent = true
//! reuse_window_minutes = 60
//!
//! [roles]
//! backend = "command"
//! command = "claude"
//! args = ["--print"]
//!
//! [roles.overrides.checker]
//! command = "claude"
//! args = ["--print", "--model", "opus"]
//!
//! [workspace]
//! retention_days = 30
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::errors::PipelineError;
use crate::roles::RoleName;

pub const CONFIG_FILE: &str = "mare.toml";

pub const ENV_ROLE_CMD: &str = "MARE_ROLE_CMD";
pub const ENV_MAX_ITERATIONS: &str = "MARE_MAX_ITERATIONS";
pub const ENV_QUALITY_THRESHOLD: &str = "MARE_QUALITY_THRESHOLD";
pub const ENV_TIMEOUT_SECS: &str = "MARE_TIMEOUT_SECS";

/// Project template chosen at `mare init`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectTemplate {
    #[default]
    Basic,
    WebApp,
    MobileApp,
    Enterprise,
}

impl ProjectTemplate {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Basic => "basic",
            Self::WebApp => "web_app",
            Self::MobileApp => "mobile_app",
            Self::Enterprise => "enterprise",
        }
    }

    /// Domain assumed when the project does not name one.
    pub fn default_domain(&self) -> &'static str {
        match self {
            Self::WebApp => "web application development",
            Self::MobileApp => "mobile application development",
            Self::Enterprise => "enterprise software development",
            Self::Basic => "general software system",
        }
    }
}

impl std::fmt::Display for ProjectTemplate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProjectTemplate {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "basic" => Ok(Self::Basic),
            "web_app" | "web" => Ok(Self::WebApp),
            "mobile_app" | "mobile" => Ok(Self::MobileApp),
            "enterprise" => Ok(Self::Enterprise),
            _ => Err(format!(
                "Invalid template '{}'. Valid values: basic, web_app, mobile_app, enterprise",
                s
            )),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectSection {
    /// Defaults to the project directory name.
    #[serde(default)]
    pub name: Option<String>,
    /// Overrides the template's domain.
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub template: ProjectTemplate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSection {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// Minimum overall score, 0-10.
    #[serde(default = "default_quality_threshold")]
    pub quality_threshold: f64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Return a recent successful run with the same inputs instead of rerunning.
    #[serde(default = "default_reuse_recent")]
    pub reuse_recent: bool,
    #[serde(default = "default_reuse_window_minutes")]
    pub reuse_window_minutes: u64,
}

fn default_max_iterations() -> u32 {
    5
}

fn default_quality_threshold() -> f64 {
    8.0
}

fn default_timeout_secs() -> u64 {
    300
}

fn default_reuse_recent() -> bool {
    true
}

fn default_reuse_window_minutes() -> u64 {
    60
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            quality_threshold: default_quality_threshold(),
            timeout_secs: default_timeout_secs(),
            reuse_recent: default_reuse_recent(),
            reuse_window_minutes: default_reuse_window_minutes(),
        }
    }
}

/// How roles produce their output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoleBackend {
    /// Shell out to a text-generation CLI.
    #[default]
    Command,
    /// Deterministic built-in replies; no external calls.
    Offline,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleCommand {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RolesSection {
    #[serde(default)]
    pub backend: RoleBackend,
    #[serde(default = "default_role_command")]
    pub command: String,
    #[serde(default = "default_role_args")]
    pub args: Vec<String>,
    /// Per-role command overrides keyed by role name.
    #[serde(default)]
    pub overrides: BTreeMap<String, RoleCommand>,
    /// Write each role prompt and reply under `.mare/logs/roles/`.
    #[serde(default)]
    pub transcripts: bool,
}

fn default_role_command() -> String {
    "claude".to_string()
}

fn default_role_args() -> Vec<String> {
    vec!["--print".to_string()]
}

impl Default for RolesSection {
    fn default() -> Self {
        Self {
            backend: RoleBackend::default(),
            command: default_role_command(),
            args: default_role_args(),
            overrides: BTreeMap::new(),
            transcripts: false,
        }
    }
}

impl RolesSection {
    /// The command a role runs, honoring per-role overrides.
    pub fn command_for(&self, role: RoleName) -> RoleCommand {
        self.overrides
            .get(role.as_str())
            .cloned()
            .unwrap_or_else(|| RoleCommand {
                command: self.command.clone(),
                args: self.args.clone(),
            })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceSection {
    /// Archived artifacts older than this are removed by `mare cleanup`.
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

fn default_retention_days() -> u32 {
    30
}

impl Default for WorkspaceSection {
    fn default() -> Self {
        Self {
            retention_days: default_retention_days(),
        }
    }
}

/// Parsed `.mare/mare.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MareToml {
    #[serde(default)]
    pub project: ProjectSection,
    #[serde(default)]
    pub pipeline: PipelineSection,
    #[serde(default)]
    pub roles: RolesSection,
    #[serde(default)]
    pub workspace: WorkspaceSection,
}

/// Flags given on the command line for one invocation.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub max_iterations: Option<u32>,
    pub timeout_secs: Option<u64>,
    pub offline: bool,
    pub fresh: bool,
}

impl MareToml {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse mare.toml")
    }

    /// Load `mare.toml` from `mare_dir`, or defaults if it does not exist.
    pub fn load_or_default(mare_dir: &Path) -> Result<Self> {
        let config_path = mare_dir.join(CONFIG_FILE);
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize mare.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Apply `MARE_*` environment variables on top of the file values.
    pub fn apply_env(&mut self) -> Result<(), PipelineError> {
        if let Ok(cmd) = std::env::var(ENV_ROLE_CMD) {
            self.roles.command = cmd;
        }
        if let Some(n) = env_number(ENV_MAX_ITERATIONS)? {
            self.pipeline.max_iterations = n;
        }
        if let Some(t) = env_number(ENV_QUALITY_THRESHOLD)? {
            self.pipeline.quality_threshold = t;
        }
        if let Some(s) = env_number(ENV_TIMEOUT_SECS)? {
            self.pipeline.timeout_secs = s;
        }
        Ok(())
    }

    pub fn apply_cli(&mut self, cli: &CliOverrides) {
        if let Some(n) = cli.max_iterations {
            self.pipeline.max_iterations = n;
        }
        if let Some(s) = cli.timeout_secs {
            self.pipeline.timeout_secs = s;
        }
        if cli.offline {
            self.roles.backend = RoleBackend::Offline;
        }
        if cli.fresh {
            self.pipeline.reuse_recent = false;
        }
    }

    /// Reject settings a run cannot start with. All problems are reported
    /// together.
    pub fn validate(&self) -> Result<(), PipelineError> {
        let mut problems = Vec::new();

        if self.pipeline.max_iterations == 0 {
            problems.push("pipeline.max_iterations must be at least 1".to_string());
        }
        let t = self.pipeline.quality_threshold;
        if !(0.0..=10.0).contains(&t) {
            problems.push(format!(
                "pipeline.quality_threshold must be between 0 and 10, got {}",
                t
            ));
        }
        if self.pipeline.timeout_secs == 0 {
            problems.push("pipeline.timeout_secs must be at least 1".to_string());
        }
        if self.pipeline.reuse_recent && self.pipeline.reuse_window_minutes == 0 {
            problems.push("pipeline.reuse_window_minutes must be at least 1".to_string());
        }
        if self.roles.backend == RoleBackend::Command && self.roles.command.trim().is_empty() {
            problems.push("roles.command must not be empty".to_string());
        }
        for (name, cmd) in &self.roles.overrides {
            if name.parse::<RoleName>().is_err() {
                problems.push(format!("roles.overrides.{}: unknown role", name));
            }
            if cmd.command.trim().is_empty() {
                problems.push(format!("roles.overrides.{}.command must not be empty", name));
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(PipelineError::Configuration(problems.join("; ")))
        }
    }
}

/// Serializes tests that touch `MARE_*` environment variables.
#[cfg(test)]
pub(crate) static ENV_MUTEX: std::sync::Mutex<()> = std::sync::Mutex::new(());

fn env_number<T: FromStr>(key: &str) -> Result<Option<T>, PipelineError> {
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse::<T>().map(Some).map_err(|_| {
            PipelineError::Configuration(format!("{} is not a valid number: '{}'", key, raw))
        }),
        Err(_) => Ok(None),
    }
}
