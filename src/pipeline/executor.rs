//! Run-level orchestration around the phase machine.
//!
//! The executor resolves the run input, decides whether a recent run can be
//! reused, drives the [`PhaseMachine`] under a wall-clock timeout, and records
//! the outcome in the ledger. Each call to [`PipelineExecutor::execute`] that
//! ends Completed or Failed appends exactly one ledger record. Reused and
//! Paused runs append nothing.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use super::machine::{GateConfig, PhaseMachine};
use super::state::{DocumentKind, Phase, PipelineState};
use crate::config::Config;
use crate::errors::{PipelineError, StorageError};
use crate::ledger::ExecutionLedger;
use crate::quality::{FreeTextEvaluator, Issue, QualityEvaluator};
use crate::roles::{HumanStakeholder, RoleName, RoleSet};
use crate::workspace::{
    Artifact, ArtifactContent, ArtifactRepository, ArtifactStatus, ArtifactType, ExecutionRecord,
    NewArtifact, RunStatus,
};

/// Per-run options, usually taken from the `run` command line.
#[derive(Debug, Clone)]
pub struct ExecuteOptions {
    /// Read the system idea from this file instead of `input/requirements.md`.
    pub input_file: Option<PathBuf>,
    /// Ask a human to answer clarification questions.
    pub interactive: bool,
    pub max_iterations: Option<u32>,
    pub timeout: Option<Duration>,
    /// Allow returning a recent successful run with identical inputs.
    pub reuse_recent: bool,
    /// Stop once this phase has completed; the run ends `Paused`.
    pub stop_after: Option<Phase>,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            input_file: None,
            interactive: false,
            max_iterations: None,
            timeout: None,
            reuse_recent: true,
            stop_after: None,
        }
    }
}

/// Presence and size of one artifact type in a run's output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArtifactPresence {
    pub id: String,
    pub version: u32,
    pub size: usize,
}

/// What a run reports back to its caller.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    pub status: RunStatus,
    pub execution_id: String,
    pub project_name: String,
    pub domain: String,
    pub quality_score: f64,
    /// Elicitation/modeling/verification cycles the run started.
    pub iteration_count: u32,
    pub document_kind: Option<DocumentKind>,
    pub issues: Vec<Issue>,
    pub error_message: Option<String>,
    /// True when an earlier run was returned instead of running the roles.
    pub reused: bool,
    pub artifacts: BTreeMap<ArtifactType, ArtifactPresence>,
    /// Non-fatal problems while saving the results of a finished run.
    pub warnings: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl ExecutionResult {
    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Completed
    }

    /// Artifact types present in this run, with their sizes, in pipeline order.
    pub fn artifact_summary(&self) -> Vec<(ArtifactType, Option<usize>)> {
        ArtifactType::ALL
            .into_iter()
            .map(|ty| (ty, self.artifacts.get(&ty).map(|a| a.size)))
            .collect()
    }
}

/// Stable digest of everything that determines a run's output.
pub fn input_digest(
    system_idea: &str,
    domain: &str,
    project_name: &str,
    max_iterations: u32,
    quality_threshold: f64,
) -> String {
    let mut hasher = Sha256::new();
    for part in [
        system_idea.trim(),
        domain,
        project_name,
        max_iterations.to_string().as_str(),
        quality_threshold.to_string().as_str(),
    ] {
        hasher.update(part.as_bytes());
        hasher.update([0x1f]);
    }
    format!("{:x}", hasher.finalize())
}

pub struct PipelineExecutor {
    config: Config,
    repo: ArtifactRepository,
    ledger: ExecutionLedger,
    roles: RoleSet,
    evaluator: Arc<dyn QualityEvaluator>,
}

impl PipelineExecutor {
    /// Open the project workspace and prepare to run with `roles`.
    pub fn new(config: Config, roles: RoleSet) -> Result<Self, PipelineError> {
        let repo = ArtifactRepository::open(&config.workspace_dir)?;
        let ledger = ExecutionLedger::new(repo.db().clone());
        Ok(Self {
            config,
            repo,
            ledger,
            roles,
            evaluator: Arc::new(FreeTextEvaluator::new()),
        })
    }

    pub fn with_evaluator(mut self, evaluator: Arc<dyn QualityEvaluator>) -> Self {
        self.evaluator = evaluator;
        self
    }

    pub fn repository(&self) -> &ArtifactRepository {
        &self.repo
    }

    pub fn ledger(&self) -> &ExecutionLedger {
        &self.ledger
    }

    pub async fn execute(&self, opts: ExecuteOptions) -> Result<ExecutionResult, PipelineError> {
        let pipeline = &self.config.settings.pipeline;
        let max_iterations = opts.max_iterations.unwrap_or(pipeline.max_iterations);
        if max_iterations == 0 {
            return Err(PipelineError::Configuration(
                "max iterations must be at least 1".to_string(),
            ));
        }
        let gate = GateConfig {
            max_iterations,
            quality_threshold: pipeline.quality_threshold,
        };
        let timeout = opts
            .timeout
            .unwrap_or_else(|| Duration::from_secs(pipeline.timeout_secs));

        let system_idea = self.resolve_input(opts.input_file.as_deref())?;
        let project_name = self.config.project_name();
        let domain = self.config.domain();
        let digest = input_digest(
            &system_idea,
            &domain,
            &project_name,
            gate.max_iterations,
            gate.quality_threshold,
        );

        let stop_after = opts.stop_after.filter(|p| *p != Phase::Specification);
        if opts.reuse_recent
            && pipeline.reuse_recent
            && stop_after.is_none()
            && let Some(result) = self.try_reuse(&digest, gate.quality_threshold).await
        {
            return Ok(result);
        }

        let mut roles = self.roles.clone();
        if opts.interactive
            && let Some(stakeholder) = roles.get(RoleName::Stakeholder).cloned()
        {
            roles = roles.with_role(Arc::new(HumanStakeholder::new(stakeholder)));
        }
        let machine = PhaseMachine::new(roles, self.repo.clone(), self.evaluator.clone(), gate);

        let mut state = PipelineState::new(system_idea, domain, project_name);

        // Dropping the machine future abandons the in-flight role call; the
        // state keeps what earlier phases produced.
        if tokio::time::timeout(timeout, machine.run(&mut state, stop_after))
            .await
            .is_err()
        {
            let err = PipelineError::Timeout {
                seconds: timeout.as_secs(),
            };
            warn!(
                execution_id = %state.execution_id,
                phase = %state.current_phase,
                "run timed out"
            );
            state.fail(err.to_string());
        }

        let completed_at = Utc::now();
        let mut warnings = Vec::new();

        if state.status == RunStatus::Completed {
            if let Err(e) = self.persist_final(&state).await {
                warn!(error = %e, "failed to persist final artifacts");
                warnings.push(format!("final artifacts not saved: {}", e));
            }
            if let Err(e) = self.write_output(&state.final_document) {
                warn!(error = %e, "failed to write output document");
                warnings.push(format!("output document not written: {:#}", e));
            }
        }

        if state.status.is_terminal() {
            let record = ExecutionRecord {
                execution_id: state.execution_id.clone(),
                project_name: state.project_name.clone(),
                domain: state.domain.clone(),
                status: state.status,
                quality_score: state.quality_score,
                iteration_count: state.current_iteration(),
                started_at: state.started_at,
                completed_at: Some(completed_at),
                error_message: state.error_message.clone(),
                input_digest: Some(digest),
            };
            if let Err(e) = self.ledger.append(record).await {
                warn!(error = %e, "failed to append execution record");
                warnings.push(format!("execution record not saved: {}", e));
            }
        } else {
            debug!(
                execution_id = %state.execution_id,
                status = %state.status,
                "run not terminal, no ledger record"
            );
        }

        let artifacts = match self.repo.latest_for_execution(&state.execution_id).await {
            Ok(latest) => presence(&latest),
            Err(e) => {
                warnings.push(format!("could not list artifacts: {}", e));
                BTreeMap::new()
            }
        };

        let record_iterations = state.current_iteration();
        info!(
            execution_id = %state.execution_id,
            status = %state.status,
            score = state.quality_score,
            iterations = record_iterations,
            "run finished"
        );

        Ok(ExecutionResult {
            status: state.status,
            execution_id: state.execution_id,
            project_name: state.project_name,
            domain: state.domain,
            quality_score: state.quality_score,
            iteration_count: record_iterations,
            document_kind: state.document_kind,
            issues: state.issues,
            error_message: state.error_message,
            reused: false,
            artifacts,
            warnings,
            started_at: state.started_at,
            completed_at,
        })
    }

    /// The system idea: explicit file, else `input/requirements.md`, else a
    /// stub naming the project and domain.
    fn resolve_input(&self, explicit: Option<&Path>) -> Result<String, PipelineError> {
        if let Some(path) = explicit {
            return std::fs::read_to_string(path).map_err(|e| {
                PipelineError::Configuration(format!(
                    "cannot read input file {}: {}",
                    path.display(),
                    e
                ))
            });
        }
        if let Ok(text) = std::fs::read_to_string(&self.config.input_file)
            && !text.trim().is_empty()
        {
            return Ok(text);
        }
        Ok(format!(
            "Project: {}\nDomain: {}",
            self.config.project_name(),
            self.config.domain()
        ))
    }

    async fn try_reuse(&self, digest: &str, threshold: f64) -> Option<ExecutionResult> {
        let window = chrono::Duration::minutes(
            self.config.settings.pipeline.reuse_window_minutes as i64,
        );
        let record = match self
            .ledger
            .most_recent_successful(window, threshold, digest)
            .await
        {
            Ok(Some(record)) => record,
            Ok(None) => return None,
            Err(e) => {
                warn!(error = %e, "could not check for a reusable run");
                return None;
            }
        };

        let latest = match self.repo.latest_for_execution(&record.execution_id).await {
            Ok(latest) if latest.contains_key(&ArtifactType::FinalDocument) => latest,
            Ok(_) => return None,
            Err(e) => {
                warn!(error = %e, "could not load artifacts of reusable run");
                return None;
            }
        };

        info!(
            execution_id = %record.execution_id,
            score = record.quality_score,
            "reusing recent run with identical inputs"
        );
        Some(ExecutionResult {
            status: record.status,
            execution_id: record.execution_id,
            project_name: record.project_name,
            domain: record.domain,
            quality_score: record.quality_score,
            iteration_count: record.iteration_count,
            // Only runs that met the threshold are reused.
            document_kind: Some(DocumentKind::Specification),
            issues: Vec::new(),
            error_message: None,
            reused: true,
            artifacts: presence(&latest),
            warnings: Vec::new(),
            started_at: record.started_at,
            completed_at: record.completed_at.unwrap_or(record.started_at),
        })
    }

    /// Store each artifact type's final content as a completed version.
    async fn persist_final(&self, state: &PipelineState) -> Result<(), StorageError> {
        let contents: [(ArtifactType, ArtifactContent, RoleName); 8] = [
            (
                ArtifactType::UserStories,
                state.user_stories.clone().into(),
                RoleName::Stakeholder,
            ),
            (
                ArtifactType::Questions,
                serde_json::to_value(&state.questions)?.into(),
                RoleName::Collector,
            ),
            (
                ArtifactType::QaPairs,
                serde_json::to_value(&state.qa_pairs)?.into(),
                RoleName::Stakeholder,
            ),
            (
                ArtifactType::RequirementsDraft,
                state.requirements_draft.clone().into(),
                RoleName::Collector,
            ),
            (
                ArtifactType::Entities,
                state.entities.clone().into(),
                RoleName::Modeler,
            ),
            (
                ArtifactType::Relationships,
                state.relationships.clone().into(),
                RoleName::Modeler,
            ),
            (
                ArtifactType::CheckResults,
                state.check_results.clone().into(),
                RoleName::Checker,
            ),
            (
                ArtifactType::FinalDocument,
                state.final_document.clone().into(),
                RoleName::Documenter,
            ),
        ];

        for (artifact_type, content, creator) in contents {
            if content.is_empty() {
                continue;
            }
            let parent = self
                .repo
                .latest(artifact_type, Some(&state.execution_id))
                .await?;
            let mut new = NewArtifact::new(artifact_type, content, creator.as_str())
                .in_execution(&state.execution_id)
                .with_status(ArtifactStatus::Completed)
                .with_tags(["final"]);
            if let Some(parent) = parent {
                new = new.with_parent(parent.metadata.id);
            }
            self.repo.store(new).await?;
        }
        Ok(())
    }

    fn write_output(&self, document: &str) -> anyhow::Result<()> {
        std::fs::create_dir_all(&self.config.output_dir)
            .context("Failed to create output directory")?;
        let path = self.config.output_document();
        std::fs::write(&path, document)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }
}

fn presence(latest: &BTreeMap<ArtifactType, Artifact>) -> BTreeMap<ArtifactType, ArtifactPresence> {
    latest
        .iter()
        .map(|(ty, artifact)| {
            (
                *ty,
                ArtifactPresence {
                    id: artifact.id().to_string(),
                    version: artifact.version(),
                    size: artifact.content.size(),
                },
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mare_config::MareToml;
    use crate::roles::{Operation, Role, ScriptedRole};
    use tempfile::TempDir;

    struct Project {
        dir: TempDir,
        config: Config,
    }

    fn project() -> Project {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = MareToml::default();
        settings.project.name = Some("task-tracker".into());
        let config = Config::with_settings(dir.path(), settings);
        std::fs::create_dir_all(&config.mare_dir).unwrap();
        Project { dir, config }
    }

    /// Every role scripted; returns the set plus handles for call counting.
    fn scripted(overrides: Vec<ScriptedRole>) -> (RoleSet, Vec<Arc<ScriptedRole>>) {
        let mut handles: Vec<Arc<ScriptedRole>> = RoleName::ALL
            .into_iter()
            .map(|n| Arc::new(ScriptedRole::new(n)))
            .collect();
        for role in overrides {
            let name = role.name();
            if let Some(slot) = handles.iter_mut().find(|h| h.name() == name) {
                *slot = Arc::new(role);
            }
        }
        let set = RoleSet::new(handles.iter().map(|h| h.clone() as Arc<dyn Role>)).unwrap();
        (set, handles)
    }

    fn total_calls(handles: &[Arc<ScriptedRole>]) -> usize {
        handles.iter().map(|h| h.calls()).sum()
    }

    fn write_input(p: &Project, text: &str) {
        let input = p.dir.path().join("input");
        std::fs::create_dir_all(&input).unwrap();
        std::fs::write(input.join("requirements.md"), text).unwrap();
    }

    #[tokio::test]
    async fn test_happy_path() {
        let p = project();
        write_input(&p, "task tracker");
        let (roles, _) = scripted(vec![]);
        let executor = PipelineExecutor::new(p.config.clone(), roles).unwrap();
        let result = executor.execute(ExecuteOptions::default()).await.unwrap();

        assert_eq!(result.status, RunStatus::Completed);
        assert!(result.is_success());
        assert_eq!(result.quality_score, 9.0);
        assert_eq!(result.iteration_count, 1);
        assert_eq!(result.document_kind, Some(DocumentKind::Specification));
        assert!(!result.reused);
        assert!(result.warnings.is_empty());
        assert!(result.artifact_summary().iter().all(|(_, size)| size.is_some()));

        // Final persistence chains a completed version onto each phase artifact.
        let doc = executor
            .repository()
            .latest(ArtifactType::FinalDocument, Some(&result.execution_id))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(doc.metadata.status, ArtifactStatus::Completed);
        assert_eq!(doc.version(), 2);
        assert!(doc.metadata.tags.contains(&"final".to_string()));

        let output = std::fs::read_to_string(p.config.output_document()).unwrap();
        assert!(output.contains("task tracker"));

        let record = executor.ledger().get(&result.execution_id).await.unwrap().unwrap();
        assert_eq!(record.status, RunStatus::Completed);
        assert_eq!(executor.ledger().count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_forced_exhaustion_produces_problem_report() {
        let p = project();
        let checker = ScriptedRole::new(RoleName::Checker)
            .reply(Operation::CheckQuality, "Overall Quality Score: 2.0/10\nMajor: vague");
        let (roles, handles) = scripted(vec![checker]);
        let executor = PipelineExecutor::new(p.config.clone(), roles).unwrap();
        let result = executor
            .execute(ExecuteOptions {
                max_iterations: Some(1),
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(result.status, RunStatus::Completed);
        assert_eq!(result.iteration_count, 1);
        assert_eq!(result.quality_score, 2.0);
        assert_eq!(result.document_kind, Some(DocumentKind::QualityReport));
        let checker_calls = handles.iter().find(|h| h.name() == RoleName::Checker).unwrap();
        assert_eq!(checker_calls.calls(), 1);
    }

    #[tokio::test]
    async fn test_reuse_short_circuits_without_role_calls() {
        let p = project();
        write_input(&p, "task tracker");
        let (roles, _) = scripted(vec![]);
        let first = PipelineExecutor::new(p.config.clone(), roles)
            .unwrap()
            .execute(ExecuteOptions::default())
            .await
            .unwrap();

        let (roles, handles) = scripted(vec![]);
        let executor = PipelineExecutor::new(p.config.clone(), roles).unwrap();
        let second = executor.execute(ExecuteOptions::default()).await.unwrap();

        assert!(second.reused);
        assert_eq!(second.execution_id, first.execution_id);
        assert_eq!(second.quality_score, 9.0);
        assert_eq!(second.artifacts, first.artifacts);
        assert_eq!(total_calls(&handles), 0);
        assert_eq!(executor.ledger().count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_reuse_is_bypassable_and_input_sensitive() {
        let p = project();
        write_input(&p, "task tracker");
        let (roles, _) = scripted(vec![]);
        let executor = PipelineExecutor::new(p.config.clone(), roles).unwrap();
        let first = executor.execute(ExecuteOptions::default()).await.unwrap();

        let fresh = executor
            .execute(ExecuteOptions {
                reuse_recent: false,
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(!fresh.reused);
        assert_ne!(fresh.execution_id, first.execution_id);

        write_input(&p, "expense tracker");
        let changed = executor.execute(ExecuteOptions::default()).await.unwrap();
        assert!(!changed.reused);
        assert_eq!(executor.ledger().count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_timeout_fails_run_and_keeps_partial_artifacts() {
        let p = project();
        let modeler = ScriptedRole::new(RoleName::Modeler).with_delay(Duration::from_secs(30));
        let (roles, _) = scripted(vec![modeler]);
        let executor = PipelineExecutor::new(p.config.clone(), roles).unwrap();
        let result = executor
            .execute(ExecuteOptions {
                timeout: Some(Duration::from_millis(200)),
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(result.status, RunStatus::Failed);
        assert!(result.error_message.as_deref().unwrap().contains("timed out"));
        assert!(result.document_kind.is_none());
        assert!(result.artifacts.contains_key(&ArtifactType::RequirementsDraft));
        assert!(!result.artifacts.contains_key(&ArtifactType::FinalDocument));
        assert!(!p.config.output_document().exists());

        let record = executor.ledger().get(&result.execution_id).await.unwrap().unwrap();
        assert_eq!(record.status, RunStatus::Failed);
    }

    #[tokio::test]
    async fn test_role_failure_is_reported_not_raised() {
        let p = project();
        let checker =
            ScriptedRole::new(RoleName::Checker).fail(Operation::CheckQuality, "rate limited");
        let (roles, _) = scripted(vec![checker]);
        let executor = PipelineExecutor::new(p.config.clone(), roles).unwrap();
        let result = executor.execute(ExecuteOptions::default()).await.unwrap();

        assert_eq!(result.status, RunStatus::Failed);
        assert!(result.error_message.as_deref().unwrap().contains("rate limited"));
        assert!(result.artifacts.contains_key(&ArtifactType::Relationships));
        assert_eq!(executor.ledger().count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_failed_run_is_never_reused() {
        let p = project();
        let checker =
            ScriptedRole::new(RoleName::Checker).fail(Operation::CheckQuality, "rate limited");
        let (roles, _) = scripted(vec![checker]);
        PipelineExecutor::new(p.config.clone(), roles)
            .unwrap()
            .execute(ExecuteOptions::default())
            .await
            .unwrap();

        let (roles, handles) = scripted(vec![]);
        let result = PipelineExecutor::new(p.config.clone(), roles)
            .unwrap()
            .execute(ExecuteOptions::default())
            .await
            .unwrap();
        assert!(!result.reused);
        assert!(total_calls(&handles) > 0);
    }

    #[tokio::test]
    async fn test_stop_after_phase_pauses() {
        let p = project();
        let (roles, _) = scripted(vec![]);
        let executor = PipelineExecutor::new(p.config.clone(), roles).unwrap();
        let result = executor
            .execute(ExecuteOptions {
                stop_after: Some(Phase::Elicitation),
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(result.status, RunStatus::Paused);
        assert!(result.artifacts.contains_key(&ArtifactType::RequirementsDraft));
        assert!(!result.artifacts.contains_key(&ArtifactType::Entities));
        assert!(!p.config.output_document().exists());
        assert_eq!(executor.ledger().count().await.unwrap(), 0);
        assert!(
            executor
                .ledger()
                .get(&result.execution_id)
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_input_resolution() {
        let p = project();
        let (roles, handles) = scripted(vec![]);
        let executor = PipelineExecutor::new(p.config.clone(), roles).unwrap();

        let err = executor
            .execute(ExecuteOptions {
                input_file: Some(p.dir.path().join("missing.md")),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Configuration(_)));
        assert_eq!(total_calls(&handles), 0);

        executor
            .execute(ExecuteOptions {
                stop_after: Some(Phase::Elicitation),
                ..Default::default()
            })
            .await
            .unwrap();
        let stakeholder = handles
            .iter()
            .find(|h| h.name() == RoleName::Stakeholder)
            .unwrap();
        let (_, input) = stakeholder.invocations().into_iter().next().unwrap();
        assert_eq!(
            input[crate::roles::keys::SYSTEM_IDEA],
            "Project: task-tracker\nDomain: general software system"
        );
    }

    #[test]
    fn test_input_digest_changes_with_any_input() {
        let base = input_digest("idea", "domain", "proj", 5, 8.0);
        assert_eq!(base, input_digest("idea\n", "domain", "proj", 5, 8.0));
        assert_ne!(base, input_digest("idea", "domain", "proj", 4, 8.0));
        assert_ne!(base, input_digest("idea", "domain", "proj", 5, 7.5));
        assert_ne!(base, input_digest("other", "domain", "proj", 5, 8.0));
        assert_eq!(base.len(), 64);
    }
}
