//! The phase state machine.
//!
//! A run moves through a closed set of phases:
//!
//! ```text
//! Elicitation -> Modeling -> Verification -> QualityGate -+-> Specification -> Completed
//!      ^                                                   |
//!      +---------------------- continue -------------------+
//! ```
//!
//! [`next_phase`] is the whole transition table and [`should_continue`] the
//! whole gate. Any role or storage failure moves the run to `Failed`.

use std::sync::Arc;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, error, info, warn};

use super::questions::{MAX_ANSWERED, extract_questions};
use super::state::{DocumentKind, Phase, PipelineState, QaPair};
use crate::errors::{PipelineError, StorageError};
use crate::quality::QualityEvaluator;
use crate::roles::{Operation, RoleName, RoleSet, keys, role_input};
use crate::workspace::{ArtifactContent, ArtifactRepository, ArtifactType, NewArtifact, RunStatus};

/// Limits the quality gate works against.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GateConfig {
    pub max_iterations: u32,
    /// Minimum score on the 0-10 scale.
    pub quality_threshold: f64,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            max_iterations: 5,
            quality_threshold: 8.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    /// Loop back to elicitation.
    Continue,
    /// Produce the final document.
    Specification,
}

/// The gate rule that produced a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateRule {
    MaxIterations,
    QualityMet,
    BelowThreshold,
    /// No other rule matched. Well-formed runs never get here.
    Fallback,
}

/// Decide whether to run another cycle or move on to the specification.
pub fn should_continue(state: &PipelineState, config: &GateConfig) -> (GateDecision, GateRule) {
    let current = state.current_iteration();

    if current >= config.max_iterations {
        return (GateDecision::Specification, GateRule::MaxIterations);
    }
    if state.quality_score >= config.quality_threshold {
        return (GateDecision::Specification, GateRule::QualityMet);
    }
    if state.has_requirements_draft() && current < config.max_iterations {
        return (GateDecision::Continue, GateRule::BelowThreshold);
    }

    error!(
        execution_id = %state.execution_id,
        iteration = current,
        score = state.quality_score,
        has_draft = state.has_requirements_draft(),
        "quality gate fell through to fallback rule"
    );
    (GateDecision::Specification, GateRule::Fallback)
}

/// The transition table. `gate` is only consulted when leaving the quality gate.
pub fn next_phase(current: Phase, gate: Option<GateDecision>) -> Phase {
    match (current, gate) {
        (Phase::Elicitation, _) => Phase::Modeling,
        (Phase::Modeling, _) => Phase::Verification,
        (Phase::Verification, _) => Phase::QualityGate,
        (Phase::QualityGate, Some(GateDecision::Continue)) => Phase::Elicitation,
        (Phase::QualityGate, Some(GateDecision::Specification) | None) => Phase::Specification,
        (Phase::Specification, _) => Phase::Completed,
        (Phase::Completed, _) => Phase::Completed,
        (Phase::Failed, _) => Phase::Failed,
    }
}

/// Drives a [`PipelineState`] through the phases.
pub struct PhaseMachine {
    roles: RoleSet,
    repo: ArtifactRepository,
    evaluator: Arc<dyn QualityEvaluator>,
    gate: GateConfig,
}

impl PhaseMachine {
    pub fn new(
        roles: RoleSet,
        repo: ArtifactRepository,
        evaluator: Arc<dyn QualityEvaluator>,
        gate: GateConfig,
    ) -> Self {
        Self {
            roles,
            repo,
            evaluator,
            gate,
        }
    }

    pub fn gate(&self) -> &GateConfig {
        &self.gate
    }

    /// Run until the state reaches a terminal phase, or until `stop_after`
    /// has completed once, in which case the run is left `Paused`.
    ///
    /// The state is updated in place after every role call, so a caller that
    /// abandons this future still holds everything produced so far.
    pub async fn run(&self, state: &mut PipelineState, stop_after: Option<Phase>) {
        state.status = RunStatus::Running;
        info!(
            execution_id = %state.execution_id,
            project = %state.project_name,
            max_iterations = self.gate.max_iterations,
            threshold = self.gate.quality_threshold,
            "pipeline started"
        );

        while !state.current_phase.is_terminal() {
            let phase = state.current_phase;
            debug!(phase = %phase, iteration = state.current_iteration(), "entering phase");

            if let Err(e) = self.step(state, phase).await {
                error!(phase = %phase, error = %e, "phase failed");
                state.fail(e.to_string());
                return;
            }

            let gate = (phase == Phase::QualityGate).then(|| {
                let (decision, rule) = should_continue(state, &self.gate);
                info!(
                    iteration = state.current_iteration(),
                    score = state.quality_score,
                    decision = ?decision,
                    rule = ?rule,
                    "quality gate"
                );
                state.gate_rules.push(rule);
                if decision == GateDecision::Continue {
                    state.iteration_count += 1;
                }
                decision
            });

            state.current_phase = next_phase(phase, gate);

            if stop_after == Some(phase) && !state.current_phase.is_terminal() {
                info!(phase = %phase, "stopping after requested phase");
                state.status = RunStatus::Paused;
                return;
            }
        }

        if state.current_phase == Phase::Completed {
            state.status = RunStatus::Completed;
            info!(
                execution_id = %state.execution_id,
                score = state.quality_score,
                iterations = state.iteration_count + 1,
                "pipeline completed"
            );
        }
    }

    async fn step(&self, state: &mut PipelineState, phase: Phase) -> Result<(), PipelineError> {
        match phase {
            Phase::Elicitation => self.elicit(state).await,
            Phase::Modeling => self.model(state).await,
            Phase::Verification => self.verify(state).await,
            Phase::QualityGate => Ok(()),
            Phase::Specification => self.specify(state).await,
            Phase::Completed | Phase::Failed => Ok(()),
        }
    }

    async fn elicit(&self, state: &mut PipelineState) -> Result<(), PipelineError> {
        if state.iteration_count == 0 {
            state.user_stories = self
                .roles
                .invoke(
                    Operation::ExpressRequirements,
                    role_input([
                        (keys::SYSTEM_IDEA, state.system_idea.as_str()),
                        (keys::DOMAIN, state.domain.as_str()),
                    ]),
                )
                .await?;
            self.persist(
                state,
                ArtifactType::UserStories,
                state.user_stories.clone().into(),
                RoleName::Stakeholder,
                Phase::Elicitation,
            )
            .await?;
        }

        let raw = self
            .roles
            .invoke(
                Operation::ProposeQuestions,
                role_input([
                    (keys::USER_STORIES, state.user_stories.as_str()),
                    (keys::REQUIREMENTS_DRAFT, state.requirements_draft.as_str()),
                    (keys::DOMAIN, state.domain.as_str()),
                ]),
            )
            .await?;
        state.questions = extract_questions(&raw);
        if state.questions.is_empty() {
            warn!("collector proposed no recognizable questions");
        }
        self.persist(
            state,
            ArtifactType::Questions,
            json!(state.questions).into(),
            RoleName::Collector,
            Phase::Elicitation,
        )
        .await?;

        let asked: Vec<String> = state.questions.iter().take(MAX_ANSWERED).cloned().collect();
        let context = format!("System: {}\nDomain: {}", state.system_idea, state.domain);
        let calls = asked.iter().map(|question| {
            self.roles.invoke(
                Operation::AnswerQuestion,
                role_input([
                    (keys::QUESTION, question.as_str()),
                    (keys::CONTEXT, context.as_str()),
                    (keys::USER_STORIES, state.user_stories.as_str()),
                ]),
            )
        });
        // join_all yields results in input order, whatever order they finish in.
        let answers = join_all(calls).await;
        for (question, answer) in asked.into_iter().zip(answers) {
            state.qa_pairs.push(QaPair {
                question,
                answer: answer?,
            });
        }
        let qa = serde_json::to_value(&state.qa_pairs).map_err(StorageError::from)?;
        self.persist(
            state,
            ArtifactType::QaPairs,
            qa.into(),
            RoleName::Stakeholder,
            Phase::Elicitation,
        )
        .await?;

        state.requirements_draft = self
            .roles
            .invoke(
                Operation::DraftRequirements,
                role_input([
                    (keys::USER_STORIES, state.user_stories.as_str()),
                    (keys::QA_PAIRS, state.qa_text().as_str()),
                    (keys::DOMAIN, state.domain.as_str()),
                ]),
            )
            .await?;
        self.persist(
            state,
            ArtifactType::RequirementsDraft,
            state.requirements_draft.clone().into(),
            RoleName::Collector,
            Phase::Elicitation,
        )
        .await?;
        Ok(())
    }

    async fn model(&self, state: &mut PipelineState) -> Result<(), PipelineError> {
        state.entities = self
            .roles
            .invoke(
                Operation::ExtractEntities,
                role_input([
                    (keys::REQUIREMENTS_DRAFT, state.requirements_draft.as_str()),
                    (keys::DOMAIN, state.domain.as_str()),
                ]),
            )
            .await?;
        self.persist(
            state,
            ArtifactType::Entities,
            state.entities.clone().into(),
            RoleName::Modeler,
            Phase::Modeling,
        )
        .await?;

        state.relationships = self
            .roles
            .invoke(
                Operation::ExtractRelationships,
                role_input([
                    (keys::ENTITIES, state.entities.as_str()),
                    (keys::REQUIREMENTS_DRAFT, state.requirements_draft.as_str()),
                    (keys::DOMAIN, state.domain.as_str()),
                ]),
            )
            .await?;
        self.persist(
            state,
            ArtifactType::Relationships,
            state.relationships.clone().into(),
            RoleName::Modeler,
            Phase::Modeling,
        )
        .await?;
        Ok(())
    }

    async fn verify(&self, state: &mut PipelineState) -> Result<(), PipelineError> {
        state.check_results = self
            .roles
            .invoke(
                Operation::CheckQuality,
                role_input([
                    (keys::REQUIREMENTS_DRAFT, state.requirements_draft.as_str()),
                    (keys::ENTITIES, state.entities.as_str()),
                    (keys::RELATIONSHIPS, state.relationships.as_str()),
                    (keys::USER_STORIES, state.user_stories.as_str()),
                    (keys::DOMAIN, state.domain.as_str()),
                ]),
            )
            .await?;

        let evaluation = self.evaluator.evaluate(&state.check_results);
        state.quality_score = evaluation.score;
        state.issues = evaluation.issues;
        info!(
            iteration = state.current_iteration(),
            score = state.quality_score,
            confident = evaluation.confident,
            issues = state.issues.len(),
            "verification scored"
        );

        self.persist(
            state,
            ArtifactType::CheckResults,
            state.check_results.clone().into(),
            RoleName::Checker,
            Phase::Verification,
        )
        .await?;
        Ok(())
    }

    async fn specify(&self, state: &mut PipelineState) -> Result<(), PipelineError> {
        let (operation, kind) = if state.quality_score >= self.gate.quality_threshold {
            (Operation::WriteSpecification, DocumentKind::Specification)
        } else {
            warn!(
                score = state.quality_score,
                threshold = self.gate.quality_threshold,
                "quality bar not met, writing quality report"
            );
            (Operation::WriteQualityReport, DocumentKind::QualityReport)
        };

        state.final_document = self
            .roles
            .invoke(
                operation,
                role_input([
                    (keys::PROJECT_NAME, state.project_name.as_str()),
                    (keys::SYSTEM_IDEA, state.system_idea.as_str()),
                    (keys::DOMAIN, state.domain.as_str()),
                    (keys::USER_STORIES, state.user_stories.as_str()),
                    (keys::REQUIREMENTS_DRAFT, state.requirements_draft.as_str()),
                    (keys::ENTITIES, state.entities.as_str()),
                    (keys::RELATIONSHIPS, state.relationships.as_str()),
                    (keys::CHECK_RESULTS, state.check_results.as_str()),
                ]),
            )
            .await?;
        state.document_kind = Some(kind);

        self.persist(
            state,
            ArtifactType::FinalDocument,
            state.final_document.clone().into(),
            RoleName::Documenter,
            Phase::Specification,
        )
        .await?;
        Ok(())
    }

    /// Store phase output as the next version of its `(type, execution)` chain.
    async fn persist(
        &self,
        state: &PipelineState,
        artifact_type: ArtifactType,
        content: ArtifactContent,
        creator: RoleName,
        phase: Phase,
    ) -> Result<String, StorageError> {
        let parent = self
            .repo
            .latest(artifact_type, Some(&state.execution_id))
            .await?;
        let mut new = NewArtifact::new(artifact_type, content, creator.as_str())
            .in_execution(&state.execution_id)
            .with_tags([
                phase.as_str().to_string(),
                format!("iteration-{}", state.current_iteration()),
            ]);
        if let Some(parent) = parent {
            new = new.with_parent(parent.metadata.id);
        }
        self.repo.store(new).await
    }
}
