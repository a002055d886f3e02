//! Collaborator roles.
//!
//! The pipeline talks to five roles through one narrow interface: a named
//! [`Operation`], a map of named string inputs, and a map of named outputs.
//! What a role does to produce its text (an external CLI, a scripted reply,
//! a human at the terminal) is invisible to the phases.
//!
//! | Role          | Operations                                        |
//! |---------------|---------------------------------------------------|
//! | `stakeholder` | `express_requirements`, `answer_question`         |
//! | `collector`   | `propose_questions`, `draft_requirements`         |
//! | `modeler`     | `extract_entities`, `extract_relationships`       |
//! | `checker`     | `check_quality`                                   |
//! | `documenter`  | `write_specification`, `write_quality_report`     |

pub mod command;
pub mod interactive;
pub mod prompts;
pub mod scripted;

use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::errors::{PipelineError, RoleError};
use crate::mare_config::{RoleBackend, RolesSection};

pub use command::CommandRole;
pub use interactive::HumanStakeholder;
pub use scripted::ScriptedRole;

/// Named string inputs for a role operation.
pub type RoleInput = BTreeMap<String, String>;

/// Named outputs of a role operation.
pub type RoleOutput = BTreeMap<String, serde_json::Value>;

/// Input and output keys shared by the prompts and the phases.
pub mod keys {
    pub const SYSTEM_IDEA: &str = "system_idea";
    pub const DOMAIN: &str = "domain";
    pub const PROJECT_NAME: &str = "project_name";
    pub const USER_STORIES: &str = "user_stories";
    pub const QUESTION: &str = "question";
    pub const CONTEXT: &str = "context";
    pub const ANSWER: &str = "answer";
    pub const QUESTIONS: &str = "questions";
    pub const QA_PAIRS: &str = "qa_pairs";
    pub const REQUIREMENTS_DRAFT: &str = "requirements_draft";
    pub const ENTITIES: &str = "entities";
    pub const RELATIONSHIPS: &str = "relationships";
    pub const CHECK_RESULTS: &str = "check_results";
    pub const FINAL_DOCUMENT: &str = "final_document";
    pub const QUALITY_REPORT: &str = "quality_report";
}

/// Build a [`RoleInput`] from key/value pairs.
pub fn role_input<const N: usize>(pairs: [(&str, &str); N]) -> RoleInput {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleName {
    Stakeholder,
    Collector,
    Modeler,
    Checker,
    Documenter,
}

impl RoleName {
    pub const ALL: [RoleName; 5] = [
        Self::Stakeholder,
        Self::Collector,
        Self::Modeler,
        Self::Checker,
        Self::Documenter,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stakeholder => "stakeholder",
            Self::Collector => "collector",
            Self::Modeler => "modeler",
            Self::Checker => "checker",
            Self::Documenter => "documenter",
        }
    }
}

impl std::fmt::Display for RoleName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RoleName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stakeholder" => Ok(Self::Stakeholder),
            "collector" => Ok(Self::Collector),
            "modeler" => Ok(Self::Modeler),
            "checker" => Ok(Self::Checker),
            "documenter" => Ok(Self::Documenter),
            _ => Err(format!("Invalid role: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    ExpressRequirements,
    AnswerQuestion,
    ProposeQuestions,
    DraftRequirements,
    ExtractEntities,
    ExtractRelationships,
    CheckQuality,
    WriteSpecification,
    WriteQualityReport,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ExpressRequirements => "express_requirements",
            Self::AnswerQuestion => "answer_question",
            Self::ProposeQuestions => "propose_questions",
            Self::DraftRequirements => "draft_requirements",
            Self::ExtractEntities => "extract_entities",
            Self::ExtractRelationships => "extract_relationships",
            Self::CheckQuality => "check_quality",
            Self::WriteSpecification => "write_specification",
            Self::WriteQualityReport => "write_quality_report",
        }
    }

    /// The role that owns this operation.
    pub fn role(&self) -> RoleName {
        match self {
            Self::ExpressRequirements | Self::AnswerQuestion => RoleName::Stakeholder,
            Self::ProposeQuestions | Self::DraftRequirements => RoleName::Collector,
            Self::ExtractEntities | Self::ExtractRelationships => RoleName::Modeler,
            Self::CheckQuality => RoleName::Checker,
            Self::WriteSpecification | Self::WriteQualityReport => RoleName::Documenter,
        }
    }

    /// The output key the operation must populate.
    pub fn output_key(&self) -> &'static str {
        match self {
            Self::ExpressRequirements => keys::USER_STORIES,
            Self::AnswerQuestion => keys::ANSWER,
            Self::ProposeQuestions => keys::QUESTIONS,
            Self::DraftRequirements => keys::REQUIREMENTS_DRAFT,
            Self::ExtractEntities => keys::ENTITIES,
            Self::ExtractRelationships => keys::RELATIONSHIPS,
            Self::CheckQuality => keys::CHECK_RESULTS,
            Self::WriteSpecification => keys::FINAL_DOCUMENT,
            Self::WriteQualityReport => keys::QUALITY_REPORT,
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A collaborator that performs named operations.
#[async_trait]
pub trait Role: Send + Sync {
    fn name(&self) -> RoleName;

    fn supports(&self, operation: Operation) -> bool {
        operation.role() == self.name()
    }

    async fn perform(
        &self,
        operation: Operation,
        input: &RoleInput,
    ) -> Result<RoleOutput, RoleError>;
}

/// Render an output value as text. Strings are taken verbatim.
pub fn output_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// The five roles a pipeline run needs, addressed by name.
#[derive(Clone)]
pub struct RoleSet {
    roles: BTreeMap<RoleName, Arc<dyn Role>>,
}

impl RoleSet {
    /// Build a role set. Every role name must be covered exactly once.
    pub fn new<I>(roles: I) -> Result<Self, PipelineError>
    where
        I: IntoIterator<Item = Arc<dyn Role>>,
    {
        let mut map = BTreeMap::new();
        for role in roles {
            let name = role.name();
            if map.insert(name, role).is_some() {
                return Err(PipelineError::Configuration(format!(
                    "role '{}' configured more than once",
                    name
                )));
            }
        }
        if let Some(missing) = RoleName::ALL.iter().find(|n| !map.contains_key(*n)) {
            return Err(PipelineError::Configuration(format!(
                "no role configured for '{}'",
                missing
            )));
        }
        Ok(Self { roles: map })
    }

    /// Scripted roles for every name; no external calls.
    pub fn offline() -> Self {
        Self {
            roles: RoleName::ALL
                .into_iter()
                .map(|n| (n, Arc::new(ScriptedRole::new(n)) as Arc<dyn Role>))
                .collect(),
        }
    }

    /// Build the role set the configuration asks for.
    pub fn from_settings(
        settings: &RolesSection,
        working_dir: &Path,
        transcript_dir: Option<&Path>,
    ) -> Result<Self, PipelineError> {
        match settings.backend {
            RoleBackend::Offline => Ok(Self::offline()),
            RoleBackend::Command => Self::new(RoleName::ALL.into_iter().map(|name| {
                let cmd = settings.command_for(name);
                let mut role = CommandRole::new(name, &cmd.command, &cmd.args, working_dir);
                if let Some(dir) = transcript_dir {
                    role = role.with_transcripts(dir);
                }
                Arc::new(role) as Arc<dyn Role>
            })),
        }
    }

    /// Replace one role, keeping the others.
    pub fn with_role(mut self, role: Arc<dyn Role>) -> Self {
        self.roles.insert(role.name(), role);
        self
    }

    pub fn get(&self, name: RoleName) -> Option<&Arc<dyn Role>> {
        self.roles.get(&name)
    }

    /// Invoke an operation on its owning role and return the text of its output.
    pub async fn invoke(&self, operation: Operation, input: RoleInput) -> Result<String, RoleError> {
        let name = operation.role();
        let role = self.roles.get(&name).ok_or_else(|| RoleError::Unsupported {
            role: name.to_string(),
            operation: operation.to_string(),
        })?;
        if !role.supports(operation) {
            return Err(RoleError::Unsupported {
                role: name.to_string(),
                operation: operation.to_string(),
            });
        }

        debug!(role = %name, operation = %operation, "invoking role");
        let output = role.perform(operation, &input).await.inspect_err(|e| {
            error!(role = %name, operation = %operation, error = %e, "role failed");
        })?;

        let key = operation.output_key();
        output
            .get(key)
            .map(output_text)
            .filter(|text| !text.trim().is_empty())
            .ok_or_else(|| RoleError::MissingOutput {
                role: name.to_string(),
                operation: operation.to_string(),
                key: key.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scripted_set() -> RoleSet {
        RoleSet::new(
            RoleName::ALL
                .into_iter()
                .map(|n| Arc::new(ScriptedRole::new(n)) as Arc<dyn Role>),
        )
        .unwrap()
    }

    #[test]
    fn test_every_operation_has_an_owner_that_round_trips() {
        for name in RoleName::ALL {
            assert_eq!(name.as_str().parse::<RoleName>().unwrap(), name);
        }
        assert_eq!(Operation::CheckQuality.role(), RoleName::Checker);
        assert_eq!(Operation::AnswerQuestion.role(), RoleName::Stakeholder);
        assert_eq!(Operation::WriteQualityReport.output_key(), "quality_report");
    }

    #[test]
    fn test_from_settings_builds_every_role() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = RolesSection::default();
        let set = RoleSet::from_settings(&settings, dir.path(), None).unwrap();
        assert!(RoleName::ALL.iter().all(|n| set.get(*n).is_some()));

        settings.backend = RoleBackend::Offline;
        let set = RoleSet::from_settings(&settings, dir.path(), None).unwrap();
        assert_eq!(set.get(RoleName::Checker).unwrap().name(), RoleName::Checker);
    }

    #[test]
    fn test_role_set_requires_all_roles() {
        let err = RoleSet::new([Arc::new(ScriptedRole::new(RoleName::Checker)) as Arc<dyn Role>])
            .err()
            .unwrap();
        assert!(matches!(err, PipelineError::Configuration(_)));
    }

    #[test]
    fn test_role_set_rejects_duplicates() {
        let roles: Vec<Arc<dyn Role>> = RoleName::ALL
            .into_iter()
            .chain([RoleName::Modeler])
            .map(|n| Arc::new(ScriptedRole::new(n)) as Arc<dyn Role>)
            .collect();
        assert!(RoleSet::new(roles).is_err());
    }

    #[tokio::test]
    async fn test_invoke_returns_output_text() {
        let set = scripted_set().with_role(Arc::new(
            ScriptedRole::new(RoleName::Checker).reply(Operation::CheckQuality, "Quality Score: 9"),
        ));
        let text = set
            .invoke(Operation::CheckQuality, RoleInput::new())
            .await
            .unwrap();
        assert_eq!(text, "Quality Score: 9");
    }

    #[tokio::test]
    async fn test_invoke_propagates_role_failure() {
        let set = scripted_set().with_role(Arc::new(
            ScriptedRole::new(RoleName::Modeler).fail(Operation::ExtractEntities, "model offline"),
        ));
        let err = set
            .invoke(Operation::ExtractEntities, RoleInput::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("model offline"));
    }

    #[tokio::test]
    async fn test_invoke_rejects_blank_output() {
        let set = scripted_set().with_role(Arc::new(
            ScriptedRole::new(RoleName::Documenter).reply(Operation::WriteSpecification, "   "),
        ));
        let err = set
            .invoke(Operation::WriteSpecification, RoleInput::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RoleError::MissingOutput { .. }));
    }

    #[test]
    fn test_output_text_renders_structured_values() {
        assert_eq!(output_text(&serde_json::json!("plain")), "plain");
        assert_eq!(output_text(&serde_json::json!(["a"])), r#"["a"]"#);
    }
}
