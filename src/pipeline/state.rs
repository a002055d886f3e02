use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::machine::GateRule;
use crate::quality::Issue;
use crate::workspace::RunStatus;

/// Where a run is in the phase sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Elicitation,
    Modeling,
    Verification,
    QualityGate,
    Specification,
    Completed,
    Failed,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Elicitation => "elicitation",
            Self::Modeling => "modeling",
            Self::Verification => "verification",
            Self::QualityGate => "quality_gate",
            Self::Specification => "specification",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Phase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "elicitation" => Ok(Self::Elicitation),
            "modeling" | "modelling" => Ok(Self::Modeling),
            "verification" => Ok(Self::Verification),
            "quality_gate" => Ok(Self::QualityGate),
            "specification" => Ok(Self::Specification),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Invalid phase: {}", s)),
        }
    }
}

/// A clarification question and the stakeholder's answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QaPair {
    pub question: String,
    pub answer: String,
}

/// Which document the specification phase produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    /// The quality bar was met.
    Specification,
    /// Iterations ran out below the bar; the document lists the problems.
    QualityReport,
}

/// Working state of one run, owned by the phase machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineState {
    pub system_idea: String,
    pub domain: String,
    pub project_name: String,
    pub execution_id: String,
    pub current_phase: Phase,
    /// Completed elicitation/modeling/verification cycles before the current one.
    pub iteration_count: u32,

    pub user_stories: String,
    pub questions: Vec<String>,
    pub qa_pairs: Vec<QaPair>,
    pub requirements_draft: String,
    pub entities: String,
    pub relationships: String,
    pub check_results: String,
    pub final_document: String,
    pub document_kind: Option<DocumentKind>,

    pub quality_score: f64,
    pub issues: Vec<Issue>,
    /// The gate rule behind each quality gate decision, in order.
    #[serde(default)]
    pub gate_rules: Vec<GateRule>,

    pub status: RunStatus,
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
}

impl PipelineState {
    pub fn new(
        system_idea: impl Into<String>,
        domain: impl Into<String>,
        project_name: impl Into<String>,
    ) -> Self {
        Self {
            system_idea: system_idea.into(),
            domain: domain.into(),
            project_name: project_name.into(),
            execution_id: uuid::Uuid::new_v4().to_string(),
            current_phase: Phase::Elicitation,
            iteration_count: 0,
            user_stories: String::new(),
            questions: Vec::new(),
            qa_pairs: Vec::new(),
            requirements_draft: String::new(),
            entities: String::new(),
            relationships: String::new(),
            check_results: String::new(),
            final_document: String::new(),
            document_kind: None,
            quality_score: 0.0,
            issues: Vec::new(),
            gate_rules: Vec::new(),
            status: RunStatus::NotStarted,
            error_message: None,
            started_at: Utc::now(),
        }
    }

    pub fn with_execution_id(mut self, execution_id: impl Into<String>) -> Self {
        self.execution_id = execution_id.into();
        self
    }

    /// Number of the cycle in progress, counting from 1.
    pub fn current_iteration(&self) -> u32 {
        self.iteration_count + 1
    }

    pub fn has_requirements_draft(&self) -> bool {
        !self.requirements_draft.trim().is_empty()
    }

    /// Question/answer pairs as the text the collector drafts from.
    pub fn qa_text(&self) -> String {
        self.qa_pairs
            .iter()
            .map(|qa| format!("Q: {}\nA: {}", qa.question, qa.answer))
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// Move to `Failed`, keeping everything produced so far.
    pub fn fail(&mut self, message: impl Into<String>) {
        self.current_phase = Phase::Failed;
        self.status = RunStatus::Failed;
        self.error_message = Some(message.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_parses_cli_spellings() {
        assert_eq!("Modeling".parse::<Phase>().unwrap(), Phase::Modeling);
        assert_eq!("quality-gate".parse::<Phase>().unwrap(), Phase::QualityGate);
        assert!("review".parse::<Phase>().is_err());
    }

    #[test]
    fn test_new_state_starts_at_elicitation() {
        let state = PipelineState::new("idea", "domain", "proj");
        assert_eq!(state.current_phase, Phase::Elicitation);
        assert_eq!(state.iteration_count, 0);
        assert_eq!(state.current_iteration(), 1);
        assert_eq!(state.status, RunStatus::NotStarted);
        assert!(!state.has_requirements_draft());
    }

    #[test]
    fn test_qa_text_joins_pairs_in_order() {
        let mut state = PipelineState::new("idea", "domain", "proj");
        state.qa_pairs = vec![
            QaPair {
                question: "Who?".into(),
                answer: "Members.".into(),
            },
            QaPair {
                question: "When?".into(),
                answer: "Daily.".into(),
            },
        ];
        assert_eq!(state.qa_text(), "Q: Who?\nA: Members.\n\nQ: When?\nA: Daily.");
    }

    #[test]
    fn test_fail_records_message() {
        let mut state = PipelineState::new("idea", "domain", "proj");
        state.requirements_draft = "FR-001".into();
        state.fail("checker offline");
        assert_eq!(state.current_phase, Phase::Failed);
        assert_eq!(state.status, RunStatus::Failed);
        assert_eq!(state.error_message.as_deref(), Some("checker offline"));
        assert_eq!(state.requirements_draft, "FR-001");
    }
}
