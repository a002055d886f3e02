use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// The kind of work product an artifact holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactType {
    UserStories,
    Questions,
    QaPairs,
    RequirementsDraft,
    Entities,
    Relationships,
    CheckResults,
    FinalDocument,
}

impl ArtifactType {
    /// Every artifact type, in the order the pipeline produces them.
    pub const ALL: [ArtifactType; 8] = [
        Self::UserStories,
        Self::Questions,
        Self::QaPairs,
        Self::RequirementsDraft,
        Self::Entities,
        Self::Relationships,
        Self::CheckResults,
        Self::FinalDocument,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UserStories => "user_stories",
            Self::Questions => "questions",
            Self::QaPairs => "qa_pairs",
            Self::RequirementsDraft => "requirements_draft",
            Self::Entities => "entities",
            Self::Relationships => "relationships",
            Self::CheckResults => "check_results",
            Self::FinalDocument => "final_document",
        }
    }

    /// Human-readable heading used by exports and status output.
    pub fn title(&self) -> &'static str {
        match self {
            Self::UserStories => "User Stories",
            Self::Questions => "Clarification Questions",
            Self::QaPairs => "Question & Answer Pairs",
            Self::RequirementsDraft => "Requirements Draft",
            Self::Entities => "System Entities",
            Self::Relationships => "Entity Relationships",
            Self::CheckResults => "Quality Check Results",
            Self::FinalDocument => "Final Specification",
        }
    }
}

impl std::fmt::Display for ArtifactType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ArtifactType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user_stories" => Ok(Self::UserStories),
            "questions" => Ok(Self::Questions),
            "qa_pairs" => Ok(Self::QaPairs),
            "requirements_draft" => Ok(Self::RequirementsDraft),
            "entities" => Ok(Self::Entities),
            "relationships" => Ok(Self::Relationships),
            "check_results" => Ok(Self::CheckResults),
            "final_document" => Ok(Self::FinalDocument),
            _ => Err(format!("Invalid artifact type: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactStatus {
    #[default]
    Draft,
    InProgress,
    Completed,
    Reviewed,
    Approved,
    Archived,
}

impl ArtifactStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Reviewed => "reviewed",
            Self::Approved => "approved",
            Self::Archived => "archived",
        }
    }
}

impl std::fmt::Display for ArtifactStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ArtifactStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(Self::Draft),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "reviewed" => Ok(Self::Reviewed),
            "approved" => Ok(Self::Approved),
            "archived" => Ok(Self::Archived),
            _ => Err(format!("Invalid artifact status: {}", s)),
        }
    }
}

/// Artifact payload: free text or a structured JSON value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ArtifactContent {
    Text(String),
    Structured(serde_json::Value),
}

impl ArtifactContent {
    /// SHA-256 of the content. Structured content is hashed over its
    /// compact JSON encoding, whose object keys are always sorted.
    pub fn checksum(&self) -> String {
        let mut hasher = Sha256::new();
        match self {
            Self::Text(text) => hasher.update(text.as_bytes()),
            Self::Structured(value) => hasher.update(value.to_string().as_bytes()),
        }
        format!("{:x}", hasher.finalize())
    }

    /// Render the content as text; structured values are pretty-printed.
    pub fn to_text(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Structured(value) => {
                serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
            }
        }
    }

    /// Size in bytes of the textual rendering.
    pub fn size(&self) -> usize {
        match self {
            Self::Text(text) => text.len(),
            Self::Structured(value) => value.to_string().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::Text(text) => text.trim().is_empty(),
            Self::Structured(value) => match value {
                serde_json::Value::Null => true,
                serde_json::Value::Array(items) => items.is_empty(),
                serde_json::Value::Object(map) => map.is_empty(),
                _ => false,
            },
        }
    }
}

impl From<String> for ArtifactContent {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for ArtifactContent {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<serde_json::Value> for ArtifactContent {
    fn from(value: serde_json::Value) -> Self {
        Self::Structured(value)
    }
}

/// Everything the repository knows about an artifact except its content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactMetadata {
    pub id: String,
    pub artifact_type: ArtifactType,
    pub status: ArtifactStatus,
    pub creator: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub updated_by: Option<String>,
    pub version: u32,
    pub parent_id: Option<String>,
    pub execution_id: Option<String>,
    pub tags: Vec<String>,
    pub checksum: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    #[serde(flatten)]
    pub metadata: ArtifactMetadata,
    pub content: ArtifactContent,
}

impl Artifact {
    pub fn id(&self) -> &str {
        &self.metadata.id
    }

    pub fn version(&self) -> u32 {
        self.metadata.version
    }

    /// True when the stored checksum still matches the content.
    pub fn verify_checksum(&self) -> bool {
        self.content.checksum() == self.metadata.checksum
    }
}

/// A request to store a new artifact record.
#[derive(Debug, Clone)]
pub struct NewArtifact {
    pub artifact_type: ArtifactType,
    pub content: ArtifactContent,
    pub creator: String,
    pub execution_id: Option<String>,
    pub parent_id: Option<String>,
    pub tags: Vec<String>,
    pub status: ArtifactStatus,
}

impl NewArtifact {
    pub fn new(
        artifact_type: ArtifactType,
        content: impl Into<ArtifactContent>,
        creator: impl Into<String>,
    ) -> Self {
        Self {
            artifact_type,
            content: content.into(),
            creator: creator.into(),
            execution_id: None,
            parent_id: None,
            tags: Vec::new(),
            status: ArtifactStatus::Draft,
        }
    }

    pub fn in_execution(mut self, execution_id: impl Into<String>) -> Self {
        self.execution_id = Some(execution_id.into());
        self
    }

    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_status(mut self, status: ArtifactStatus) -> Self {
        self.status = status;
        self
    }
}

/// Filters for listing artifacts. Unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct ArtifactFilter {
    pub artifact_type: Option<ArtifactType>,
    pub execution_id: Option<String>,
    pub creator: Option<String>,
    pub status: Option<ArtifactStatus>,
    pub limit: Option<usize>,
}

/// Result of a retention sweep over archived artifacts.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SweepReport {
    pub deleted: usize,
    pub skipped_referenced: usize,
}

/// Aggregate counts over the whole workspace.
#[derive(Debug, Clone, Default, Serialize)]
pub struct WorkspaceStats {
    pub total_artifacts: u64,
    pub by_type: BTreeMap<String, u64>,
    pub by_status: BTreeMap<String, u64>,
    pub by_creator: BTreeMap<String, u64>,
    pub storage_bytes: u64,
}

/// Latest-artifact snapshot of one type within an execution.
#[derive(Debug, Clone, Serialize)]
pub struct TypeSummary {
    pub count: u64,
    pub latest_id: String,
    pub latest_version: u32,
    pub latest_status: ArtifactStatus,
    pub latest_creator: String,
    pub updated_at: DateTime<Utc>,
}

/// Per-execution view over the artifacts a run produced.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionSummary {
    pub execution_id: String,
    pub total_artifacts: u64,
    pub artifacts: BTreeMap<ArtifactType, TypeSummary>,
    pub phases_completed: Vec<String>,
}

/// Lifecycle status of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    #[default]
    NotStarted,
    Running,
    Completed,
    Failed,
    Paused,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Paused => "paused",
        }
    }

    /// Completed and Failed end a run; Paused runs can be started again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "not_started" => Ok(Self::NotStarted),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "paused" => Ok(Self::Paused),
            _ => Err(format!("Invalid run status: {}", s)),
        }
    }
}

/// Immutable ledger entry describing one finished pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub execution_id: String,
    pub project_name: String,
    pub domain: String,
    pub status: RunStatus,
    pub quality_score: f64,
    pub iteration_count: u32,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    /// Digest of the run inputs, used to decide whether a later run may reuse this one.
    pub input_digest: Option<String>,
}

/// Timestamps are stored as fixed-width RFC 3339 strings so that text
/// ordering in SQLite matches chronological ordering.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(raw).map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_artifact_type_round_trips_through_str() {
        for ty in ArtifactType::ALL {
            assert_eq!(ty.as_str().parse::<ArtifactType>().unwrap(), ty);
        }
        assert!("execution_log".parse::<ArtifactType>().is_err());
    }

    #[test]
    fn test_artifact_status_default_is_draft() {
        assert_eq!(ArtifactStatus::default(), ArtifactStatus::Draft);
        assert_eq!(
            "in_progress".parse::<ArtifactStatus>().unwrap(),
            ArtifactStatus::InProgress
        );
    }

    #[test]
    fn test_text_checksum_is_sha256_of_bytes() {
        let content = ArtifactContent::from("hello");
        assert_eq!(
            content.checksum(),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn test_structured_checksum_ignores_key_order() {
        let a: serde_json::Value = serde_json::from_str(r#"{"b": 1, "a": [1, 2]}"#).unwrap();
        let b: serde_json::Value = serde_json::from_str(r#"{"a": [1, 2], "b": 1}"#).unwrap();
        assert_eq!(
            ArtifactContent::from(a).checksum(),
            ArtifactContent::from(b).checksum()
        );
    }

    #[test]
    fn test_content_deserializes_untagged() {
        let text: ArtifactContent = serde_json::from_str(r#""plain""#).unwrap();
        assert_eq!(text, ArtifactContent::Text("plain".to_string()));

        let structured: ArtifactContent = serde_json::from_str(r#"["q1", "q2"]"#).unwrap();
        assert_eq!(structured, ArtifactContent::Structured(json!(["q1", "q2"])));
    }

    #[test]
    fn test_content_is_empty() {
        assert!(ArtifactContent::from("   ").is_empty());
        assert!(ArtifactContent::from(json!([])).is_empty());
        assert!(!ArtifactContent::from(json!({"k": "v"})).is_empty());
    }

    #[test]
    fn test_timestamp_format_sorts_chronologically() {
        let earlier = parse_timestamp("2026-01-02T03:04:05.000001Z").unwrap();
        let later = parse_timestamp("2026-01-02T03:04:05.100000Z").unwrap();
        assert!(format_timestamp(&earlier) < format_timestamp(&later));
        assert_eq!(parse_timestamp(&format_timestamp(&later)).unwrap(), later);
    }

    #[test]
    fn test_run_status_from_str_invalid() {
        let err = "done".parse::<RunStatus>().unwrap_err();
        assert!(err.contains("Invalid run status"));
    }
}
