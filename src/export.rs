//! Rendering an execution's latest artifacts for `mare export`.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::str::FromStr;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::ledger::ExecutionLedger;
use crate::workspace::{
    Artifact, ArtifactContent, ArtifactMetadata, ArtifactRepository, ArtifactType, ExecutionRecord,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExportFormat {
    #[default]
    Markdown,
    Json,
}

impl ExportFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Markdown => "markdown",
            Self::Json => "json",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Markdown => "md",
            Self::Json => "json",
        }
    }
}

impl std::fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "markdown" | "md" => Ok(Self::Markdown),
            "json" => Ok(Self::Json),
            _ => Err(format!("Invalid export format: {} (expected markdown or json)", s)),
        }
    }
}

/// The latest artifact of every type one execution produced, plus its
/// ledger record when there is one.
#[derive(Debug, Clone)]
pub struct ExportBundle {
    pub execution_id: String,
    pub record: Option<ExecutionRecord>,
    pub artifacts: BTreeMap<ArtifactType, Artifact>,
}

/// Load the bundle for `execution_id`, or for the most recent run.
pub async fn collect(
    repo: &ArtifactRepository,
    ledger: &ExecutionLedger,
    execution_id: Option<&str>,
) -> Result<ExportBundle> {
    let record = match execution_id {
        Some(id) => ledger
            .get(id)
            .await
            .with_context(|| format!("Failed to read execution record {}", id))?,
        None => ledger.latest().await.context("Failed to read execution history")?,
    };
    let execution_id = match (execution_id, &record) {
        (Some(id), _) => id.to_string(),
        (None, Some(record)) => record.execution_id.clone(),
        (None, None) => bail!("No executions recorded yet, run 'mare run' first"),
    };

    let artifacts = repo
        .latest_for_execution(&execution_id)
        .await
        .with_context(|| format!("Failed to load artifacts of execution {}", execution_id))?;
    if artifacts.is_empty() && record.is_none() {
        bail!("Unknown execution: {}", execution_id);
    }

    Ok(ExportBundle {
        execution_id,
        record,
        artifacts,
    })
}

pub fn render(bundle: &ExportBundle, format: ExportFormat, include_metadata: bool) -> Result<String> {
    match format {
        ExportFormat::Markdown => Ok(render_markdown(bundle, include_metadata)),
        ExportFormat::Json => render_json(bundle, include_metadata),
    }
}

pub fn render_markdown(bundle: &ExportBundle, include_metadata: bool) -> String {
    let mut out = String::new();
    let title = bundle
        .record
        .as_ref()
        .map(|r| r.project_name.as_str())
        .unwrap_or("Requirements");
    let _ = writeln!(out, "# {}\n", title);

    if include_metadata {
        out.push_str("## Execution\n\n");
        let _ = writeln!(out, "- **Execution:** `{}`", bundle.execution_id);
        if let Some(record) = &bundle.record {
            let _ = writeln!(out, "- **Domain:** {}", record.domain);
            let _ = writeln!(out, "- **Status:** {}", record.status);
            let _ = writeln!(out, "- **Quality score:** {:.1}/10", record.quality_score);
            let _ = writeln!(out, "- **Iterations:** {}", record.iteration_count);
            let _ = writeln!(out, "- **Started:** {}", display_time(&record.started_at));
            if let Some(done) = &record.completed_at {
                let _ = writeln!(out, "- **Completed:** {}", display_time(done));
            }
            if let Some(err) = &record.error_message {
                let _ = writeln!(out, "- **Error:** {}", err);
            }
        }
        out.push('\n');
    }

    for (ty, artifact) in &bundle.artifacts {
        let _ = writeln!(out, "## {}\n", ty.title());
        if include_metadata {
            let _ = writeln!(
                out,
                "_v{} · {} · {} · {}_\n",
                artifact.version(),
                artifact.metadata.status,
                artifact.metadata.creator,
                display_time(&artifact.metadata.updated_at)
            );
        }
        out.push_str(markdown_body(&artifact.content).trim_end());
        out.push_str("\n\n");
    }

    if bundle.artifacts.is_empty() {
        out.push_str("_No artifacts were stored for this execution._\n");
    }
    out
}

fn display_time(ts: &DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

fn markdown_body(content: &ArtifactContent) -> String {
    match content {
        ArtifactContent::Text(text) => text.clone(),
        ArtifactContent::Structured(Value::Array(items)) if items.iter().all(Value::is_string) => {
            items
                .iter()
                .filter_map(Value::as_str)
                .enumerate()
                .map(|(i, q)| format!("{}. {}", i + 1, q))
                .collect::<Vec<_>>()
                .join("\n")
        }
        ArtifactContent::Structured(Value::Array(items))
            if items.iter().all(|v| v.get("question").is_some()) =>
        {
            items
                .iter()
                .map(|pair| {
                    format!(
                        "**Q:** {}\n\n**A:** {}",
                        pair["question"].as_str().unwrap_or_default(),
                        pair["answer"].as_str().unwrap_or_default()
                    )
                })
                .collect::<Vec<_>>()
                .join("\n\n")
        }
        other => format!("```json\n{}\n```", other.to_text()),
    }
}

#[derive(Serialize)]
struct JsonExport<'a> {
    execution_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    execution: Option<&'a ExecutionRecord>,
    artifacts: BTreeMap<ArtifactType, JsonArtifact<'a>>,
}

#[derive(Serialize)]
struct JsonArtifact<'a> {
    title: &'static str,
    content: &'a ArtifactContent,
    #[serde(skip_serializing_if = "Option::is_none")]
    metadata: Option<&'a ArtifactMetadata>,
}

pub fn render_json(bundle: &ExportBundle, include_metadata: bool) -> Result<String> {
    let export = JsonExport {
        execution_id: &bundle.execution_id,
        execution: bundle.record.as_ref().filter(|_| include_metadata),
        artifacts: bundle
            .artifacts
            .iter()
            .map(|(ty, artifact)| {
                (
                    *ty,
                    JsonArtifact {
                        title: ty.title(),
                        content: &artifact.content,
                        metadata: include_metadata.then_some(&artifact.metadata),
                    },
                )
            })
            .collect(),
    };
    serde_json::to_string_pretty(&export).context("Failed to serialize export")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workspace::{NewArtifact, RunStatus};
    use chrono::Utc;
    use serde_json::json;

    async fn seeded() -> (tempfile::TempDir, ArtifactRepository, ExecutionLedger) {
        let dir = tempfile::tempdir().unwrap();
        let repo = ArtifactRepository::open(dir.path()).unwrap();
        let ledger = ExecutionLedger::new(repo.db().clone());

        repo.store(
            NewArtifact::new(ArtifactType::UserStories, "As a user I add tasks", "stakeholder")
                .in_execution("run-1"),
        )
        .await
        .unwrap();
        repo.store(
            NewArtifact::new(
                ArtifactType::Questions,
                json!(["Who assigns tasks?", "Are there due dates?"]),
                "collector",
            )
            .in_execution("run-1"),
        )
        .await
        .unwrap();
        repo.store(
            NewArtifact::new(
                ArtifactType::QaPairs,
                json!([{"question": "Who assigns tasks?", "answer": "Team leads."}]),
                "stakeholder",
            )
            .in_execution("run-1"),
        )
        .await
        .unwrap();

        let now = Utc::now();
        ledger
            .append(ExecutionRecord {
                execution_id: "run-1".into(),
                project_name: "task-tracker".into(),
                domain: "general software system".into(),
                status: RunStatus::Completed,
                quality_score: 8.5,
                iteration_count: 1,
                started_at: now,
                completed_at: Some(now),
                error_message: None,
                input_digest: None,
            })
            .await
            .unwrap();
        (dir, repo, ledger)
    }

    #[test]
    fn test_format_parsing() {
        assert_eq!("md".parse::<ExportFormat>(), Ok(ExportFormat::Markdown));
        assert_eq!("JSON".parse::<ExportFormat>(), Ok(ExportFormat::Json));
        assert!("pdf".parse::<ExportFormat>().is_err());
        assert_eq!(ExportFormat::Json.extension(), "json");
    }

    #[tokio::test]
    async fn test_collect_defaults_to_latest_execution() {
        let (_dir, repo, ledger) = seeded().await;
        let bundle = collect(&repo, &ledger, None).await.unwrap();
        assert_eq!(bundle.execution_id, "run-1");
        assert_eq!(bundle.artifacts.len(), 3);
        assert!(bundle.record.is_some());
    }

    #[tokio::test]
    async fn test_collect_unknown_execution_fails() {
        let (_dir, repo, ledger) = seeded().await;
        let err = collect(&repo, &ledger, Some("nope")).await.unwrap_err();
        assert!(err.to_string().contains("Unknown execution"));
    }

    #[tokio::test]
    async fn test_collect_with_empty_ledger_fails() {
        let dir = tempfile::tempdir().unwrap();
        let repo = ArtifactRepository::open(dir.path()).unwrap();
        let ledger = ExecutionLedger::new(repo.db().clone());
        assert!(collect(&repo, &ledger, None).await.is_err());
    }

    #[tokio::test]
    async fn test_markdown_uses_titles_and_lists() {
        let (_dir, repo, ledger) = seeded().await;
        let bundle = collect(&repo, &ledger, None).await.unwrap();
        let md = render_markdown(&bundle, false);

        assert!(md.starts_with("# task-tracker"));
        assert!(md.contains("## User Stories"));
        assert!(md.contains("1. Who assigns tasks?\n2. Are there due dates?"));
        assert!(md.contains("**A:** Team leads."));
        assert!(!md.contains("## Execution"));

        let with_meta = render_markdown(&bundle, true);
        assert!(with_meta.contains("- **Quality score:** 8.5/10"));
        assert!(with_meta.contains("_v1 · draft · stakeholder"));
    }

    #[tokio::test]
    async fn test_json_export_shape() {
        let (_dir, repo, ledger) = seeded().await;
        let bundle = collect(&repo, &ledger, Some("run-1")).await.unwrap();

        let plain: Value = serde_json::from_str(&render_json(&bundle, false).unwrap()).unwrap();
        assert_eq!(plain["execution_id"], "run-1");
        assert!(plain.get("execution").is_none());
        assert_eq!(plain["artifacts"]["questions"]["content"][1], "Are there due dates?");
        assert!(plain["artifacts"]["user_stories"].get("metadata").is_none());

        let full: Value = serde_json::from_str(&render_json(&bundle, true).unwrap()).unwrap();
        assert_eq!(full["execution"]["status"], "completed");
        assert_eq!(full["artifacts"]["user_stories"]["metadata"]["version"], 1);
    }
}
